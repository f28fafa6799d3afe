use super::{RtpAction, RtpConnector, RtpHandle};
use crate::sip::Datagram;
use crate::transport::allocate_udp_client;
use crate::{Error, Result};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::{debug, warn};

pub const DEFAULT_RTP_TIMEOUT: Duration = Duration::from_millis(1000);
const MAX_DATAGRAM_SIZE: usize = 65535;
const SEPARATOR: &[u8] = b"\r\n\r\n";

/// UDP client of the RTP engine
///
/// Requests are `"{action} {call-id}\r\n\r\n{body}"`. The engine answers a
/// `negotiate` with `"{call-id}\r\n\r\n{session description}"`; an empty
/// description means no ports were allocated. `stop` is not answered.
///
/// Replies for another call id (late answers to a request that already timed
/// out) are discarded.
pub struct UdpRtpRouter {
    engine: SocketAddr,
    timeout: Duration,
    socket: UdpSocket,
}

impl UdpRtpRouter {
    pub async fn connect(engine: SocketAddr, timeout: Duration) -> Result<Self> {
        let socket = allocate_udp_client().await?;
        debug!(%engine, local = ?socket.local_addr().ok(), "rtp router connected");
        Ok(Self {
            engine,
            timeout,
            socket,
        })
    }

    async fn send<'a>(&self, action: RtpAction, datagram: &'a Datagram) -> Result<&'a str> {
        let call_id = datagram
            .call_id()
            .ok_or_else(|| Error::RtpError("datagram without call id".to_string()))?;
        let mut request = format!("{} {}", action, call_id).into_bytes();
        request.extend_from_slice(SEPARATOR);
        request.extend_from_slice(&datagram.body);
        self.socket
            .send_to(&request, self.engine)
            .await
            .map_err(|e| Error::RtpError(format!("send to {} failed: {}", self.engine, e)))?;
        Ok(call_id)
    }

    async fn receive_for(&self, call_id: &str) -> Result<Option<Vec<u8>>> {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let deadline = tokio::time::Instant::now() + self.timeout;
        loop {
            let received =
                tokio::time::timeout_at(deadline, self.socket.recv_from(&mut buf)).await;
            let (len, from) = match received {
                Ok(Ok(r)) => r,
                Ok(Err(e)) => return Err(Error::RtpError(format!("receive failed: {}", e))),
                Err(_) => {
                    warn!(call_id, engine = %self.engine, "rtp engine did not answer");
                    return Ok(None);
                }
            };
            if from != self.engine {
                debug!(%from, "ignoring datagram from unknown peer");
                continue;
            }
            let reply = &buf[..len];
            let (id, body) = match reply.windows(SEPARATOR.len()).position(|w| w == SEPARATOR) {
                Some(pos) => (&reply[..pos], &reply[pos + SEPARATOR.len()..]),
                None => (reply, &[][..]),
            };
            if id != call_id.as_bytes() {
                debug!(call_id, "discarding stale rtp reply");
                continue;
            }
            return Ok(Some(body.to_vec()));
        }
    }
}

#[async_trait]
impl RtpHandle for UdpRtpRouter {
    async fn negotiate(&self, datagram: &Datagram) -> Result<Option<Datagram>> {
        let call_id = self.send(RtpAction::Negotiate, datagram).await?;
        match self.receive_for(call_id).await? {
            Some(body) if !body.is_empty() => Ok(Some(datagram.clone().with_body(body))),
            _ => Ok(None),
        }
    }

    async fn stop(&self, datagram: &Datagram) -> Result<()> {
        self.send(RtpAction::Stop, datagram).await?;
        Ok(())
    }
}

/// Hands every worker its own [`UdpRtpRouter`].
#[derive(Debug, Clone)]
pub struct UdpRtpConnector {
    pub engine: SocketAddr,
    pub timeout: Duration,
}

impl UdpRtpConnector {
    pub fn new(engine: SocketAddr, timeout: Duration) -> Self {
        Self { engine, timeout }
    }
}

#[async_trait]
impl RtpConnector for UdpRtpConnector {
    async fn connect(&self) -> Result<Arc<dyn RtpHandle>> {
        let router = UdpRtpRouter::connect(self.engine, self.timeout).await?;
        Ok(Arc::new(router))
    }
}
