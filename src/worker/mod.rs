use crate::config::Settings;
use crate::gc::GarbageCollector;
use crate::rtp::{RtpConnector, RtpHandle};
use crate::sip::{Codec, Datagram, ResponseKind, ResponseRenderer, SipMethod, CONTACT};
use crate::transport::allocate_random_listening_socket;
use crate::{Error, Result};
use futures::FutureExt;
use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::{debug, error, info, info_span, warn, Instrument};

#[cfg(test)]
mod tests;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Ready,
    Busy,
}

/// The request a worker is currently processing.
#[derive(Debug, Clone)]
pub struct CallTransaction {
    /// Correlation id, present on every log line of the transaction.
    pub ctx: String,
    pub call_id: String,
    pub method: SipMethod,
    pub datagram: Datagram,
    pub endpoint: SocketAddr,
}

/// Services shared by every worker of a server.
pub struct WorkerContext {
    pub codec: Arc<dyn Codec>,
    pub renderer: ResponseRenderer,
    pub gc: Arc<dyn GarbageCollector>,
    pub rtp: Arc<dyn RtpConnector>,
    /// Static headers merged into every outgoing datagram.
    pub headers: BTreeMap<String, String>,
    /// `Contact` pointing back at this server.
    pub contact: String,
    pub max_attempts: u32,
}

pub type WorkerContextRef = Arc<WorkerContext>;

impl WorkerContext {
    pub fn new(
        settings: &Settings,
        codec: Arc<dyn Codec>,
        gc: Arc<dyn GarbageCollector>,
        rtp: Arc<dyn RtpConnector>,
    ) -> Self {
        Self {
            renderer: ResponseRenderer::new(codec.clone(), settings.cache.responses),
            codec,
            gc,
            rtp,
            headers: settings.sip.worker.headers.clone(),
            contact: settings.contact(),
            max_attempts: settings.rtp.max_attempts(),
        }
    }
}

/// SIP call worker
///
/// A `Worker` processes one SIP transaction at a time and is recycled for the
/// lifetime of the process: `Ready -> Busy -> Ready`, never terminal.
///
/// # Transaction flow
///
/// 1. Mark busy and open a `transaction` span with a fresh correlation id
/// 2. Acquire the reply socket and the RTP handle if either is missing
/// 3. Validate and parse the request; anything malformed is dropped silently
/// 4. Merge the configured headers and point `Contact` back at this server
/// 5. Dispatch on the method
/// 6. Reset to ready, whatever the outcome of the steps above
///
/// # Lazy handles
///
/// The socket and the RTP handle are optional. A failed send releases the
/// socket; an RTP failure releases the RTP handle. Either one is acquired
/// again at the start of the next transaction. None of these failures abort
/// the worker.
///
/// # Methods
///
/// * `ACK` - nothing
/// * `INVITE` - duplicate check, then `100`, and up to `max_attempts` rounds of
///   `180` + RTP negotiation, answered with `200` (with SDP on success)
/// * `BYE` - `200`, deferred removal of the call from the collector, `487`
/// * `CANCEL` - `200`, stop media, `487`
/// * `OPTIONS` - `200` with the capability headers
/// * anything else - `200` without SDP
pub struct Worker {
    name: String,
    ctx: WorkerContextRef,
    state: WorkerState,
    socket: Option<UdpSocket>,
    rtp: Option<Arc<dyn RtpHandle>>,
    transaction: Option<CallTransaction>,
}

fn make_correlation_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}

impl Worker {
    pub fn new(name: Option<String>, ctx: WorkerContextRef) -> Self {
        let name = format!(
            "worker-{}",
            name.unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
        );
        info!(%name, "worker initialized");
        Self {
            name,
            ctx,
            state: WorkerState::Ready,
            socket: None,
            rtp: None,
            transaction: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == WorkerState::Ready
    }

    pub fn transaction(&self) -> Option<&CallTransaction> {
        self.transaction.as_ref()
    }

    pub fn has_socket(&self) -> bool {
        self.socket.is_some()
    }

    pub fn has_rtp(&self) -> bool {
        self.rtp.is_some()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }

    /// Process one inbound datagram from `endpoint`.
    ///
    /// Malformed input is not an error: it is logged and dropped. An `Err`
    /// means a handler failed part way (for example a response could not be
    /// rendered). A panic inside a handler or a collaborator is caught and
    /// reported as [`Error::WorkerError`]. The worker is ready again when this
    /// returns, in every case.
    pub async fn handle(&mut self, work: &[u8], endpoint: Option<SocketAddr>) -> Result<()> {
        self.state = WorkerState::Busy;
        let ctx = make_correlation_id();
        let span = info_span!("transaction", worker = %self.name, ctx = %ctx);
        let outcome = AssertUnwindSafe(self.process(ctx, work, endpoint).instrument(span))
            .catch_unwind()
            .await;
        let result = match outcome {
            Ok(result) => result,
            Err(_) => {
                error!(worker = %self.name, "transaction panicked, releasing handles");
                self.socket = None;
                self.release_rtp();
                Err(Error::WorkerError("transaction panicked".to_string()))
            }
        };
        self.reset();
        result
    }

    fn reset(&mut self) {
        self.transaction = None;
        self.state = WorkerState::Ready;
    }

    async fn process(
        &mut self,
        ctx: String,
        work: &[u8],
        endpoint: Option<SocketAddr>,
    ) -> Result<()> {
        let endpoint = match endpoint {
            Some(endpoint) => endpoint,
            None if work.is_empty() => {
                warn!("reset from incomplete work assignment");
                return Ok(());
            }
            None => {
                warn!(len = work.len(), "reset from work without endpoint");
                return Ok(());
            }
        };

        self.acquire_handles().await;

        if !self.ctx.codec.validate_signature(work) {
            warn!(%endpoint, work = %String::from_utf8_lossy(work), "reset from invalid signature");
            return Ok(());
        }
        let mut datagram = match self.ctx.codec.parse(work) {
            Ok(datagram) => datagram,
            Err(e) => {
                warn!(%endpoint, error = %e, "reset from invalid format");
                return Ok(());
            }
        };
        let (call_id, method) = match (datagram.call_id(), datagram.method()) {
            (Some(call_id), Some(method)) => (call_id.to_string(), method),
            _ => {
                warn!(%endpoint, "reset from invalid format: missing call id or method");
                return Ok(());
            }
        };

        for (name, value) in self.ctx.headers.iter() {
            datagram.set_header(name, value.clone());
        }
        datagram.set_header(CONTACT, self.ctx.contact.clone());

        let tx = CallTransaction {
            ctx,
            call_id,
            method,
            datagram,
            endpoint,
        };
        debug!(method = %tx.method, call_id = %tx.call_id, %endpoint, ">>> request");
        self.transaction = Some(tx.clone());
        self.dispatch(&tx).await
    }

    async fn acquire_handles(&mut self) {
        if self.socket.is_none() {
            match allocate_random_listening_socket(true) {
                Ok(socket) => {
                    debug!(local = ?socket.local_addr().ok(), "socket acquired");
                    self.socket = Some(socket);
                }
                Err(e) => warn!(error = %e, "failed to acquire socket, retrying next transaction"),
            }
        }
        if self.rtp.is_none() {
            match self.ctx.rtp.connect().await {
                Ok(handle) => {
                    debug!("rtp handler acquired");
                    self.rtp = Some(handle);
                }
                Err(e) => warn!(error = %e, "failed to acquire rtp handler, retrying next transaction"),
            }
        }
    }

    async fn dispatch(&mut self, tx: &CallTransaction) -> Result<()> {
        match tx.method {
            SipMethod::Ack => Ok(()),
            SipMethod::Bye => self.handle_session_end(tx).await,
            SipMethod::Cancel => self.handle_cancel(tx).await,
            SipMethod::Invite => self.handle_invite(tx).await,
            SipMethod::Options => {
                self.send_response(tx.endpoint, &tx.datagram, ResponseKind::Options)
                    .await
            }
            SipMethod::Other(_) => {
                self.send_response(tx.endpoint, &tx.datagram, ResponseKind::Default)
                    .await
            }
        }
    }

    async fn handle_session_end(&mut self, tx: &CallTransaction) -> Result<()> {
        self.send_response(tx.endpoint, &tx.datagram, ResponseKind::OkNoSdp)
            .await?;
        let gc = self.ctx.gc.clone();
        let call_id = tx.call_id.clone();
        self.ctx
            .gc
            .register_deferred_task(Box::new(move || gc.remove_membership(&call_id, true)));
        self.send_response(tx.endpoint, &tx.datagram, ResponseKind::Terminate)
            .await
    }

    async fn handle_cancel(&mut self, tx: &CallTransaction) -> Result<()> {
        self.send_response(tx.endpoint, &tx.datagram, ResponseKind::OkNoSdp)
            .await?;
        match self.rtp.clone() {
            Some(rtp) => {
                if let Err(e) = rtp.stop(&tx.datagram).await {
                    error!(error = %e, "rtp handler is down");
                    self.release_rtp();
                }
            }
            None => error!("rtp handler is down"),
        }
        self.send_response(tx.endpoint, &tx.datagram, ResponseKind::Terminate)
            .await
    }

    async fn handle_invite(&mut self, tx: &CallTransaction) -> Result<()> {
        if self.ctx.gc.is_known_call(&tx.call_id) {
            warn!(call_id = %tx.call_id, "received duplicate call");
            return self
                .send_response(tx.endpoint, &tx.datagram, ResponseKind::OkNoSdp)
                .await;
        }

        self.send_response(tx.endpoint, &tx.datagram, ResponseKind::Trying)
            .await?;
        let mut chances = self.ctx.max_attempts.max(1);
        while chances > 0 {
            self.send_response(tx.endpoint, &tx.datagram, ResponseKind::Ringing)
                .await?;
            match self.negotiate(&tx.datagram).await {
                Some(answer) => {
                    self.send_response(tx.endpoint, &answer, ResponseKind::OkWithSdp)
                        .await?;
                    self.ctx.gc.add_membership(&tx.call_id, "INVITE");
                    return Ok(());
                }
                None => {
                    warn!(remaining = chances - 1, "rtp handler did not send RX/TX information");
                    self.send_response(tx.endpoint, &tx.datagram, ResponseKind::OkNoSdp)
                        .await?;
                }
            }
            chances -= 1;
        }
        Ok(())
    }

    /// A failing or missing RTP handle counts as "no ports".
    async fn negotiate(&mut self, datagram: &Datagram) -> Option<Datagram> {
        let rtp = match self.rtp.clone() {
            Some(rtp) => rtp,
            None => {
                error!("rtp handler is down");
                return None;
            }
        };
        match rtp.negotiate(datagram).await {
            Ok(answer) => answer,
            Err(e) => {
                error!(error = %e, "rtp negotiation failed");
                self.release_rtp();
                None
            }
        }
    }

    fn release_rtp(&mut self) {
        if self.rtp.take().is_some() {
            debug!("rtp handler released, reacquiring next transaction");
        }
    }

    /// Render `kind` for `datagram` and send it to `endpoint`.
    ///
    /// Rendering errors propagate. Sending is best effort: without a socket
    /// the response is dropped, and a failed send releases the socket.
    async fn send_response(
        &mut self,
        endpoint: SocketAddr,
        datagram: &Datagram,
        kind: ResponseKind,
    ) -> Result<()> {
        debug!(%kind, %endpoint, "<<< response");
        let response = self.ctx.renderer.render(datagram, kind)?;
        let socket = match self.socket.as_ref() {
            Some(socket) => socket,
            None => {
                warn!(%kind, "no socket, response dropped");
                return Ok(());
            }
        };
        let sent = socket.send_to(&response, endpoint).await;
        if let Err(e) = sent {
            warn!(%kind, %endpoint, error = %e, "send failed, releasing socket");
            self.socket = None;
        }
        Ok(())
    }
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("socket", &self.local_addr())
            .field("rtp", &self.rtp.is_some())
            .finish()
    }
}
