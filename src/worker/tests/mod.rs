use super::{Worker, WorkerContext};
use crate::config::Settings;
use crate::gc::{DeferredTask, GarbageCollector, SessionGc};
use crate::rtp::{RtpConnector, RtpHandle};
use crate::sip::{Codec, Datagram, RsipCodec, Template};
use crate::{Error, Result};
use async_trait::async_trait;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

mod test_invite;

pub(super) const ANSWER_SDP: &[u8] = b"v=0\r\nc=IN IP4 10.0.0.9\r\nm=audio 40000 RTP/AVP 0\r\n";

/// Something observable that happened during a transaction, in order.
#[derive(Debug, Clone, PartialEq)]
pub(super) enum Event {
    /// A response reached the peer: status code and whether it carried a body.
    Sent(u16, bool),
    Negotiate,
    Stop,
    DeferredTask,
}

/// Loopback UDP peer standing in for the SIP client.
///
/// Other mocks call [`Probe::record`] which first drains whatever the worker
/// already sent, so `events` reflects the real interleaving.
pub(super) struct Probe {
    socket: UdpSocket,
    events: Mutex<Vec<Event>>,
    bodies: Mutex<Vec<Vec<u8>>>,
}

impl Probe {
    pub fn new() -> Arc<Self> {
        let socket = UdpSocket::bind("127.0.0.1:0").expect("probe socket");
        Arc::new(Self {
            socket,
            events: Mutex::new(Vec::new()),
            bodies: Mutex::new(Vec::new()),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.socket.local_addr().expect("probe addr")
    }

    fn collect(&self, quiet: Option<Duration>) {
        match quiet {
            Some(timeout) => {
                self.socket.set_nonblocking(false).ok();
                self.socket.set_read_timeout(Some(timeout)).ok();
            }
            None => {
                self.socket.set_nonblocking(true).ok();
            }
        }
        let mut buf = vec![0u8; 65535];
        while let Ok((len, _)) = self.socket.recv_from(&mut buf) {
            let response: rsip::Response = rsip::SipMessage::try_from(&buf[..len])
                .expect("worker sent a sip message")
                .try_into()
                .expect("worker sent a response");
            self.events.lock().unwrap().push(Event::Sent(
                response.status_code.code(),
                !response.body.is_empty(),
            ));
            self.bodies.lock().unwrap().push(response.body.clone());
        }
    }

    pub fn record(&self, event: Event) {
        self.collect(None);
        self.events.lock().unwrap().push(event);
    }

    /// Everything observed so far, waiting until the peer has been quiet.
    pub fn events(&self) -> Vec<Event> {
        self.collect(Some(Duration::from_millis(100)));
        self.events.lock().unwrap().clone()
    }

    /// Bodies of the responses received so far.
    pub fn bodies(&self) -> Vec<Vec<u8>> {
        self.collect(Some(Duration::from_millis(100)));
        self.bodies.lock().unwrap().clone()
    }
}

#[derive(Debug, Clone)]
pub(super) enum Script {
    Answer(&'static [u8]),
    NoPorts,
    Fail,
    Crash,
}

pub(super) struct ScriptedRtp {
    probe: Arc<Probe>,
    script: Script,
    pub negotiations: AtomicUsize,
    pub stops: AtomicUsize,
}

#[async_trait]
impl RtpHandle for ScriptedRtp {
    async fn negotiate(&self, datagram: &Datagram) -> Result<Option<Datagram>> {
        self.negotiations.fetch_add(1, Ordering::SeqCst);
        self.probe.record(Event::Negotiate);
        match self.script {
            Script::Answer(body) => Ok(Some(datagram.clone().with_body(body.to_vec()))),
            Script::NoPorts => Ok(None),
            Script::Fail => Err(Error::RtpError("engine unreachable".to_string())),
            Script::Crash => panic!("rtp engine crashed"),
        }
    }

    async fn stop(&self, _datagram: &Datagram) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.probe.record(Event::Stop);
        match self.script {
            Script::Fail => Err(Error::RtpError("engine unreachable".to_string())),
            Script::Crash => panic!("rtp engine crashed"),
            _ => Ok(()),
        }
    }
}

pub(super) struct ScriptedConnector {
    pub handle: Arc<ScriptedRtp>,
    pub connects: AtomicUsize,
    pub refuse: AtomicBool,
}

#[async_trait]
impl RtpConnector for ScriptedConnector {
    async fn connect(&self) -> Result<Arc<dyn RtpHandle>> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(Error::RtpError("connection refused".to_string()));
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(self.handle.clone())
    }
}

/// [`SessionGc`] that also records task submissions on the probe.
pub(super) struct RecordingGc {
    pub inner: Arc<SessionGc>,
    probe: Arc<Probe>,
}

impl GarbageCollector for RecordingGc {
    fn is_known_call(&self, call_id: &str) -> bool {
        self.inner.is_known_call(call_id)
    }

    fn register_deferred_task(&self, task: DeferredTask) {
        self.probe.record(Event::DeferredTask);
        self.inner.register_deferred_task(task)
    }

    fn add_membership(&self, call_id: &str, method: &str) {
        self.inner.add_membership(call_id, method)
    }

    fn remove_membership(&self, call_id: &str, forced: bool) {
        self.inner.remove_membership(call_id, forced)
    }
}

/// Codec whose rendering always fails.
pub(super) struct BrokenCodec(pub RsipCodec);

impl Codec for BrokenCodec {
    fn validate_signature(&self, work: &[u8]) -> bool {
        self.0.validate_signature(work)
    }

    fn parse(&self, work: &[u8]) -> Result<Datagram> {
        self.0.parse(work)
    }

    fn render_template(&self, _template: &Template, _datagram: &Datagram) -> Result<Vec<u8>> {
        Err(Error::Error("template unavailable".to_string()))
    }
}

pub(super) struct Harness {
    pub worker: Worker,
    pub probe: Arc<Probe>,
    pub gc: Arc<SessionGc>,
    pub rtp: Arc<ScriptedRtp>,
    pub connector: Arc<ScriptedConnector>,
}

impl Harness {
    pub async fn handle(&mut self, work: &[u8]) -> Result<()> {
        let endpoint = self.probe.addr();
        self.worker.handle(work, Some(endpoint)).await
    }
}

pub(super) fn test_settings(max_retry: u32) -> Settings {
    let mut settings = Settings::default();
    settings.sip.server.address = "10.0.0.2".to_string();
    settings.rtp.max_retry = max_retry;
    settings
        .sip
        .worker
        .headers
        .insert("User-Agent".to_string(), "sipd".to_string());
    settings
}

pub(super) fn create_harness(script: Script, max_retry: u32) -> Harness {
    create_harness_with_codec(script, max_retry, Arc::new(RsipCodec::new()))
}

pub(super) fn create_harness_with_codec(
    script: Script,
    max_retry: u32,
    codec: Arc<dyn Codec>,
) -> Harness {
    let probe = Probe::new();
    let gc = Arc::new(SessionGc::default());
    let rtp = Arc::new(ScriptedRtp {
        probe: probe.clone(),
        script,
        negotiations: AtomicUsize::new(0),
        stops: AtomicUsize::new(0),
    });
    let connector = Arc::new(ScriptedConnector {
        handle: rtp.clone(),
        connects: AtomicUsize::new(0),
        refuse: AtomicBool::new(false),
    });
    let recording = Arc::new(RecordingGc {
        inner: gc.clone(),
        probe: probe.clone(),
    });
    let ctx = WorkerContext::new(&test_settings(max_retry), codec, recording, connector.clone());
    Harness {
        worker: Worker::new(Some("test".to_string()), Arc::new(ctx)),
        probe,
        gc,
        rtp,
        connector,
    }
}

pub(super) fn create_request(method: &str, call_id: &str, body: &str) -> Vec<u8> {
    format!(
        "{method} sip:bob@example.com SIP/2.0\r\n\
         Via: SIP/2.0/UDP 10.0.0.1:5060;branch=z9hG4bK776asdhds\r\n\
         Max-Forwards: 70\r\n\
         To: Bob <sip:bob@example.com>\r\n\
         From: Alice <sip:alice@atlanta.com>;tag=1928301774\r\n\
         Call-ID: {call_id}\r\n\
         CSeq: 1 {method}\r\n\
         Contact: <sip:alice@10.0.0.1>\r\n\
         Content-Length: {len}\r\n\
         \r\n\
         {body}",
        method = method,
        call_id = call_id,
        len = body.len(),
        body = body
    )
    .into_bytes()
}

pub(super) fn create_invite(call_id: &str) -> Vec<u8> {
    create_request("INVITE", call_id, "v=0\r\nm=audio 8000 RTP/AVP 0\r\n")
}
