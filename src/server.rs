use crate::config::Settings;
use crate::gc::SessionGc;
use crate::rtp::RtpConnector;
use crate::sip::Codec;
use crate::transport::ScopedSocket;
use crate::worker::{Worker, WorkerContext, WorkerContextRef};
use crate::{Error, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const MAX_DATAGRAM_SIZE: usize = 65535;
const JOB_QUEUE_SIZE: usize = 1024;

type Job = (Vec<u8>, SocketAddr);
type JobReceiver = Arc<Mutex<mpsc::Receiver<Job>>>;

/// SIP UDP server
///
/// Owns the main listening socket and a pool of [`Worker`]s. The receive loop
/// pushes every datagram onto a bounded queue; each worker task takes the next
/// job when it is ready. The session collector runs next to the workers.
/// [`SipServer::serve`] returns once the cancel token is cancelled.
pub struct SipServer {
    settings: Settings,
    listener: ScopedSocket,
    ctx: WorkerContextRef,
    gc: Arc<SessionGc>,
    cancel_token: CancellationToken,
}

impl SipServer {
    /// Bind `sip.server.port` and wire the shared services.
    pub fn new(
        settings: Settings,
        codec: Arc<dyn Codec>,
        rtp: Arc<dyn RtpConnector>,
        cancel_token: CancellationToken,
    ) -> Result<Self> {
        settings.validate()?;
        let listener = ScopedSocket::bind(settings.sip.server.port, true)?;
        Ok(Self::with_listener(
            settings,
            listener,
            codec,
            rtp,
            cancel_token,
        ))
    }

    pub fn with_listener(
        settings: Settings,
        listener: ScopedSocket,
        codec: Arc<dyn Codec>,
        rtp: Arc<dyn RtpConnector>,
        cancel_token: CancellationToken,
    ) -> Self {
        let gc = Arc::new(SessionGc::new(
            settings.gc.call_lifetime(),
            settings.gc.history_size,
        ));
        let ctx = Arc::new(WorkerContext::new(&settings, codec, gc.clone(), rtp));
        Self {
            settings,
            listener,
            ctx,
            gc,
            cancel_token,
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn gc(&self) -> Arc<SessionGc> {
        self.gc.clone()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Receive and dispatch until cancelled.
    pub async fn serve(mut self) -> Result<()> {
        let local = self.local_addr();
        let count = self.settings.sip.worker.count.max(1);
        info!(?local, workers = count, contact = %self.ctx.contact, "sip server started");

        let (jobs, receiver) = mpsc::channel::<Job>(JOB_QUEUE_SIZE);
        let receiver: JobReceiver = Arc::new(Mutex::new(receiver));
        let mut tasks: Vec<JoinHandle<()>> = (0..count)
            .map(|id| {
                let worker = Worker::new(Some(id.to_string()), self.ctx.clone());
                tokio::spawn(run_worker(
                    worker,
                    receiver.clone(),
                    self.cancel_token.child_token(),
                ))
            })
            .collect();

        let gc = self.gc.clone();
        let check_interval = self.settings.gc.check_interval();
        let gc_token = self.cancel_token.child_token();
        tasks.push(tokio::spawn(async move {
            gc.serve(check_interval, gc_token).await
        }));

        let result = self.receive_loop(jobs).await;
        self.cancel_token.cancel();
        for task in tasks {
            task.await.ok();
        }
        self.listener.close();
        info!(?local, "sip server stopped");
        result
    }

    async fn receive_loop(&self, jobs: mpsc::Sender<Job>) -> Result<()> {
        let socket = self
            .listener
            .get()
            .ok_or_else(|| Error::Error("listener is closed".to_string()))?;
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        loop {
            let (len, from) = tokio::select! {
                _ = self.cancel_token.cancelled() => return Ok(()),
                received = socket.recv_from(&mut buf) => match received {
                    Ok(r) => r,
                    Err(e) => {
                        warn!(error = %e, "receive failed");
                        continue;
                    }
                },
            };
            debug!(%from, len, "datagram received");
            if jobs.send((buf[..len].to_vec(), from)).await.is_err() {
                return Err(Error::WorkerError("worker pool is gone".to_string()));
            }
        }
    }
}

async fn run_worker(mut worker: Worker, jobs: JobReceiver, cancel_token: CancellationToken) {
    loop {
        let job = {
            let mut jobs = jobs.lock().await;
            tokio::select! {
                _ = cancel_token.cancelled() => None,
                job = jobs.recv() => job,
            }
        };
        let (work, endpoint) = match job {
            Some(job) => job,
            None => break,
        };
        if let Err(e) = worker.handle(&work, Some(endpoint)).await {
            warn!(worker = worker.name(), %endpoint, error = %e, "transaction failed");
        }
    }
    debug!(worker = worker.name(), "worker stopped");
}
