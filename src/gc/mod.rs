//! Call-session garbage collection.
//!
//! Workers record a call as soon as it is answered, so retransmitted INVITEs
//! are recognized at once. Teardown goes through deferred tasks which the
//! collector runs on its own schedule, next to a TTL sweep of memberships that
//! were never torn down by a BYE.
use crate::cache::BoundedOrderedMap;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub type DeferredTask = Box<dyn FnOnce() + Send + 'static>;

pub const DEFAULT_CALL_LIFETIME: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_HISTORY_SIZE: usize = 4096;

/// What the worker needs from the collector.
pub trait GarbageCollector: Send + Sync {
    /// Whether `call_id` was seen before (bounded history, not live membership).
    fn is_known_call(&self, call_id: &str) -> bool;
    fn register_deferred_task(&self, task: DeferredTask);
    fn add_membership(&self, call_id: &str, method: &str);
    fn remove_membership(&self, call_id: &str, forced: bool);
}

#[derive(Debug, Clone)]
pub struct Membership {
    pub state: String,
    pub sessions: u32,
    pub expires_at: Instant,
}

struct GcState {
    membership: HashMap<String, Membership>,
    history: BoundedOrderedMap<String, Instant>,
    calls_total: u64,
}

/// In-process collector
///
/// Keeps live call membership, a FIFO bounded history of every call id it has
/// seen, and a queue of deferred tasks. Tasks and the TTL sweep run from
/// [`SessionGc::collect`], which [`SessionGc::serve`] calls every
/// `check_interval`.
pub struct SessionGc {
    state: Mutex<GcState>,
    tasks: UnboundedSender<DeferredTask>,
    pending: Mutex<UnboundedReceiver<DeferredTask>>,
    call_lifetime: Duration,
}

impl SessionGc {
    pub fn new(call_lifetime: Duration, history_size: usize) -> Self {
        let (tasks, pending) = unbounded_channel();
        Self {
            state: Mutex::new(GcState {
                membership: HashMap::new(),
                history: BoundedOrderedMap::new(history_size),
                calls_total: 0,
            }),
            tasks,
            pending: Mutex::new(pending),
            call_lifetime,
        }
    }

    pub fn membership(&self, call_id: &str) -> Option<Membership> {
        self.state.lock().unwrap().membership.get(call_id).cloned()
    }

    pub fn active_calls(&self) -> usize {
        self.state.lock().unwrap().membership.len()
    }

    pub fn calls_total(&self) -> u64 {
        self.state.lock().unwrap().calls_total
    }

    pub fn history_len(&self) -> usize {
        self.state.lock().unwrap().history.len()
    }

    /// Run every queued task in submission order. Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut tasks = Vec::new();
        {
            let mut pending = self.pending.lock().unwrap();
            while let Ok(task) = pending.try_recv() {
                tasks.push(task);
            }
        }
        let count = tasks.len();
        for task in tasks {
            task();
        }
        count
    }

    /// Drop memberships whose lifetime elapsed before `now`.
    pub fn sweep(&self, now: Instant) -> usize {
        let mut state = self.state.lock().unwrap();
        let before = state.membership.len();
        state.membership.retain(|call_id, m| {
            let alive = m.expires_at > now;
            if !alive {
                debug!(call_id, "membership expired");
            }
            alive
        });
        before - state.membership.len()
    }

    pub fn collect(&self) -> (usize, usize) {
        let ran = self.run_pending();
        let expired = self.sweep(Instant::now());
        (ran, expired)
    }

    pub async fn serve(&self, check_interval: Duration, cancel_token: CancellationToken) {
        info!(?check_interval, "garbage collector started");
        let mut ticker = tokio::time::interval(check_interval);
        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => break,
                _ = ticker.tick() => {
                    let (ran, expired) = self.collect();
                    if ran > 0 || expired > 0 {
                        debug!(ran, expired, "garbage collected");
                    }
                }
            }
        }
        self.run_pending();
        info!("garbage collector stopped");
    }
}

impl Default for SessionGc {
    fn default() -> Self {
        Self::new(DEFAULT_CALL_LIFETIME, DEFAULT_HISTORY_SIZE)
    }
}

impl GarbageCollector for SessionGc {
    fn is_known_call(&self, call_id: &str) -> bool {
        self.state.lock().unwrap().history.contains_key(call_id)
    }

    fn register_deferred_task(&self, task: DeferredTask) {
        if self.tasks.send(task).is_err() {
            warn!("garbage collector queue closed, dropping task");
        }
    }

    fn add_membership(&self, call_id: &str, method: &str) {
        let expires_at = Instant::now() + self.call_lifetime;
        let mut state = self.state.lock().unwrap();
        if !state.history.contains_key(call_id) {
            state.calls_total += 1;
        }
        state.history.put(call_id.to_string(), Instant::now());
        state
            .membership
            .entry(call_id.to_string())
            .and_modify(|m| {
                m.state = method.to_string();
                m.sessions += 1;
                m.expires_at = expires_at;
            })
            .or_insert_with(|| Membership {
                state: method.to_string(),
                sessions: 1,
                expires_at,
            });
    }

    fn remove_membership(&self, call_id: &str, forced: bool) {
        let mut state = self.state.lock().unwrap();
        let remove = match state.membership.get_mut(call_id) {
            Some(m) if !forced && m.sessions > 1 => {
                m.sessions -= 1;
                false
            }
            Some(_) => true,
            None => return,
        };
        if remove {
            state.membership.remove(call_id);
            debug!(call_id, forced, "membership removed");
        }
    }
}
