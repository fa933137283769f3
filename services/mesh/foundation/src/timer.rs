//! One-shot timers behind a scheduler abstraction.
//!
//! State machines arm timers through a [`Scheduler`] and receive the
//! [`TimerHandle`] back when the timer expires. A handle that no longer
//! matches the owner's armed timer is stale and must be ignored.

use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

/// Identifies one armed timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

impl TimerHandle {
    /// Create a handle from a raw id
    pub fn from_raw(id: u64) -> Self {
        Self(id)
    }

    /// Raw id of the handle
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Arms and cancels one-shot timers
pub trait Scheduler: Send {
    /// Arm a timer that expires after `delay`
    fn arm(&mut self, delay: Duration) -> TimerHandle;

    /// Cancel an armed timer. Unknown or expired handles are ignored.
    fn cancel(&mut self, handle: TimerHandle);
}

/// Scheduler backed by tokio sleep tasks.
///
/// Each armed timer is a task that sleeps and then posts its handle on the
/// expiry channel returned by [`TokioScheduler::new`].
pub struct TokioScheduler {
    next_id: u64,
    expired_tx: mpsc::UnboundedSender<TimerHandle>,
    tasks: HashMap<TimerHandle, JoinHandle<()>>,
}

impl TokioScheduler {
    /// Create a scheduler and the channel its timers expire into
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TimerHandle>) {
        let (expired_tx, expired_rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            next_id: 0,
            expired_tx,
            tasks: HashMap::new(),
        };
        (scheduler, expired_rx)
    }

    /// Number of timers not yet expired or cancelled
    pub fn armed(&self) -> usize {
        self.tasks.values().filter(|task| !task.is_finished()).count()
    }
}

impl Scheduler for TokioScheduler {
    fn arm(&mut self, delay: Duration) -> TimerHandle {
        self.tasks.retain(|_, task| !task.is_finished());

        self.next_id += 1;
        let handle = TimerHandle(self.next_id);
        let tx = self.expired_tx.clone();

        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(handle);
        });
        self.tasks.insert(handle, task);

        trace!("Armed timer {} for {:?}", handle.0, delay);
        handle
    }

    fn cancel(&mut self, handle: TimerHandle) {
        if let Some(task) = self.tasks.remove(&handle) {
            task.abort();
            trace!("Cancelled timer {}", handle.0);
        }
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        for (_, task) in self.tasks.drain() {
            task.abort();
        }
    }
}
