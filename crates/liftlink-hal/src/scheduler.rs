//! Fixed-duration waits.
//!
//! Every hold in a relay pulse and every wait in a transit goes through a
//! [`Scheduler`], so tests can replace wall-clock time:
//!
//! | Scheduler | Behaviour |
//! |---|---|
//! | [`TokioScheduler`] | real `tokio::time::sleep` |
//! | [`RecordingScheduler`] | returns at once, logs the requested duration |
//! | [`ManualScheduler`] | parks each wait until the test releases it |

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

#[async_trait]
pub trait Scheduler: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioScheduler;

#[async_trait]
impl Scheduler for TokioScheduler {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Logs every requested wait and returns immediately.
#[derive(Debug, Clone, Default)]
pub struct RecordingScheduler {
    waits: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requested waits, in order.
    pub fn waits(&self) -> Vec<Duration> {
        self.waits.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn total(&self) -> Duration {
        self.waits().into_iter().sum()
    }
}

#[async_trait]
impl Scheduler for RecordingScheduler {
    async fn sleep(&self, duration: Duration) {
        self.waits
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(duration);
        tokio::task::yield_now().await;
    }
}

/// One parked wait handed out by [`ManualClock::next_wait`].
pub struct PendingWait {
    pub duration: Duration,
    release: oneshot::Sender<()>,
}

impl PendingWait {
    /// Let the waiting task continue.
    pub fn release(self) {
        let _ = self.release.send(());
    }
}

/// Scheduler whose waits only finish when released by the paired
/// [`ManualClock`].
#[derive(Debug, Clone)]
pub struct ManualScheduler {
    parked: mpsc::UnboundedSender<PendingWait>,
}

/// Test-side handle of a [`ManualScheduler`].
pub struct ManualClock {
    parked: mpsc::UnboundedReceiver<PendingWait>,
}

impl ManualScheduler {
    pub fn new() -> (Self, ManualClock) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { parked: tx }, ManualClock { parked: rx })
    }
}

#[async_trait]
impl Scheduler for ManualScheduler {
    async fn sleep(&self, duration: Duration) {
        let (release, released) = oneshot::channel();
        if self.parked.send(PendingWait { duration, release }).is_err() {
            // Clock dropped: nobody can release us, so don't wait at all.
            return;
        }
        let _ = released.await;
    }
}

impl ManualClock {
    /// The next wait some task is parked on, or `None` after `timeout`.
    pub async fn next_wait(&mut self, timeout: Duration) -> Option<PendingWait> {
        tokio::time::timeout(timeout, self.parked.recv())
            .await
            .ok()
            .flatten()
    }
}

impl std::fmt::Debug for PendingWait {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingWait")
            .field("duration", &self.duration)
            .finish()
    }
}
