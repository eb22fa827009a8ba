//! Coalescing wake signal for the ingestion worker.

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Single-slot wake signal: any number of `notify` calls before the worker
/// consumes them collapse into one wake.
///
/// Built on `tokio::sync::Notify::notify_one`, which stores a permit when no
/// task is waiting, so a notify that races with the start of a `wait` is
/// never lost.
pub struct ProcessingTrigger {
    signal: Notify,
}

impl ProcessingTrigger {
    pub fn new() -> Self {
        Self {
            signal: Notify::new(),
        }
    }

    /// Request a batch pass. Safe to call concurrently from many tasks.
    pub fn notify(&self) {
        self.signal.notify_one();
    }

    /// Block until notified (returns true, consuming the pending wake) or
    /// until cancellation is requested (returns false).
    pub async fn wait(&self, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = self.signal.notified() => true,
            _ = cancel.cancelled() => false,
        }
    }
}

impl Default for ProcessingTrigger {
    fn default() -> Self {
        Self::new()
    }
}
