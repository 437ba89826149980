use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

/// Cooperative stop signal handed to a worker at construction.
///
/// Cancelling also wakes any thread parked in [`CancellationToken::sleep`],
/// so a stop request does not have to wait out the inter-frame pause.
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

struct Inner {
    cancelled: AtomicBool,
    // Dropping the only sender disconnects `wake_rx` and wakes every sleeper.
    wake_tx: Mutex<Option<Sender<()>>>,
    wake_rx: Receiver<()>,
}

impl CancellationToken {
    pub fn new() -> Self {
        let (wake_tx, wake_rx) = crossbeam_channel::bounded(0);
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                wake_tx: Mutex::new(Some(wake_tx)),
                wake_rx,
            }),
        }
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner
            .wake_tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Sleeps for `duration` unless cancelled first.
    ///
    /// Returns `true` if the full interval elapsed without cancellation.
    pub fn sleep(&self, duration: Duration) -> bool {
        if self.is_cancelled() {
            return false;
        }
        match self.inner.wake_rx.recv_timeout(duration) {
            Err(RecvTimeoutError::Timeout) => !self.is_cancelled(),
            Ok(()) | Err(RecvTimeoutError::Disconnected) => false,
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_new_token_is_not_cancelled() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_cancel_is_visible_to_clones() {
        let token = CancellationToken::new();
        let clone = token.clone();
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_cancel_twice_is_harmless() {
        let token = CancellationToken::new();
        token.cancel();
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_sleep_runs_full_interval_when_not_cancelled() {
        let token = CancellationToken::new();
        let start = Instant::now();
        assert!(token.sleep(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_sleep_returns_immediately_when_already_cancelled() {
        let token = CancellationToken::new();
        token.cancel();
        let start = Instant::now();
        assert!(!token.sleep(Duration::from_secs(5)));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_cancel_interrupts_sleep() {
        let token = CancellationToken::new();
        let sleeper = token.clone();
        let handle = thread::spawn(move || {
            let start = Instant::now();
            let completed = sleeper.sleep(Duration::from_secs(10));
            (completed, start.elapsed())
        });
        thread::sleep(Duration::from_millis(20));
        token.cancel();
        let (completed, elapsed) = handle.join().unwrap();
        assert!(!completed);
        assert!(elapsed < Duration::from_secs(5));
    }
}
