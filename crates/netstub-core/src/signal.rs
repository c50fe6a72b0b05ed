//! Request cancellation
//!
//! `AbortController` owns the right to cancel; `AbortSignal` is the
//! clone-able view handed to a request.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

#[derive(Debug, Default)]
struct AbortState {
    aborted: AtomicBool,
    notify: Notify,
}

/// Cancels every request holding one of its signals
#[derive(Debug, Clone, Default)]
pub struct AbortController {
    state: Arc<AbortState>,
}

impl AbortController {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn signal(&self) -> AbortSignal {
        AbortSignal {
            state: Arc::clone(&self.state),
        }
    }

    /// Request cancellation; returns false if already aborted
    pub fn abort(&self) -> bool {
        let first = !self.state.aborted.swap(true, Ordering::SeqCst);
        if first {
            self.state.notify.notify_waiters();
        }
        first
    }

    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.state.aborted.load(Ordering::SeqCst)
    }
}

/// Observes an `AbortController`
#[derive(Debug, Clone)]
pub struct AbortSignal {
    state: Arc<AbortState>,
}

impl AbortSignal {
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.state.aborted.load(Ordering::SeqCst)
    }

    /// Completes once the controller aborts, immediately if it already has
    pub async fn aborted(&self) {
        loop {
            let notified = self.state.notify.notified();
            if self.is_aborted() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_abort_wakes_waiters() {
        let controller = AbortController::new();
        let signal = controller.signal();
        let waiter = tokio::spawn(async move { signal.aborted().await });

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(controller.abort());
        assert!(!controller.abort());

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_already_aborted_completes_immediately() {
        let controller = AbortController::new();
        controller.abort();
        let signal = controller.signal();
        assert!(signal.is_aborted());
        tokio::time::timeout(Duration::from_millis(10), signal.aborted())
            .await
            .unwrap();
    }
}
