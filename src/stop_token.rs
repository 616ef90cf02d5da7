//! Shared stop-token pattern for background workers (spec.md §9): an
//! `Arc<AtomicBool>` flag paired with an `Arc<Notify>`, so a long-running
//! task can be told to stop without polling on a timer and a waiter can
//! wake as soon as it happens.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

#[derive(Clone)]
pub struct StopToken {
    stop: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl Default for StopToken {
    fn default() -> Self {
        Self::new()
    }
}

impl StopToken {
    pub fn new() -> Self {
        Self { stop: Arc::new(AtomicBool::new(false)), notify: Arc::new(Notify::new()) }
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Requests a stop and wakes anyone waiting on [`Self::notified`].
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub async fn notified(&self) {
        self.notify.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_unstopped() {
        assert!(!StopToken::new().is_stopped());
    }

    #[test]
    fn stop_is_observed() {
        let token = StopToken::new();
        token.stop();
        assert!(token.is_stopped());
    }
}
