//! One-shot readiness signal

use std::time::Duration;

use tokio::sync::watch;

/// Opens once, when the first full synchronization completes
#[derive(Debug)]
pub struct ReadinessGate {
    tx: watch::Sender<bool>,
}

impl Default for ReadinessGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadinessGate {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    pub fn mark_ready(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_ready(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until ready or `timeout` elapses; returns readiness.
    pub async fn wait(&self, timeout: Duration) -> bool {
        let mut rx = self.tx.subscribe();
        // Bound so the `watch::Ref` temporary drops before `rx`.
        let ready =
            matches!(tokio::time::timeout(timeout, rx.wait_for(|ready| *ready)).await, Ok(Ok(_)));
        ready
    }
}
