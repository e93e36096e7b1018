//! Attempt-counting exponential backoff
//!
//! Unlike [`RetryExecutor`](super::RetryExecutor), which drives a loop, a
//! `Backoff` is a counter shared by code that schedules its own next attempt
//! (push session reconnects, the initial full sync).

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use super::retry::exponential_delay;

/// `base * 2^attempt`, capped at `max`; every call to `next_delay` advances
/// the attempt counter until `reset`.
#[derive(Debug)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    attempt: AtomicU32,
}

impl Backoff {
    pub const fn new(base: Duration, max: Duration) -> Self {
        Self { base, max, attempt: AtomicU32::new(0) }
    }

    /// Delay for the current attempt, then move to the next one.
    pub fn next_delay(&self) -> Duration {
        let attempt = self.attempt.fetch_add(1, Ordering::AcqRel);
        exponential_delay(self.base, self.max, attempt)
    }

    /// Delay the next call to `next_delay` would return.
    pub fn peek_delay(&self) -> Duration {
        exponential_delay(self.base, self.max, self.attempt())
    }

    pub fn attempt(&self) -> u32 {
        self.attempt.load(Ordering::Acquire)
    }

    pub fn reset(&self) {
        self.attempt.store(0, Ordering::Release);
    }
}
