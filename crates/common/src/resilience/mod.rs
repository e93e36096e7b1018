//! Resilience patterns for transient failures
//!
//! - **Retry**: [`RetryExecutor`] with pluggable [`RetryPolicy`], fixed or
//!   exponential backoff, optional jitter and cancellation.
//! - **Backoff**: [`Backoff`], an attempt counter for components that
//!   schedule their own next attempt.

pub mod backoff;
pub mod retry;

pub use backoff::Backoff;
// Re-export retry types
pub use retry::{
    policies, BackoffStrategy, Jitter, RetryConfig, RetryConfigBuilder, RetryDecision, RetryError,
    RetryExecutor, RetryOutcome, RetryPolicy, RetryResult,
};
