//! Integration tests for resilience module
//!
//! Exercises the retry executor and the shared backoff counter together, the
//! way the sync layer drives them: a flaky remote that recovers, a cancelled
//! component, and reconnect scheduling.

#![cfg(feature = "runtime")]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use flagsync_common::resilience::{policies, Backoff, Jitter, RetryConfig, RetryError, RetryExecutor};
use flagsync_common::{ErrorClassification, ErrorSeverity};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
enum RemoteError {
    Unavailable,
    Rejected,
}

impl ErrorClassification for RemoteError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable)
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Unavailable => ErrorSeverity::Warning,
            Self::Rejected => ErrorSeverity::Error,
        }
    }
}

/// A remote that fails three times then recovers is reached on the fourth
/// attempt with exponential, jittered delays.
#[tokio::test(flavor = "multi_thread")]
async fn flaky_remote_recovers_within_budget() {
    let calls = Arc::new(AtomicU32::new(0));
    let config = RetryConfig::builder()
        .max_attempts(5)
        .exponential_backoff(Duration::from_millis(2), Duration::from_millis(20))
        .jitter(Jitter::Equal)
        .build()
        .unwrap();

    let counter = Arc::clone(&calls);
    let value = RetryExecutor::new(config, policies::ClassifiedRetry)
        .execute(|| {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 3 {
                    Err(RemoteError::Unavailable)
                } else {
                    Ok("payload")
                }
            }
        })
        .await
        .unwrap();

    assert_eq!(value, "payload");
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

/// Rejections are surfaced immediately, no retries burned.
#[tokio::test]
async fn rejection_is_not_retried() {
    let calls = AtomicU32::new(0);
    let err = RetryExecutor::new(RetryConfig::fixed(10, Duration::from_millis(1)), policies::ClassifiedRetry)
        .execute(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(RemoteError::Rejected) }
        })
        .await
        .unwrap_err();

    assert!(matches!(err, RetryError::NonRetryable { source: RemoteError::Rejected }));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

/// Stopping a component while it backs off ends the retry loop promptly.
#[tokio::test(flavor = "multi_thread")]
async fn cancel_during_backoff() {
    let token = CancellationToken::new();
    let executor = RetryExecutor::new(RetryConfig::fixed(100, Duration::from_secs(30)), policies::AlwaysRetry)
        .with_cancellation(token.clone());

    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        canceller.cancel();
    });

    let err = tokio::time::timeout(
        Duration::from_secs(2),
        executor.execute(|| async { Err::<(), _>(RemoteError::Unavailable) }),
    )
    .await
    .unwrap()
    .unwrap_err();
    assert!(matches!(err, RetryError::Cancelled { .. }));
}

/// Reconnect scheduling: delays grow across failures and a successful
/// connection resets them.
#[test]
fn backoff_shared_across_reconnects() {
    let backoff = Arc::new(Backoff::new(Duration::from_secs(1), Duration::from_secs(1800)));

    let scheduler = Arc::clone(&backoff);
    let delays: Vec<u64> = (0..4).map(|_| scheduler.next_delay().as_secs()).collect();
    assert_eq!(delays, vec![1, 2, 4, 8]);

    backoff.reset();
    assert_eq!(scheduler.next_delay(), Duration::from_secs(1));
}
