//! Async testing utilities
//!
//! Helpers for asserting that background tasks converge: caches reaching a
//! change number, a status showing up on a channel, a counter settling.

#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;

/// Assert that an async condition becomes true within a timeout
///
/// ```no_run
/// # async fn example(cache: std::sync::Arc<std::sync::atomic::AtomicI64>) {
/// use std::sync::atomic::Ordering;
/// use std::time::Duration;
///
/// flagsync_common::assert_eventually_async!(Duration::from_secs(1), async {
///     cache.load(Ordering::SeqCst) == 42
/// });
/// # }
/// ```
#[macro_export]
macro_rules! assert_eventually_async {
    ($timeout:expr, $fut:expr) => {
        $crate::assert_eventually_async!($timeout, $fut, "condition")
    };
    ($timeout:expr, $fut:expr, $what:expr) => {{
        let limit = $timeout;
        let reached = tokio::time::timeout(limit, async {
            while !$fut.await {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(reached.is_ok(), "{} not reached within {:?}", $what, limit);
    }};
}

/// Await `fut`, failing with `Elapsed` after `duration`.
pub async fn timeout_ok<F, T>(duration: Duration, fut: F) -> Result<T, tokio::time::error::Elapsed>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, fut).await
}

/// Poll `condition` every `interval` until it holds or `timeout` elapses.
pub async fn poll_until<F, Fut>(timeout: Duration, interval: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(interval).await;
    }
}

/// Receive the next message or `None` if nothing arrives within `timeout`.
pub async fn recv_within<T>(rx: &mut mpsc::UnboundedReceiver<T>, timeout: Duration) -> Option<T> {
    tokio::time::timeout(timeout, rx.recv()).await.ok().flatten()
}

/// Drain messages until `predicate` matches one, returning it.
pub async fn recv_until<T, P>(
    rx: &mut mpsc::UnboundedReceiver<T>,
    timeout: Duration,
    mut predicate: P,
) -> Option<T>
where
    P: FnMut(&T) -> bool,
{
    tokio::time::timeout(timeout, async {
        while let Some(item) = rx.recv().await {
            if predicate(&item) {
                return Some(item);
            }
        }
        None
    })
    .await
    .ok()
    .flatten()
}
