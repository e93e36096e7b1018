//! Port interfaces for sync operations

use async_trait::async_trait;
use flagsync_domain::{FetchOptions, Result, SegmentChange, SplitChanges};

/// Definitions API: flag change sets
#[async_trait]
pub trait SplitChangeFetcher: Send + Sync {
    /// Changes after `since` (`-1` for everything). Transport failures must
    /// surface as errors, never as an empty change set.
    async fn fetch_split_changes(&self, since: i64, options: FetchOptions) -> Result<SplitChanges>;
}

/// Definitions API: segment membership deltas
#[async_trait]
pub trait SegmentChangeFetcher: Send + Sync {
    async fn fetch_segment_changes(
        &self,
        name: &str,
        since: i64,
        options: FetchOptions,
    ) -> Result<SegmentChange>;
}

/// Entry point for full and targeted resyncs
///
/// Implemented by [`SynchronizerService`](super::SynchronizerService); the
/// stream workers and the sync manager only see this trait.
#[async_trait]
pub trait Synchronizer: Send + Sync {
    /// Fetch all flags, then every referenced segment. `false` means the
    /// cache is not (yet) known to be complete.
    async fn sync_all(&self) -> bool;

    /// Bring flags up to at least `till` (or just refresh when `None`).
    async fn synchronize_splits(&self, till: Option<i64>) -> Result<()>;

    /// Bring one segment up to at least `till`.
    async fn synchronize_segment(&self, name: &str, till: Option<i64>) -> Result<()>;

    async fn start_periodic_fetching(&self);

    async fn stop_periodic_fetching(&self);
}

/// Why a push session is being re-established
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectKind {
    Retryable,
    NonRetryable,
}

/// Control surface of the push session the sync manager drives
#[async_trait]
pub trait PushSession: Send + Sync {
    /// Authenticate and connect. Failures are reported as streaming
    /// statuses, never returned.
    async fn start(&self);

    /// Terminal stop: tears the session down, cancels pending reconnects and
    /// resets the backoff.
    async fn stop(&self);

    /// Tear down the current connection, keeping the backoff state.
    async fn stop_session(&self);

    /// Schedule a new `start` after the backoff delay for `kind`.
    fn schedule_reconnect(&self, kind: ReconnectKind);

    async fn start_workers(&self);

    async fn stop_workers(&self);
}
