//! Full and targeted resynchronization over the periodic fetchers

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use flagsync_common::resilience::RetryConfig;
use flagsync_domain::constants::EMPTY_CHANGE_NUMBER;
use flagsync_domain::{FetchOptions, FlagSyncError, Result, SyncConfig};
use tracing::{debug, error, info, instrument, warn};

use super::fetchers::{SegmentFetcher, SplitFetcher};
use super::ports::Synchronizer;

/// [`Synchronizer`] backed by a flag fetcher and a segment fetcher
pub struct SynchronizerService {
    splits: Arc<SplitFetcher>,
    segments: Arc<SegmentFetcher>,
    on_demand_retries: u32,
    on_demand_delay: Duration,
    randomize_refresh_rates: bool,
}

impl SynchronizerService {
    pub fn new(splits: Arc<SplitFetcher>, segments: Arc<SegmentFetcher>, config: &SyncConfig) -> Self {
        Self {
            splits,
            segments,
            on_demand_retries: config.on_demand_fetch_max_retries.max(1),
            on_demand_delay: config.on_demand_fetch_retry_delay(),
            randomize_refresh_rates: config.randomize_refresh_rates,
        }
    }

    /// Retry policy for each request made by `sync_all`.
    fn sync_all_retry(&self) -> RetryConfig {
        RetryConfig::fixed(self.on_demand_retries, self.on_demand_delay)
    }

    /// Segments referenced by new flags that were never fetched.
    async fn fetch_new_segments(&self, referenced: BTreeSet<String>) {
        let cache = self.segments.cache();
        let missing: Vec<String> = referenced
            .into_iter()
            .filter(|name| cache.change_number(name) == EMPTY_CHANGE_NUMBER)
            .collect();
        if missing.is_empty() {
            return;
        }

        debug!(count = missing.len(), "Fetching newly referenced segments");
        let retry = self.sync_all_retry();
        if !self.segments.fetch_all(missing, FetchOptions::default(), &retry).await {
            warn!("Some newly referenced segments could not be fetched");
        }
    }

    /// Repeat single-shot fetches in two phases until `reached` holds: first
    /// asking intermediaries not to serve cached copies, then also pinning the
    /// target change number.
    async fn fetch_until<F, Fut, R>(&self, target: i64, mut fetch: F, reached: R) -> bool
    where
        F: FnMut(FetchOptions) -> Fut + Send,
        Fut: std::future::Future<Output = ()> + Send,
        R: Fn() -> bool + Send + Sync,
    {
        let phases = [FetchOptions { no_cache: true, till: None }, FetchOptions::on_demand(target)];
        for options in phases {
            for attempt in 1..=self.on_demand_retries {
                fetch(options).await;
                if reached() {
                    debug!(target, attempt, cdn_bypass = options.till.is_some(), "Change number reached");
                    return true;
                }
                if attempt < self.on_demand_retries {
                    tokio::time::sleep(self.on_demand_delay).await;
                }
            }
            debug!(target, cdn_bypass = options.till.is_some(), "Change number not reached");
        }
        false
    }
}

#[async_trait]
impl Synchronizer for SynchronizerService {
    #[instrument(skip(self))]
    async fn sync_all(&self) -> bool {
        let retry = self.sync_all_retry();
        let referenced = match self.splits.fetch_with(FetchOptions::default(), &retry).await {
            Ok(referenced) => referenced,
            Err(e) => {
                error!(error = %e, "Flag synchronization failed");
                return false;
            }
        };

        let mut names = self.splits.cache().segment_names();
        names.extend(referenced);
        let segments_ok = self.segments.fetch_all(names, FetchOptions::default(), &retry).await;
        if segments_ok {
            info!(change_number = self.splits.cache().change_number(), "Full synchronization complete");
        }
        segments_ok
    }

    async fn synchronize_splits(&self, till: Option<i64>) -> Result<()> {
        let cache = Arc::clone(self.splits.cache());
        let Some(target) = till else {
            let referenced = self.splits.fetch(FetchOptions { no_cache: true, till: None }).await?;
            self.fetch_new_segments(referenced).await;
            return Ok(());
        };
        if cache.change_number() >= target {
            debug!(target, "Flags already up to date");
            return Ok(());
        }

        let single = RetryConfig::fixed(1, Duration::ZERO);
        let referenced = parking_lot::Mutex::new(BTreeSet::new());
        let reached = self
            .fetch_until(
                target,
                |options| {
                    let single = &single;
                    let referenced = &referenced;
                    async move {
                        match self.splits.fetch_with(options, single).await {
                            Ok(names) => referenced.lock().extend(names),
                            Err(e) => warn!(target, error = %e, "On-demand flag fetch failed"),
                        }
                    }
                },
                || cache.change_number() >= target,
            )
            .await;

        self.fetch_new_segments(referenced.into_inner()).await;
        if reached {
            Ok(())
        } else {
            Err(FlagSyncError::Timeout(format!("flags did not reach change number {target}")))
        }
    }

    async fn synchronize_segment(&self, name: &str, till: Option<i64>) -> Result<()> {
        let cache = Arc::clone(self.segments.cache());
        let single = RetryConfig::fixed(1, Duration::ZERO);
        let Some(target) = till else {
            let options = FetchOptions { no_cache: true, till: None };
            return self.segments.fetch_segment_with(name, options, &self.sync_all_retry()).await;
        };
        if cache.change_number(name) >= target {
            debug!(segment = name, target, "Segment already up to date");
            return Ok(());
        }

        let reached = self
            .fetch_until(
                target,
                |options| {
                    let single = &single;
                    async move {
                        if let Err(e) = self.segments.fetch_segment_with(name, options, single).await {
                            warn!(segment = name, target, error = %e, "On-demand segment fetch failed");
                        }
                    }
                },
                || cache.change_number(name) >= target,
            )
            .await;

        if reached {
            Ok(())
        } else {
            Err(FlagSyncError::Timeout(format!(
                "segment {name} did not reach change number {target}"
            )))
        }
    }

    async fn start_periodic_fetching(&self) {
        self.splits.start(self.randomize_refresh_rates);
        self.segments.start(self.randomize_refresh_rates);
    }

    async fn stop_periodic_fetching(&self) {
        self.splits.stop().await;
        self.segments.stop().await;
    }
}
