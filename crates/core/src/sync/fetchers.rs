//! Periodic definition fetchers
//!
//! Each fetcher drains its resource until caught up (`since == till`) and can
//! run on its own refresh timer. Applies always go through the caches, whose
//! change-number checks make overlapping fetches harmless.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use flagsync_common::lifecycle::{ManagedTask, TaskError};
use flagsync_common::resilience::policies::PredicateRetry;
use flagsync_common::resilience::{RetryConfig, RetryError, RetryExecutor};
use flagsync_domain::constants::MIN_REFRESH_RATE_SECS;
use flagsync_domain::{FetchOptions, FlagSyncError, Result, SyncResource};
use futures::stream::{self, StreamExt};
use rand::Rng;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use super::ports::{SegmentChangeFetcher, SplitChangeFetcher};
use crate::cache::{SegmentCache, SplitCache};
use crate::telemetry::TelemetryRuntimeProducer;

/// Refresh period actually used by a fetcher.
///
/// With randomization the period is drawn from `[rate / 2, rate]` and never
/// drops below the minimum refresh rate.
pub fn effective_rate(rate: Duration, randomize: bool) -> Duration {
    if !randomize {
        return rate.max(Duration::from_millis(1));
    }
    let max = u64::try_from(rate.as_millis()).unwrap_or(u64::MAX);
    let min = max / 2;
    let picked = if max > min { rand::thread_rng().gen_range(min..=max) } else { max };
    Duration::from_millis(picked).max(Duration::from_secs(MIN_REFRESH_RATE_SECS))
}

pub(crate) fn flatten_retry_error(error: RetryError<FlagSyncError>) -> FlagSyncError {
    match error {
        RetryError::AttemptsExhausted { source, .. } | RetryError::NonRetryable { source } => source,
        RetryError::Cancelled { attempts } => {
            FlagSyncError::Cancelled(format!("cancelled after {attempts} attempts"))
        }
        RetryError::TimeoutExceeded { elapsed } => {
            FlagSyncError::Timeout(format!("retry budget exhausted after {elapsed:?}"))
        }
        RetryError::InvalidConfiguration { message } => FlagSyncError::Config(message),
    }
}

fn executor(
    retry: &RetryConfig,
) -> RetryExecutor<PredicateRetry<impl Fn(&FlagSyncError, u32) -> bool + Send + Sync>> {
    RetryExecutor::new(
        retry.clone(),
        PredicateRetry::new(|error: &FlagSyncError, _attempt: u32| error.is_retryable()),
    )
}

/// Keeps the flag cache in step with the definitions API
pub struct SplitFetcher {
    api: Arc<dyn SplitChangeFetcher>,
    cache: Arc<SplitCache>,
    telemetry: Arc<dyn TelemetryRuntimeProducer>,
    retry: RetryConfig,
    refresh_rate: Duration,
    task: ManagedTask,
}

impl SplitFetcher {
    pub fn new(
        api: Arc<dyn SplitChangeFetcher>,
        cache: Arc<SplitCache>,
        telemetry: Arc<dyn TelemetryRuntimeProducer>,
        refresh_rate: Duration,
    ) -> Self {
        Self {
            api,
            cache,
            telemetry,
            retry: RetryConfig::default(),
            refresh_rate,
            task: ManagedTask::new("split-fetcher"),
        }
    }

    /// Retry policy for each request of a periodic fetch.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub const fn cache(&self) -> &Arc<SplitCache> {
        &self.cache
    }

    pub async fn fetch(&self, options: FetchOptions) -> Result<BTreeSet<String>> {
        self.fetch_with(options, &self.retry).await
    }

    /// Fetch and apply flag changes until the server reports nothing newer.
    ///
    /// Returns the segments referenced by the active flags received.
    pub async fn fetch_with(
        &self,
        options: FetchOptions,
        retry: &RetryConfig,
    ) -> Result<BTreeSet<String>> {
        let executor = executor(retry);
        let mut referenced = BTreeSet::new();

        loop {
            let since = self.cache.change_number();
            let started = Instant::now();
            let result = executor
                .execute(|| self.api.fetch_split_changes(since, options))
                .await
                .map_err(flatten_retry_error);
            self.telemetry.record_sync_latency(SyncResource::Splits, started.elapsed());

            let changes = match result {
                Ok(changes) => changes,
                Err(e) => {
                    self.telemetry.record_sync_error(SyncResource::Splits, &e);
                    return Err(e);
                }
            };

            let till = changes.till;
            referenced.extend(
                changes
                    .splits
                    .iter()
                    .filter(|split| !split.is_archived())
                    .flat_map(|split| split.segment_names()),
            );
            let summary = self.cache.apply_changes(changes);
            if summary.changed() {
                debug!(since, till, upserted = summary.upserted, removed = summary.removed, "Flags updated");
            }
            self.telemetry.record_successful_sync(SyncResource::Splits, Utc::now());

            if till <= since {
                return Ok(referenced);
            }
        }
    }

    /// Fetch now and then on every refresh tick until stopped.
    #[instrument(skip(self))]
    pub fn start(self: &Arc<Self>, randomize: bool) {
        let fetcher = Arc::clone(self);
        let period = effective_rate(self.refresh_rate, randomize);

        match self.task.spawn(move |cancel| async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    result = fetcher.fetch(FetchOptions::default()) => {
                        if let Err(e) = result {
                            warn!(error = %e, "Periodic flag fetch failed");
                        }
                    }
                }
            }
        }) {
            Ok(()) => info!(?period, "Periodic flag fetching started"),
            Err(TaskError::AlreadyRunning { .. }) => debug!("Periodic flag fetching already running"),
            Err(e) => error!(error = %e, "Failed to start periodic flag fetching"),
        }
    }

    pub async fn stop(&self) {
        self.task.stop_quietly().await;
    }

    pub fn is_running(&self) -> bool {
        self.task.is_running()
    }
}

/// Keeps segment memberships in step with the definitions API
pub struct SegmentFetcher {
    api: Arc<dyn SegmentChangeFetcher>,
    cache: Arc<SegmentCache>,
    splits: Arc<SplitCache>,
    telemetry: Arc<dyn TelemetryRuntimeProducer>,
    retry: RetryConfig,
    concurrency: usize,
    refresh_rate: Duration,
    task: ManagedTask,
}

impl SegmentFetcher {
    pub fn new(
        api: Arc<dyn SegmentChangeFetcher>,
        cache: Arc<SegmentCache>,
        splits: Arc<SplitCache>,
        telemetry: Arc<dyn TelemetryRuntimeProducer>,
        refresh_rate: Duration,
        concurrency: usize,
    ) -> Self {
        Self {
            api,
            cache,
            splits,
            telemetry,
            retry: RetryConfig::default(),
            concurrency: concurrency.max(1),
            refresh_rate,
            task: ManagedTask::new("segment-fetcher"),
        }
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub const fn cache(&self) -> &Arc<SegmentCache> {
        &self.cache
    }

    /// Fetch and apply one segment's deltas until caught up.
    pub async fn fetch_segment_with(
        &self,
        name: &str,
        options: FetchOptions,
        retry: &RetryConfig,
    ) -> Result<()> {
        let executor = executor(retry);

        loop {
            let since = self.cache.change_number(name);
            let started = Instant::now();
            let result = executor
                .execute(|| self.api.fetch_segment_changes(name, since, options))
                .await
                .map_err(flatten_retry_error);
            self.telemetry.record_sync_latency(SyncResource::Segments, started.elapsed());

            let change = match result {
                Ok(change) => change,
                Err(e) => {
                    self.telemetry.record_sync_error(SyncResource::Segments, &e);
                    return Err(e);
                }
            };

            if self.cache.apply_change(&change) {
                debug!(
                    segment = name,
                    since,
                    till = change.till,
                    added = change.added.len(),
                    removed = change.removed.len(),
                    "Segment updated"
                );
            }
            self.telemetry.record_successful_sync(SyncResource::Segments, Utc::now());

            if change.is_caught_up() || change.till <= since {
                return Ok(());
            }
        }
    }

    /// Fetch many segments with at most `concurrency` requests in flight.
    ///
    /// Returns `true` only if every segment fetched successfully.
    pub async fn fetch_all<I>(&self, names: I, options: FetchOptions, retry: &RetryConfig) -> bool
    where
        I: IntoIterator<Item = String>,
    {
        let results: Vec<(String, Result<()>)> = stream::iter(names)
            .map(|name| async move {
                let result = self.fetch_segment_with(&name, options, retry).await;
                (name, result)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut all_ok = true;
        for (name, result) in results {
            if let Err(e) = result {
                warn!(segment = %name, error = %e, "Segment fetch failed");
                all_ok = false;
            }
        }
        all_ok
    }

    /// Every segment a live flag references, plus any already cached.
    pub fn tracked_segments(&self) -> BTreeSet<String> {
        let mut names = self.splits.segment_names();
        names.extend(self.cache.segment_names());
        names
    }

    #[instrument(skip(self))]
    pub fn start(self: &Arc<Self>, randomize: bool) {
        let fetcher = Arc::clone(self);
        let period = effective_rate(self.refresh_rate, randomize);

        match self.task.spawn(move |cancel| async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let names = fetcher.tracked_segments();
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    all_ok = fetcher.fetch_all(names, FetchOptions::default(), &fetcher.retry) => {
                        if !all_ok {
                            warn!("Periodic segment fetch incomplete");
                        }
                    }
                }
            }
        }) {
            Ok(()) => info!(?period, "Periodic segment fetching started"),
            Err(TaskError::AlreadyRunning { .. }) => {
                debug!("Periodic segment fetching already running");
            }
            Err(e) => error!(error = %e, "Failed to start periodic segment fetching"),
        }
    }

    pub async fn stop(&self) {
        self.task.stop_quietly().await;
    }

    pub fn is_running(&self) -> bool {
        self.task.is_running()
    }
}
