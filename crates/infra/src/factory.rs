//! Wires the adapters in this crate into a running sync subsystem

use std::sync::Arc;
use std::time::Duration;

use flagsync_core::{
    NotificationManagerKeeper, NotificationProcessor, PushManager, PushSession, PushState,
    SegmentCache, SegmentFetcher, SegmentsWorker, SplitCache, SplitFetcher, SplitsWorker,
    StreamHandler, SyncManager, SyncManagerError, SyncMode, Synchronizer, SynchronizerService,
    TelemetryRuntimeProducer,
};
use flagsync_domain::{Config, Result};
use tokio::sync::mpsc;
use tracing::{info, instrument};

use crate::api::{AuthApiClient, DefinitionsApiClient};
use crate::http::HttpClient;
use crate::streaming::SseClient;

/// A fully wired cache plus the machinery that keeps it in sync
///
/// The caches are what a flag evaluator reads; everything else stays
/// internal.
pub struct SyncSubsystem {
    splits: Arc<SplitCache>,
    segments: Arc<SegmentCache>,
    manager: Arc<SyncManager>,
    push: Option<Arc<PushManager>>,
    telemetry: Arc<dyn TelemetryRuntimeProducer>,
}

impl SyncSubsystem {
    /// Validate `config` and build every component. Nothing runs until
    /// [`start`](Self::start).
    ///
    /// # Errors
    /// `FlagSyncError::Config` for an invalid configuration or unusable
    /// URLs; HTTP client construction failures are passed through.
    #[instrument(skip_all)]
    pub fn build(config: &Config, telemetry: Arc<dyn TelemetryRuntimeProducer>) -> Result<Self> {
        config.validate()?;
        let sync = &config.sync;

        let http = Arc::new(HttpClient::from_config(&config.http)?);
        let definitions = Arc::new(DefinitionsApiClient::new(
            Arc::clone(&http),
            &config.urls.sdk,
            &config.api_key,
        )?);

        let splits = Arc::new(SplitCache::new());
        let segments = Arc::new(SegmentCache::new());

        let split_fetcher = Arc::new(SplitFetcher::new(
            definitions.clone(),
            Arc::clone(&splits),
            Arc::clone(&telemetry),
            sync.splits_refresh_rate(),
        ));
        let segment_fetcher = Arc::new(SegmentFetcher::new(
            definitions,
            Arc::clone(&segments),
            Arc::clone(&splits),
            Arc::clone(&telemetry),
            sync.segments_refresh_rate(),
            sync.segment_fetch_concurrency,
        ));
        let synchronizer: Arc<dyn Synchronizer> =
            Arc::new(SynchronizerService::new(split_fetcher, segment_fetcher, sync));

        let (status_tx, status_rx) = mpsc::unbounded_channel();

        let push = if sync.streaming_enabled {
            let auth = Arc::new(AuthApiClient::new(http, &config.urls.auth, &config.api_key)?);

            let (events_tx, events_rx) = mpsc::unbounded_channel();
            let transport = Arc::new(SseClient::new(
                HttpClient::streaming(sync.connect_timeout())?,
                events_tx,
                sync.connect_timeout(),
                sync.read_timeout(),
            ));

            let keeper =
                Arc::new(NotificationManagerKeeper::new(status_tx.clone(), Arc::clone(&telemetry)));
            let splits_worker =
                Arc::new(SplitsWorker::new(Arc::clone(&splits), Arc::clone(&synchronizer)));
            let segments_worker =
                Arc::new(SegmentsWorker::new(Arc::clone(&segments), Arc::clone(&synchronizer)));
            let processor = Arc::new(NotificationProcessor::new(
                Arc::clone(&splits_worker),
                Arc::clone(&segments_worker),
                Arc::clone(&keeper),
            ));
            let handler = Arc::new(StreamHandler::new(
                transport,
                events_rx,
                config.urls.streaming.clone(),
                processor,
                keeper,
                splits_worker,
                segments_worker,
                status_tx.clone(),
                Arc::clone(&telemetry),
            ));

            Some(PushManager::new(auth, handler, status_tx, sync, Arc::clone(&telemetry)))
        } else {
            None
        };

        let session = push.clone().map(|push| push as Arc<dyn PushSession>);
        let manager = Arc::new(SyncManager::new(
            synchronizer,
            session,
            status_rx,
            sync,
            Arc::clone(&telemetry),
        ));

        info!(streaming = sync.streaming_enabled, sdk = %config.urls.sdk, "Sync subsystem built");
        Ok(Self { splits, segments, manager, push, telemetry })
    }

    /// Start syncing; readiness is reported by [`block_until_ready`](Self::block_until_ready).
    ///
    /// # Errors
    /// `SyncManagerError::AlreadyStopped` after [`stop`](Self::stop).
    pub fn start(&self) -> std::result::Result<(), SyncManagerError> {
        self.manager.start()
    }

    pub async fn stop(&self) {
        self.manager.stop().await;
    }

    pub async fn block_until_ready(&self, timeout: Duration) -> bool {
        self.manager.block_until_ready(timeout).await
    }

    pub fn is_ready(&self) -> bool {
        self.manager.is_ready()
    }

    pub fn is_streaming(&self) -> bool {
        self.manager.is_streaming()
    }

    pub fn mode(&self) -> SyncMode {
        self.manager.mode()
    }

    /// `None` when streaming is disabled by configuration.
    pub fn push_state(&self) -> Option<PushState> {
        self.push.as_ref().map(|push| push.state())
    }

    pub const fn splits(&self) -> &Arc<SplitCache> {
        &self.splits
    }

    pub const fn segments(&self) -> &Arc<SegmentCache> {
        &self.segments
    }

    pub fn telemetry(&self) -> Arc<dyn TelemetryRuntimeProducer> {
        Arc::clone(&self.telemetry)
    }
}
