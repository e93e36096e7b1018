//! Shared fakes for `flagsync-core` integration tests.
//!
//! In-memory definitions and auth APIs plus a stream client whose behaviour is
//! switched at runtime, so whole sync flows run without a network.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use flagsync_core::{
    AuthApi, EventSourceClient, NoopTelemetry, NotificationManagerKeeper, NotificationProcessor,
    PushManager, PushSession, SegmentCache, SegmentChangeFetcher, SegmentFetcher, SegmentsWorker,
    SplitCache, SplitChangeFetcher, SplitFetcher, SplitsWorker, StreamHandler, SyncManager,
    Synchronizer, SynchronizerService,
};
use flagsync_domain::{
    AuthResponse, FetchOptions, Result, SegmentChange, Split, SplitChanges, StreamAction,
    StreamEvent, SyncConfig,
};
use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Definitions server holding one version per flag
#[derive(Default)]
pub struct InMemoryDefinitions {
    splits: Mutex<BTreeMap<String, Split>>,
    pub split_requests: AtomicUsize,
}

impl InMemoryDefinitions {
    pub fn publish(&self, split: Split) {
        self.splits.lock().insert(split.name.clone(), split);
    }
}

#[async_trait]
impl SplitChangeFetcher for InMemoryDefinitions {
    async fn fetch_split_changes(&self, since: i64, _options: FetchOptions) -> Result<SplitChanges> {
        self.split_requests.fetch_add(1, Ordering::SeqCst);
        let splits = self.splits.lock();
        let changed: Vec<Split> =
            splits.values().filter(|split| split.change_number > since).cloned().collect();
        let till = changed.iter().map(|split| split.change_number).max().unwrap_or(since);
        Ok(SplitChanges { splits: changed, since, till })
    }
}

#[async_trait]
impl SegmentChangeFetcher for InMemoryDefinitions {
    async fn fetch_segment_changes(
        &self,
        name: &str,
        since: i64,
        _options: FetchOptions,
    ) -> Result<SegmentChange> {
        Ok(SegmentChange { name: name.to_string(), since, till: since.max(1), ..Default::default() })
    }
}

pub struct StaticAuth;

#[async_trait]
impl AuthApi for StaticAuth {
    async fn authenticate(&self) -> Result<AuthResponse> {
        Ok(AuthResponse {
            push_enabled: true,
            token: Some("jwt".to_string()),
            channels: vec!["abc_splits".to_string()],
            expires_at: Some(Utc::now() + chrono::Duration::hours(1)),
        })
    }
}

/// Stream client that either refuses every connect or plays `on_connect`
pub struct SwitchableClient {
    events: mpsc::UnboundedSender<StreamEvent>,
    pub accept: AtomicBool,
    pub on_connect: Mutex<Vec<StreamEvent>>,
    connected: AtomicBool,
    pub connects: AtomicUsize,
}

impl SwitchableClient {
    /// Deliver `event` as if the server had pushed it.
    pub fn push(&self, event: StreamEvent) {
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl EventSourceClient for SwitchableClient {
    async fn connect(&self, _url: &str) -> bool {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if !self.accept.load(Ordering::SeqCst) {
            let _ = self.events.send(StreamEvent::Action(StreamAction::RetryableError));
            return false;
        }
        self.connected.store(true, Ordering::SeqCst);
        let _ = self.events.send(StreamEvent::Action(StreamAction::Connected));
        for event in self.on_connect.lock().drain(..) {
            let _ = self.events.send(event);
        }
        true
    }

    async fn disconnect(&self, action: StreamAction) {
        if self.connected.swap(false, Ordering::SeqCst) {
            let _ = self.events.send(StreamEvent::Action(action));
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

pub struct Subsystem {
    pub manager: Arc<SyncManager>,
    pub server: Arc<InMemoryDefinitions>,
    pub client: Arc<SwitchableClient>,
    pub splits: Arc<SplitCache>,
    pub split_fetcher: Arc<SplitFetcher>,
}

pub fn fast_config() -> SyncConfig {
    SyncConfig {
        on_demand_fetch_max_retries: 3,
        on_demand_fetch_retry_delay_ms: 1,
        streaming_reconnect_backoff_base_ms: 5,
        auth_retry_backoff_base_ms: 5,
        push_max_backoff_ms: 20,
        non_retryable_backoff_floor_ms: 20,
        sync_all_backoff_base_ms: 5,
        sync_all_max_backoff_ms: 20,
        ..SyncConfig::default()
    }
}

/// Wire the whole core the way the infra factory does, around fakes.
pub fn subsystem(accept_stream: bool, refresh_rate: Duration) -> Subsystem {
    let config = fast_config();
    let telemetry = Arc::new(NoopTelemetry);
    let server = Arc::new(InMemoryDefinitions::default());
    let splits = Arc::new(SplitCache::new());
    let segments = Arc::new(SegmentCache::new());

    let split_fetcher = Arc::new(SplitFetcher::new(
        server.clone(),
        Arc::clone(&splits),
        telemetry.clone(),
        refresh_rate,
    ));
    let segment_fetcher = Arc::new(SegmentFetcher::new(
        server.clone(),
        Arc::clone(&segments),
        Arc::clone(&splits),
        telemetry.clone(),
        refresh_rate,
        4,
    ));
    let synchronizer: Arc<dyn Synchronizer> = Arc::new(SynchronizerService::new(
        Arc::clone(&split_fetcher),
        segment_fetcher,
        &config,
    ));

    let (status_tx, status_rx) = mpsc::unbounded_channel();
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let client = Arc::new(SwitchableClient {
        events: events_tx,
        accept: AtomicBool::new(accept_stream),
        on_connect: Mutex::new(Vec::new()),
        connected: AtomicBool::new(false),
        connects: AtomicUsize::new(0),
    });

    let keeper = Arc::new(NotificationManagerKeeper::new(status_tx.clone(), telemetry.clone()));
    let splits_worker = Arc::new(SplitsWorker::new(Arc::clone(&splits), Arc::clone(&synchronizer)));
    let segments_worker = Arc::new(SegmentsWorker::new(segments, Arc::clone(&synchronizer)));
    let processor = Arc::new(NotificationProcessor::new(
        Arc::clone(&splits_worker),
        Arc::clone(&segments_worker),
        Arc::clone(&keeper),
    ));
    let handler = Arc::new(StreamHandler::new(
        client.clone(),
        events_rx,
        "https://streaming.example/sse",
        processor,
        keeper,
        splits_worker,
        segments_worker,
        status_tx.clone(),
        telemetry.clone(),
    ));
    let push: Arc<dyn PushSession> =
        PushManager::new(Arc::new(StaticAuth), handler, status_tx, &config, telemetry.clone());
    let manager = Arc::new(SyncManager::new(synchronizer, Some(push), status_rx, &config, telemetry));

    Subsystem { manager, server, client, splits, split_fetcher }
}
