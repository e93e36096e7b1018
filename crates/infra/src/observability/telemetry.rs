//! In-process runtime telemetry recorder
//!
//! Tracks sync latencies, successes, errors and the most recent streaming
//! lifecycle events so an embedding process can export them on its own
//! schedule.
//!
//! ## Design
//! - **Atomic counters** for every scalar, no locking on the hot path
//! - **Ring buffer** (`VecDeque`) for streaming events, oldest evicted first
//! - **Microsecond storage** for latencies, reporting helpers convert to ms

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use flagsync_core::TelemetryRuntimeProducer;
use flagsync_domain::constants::STREAMING_EVENTS_CAPACITY;
use flagsync_domain::{FlagSyncError, StreamingEvent, SyncResource};
use parking_lot::Mutex;
use tracing::trace;

/// Counters for one [`SyncResource`]
#[derive(Debug, Default)]
struct ResourceMetrics {
    total_latency_micros: AtomicU64,
    last_latency_micros: AtomicU64,
    latency_count: AtomicU64,
    successes: AtomicU64,
    /// Unix millis of the last success, 0 when none
    last_success_millis: AtomicI64,
    errors: AtomicU64,
}

impl ResourceMetrics {
    fn record_latency(&self, latency: Duration) {
        let micros = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        // SeqCst for consistency with the average in snapshot()
        self.total_latency_micros.fetch_add(micros, Ordering::SeqCst);
        self.latency_count.fetch_add(1, Ordering::SeqCst);
        self.last_latency_micros.store(micros, Ordering::Relaxed);
    }

    fn snapshot(&self) -> ResourceSnapshot {
        let total = self.total_latency_micros.load(Ordering::SeqCst);
        let count = self.latency_count.load(Ordering::SeqCst);
        #[allow(clippy::cast_precision_loss)]
        let avg_latency_ms = if count == 0 { 0.0 } else { (total as f64 / count as f64) / 1_000.0 };

        let last_success = match self.last_success_millis.load(Ordering::Acquire) {
            0 => None,
            millis => DateTime::from_timestamp_millis(millis),
        };

        ResourceSnapshot {
            avg_latency_ms,
            last_latency_ms: self.last_latency_micros.load(Ordering::Relaxed) / 1_000,
            latency_count: count,
            successes: self.successes.load(Ordering::Relaxed),
            last_success,
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of one resource's counters
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceSnapshot {
    pub avg_latency_ms: f64,
    pub last_latency_ms: u64,
    pub latency_count: u64,
    pub successes: u64,
    pub last_success: Option<DateTime<Utc>>,
    pub errors: u64,
}

/// Point-in-time view of everything recorded so far
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetrySnapshot {
    pub splits: ResourceSnapshot,
    pub segments: ResourceSnapshot,
    pub token: ResourceSnapshot,
    pub token_refreshes: u64,
    pub auth_rejections: u64,
    pub streaming_events: Vec<StreamingEvent>,
}

/// Lock-light [`TelemetryRuntimeProducer`]
#[derive(Debug)]
pub struct RuntimeTelemetry {
    splits: ResourceMetrics,
    segments: ResourceMetrics,
    token: ResourceMetrics,
    token_refreshes: AtomicU64,
    auth_rejections: AtomicU64,
    streaming_events: Mutex<VecDeque<StreamingEvent>>,
    capacity: usize,
}

impl Default for RuntimeTelemetry {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeTelemetry {
    pub fn new() -> Self {
        Self::with_capacity(STREAMING_EVENTS_CAPACITY)
    }

    /// Keep at most `capacity` streaming events (at least one).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            splits: ResourceMetrics::default(),
            segments: ResourceMetrics::default(),
            token: ResourceMetrics::default(),
            token_refreshes: AtomicU64::new(0),
            auth_rejections: AtomicU64::new(0),
            streaming_events: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    const fn resource(&self, resource: SyncResource) -> &ResourceMetrics {
        match resource {
            SyncResource::Splits => &self.splits,
            SyncResource::Segments => &self.segments,
            SyncResource::Token => &self.token,
        }
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            splits: self.splits.snapshot(),
            segments: self.segments.snapshot(),
            token: self.token.snapshot(),
            token_refreshes: self.token_refreshes.load(Ordering::Relaxed),
            auth_rejections: self.auth_rejections.load(Ordering::Relaxed),
            streaming_events: self.streaming_events.lock().iter().cloned().collect(),
        }
    }

    /// Take the buffered streaming events, oldest first.
    pub fn pop_streaming_events(&self) -> Vec<StreamingEvent> {
        self.streaming_events.lock().drain(..).collect()
    }
}

impl TelemetryRuntimeProducer for RuntimeTelemetry {
    fn record_streaming_event(&self, event: StreamingEvent) {
        trace!(kind = ?event.kind, data = event.data, "streaming event");
        let mut events = self.streaming_events.lock();
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }

    fn record_sync_latency(&self, resource: SyncResource, latency: Duration) {
        self.resource(resource).record_latency(latency);
    }

    fn record_successful_sync(&self, resource: SyncResource, at: DateTime<Utc>) {
        let metrics = self.resource(resource);
        metrics.successes.fetch_add(1, Ordering::Relaxed);
        metrics.last_success_millis.store(at.timestamp_millis(), Ordering::Release);
    }

    fn record_sync_error(&self, resource: SyncResource, error: &FlagSyncError) {
        trace!(?resource, %error, "sync error");
        self.resource(resource).errors.fetch_add(1, Ordering::Relaxed);
    }

    fn record_token_refresh(&self) {
        self.token_refreshes.fetch_add(1, Ordering::Relaxed);
    }

    fn record_auth_rejection(&self) {
        self.auth_rejections.fetch_add(1, Ordering::Relaxed);
    }
}
