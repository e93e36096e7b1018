//! Telemetry sink port
//!
//! Fire-and-forget: implementations must not block, and the core never
//! depends on a recorder being present (see [`NoopTelemetry`]).

use std::time::Duration;

use chrono::{DateTime, Utc};
use flagsync_domain::{FlagSyncError, StreamingEvent, SyncResource};

/// Runtime telemetry recorder
pub trait TelemetryRuntimeProducer: Send + Sync {
    fn record_streaming_event(&self, event: StreamingEvent);

    fn record_sync_latency(&self, resource: SyncResource, latency: Duration);

    fn record_successful_sync(&self, resource: SyncResource, at: DateTime<Utc>);

    fn record_sync_error(&self, resource: SyncResource, error: &FlagSyncError);

    fn record_token_refresh(&self);

    fn record_auth_rejection(&self);
}

/// Recorder that drops everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTelemetry;

impl TelemetryRuntimeProducer for NoopTelemetry {
    fn record_streaming_event(&self, _event: StreamingEvent) {}

    fn record_sync_latency(&self, _resource: SyncResource, _latency: Duration) {}

    fn record_successful_sync(&self, _resource: SyncResource, _at: DateTime<Utc>) {}

    fn record_sync_error(&self, _resource: SyncResource, _error: &FlagSyncError) {}

    fn record_token_refresh(&self) {}

    fn record_auth_rejection(&self) {}
}
