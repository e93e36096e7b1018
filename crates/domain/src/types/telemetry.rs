//! Telemetry vocabulary shared by the recorder port and its adapters

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kinds of streaming lifecycle events worth recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamingEventKind {
    ConnectionEstablished,
    OccupancyPri,
    OccupancySec,
    StreamingStatus,
    SseConnectionError,
    TokenRefresh,
    AblyError,
    SyncModeUpdate,
}

/// A timestamped streaming event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamingEvent {
    pub kind: StreamingEventKind,
    pub data: i64,
    pub timestamp: DateTime<Utc>,
}

impl StreamingEvent {
    pub fn now(kind: StreamingEventKind, data: i64) -> Self {
        Self { kind, data, timestamp: Utc::now() }
    }
}

/// Resource a sync latency or error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncResource {
    Splits,
    Segments,
    Token,
}

/// Values recorded with `SyncModeUpdate`
pub mod sync_mode {
    pub const STREAMING: i64 = 0;
    pub const POLLING: i64 = 1;
}
