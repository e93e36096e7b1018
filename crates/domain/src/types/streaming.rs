//! Stream lifecycle values exchanged between the transport, the push
//! session manager and the sync orchestrator

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::notification::Notification;

/// Lifecycle transition reported by the stream transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamAction {
    Connected,
    Disconnected,
    RetryableError,
    NonRetryableError,
}

/// Single tagged event emitted by the stream transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Data(Notification),
    Action(StreamAction),
}

/// Health signal consumed by the sync orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamingStatus {
    Connected,
    Disconnected,
    RetryableError,
    NonRetryableError,
    /// Connection open but nobody publishes (or publishing paused)
    SubsystemDown,
    /// Publishers are back after a `SubsystemDown`
    SubsystemReady,
    /// Streaming disabled server-side for the rest of the process lifetime
    SubsystemOff,
}

impl From<StreamAction> for StreamingStatus {
    fn from(action: StreamAction) -> Self {
        match action {
            StreamAction::Connected => Self::Connected,
            StreamAction::Disconnected => Self::Disconnected,
            StreamAction::RetryableError => Self::RetryableError,
            StreamAction::NonRetryableError => Self::NonRetryableError,
        }
    }
}

/// Result of `GET /v2/auth`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthResponse {
    pub push_enabled: bool,
    pub token: Option<String>,
    pub channels: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl AuthResponse {
    pub const fn disabled() -> Self {
        Self { push_enabled: false, token: None, channels: Vec::new(), expires_at: None }
    }
}
