//! Typed notifications decoded from the push stream

use serde::{Deserialize, Serialize};

use crate::constants::{NON_RETRYABLE_ERROR_CODES, RETRYABLE_ERROR_CODES};

/// Control messages published on the control channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlType {
    StreamingPaused,
    StreamingResumed,
    StreamingDisabled,
}

/// Error frame pushed by the streaming server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamError {
    pub code: i64,
    pub status_code: i64,
    pub message: String,
    pub retryable: bool,
}

impl StreamError {
    pub fn new(code: i64, status_code: i64, message: impl Into<String>) -> Self {
        Self { code, status_code, message: message.into(), retryable: is_retryable_code(code) }
    }
}

/// Whether a server error code allows reconnecting with the same token.
///
/// `40140..=40149` (token expiry class) is retryable, the rest of the
/// `4xxxx` range is not, anything else is assumed transient.
pub fn is_retryable_code(code: i64) -> bool {
    if RETRYABLE_ERROR_CODES.contains(&code) {
        return true;
    }
    !NON_RETRYABLE_ERROR_CODES.contains(&code)
}

/// One decoded stream notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    SplitUpdate { change_number: i64 },
    SplitKill { change_number: i64, split_name: String, default_treatment: String },
    SegmentUpdate { change_number: i64, segment_name: String },
    Control { channel: String, control_type: ControlType },
    Occupancy { channel: String, publishers: i64 },
    Error(StreamError),
}

impl Notification {
    /// Short label used in logs and telemetry.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::SplitUpdate { .. } => "split_update",
            Self::SplitKill { .. } => "split_kill",
            Self::SegmentUpdate { .. } => "segment_update",
            Self::Control { .. } => "control",
            Self::Occupancy { .. } => "occupancy",
            Self::Error(_) => "error",
        }
    }
}
