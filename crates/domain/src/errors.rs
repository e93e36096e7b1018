//! Error types used throughout the sync subsystem

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for FlagSync
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum FlagSyncError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Client error: {0}")]
    Client(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl FlagSyncError {
    /// Transient failures worth another attempt after a backoff.
    ///
    /// Authentication failures are retryable too: the push session keeps
    /// re-authenticating with backoff while polling covers for it.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Server(_) | Self::Timeout(_) | Self::Auth(_))
    }
}

/// Result type alias for FlagSync operations
pub type Result<T> = std::result::Result<T, FlagSyncError>;
