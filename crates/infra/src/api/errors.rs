//! API-specific error types
//!
//! Provides error classification for control-plane calls with retry
//! metadata.

use std::time::Duration;

use flagsync_common::error::{ErrorClassification, ErrorSeverity};
use flagsync_domain::FlagSyncError;
use reqwest::StatusCode;
use thiserror::Error;

/// Categories of API errors for retry logic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorCategory {
    /// Authentication errors (401, 403) - the key is rejected
    Authentication,
    /// Rate limiting errors (429) - retry with backoff
    RateLimit,
    /// Server errors (5xx) - retryable
    Server,
    /// Client errors (4xx except auth) - non-retryable
    Client,
    /// Network/connection errors - retryable
    Network,
    /// Undecodable payloads - non-retryable
    Protocol,
    /// Configuration errors - non-retryable
    Config,
}

/// API operation errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Client error: {0}")]
    Client(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    Decode(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),
}

impl ApiError {
    /// Classify a non-success HTTP status.
    pub fn from_status(status: StatusCode, url: &str, body: &str) -> Self {
        let message = if body.is_empty() {
            format!("{url} returned status {status}")
        } else {
            format!("{url} returned status {status}: {body}")
        };

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            Self::Auth(message)
        } else if status == StatusCode::TOO_MANY_REQUESTS {
            Self::RateLimit(message)
        } else if status.is_server_error() {
            Self::Server(message)
        } else if status.is_client_error() {
            Self::Client(message)
        } else {
            Self::Network(message)
        }
    }

    /// Get the error category for this error
    pub const fn category(&self) -> ApiErrorCategory {
        match self {
            Self::Auth(_) => ApiErrorCategory::Authentication,
            Self::RateLimit(_) => ApiErrorCategory::RateLimit,
            Self::Server(_) => ApiErrorCategory::Server,
            Self::Client(_) => ApiErrorCategory::Client,
            Self::Network(_) | Self::Timeout(_) => ApiErrorCategory::Network,
            Self::Decode(_) => ApiErrorCategory::Protocol,
            Self::Config(_) => ApiErrorCategory::Config,
        }
    }

    /// Check if this error should be retried by the caller's backoff loop
    pub const fn should_retry(&self) -> bool {
        matches!(
            self.category(),
            ApiErrorCategory::RateLimit | ApiErrorCategory::Server | ApiErrorCategory::Network
        )
    }

    /// Get suggested retry delay in seconds
    pub const fn retry_delay_secs(&self) -> u64 {
        match self.category() {
            ApiErrorCategory::RateLimit => 60,
            ApiErrorCategory::Server => 10,
            ApiErrorCategory::Network => 5,
            ApiErrorCategory::Authentication
            | ApiErrorCategory::Client
            | ApiErrorCategory::Protocol
            | ApiErrorCategory::Config => 0,
        }
    }
}

impl ErrorClassification for ApiError {
    fn is_retryable(&self) -> bool {
        self.should_retry()
    }

    fn severity(&self) -> ErrorSeverity {
        match self.category() {
            ApiErrorCategory::Network | ApiErrorCategory::RateLimit => ErrorSeverity::Warning,
            ApiErrorCategory::Server | ApiErrorCategory::Client | ApiErrorCategory::Protocol => {
                ErrorSeverity::Error
            }
            ApiErrorCategory::Authentication | ApiErrorCategory::Config => ErrorSeverity::Critical,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self.retry_delay_secs() {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

impl From<FlagSyncError> for ApiError {
    fn from(err: FlagSyncError) -> Self {
        match err {
            FlagSyncError::Network(message)
            | FlagSyncError::Timeout(message)
            | FlagSyncError::Cancelled(message) => Self::Network(message),
            FlagSyncError::Auth(message) => Self::Auth(message),
            FlagSyncError::Server(message) | FlagSyncError::Internal(message) => {
                Self::Server(message)
            }
            FlagSyncError::Client(message) | FlagSyncError::NotFound(message) => {
                Self::Client(message)
            }
            FlagSyncError::Protocol(message) => Self::Decode(message),
            FlagSyncError::Config(message) => Self::Config(message),
        }
    }
}

impl From<ApiError> for FlagSyncError {
    fn from(err: ApiError) -> Self {
        let message = err.to_string();
        match err {
            ApiError::Auth(_) => Self::Auth(message),
            ApiError::RateLimit(_) | ApiError::Server(_) => Self::Server(message),
            ApiError::Client(_) => Self::Client(message),
            ApiError::Network(_) => Self::Network(message),
            ApiError::Decode(_) => Self::Protocol(message),
            ApiError::Config(_) => Self::Config(message),
            ApiError::Timeout(_) => Self::Timeout(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        let url = "https://sdk.test/api/splitChanges";
        assert_eq!(
            ApiError::from_status(StatusCode::UNAUTHORIZED, url, "").category(),
            ApiErrorCategory::Authentication
        );
        assert_eq!(
            ApiError::from_status(StatusCode::TOO_MANY_REQUESTS, url, "").category(),
            ApiErrorCategory::RateLimit
        );
        assert_eq!(
            ApiError::from_status(StatusCode::BAD_GATEWAY, url, "").category(),
            ApiErrorCategory::Server
        );
        assert_eq!(
            ApiError::from_status(StatusCode::BAD_REQUEST, url, "nope").category(),
            ApiErrorCategory::Client
        );
    }

    #[test]
    fn status_message_includes_body() {
        let err = ApiError::from_status(StatusCode::BAD_REQUEST, "u", "bad since");
        assert!(err.to_string().contains("bad since"));
    }

    #[test]
    fn test_should_retry() {
        assert!(ApiError::RateLimit("test".to_string()).should_retry());
        assert!(ApiError::Server("test".to_string()).should_retry());
        assert!(ApiError::Network("test".to_string()).should_retry());
        assert!(ApiError::Timeout(Duration::from_secs(1)).should_retry());
        assert!(!ApiError::Auth("test".to_string()).should_retry());
        assert!(!ApiError::Client("test".to_string()).should_retry());
        assert!(!ApiError::Decode("test".to_string()).should_retry());
    }

    #[test]
    fn classification_exposes_retry_after() {
        assert_eq!(
            ApiError::RateLimit("slow down".into()).retry_after(),
            Some(Duration::from_secs(60))
        );
        assert_eq!(ApiError::Client("bad".into()).retry_after(), None);
        assert!(ApiError::Auth("revoked".into()).is_critical());
    }

    #[test]
    fn converts_into_domain_errors() {
        assert!(matches!(
            FlagSyncError::from(ApiError::Auth("x".into())),
            FlagSyncError::Auth(_)
        ));
        assert!(FlagSyncError::from(ApiError::RateLimit("x".into())).is_retryable());
        assert!(FlagSyncError::from(ApiError::Timeout(Duration::from_secs(1))).is_retryable());
        assert!(!FlagSyncError::from(ApiError::Decode("x".into())).is_retryable());
    }
}
