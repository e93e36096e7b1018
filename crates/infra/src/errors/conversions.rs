//! Conversions from external infrastructure errors into domain errors.

use flagsync_domain::FlagSyncError;
use reqwest::Error as HttpError;

/// Error newtype that keeps conversions on the infrastructure side and can be
/// converted back into the domain error.
#[derive(Debug)]
pub struct InfraError(pub FlagSyncError);

impl From<InfraError> for FlagSyncError {
    fn from(value: InfraError) -> Self {
        value.0
    }
}

impl From<FlagSyncError> for InfraError {
    fn from(value: FlagSyncError) -> Self {
        InfraError(value)
    }
}

/// Extension trait to make the conversion logic explicit in tests and within
/// this module.
trait IntoFlagSyncError {
    fn into_flagsync(self) -> FlagSyncError;
}

/* -------------------------------------------------------------------------- */
/* reqwest::Error → FlagSyncError */
/* -------------------------------------------------------------------------- */

impl IntoFlagSyncError for HttpError {
    fn into_flagsync(self) -> FlagSyncError {
        let description = self.to_string();

        if self.is_timeout() {
            return FlagSyncError::Timeout(format!("http timeout: {description}"));
        }
        if self.is_connect() || self.is_request() {
            return FlagSyncError::Network(format!("http connection failed: {description}"));
        }
        if self.is_decode() || self.is_body() {
            return FlagSyncError::Protocol(format!("http body invalid: {description}"));
        }
        if self.is_builder() {
            return FlagSyncError::Config(format!("http request invalid: {description}"));
        }
        if let Some(status) = self.status() {
            return status_error(status.as_u16(), description);
        }
        FlagSyncError::Network(format!("http error: {description}"))
    }
}

impl From<HttpError> for InfraError {
    fn from(value: HttpError) -> Self {
        InfraError(value.into_flagsync())
    }
}

/* -------------------------------------------------------------------------- */
/* serde_json::Error → FlagSyncError */
/* -------------------------------------------------------------------------- */

impl IntoFlagSyncError for serde_json::Error {
    fn into_flagsync(self) -> FlagSyncError {
        FlagSyncError::Protocol(format!("invalid JSON payload: {self}"))
    }
}

impl From<serde_json::Error> for InfraError {
    fn from(value: serde_json::Error) -> Self {
        InfraError(value.into_flagsync())
    }
}

/* -------------------------------------------------------------------------- */
/* url::ParseError → FlagSyncError */
/* -------------------------------------------------------------------------- */

impl IntoFlagSyncError for url::ParseError {
    fn into_flagsync(self) -> FlagSyncError {
        FlagSyncError::Config(format!("invalid URL: {self}"))
    }
}

impl From<url::ParseError> for InfraError {
    fn from(value: url::ParseError) -> Self {
        InfraError(value.into_flagsync())
    }
}

/// Map an HTTP status that signals failure to the domain error.
pub fn status_error(status: u16, message: String) -> FlagSyncError {
    match status {
        401 | 403 => FlagSyncError::Auth(message),
        404 => FlagSyncError::NotFound(message),
        408 => FlagSyncError::Timeout(message),
        429 | 500..=599 => FlagSyncError::Server(message),
        400..=499 => FlagSyncError::Client(message),
        _ => FlagSyncError::Network(message),
    }
}
