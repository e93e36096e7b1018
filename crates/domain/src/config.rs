//! Configuration structures
//!
//! Every struct derives `Default` and carries `#[serde(default)]` so a
//! partial TOML/JSON file only needs the fields it overrides.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_AUTH_BACKOFF_BASE_MS, DEFAULT_AUTH_URL, DEFAULT_CONNECT_TIMEOUT_MS,
    DEFAULT_HTTP_CONNECTION_TIMEOUT_MS, DEFAULT_HTTP_READ_TIMEOUT_MS,
    DEFAULT_NON_RETRYABLE_FLOOR_MS, DEFAULT_ON_DEMAND_FETCH_MAX_RETRIES,
    DEFAULT_ON_DEMAND_FETCH_RETRY_DELAY_MS, DEFAULT_PUSH_MAX_BACKOFF_MS, DEFAULT_READ_TIMEOUT_MS,
    DEFAULT_SDK_URL, DEFAULT_SEGMENTS_REFRESH_RATE_SECS, DEFAULT_SEGMENT_FETCH_CONCURRENCY,
    DEFAULT_SPLITS_REFRESH_RATE_SECS, DEFAULT_STREAMING_BACKOFF_BASE_MS, DEFAULT_STREAMING_URL,
    DEFAULT_SYNC_ALL_BACKOFF_BASE_MS, DEFAULT_SYNC_ALL_MAX_BACKOFF_MS,
    DEFAULT_TOKEN_REFRESH_GRACE_SECS,
};
use crate::errors::{FlagSyncError, Result};

/// Top-level configuration for the sync subsystem
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SDK key sent as a bearer token to every control-plane endpoint
    pub api_key: String,
    pub urls: ServiceUrls,
    pub sync: SyncConfig,
    pub http: HttpConfig,
}

impl Config {
    /// Create a configuration with defaults for everything but the key.
    pub fn with_api_key(api_key: impl Into<String>) -> Self {
        Self { api_key: api_key.into(), ..Self::default() }
    }

    /// Reject configurations that cannot possibly work.
    ///
    /// # Errors
    /// Returns `FlagSyncError::Config` for an empty API key, a zero refresh
    /// rate or a zero segment fetch concurrency.
    pub fn validate(&self) -> Result<()> {
        if self.api_key.trim().is_empty() {
            return Err(FlagSyncError::Config("api_key must not be empty".to_string()));
        }
        if self.sync.splits_refresh_rate_secs == 0 || self.sync.segments_refresh_rate_secs == 0 {
            return Err(FlagSyncError::Config("refresh rates must be positive".to_string()));
        }
        if self.sync.segment_fetch_concurrency == 0 {
            return Err(FlagSyncError::Config(
                "segment_fetch_concurrency must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Control-plane endpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceUrls {
    pub sdk: String,
    pub auth: String,
    pub streaming: String,
}

impl Default for ServiceUrls {
    fn default() -> Self {
        Self {
            sdk: DEFAULT_SDK_URL.to_string(),
            auth: DEFAULT_AUTH_URL.to_string(),
            streaming: DEFAULT_STREAMING_URL.to_string(),
        }
    }
}

/// Polling, streaming and backoff tunables
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub streaming_enabled: bool,
    pub splits_refresh_rate_secs: u64,
    pub segments_refresh_rate_secs: u64,
    pub randomize_refresh_rates: bool,
    pub segment_fetch_concurrency: usize,
    pub on_demand_fetch_max_retries: u32,
    pub on_demand_fetch_retry_delay_ms: u64,
    pub auth_retry_backoff_base_ms: u64,
    pub streaming_reconnect_backoff_base_ms: u64,
    pub push_max_backoff_ms: u64,
    pub non_retryable_backoff_floor_ms: u64,
    pub sync_all_backoff_base_ms: u64,
    pub sync_all_max_backoff_ms: u64,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub token_refresh_grace_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            streaming_enabled: true,
            splits_refresh_rate_secs: DEFAULT_SPLITS_REFRESH_RATE_SECS,
            segments_refresh_rate_secs: DEFAULT_SEGMENTS_REFRESH_RATE_SECS,
            randomize_refresh_rates: false,
            segment_fetch_concurrency: DEFAULT_SEGMENT_FETCH_CONCURRENCY,
            on_demand_fetch_max_retries: DEFAULT_ON_DEMAND_FETCH_MAX_RETRIES,
            on_demand_fetch_retry_delay_ms: DEFAULT_ON_DEMAND_FETCH_RETRY_DELAY_MS,
            auth_retry_backoff_base_ms: DEFAULT_AUTH_BACKOFF_BASE_MS,
            streaming_reconnect_backoff_base_ms: DEFAULT_STREAMING_BACKOFF_BASE_MS,
            push_max_backoff_ms: DEFAULT_PUSH_MAX_BACKOFF_MS,
            non_retryable_backoff_floor_ms: DEFAULT_NON_RETRYABLE_FLOOR_MS,
            sync_all_backoff_base_ms: DEFAULT_SYNC_ALL_BACKOFF_BASE_MS,
            sync_all_max_backoff_ms: DEFAULT_SYNC_ALL_MAX_BACKOFF_MS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            token_refresh_grace_secs: DEFAULT_TOKEN_REFRESH_GRACE_SECS,
        }
    }
}

impl SyncConfig {
    pub const fn splits_refresh_rate(&self) -> Duration {
        Duration::from_secs(self.splits_refresh_rate_secs)
    }

    pub const fn segments_refresh_rate(&self) -> Duration {
        Duration::from_secs(self.segments_refresh_rate_secs)
    }

    pub const fn on_demand_fetch_retry_delay(&self) -> Duration {
        Duration::from_millis(self.on_demand_fetch_retry_delay_ms)
    }

    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub const fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub const fn token_refresh_grace(&self) -> Duration {
        Duration::from_secs(self.token_refresh_grace_secs)
    }

    pub const fn non_retryable_backoff_floor(&self) -> Duration {
        Duration::from_millis(self.non_retryable_backoff_floor_ms)
    }
}

/// Outbound HTTP timeouts for the definitions and auth APIs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub connection_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub max_attempts: u32,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connection_timeout_ms: DEFAULT_HTTP_CONNECTION_TIMEOUT_MS,
            read_timeout_ms: DEFAULT_HTTP_READ_TIMEOUT_MS,
            max_attempts: 1,
        }
    }
}
