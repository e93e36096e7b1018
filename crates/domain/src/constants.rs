//! Protocol and tuning constants
//!
//! Centralized location for the values the control plane and its SDKs agree
//! on. Tunables with a config knob keep their default here.

// Change numbers
pub const EMPTY_CHANGE_NUMBER: i64 = -1;

// Stream framing
pub const FRAME_DELIMITER: &[u8] = b"\n\n";
pub const KEEPALIVE_FRAME: &str = ":keepalive";
pub const STREAM_READ_BUFFER_SIZE: usize = 10_000;
/// Undelimited bytes tolerated before the stream is considered broken.
pub const MAX_PENDING_FRAME_BYTES: usize = 64 * STREAM_READ_BUFFER_SIZE;
pub const STREAM_PROTOCOL_VERSION: &str = "1.1";

// Notification envelope
pub const OCCUPANCY_EVENT_NAME: &str = "[meta]occupancy";
pub const OCCUPANCY_CHANNEL_PREFIX: &str = "[?occupancy=metrics.publishers]";
pub const CONTROL_PRI_CHANNEL: &str = "control_pri";
pub const CONTROL_SEC_CHANNEL: &str = "control_sec";

// Stream error code ranges
pub const RETRYABLE_ERROR_CODES: std::ops::RangeInclusive<i64> = 40140..=40149;
pub const NON_RETRYABLE_ERROR_CODES: std::ops::RangeInclusive<i64> = 40000..=49999;

// Timeouts (milliseconds)
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 70_000;
pub const DEFAULT_HTTP_CONNECTION_TIMEOUT_MS: u64 = 15_000;
pub const DEFAULT_HTTP_READ_TIMEOUT_MS: u64 = 15_000;
pub const DISCONNECT_JOIN_TIMEOUT_MS: u64 = 5_000;

// Refresh rates (seconds)
pub const DEFAULT_SPLITS_REFRESH_RATE_SECS: u64 = 60;
pub const DEFAULT_SEGMENTS_REFRESH_RATE_SECS: u64 = 60;
pub const MIN_REFRESH_RATE_SECS: u64 = 5;

// Backoff
pub const DEFAULT_AUTH_BACKOFF_BASE_MS: u64 = 1_000;
pub const DEFAULT_STREAMING_BACKOFF_BASE_MS: u64 = 1_000;
pub const DEFAULT_PUSH_MAX_BACKOFF_MS: u64 = 1_800_000;
pub const DEFAULT_NON_RETRYABLE_FLOOR_MS: u64 = 60_000;
pub const DEFAULT_SYNC_ALL_BACKOFF_BASE_MS: u64 = 10_000;
pub const DEFAULT_SYNC_ALL_MAX_BACKOFF_MS: u64 = 60_000;

// On-demand fetches
pub const DEFAULT_ON_DEMAND_FETCH_MAX_RETRIES: u32 = 10;
pub const DEFAULT_ON_DEMAND_FETCH_RETRY_DELAY_MS: u64 = 50;
pub const DEFAULT_SEGMENT_FETCH_CONCURRENCY: usize = 10;

// Token refresh happens this long before the JWT expires
pub const DEFAULT_TOKEN_REFRESH_GRACE_SECS: u64 = 600;

// Telemetry
pub const STREAMING_EVENTS_CAPACITY: usize = 20;

// Service endpoints
pub const DEFAULT_SDK_URL: &str = "https://sdk.split.io/api";
pub const DEFAULT_AUTH_URL: &str = "https://auth.split.io/api";
pub const DEFAULT_STREAMING_URL: &str = "https://streaming.split.io/sse";
