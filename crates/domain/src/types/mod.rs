//! Domain types and models

pub mod notification;
pub mod split;
pub mod streaming;
pub mod telemetry;

pub use notification::{is_retryable_code, ControlType, Notification, StreamError};
pub use split::{FetchOptions, SegmentChange, Split, SplitChanges, SplitStatus};
pub use streaming::{AuthResponse, StreamAction, StreamEvent, StreamingStatus};
pub use telemetry::{StreamingEvent, StreamingEventKind, SyncResource};
