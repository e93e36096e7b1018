//! Push stream transport
//!
//! [`SseClient`] implements the core's `EventSourceClient` port over a
//! long-lived HTTP response; [`FrameDecoder`] turns its byte chunks into
//! frames for the notification parser.

pub mod event_source;
pub mod frame;

pub use event_source::{ConnectionState, SseClient};
pub use frame::{Frame, FrameDecoder, FrameOverflow};
