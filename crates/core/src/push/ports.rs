//! Port interfaces for the push session

use async_trait::async_trait;
use flagsync_domain::{AuthResponse, Result, StreamAction};

/// Auth API: one-shot streaming token request
#[async_trait]
pub trait AuthApi: Send + Sync {
    /// Never retries internally; the push manager owns the backoff.
    async fn authenticate(&self) -> Result<AuthResponse>;
}

/// Long-lived server-sent-events connection
///
/// Implementations deliver [`StreamEvent`](flagsync_domain::StreamEvent)s on
/// the channel they were constructed with; this trait only drives the
/// connection lifecycle.
#[async_trait]
pub trait EventSourceClient: Send + Sync {
    /// Open the stream and wait (bounded) for the first frame.
    ///
    /// Returns `true` once connected; failures are reported as exactly one
    /// error action on the event channel.
    async fn connect(&self, url: &str) -> bool;

    /// Close the stream and report `action` once it is torn down.
    async fn disconnect(&self, action: StreamAction);

    fn is_connected(&self) -> bool;
}
