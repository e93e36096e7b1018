//! Server-sent-events transport
//!
//! One [`SseClient`] owns at most one stream at a time. Connection state is a
//! single value behind a mutex; every transition and the action event it
//! produces happen under that lock, so a session emits exactly one terminal
//! action no matter which of the reader, the connect timeout or
//! `disconnect` gets there first.
//!
//! The first frame that is not an error event, keepalives included, marks the
//! session connected.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use flagsync_common::lifecycle::ManagedTask;
use flagsync_core::{EventSourceClient, NotificationParser};
use flagsync_domain::constants::DISCONNECT_JOIN_TIMEOUT_MS;
use flagsync_domain::{Notification, StreamAction, StreamEvent};
use futures::StreamExt;
use parking_lot::Mutex;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use reqwest::{Method, StatusCode};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::frame::{Frame, FrameDecoder};
use crate::http::HttpClient;

/// Lifecycle of one stream session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    AwaitingFirstFrame,
    Connected,
    Disconnected,
    Failed,
}

impl ConnectionState {
    const fn is_active(self) -> bool {
        matches!(self, Self::Connecting | Self::AwaitingFirstFrame | Self::Connected)
    }
}

#[derive(Debug)]
struct Session {
    id: u64,
    state: ConnectionState,
}

struct Shared {
    session: Mutex<Session>,
    events: mpsc::UnboundedSender<StreamEvent>,
}

impl Shared {
    fn emit(&self, event: StreamEvent) {
        if self.events.send(event).is_err() {
            debug!("Stream event receiver dropped");
        }
    }

    /// Move an active session forward without emitting anything.
    fn advance(&self, id: u64, to: ConnectionState) -> bool {
        let mut session = self.session.lock();
        if session.id != id || !session.state.is_active() {
            return false;
        }
        session.state = to;
        true
    }

    /// First frame accepted: the session is connected.
    fn promote(&self, id: u64) -> bool {
        let mut session = self.session.lock();
        if session.id != id || session.state != ConnectionState::AwaitingFirstFrame {
            return false;
        }
        session.state = ConnectionState::Connected;
        self.emit(StreamEvent::Action(StreamAction::Connected));
        true
    }

    /// Claim the terminal transition of session `id` and report `action`.
    fn finish(&self, id: u64, action: StreamAction) -> bool {
        let mut session = self.session.lock();
        if session.id != id || !session.state.is_active() {
            return false;
        }
        session.state = if action == StreamAction::Disconnected {
            ConnectionState::Disconnected
        } else {
            ConnectionState::Failed
        };
        self.emit(StreamEvent::Action(action));
        true
    }

    fn deliver(&self, id: u64, notification: Notification) {
        let session = self.session.lock();
        if session.id == id && session.state == ConnectionState::Connected {
            self.emit(StreamEvent::Data(notification));
        }
    }
}

/// HTTP streaming implementation of [`EventSourceClient`]
pub struct SseClient {
    http: HttpClient,
    shared: Arc<Shared>,
    connect_timeout: Duration,
    read_timeout: Duration,
    reader: ManagedTask,
}

impl SseClient {
    /// Events (data and lifecycle actions) are delivered on `events`.
    pub fn new(
        http: HttpClient,
        events: mpsc::UnboundedSender<StreamEvent>,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Self {
        Self {
            http,
            shared: Arc::new(Shared {
                session: Mutex::new(Session { id: 0, state: ConnectionState::Idle }),
                events,
            }),
            connect_timeout,
            read_timeout,
            reader: ManagedTask::new("sse-reader")
                .with_join_timeout(Duration::from_millis(DISCONNECT_JOIN_TIMEOUT_MS)),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.session.lock().state
    }
}

#[async_trait]
impl EventSourceClient for SseClient {
    #[instrument(skip(self, url))]
    async fn connect(&self, url: &str) -> bool {
        let id = {
            let mut session = self.shared.session.lock();
            if session.state.is_active() {
                warn!(state = ?session.state, "Stream already open; ignoring connect");
                return session.state == ConnectionState::Connected;
            }
            session.id += 1;
            session.state = ConnectionState::Connecting;
            session.id
        };

        // The previous reader has already given up its session; reap it.
        self.reader.stop_quietly().await;

        let (handshake_tx, handshake_rx) = oneshot::channel();
        let request = self
            .http
            .request(Method::GET, url)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache");
        let reader = Reader {
            http: self.http.clone(),
            shared: Arc::clone(&self.shared),
            id,
            read_timeout: self.read_timeout,
        };

        if let Err(e) = self.reader.spawn(move |cancel| reader.run(request, handshake_tx, cancel)) {
            warn!(error = %e, "Failed to start stream reader");
            self.shared.finish(id, StreamAction::RetryableError);
            return false;
        }

        match tokio::time::timeout(self.connect_timeout, handshake_rx).await {
            Ok(Ok(())) => {
                info!(session = id, "Stream connected");
                true
            }
            Ok(Err(_)) => {
                debug!(session = id, "Stream handshake failed");
                false
            }
            Err(_) => {
                warn!(session = id, timeout = ?self.connect_timeout, "Stream connect timed out");
                self.shared.finish(id, StreamAction::RetryableError);
                self.reader.stop_quietly().await;
                false
            }
        }
    }

    #[instrument(skip(self))]
    async fn disconnect(&self, action: StreamAction) {
        let claimed = {
            let mut session = self.shared.session.lock();
            if session.state.is_active() {
                session.state = ConnectionState::Disconnected;
                true
            } else {
                false
            }
        };
        if !claimed {
            debug!("Stream not open; nothing to disconnect");
            return;
        }

        if let Err(e) = self.reader.stop().await {
            warn!(error = %e, "Stream reader did not stop cleanly");
        }
        self.shared.emit(StreamEvent::Action(action));
        info!(?action, "Stream disconnected");
    }

    fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }
}

/// Body of the background read task for one session
struct Reader {
    http: HttpClient,
    shared: Arc<Shared>,
    id: u64,
    read_timeout: Duration,
}

impl Reader {
    async fn run(
        self,
        request: reqwest::RequestBuilder,
        handshake: oneshot::Sender<()>,
        cancel: CancellationToken,
    ) {
        tokio::select! {
            biased;
            () = cancel.cancelled() => debug!(session = self.id, "Stream reader cancelled"),
            action = self.read(request, handshake) => {
                if let Some(action) = action {
                    self.shared.finish(self.id, action);
                }
            }
        }
    }

    /// Returns the terminal action, or `None` when the session was already
    /// finished elsewhere.
    async fn read(
        &self,
        request: reqwest::RequestBuilder,
        handshake: oneshot::Sender<()>,
    ) -> Option<StreamAction> {
        let response = match self.http.send(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Stream request failed");
                return Some(StreamAction::RetryableError);
            }
        };

        let status = response.status();
        if !status.is_success() {
            warn!(%status, "Stream endpoint rejected the connection");
            return Some(classify_status(status));
        }
        if !self.shared.advance(self.id, ConnectionState::AwaitingFirstFrame) {
            return None;
        }

        let mut body = response.bytes_stream();
        let mut decoder = FrameDecoder::new();
        let mut handshake = Some(handshake);

        loop {
            let chunk = match tokio::time::timeout(self.read_timeout, body.next()).await {
                Err(_) => {
                    warn!(timeout = ?self.read_timeout, "No stream data within read timeout");
                    return Some(StreamAction::RetryableError);
                }
                Ok(None) => {
                    info!("Stream closed by server");
                    return Some(StreamAction::RetryableError);
                }
                Ok(Some(Err(e))) => {
                    warn!(error = %e, "Stream read failed");
                    return Some(StreamAction::RetryableError);
                }
                Ok(Some(Ok(bytes))) => bytes,
            };

            let frames = match decoder.push(&chunk) {
                Ok(frames) => frames,
                Err(e) => {
                    warn!(error = %e, "Stream frame too large");
                    return Some(StreamAction::RetryableError);
                }
            };

            for frame in frames {
                // Keepalives are never parsed but still complete the handshake.
                let notification = match frame {
                    Frame::Keepalive => None,
                    Frame::Data(text) => NotificationParser::parse(&text),
                };

                if let Some(Notification::Error(error)) = notification {
                    warn!(
                        code = error.code,
                        status = error.status_code,
                        message = %error.message,
                        "Stream error event"
                    );
                    let action = if error.retryable {
                        StreamAction::RetryableError
                    } else {
                        StreamAction::NonRetryableError
                    };
                    if handshake.is_none() {
                        self.shared.deliver(self.id, Notification::Error(error));
                    }
                    return Some(action);
                }

                if let Some(tx) = handshake.take() {
                    if !self.shared.promote(self.id) {
                        return None;
                    }
                    // The connect call may already have timed out.
                    let _ = tx.send(());
                }

                if let Some(notification) = notification {
                    self.shared.deliver(self.id, notification);
                }
            }
        }
    }
}

/// 4xx other than 429 means this URL/token will not work again.
fn classify_status(status: StatusCode) -> StreamAction {
    if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
        StreamAction::NonRetryableError
    } else {
        StreamAction::RetryableError
    }
}
