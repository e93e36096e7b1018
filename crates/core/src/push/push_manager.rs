//! Push session state machine
//!
//! `Stopped -> Authenticating -> Connecting -> Streaming -> Stopped`. Failures
//! are published as streaming statuses; the sync manager reacts by falling
//! back to polling and calling [`PushSession::schedule_reconnect`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flagsync_common::lifecycle::ManagedTask;
use flagsync_common::resilience::Backoff;
use flagsync_domain::{
    AuthResponse, FlagSyncError, StreamingEvent, StreamingEventKind, StreamingStatus, SyncConfig,
    SyncResource,
};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::ports::AuthApi;
use super::stream_handler::StreamHandler;
use crate::sync::ports::{PushSession, ReconnectKind};
use crate::telemetry::TelemetryRuntimeProducer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushState {
    Stopped,
    Authenticating,
    Connecting,
    Streaming,
}

/// Authenticates, connects the stream and keeps the token fresh
pub struct PushManager {
    me: Weak<Self>,
    auth: Arc<dyn AuthApi>,
    handler: Arc<StreamHandler>,
    status_tx: mpsc::UnboundedSender<StreamingStatus>,
    telemetry: Arc<dyn TelemetryRuntimeProducer>,
    state: Mutex<PushState>,
    /// Bumped whenever a session is torn down, so an in-flight `start`
    /// notices it was superseded.
    epoch: AtomicU64,
    stream_backoff: Backoff,
    auth_backoff: Backoff,
    last_failure_was_auth: AtomicBool,
    non_retryable_floor: Duration,
    token_grace: Duration,
    refresh_task: ManagedTask,
    /// Cancelled by `stop()`; a refresh in flight must not restart the session.
    refresh_guard: Mutex<Option<CancellationToken>>,
    pending_reconnect: Mutex<Option<CancellationToken>>,
}

impl PushManager {
    pub fn new(
        auth: Arc<dyn AuthApi>,
        handler: Arc<StreamHandler>,
        status_tx: mpsc::UnboundedSender<StreamingStatus>,
        config: &SyncConfig,
        telemetry: Arc<dyn TelemetryRuntimeProducer>,
    ) -> Arc<Self> {
        let max_backoff = Duration::from_millis(config.push_max_backoff_ms);
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            auth,
            handler,
            status_tx,
            telemetry,
            state: Mutex::new(PushState::Stopped),
            epoch: AtomicU64::new(0),
            stream_backoff: Backoff::new(
                Duration::from_millis(config.streaming_reconnect_backoff_base_ms),
                max_backoff,
            ),
            auth_backoff: Backoff::new(
                Duration::from_millis(config.auth_retry_backoff_base_ms),
                max_backoff,
            ),
            last_failure_was_auth: AtomicBool::new(false),
            non_retryable_floor: config.non_retryable_backoff_floor(),
            token_grace: config.token_refresh_grace(),
            refresh_task: ManagedTask::new("token-refresh"),
            refresh_guard: Mutex::new(None),
            pending_reconnect: Mutex::new(None),
        })
    }

    pub fn state(&self) -> PushState {
        *self.state.lock()
    }

    pub fn is_streaming(&self) -> bool {
        self.state() == PushState::Streaming && self.handler.is_connected()
    }

    fn set_state(&self, state: PushState) {
        let previous = std::mem::replace(&mut *self.state.lock(), state);
        if previous != state {
            debug!(?previous, ?state, "Push state changed");
        }
    }

    fn publish(&self, status: StreamingStatus) {
        if self.status_tx.send(status).is_err() {
            warn!(?status, "Status receiver dropped");
        }
    }

    fn superseded(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::Acquire) != epoch
    }

    async fn authenticate(&self) -> Option<AuthResponse> {
        let started = Instant::now();
        let result = self.auth.authenticate().await;
        self.telemetry.record_sync_latency(SyncResource::Token, started.elapsed());

        match result {
            Ok(response) => {
                self.last_failure_was_auth.store(false, Ordering::Release);
                self.auth_backoff.reset();
                self.telemetry.record_successful_sync(SyncResource::Token, Utc::now());
                self.telemetry.record_token_refresh();
                Some(response)
            }
            Err(e) => {
                self.last_failure_was_auth.store(true, Ordering::Release);
                self.telemetry.record_sync_error(SyncResource::Token, &e);
                let status = if matches!(e, FlagSyncError::Auth(_)) || !e.is_retryable() {
                    self.telemetry.record_auth_rejection();
                    StreamingStatus::NonRetryableError
                } else {
                    StreamingStatus::RetryableError
                };
                warn!(error = %e, ?status, "Streaming authentication failed");
                self.publish(status);
                None
            }
        }
    }

    /// Refresh the session shortly before the token expires.
    fn schedule_token_refresh(&self, expires_at: Option<DateTime<Utc>>) {
        let Some(expires_at) = expires_at else {
            return;
        };
        let lifetime = (expires_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        let delay = lifetime.checked_sub(self.token_grace).unwrap_or(lifetime / 2);
        let me = self.me.clone();
        let guard = CancellationToken::new();
        if let Some(previous) = self.refresh_guard.lock().replace(guard.clone()) {
            previous.cancel();
        }

        let spawned = self.refresh_task.spawn(move |cancel| async move {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }
            let Some(manager) = me.upgrade() else {
                return;
            };
            info!("Refreshing streaming token");
            manager
                .telemetry
                .record_streaming_event(StreamingEvent::now(StreamingEventKind::TokenRefresh, 0));
            // Detached: stop_session stops this very task.
            tokio::spawn(async move {
                manager.stop_session().await;
                if guard.is_cancelled() {
                    debug!("Push manager stopped during token refresh");
                    return;
                }
                manager.start().await;
            });
        });
        match spawned {
            Ok(()) => debug!(?delay, "Token refresh scheduled"),
            Err(e) => error!(error = %e, "Failed to schedule token refresh"),
        }
    }

    fn cancel_pending_reconnect(&self) {
        if let Some(token) = self.pending_reconnect.lock().take() {
            token.cancel();
        }
    }
}

#[async_trait]
impl PushSession for PushManager {
    #[instrument(skip(self))]
    async fn start(&self) {
        {
            let mut state = self.state.lock();
            if *state != PushState::Stopped {
                debug!(state = ?*state, "Push session already active");
                return;
            }
            *state = PushState::Authenticating;
        }
        let epoch = self.epoch.load(Ordering::Acquire);

        let Some(response) = self.authenticate().await else {
            self.set_state(PushState::Stopped);
            return;
        };
        if self.superseded(epoch) {
            debug!("Push session stopped during authentication");
            self.set_state(PushState::Stopped);
            return;
        }
        let token = match response.token {
            Some(token) if response.push_enabled => token,
            _ => {
                info!("Streaming is disabled for this key");
                self.set_state(PushState::Stopped);
                self.publish(StreamingStatus::SubsystemOff);
                return;
            }
        };

        self.set_state(PushState::Connecting);
        if !self.handler.start(&token, &response.channels).await {
            // The transport has already reported why.
            self.set_state(PushState::Stopped);
            return;
        }
        if self.superseded(epoch) {
            debug!("Push session stopped while connecting");
            self.handler.stop().await;
            self.set_state(PushState::Stopped);
            return;
        }

        self.set_state(PushState::Streaming);
        self.stream_backoff.reset();
        self.schedule_token_refresh(response.expires_at);
        info!(channels = response.channels.len(), "Push session established");
    }

    #[instrument(skip(self))]
    async fn stop(&self) {
        self.cancel_pending_reconnect();
        if let Some(guard) = self.refresh_guard.lock().take() {
            guard.cancel();
        }
        self.stop_session().await;
        self.stream_backoff.reset();
        self.auth_backoff.reset();
        self.last_failure_was_auth.store(false, Ordering::Release);
        info!("Push manager stopped");
    }

    async fn stop_session(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.refresh_task.stop_quietly().await;
        self.handler.stop().await;
        self.set_state(PushState::Stopped);
    }

    fn schedule_reconnect(&self, kind: ReconnectKind) {
        let mut delay = if self.last_failure_was_auth.load(Ordering::Acquire) {
            self.auth_backoff.next_delay()
        } else {
            self.stream_backoff.next_delay()
        };
        if kind == ReconnectKind::NonRetryable {
            delay = delay.max(self.non_retryable_floor);
        }

        let token = CancellationToken::new();
        if let Some(previous) = self.pending_reconnect.lock().replace(token.clone()) {
            previous.cancel();
        }
        info!(?kind, ?delay, "Push reconnect scheduled");

        let me = self.me.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = token.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }
            if let Some(manager) = me.upgrade() {
                manager.start().await;
            }
        });
    }

    async fn start_workers(&self) {
        self.handler.start_workers().await;
    }

    async fn stop_workers(&self) {
        self.handler.stop_workers().await;
    }
}
