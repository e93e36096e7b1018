//! Owns the stream transport and routes what it emits

use std::sync::Arc;

use flagsync_common::lifecycle::{ManagedTask, TaskError};
use flagsync_domain::constants::STREAM_PROTOCOL_VERSION;
use flagsync_domain::{
    Notification, StreamAction, StreamEvent, StreamingEvent, StreamingEventKind, StreamingStatus,
};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, instrument, warn};

use super::ports::EventSourceClient;
use crate::notifications::{NotificationManagerKeeper, NotificationProcessor};
use crate::telemetry::TelemetryRuntimeProducer;
use crate::workers::{SegmentsWorker, SplitsWorker};

/// `{base}?channels=a,b&v=1.1&accessToken=token`, each channel url-encoded.
pub fn build_url(base: &str, token: &str, channels: &[String]) -> String {
    let channels = channels
        .iter()
        .map(|channel| urlencoding::encode(channel).into_owned())
        .collect::<Vec<_>>()
        .join(",");
    format!("{base}?channels={channels}&v={STREAM_PROTOCOL_VERSION}&accessToken={token}")
}

/// Bridges the transport's event channel to the router and the status channel
pub struct StreamHandler {
    client: Arc<dyn EventSourceClient>,
    streaming_url: String,
    events_rx: Arc<Mutex<mpsc::UnboundedReceiver<StreamEvent>>>,
    processor: Arc<NotificationProcessor>,
    keeper: Arc<NotificationManagerKeeper>,
    splits_worker: Arc<SplitsWorker>,
    segments_worker: Arc<SegmentsWorker>,
    status_tx: mpsc::UnboundedSender<StreamingStatus>,
    telemetry: Arc<dyn TelemetryRuntimeProducer>,
    router: ManagedTask,
}

impl StreamHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: Arc<dyn EventSourceClient>,
        events_rx: mpsc::UnboundedReceiver<StreamEvent>,
        streaming_url: impl Into<String>,
        processor: Arc<NotificationProcessor>,
        keeper: Arc<NotificationManagerKeeper>,
        splits_worker: Arc<SplitsWorker>,
        segments_worker: Arc<SegmentsWorker>,
        status_tx: mpsc::UnboundedSender<StreamingStatus>,
        telemetry: Arc<dyn TelemetryRuntimeProducer>,
    ) -> Self {
        Self {
            client,
            streaming_url: streaming_url.into(),
            events_rx: Arc::new(Mutex::new(events_rx)),
            processor,
            keeper,
            splits_worker,
            segments_worker,
            status_tx,
            telemetry,
            router: ManagedTask::new("stream-router"),
        }
    }

    /// Connect with `token` to `channels`; `false` when the handshake failed
    /// (the failure itself arrives as an action event).
    #[instrument(skip(self, token))]
    pub async fn start(&self, token: &str, channels: &[String]) -> bool {
        self.ensure_router();
        self.keeper.reset();
        let url = build_url(&self.streaming_url, token, channels);
        self.client.connect(&url).await
    }

    pub async fn stop(&self) {
        self.client.disconnect(StreamAction::Disconnected).await;
    }

    pub async fn start_workers(&self) {
        self.splits_worker.start();
        self.segments_worker.start();
    }

    pub async fn stop_workers(&self) {
        self.splits_worker.stop().await;
        self.segments_worker.stop().await;
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    fn ensure_router(&self) {
        let rx = Arc::clone(&self.events_rx);
        let processor = Arc::clone(&self.processor);
        let status_tx = self.status_tx.clone();
        let telemetry = Arc::clone(&self.telemetry);

        match self.router.spawn(move |cancel| async move {
            let mut rx = rx.lock_owned().await;
            loop {
                let event = tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    next = rx.recv() => match next {
                        Some(event) => event,
                        None => break,
                    },
                };
                route(event, &processor, &status_tx, telemetry.as_ref());
            }
            debug!("Stream router stopped");
        }) {
            Ok(()) | Err(TaskError::AlreadyRunning { .. }) => {}
            Err(e) => error!(error = %e, "Failed to start stream router"),
        }
    }
}

fn route(
    event: StreamEvent,
    processor: &NotificationProcessor,
    status_tx: &mpsc::UnboundedSender<StreamingStatus>,
    telemetry: &dyn TelemetryRuntimeProducer,
) {
    match event {
        StreamEvent::Data(notification) => {
            if let Notification::Error(error) = &notification {
                telemetry.record_streaming_event(StreamingEvent::now(
                    StreamingEventKind::AblyError,
                    error.code,
                ));
            }
            processor.process(notification);
        }
        StreamEvent::Action(action) => {
            let recorded = match action {
                StreamAction::Connected => Some((StreamingEventKind::ConnectionEstablished, 0)),
                StreamAction::RetryableError => Some((StreamingEventKind::SseConnectionError, 0)),
                StreamAction::NonRetryableError => Some((StreamingEventKind::SseConnectionError, 1)),
                StreamAction::Disconnected => None,
            };
            if let Some((kind, data)) = recorded {
                telemetry.record_streaming_event(StreamingEvent::now(kind, data));
            }
            if status_tx.send(action.into()).is_err() {
                warn!(?action, "Status receiver dropped");
            }
        }
    }
}
