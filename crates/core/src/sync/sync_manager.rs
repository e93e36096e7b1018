//! Push/poll orchestration
//!
//! The manager reaches readiness with a full poll-based sync, then hands over
//! to the push session. Every degraded signal from the push side resumes
//! periodic polling immediately, so flags keep converging whether or not the
//! stream is healthy.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use flagsync_common::lifecycle::ManagedTask;
use flagsync_common::resilience::Backoff;
use flagsync_domain::types::telemetry::sync_mode;
use flagsync_domain::{StreamingEvent, StreamingEventKind, StreamingStatus, SyncConfig};
use parking_lot::Mutex;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::{debug, info, instrument, warn};

use super::error::SyncManagerError;
use super::ports::{PushSession, ReconnectKind, Synchronizer};
use super::readiness::ReadinessGate;
use crate::telemetry::TelemetryRuntimeProducer;

/// Which mechanism currently keeps the cache fresh
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    Init,
    PollingOnly,
    /// Polling while the push session is being established
    StreamingAttempt,
    Streaming,
    Stopped,
}

/// Top-level sync state machine
pub struct SyncManager {
    synchronizer: Arc<dyn Synchronizer>,
    push: Option<Arc<dyn PushSession>>,
    status_rx: Arc<AsyncMutex<mpsc::UnboundedReceiver<StreamingStatus>>>,
    readiness: ReadinessGate,
    backoff: Backoff,
    mode: Mutex<SyncMode>,
    streaming_off: AtomicBool,
    started: AtomicBool,
    stopped: AtomicBool,
    startup_task: ManagedTask,
    status_task: ManagedTask,
    telemetry: Arc<dyn TelemetryRuntimeProducer>,
}

impl SyncManager {
    /// `push` is ignored when streaming is disabled in `config`.
    pub fn new(
        synchronizer: Arc<dyn Synchronizer>,
        push: Option<Arc<dyn PushSession>>,
        status_rx: mpsc::UnboundedReceiver<StreamingStatus>,
        config: &SyncConfig,
        telemetry: Arc<dyn TelemetryRuntimeProducer>,
    ) -> Self {
        Self {
            synchronizer,
            push: push.filter(|_| config.streaming_enabled),
            status_rx: Arc::new(AsyncMutex::new(status_rx)),
            readiness: ReadinessGate::new(),
            backoff: Backoff::new(
                Duration::from_millis(config.sync_all_backoff_base_ms),
                Duration::from_millis(config.sync_all_max_backoff_ms),
            ),
            mode: Mutex::new(SyncMode::Init),
            streaming_off: AtomicBool::new(false),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            startup_task: ManagedTask::new("sync-startup"),
            status_task: ManagedTask::new("sync-status"),
            telemetry,
        }
    }

    /// Start synchronizing in the background. Calling it again is a no-op.
    ///
    /// # Errors
    /// `AlreadyStopped` after [`stop`](Self::stop), or a task error if a
    /// background task could not be spawned.
    #[instrument(skip(self))]
    pub fn start(self: &Arc<Self>) -> Result<(), SyncManagerError> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(SyncManagerError::AlreadyStopped);
        }
        if self.started.swap(true, Ordering::AcqRel) {
            debug!("Sync manager already started");
            return Ok(());
        }

        if self.push.is_some() {
            let manager = Arc::downgrade(self);
            let rx = Arc::clone(&self.status_rx);
            self.status_task.spawn(move |cancel| status_loop(manager, rx, cancel))?;
        }

        let manager = Arc::clone(self);
        self.startup_task.spawn(move |cancel| async move {
            tokio::select! {
                biased;
                () = cancel.cancelled() => debug!("Startup cancelled"),
                () = manager.run_startup() => {}
            }
        })?;
        info!(streaming = self.push.is_some(), "Sync manager started");
        Ok(())
    }

    async fn run_startup(&self) {
        while !self.synchronizer.sync_all().await {
            let delay = self.backoff.next_delay();
            warn!(?delay, attempt = self.backoff.attempt(), "Initial synchronization incomplete, retrying");
            tokio::time::sleep(delay).await;
        }
        self.backoff.reset();

        // Polling covers the gap until the stream reports connected.
        self.synchronizer.start_periodic_fetching().await;
        self.set_mode(if self.push.is_some() {
            SyncMode::StreamingAttempt
        } else {
            SyncMode::PollingOnly
        });
        self.readiness.mark_ready();
        info!("Flag cache ready");

        if let Some(push) = &self.push {
            push.start().await;
        }
    }

    async fn handle_status(&self, status: StreamingStatus) {
        let Some(push) = &self.push else {
            return;
        };
        if self.streaming_off.load(Ordering::Acquire) {
            debug!(?status, "Streaming is off, status ignored");
            return;
        }

        debug!(?status, "Streaming status received");
        match status {
            StreamingStatus::Connected | StreamingStatus::SubsystemReady => {
                self.synchronizer.stop_periodic_fetching().await;
                // Catch up on anything published while the stream was down
                if !self.synchronizer.sync_all().await {
                    warn!("Resync after stream recovery incomplete");
                }
                push.start_workers().await;
                self.set_mode(SyncMode::Streaming);
            }
            StreamingStatus::Disconnected | StreamingStatus::SubsystemDown => {
                self.fall_back_to_polling(push.as_ref()).await;
            }
            StreamingStatus::RetryableError => {
                self.fall_back_to_polling(push.as_ref()).await;
                push.stop_session().await;
                push.schedule_reconnect(ReconnectKind::Retryable);
            }
            StreamingStatus::NonRetryableError => {
                self.fall_back_to_polling(push.as_ref()).await;
                push.stop_session().await;
                push.schedule_reconnect(ReconnectKind::NonRetryable);
            }
            StreamingStatus::SubsystemOff => {
                info!("Streaming disabled by the server, polling only");
                self.streaming_off.store(true, Ordering::Release);
                push.stop().await;
                self.fall_back_to_polling(push.as_ref()).await;
            }
        }
    }

    async fn fall_back_to_polling(&self, push: &dyn PushSession) {
        push.stop_workers().await;
        self.synchronizer.start_periodic_fetching().await;
        self.set_mode(SyncMode::PollingOnly);
    }

    fn set_mode(&self, mode: SyncMode) {
        let previous = std::mem::replace(&mut *self.mode.lock(), mode);
        if previous == mode {
            return;
        }
        debug!(?previous, ?mode, "Sync mode changed");

        let recorded = match mode {
            SyncMode::Streaming => Some(sync_mode::STREAMING),
            SyncMode::PollingOnly => Some(sync_mode::POLLING),
            _ => None,
        };
        if let Some(value) = recorded {
            self.telemetry
                .record_streaming_event(StreamingEvent::now(StreamingEventKind::SyncModeUpdate, value));
        }
    }

    /// Stop every background activity. Idempotent.
    #[instrument(skip(self))]
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.startup_task.stop_quietly().await;
        self.status_task.stop_quietly().await;
        if let Some(push) = &self.push {
            push.stop().await;
            push.stop_workers().await;
        }
        self.synchronizer.stop_periodic_fetching().await;
        self.set_mode(SyncMode::Stopped);
        info!("Sync manager stopped");
    }

    pub async fn block_until_ready(&self, timeout: Duration) -> bool {
        self.readiness.wait(timeout).await
    }

    pub fn is_ready(&self) -> bool {
        self.readiness.is_ready()
    }

    pub fn is_streaming(&self) -> bool {
        self.mode() == SyncMode::Streaming
    }

    pub fn mode(&self) -> SyncMode {
        *self.mode.lock()
    }
}

async fn status_loop(
    manager: Weak<SyncManager>,
    rx: Arc<AsyncMutex<mpsc::UnboundedReceiver<StreamingStatus>>>,
    cancel: tokio_util::sync::CancellationToken,
) {
    let mut rx = rx.lock_owned().await;
    loop {
        let status = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            next = rx.recv() => match next {
                Some(status) => status,
                None => break,
            },
        };
        let Some(manager) = manager.upgrade() else {
            break;
        };
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = manager.handle_status(status) => {}
        }
    }
    debug!("Status loop stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use flagsync_common::assert_eventually_async;
    use flagsync_domain::Result;

    use super::*;
    use crate::telemetry::NoopTelemetry;

    #[derive(Default)]
    struct FakeSynchronizer {
        failures_before_ready: AtomicUsize,
        sync_all_calls: AtomicUsize,
        polling: AtomicBool,
    }

    #[async_trait]
    impl Synchronizer for FakeSynchronizer {
        async fn sync_all(&self) -> bool {
            self.sync_all_calls.fetch_add(1, Ordering::SeqCst);
            self.failures_before_ready
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_err()
        }

        async fn synchronize_splits(&self, _till: Option<i64>) -> Result<()> {
            Ok(())
        }

        async fn synchronize_segment(&self, _name: &str, _till: Option<i64>) -> Result<()> {
            Ok(())
        }

        async fn start_periodic_fetching(&self) {
            self.polling.store(true, Ordering::SeqCst);
        }

        async fn stop_periodic_fetching(&self) {
            self.polling.store(false, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct FakePush {
        starts: AtomicUsize,
        stops: AtomicUsize,
        session_stops: AtomicUsize,
        workers_running: AtomicBool,
        reconnects: Mutex<Vec<ReconnectKind>>,
    }

    #[async_trait]
    impl PushSession for FakePush {
        async fn start(&self) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        async fn stop(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }

        async fn stop_session(&self) {
            self.session_stops.fetch_add(1, Ordering::SeqCst);
        }

        fn schedule_reconnect(&self, kind: ReconnectKind) {
            self.reconnects.lock().push(kind);
        }

        async fn start_workers(&self) {
            self.workers_running.store(true, Ordering::SeqCst);
        }

        async fn stop_workers(&self) {
            self.workers_running.store(false, Ordering::SeqCst);
        }
    }

    fn fast_config() -> SyncConfig {
        SyncConfig { sync_all_backoff_base_ms: 5, sync_all_max_backoff_ms: 20, ..SyncConfig::default() }
    }

    fn manager(
        synchronizer: Arc<FakeSynchronizer>,
        push: Option<Arc<FakePush>>,
        config: &SyncConfig,
    ) -> (Arc<SyncManager>, mpsc::UnboundedSender<StreamingStatus>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let push = push.map(|p| p as Arc<dyn PushSession>);
        let manager = SyncManager::new(synchronizer, push, rx, config, Arc::new(NoopTelemetry));
        (Arc::new(manager), tx)
    }

    #[tokio::test]
    async fn retries_initial_sync_until_ready() {
        let synchronizer = Arc::new(FakeSynchronizer {
            failures_before_ready: AtomicUsize::new(2),
            ..FakeSynchronizer::default()
        });
        let config = SyncConfig { streaming_enabled: false, ..fast_config() };
        let (manager, _tx) = manager(Arc::clone(&synchronizer), None, &config);

        manager.start().unwrap();
        assert!(manager.block_until_ready(Duration::from_secs(2)).await);
        assert_eq!(synchronizer.sync_all_calls.load(Ordering::SeqCst), 3);

        assert_eventually_async!(Duration::from_secs(1), async {
            manager.mode() == SyncMode::PollingOnly
        });
        assert!(synchronizer.polling.load(Ordering::SeqCst));
        manager.stop().await;
    }

    #[tokio::test]
    async fn not_ready_within_timeout_is_reported() {
        let synchronizer = Arc::new(FakeSynchronizer {
            failures_before_ready: AtomicUsize::new(usize::MAX),
            ..FakeSynchronizer::default()
        });
        let (manager, _tx) = manager(synchronizer, None, &fast_config());

        manager.start().unwrap();
        assert!(!manager.block_until_ready(Duration::from_millis(50)).await);
        manager.stop().await;
    }

    #[tokio::test]
    async fn streaming_connect_pauses_polling() {
        let synchronizer = Arc::new(FakeSynchronizer::default());
        let push = Arc::new(FakePush::default());
        let (manager, tx) = manager(Arc::clone(&synchronizer), Some(Arc::clone(&push)), &fast_config());

        manager.start().unwrap();
        assert_eventually_async!(Duration::from_secs(1), async {
            push.starts.load(Ordering::SeqCst) == 1
        });
        assert!(synchronizer.polling.load(Ordering::SeqCst));

        tx.send(StreamingStatus::Connected).unwrap();
        assert_eventually_async!(Duration::from_secs(1), async { manager.is_streaming() });
        assert!(!synchronizer.polling.load(Ordering::SeqCst));
        assert!(push.workers_running.load(Ordering::SeqCst));

        tx.send(StreamingStatus::SubsystemDown).unwrap();
        assert_eventually_async!(Duration::from_secs(1), async {
            manager.mode() == SyncMode::PollingOnly
        });
        assert!(synchronizer.polling.load(Ordering::SeqCst));
        assert!(!push.workers_running.load(Ordering::SeqCst));
        manager.stop().await;
    }

    #[tokio::test]
    async fn stream_errors_resume_polling_and_reconnect() {
        let synchronizer = Arc::new(FakeSynchronizer::default());
        let push = Arc::new(FakePush::default());
        let (manager, tx) = manager(Arc::clone(&synchronizer), Some(Arc::clone(&push)), &fast_config());
        manager.start().unwrap();
        assert!(manager.block_until_ready(Duration::from_secs(1)).await);

        tx.send(StreamingStatus::Connected).unwrap();
        tx.send(StreamingStatus::RetryableError).unwrap();
        tx.send(StreamingStatus::NonRetryableError).unwrap();

        assert_eventually_async!(Duration::from_secs(1), async {
            push.reconnects.lock().len() == 2
        });
        assert_eq!(
            *push.reconnects.lock(),
            vec![ReconnectKind::Retryable, ReconnectKind::NonRetryable]
        );
        assert_eq!(push.session_stops.load(Ordering::SeqCst), 2);
        assert!(synchronizer.polling.load(Ordering::SeqCst));
        assert!(!manager.is_streaming());
        manager.stop().await;
    }

    #[tokio::test]
    async fn subsystem_off_is_terminal() {
        let synchronizer = Arc::new(FakeSynchronizer::default());
        let push = Arc::new(FakePush::default());
        let (manager, tx) = manager(Arc::clone(&synchronizer), Some(Arc::clone(&push)), &fast_config());
        manager.start().unwrap();
        assert!(manager.block_until_ready(Duration::from_secs(1)).await);

        tx.send(StreamingStatus::SubsystemOff).unwrap();
        tx.send(StreamingStatus::Connected).unwrap();

        assert_eventually_async!(Duration::from_secs(1), async {
            push.stops.load(Ordering::SeqCst) == 1
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(manager.mode(), SyncMode::PollingOnly);
        assert!(synchronizer.polling.load(Ordering::SeqCst));
        manager.stop().await;
    }

    #[tokio::test]
    async fn lifecycle_calls_are_idempotent() {
        let synchronizer = Arc::new(FakeSynchronizer::default());
        let (manager, _tx) = manager(synchronizer, None, &fast_config());

        manager.start().unwrap();
        manager.start().unwrap();
        manager.stop().await;
        manager.stop().await;

        assert_eq!(manager.start(), Err(SyncManagerError::AlreadyStopped));
        assert_eq!(manager.mode(), SyncMode::Stopped);
    }
}
