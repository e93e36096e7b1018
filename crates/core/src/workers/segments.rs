//! Segment update queue consumer

use std::sync::Arc;

use flagsync_common::lifecycle::{ManagedTask, TaskError};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, instrument, warn};

use super::WORKER_DRAIN_TIMEOUT;
use crate::cache::SegmentCache;
use crate::sync::ports::Synchronizer;

#[derive(Debug)]
struct SegmentQueueItem {
    segment_name: String,
    change_number: i64,
}

/// Drains segment notifications and triggers targeted fetches
pub struct SegmentsWorker {
    tx: mpsc::UnboundedSender<SegmentQueueItem>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<SegmentQueueItem>>>,
    cache: Arc<SegmentCache>,
    synchronizer: Arc<dyn Synchronizer>,
    task: ManagedTask,
}

impl SegmentsWorker {
    pub fn new(cache: Arc<SegmentCache>, synchronizer: Arc<dyn Synchronizer>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
            cache,
            synchronizer,
            task: ManagedTask::new("segments-worker").with_join_timeout(WORKER_DRAIN_TIMEOUT),
        }
    }

    pub fn add_to_queue(&self, change_number: i64, segment_name: &str) {
        let item = SegmentQueueItem { segment_name: segment_name.to_string(), change_number };
        if self.tx.send(item).is_err() {
            warn!(segment = %segment_name, change_number, "Segments queue closed, notification dropped");
        }
    }

    #[instrument(skip(self))]
    pub fn start(&self) {
        let rx = Arc::clone(&self.rx);
        let cache = Arc::clone(&self.cache);
        let synchronizer = Arc::clone(&self.synchronizer);

        match self.task.spawn(move |cancel| async move {
            let mut rx = rx.lock_owned().await;
            loop {
                let item = tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    next = rx.recv() => match next {
                        Some(item) => item,
                        None => break,
                    },
                };
                process(&cache, synchronizer.as_ref(), item).await;
            }
            debug!("Segments worker stopped");
        }) {
            Ok(()) => debug!("Segments worker started"),
            Err(TaskError::AlreadyRunning { .. }) => debug!("Segments worker already running"),
            Err(e) => error!(error = %e, "Failed to start segments worker"),
        }
    }

    #[instrument(skip(self))]
    pub async fn stop(&self) {
        self.task.stop_quietly().await;
    }

    pub fn is_running(&self) -> bool {
        self.task.is_running()
    }
}

async fn process(cache: &SegmentCache, synchronizer: &dyn Synchronizer, item: SegmentQueueItem) {
    let SegmentQueueItem { segment_name, change_number } = item;
    let current = cache.change_number(&segment_name);
    if change_number <= current {
        debug!(segment = %segment_name, change_number, current, "Stale segment notification skipped");
        return;
    }
    if let Err(e) = synchronizer.synchronize_segment(&segment_name, Some(change_number)).await {
        error!(segment = %segment_name, change_number, error = %e, "Segment synchronization failed");
    }
}
