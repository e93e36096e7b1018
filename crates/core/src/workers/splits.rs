//! Flag update queue consumer

use std::sync::Arc;

use flagsync_common::lifecycle::{ManagedTask, TaskError};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, instrument, warn};

use super::WORKER_DRAIN_TIMEOUT;
use crate::cache::SplitCache;
use crate::sync::ports::Synchronizer;

/// Drains flag change numbers and triggers targeted fetches
pub struct SplitsWorker {
    tx: mpsc::UnboundedSender<i64>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<i64>>>,
    cache: Arc<SplitCache>,
    synchronizer: Arc<dyn Synchronizer>,
    task: ManagedTask,
}

impl SplitsWorker {
    pub fn new(cache: Arc<SplitCache>, synchronizer: Arc<dyn Synchronizer>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
            cache,
            synchronizer,
            task: ManagedTask::new("splits-worker").with_join_timeout(WORKER_DRAIN_TIMEOUT),
        }
    }

    /// Queue a change number; never blocks.
    pub fn add_to_queue(&self, change_number: i64) {
        if self.tx.send(change_number).is_err() {
            warn!(change_number, "Splits queue closed, notification dropped");
        }
    }

    /// Apply a kill locally right away, then queue a fetch for the full
    /// definition.
    ///
    /// Kills not newer than the last change set applied are dropped.
    pub fn kill_split(&self, change_number: i64, split_name: &str, default_treatment: &str) {
        let current = self.cache.change_number();
        if change_number <= current {
            debug!(split = %split_name, change_number, current, "Stale split kill skipped");
            return;
        }
        if self.cache.kill(change_number, split_name, default_treatment) {
            debug!(split = %split_name, change_number, "Split killed locally");
        }
        self.add_to_queue(change_number);
    }

    #[instrument(skip(self))]
    pub fn start(&self) {
        let rx = Arc::clone(&self.rx);
        let cache = Arc::clone(&self.cache);
        let synchronizer = Arc::clone(&self.synchronizer);

        match self.task.spawn(move |cancel| async move {
            let mut rx = rx.lock_owned().await;
            loop {
                let change_number = tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    next = rx.recv() => match next {
                        Some(change_number) => change_number,
                        None => break,
                    },
                };
                process(&cache, synchronizer.as_ref(), change_number).await;
            }
            debug!("Splits worker stopped");
        }) {
            Ok(()) => debug!("Splits worker started"),
            Err(TaskError::AlreadyRunning { .. }) => debug!("Splits worker already running"),
            Err(e) => error!(error = %e, "Failed to start splits worker"),
        }
    }

    /// Stop consuming; the item in flight completes first.
    #[instrument(skip(self))]
    pub async fn stop(&self) {
        self.task.stop_quietly().await;
    }

    pub fn is_running(&self) -> bool {
        self.task.is_running()
    }
}

async fn process(cache: &SplitCache, synchronizer: &dyn Synchronizer, change_number: i64) {
    let current = cache.change_number();
    if change_number <= current {
        debug!(change_number, current, "Stale split notification skipped");
        return;
    }
    if let Err(e) = synchronizer.synchronize_splits(Some(change_number)).await {
        error!(change_number, error = %e, "Split synchronization failed");
    }
}
