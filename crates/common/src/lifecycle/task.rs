//! Start-once, cancel, bounded-join wrapper around a tokio task

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Task lifecycle errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TaskError {
    #[error("Task '{name}' already running")]
    AlreadyRunning { name: &'static str },

    #[error("Task '{name}' not running")]
    NotRunning { name: &'static str },

    #[error("Task '{name}' did not stop within {duration:?}")]
    Timeout { name: &'static str, duration: Duration },

    #[error("Task '{name}' join failed: {message}")]
    JoinFailed { name: &'static str, message: String },
}

pub type TaskResult<T> = Result<T, TaskError>;

struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// A restartable background task bound to a cancellation token
pub struct ManagedTask {
    name: &'static str,
    join_timeout: Duration,
    running: Mutex<Option<Running>>,
}

impl ManagedTask {
    pub const fn new(name: &'static str) -> Self {
        Self { name, join_timeout: DEFAULT_JOIN_TIMEOUT, running: Mutex::new(None) }
    }

    #[must_use]
    pub const fn with_join_timeout(mut self, join_timeout: Duration) -> Self {
        self.join_timeout = join_timeout;
        self
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Spawn `body` with a fresh cancellation token.
    ///
    /// # Errors
    /// `TaskError::AlreadyRunning` when a previous run has not finished.
    pub fn spawn<F, Fut>(&self, body: F) -> TaskResult<()>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut running = self.running.lock();
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            return Err(TaskError::AlreadyRunning { name: self.name });
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(body(cancel.clone()));
        *running = Some(Running { cancel, handle });
        debug!(task = self.name, "Task started");
        Ok(())
    }

    /// Request cancellation without waiting.
    pub fn cancel(&self) {
        if let Some(running) = self.running.lock().as_ref() {
            running.cancel.cancel();
        }
    }

    /// Cancel and wait (bounded) for the task to acknowledge.
    ///
    /// A task that overruns the join timeout is aborted.
    ///
    /// # Errors
    /// `NotRunning` if nothing was started, `Timeout` if the task had to be
    /// aborted, `JoinFailed` if it panicked.
    pub async fn stop(&self) -> TaskResult<()> {
        let running = self.running.lock().take();
        let Some(Running { cancel, mut handle }) = running else {
            return Err(TaskError::NotRunning { name: self.name });
        };

        cancel.cancel();
        match tokio::time::timeout(self.join_timeout, &mut handle).await {
            Ok(Ok(())) => {
                debug!(task = self.name, "Task stopped");
                Ok(())
            }
            Ok(Err(e)) if e.is_cancelled() => Ok(()),
            Ok(Err(e)) => Err(TaskError::JoinFailed { name: self.name, message: e.to_string() }),
            Err(_) => {
                warn!(task = self.name, timeout = ?self.join_timeout, "Task overran stop, aborting");
                handle.abort();
                Err(TaskError::Timeout { name: self.name, duration: self.join_timeout })
            }
        }
    }

    /// Like [`stop`](Self::stop) but treats "not running" as success and logs
    /// other failures instead of returning them.
    pub async fn stop_quietly(&self) {
        match self.stop().await {
            Ok(()) | Err(TaskError::NotRunning { .. }) => {}
            Err(e) => warn!(task = self.name, error = %e, "Task stop failed"),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().as_ref().is_some_and(|r| !r.handle.is_finished())
    }
}

impl Drop for ManagedTask {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.cancel.cancel();
        }
    }
}

impl std::fmt::Debug for ManagedTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedTask")
            .field("name", &self.name)
            .field("running", &self.is_running())
            .finish()
    }
}
