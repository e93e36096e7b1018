use flagsync_common::lifecycle::TaskError;
use thiserror::Error;

/// Lifecycle misuse of the sync manager
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SyncManagerError {
    #[error("Sync manager was already stopped")]
    AlreadyStopped,

    #[error(transparent)]
    Task(#[from] TaskError),
}
