//! Background task lifecycle management
//!
//! Every long-running loop in the sync subsystem (fetchers, workers, the
//! stream reader, the push session) is owned by a [`ManagedTask`]: started
//! at most once at a time, cancelled cooperatively, and joined with a
//! bounded wait.

pub mod task;

pub use task::{ManagedTask, TaskError, TaskResult};
