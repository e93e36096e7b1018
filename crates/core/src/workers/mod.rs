//! Background consumers of stream update queues

use std::time::Duration;

pub mod segments;
pub mod splits;

pub use segments::SegmentsWorker;
pub use splits::SplitsWorker;

/// How long a stopping worker may spend finishing its in-flight item
pub(crate) const WORKER_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);
