//! Definition synchronization: fetchers, resync entry points, orchestration

pub mod error;
pub mod fetchers;
pub mod ports;
pub mod readiness;
pub mod sync_manager;
pub mod synchronizer;

pub use error::SyncManagerError;
pub use fetchers::{effective_rate, SegmentFetcher, SplitFetcher};
pub use ports::{
    PushSession, ReconnectKind, SegmentChangeFetcher, SplitChangeFetcher, Synchronizer,
};
pub use readiness::ReadinessGate;
pub use sync_manager::{SyncManager, SyncMode};
pub use synchronizer::SynchronizerService;
