//! # FlagSync Core
//!
//! Sync logic with no transport code.
//!
//! This crate contains:
//! - Flag and segment caches
//! - Port interfaces for the definitions API, auth API, stream transport and
//!   telemetry
//! - Notification parsing and routing, update workers
//! - Periodic fetchers, the synchronizer, the push session manager and the
//!   sync orchestrator
//!
//! ## Architecture Principles
//! - Only depends on `flagsync-common` and `flagsync-domain`
//! - No HTTP or socket code
//! - All external collaborators behind traits

pub mod cache;
pub mod notifications;
pub mod push;
pub mod sync;
pub mod telemetry;
pub mod workers;

pub use cache::{ApplySummary, SegmentCache, SplitCache};
pub use notifications::{NotificationManagerKeeper, NotificationParser, NotificationProcessor};
pub use push::{AuthApi, EventSourceClient, PushManager, PushState, StreamHandler};
pub use sync::{
    PushSession, ReadinessGate, ReconnectKind, SegmentChangeFetcher, SegmentFetcher,
    SplitChangeFetcher, SplitFetcher, SyncManager, SyncManagerError, SyncMode, Synchronizer,
    SynchronizerService,
};
pub use telemetry::{NoopTelemetry, TelemetryRuntimeProducer};
pub use workers::{SegmentsWorker, SplitsWorker};
