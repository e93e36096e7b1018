//! In-memory definition caches
//!
//! Both caches are the single arbiter of "is this data newer": every write
//! path (periodic fetchers, stream workers, kill notifications) goes through
//! their change-number comparison, which makes applying the same update
//! twice harmless.

pub mod segment_cache;
pub mod split_cache;

pub use segment_cache::SegmentCache;
pub use split_cache::{ApplySummary, SplitCache};
