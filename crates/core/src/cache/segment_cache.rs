//! Concurrent segment membership cache
//!
//! Each segment lives in its own map entry; all mutations of one segment
//! (membership and change number) happen under that entry's lock, while
//! different segments are refreshed independently.

use std::collections::{BTreeSet, HashSet};

use dashmap::DashMap;
use flagsync_domain::constants::EMPTY_CHANGE_NUMBER;
use flagsync_domain::SegmentChange;
use tracing::{debug, error};

#[derive(Debug)]
struct SegmentEntry {
    keys: HashSet<String>,
    change_number: i64,
}

impl Default for SegmentEntry {
    fn default() -> Self {
        Self { keys: HashSet::new(), change_number: EMPTY_CHANGE_NUMBER }
    }
}

/// Segment name to (member keys, change number)
#[derive(Debug, Default)]
pub struct SegmentCache {
    segments: DashMap<String, SegmentEntry>,
}

impl SegmentCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_to_segment(&self, name: &str, keys: &[String]) {
        let mut entry = self.segments.entry(name.to_string()).or_default();
        entry.keys.extend(keys.iter().cloned());
    }

    pub fn remove_from_segment(&self, name: &str, keys: &[String]) {
        if let Some(mut entry) = self.segments.get_mut(name) {
            for key in keys {
                entry.keys.remove(key);
            }
        }
    }

    pub fn is_in_segment(&self, name: &str, key: &str) -> bool {
        self.segments.get(name).is_some_and(|entry| entry.keys.contains(key))
    }

    /// Stores `change_number`, logging when it moves backwards.
    pub fn set_change_number(&self, name: &str, change_number: i64) {
        let mut entry = self.segments.entry(name.to_string()).or_default();
        if change_number < entry.change_number {
            error!(
                segment = %name,
                previous = entry.change_number,
                change_number,
                "Segment change number moved backwards"
            );
        }
        entry.change_number = change_number;
    }

    /// `-1` for segments never fetched.
    pub fn change_number(&self, name: &str) -> i64 {
        self.segments.get(name).map_or(EMPTY_CHANGE_NUMBER, |entry| entry.change_number)
    }

    /// Apply one `segmentChanges` page atomically.
    ///
    /// Returns `false` without touching the segment when `till` is not newer
    /// than what is stored.
    pub fn apply_change(&self, change: &SegmentChange) -> bool {
        let mut entry = self.segments.entry(change.name.clone()).or_default();
        if change.till <= entry.change_number {
            debug!(
                segment = %change.name,
                incoming = change.till,
                current = entry.change_number,
                "Ignoring stale segment change"
            );
            return false;
        }
        for key in &change.removed {
            entry.keys.remove(key);
        }
        entry.keys.extend(change.added.iter().cloned());
        entry.change_number = change.till;
        true
    }

    pub fn segment_names(&self) -> BTreeSet<String> {
        self.segments.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Total member keys across segments.
    pub fn keys_count(&self) -> usize {
        self.segments.iter().map(|entry| entry.keys.len()).sum()
    }

    pub fn clear(&self) {
        self.segments.clear();
    }
}
