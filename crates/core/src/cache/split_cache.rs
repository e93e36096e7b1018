//! Concurrent flag definition cache

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};

use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use flagsync_domain::constants::EMPTY_CHANGE_NUMBER;
use flagsync_domain::{Split, SplitChanges};
use tracing::{debug, error};

/// Counts of what a change set did to the cache
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplySummary {
    pub upserted: usize,
    pub removed: usize,
    pub stale: usize,
}

impl ApplySummary {
    pub const fn changed(&self) -> bool {
        self.upserted > 0 || self.removed > 0
    }
}

/// Flag definitions keyed by name, with per-traffic-type reference counts
///
/// Lock order is always `splits` entry, then `traffic_types` or
/// `killed_locally`.
#[derive(Debug)]
pub struct SplitCache {
    splits: DashMap<String, Split>,
    traffic_types: DashMap<String, usize>,
    /// Entries patched by [`kill`](Self::kill) and not yet replaced by a
    /// server definition.
    killed_locally: DashSet<String>,
    change_number: AtomicI64,
}

impl Default for SplitCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SplitCache {
    pub fn new() -> Self {
        Self {
            splits: DashMap::new(),
            traffic_types: DashMap::new(),
            killed_locally: DashSet::new(),
            change_number: AtomicI64::new(EMPTY_CHANGE_NUMBER),
        }
    }

    /// Insert or replace a definition; returns whether the name was present.
    ///
    /// A definition whose change number is not newer than the stored one is
    /// discarded, except that a locally killed entry is replaced by the
    /// server definition at the same change number.
    pub fn upsert(&self, split: Split) -> bool {
        self.upsert_checked(split).0
    }

    /// Returns `(was_present, applied)`.
    fn upsert_checked(&self, split: Split) -> (bool, bool) {
        match self.splits.entry(split.name.clone()) {
            Entry::Occupied(mut entry) => {
                let current = entry.get();
                let patched = split.change_number == current.change_number
                    && self.killed_locally.contains(&split.name);
                if split.change_number <= current.change_number && !patched {
                    debug!(
                        split = %split.name,
                        incoming = split.change_number,
                        current = current.change_number,
                        "Ignoring stale split update"
                    );
                    return (true, false);
                }
                self.decrease_traffic_type(current.traffic_type_name.as_deref());
                self.killed_locally.remove(&split.name);
                let traffic_type = split.traffic_type_name.clone();
                entry.insert(split);
                self.increase_traffic_type(traffic_type.as_deref());
                (true, true)
            }
            Entry::Vacant(entry) => {
                let traffic_type = split.traffic_type_name.clone();
                entry.insert(split);
                self.increase_traffic_type(traffic_type.as_deref());
                (false, true)
            }
        }
    }

    /// Remove a definition; returns whether it was present.
    pub fn remove(&self, name: &str) -> bool {
        match self.splits.entry(name.to_string()) {
            Entry::Occupied(entry) => {
                self.decrease_traffic_type(entry.get().traffic_type_name.as_deref());
                self.killed_locally.remove(name);
                entry.remove();
                true
            }
            Entry::Vacant(_) => false,
        }
    }

    pub fn get(&self, name: &str) -> Option<Split> {
        self.splits.get(name).map(|entry| entry.value().clone())
    }

    pub fn get_all(&self) -> Vec<Split> {
        self.splits.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn fetch_many(&self, names: &[&str]) -> HashMap<String, Option<Split>> {
        names.iter().map(|name| ((*name).to_string(), self.get(name))).collect()
    }

    pub fn split_names(&self) -> Vec<String> {
        self.splits.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Record the last change-set version applied.
    ///
    /// A regression is logged but still stored: refusing it could leave the
    /// sync loop asking for the same range forever.
    pub fn set_change_number(&self, change_number: i64) {
        let previous = self.change_number.swap(change_number, Ordering::AcqRel);
        if change_number < previous {
            error!(
                previous,
                change_number, "Split cache change number moved backwards"
            );
        }
    }

    pub fn change_number(&self) -> i64 {
        self.change_number.load(Ordering::Acquire)
    }

    /// Mark a flag killed with a new default treatment.
    ///
    /// No-op (returns `false`) when the flag is unknown or `change_number` is
    /// not newer than the stored definition.
    pub fn kill(&self, change_number: i64, name: &str, default_treatment: &str) -> bool {
        let Some(mut split) = self.splits.get_mut(name) else {
            debug!(split = %name, "Kill for unknown split ignored");
            return false;
        };
        if change_number <= split.change_number {
            debug!(
                split = %name,
                incoming = change_number,
                current = split.change_number,
                "Ignoring stale split kill"
            );
            return false;
        }
        split.killed = true;
        split.default_treatment = default_treatment.to_string();
        split.change_number = change_number;
        self.killed_locally.insert(name.to_string());
        true
    }

    pub fn traffic_type_exists(&self, traffic_type: &str) -> bool {
        self.traffic_types.get(traffic_type).is_some_and(|count| *count > 0)
    }

    /// Apply a `splitChanges` response: archived definitions are removed,
    /// active ones upserted, then the cache-wide change number moves to
    /// `till`.
    pub fn apply_changes(&self, changes: SplitChanges) -> ApplySummary {
        let mut summary = ApplySummary::default();
        for split in changes.splits {
            if split.is_archived() {
                if self.remove(&split.name) {
                    summary.removed += 1;
                }
                continue;
            }
            if self.upsert_checked(split).1 {
                summary.upserted += 1;
            } else {
                summary.stale += 1;
            }
        }
        self.set_change_number(changes.till);
        summary
    }

    /// Union of segments referenced by live definitions.
    pub fn segment_names(&self) -> BTreeSet<String> {
        self.splits.iter().flat_map(|entry| entry.value().segment_names()).collect()
    }

    pub fn len(&self) -> usize {
        self.splits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.splits.is_empty()
    }

    pub fn clear(&self) {
        self.splits.clear();
        self.traffic_types.clear();
        self.killed_locally.clear();
        self.change_number.store(EMPTY_CHANGE_NUMBER, Ordering::Release);
    }

    fn increase_traffic_type(&self, traffic_type: Option<&str>) {
        if let Some(traffic_type) = traffic_type {
            *self.traffic_types.entry(traffic_type.to_string()).or_insert(0) += 1;
        }
    }

    fn decrease_traffic_type(&self, traffic_type: Option<&str>) {
        let Some(traffic_type) = traffic_type else {
            return;
        };
        if let Entry::Occupied(mut entry) = self.traffic_types.entry(traffic_type.to_string()) {
            let count = entry.get_mut();
            *count = count.saturating_sub(1);
            if *count == 0 {
                entry.remove();
            }
        }
    }
}
