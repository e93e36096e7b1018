//! Flag and segment definitions as served by the definitions API

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::constants::EMPTY_CHANGE_NUMBER;

/// Lifecycle status of a flag definition
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SplitStatus {
    #[default]
    Active,
    Archived,
}

/// A versioned feature-flag definition
///
/// Only the fields the sync layer reasons about are typed; everything else
/// (conditions, configurations, seeds) stays in `payload` untouched for the
/// evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Split {
    pub name: String,
    #[serde(default = "empty_change_number")]
    pub change_number: i64,
    #[serde(default)]
    pub traffic_type_name: Option<String>,
    #[serde(default)]
    pub killed: bool,
    #[serde(default)]
    pub default_treatment: String,
    #[serde(default)]
    pub status: SplitStatus,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

const fn empty_change_number() -> i64 {
    EMPTY_CHANGE_NUMBER
}

impl Split {
    pub fn new(name: impl Into<String>, change_number: i64) -> Self {
        Self {
            name: name.into(),
            change_number,
            traffic_type_name: None,
            killed: false,
            default_treatment: "control".to_string(),
            status: SplitStatus::Active,
            payload: Map::new(),
        }
    }

    #[must_use]
    pub fn with_traffic_type(mut self, traffic_type: impl Into<String>) -> Self {
        self.traffic_type_name = Some(traffic_type.into());
        self
    }

    #[must_use]
    pub fn with_status(mut self, status: SplitStatus) -> Self {
        self.status = status;
        self
    }

    /// Names of the segments referenced by `IN_SEGMENT` matchers.
    ///
    /// Walks `conditions[].matcherGroup.matchers[].userDefinedSegmentMatcherData.segmentName`.
    pub fn segment_names(&self) -> Vec<String> {
        let Some(Value::Array(conditions)) = self.payload.get("conditions") else {
            return Vec::new();
        };

        let mut names: Vec<String> = conditions
            .iter()
            .filter_map(|condition| condition.pointer("/matcherGroup/matchers"))
            .filter_map(Value::as_array)
            .flatten()
            .filter_map(|matcher| matcher.pointer("/userDefinedSegmentMatcherData/segmentName"))
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect();
        names.sort();
        names.dedup();
        names
    }

    pub fn is_archived(&self) -> bool {
        self.status == SplitStatus::Archived
    }
}

/// Response of `GET /splitChanges?since=N`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SplitChanges {
    #[serde(default)]
    pub splits: Vec<Split>,
    pub since: i64,
    pub till: i64,
}

/// Response of `GET /segmentChanges/{name}?since=N`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentChange {
    pub name: String,
    #[serde(default)]
    pub added: Vec<String>,
    #[serde(default)]
    pub removed: Vec<String>,
    pub since: i64,
    pub till: i64,
}

impl SegmentChange {
    /// The server has nothing newer than `since`.
    pub const fn is_caught_up(&self) -> bool {
        self.since == self.till
    }
}

/// Per-request knobs for definition fetches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchOptions {
    /// Ask intermediaries to bypass cached responses
    pub no_cache: bool,
    /// Target change number the caller was notified about
    pub till: Option<i64>,
}

impl FetchOptions {
    /// Options for a fetch triggered by a stream notification.
    pub const fn on_demand(till: i64) -> Self {
        Self { no_cache: true, till: Some(till) }
    }
}
