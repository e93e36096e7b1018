//! Definitions API: `splitChanges` and `segmentChanges`

use std::sync::Arc;

use async_trait::async_trait;
use flagsync_core::{SegmentChangeFetcher, SplitChangeFetcher};
use flagsync_domain::{FetchOptions, Result, SegmentChange, SplitChanges};
use tracing::debug;

use super::client::ApiClient;
use super::errors::ApiError;
use crate::http::HttpClient;

/// HTTP adapter for both definition fetcher ports
#[derive(Clone)]
pub struct DefinitionsApiClient {
    api: ApiClient,
}

impl DefinitionsApiClient {
    /// # Errors
    /// `FlagSyncError::Config` for an unusable `sdk_url`.
    pub fn new(http: Arc<HttpClient>, sdk_url: &str, api_key: impl Into<String>) -> Result<Self> {
        Ok(Self { api: ApiClient::new(http, sdk_url, api_key)? })
    }

    fn query(since: i64, options: FetchOptions) -> Vec<(&'static str, String)> {
        let mut query = vec![("since", since.to_string())];
        if let Some(till) = options.till {
            query.push(("till", till.to_string()));
        }
        query
    }
}

#[async_trait]
impl SplitChangeFetcher for DefinitionsApiClient {
    async fn fetch_split_changes(&self, since: i64, options: FetchOptions) -> Result<SplitChanges> {
        let url = self.api.endpoint(&["splitChanges"]);
        let changes: SplitChanges =
            self.api.get_json(url, &Self::query(since, options), options.no_cache).await?;
        debug!(since, till = changes.till, count = changes.splits.len(), "Fetched split changes");
        Ok(changes)
    }
}

#[async_trait]
impl SegmentChangeFetcher for DefinitionsApiClient {
    async fn fetch_segment_changes(
        &self,
        name: &str,
        since: i64,
        options: FetchOptions,
    ) -> Result<SegmentChange> {
        let url = self.api.endpoint(&["segmentChanges", name]);
        let change: SegmentChange =
            self.api.get_json(url, &Self::query(since, options), options.no_cache).await?;
        if change.name != name {
            return Err(ApiError::Decode(format!(
                "asked for segment '{name}', got '{}'",
                change.name
            ))
            .into());
        }
        debug!(
            segment = name,
            since,
            till = change.till,
            added = change.added.len(),
            removed = change.removed.len(),
            "Fetched segment changes"
        );
        Ok(change)
    }
}
