//! Authenticated JSON GETs against the control plane
//!
//! Transport retries are left to [`HttpClient`]; classification of the final
//! status happens here so every caller sees an [`ApiError`].

use std::sync::Arc;

use reqwest::header::{AUTHORIZATION, CACHE_CONTROL};
use reqwest::{Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

use super::errors::ApiError;
use crate::http::HttpClient;

/// Base URL plus bearer key shared by the definitions and auth clients
#[derive(Clone)]
pub struct ApiClient {
    http: Arc<HttpClient>,
    base_url: Url,
    api_key: String,
}

impl ApiClient {
    /// # Errors
    /// `ApiError::Config` when `base_url` cannot be parsed or cannot carry a
    /// path.
    pub fn new(
        http: Arc<HttpClient>,
        base_url: &str,
        api_key: impl Into<String>,
    ) -> Result<Self, ApiError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ApiError::Config(format!("invalid base URL '{base_url}': {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(ApiError::Config(format!("'{base_url}' cannot be a base URL")));
        }
        Ok(Self { http, base_url, api_key: api_key.into() })
    }

    /// `{base}/{segments...}` with each segment percent-encoded.
    pub fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// GET `url` and decode the JSON body.
    #[instrument(skip(self, url), fields(path = %url.path()))]
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        query: &[(&str, String)],
        no_cache: bool,
    ) -> Result<T, ApiError> {
        let mut request = self
            .http
            .request(Method::GET, url.clone())
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
            .query(query);
        if no_cache {
            request = request.header(CACHE_CONTROL, "no-cache");
        }

        let response = self.http.send(request).await.map_err(ApiError::from)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::from_status(status, url.path(), &body));
        }
        if status == StatusCode::NO_CONTENT {
            return Err(ApiError::Decode(format!("{} returned no content", url.path())));
        }

        let body = response.bytes().await.map_err(|e| ApiError::Network(e.to_string()))?;
        debug!(bytes = body.len(), "GET request successful");
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::Decode(format!("failed to parse {}: {e}", url.path())))
    }
}
