//! Streaming token issuance (`GET {auth}/v2/auth`)
//!
//! The token is a JWT whose payload lists the channels the key may
//! subscribe to (`x-ably-capability`) and its expiry (`exp`).

use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use flagsync_core::AuthApi;
use flagsync_domain::constants::OCCUPANCY_CHANNEL_PREFIX;
use flagsync_domain::{AuthResponse, FlagSyncError, Result};
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use super::client::ApiClient;
use super::errors::ApiError;
use crate::http::HttpClient;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthPayload {
    #[serde(default)]
    push_enabled: bool,
    #[serde(default)]
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenClaims {
    #[serde(rename = "x-ably-capability")]
    capability: String,
    #[serde(default)]
    exp: Option<i64>,
}

/// Channels and expiry carried by a streaming token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub channels: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Decode the JWT payload without verifying the signature.
///
/// Control channels are prefixed so the stream also reports their
/// occupancy.
///
/// # Errors
/// `ApiError::Decode` when the token is not a three-part JWT or its claims
/// are not the expected JSON.
pub fn decode_token(token: &str) -> std::result::Result<TokenGrant, ApiError> {
    let mut parts = token.split('.');
    let payload = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(_), Some(payload), Some(_), None) => payload,
        _ => return Err(ApiError::Decode("token is not a JWT".into())),
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| ApiError::Decode(format!("token payload is not base64url: {e}")))?;
    let claims: TokenClaims = serde_json::from_slice(&bytes)
        .map_err(|e| ApiError::Decode(format!("token claims: {e}")))?;
    let capability: serde_json::Map<String, serde_json::Value> =
        serde_json::from_str(&claims.capability)
            .map_err(|e| ApiError::Decode(format!("token capability: {e}")))?;

    let channels = capability
        .keys()
        .map(|channel| {
            if channel.contains("control") {
                format!("{OCCUPANCY_CHANNEL_PREFIX}{channel}")
            } else {
                channel.clone()
            }
        })
        .collect();
    let expires_at = claims.exp.and_then(|exp| DateTime::from_timestamp(exp, 0));

    Ok(TokenGrant { channels, expires_at })
}

/// HTTP adapter for [`AuthApi`]
#[derive(Clone)]
pub struct AuthApiClient {
    api: ApiClient,
}

impl AuthApiClient {
    /// # Errors
    /// `FlagSyncError::Config` for an unusable `auth_url`.
    pub fn new(http: Arc<HttpClient>, auth_url: &str, api_key: impl Into<String>) -> Result<Self> {
        Ok(Self { api: ApiClient::new(http, auth_url, api_key)? })
    }

    async fn request(&self) -> std::result::Result<AuthResponse, ApiError> {
        let url = self.api.endpoint(&["v2", "auth"]);
        let payload: AuthPayload = self.api.get_json(url, &[], false).await?;

        let token = match payload.token {
            Some(token) if payload.push_enabled && !token.is_empty() => token,
            _ => {
                debug!(push_enabled = payload.push_enabled, "Streaming not granted");
                return Ok(AuthResponse::disabled());
            }
        };

        let grant = decode_token(&token)?;
        Ok(AuthResponse {
            push_enabled: true,
            token: Some(token),
            channels: grant.channels,
            expires_at: grant.expires_at,
        })
    }
}

#[async_trait]
impl AuthApi for AuthApiClient {
    /// Rejected keys surface as `FlagSyncError::Auth`; every other failure
    /// is reported as retryable.
    #[instrument(skip(self))]
    async fn authenticate(&self) -> Result<AuthResponse> {
        match self.request().await {
            Ok(response) => Ok(response),
            Err(ApiError::Auth(message)) => {
                warn!(%message, "Streaming auth rejected");
                Err(FlagSyncError::Auth(message))
            }
            Err(err) if err.should_retry() => Err(err.into()),
            Err(err) => {
                warn!(error = %err, "Streaming auth failed");
                Err(FlagSyncError::Server(format!("auth request failed: {err}")))
            }
        }
    }
}
