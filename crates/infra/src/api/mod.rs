//! Control-plane API clients
//!
//! - [`DefinitionsApiClient`]: flag and segment change sets
//! - [`AuthApiClient`]: streaming tokens
//!
//! Both go through [`crate::http::HttpClient`] and classify failures with
//! [`ApiError`] before handing them to the core as `FlagSyncError`.

pub mod auth;
pub mod client;
pub mod errors;
pub mod sdk_client;

pub use auth::{decode_token, AuthApiClient, TokenGrant};
pub use client::ApiClient;
pub use errors::{ApiError, ApiErrorCategory};
pub use sdk_client::DefinitionsApiClient;
