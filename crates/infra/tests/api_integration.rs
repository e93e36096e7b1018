//! Integration tests for the control-plane API clients
//!
//! **Coverage:**
//! - `splitChanges` / `segmentChanges` request shape and decoding
//! - Status classification surfaced as `FlagSyncError`
//! - `/v2/auth` token decoding, disabled streaming and rejected keys

mod support;

use std::sync::Arc;

use flagsync_core::{AuthApi, SegmentChangeFetcher, SplitChangeFetcher};
use flagsync_domain::{FetchOptions, FlagSyncError, HttpConfig};
use flagsync_infra::{AuthApiClient, DefinitionsApiClient, HttpClient};
use support::{jwt, split_json};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn http() -> Arc<HttpClient> {
    support::init_tracing();
    Arc::new(HttpClient::from_config(&HttpConfig::default()).expect("http client"))
}

#[tokio::test]
async fn fetches_split_changes_with_bearer_key() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/splitChanges"))
        .and(query_param("since", "-1"))
        .and(header("authorization", "Bearer sdk-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "splits": [split_json("checkout", 120, Some("beta_users"))],
            "since": -1,
            "till": 120,
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = DefinitionsApiClient::new(http(), &format!("{}/api", server.uri()), "sdk-key")
        .expect("definitions client");
    let changes = client.fetch_split_changes(-1, FetchOptions::default()).await.expect("changes");

    assert_eq!(changes.till, 120);
    assert_eq!(changes.splits.len(), 1);
    assert_eq!(changes.splits[0].name, "checkout");
    assert_eq!(changes.splits[0].segment_names(), vec!["beta_users".to_string()]);
}

#[tokio::test]
async fn on_demand_fetch_sends_till_and_no_cache() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/splitChanges"))
        .and(query_param("since", "100"))
        .and(query_param("till", "150"))
        .and(header("cache-control", "no-cache"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "splits": [],
            "since": 100,
            "till": 150,
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client =
        DefinitionsApiClient::new(http(), &server.uri(), "sdk-key").expect("definitions client");
    let changes =
        client.fetch_split_changes(100, FetchOptions::on_demand(150)).await.expect("changes");

    assert_eq!(changes.till, 150);
}

#[tokio::test]
async fn fetches_segment_changes_with_encoded_name() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/segmentChanges/beta%20users"))
        .and(query_param("since", "-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "name": "beta users",
            "added": ["alice", "bob"],
            "removed": [],
            "since": -1,
            "till": 42,
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = DefinitionsApiClient::new(http(), &format!("{}/api", server.uri()), "sdk-key")
        .expect("definitions client");
    let change = client
        .fetch_segment_changes("beta users", -1, FetchOptions::default())
        .await
        .expect("segment change");

    assert_eq!(change.added, vec!["alice".to_string(), "bob".to_string()]);
    assert_eq!(change.till, 42);
}

#[tokio::test]
async fn http_failures_are_errors_not_empty_results() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/splitChanges"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/segmentChanges/missing"))
        .respond_with(ResponseTemplate::new(400).set_body_string("unknown segment"))
        .mount(&server)
        .await;

    let client =
        DefinitionsApiClient::new(http(), &server.uri(), "sdk-key").expect("definitions client");

    let splits = client.fetch_split_changes(5, FetchOptions::default()).await.unwrap_err();
    assert!(splits.is_retryable(), "5xx should be retryable: {splits:?}");

    let segment =
        client.fetch_segment_changes("missing", 5, FetchOptions::default()).await.unwrap_err();
    assert!(matches!(&segment, FlagSyncError::Client(msg) if msg.contains("unknown segment")));
}

#[tokio::test]
async fn malformed_bodies_are_protocol_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/splitChanges"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let client =
        DefinitionsApiClient::new(http(), &server.uri(), "sdk-key").expect("definitions client");
    let err = client.fetch_split_changes(-1, FetchOptions::default()).await.unwrap_err();

    assert!(matches!(err, FlagSyncError::Protocol(_)));
}

#[tokio::test]
async fn authenticates_and_decodes_channels() {
    let token = jwt(&["xxxx_splits", "xxxx_segments", "control_pri", "control_sec"], 2_000_000_000);
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v2/auth"))
        .and(header("authorization", "Bearer sdk-key"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "pushEnabled": true, "token": token })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = AuthApiClient::new(http(), &format!("{}/api", server.uri()), "sdk-key")
        .expect("auth client");
    let response = client.authenticate().await.expect("auth response");

    assert!(response.push_enabled);
    assert_eq!(response.token.as_deref(), Some(token.as_str()));
    assert_eq!(
        response.channels,
        vec![
            "[?occupancy=metrics.publishers]control_pri".to_string(),
            "[?occupancy=metrics.publishers]control_sec".to_string(),
            "xxxx_segments".to_string(),
            "xxxx_splits".to_string(),
        ]
    );
    assert_eq!(response.expires_at.map(|at| at.timestamp()), Some(2_000_000_000));
}

#[tokio::test]
async fn push_disabled_yields_no_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/auth"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "pushEnabled": false })),
        )
        .mount(&server)
        .await;

    let client = AuthApiClient::new(http(), &server.uri(), "sdk-key").expect("auth client");
    let response = client.authenticate().await.expect("auth response");

    assert!(!response.push_enabled);
    assert!(response.token.is_none());
    assert!(response.channels.is_empty());
}

#[tokio::test]
async fn rejected_keys_are_auth_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/auth"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let client = AuthApiClient::new(http(), &server.uri(), "revoked").expect("auth client");
    let err = client.authenticate().await.unwrap_err();

    assert!(matches!(err, FlagSyncError::Auth(_)));
}

#[tokio::test]
async fn other_auth_failures_are_retryable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/auth"))
        .respond_with(ResponseTemplate::new(400))
        .mount(&server)
        .await;
    let bad_token = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/auth"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "pushEnabled": true, "token": "garbage" })),
        )
        .mount(&bad_token)
        .await;

    for uri in [server.uri(), bad_token.uri()] {
        let client = AuthApiClient::new(http(), &uri, "sdk-key").expect("auth client");
        let err = client.authenticate().await.unwrap_err();
        assert!(err.is_retryable(), "{err:?}");
        assert!(!matches!(err, FlagSyncError::Auth(_)));
    }
}

#[test]
fn rejects_unusable_base_urls() {
    let err = DefinitionsApiClient::new(http(), "not a url", "sdk-key").err();
    assert!(matches!(err, Some(FlagSyncError::Config(_))));
}
