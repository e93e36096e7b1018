//! End-to-end tests for the wired sync subsystem
//!
//! **Coverage:**
//! - Polling-only startup reaches readiness with flags and segments cached
//! - `pushEnabled: false` leaves the subsystem polling for good
//! - A live stream delivers a kill that lands in the cache
//!
//! **Infrastructure:**
//! - WireMock for the definitions and auth APIs
//! - A raw TCP server holding the stream open

mod support;

use std::sync::Arc;
use std::time::Duration;

use flagsync_common::assert_eventually_async;
use flagsync_core::{PushState, SyncMode, TelemetryRuntimeProducer};
use flagsync_domain::{Config, StreamingEventKind, SyncConfig};
use flagsync_infra::{RuntimeTelemetry, SyncSubsystem};
use support::{held_open_stream, jwt, message_frame, split_json};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const READY_TIMEOUT: Duration = Duration::from_secs(5);

async fn definitions_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/splitChanges"))
        .and(query_param("since", "-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "splits": [split_json("checkout", 10, Some("beta"))],
            "since": -1,
            "till": 10,
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/splitChanges"))
        .and(query_param("since", "10"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "splits": [],
            "since": 10,
            "till": 10,
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/segmentChanges/beta"))
        .and(query_param("since", "-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "name": "beta",
            "added": ["alice"],
            "removed": [],
            "since": -1,
            "till": 5,
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/segmentChanges/beta"))
        .and(query_param("since", "5"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "name": "beta",
            "added": [],
            "removed": [],
            "since": 5,
            "till": 5,
        })))
        .mount(&server)
        .await;
    server
}

async fn auth_server(body: serde_json::Value) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v2/auth"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(&server)
        .await;
    server
}

fn config(sdk: &MockServer, auth: &MockServer, streaming_url: &str) -> Config {
    let mut config = Config::with_api_key("sdk-key");
    config.urls.sdk = format!("{}/api", sdk.uri());
    config.urls.auth = format!("{}/api", auth.uri());
    config.urls.streaming = streaming_url.to_string();
    config.sync = SyncConfig {
        on_demand_fetch_max_retries: 2,
        on_demand_fetch_retry_delay_ms: 1,
        connect_timeout_ms: 2_000,
        ..SyncConfig::default()
    };
    config
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn polling_only_reaches_readiness() {
    support::init_tracing();
    let sdk = definitions_server().await;
    let auth = auth_server(serde_json::json!({ "pushEnabled": false })).await;
    let mut config = config(&sdk, &auth, "http://127.0.0.1:9/sse");
    config.sync.streaming_enabled = false;

    let subsystem =
        SyncSubsystem::build(&config, Arc::new(RuntimeTelemetry::new())).expect("subsystem");
    subsystem.start().expect("start");

    assert!(subsystem.block_until_ready(READY_TIMEOUT).await);
    assert!(subsystem.is_ready());
    assert_eq!(subsystem.splits().change_number(), 10);
    assert!(subsystem.splits().get("checkout").is_some());
    assert!(subsystem.splits().traffic_type_exists("user"));
    assert!(subsystem.segments().is_in_segment("beta", "alice"));
    assert_eq!(subsystem.mode(), SyncMode::PollingOnly);
    assert_eq!(subsystem.push_state(), None);
    assert!(auth.received_requests().await.unwrap_or_default().is_empty());

    subsystem.stop().await;
    assert_eq!(subsystem.mode(), SyncMode::Stopped);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn streaming_disabled_by_server_keeps_polling() {
    support::init_tracing();
    let sdk = definitions_server().await;
    let auth = auth_server(serde_json::json!({ "pushEnabled": false })).await;
    let config = config(&sdk, &auth, "http://127.0.0.1:9/sse");

    let subsystem =
        SyncSubsystem::build(&config, Arc::new(RuntimeTelemetry::new())).expect("subsystem");
    subsystem.start().expect("start");
    assert!(subsystem.block_until_ready(READY_TIMEOUT).await);

    assert_eventually_async!(READY_TIMEOUT, async {
        !auth.received_requests().await.unwrap_or_default().is_empty()
    });
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(!subsystem.is_streaming());
    assert_eq!(subsystem.mode(), SyncMode::PollingOnly);
    assert_eq!(subsystem.push_state(), Some(PushState::Stopped));
    assert_eq!(auth.received_requests().await.unwrap_or_default().len(), 1);

    subsystem.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stream_kill_reaches_the_cache() {
    support::init_tracing();
    let sdk = definitions_server().await;
    let token = jwt(&["xxxx_splits", "control_pri"], 4_000_000_000);
    let auth = auth_server(serde_json::json!({ "pushEnabled": true, "token": token })).await;
    let kill = message_frame(
        "xxxx_splits",
        &serde_json::json!({
            "type": "SPLIT_KILL",
            "changeNumber": 30,
            "splitName": "checkout",
            "defaultTreatment": "on",
        }),
    );
    let (stream_url, stream_server) = held_open_stream(vec![kill]).await;
    let config = config(&sdk, &auth, &stream_url);

    let telemetry = Arc::new(RuntimeTelemetry::new());
    let recorder: Arc<dyn TelemetryRuntimeProducer> = telemetry.clone();
    let subsystem = SyncSubsystem::build(&config, recorder).expect("subsystem");
    subsystem.start().expect("start");
    assert!(subsystem.block_until_ready(READY_TIMEOUT).await);

    assert_eventually_async!(READY_TIMEOUT, async { subsystem.is_streaming() }, "streaming mode");
    assert_eventually_async!(
        READY_TIMEOUT,
        async { subsystem.splits().get("checkout").is_some_and(|split| split.killed) },
        "kill applied"
    );

    let split = subsystem.splits().get("checkout").expect("checkout cached");
    assert_eq!(split.default_treatment, "on");
    assert_eq!(split.change_number, 30);
    assert_eq!(subsystem.push_state(), Some(PushState::Streaming));
    assert!(telemetry
        .snapshot()
        .streaming_events
        .iter()
        .any(|event| event.kind == StreamingEventKind::ConnectionEstablished));

    subsystem.stop().await;
    stream_server.abort();
}

#[test]
fn build_rejects_invalid_config() {
    let config = Config::default();
    assert!(SyncSubsystem::build(&config, Arc::new(RuntimeTelemetry::new())).is_err());
}
