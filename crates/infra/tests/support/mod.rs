//! Shared helpers for `flagsync-infra` integration tests.

#![allow(dead_code)]

use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use flagsync_domain::StreamEvent;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Opt-in log output: `RUST_LOG=flagsync=debug cargo test`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Unsigned JWT carrying `channels` as its capability and `exp`.
pub fn jwt(channels: &[&str], exp: i64) -> String {
    let capability: serde_json::Map<String, serde_json::Value> = channels
        .iter()
        .map(|channel| ((*channel).to_string(), serde_json::json!(["subscribe"])))
        .collect();
    let claims = serde_json::json!({
        "x-ably-capability": serde_json::Value::Object(capability).to_string(),
        "exp": exp,
    });
    format!(
        "{}.{}.sig",
        URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256"}"#),
        URL_SAFE_NO_PAD.encode(claims.to_string())
    )
}

/// `event: message` frame wrapping `payload` for `channel`.
pub fn message_frame(channel: &str, payload: &serde_json::Value) -> String {
    let envelope = serde_json::json!({
        "id": "abc",
        "clientId": "server",
        "timestamp": 1_700_000_000_000_i64,
        "encoding": "json",
        "channel": channel,
        "data": payload.to_string(),
    });
    format!("id: abc\nevent: message\ndata: {envelope}\n\n")
}

pub fn error_frame(code: i64, status_code: i64, message: &str) -> String {
    let data = serde_json::json!({
        "message": message,
        "code": code,
        "statusCode": status_code,
        "href": "https://help.example/error",
    });
    format!("event: error\ndata: {data}\n\n")
}

pub fn split_update_frame(change_number: i64) -> String {
    message_frame(
        "xxxx_splits",
        &serde_json::json!({ "type": "SPLIT_UPDATE", "changeNumber": change_number }),
    )
}

pub fn split_json(name: &str, change_number: i64, segment: Option<&str>) -> serde_json::Value {
    let conditions = segment.map_or_else(Vec::new, |segment| {
        vec![serde_json::json!({
            "matcherGroup": {
                "matchers": [{
                    "matcherType": "IN_SEGMENT",
                    "userDefinedSegmentMatcherData": { "segmentName": segment }
                }]
            }
        })]
    });
    serde_json::json!({
        "name": name,
        "changeNumber": change_number,
        "trafficTypeName": "user",
        "killed": false,
        "defaultTreatment": "off",
        "status": "ACTIVE",
        "conditions": conditions,
    })
}

/// HTTP server that answers one stream request with `frames` and then keeps
/// the response open until the returned handle is aborted.
pub async fn held_open_stream(frames: Vec<String>) -> (String, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind stream server");
    let addr = listener.local_addr().expect("stream server address");

    let handle = tokio::spawn(async move {
        let Ok((mut socket, _)) = listener.accept().await else {
            return;
        };
        let mut request = [0_u8; 4096];
        let _ = socket.read(&mut request).await;

        let head = "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\n\
                    transfer-encoding: chunked\r\n\r\n";
        if socket.write_all(head.as_bytes()).await.is_err() {
            return;
        }
        for frame in frames {
            let chunk = format!("{:x}\r\n{frame}\r\n", frame.len());
            if socket.write_all(chunk.as_bytes()).await.is_err() {
                return;
            }
        }
        let _ = socket.flush().await;
        tokio::time::sleep(Duration::from_secs(3600)).await;
    });

    (format!("http://{addr}/sse"), handle)
}

/// Everything currently queued on `rx`, without waiting.
pub fn drain(rx: &mut mpsc::UnboundedReceiver<StreamEvent>) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
