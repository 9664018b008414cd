#![allow(clippy::expect_used)]

use std::time::Duration;

use serde_json::Value;
use serde_json::json;
use studio_core::Config;
use studio_core::SessionState;
use studio_protocol::Message;
use tokio::sync::watch;
use tokio::time::timeout;
use wiremock::Mock;
use wiremock::MockServer;
use wiremock::ResponseTemplate;
use wiremock::matchers::method;
use wiremock::matchers::path;

pub fn config_for_server(server: &MockServer) -> Config {
    Config {
        base_url: server.uri(),
        request_max_retries: 0,
        ..Config::default()
    }
}

pub fn sse_event(event: &str, data: &Value) -> String {
    format!("event: {event}\ndata: {data}\n\n")
}

pub fn sse_body(events: &[(&str, Value)]) -> String {
    events
        .iter()
        .map(|(event, data)| sse_event(event, data))
        .collect()
}

/// Reads a JSON array of `{"event": ..., "data": ...}` objects and renders it
/// as an event-stream body. Entries without `data` become bare events.
pub fn load_sse_fixture(name: &str) -> String {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("fixtures")
        .join(name);
    let events: Vec<Value> =
        serde_json::from_reader(std::fs::File::open(&path).expect("open fixture"))
            .expect("parse JSON fixture");
    events
        .into_iter()
        .map(|e| {
            let kind = e
                .get("event")
                .and_then(Value::as_str)
                .expect("fixture event missing name");
            match e.get("data") {
                Some(data) => sse_event(kind, data),
                None => format!("event: {kind}\n\n"),
            }
        })
        .collect()
}

pub fn human(id: &str, text: &str) -> Message {
    Message::human(text).with_id(id)
}

pub fn ai(id: &str, text: &str) -> Message {
    Message::ai(text).with_id(id)
}

pub fn to_json(messages: &[Message]) -> Value {
    serde_json::to_value(messages).expect("serialize messages")
}

pub fn sse_response(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body, "text/event-stream")
}

pub async fn mount_state(server: &MockServer, thread_id: &str, values: &[Message], resumeable: bool) {
    Mock::given(method("GET"))
        .and(path(format!("/threads/{thread_id}/state")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "values": to_json(values),
            "resumeable": resumeable,
        })))
        .mount(server)
        .await;
}

pub async fn mount_history(server: &MockServer, thread_id: &str, snapshots: Value) {
    Mock::given(method("GET"))
        .and(path(format!("/threads/{thread_id}/history")))
        .respond_with(ResponseTemplate::new(200).set_body_json(snapshots))
        .mount(server)
        .await;
}

pub async fn mount_run_stream(server: &MockServer, body: String) {
    Mock::given(method("POST"))
        .and(path("/runs/stream"))
        .respond_with(sse_response(body))
        .mount(server)
        .await;
}

/// JSON bodies of the requests the server received on `route`. Requests
/// without a body (GETs) are skipped.
pub async fn received_json(server: &MockServer, route: &str) -> Vec<Value> {
    server
        .received_requests()
        .await
        .expect("request recording enabled")
        .into_iter()
        .filter(|r| r.url.path() == route && !r.body.is_empty())
        .map(|r| serde_json::from_slice(&r.body).expect("JSON request body"))
        .collect()
}

pub async fn wait_for_state<F>(rx: &mut watch::Receiver<SessionState>, mut predicate: F) -> SessionState
where
    F: FnMut(&SessionState) -> bool,
{
    loop {
        {
            let state = rx.borrow_and_update();
            if predicate(&state) {
                return state.clone();
            }
        }
        timeout(Duration::from_secs(2), rx.changed())
            .await
            .expect("timeout waiting for session state")
            .expect("session dropped");
    }
}
