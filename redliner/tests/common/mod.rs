//! Shared harness for API integration tests
#![allow(dead_code)]

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tower::ServiceExt;

use redliner::api;
use redliner::app_state::AppState;
use redliner::config::Config;
use redliner::models::mock::ScriptedModelFactory;
use redliner::models::{ModelChunk, StopReason};
use redliner::tools::ToolRegistry;

pub struct TestApp {
    pub router: axum::Router,
    pub state: Arc<AppState>,
    pub models: ScriptedModelFactory,
    pub temp_dir: tempfile::TempDir,
}

pub fn test_config(temp_dir: &tempfile::TempDir) -> Config {
    Config {
        proxy_url: None,
        sessions_dir: temp_dir.path().join("sessions"),
        mcp_config_path: temp_dir.path().join("mcp.json"),
        ..Config::default()
    }
}

pub fn setup_test_app() -> TestApp {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
    let models = ScriptedModelFactory::new();
    let state = Arc::new(AppState::new(
        test_config(&temp_dir),
        Arc::new(models.clone()),
        Arc::new(ToolRegistry::new()),
    ));
    let router = api::router().with_state(api::ApiState {
        app_state: state.clone(),
    });
    TestApp {
        router,
        state,
        models,
        temp_dir,
    }
}

pub async fn json_response(app: &axum::Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(req).await.expect("Request failed");
    let status = response.status();
    let body = response
        .into_body()
        .collect()
        .await
        .expect("Failed to read body")
        .to_bytes();
    let value: Value = serde_json::from_slice(&body).expect("Invalid JSON response");
    (status, value)
}

/// Runs a request to completion and returns the decoded `data:` frames.
pub async fn sse_events(app: &axum::Router, req: Request<Body>) -> (StatusCode, Vec<Value>) {
    let response = app.clone().oneshot(req).await.expect("Request failed");
    let status = response.status();
    let body = response
        .into_body()
        .collect()
        .await
        .expect("Failed to read body")
        .to_bytes();
    let text = String::from_utf8(body.to_vec()).expect("Body is not UTF-8");
    let events = text
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|data| serde_json::from_str(data.trim()).expect("Invalid event JSON"))
        .collect();
    (status, events)
}

pub fn invoke_request(session_id: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/invoke")
        .header("content-type", "application/json");
    if let Some(session_id) = session_id {
        builder = builder.header("x-session-id", session_id);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub fn turn(prompt: &str, document: &str, hash: Option<&str>) -> Value {
    let mut body = json!({
        "prompt": prompt,
        "word_document": document,
    });
    if let Some(hash) = hash {
        body["document_hash"] = json!(hash);
    }
    body
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub fn post(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub fn delete(uri: &str) -> Request<Body> {
    Request::builder()
        .method("DELETE")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub fn event_types(events: &[Value]) -> Vec<&str> {
    events
        .iter()
        .map(|e| e["type"].as_str().unwrap_or_default())
        .collect()
}

/// Script for a plain text reply.
pub fn reply(models: &ScriptedModelFactory, fragments: &[&str]) {
    let mut chunks: Vec<ModelChunk> = fragments
        .iter()
        .map(|f| ModelChunk::TextDelta(f.to_string()))
        .collect();
    chunks.push(ModelChunk::Finish(StopReason::EndTurn));
    models.push(chunks);
}

/// Runs a turn on its own task so the test can act while it is in flight.
pub fn spawn_turn(app: &TestApp, session_id: &str, prompt: &str) -> JoinHandle<(StatusCode, Vec<Value>)> {
    let router = app.router.clone();
    let req = invoke_request(Some(session_id), turn(prompt, "p0: doc", None));
    tokio::spawn(async move { sse_events(&router, req).await })
}

pub async fn wait_for_requests(models: &ScriptedModelFactory, count: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while models.requests().len() < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("model was not called in time");
}

/// Texts of the persisted messages, in order.
pub async fn stored_texts(app: &TestApp, session_id: &str) -> Vec<String> {
    app.state
        .store()
        .load_messages(session_id)
        .await
        .expect("load messages")
        .iter()
        .map(|m| m.message.text())
        .collect()
}
