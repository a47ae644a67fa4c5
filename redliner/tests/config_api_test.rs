//! Integration tests for MCP server configuration endpoints

mod common;

use axum::http::StatusCode;
use common::*;
use serde_json::json;
use std::time::Duration;

use redliner::models::{ModelChunk, StopReason};
use redliner::tools::EDIT_ACTIONS_TOOL;

fn write_mcp_config(app: &TestApp, contents: &str) {
    std::fs::write(&app.state.config().mcp_config_path, contents).expect("write mcp config");
}

#[tokio::test]
async fn test_missing_config_lists_no_servers() {
    let app = setup_test_app();
    let (status, body) = json_response(&app.router, get("/config/mcp-servers")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["servers"], json!([]));
}

#[tokio::test]
async fn test_lists_servers_as_written() {
    let app = setup_test_app();
    write_mcp_config(
        &app,
        &json!({
            "mcpServers": {
                "fetch": {"command": "uvx", "args": ["mcp-server-fetch"]},
                "files": {"command": "npx", "env": {"ROOT": "/tmp"}, "enabled": false},
                "broken": {"args": ["x"]}
            }
        })
        .to_string(),
    );

    let (status, body) = json_response(&app.router, get("/config/mcp-servers")).await;
    assert_eq!(status, StatusCode::OK);

    let servers = body["servers"].as_array().unwrap();
    assert_eq!(servers.len(), 3);

    let find = |name: &str| {
        servers
            .iter()
            .find(|s| s["name"] == name)
            .unwrap_or_else(|| panic!("server {name} listed"))
    };
    assert_eq!(find("fetch")["command"], "uvx");
    assert_eq!(find("fetch")["args"], json!(["mcp-server-fetch"]));
    assert_eq!(find("fetch")["enabled"], true);
    assert_eq!(find("files")["has_env"], true);
    assert_eq!(find("files")["enabled"], false);
    assert!(find("broken")["command"].is_null());
}

#[tokio::test]
async fn test_malformed_config_is_server_error() {
    let app = setup_test_app();
    write_mcp_config(&app, "{ not json");

    let (status, body) = json_response(&app.router, get("/config/mcp-servers")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["code"], "CONFIG_UNREADABLE");
}

#[tokio::test]
async fn test_reload_without_config_keeps_builtin_tool() {
    let app = setup_test_app();
    let (status, body) = json_response(&app.router, post("/config/mcp-servers/reload")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(body["servers"], 0);
    assert_eq!(body["tools"], json!([EDIT_ACTIONS_TOOL]));
}

#[tokio::test]
async fn test_reload_skips_unreachable_servers_and_evicts_agents() {
    let app = setup_test_app();

    reply(&app.models, &["ok"]);
    sse_events(
        &app.router,
        invoke_request(Some("s1"), turn("hi", "p0: x", Some("h1"))),
    )
    .await;
    assert!(app.state.registry().contains("s1"));

    write_mcp_config(
        &app,
        &json!({
            "mcpServers": {
                "ghost": {"command": "/nonexistent/redliner-mcp-server"},
                "off": {"command": "uvx", "enabled": false},
                "invalid": {"args": []}
            }
        })
        .to_string(),
    );

    let (status, body) = json_response(&app.router, post("/config/mcp-servers/reload")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "MCP servers reloaded");
    assert_eq!(body["servers"], 1);
    assert_eq!(body["tools"], json!([EDIT_ACTIONS_TOOL]));
    assert_eq!(body["evicted_sessions"], 1);
    assert_eq!(app.state.tool_server_count(), 1);
    assert!(!app.state.registry().contains("s1"));

    // History survives; the document is resent because fingerprints were cleared.
    reply(&app.models, &["ok"]);
    sse_events(
        &app.router,
        invoke_request(Some("s1"), turn("again", "p0: x", Some("h1"))),
    )
    .await;

    let requests = app.models.requests();
    let (_, request) = requests.last().unwrap();
    assert_eq!(request.messages.len(), 3);
    assert!(request.messages[2].text().contains("<word_document>"));
}

#[tokio::test]
async fn test_reload_waits_for_in_flight_turn() {
    let app = setup_test_app();
    let open = app.models.push_gated(vec![
        ModelChunk::TextDelta("first".to_string()),
        ModelChunk::Finish(StopReason::EndTurn),
    ]);
    let first = spawn_turn(&app, "s", "one");
    wait_for_requests(&app.models, 1).await;

    let reload = {
        let router = app.router.clone();
        tokio::spawn(async move { json_response(&router, post("/config/mcp-servers/reload")).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    reply(&app.models, &["second"]);
    let second = spawn_turn(&app, "s", "two");
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(!reload.is_finished());
    assert!(!second.is_finished());
    assert_eq!(app.models.requests().len(), 1);

    open.send(()).unwrap();
    first.await.unwrap();
    let (status, body) = reload.await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["evicted_sessions"], 1);
    second.await.unwrap();

    // One agent at a time: the turns are stored back to back.
    let history = stored_texts(&app, "s").await;
    assert_eq!(history.len(), 4);
    assert!(history[0].contains("<user_input>one</user_input>"));
    assert_eq!(history[1], "first");
    assert!(history[2].contains("<user_input>two</user_input>"));
    assert_eq!(history[3], "second");

    // The second turn ran on a fresh agent restored from disk.
    let requests = app.models.requests();
    assert_eq!(requests[1].1.messages.len(), 3);
}
