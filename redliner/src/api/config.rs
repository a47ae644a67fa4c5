//! MCP server configuration endpoints

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use super::{api_error, ApiErrorCode, ApiState};
use crate::tools::mcp;

/// `GET /config/mcp-servers`
pub async fn list_mcp_servers(State(state): State<ApiState>) -> Response {
    let path = &state.app_state.config().mcp_config_path;
    match mcp::read_config(path).await {
        Ok(Some(config)) => {
            let servers = mcp::summarize(&config);
            (StatusCode::OK, Json(json!({ "servers": servers }))).into_response()
        }
        Ok(None) => (StatusCode::OK, Json(json!({ "servers": [] }))).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to read MCP config");
            api_error(ApiErrorCode::ConfigUnreadable, e.to_string())
        }
    }
}

/// `POST /config/mcp-servers/reload`
pub async fn reload_mcp_servers(State(state): State<ApiState>) -> Response {
    let reload = state.app_state.reload_tools().await;
    (
        StatusCode::OK,
        Json(json!({
            "status": "success",
            "message": "MCP servers reloaded",
            "servers": reload.servers,
            "tools": reload.tools,
            "evicted_sessions": reload.evicted_sessions,
        })),
    )
        .into_response()
}
