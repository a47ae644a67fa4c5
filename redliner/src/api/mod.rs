//! HTTP API routes for the redliner backend

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use shared_types::{DEFAULT_SESSION_ID, SESSION_HEADER};
use std::sync::Arc;

pub mod config;
pub mod invoke;
pub mod models;
pub mod sessions;

use crate::app_state::AppState;
use crate::persistence::validate_session_id;

#[derive(Clone)]
pub struct ApiState {
    pub app_state: Arc<AppState>,
}

/// Configure all API routes
pub fn router() -> Router<ApiState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/invoke", post(invoke::invoke))
        .route("/models", get(models::list_models))
        // Session routes
        .route("/sessions", get(sessions::list_sessions))
        .route("/sessions/{session_id}", delete(sessions::delete_session))
        .route(
            "/sessions/{session_id}/messages",
            get(sessions::get_session_messages),
        )
        // MCP configuration routes
        .route("/config/mcp-servers", get(config::list_mcp_servers))
        .route("/config/mcp-servers/reload", post(config::reload_mcp_servers))
}

/// Health check endpoint
pub async fn health_check(State(_state): State<ApiState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "redliner",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

/// Error codes for machine-readable error responses
#[derive(Debug, Clone, Copy)]
pub enum ApiErrorCode {
    InvalidSessionId,
    ConfigUnreadable,
    InternalError,
}

impl ApiErrorCode {
    fn as_str(&self) -> &'static str {
        match self {
            ApiErrorCode::InvalidSessionId => "INVALID_SESSION_ID",
            ApiErrorCode::ConfigUnreadable => "CONFIG_UNREADABLE",
            ApiErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ApiErrorCode::InvalidSessionId => StatusCode::BAD_REQUEST,
            ApiErrorCode::ConfigUnreadable | ApiErrorCode::InternalError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Serialize)]
struct ApiErrorDetail {
    code: &'static str,
    message: String,
}

pub fn api_error(code: ApiErrorCode, message: impl Into<String>) -> Response {
    let body = Json(ApiErrorResponse {
        error: ApiErrorDetail {
            code: code.as_str(),
            message: message.into(),
        },
    });
    (code.status_code(), body).into_response()
}

/// Session key from `x-session-id`, defaulting when absent or blank.
pub fn session_id_from_headers(headers: &HeaderMap) -> String {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(DEFAULT_SESSION_ID)
        .to_string()
}

/// Rejects session keys that cannot be used as storage directory names.
pub fn checked_session_id(session_id: &str) -> Result<(), Response> {
    validate_session_id(session_id)
        .map_err(|e| api_error(ApiErrorCode::InvalidSessionId, e.to_string()))
}
