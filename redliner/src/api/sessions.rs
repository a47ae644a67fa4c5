//! Session history endpoints

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use shared_types::DeleteSessionResponse;

use super::{api_error, checked_session_id, ApiErrorCode, ApiState};

/// `GET /sessions` - newest first
pub async fn list_sessions(State(state): State<ApiState>) -> Response {
    match state.app_state.store().list_sessions().await {
        Ok(sessions) => (StatusCode::OK, Json(json!({ "sessions": sessions }))).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to list sessions");
            api_error(ApiErrorCode::InternalError, e.to_string())
        }
    }
}

/// `GET /sessions/{session_id}/messages` - ascending by message id
pub async fn get_session_messages(
    State(state): State<ApiState>,
    Path(session_id): Path<String>,
) -> Response {
    if let Err(response) = checked_session_id(&session_id) {
        return response;
    }

    match state.app_state.store().load_messages(&session_id).await {
        Ok(messages) => (StatusCode::OK, Json(json!({ "messages": messages }))).into_response(),
        Err(e) => {
            tracing::error!(session_id = %session_id, error = %e, "Failed to load messages");
            api_error(ApiErrorCode::InternalError, e.to_string())
        }
    }
}

/// `DELETE /sessions/{session_id}` - a missing session is reported, not an error
pub async fn delete_session(
    State(state): State<ApiState>,
    Path(session_id): Path<String>,
) -> Response {
    if let Err(response) = checked_session_id(&session_id) {
        return response;
    }

    let response = match state.app_state.delete_session(&session_id).await {
        Ok(true) => {
            tracing::info!(session_id = %session_id, "Deleted session");
            DeleteSessionResponse {
                deleted: true,
                session_id,
                error: None,
            }
        }
        Ok(false) => DeleteSessionResponse {
            deleted: false,
            session_id,
            error: Some("Session not found".to_string()),
        },
        Err(e) => {
            tracing::error!(session_id = %session_id, error = %e, "Failed to delete session");
            DeleteSessionResponse {
                deleted: false,
                session_id,
                error: Some(e.to_string()),
            }
        }
    };
    (StatusCode::OK, Json(response)).into_response()
}
