use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use super::ApiState;

/// `GET /models` - proxy catalog, or the static fallback list
pub async fn list_models(State(state): State<ApiState>) -> Json<Value> {
    let models = state.app_state.catalog().list_models().await;
    tracing::info!(count = models.len(), "Served model list");
    Json(json!({ "models": models }))
}
