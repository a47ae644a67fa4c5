//! `POST /invoke` - one conversational turn streamed as server-sent events

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::StreamExt;
use shared_types::{TurnRequest, WireEvent};
use std::convert::Infallible;

use super::{checked_session_id, session_id_from_headers, ApiState};
use crate::stream::stream_turn;

fn to_sse_event(event: WireEvent) -> Result<Event, Infallible> {
    Ok(match serde_json::to_string(&event) {
        Ok(json) => Event::default().data(json),
        Err(e) => {
            tracing::error!(kind = event.kind(), error = %e, "Failed to serialize wire event");
            Event::default().comment("serialization failed")
        }
    })
}

pub async fn invoke(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(request): Json<TurnRequest>,
) -> Response {
    let session_id = session_id_from_headers(&headers);
    if let Err(response) = checked_session_id(&session_id) {
        return response;
    }

    let events = stream_turn(state.app_state.clone(), session_id, request).map(to_sse_event);
    Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response()
}
