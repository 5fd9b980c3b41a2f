use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chatrelay_common::ThreadId;
use serde_json::json;

use crate::state::SharedState;

/// `GET /api/threads/{id}`: message count, phase and title of one thread.
pub async fn thread_summary(State(state): State<SharedState>, Path(id): Path<String>) -> Response {
    match state.store.get(&ThreadId::new(id)) {
        Some(thread) => Json(thread.summary().await).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "thread not found" })),
        )
            .into_response(),
    }
}
