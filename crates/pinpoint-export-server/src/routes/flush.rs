use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::state::AppState;

/// `POST /api/flush`: drain the buffer now instead of waiting for a
/// threshold. The drained batch is dispatched in the background.
#[tracing::instrument(skip(state))]
pub async fn flush(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let flushed = state.flush_buffer().await;
    (
        StatusCode::ACCEPTED,
        Json(json!({ "ok": true, "flushed": flushed })),
    )
}
