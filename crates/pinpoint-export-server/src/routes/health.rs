use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::state::AppState;

/// `GET /health`: liveness check plus buffer and delivery counters.
///
/// Response shape:
/// ```json
/// {
///   "status": "ok",
///   "version": "0.1.0",
///   "buffer": { "events": 3, "bytes": 512, "limit_bytes": 1048576 },
///   "delivery": { "accepted": 10, "ignored": 1, "flushes": 2, "delivered": 7, "failed": 0 }
/// }
/// ```
#[tracing::instrument(skip(state))]
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let usage = state.buffer.usage().await;
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
            "buffer": {
                "events": usage.events,
                "bytes": usage.bytes,
                "limit_bytes": state.buffer.limit_bytes(),
            },
            "delivery": state.stats.snapshot(),
        })),
    )
}
