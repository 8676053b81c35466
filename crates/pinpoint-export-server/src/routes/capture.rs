use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use pinpoint_export_core::event::{CaptureOrBatch, RawEvent};

use crate::{error::AppError, state::AppState};

pub const MAX_CAPTURE_BATCH: usize = 1000;

/// `POST /api/capture`: hand one event or a batch of events to the exporter.
///
/// Events whose name is in the ignore list are dropped here and never count
/// toward the buffer size. The rest are buffered in request order; delivery
/// happens on the next flush, so a `202` says nothing about the destination.
///
/// ## Response
/// `202 Accepted` with `{ "ok": true, "accepted": n, "ignored": m }`.
#[tracing::instrument(skip(state, payload))]
pub async fn capture(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CaptureOrBatch>,
) -> Result<impl IntoResponse, AppError> {
    let events: Vec<RawEvent> = match payload {
        CaptureOrBatch::Single(event) => vec![*event],
        CaptureOrBatch::Batch(events) => events,
    };

    if events.is_empty() {
        return Err(AppError::BadRequest("empty batch".to_string()));
    }
    if events.len() > MAX_CAPTURE_BATCH {
        return Err(AppError::BatchTooLarge(events.len()));
    }

    let outcome = state.ingest(events).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "ok": true,
            "accepted": outcome.accepted,
            "ignored": outcome.ignored,
        })),
    ))
}
