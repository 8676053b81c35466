use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use pinpoint_export_core::error::CoreError;

use crate::routes::capture::MAX_CAPTURE_BATCH;

/// Errors returned by the capture and flush handlers.
///
/// Rendered as `{"error": {"code", "message", "field"}}`. Delivery failures
/// never show up here; they happen after the response is sent.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("batch too large: {0} events (max {max})", max = MAX_CAPTURE_BATCH)]
    BatchTooLarge(usize),

    /// The event was accepted by the JSON extractor but could not be sized
    /// for the buffer. Events earlier in the same request stay buffered.
    #[error("event rejected: {0}")]
    Ingest(#[from] CoreError),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) | AppError::BatchTooLarge(_) => StatusCode::BAD_REQUEST,
            AppError::Ingest(_) => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            AppError::BadRequest(_) => "validation_error",
            AppError::BatchTooLarge(_) => "batch_too_large",
            AppError::Ingest(_) => "unserializable_event",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let message = match &self {
            AppError::Ingest(e) => {
                tracing::warn!(error = %e, "Event could not be buffered");
                self.to_string()
            }
            AppError::BatchTooLarge(_) => {
                format!("Batch exceeds maximum of {MAX_CAPTURE_BATCH} events")
            }
            AppError::BadRequest(msg) => msg.clone(),
        };

        let body = json!({
            "error": {
                "code": self.code(),
                "message": message,
                "field": null,
            }
        });
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_are_bad_requests() {
        let err = AppError::BadRequest("empty batch".to_string());
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.code(), "validation_error");

        let err = AppError::BatchTooLarge(1001);
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(err.to_string().contains("max 1000"));
    }

    #[test]
    fn unsizable_events_are_unprocessable() {
        let cause = serde_json::from_str::<serde_json::Value>("{")
            .expect_err("truncated JSON");
        let err = AppError::from(CoreError::from(cause));
        assert_eq!(err.code(), "unserializable_event");
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
