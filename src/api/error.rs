use crate::services::error::IntakeError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Intake(#[from] IntakeError),

    #[error("Bad Request: {0}")]
    BadRequest(String),

    #[error("Payload Too Large: {0}")]
    PayloadTooLarge(String),
}

impl AppError {
    fn parts(self) -> (StatusCode, String, bool) {
        match self {
            AppError::Intake(e) if e.is_client_error() => {
                tracing::warn!("Rejected request: {}", e);
                (StatusCode::BAD_REQUEST, e.to_string(), true)
            }
            AppError::Intake(e) => {
                tracing::error!("Intake error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string(), false)
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, true),
            AppError::PayloadTooLarge(msg) => (StatusCode::PAYLOAD_TOO_LARGE, msg, true),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message, no_retry) = self.parts();

        let body = if no_retry {
            Json(json!({
                "error": message,
                "noRetry": true
            }))
        } else {
            Json(json!({
                "error": message
            }))
        };

        (status, body).into_response()
    }
}
