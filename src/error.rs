use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Failure of an outbound AI provider call. Never reaches the HTTP caller:
/// every call site degrades it into a default value.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")] Http(String),
    #[error("provider error: {0}")] Provider(String),
    #[error("malformed response: {0}")] Malformed(String),
    #[error("Other: {0}")] Other(String),
}

/// Failure of the quota / analytics backing store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store HTTP error: {0}")] Http(String),
    #[error("store returned status {status}: {body}")] Status { status: u16, body: String },
    #[error("store decode error: {0}")] Decode(String),
}

/// The only error the generation pipeline surfaces. Carries whatever api
/// cost was accumulated before the failure.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct GenerationError {
    pub message: String,
    pub partial_cost: f64,
}

/// Errors returned by HTTP handlers.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("Daily generation limit reached")]
    QuotaExceeded,

    #[error("Unauthorized")]
    Unauthorized,

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            AppError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                json!({ "error": msg, "code": "VALIDATION_ERROR" }),
            ),
            AppError::QuotaExceeded => (
                StatusCode::TOO_MANY_REQUESTS,
                json!({ "error": self.to_string(), "code": "QUOTA_EXCEEDED", "remaining": 0 }),
            ),
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                json!({ "error": self.to_string(), "code": "UNAUTHORIZED" }),
            ),
            AppError::Generation(err) => {
                tracing::error!(error = %err.message, partial_cost = err.partial_cost, "Generation failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "Generation failed", "code": "GENERATION_FAILED", "message": err.message }),
                )
            }
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "An internal error occurred", "code": "INTERNAL_ERROR" }),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_error_kind() {
        let cases = [
            (AppError::Validation("bad".into()), StatusCode::BAD_REQUEST),
            (AppError::QuotaExceeded, StatusCode::TOO_MANY_REQUESTS),
            (AppError::Unauthorized, StatusCode::UNAUTHORIZED),
            (
                AppError::Generation(GenerationError { message: "boom".into(), partial_cost: 0.1 }),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (AppError::Internal("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }
}
