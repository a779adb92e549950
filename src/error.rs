// Error handling module
// Defines error types and HTTP response conversion

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Errors from translating a non-streaming completion.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum TranslateError {
    /// Upstream response carried no choices
    #[error("no choices in response")]
    NoChoices,

    /// The first choice was not an object
    #[error("invalid choice format")]
    BadChoice,
}

/// API errors that can occur during request processing
#[derive(Error, Debug)]
pub enum ApiError {
    /// Client access token missing or mismatched
    #[error("Invalid access token: {0}")]
    AuthError(String),

    /// Request validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Copilot API unreachable or misbehaving
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Response translation failed
    #[error("Translation error: {0}")]
    Translate(#[from] TranslateError),

    /// A single SSE frame outgrew the buffer cap
    #[error("SSE frame exceeds {0} bytes")]
    FrameTooLarge(usize),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            ApiError::AuthError(msg) => (StatusCode::FORBIDDEN, "auth_error", msg),
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, "validation_error", msg),
            ApiError::Upstream(msg) => (StatusCode::BAD_GATEWAY, "upstream_error", msg),
            ApiError::Translate(err) => {
                (StatusCode::BAD_GATEWAY, "translation_error", err.to_string())
            }
            ApiError::FrameTooLarge(limit) => (
                StatusCode::BAD_GATEWAY,
                "upstream_error",
                format!("SSE frame exceeds {} bytes", limit),
            ),
            ApiError::Internal(err) => {
                // Log internal errors
                tracing::error!("Internal error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "message": message,
                "type": error_type,
            }
        }));

        (status, body).into_response()
    }
}
