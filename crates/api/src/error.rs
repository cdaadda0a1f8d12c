//! API error handling
//!
//! Error bodies are deliberately generic so a caller cannot learn which part
//! of a transmission failed verification.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use paypal::VerifyError;
use serde::Serialize;
use tracing::{error, warn};

/// Structured JSON error response
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: &'static str,
}

/// API error type that converts to JSON responses
#[derive(Debug)]
pub enum ApiError {
    /// Missing or malformed headers or body
    BadRequest(String),
    /// Well-formed transmission whose signature did not verify
    InvalidSignature(String),
    /// Certificate download or cache failure
    Internal(String),
}

impl From<VerifyError> for ApiError {
    fn from(e: VerifyError) -> Self {
        if e.is_transient() {
            ApiError::Internal(e.to_string())
        } else if e.is_mismatch() {
            ApiError::InvalidSignature(e.to_string())
        } else {
            ApiError::BadRequest(e.to_string())
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::BadRequest(msg) => {
                warn!("Rejected webhook: {}", msg);
                StatusCode::BAD_REQUEST
            }
            ApiError::InvalidSignature(msg) => {
                warn!(security = true, "Invalid webhook signature: {}", msg);
                StatusCode::BAD_REQUEST
            }
            ApiError::Internal(msg) => {
                error!("Internal error: {}", msg);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let error = if status.is_server_error() {
            "Internal server error"
        } else {
            "Bad request"
        };

        (status, Json(ErrorResponse { error })).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
