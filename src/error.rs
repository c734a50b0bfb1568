//! Error types for the chat relay
//!
//! Core errors (`UpstreamError`, `RelayError`) describe what went wrong while
//! talking to the upstream endpoint. `AppError` is the HTTP-facing error for
//! requests rejected before a relay starts; failures after that point are
//! reported inside the event stream.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Message shown to end users whenever the relay cannot produce an answer.
pub const GENERAL_ERROR_MESSAGE: &str =
    "An error occurred. Please refresh the page to start a new conversation.";

/// Message shown when the upstream cut the answer off at the token limit.
pub const MAX_TOKENS_MESSAGE: &str = "Reached maximum output tokens for this response.";

/// Failures of a single upstream call.
///
/// `Http`, `Status` and `InvalidRequest` happen while the call is being
/// established; only the first two can succeed on another attempt.
/// `Transport` and `MalformedChunk` only happen once the delta stream is open.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Upstream returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid upstream request: {0}")]
    InvalidRequest(String),

    #[error("Stream transport error: {0}")]
    Transport(String),

    #[error("Malformed stream chunk: {0}")]
    MalformedChunk(String),
}

impl UpstreamError {
    /// Whether another attempt at establishing the call could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, UpstreamError::Http(_) | UpstreamError::Status { .. })
    }
}

/// Relay-level errors
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Upstream unavailable after {attempts} attempt(s): {source}")]
    UpstreamUnavailable {
        attempts: u32,
        #[source]
        source: UpstreamError,
    },

    #[error("Admission gate closed")]
    GateClosed,
}

/// Application-level (HTTP) errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

/// Error details
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message,
            },
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for convenience
pub type AppResult<T> = Result<T, AppError>;
