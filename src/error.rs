//! # Error Handling
//!
//! Two families of errors live here:
//!
//! - [`AppError`]: failures of the HTTP API (config endpoints and friends).
//!   These become HTTP responses through actix's `ResponseError`.
//! - [`PipelineError`]: failures of the audio pipeline. These never become
//!   transport-level failures; they are turned into a [`ResultPayload`] error
//!   object (or a session-scoped `error` event for chunk decode problems) and
//!   delivered through the same channel as a successful analysis.

use crate::analysis::ResultPayload;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// HTTP API errors.
///
/// ## Status Code Mapping:
/// - Internal/ConfigError → 500
/// - BadRequest/ValidationError → 400
/// - NotFound → 404
/// - ServiceUnavailable → 503
#[derive(Debug)]
pub enum AppError {
    Internal(String),
    BadRequest(String),
    NotFound(String),
    ServiceUnavailable(String),
    ConfigError(String),
    ValidationError(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::ServiceUnavailable(msg) => write!(f, "Service unavailable: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

/// JSON body shape:
/// ```json
/// { "error": { "type": "validation_error", "message": "...", "timestamp": "..." } }
/// ```
impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let (status, error_type, message) = match self {
            AppError::Internal(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                msg.clone(),
            ),
            AppError::BadRequest(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,
                "bad_request",
                msg.clone(),
            ),
            AppError::NotFound(msg) => (
                actix_web::http::StatusCode::NOT_FOUND,
                "not_found",
                msg.clone(),
            ),
            AppError::ServiceUnavailable(msg) => (
                actix_web::http::StatusCode::SERVICE_UNAVAILABLE,
                "service_unavailable",
                msg.clone(),
            ),
            AppError::ConfigError(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "config_error",
                msg.clone(),
            ),
            AppError::ValidationError(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,
                "validation_error",
                msg.clone(),
            ),
        };

        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// Malformed JSON is the client's fault, so it maps to 400.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// Failure taxonomy of the ingestion pipeline.
///
/// ## Variants:
/// - **Decode**: a chunk (or legacy payload) was not valid base64. For chunks
///   this is logged and reported, but the session keeps recording.
/// - **NoData**: `finish` arrived for a session with no buffer. Terminal.
/// - **ConversionFailed**: the transcoder could not produce a clip. Terminal.
/// - **RemoteCallFailed**: connect/send/receive against the analysis service
///   failed. Terminal, but still a well-formed result.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineError {
    Decode(String),
    NoData,
    ConversionFailed(String),
    RemoteCallFailed(String),
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::Decode(msg) => write!(f, "Invalid audio payload: {}", msg),
            PipelineError::NoData => write!(f, "No audio data found for this session"),
            PipelineError::ConversionFailed(msg) => write!(f, "Audio conversion failed: {}", msg),
            PipelineError::RemoteCallFailed(msg) => write!(f, "Remote analysis failed: {}", msg),
        }
    }
}

impl std::error::Error for PipelineError {}

impl PipelineError {
    /// Client-visible result object for a terminal pipeline failure.
    ///
    /// The `error`/`message` strings are part of the client contract; the
    /// browser page matches on them.
    pub fn to_result_payload(&self) -> ResultPayload {
        match self {
            PipelineError::NoData => {
                ResultPayload::error("No data", "No audio data found for this session")
            }
            PipelineError::ConversionFailed(_) => {
                ResultPayload::error("Conversion failed", "Failed to convert audio to WAV format")
            }
            PipelineError::RemoteCallFailed(detail) => {
                ResultPayload::error(detail.clone(), "Failed to connect to Hume API.")
            }
            PipelineError::Decode(detail) => {
                ResultPayload::error(detail.clone(), "Server error processing audio data")
            }
        }
    }

    /// Message for the session-scoped `error` event sent on a bad chunk.
    pub fn chunk_event_message(&self) -> String {
        match self {
            PipelineError::Decode(detail) => format!("Error processing audio chunk: {}", detail),
            other => format!("Error processing audio chunk: {}", other),
        }
    }
}
