//! # Remote Emotion Analysis
//!
//! Everything that talks to (or describes answers from) the remote
//! emotion-analysis service.
//!
//! ## Key Components:
//! - **Result payload**: what the client finally receives for one clip
//! - **Client**: one-shot WebSocket call carrying one encoded clip
//! - **Summary**: top emotion scores pulled out of a prosody response for logs

pub mod client;
pub mod summary;

use serde::Serialize;

/// Error descriptor delivered instead of an analysis.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorDescriptor {
    /// Short code, or the underlying failure text for remote errors
    pub error: String,
    /// Human-readable explanation
    pub message: String,
}

/// Exactly one of these is produced per `finish_recording` / `audio_data`
/// event and forwarded to the client as-is.
///
/// Serialized untagged: a success is the remote JSON verbatim, a failure is
/// `{"error": ..., "message": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ResultPayload {
    Analysis(serde_json::Value),
    Error(ErrorDescriptor),
}

impl ResultPayload {
    pub fn error(error: impl Into<String>, message: impl Into<String>) -> Self {
        ResultPayload::Error(ErrorDescriptor {
            error: error.into(),
            message: message.into(),
        })
    }

    /// True for our own error descriptors and for remote payloads that carry
    /// a top-level `error` field (the service reports bad input that way).
    pub fn is_error(&self) -> bool {
        match self {
            ResultPayload::Error(_) => true,
            ResultPayload::Analysis(value) => value.get("error").is_some(),
        }
    }
}

pub use client::{AnalysisClient, HumeClient};
