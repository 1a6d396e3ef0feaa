//! # Remote Analysis Client
//!
//! One-shot WebSocket call to the Hume streaming models endpoint.
//!
//! ## Protocol:
//! 1. **Connect** with the API key as connection parameters (query string
//!    and `X-Hume-Api-Key` header), never inside the message body
//! 2. **Send** exactly one text message:
//!    `{"models": {"prosody": {}}, "data": "<base64 clip>"}`
//! 3. **Receive** exactly one data message and decode it as JSON
//! 4. **Close** the socket, whatever happened
//!
//! No partial messages, no multiplexing, no retry. Every failure (including
//! the overall timeout) becomes an error [`ResultPayload`] instead of
//! propagating to the caller.

use crate::analysis::ResultPayload;
use crate::config::HumeConfig;
use crate::error::PipelineError;
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::fmt;
use std::time::{Duration, Instant};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// Seam between the pipeline and the remote service.
#[async_trait]
pub trait AnalysisClient: Send + Sync {
    /// Submit one encoded clip. Never fails: errors come back as an error
    /// payload.
    async fn analyze(&self, clip: Vec<u8>) -> ResultPayload;

    /// Model name the requests ask for (used to read scores back out).
    fn model(&self) -> &str;
}

/// Failures of a single remote call.
#[derive(Debug)]
pub enum RemoteError {
    InvalidRequest(String),
    Connect(tokio_tungstenite::tungstenite::Error),
    Send(tokio_tungstenite::tungstenite::Error),
    Receive(tokio_tungstenite::tungstenite::Error),
    /// Socket closed before any data message arrived
    ClosedWithoutResponse,
    InvalidResponse(serde_json::Error),
    Timeout(Duration),
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteError::InvalidRequest(msg) => write!(f, "invalid request: {}", msg),
            RemoteError::Connect(e) => write!(f, "{}", e),
            RemoteError::Send(e) => write!(f, "failed to send request: {}", e),
            RemoteError::Receive(e) => write!(f, "failed to receive response: {}", e),
            RemoteError::ClosedWithoutResponse => write!(f, "connection closed before a response was received"),
            RemoteError::InvalidResponse(e) => write!(f, "response was not valid JSON: {}", e),
            RemoteError::Timeout(d) => write!(f, "no response within {}s", d.as_secs()),
        }
    }
}

impl std::error::Error for RemoteError {}

/// Client for the Hume streaming models API.
#[derive(Debug, Clone)]
pub struct HumeClient {
    websocket_url: String,
    api_key: String,
    model: String,
    timeout: Duration,
}

impl HumeClient {
    pub fn new(config: &HumeConfig) -> Self {
        Self {
            websocket_url: config.websocket_url.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            timeout: config.request_timeout(),
        }
    }

    /// Build the single outgoing message.
    pub fn envelope(&self, clip: &[u8]) -> serde_json::Value {
        let mut models = serde_json::Map::new();
        models.insert(self.model.clone(), json!({}));
        json!({
            "models": models,
            "data": general_purpose::STANDARD.encode(clip),
        })
    }

    /// Endpoint URL carrying the credential as a percent-encoded query
    /// parameter.
    fn connection_url(&self) -> String {
        let separator = if self.websocket_url.contains('?') { '&' } else { '?' };
        format!(
            "{}{}api_key={}",
            self.websocket_url,
            separator,
            urlencoding::encode(&self.api_key)
        )
    }

    /// Connect, send, receive, close. The socket is closed on every path
    /// after a successful connect.
    async fn call(&self, body: String) -> Result<serde_json::Value, RemoteError> {
        let mut request = self
            .connection_url()
            .into_client_request()
            .map_err(|e| RemoteError::InvalidRequest(e.to_string()))?;
        let header = HeaderValue::from_str(&self.api_key)
            .map_err(|e| RemoteError::InvalidRequest(e.to_string()))?;
        request.headers_mut().insert("X-Hume-Api-Key", header);

        let (mut socket, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(RemoteError::Connect)?;
        info!("Connected to Hume API");

        let outcome = Self::exchange(&mut socket, body).await;

        if let Err(e) = socket.close(None).await {
            debug!("Closing Hume connection failed: {}", e);
        }

        outcome
    }

    async fn exchange<S>(socket: &mut S, body: String) -> Result<serde_json::Value, RemoteError>
    where
        S: futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error>
            + futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
            + Unpin,
    {
        socket.send(Message::Text(body)).await.map_err(RemoteError::Send)?;
        debug!("Request sent to Hume API");

        while let Some(message) = socket.next().await {
            match message.map_err(RemoteError::Receive)? {
                Message::Text(text) => {
                    return serde_json::from_str(&text).map_err(RemoteError::InvalidResponse);
                }
                Message::Binary(data) => {
                    return serde_json::from_slice(&data).map_err(RemoteError::InvalidResponse);
                }
                Message::Close(_) => return Err(RemoteError::ClosedWithoutResponse),
                // control frames are not the answer
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            }
        }

        Err(RemoteError::ClosedWithoutResponse)
    }
}

#[async_trait]
impl AnalysisClient for HumeClient {
    async fn analyze(&self, clip: Vec<u8>) -> ResultPayload {
        let started = Instant::now();
        let clip_len = clip.len();
        let body = self.envelope(&clip).to_string();
        drop(clip);

        let result = match tokio::time::timeout(self.timeout, self.call(body)).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Timeout(self.timeout)),
        };

        match result {
            Ok(value) => {
                info!(
                    clip_bytes = clip_len,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Received response from Hume API"
                );
                ResultPayload::Analysis(value)
            }
            Err(err) => {
                warn!(
                    clip_bytes = clip_len,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Error calling Hume API: {}",
                    err
                );
                PipelineError::RemoteCallFailed(err.to_string()).to_result_payload()
            }
        }
    }

    fn model(&self) -> &str {
        &self.model
    }
}
