//! # Prosody WebSocket Handler
//!
//! Clients connect to `/ws/prosody` and stream one recording at a time for
//! emotion analysis. Each connection is one actor and one session: the
//! session id is generated at upgrade time and never supplied by the client.
//!
//! ## WebSocket Protocol:
//! 1. **Connection**: server sends `{"event":"connected","session_id":"..."}`
//! 2. **Start**: `{"event":"start_recording"}` allocates a fresh buffer
//! 3. **Chunks**: `{"event":"audio_chunk","audio":"<base64>"}` (or binary
//!    frames carrying raw bytes) are appended in arrival order
//! 4. **Finish**: `{"event":"finish_recording"}` returns exactly one
//!    `{"event":"prosody_results","data":{...}}`
//! 5. **Legacy**: `{"event":"audio_data","audio":"<base64>"}` analyses a
//!    whole recording in one go
//!
//! A chunk that fails to decode produces `{"event":"error","message":...}`
//! and the recording continues.
//!
//! ## Scheduling:
//! `finish_recording` takes the buffer inside the actor, in event order.
//! Only the work on the taken bytes (ffmpeg, ffprobe, the remote call) runs on
//! a spawned tokio task, so the actor keeps serving its mailbox and heartbeat.
//! The result comes back through `do_send`, which is silently dropped if the
//! connection has gone away in the meantime.
//!
//! Frames up to `performance.max_frame_bytes` are accepted; a legacy
//! `audio_data` event carries the whole recording in one frame.

use crate::analysis::ResultPayload;
use crate::error::{AppError, PipelineError};
use crate::pipeline::PipelineOrchestrator;
use crate::state::AppState;

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// Events sent by the browser.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientEvent {
    StartRecording,
    AudioChunk {
        /// Base64 encoded fragment of the recording
        audio: Option<String>,
    },
    FinishRecording,
    /// Legacy one-shot upload of a complete recording
    AudioData { audio: Option<String> },
}

/// Events sent to the browser.
#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServerEvent {
    Connected { session_id: String },
    ProsodyResults { data: ResultPayload },
    Error { message: String },
}

impl ServerEvent {
    fn to_json(&self) -> Option<String> {
        match serde_json::to_string(self) {
            Ok(json) => Some(json),
            Err(e) => {
                error!("Failed to serialize server event: {}", e);
                None
            }
        }
    }
}

/// One actor per client connection.
pub struct ProsodySocket {
    session_id: String,
    pipeline: Arc<PipelineOrchestrator>,
    state: web::Data<AppState>,
    last_heartbeat: Instant,
}

impl ProsodySocket {
    pub fn new(state: web::Data<AppState>) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            pipeline: state.pipeline.clone(),
            state,
            last_heartbeat: Instant::now(),
        }
    }

    fn send_event(&self, ctx: &mut ws::WebsocketContext<Self>, event: ServerEvent) {
        if let Some(json) = event.to_json() {
            ctx.text(json);
        }
    }

    fn handle_event(&mut self, event: ClientEvent, ctx: &mut ws::WebsocketContext<Self>) {
        match event {
            ClientEvent::StartRecording => self.pipeline.start(&self.session_id),
            ClientEvent::AudioChunk { audio } => {
                let appended = match audio {
                    Some(audio) => self.pipeline.append_chunk(&self.session_id, &audio),
                    None => Err(PipelineError::Decode("missing 'audio' field".to_string())),
                };
                if let Err(err) = appended {
                    self.send_event(
                        ctx,
                        ServerEvent::Error {
                            message: err.chunk_event_message(),
                        },
                    );
                }
            }
            ClientEvent::FinishRecording => match self.pipeline.take_recording(&self.session_id) {
                Ok(raw) => {
                    let pipeline = self.pipeline.clone();
                    let session_id = self.session_id.clone();
                    Self::spawn_finalize(ctx, async move {
                        pipeline.finalize_recording(&session_id, raw).await
                    });
                }
                Err(no_data) => self.send_event(ctx, ServerEvent::ProsodyResults { data: no_data }),
            },
            ClientEvent::AudioData { audio } => {
                let pipeline = self.pipeline.clone();
                let session_id = self.session_id.clone();
                Self::spawn_finalize(ctx, async move {
                    match audio {
                        Some(audio) => pipeline.legacy_one_shot(&session_id, &audio).await,
                        None => PipelineError::Decode("missing 'audio' field".to_string()).to_result_payload(),
                    }
                });
            }
        }
    }

    /// Run finalize work off the actor and post the result back.
    fn spawn_finalize<F>(ctx: &mut ws::WebsocketContext<Self>, work: F)
    where
        F: Future<Output = ResultPayload> + Send + 'static,
    {
        let addr = ctx.address();
        tokio::spawn(async move {
            let payload = work.await;
            addr.do_send(SendResults(payload));
        });
    }
}

/// Finalize outcome delivered back to the connection.
#[derive(Message)]
#[rtype(result = "()")]
struct SendResults(ResultPayload);

impl Actor for ProsodySocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        self.state.connection_opened();
        info!(session_id = %self.session_id, "WebSocket connection started");

        self.send_event(
            ctx,
            ServerEvent::Connected {
                session_id: self.session_id.clone(),
            },
        );

        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!(session_id = %act.session_id, "WebSocket heartbeat timeout, closing connection");
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        self.pipeline.disconnect(&self.session_id);
        self.state.connection_closed();
        info!(session_id = %self.session_id, "WebSocket connection stopped");
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for ProsodySocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => {
                self.last_heartbeat = Instant::now();
                match serde_json::from_str::<ClientEvent>(&text) {
                    Ok(event) => self.handle_event(event, ctx),
                    Err(err) => {
                        warn!(session_id = %self.session_id, "Invalid client message: {}", err);
                        self.send_event(
                            ctx,
                            ServerEvent::Error {
                                message: format!("Invalid message: {}", err),
                            },
                        );
                    }
                }
            }
            Ok(ws::Message::Binary(data)) => {
                self.last_heartbeat = Instant::now();
                self.pipeline.append_raw(&self.session_id, &data);
            }
            Ok(ws::Message::Ping(data)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!(session_id = %self.session_id, "WebSocket closed: {:?}", reason);
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!(session_id = %self.session_id, "Received unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!(session_id = %self.session_id, "WebSocket protocol error: {}", err);
                ctx.stop();
            }
        }
    }
}

impl Handler<SendResults> for ProsodySocket {
    type Result = ();

    fn handle(&mut self, msg: SendResults, ctx: &mut Self::Context) {
        debug!(session_id = %self.session_id, is_error = msg.0.is_error(), "Sending prosody results");
        self.send_event(ctx, ServerEvent::ProsodyResults { data: msg.0 });
    }
}

/// Refuse new connections once the configured cap is reached.
pub fn ensure_capacity(state: &AppState) -> Result<(), AppError> {
    let limit = state.get_config().performance.max_concurrent_sessions;
    let active = state.active_connections() as usize;
    if active >= limit {
        return Err(AppError::ServiceUnavailable(format!(
            "Too many concurrent sessions ({}/{})",
            active, limit
        )));
    }
    Ok(())
}

/// `GET /ws/prosody`: upgrade to a WebSocket served by [`ProsodySocket`].
pub async fn prosody_websocket(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, actix_web::Error> {
    info!("New WebSocket connection request from: {:?}", req.connection_info().peer_addr());

    if let Err(err) = ensure_capacity(&state) {
        warn!("Rejecting WebSocket connection: {}", err);
        return Err(err.into());
    }

    let max_frame_bytes = state.get_config().performance.max_frame_bytes;
    ws::WsResponseBuilder::new(ProsodySocket::new(state), &req, stream)
        .frame_size(max_frame_bytes)
        .start()
}
