//! # Prosody Backend - Main Application Entry Point
//!
//! Real-time speech emotion analysis server. Browsers stream recorded audio
//! over a WebSocket; each finished recording is normalised with ffmpeg and
//! sent to the Hume prosody model, and the scores go back on the same socket.
//!
//! ## Application Architecture:
//! - **config**: layered configuration (defaults, `config.toml`, environment)
//! - **state**: shared application state and metrics
//! - **audio**: session buffers and the ffmpeg/ffprobe adapters
//! - **analysis**: the remote emotion-analysis client and result types
//! - **pipeline**: start → chunk* → finish orchestration and failure mapping
//! - **websocket**: one actor per client connection (`/ws/prosody`)
//! - **health**, **handlers**: HTTP endpoints under `/api/v1`
//! - **middleware**: per-endpoint request metrics
//! - **error**: HTTP error responses and the pipeline error taxonomy

mod analysis;
mod audio;
mod config;
mod error;
mod handlers;
mod health;
mod middleware;
mod pipeline;
mod state;
mod websocket;

use crate::config::AppConfig;
use crate::state::AppState;
use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Set by the signal handler task; polled by [`wait_for_shutdown`].
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

#[actix_web::main]
async fn main() -> Result<()> {
    // a missing .env file is fine
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting prosody-backend v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);
    info!("Hume API endpoint: {}", config.hume.websocket_url);
    if config.hume.api_key.is_empty() {
        warn!("HUME_API_KEY is not set; analysis requests will fail");
    }

    let app_state = AppState::new(config.clone());
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    setup_signal_handlers();
    let sweeper = spawn_idle_sweeper(app_state.clone());

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        // the demo page may be served from anywhere
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(middleware::RequestMetrics)
            .wrap(TracingLogger::default())
            .route("/ws/prosody", web::get().to(websocket::prosody_websocket))
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config))
                    .route("/config", web::put().to(handlers::update_config))
                    .route("/sessions", web::get().to(handlers::list_sessions))
                    .route("/sessions/{session_id}", web::get().to(handlers::get_session)),
            )
            .route("/health", web::get().to(health::health_check))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    sweeper.abort();
    info!("Server stopped gracefully");
    Ok(())
}

/// `RUST_LOG` controls verbosity; defaults to
/// `prosody_backend=debug,actix_web=info`.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "prosody_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

/// Periodically drop recordings that were started and then abandoned.
///
/// Timeout and period are re-read from the live config on every tick, so a
/// `PUT /api/v1/config` takes effect without a restart.
fn spawn_idle_sweeper(state: AppState) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let config = state.get_config();
            tokio::time::sleep(config.session_sweep_interval()).await;

            let evicted = state.pipeline.evict_idle(state.get_config().session_idle_timeout());
            debug!(
                evicted = evicted.len(),
                remaining = state.pipeline.buffers().len(),
                "Idle sweep finished"
            );
        }
    })
}

/// Listen for SIGTERM/SIGINT and raise [`SHUTDOWN_SIGNAL`].
fn setup_signal_handlers() {
    tokio::spawn(async {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) = match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(term), Ok(int)) => (term, int),
            (Err(e), _) | (_, Err(e)) => {
                error!("Failed to install signal handlers: {}", e);
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
