//! # Application State Management
//!
//! Shared state handed to every HTTP handler and WebSocket actor through
//! `web::Data<AppState>`.
//!
//! ## What lives here:
//! - **config**: runtime-updatable configuration (`Arc<RwLock<AppConfig>>`)
//! - **metrics**: request counters, per-endpoint timings, live connections
//! - **pipeline**: the audio pipeline, which owns the session buffer registry
//! - **start_time**: for uptime reporting
//!
//! ## Locking:
//! Config and HTTP metrics sit behind `std::sync::RwLock`; every critical
//! section is a copy or a counter bump, never an `.await`. The buffer registry
//! does its own per-entry locking and is not covered by these locks.

use crate::analysis::HumeClient;
use crate::audio::{FfmpegTranscoder, FfprobeProber, SessionBufferManager};
use crate::config::AppConfig;
use crate::pipeline::PipelineOrchestrator;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

#[derive(Clone)]
pub struct AppState {
    /// Application configuration (can be updated at runtime)
    pub config: Arc<RwLock<AppConfig>>,

    /// HTTP and connection metrics, updated by middleware and socket actors
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// Audio ingestion pipeline shared by all connections
    pub pipeline: Arc<PipelineOrchestrator>,

    /// When the server started
    pub start_time: Instant,
}

/// Counters collected across all HTTP requests and socket connections.
#[derive(Debug, Default)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed since server start
    pub request_count: u64,

    /// Requests that ended in a 4xx/5xx or a service error
    pub error_count: u64,

    /// Currently open `/ws/prosody` connections
    pub active_connections: u32,

    /// Connections accepted since server start
    pub total_connections: u64,

    /// Key: route pattern with method (e.g., "GET /api/v1/sessions/{session_id}")
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    /// Build the state and the production pipeline (ffmpeg, ffprobe, Hume)
    /// from `config`.
    pub fn new(config: AppConfig) -> Self {
        let pipeline = PipelineOrchestrator::new(
            Arc::new(SessionBufferManager::new()),
            Arc::new(FfmpegTranscoder::from_config(&config.audio)),
            Arc::new(FfprobeProber::new(config.audio.ffprobe_path.clone())),
            Arc::new(HumeClient::new(&config.hume)),
            config.audio.max_clip_seconds,
        );
        Self::with_pipeline(config, Arc::new(pipeline))
    }

    pub fn with_pipeline(config: AppConfig, pipeline: Arc<PipelineOrchestrator>) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            pipeline,
            start_time: Instant::now(),
        }
    }

    /// Copy of the current configuration; the lock is released on return.
    pub fn get_config(&self) -> AppConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the configuration after validating it.
    ///
    /// Limits and timeouts read per use (session cap, idle timeout) apply
    /// immediately. Tool paths and remote-service settings are wired into the
    /// pipeline at startup and take effect on restart.
    pub fn update_config(&self, new_config: AppConfig) -> Result<(), String> {
        match new_config.validate() {
            Ok(_) => {
                *self.config.write().unwrap_or_else(PoisonError::into_inner) = new_config;
                Ok(())
            }
            Err(e) => Err(e.to_string()),
        }
    }

    /// One finished HTTP exchange: totals and the per-endpoint entry move
    /// together under a single lock.
    pub fn record_request(&self, endpoint: &str, elapsed: Duration, failed: bool) {
        self.with_metrics(|metrics| {
            metrics.request_count += 1;
            let entry = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();
            entry.request_count += 1;
            entry.total_duration_ms += elapsed.as_millis() as u64;
            if failed {
                metrics.error_count += 1;
                entry.error_count += 1;
            }
        });
    }

    /// Called from the socket actor's `started()`.
    pub fn connection_opened(&self) {
        self.with_metrics(|metrics| {
            metrics.active_connections += 1;
            metrics.total_connections += 1;
        });
    }

    /// Called from the socket actor's `stopped()`. Never goes below zero.
    pub fn connection_closed(&self) {
        self.with_metrics(|metrics| {
            metrics.active_connections = metrics.active_connections.saturating_sub(1);
        });
    }

    pub fn active_connections(&self) -> u32 {
        self.metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .active_connections
    }

    /// Consistent copy for the health/metrics endpoints.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        let metrics = self.metrics.read().unwrap_or_else(PoisonError::into_inner);
        AppMetrics {
            request_count: metrics.request_count,
            error_count: metrics.error_count,
            active_connections: metrics.active_connections,
            total_connections: metrics.total_connections,
            endpoint_metrics: metrics.endpoint_metrics.clone(),
        }
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    fn with_metrics(&self, update: impl FnOnce(&mut AppMetrics)) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        update(&mut metrics);
    }
}

impl AppMetrics {
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Fraction of failed requests, 0.0 to 1.0.
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}
