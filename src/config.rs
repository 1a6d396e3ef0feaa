//! # Configuration Management
//!
//! Loads the application configuration from multiple sources:
//! - Built-in defaults (the `Default` impl below)
//! - An optional `config.toml` in the working directory
//! - Environment variables prefixed with `APP_` (nested keys use `__`,
//!   e.g. `APP_HUME__MODEL=prosody`)
//! - A few well-known variables used by deployment platforms and the
//!   original tooling: `HOST`, `PORT`, `HUME_API_KEY`
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Well-known variables (`HOST`, `PORT`, `HUME_API_KEY`)
//! 2. `APP_` environment variables
//! 3. `config.toml`
//! 4. Defaults

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// The WebSocket default of 64 KiB; smaller limits would reject ordinary chunks.
const MIN_FRAME_BYTES: usize = 64 * 1024;

/// Main application configuration.
///
/// ## Sections:
/// - `server`: where the HTTP/WebSocket listener binds
/// - `hume`: remote emotion-analysis service connection
/// - `audio`: external tools and the canonical clip format
/// - `performance`: session limits and idle expiry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub hume: HumeConfig,
    pub audio: AudioConfig,
    pub performance: PerformanceConfig,
}

/// Server-specific configuration settings.
///
/// - `host = "127.0.0.1"`: only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: accept connections from any address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Remote analysis service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HumeConfig {
    /// Streaming models endpoint (`wss://...`)
    pub websocket_url: String,
    /// Credential sent as connection parameters, never inside the message body
    pub api_key: String,
    /// Analysis model requested in the envelope (`{"models": {"prosody": {}}}`)
    pub model: String,
    /// Upper bound on one connect/send/receive round trip
    pub request_timeout_secs: u64,
}

impl HumeConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// External tool paths and the canonical clip format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    /// Target sample rate in Hz
    pub sample_rate: u32,
    /// Target channel count (1 = mono)
    pub channels: u8,
    /// Longest clip the remote service accepts, in seconds
    pub max_clip_seconds: u32,
}

/// Performance and resource limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    /// Connections beyond this count are refused at upgrade time
    pub max_concurrent_sessions: usize,
    /// Buffers with no activity for this long are evicted
    pub session_idle_timeout_secs: u64,
    /// How often the idle sweep runs
    pub session_sweep_interval_secs: u64,
    /// Largest WebSocket frame accepted from a client; `audio_data` carries a
    /// whole base64 recording in one frame
    pub max_frame_bytes: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 5000,
            },
            hume: HumeConfig {
                websocket_url: "wss://api.hume.ai/v0/stream/models".to_string(),
                api_key: String::new(),
                model: "prosody".to_string(),
                request_timeout_secs: 15,
            },
            audio: AudioConfig {
                ffmpeg_path: "ffmpeg".to_string(),
                ffprobe_path: "ffprobe".to_string(),
                sample_rate: 16000,
                channels: 1,
                max_clip_seconds: 5,
            },
            performance: PerformanceConfig {
                max_concurrent_sessions: 100,
                session_idle_timeout_secs: 300,
                session_sweep_interval_secs: 30,
                max_frame_bytes: 8 * 1024 * 1024,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from all sources in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=3000`: override server port
    /// - `APP_HUME__REQUEST_TIMEOUT_SECS=30`: allow slower analysis calls
    /// - `APP_AUDIO__FFMPEG_PATH=/opt/ffmpeg/bin/ffmpeg`
    /// - `HUME_API_KEY=...`: the credential, without the `APP_` prefix
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        if let Ok(key) = env::var("HUME_API_KEY") {
            settings = settings.set_override("hume.api_key", key)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// An empty API key is allowed: the service still starts and every
    /// analysis comes back as a well-formed error result from the remote side.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if !self.hume.websocket_url.starts_with("ws://") && !self.hume.websocket_url.starts_with("wss://") {
            return Err(anyhow::anyhow!(
                "Hume websocket_url must use ws:// or wss://, got '{}'",
                self.hume.websocket_url
            ));
        }

        if self.hume.model.trim().is_empty() {
            return Err(anyhow::anyhow!("Hume model name cannot be empty"));
        }

        if self.hume.request_timeout_secs == 0 {
            return Err(anyhow::anyhow!("Hume request timeout must be greater than 0"));
        }

        if self.audio.ffmpeg_path.is_empty() || self.audio.ffprobe_path.is_empty() {
            return Err(anyhow::anyhow!("ffmpeg and ffprobe paths cannot be empty"));
        }

        if self.audio.sample_rate == 0 || self.audio.channels == 0 {
            return Err(anyhow::anyhow!("Target sample rate and channel count must be greater than 0"));
        }

        if self.audio.max_clip_seconds == 0 {
            return Err(anyhow::anyhow!("Max clip length must be greater than 0"));
        }

        if self.performance.max_concurrent_sessions == 0 {
            return Err(anyhow::anyhow!("Max concurrent sessions must be greater than 0"));
        }

        if self.performance.session_idle_timeout_secs == 0 || self.performance.session_sweep_interval_secs == 0 {
            return Err(anyhow::anyhow!("Session idle timeout and sweep interval must be greater than 0"));
        }

        if self.performance.max_frame_bytes < MIN_FRAME_BYTES {
            return Err(anyhow::anyhow!(
                "Max frame size must be at least {} bytes, got {}",
                MIN_FRAME_BYTES,
                self.performance.max_frame_bytes
            ));
        }

        Ok(())
    }

    pub fn session_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.performance.session_idle_timeout_secs)
    }

    pub fn session_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.performance.session_sweep_interval_secs)
    }

    /// Copy of this configuration that is safe to hand to clients.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.hume.api_key.is_empty() {
            copy.hume.api_key = "********".to_string();
        }
        copy
    }

    /// Apply a partial JSON update (used by `PUT /api/v1/config`).
    ///
    /// Only the fields present in the document change, e.g.
    /// `{"hume": {"request_timeout_secs": 30}}` leaves everything else intact.
    /// The result is validated before returning.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial_config: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(server) = partial_config.get("server") {
            if let Some(host) = server.get("host").and_then(|v| v.as_str()) {
                self.server.host = host.to_string();
            }
            if let Some(port) = server.get("port").and_then(|v| v.as_u64()) {
                self.server.port = u16::try_from(port)
                    .map_err(|_| anyhow::anyhow!("Server port {} out of range", port))?;
            }
        }

        if let Some(hume) = partial_config.get("hume") {
            if let Some(url) = hume.get("websocket_url").and_then(|v| v.as_str()) {
                self.hume.websocket_url = url.to_string();
            }
            if let Some(key) = hume.get("api_key").and_then(|v| v.as_str()) {
                self.hume.api_key = key.to_string();
            }
            if let Some(model) = hume.get("model").and_then(|v| v.as_str()) {
                self.hume.model = model.to_string();
            }
            if let Some(timeout) = hume.get("request_timeout_secs").and_then(|v| v.as_u64()) {
                self.hume.request_timeout_secs = timeout;
            }
        }

        if let Some(audio) = partial_config.get("audio") {
            if let Some(path) = audio.get("ffmpeg_path").and_then(|v| v.as_str()) {
                self.audio.ffmpeg_path = path.to_string();
            }
            if let Some(path) = audio.get("ffprobe_path").and_then(|v| v.as_str()) {
                self.audio.ffprobe_path = path.to_string();
            }
            if let Some(seconds) = audio.get("max_clip_seconds").and_then(|v| v.as_u64()) {
                self.audio.max_clip_seconds = seconds as u32;
            }
        }

        if let Some(performance) = partial_config.get("performance") {
            if let Some(sessions) = performance.get("max_concurrent_sessions").and_then(|v| v.as_u64()) {
                self.performance.max_concurrent_sessions = sessions as usize;
            }
            if let Some(idle) = performance.get("session_idle_timeout_secs").and_then(|v| v.as_u64()) {
                self.performance.session_idle_timeout_secs = idle;
            }
            if let Some(sweep) = performance.get("session_sweep_interval_secs").and_then(|v| v.as_u64()) {
                self.performance.session_sweep_interval_secs = sweep;
            }
            if let Some(frame) = performance.get("max_frame_bytes").and_then(|v| v.as_u64()) {
                self.performance.max_frame_bytes = frame as usize;
            }
        }

        self.validate()?;
        Ok(())
    }
}
