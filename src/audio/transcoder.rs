//! # Transcoder Adapter
//!
//! Converts whatever the browser recorded (webm/opus in practice, but
//! ffmpeg detects the container itself) into the canonical clip the
//! analysis service accepts: mono, 16-bit little-endian PCM at 16 kHz in a
//! WAV container, optionally truncated.
//!
//! ## Contract:
//! `convert(raw, max_duration_seconds)` where `0` means "no trimming".
//! A non-zero ffmpeg exit is returned as [`TranscodeError::ExitStatus`]
//! (exit code plus captured stderr), never as a panic. Temporary files are
//! removed on every path.

use crate::audio::scratch::ScratchDir;
use crate::config::AudioConfig;
use async_trait::async_trait;
use std::fmt;
use std::io;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, error, info};

/// Target PCM format handed to ffmpeg.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u8,
}

impl Default for PcmFormat {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            channels: 1,
        }
    }
}

#[derive(Debug)]
pub enum TranscodeError {
    /// Scratch files could not be written/read, or ffmpeg could not be spawned
    Io(io::Error),
    /// ffmpeg ran and exited non-zero
    ExitStatus { code: Option<i32>, stderr: String },
}

impl fmt::Display for TranscodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranscodeError::Io(e) => write!(f, "ffmpeg I/O error: {}", e),
            TranscodeError::ExitStatus { code: Some(code), stderr } => {
                write!(f, "ffmpeg exited with code {}: {}", code, stderr.trim())
            }
            TranscodeError::ExitStatus { code: None, stderr } => {
                write!(f, "ffmpeg terminated by signal: {}", stderr.trim())
            }
        }
    }
}

impl std::error::Error for TranscodeError {}

impl From<io::Error> for TranscodeError {
    fn from(err: io::Error) -> Self {
        TranscodeError::Io(err)
    }
}

#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn convert(&self, raw: &[u8], max_duration_seconds: u32) -> Result<Vec<u8>, TranscodeError>;
}

/// [`Transcoder`] backed by the `ffmpeg` binary.
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    ffmpeg_path: String,
    format: PcmFormat,
}

impl FfmpegTranscoder {
    pub fn new(ffmpeg_path: impl Into<String>, format: PcmFormat) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            format,
        }
    }

    pub fn from_config(config: &AudioConfig) -> Self {
        Self::new(
            config.ffmpeg_path.clone(),
            PcmFormat {
                sample_rate: config.sample_rate,
                channels: config.channels,
            },
        )
    }

    /// ffmpeg argument list for one conversion.
    pub fn build_args(&self, input: &str, output: &str, max_duration_seconds: u32) -> Vec<String> {
        let mut args = vec![
            "-i".to_string(),
            input.to_string(),
            "-acodec".to_string(),
            "pcm_s16le".to_string(),
            "-ac".to_string(),
            self.format.channels.to_string(),
            "-ar".to_string(),
            self.format.sample_rate.to_string(),
        ];

        if max_duration_seconds > 0 {
            args.push("-t".to_string());
            args.push(max_duration_seconds.to_string());
        }

        args.push("-y".to_string());
        args.push(output.to_string());
        args
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn convert(&self, raw: &[u8], max_duration_seconds: u32) -> Result<Vec<u8>, TranscodeError> {
        let scratch = ScratchDir::new()?;
        let input = scratch.write("input.webm", raw).await?;
        let output = scratch.path("output.wav");

        let args = self.build_args(
            &input.to_string_lossy(),
            &output.to_string_lossy(),
            max_duration_seconds,
        );
        debug!("Running {} {}", self.ffmpeg_path, args.join(" "));

        let result = Command::new(&self.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr).into_owned();
            error!(
                exit_code = ?result.status.code(),
                "ffmpeg conversion failed: {}",
                stderr.trim()
            );
            return Err(TranscodeError::ExitStatus {
                code: result.status.code(),
                stderr,
            });
        }

        let wav = tokio::fs::read(&output).await?;
        info!(
            input_bytes = raw.len(),
            output_bytes = wav.len(),
            trim_seconds = max_duration_seconds,
            "Converted audio to WAV"
        );
        Ok(wav)
    }
}
