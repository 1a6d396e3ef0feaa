//! # Duration Prober
//!
//! Asks `ffprobe` how long a recording is. Only the legacy one-shot path
//! uses this, to decide whether the clip needs trimming; the streaming path
//! always trims and never measures.

use crate::audio::scratch::ScratchDir;
use async_trait::async_trait;
use std::fmt;
use std::io;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

#[derive(Debug)]
pub enum ProbeError {
    Io(io::Error),
    ExitStatus { code: Option<i32>, stderr: String },
    /// ffprobe succeeded but printed something that is not a number
    /// (MediaRecorder webm often reports `N/A`)
    Unparsable(String),
}

impl fmt::Display for ProbeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeError::Io(e) => write!(f, "ffprobe I/O error: {}", e),
            ProbeError::ExitStatus { code, stderr } => {
                write!(f, "ffprobe exited with {:?}: {}", code, stderr.trim())
            }
            ProbeError::Unparsable(out) => write!(f, "unparsable ffprobe duration '{}'", out),
        }
    }
}

impl std::error::Error for ProbeError {}

impl From<io::Error> for ProbeError {
    fn from(err: io::Error) -> Self {
        ProbeError::Io(err)
    }
}

#[async_trait]
pub trait DurationProber: Send + Sync {
    /// Media duration in seconds.
    async fn probe(&self, raw: &[u8]) -> Result<f64, ProbeError>;
}

#[derive(Debug, Clone)]
pub struct FfprobeProber {
    ffprobe_path: String,
}

impl FfprobeProber {
    pub fn new(ffprobe_path: impl Into<String>) -> Self {
        Self {
            ffprobe_path: ffprobe_path.into(),
        }
    }
}

/// Parse ffprobe's `default=noprint_wrappers=1:nokey=1` output.
pub fn parse_duration(stdout: &str) -> Result<f64, ProbeError> {
    let trimmed = stdout.trim();
    match trimmed.parse::<f64>() {
        Ok(seconds) if seconds.is_finite() && seconds >= 0.0 => Ok(seconds),
        _ => Err(ProbeError::Unparsable(trimmed.to_string())),
    }
}

#[async_trait]
impl DurationProber for FfprobeProber {
    async fn probe(&self, raw: &[u8]) -> Result<f64, ProbeError> {
        let scratch = ScratchDir::new()?;
        let input = scratch.write("probe.webm", raw).await?;

        let output = Command::new(&self.ffprobe_path)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(&input)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            warn!(exit_code = ?output.status.code(), "ffprobe failed: {}", stderr.trim());
            return Err(ProbeError::ExitStatus {
                code: output.status.code(),
                stderr,
            });
        }

        let seconds = parse_duration(&String::from_utf8_lossy(&output.stdout))?;
        debug!("Probed duration {:.2}s", seconds);
        Ok(seconds)
    }
}
