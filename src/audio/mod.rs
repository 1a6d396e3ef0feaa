//! # Audio Ingestion Module
//!
//! Accumulates streamed audio per session and turns finished clips into the
//! canonical format expected by the analysis service.
//!
//! ## Key Components:
//! - **Accumulation Buffer**: append-only bytes for one recording
//! - **Session Buffer Manager**: registry of live buffers keyed by session id
//! - **Transcoder**: external `ffmpeg` call producing the canonical clip
//! - **Duration Prober**: external `ffprobe` call (legacy one-shot path only)
//!
//! ## Canonical Clip Format:
//! - **Sample Rate**: 16kHz
//! - **Bit Depth**: 16-bit signed PCM, little-endian
//! - **Channels**: Mono
//! - **Container**: WAV

pub mod buffer;
pub mod prober;
mod scratch;
pub mod session;
pub mod transcoder;

pub use prober::{DurationProber, FfprobeProber, ProbeError};
pub use session::{NoData, SessionBufferManager};
pub use transcoder::{FfmpegTranscoder, PcmFormat, TranscodeError, Transcoder};
