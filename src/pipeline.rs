//! # Pipeline Orchestrator
//!
//! Wires buffering, transcoding and remote analysis into the per-session
//! event protocol:
//!
//! ```text
//! Idle --start--> Recording --chunk*--> Recording --finish--> Finalizing --> Idle
//! ```
//!
//! plus the legacy one-shot variant (`audio_data`) that carries a whole
//! recording in one event and never touches the buffer registry.
//!
//! ## Trimming Policy:
//! - **Streaming (`finish`)**: always cut at `max_clip_seconds`, no measuring
//! - **Legacy**: probe the duration first and cut only when it is longer than
//!   `max_clip_seconds`; an unknown duration means no cut
//!
//! ## Failure Mapping:
//! Every finalize produces exactly one [`ResultPayload`]. Failures turn into
//! the fixed error objects from [`PipelineError::to_result_payload`]; nothing
//! here returns a transport-level error. A bad chunk is the one exception: it
//! returns [`PipelineError::Decode`] so the caller can emit a session-scoped
//! `error` event while the recording carries on.

use crate::analysis::summary::{format_top, top_emotions};
use crate::analysis::{AnalysisClient, ResultPayload};
use crate::audio::{DurationProber, NoData, SessionBufferManager, Transcoder};
use crate::error::PipelineError;
use base64::{engine::general_purpose, Engine as _};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Counters exposed on the metrics endpoint.
#[derive(Debug, Default)]
pub struct PipelineStats {
    chunks_received: AtomicU64,
    bytes_received: AtomicU64,
    chunk_errors: AtomicU64,
    analyses_completed: AtomicU64,
    analyses_failed: AtomicU64,
    sessions_evicted: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineStatsSnapshot {
    pub chunks_received: u64,
    pub bytes_received: u64,
    pub chunk_errors: u64,
    pub analyses_completed: u64,
    pub analyses_failed: u64,
    pub sessions_evicted: u64,
}

impl PipelineStats {
    pub fn snapshot(&self) -> PipelineStatsSnapshot {
        PipelineStatsSnapshot {
            chunks_received: self.chunks_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            chunk_errors: self.chunk_errors.load(Ordering::Relaxed),
            analyses_completed: self.analyses_completed.load(Ordering::Relaxed),
            analyses_failed: self.analyses_failed.load(Ordering::Relaxed),
            sessions_evicted: self.sessions_evicted.load(Ordering::Relaxed),
        }
    }
}

pub struct PipelineOrchestrator {
    buffers: Arc<SessionBufferManager>,
    transcoder: Arc<dyn Transcoder>,
    prober: Arc<dyn DurationProber>,
    analysis: Arc<dyn AnalysisClient>,
    max_clip_seconds: u32,
    stats: PipelineStats,
}

impl PipelineOrchestrator {
    pub fn new(
        buffers: Arc<SessionBufferManager>,
        transcoder: Arc<dyn Transcoder>,
        prober: Arc<dyn DurationProber>,
        analysis: Arc<dyn AnalysisClient>,
        max_clip_seconds: u32,
    ) -> Self {
        Self {
            buffers,
            transcoder,
            prober,
            analysis,
            max_clip_seconds,
            stats: PipelineStats::default(),
        }
    }

    pub fn buffers(&self) -> &SessionBufferManager {
        &self.buffers
    }

    pub fn stats(&self) -> PipelineStatsSnapshot {
        self.stats.snapshot()
    }

    /// `start_recording`: fresh buffer, replacing any unfinished one.
    pub fn start(&self, session_id: &str) {
        if self.buffers.start(session_id) {
            info!(session_id, "Restarted recording, previous buffer discarded");
        } else {
            info!(session_id, "Started new recording session");
        }
    }

    /// `audio_chunk`: decode a base64 chunk and append it.
    ///
    /// Returns the buffered length after the append. A decode failure leaves
    /// the buffer untouched.
    pub fn append_chunk(&self, session_id: &str, encoded: &str) -> Result<usize, PipelineError> {
        match general_purpose::STANDARD.decode(encoded) {
            Ok(bytes) => Ok(self.append_raw(session_id, &bytes)),
            Err(e) => {
                self.stats.chunk_errors.fetch_add(1, Ordering::Relaxed);
                warn!(session_id, "Error handling audio chunk: {}", e);
                Err(PipelineError::Decode(e.to_string()))
            }
        }
    }

    /// Append already-decoded bytes (binary frames).
    pub fn append_raw(&self, session_id: &str, bytes: &[u8]) -> usize {
        let total = self.buffers.append(session_id, bytes);
        self.stats.chunks_received.fetch_add(1, Ordering::Relaxed);
        self.stats.bytes_received.fetch_add(bytes.len() as u64, Ordering::Relaxed);
        debug!(session_id, chunk_bytes = bytes.len(), buffered_bytes = total, "Received audio chunk");
        total
    }

    /// `finish_recording`, first half: remove the whole buffer.
    ///
    /// Must run in event order, before the next event of the same session is
    /// handled; a `start_recording` right behind the finish then opens a new
    /// buffer instead of wiping this one. `Err` carries the ready-made
    /// `No data` result.
    pub fn take_recording(&self, session_id: &str) -> Result<Vec<u8>, ResultPayload> {
        match self.buffers.take_and_clear(session_id) {
            Ok(raw) => {
                info!(session_id, raw_bytes = raw.len(), "Processing complete audio");
                Ok(raw)
            }
            Err(NoData) => {
                warn!(session_id, "Finish requested with no buffered audio");
                let payload = PipelineError::NoData.to_result_payload();
                self.record_outcome(session_id, &payload);
                Err(payload)
            }
        }
    }

    /// `finish_recording`, second half: transcode the taken bytes with the
    /// fixed cap and analyse. Touches no shared state but the counters.
    pub async fn finalize_recording(&self, session_id: &str, raw: Vec<u8>) -> ResultPayload {
        let payload = self.convert_and_analyze(session_id, &raw, self.max_clip_seconds).await;
        self.record_outcome(session_id, &payload);
        payload
    }

    /// `audio_data`: one-shot analysis of a complete recording.
    pub async fn legacy_one_shot(&self, session_id: &str, encoded: &str) -> ResultPayload {
        let raw = match general_purpose::STANDARD.decode(encoded) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(session_id, "Error processing audio data: {}", e);
                let payload = PipelineError::Decode(e.to_string()).to_result_payload();
                self.record_outcome(session_id, &payload);
                return payload;
            }
        };
        info!(session_id, raw_bytes = raw.len(), "Received audio data (legacy one-shot)");

        let trim = self.legacy_trim_seconds(session_id, &raw).await;
        let payload = self.convert_and_analyze(session_id, &raw, trim).await;
        self.record_outcome(session_id, &payload);
        payload
    }

    /// Connection gone: drop whatever was buffered. No result is produced.
    pub fn disconnect(&self, session_id: &str) {
        if self.buffers.clear(session_id) {
            info!(session_id, "Client disconnected, discarded unfinished recording");
        } else {
            debug!(session_id, "Client disconnected, nothing to clean up");
        }
    }

    /// Drop recordings nobody has touched for `max_idle`.
    pub fn evict_idle(&self, max_idle: Duration) -> Vec<String> {
        let evicted = self.buffers.evict_idle(max_idle);
        if !evicted.is_empty() {
            self.stats
                .sessions_evicted
                .fetch_add(evicted.len() as u64, Ordering::Relaxed);
            info!(count = evicted.len(), "Evicted idle session buffers: {:?}", evicted);
        }
        evicted
    }

    async fn legacy_trim_seconds(&self, session_id: &str, raw: &[u8]) -> u32 {
        match self.prober.probe(raw).await {
            Ok(duration) if duration > f64::from(self.max_clip_seconds) => {
                info!(
                    session_id,
                    "Audio is {:.2} seconds, trimming to {} seconds", duration, self.max_clip_seconds
                );
                self.max_clip_seconds
            }
            Ok(duration) => {
                debug!(session_id, "Audio is {:.2} seconds, no trimming needed", duration);
                0
            }
            Err(e) => {
                warn!(session_id, "Could not determine audio duration, not trimming: {}", e);
                0
            }
        }
    }

    async fn convert_and_analyze(&self, session_id: &str, raw: &[u8], trim_seconds: u32) -> ResultPayload {
        let started = Instant::now();

        let clip = match self.transcoder.convert(raw, trim_seconds).await {
            Ok(clip) => clip,
            Err(e) => {
                warn!(session_id, "Conversion failed: {}", e);
                return PipelineError::ConversionFailed(e.to_string()).to_result_payload();
            }
        };

        let payload = self.analysis.analyze(clip).await;
        debug!(
            session_id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Finalize finished"
        );
        payload
    }

    fn record_outcome(&self, session_id: &str, payload: &ResultPayload) {
        if payload.is_error() {
            self.stats.analyses_failed.fetch_add(1, Ordering::Relaxed);
            return;
        }

        self.stats.analyses_completed.fetch_add(1, Ordering::Relaxed);
        if let ResultPayload::Analysis(value) = payload {
            let top = top_emotions(value, self.analysis.model(), 3);
            if !top.is_empty() {
                info!(session_id, "Top emotions: {}", format_top(&top));
            }
        }
    }
}

/// In-memory stand-ins for the external tools and the remote service.
#[cfg(test)]
pub(crate) mod fakes {
    use crate::analysis::{AnalysisClient, ResultPayload};
    use crate::audio::{DurationProber, ProbeError, TranscodeError, Transcoder};
    use crate::error::PipelineError;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    /// Records every call and answers with a canned clip.
    #[derive(Default)]
    pub(crate) struct FakeTranscoder {
        pub(crate) calls: Mutex<Vec<(Vec<u8>, u32)>>,
        pub(crate) fail: bool,
    }

    #[async_trait]
    impl Transcoder for FakeTranscoder {
        async fn convert(&self, raw: &[u8], max_duration_seconds: u32) -> Result<Vec<u8>, TranscodeError> {
            self.calls.lock().unwrap().push((raw.to_vec(), max_duration_seconds));
            if self.fail {
                Err(TranscodeError::ExitStatus {
                    code: Some(1),
                    stderr: "Invalid data found when processing input".into(),
                })
            } else {
                Ok(b"WAV".to_vec())
            }
        }
    }

    pub(crate) struct FakeProber {
        pub(crate) duration: Option<f64>,
    }

    #[async_trait]
    impl DurationProber for FakeProber {
        async fn probe(&self, _raw: &[u8]) -> Result<f64, ProbeError> {
            self.duration.ok_or_else(|| ProbeError::Unparsable("N/A".into()))
        }
    }

    #[derive(Default)]
    pub(crate) struct FakeAnalysis {
        pub(crate) clips: Mutex<Vec<Vec<u8>>>,
        pub(crate) unreachable: bool,
    }

    #[async_trait]
    impl AnalysisClient for FakeAnalysis {
        async fn analyze(&self, clip: Vec<u8>) -> ResultPayload {
            self.clips.lock().unwrap().push(clip);
            if self.unreachable {
                PipelineError::RemoteCallFailed("Connection refused (os error 111)".into()).to_result_payload()
            } else {
                ResultPayload::Analysis(json!({
                    "prosody": {"predictions": [{"emotions": [
                        {"name": "Calmness", "score": 0.7},
                        {"name": "Interest", "score": 0.2}
                    ]}]}
                }))
            }
        }

        fn model(&self) -> &str {
            "prosody"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fakes::{FakeAnalysis, FakeProber, FakeTranscoder};
    use super::*;

    struct Harness {
        pipeline: PipelineOrchestrator,
        transcoder: Arc<FakeTranscoder>,
        analysis: Arc<FakeAnalysis>,
    }

    fn harness(transcoder: FakeTranscoder, duration: Option<f64>, analysis: FakeAnalysis) -> Harness {
        let transcoder = Arc::new(transcoder);
        let analysis = Arc::new(analysis);
        let pipeline = PipelineOrchestrator::new(
            Arc::new(SessionBufferManager::new()),
            transcoder.clone(),
            Arc::new(FakeProber { duration }),
            analysis.clone(),
            5,
        );
        Harness {
            pipeline,
            transcoder,
            analysis,
        }
    }

    fn default_harness() -> Harness {
        harness(FakeTranscoder::default(), Some(3.0), FakeAnalysis::default())
    }

    async fn finish(pipeline: &PipelineOrchestrator, session_id: &str) -> ResultPayload {
        match pipeline.take_recording(session_id) {
            Ok(raw) => pipeline.finalize_recording(session_id, raw).await,
            Err(payload) => payload,
        }
    }

    fn b64(bytes: &[u8]) -> String {
        general_purpose::STANDARD.encode(bytes)
    }

    fn error_fields(payload: &ResultPayload) -> (String, String) {
        match payload {
            ResultPayload::Error(d) => (d.error.clone(), d.message.clone()),
            other => panic!("expected error payload, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_finish_passes_concatenated_chunks_with_fixed_cap() {
        let h = default_harness();
        h.pipeline.start("s1");
        h.pipeline.append_chunk("s1", &b64(&[1u8; 1000])).unwrap();
        assert_eq!(h.pipeline.append_chunk("s1", &b64(&[2u8; 500])).unwrap(), 1500);

        let payload = finish(&h.pipeline, "s1").await;
        assert!(!payload.is_error());

        let calls = h.transcoder.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        let (raw, trim) = &calls[0];
        assert_eq!(raw.len(), 1500);
        assert!(raw[..1000].iter().all(|&b| b == 1));
        assert!(raw[1000..].iter().all(|&b| b == 2));
        assert_eq!(*trim, 5);
        assert_eq!(h.analysis.clips.lock().unwrap()[0], b"WAV".to_vec());
    }

    #[tokio::test]
    async fn test_restart_after_take_does_not_touch_taken_recording() {
        let h = default_harness();
        h.pipeline.start("s1");
        h.pipeline.append_raw("s1", b"FIRST-RECORDING");

        let raw = h.pipeline.take_recording("s1").unwrap();
        // next recording starts before the first one is finalized
        h.pipeline.start("s1");
        h.pipeline.append_raw("s1", b"SECOND");

        let payload = h.pipeline.finalize_recording("s1", raw).await;
        assert!(!payload.is_error());
        assert_eq!(h.transcoder.calls.lock().unwrap()[0].0, b"FIRST-RECORDING".to_vec());
        assert_eq!(h.pipeline.buffers().buffered_len("s1"), Some(6));
    }

    #[tokio::test]
    async fn test_finish_without_start_is_no_data() {
        let h = default_harness();
        let payload = finish(&h.pipeline, "never-started").await;

        assert_eq!(
            error_fields(&payload),
            ("No data".to_string(), "No audio data found for this session".to_string())
        );
        assert!(h.transcoder.calls.lock().unwrap().is_empty());
        assert!(h.analysis.clips.lock().unwrap().is_empty());
        assert_eq!(h.pipeline.stats().analyses_failed, 1);
    }

    #[tokio::test]
    async fn test_buffer_absent_after_finish_and_second_finish_is_no_data() {
        let h = default_harness();
        h.pipeline.start("s1");
        h.pipeline.append_raw("s1", b"abc");
        finish(&h.pipeline, "s1").await;
        assert!(!h.pipeline.buffers().contains("s1"));

        let again = finish(&h.pipeline, "s1").await;
        assert_eq!(error_fields(&again).0, "No data");

        // disconnect after finish is harmless
        h.pipeline.disconnect("s1");
        h.pipeline.disconnect("s1");
        assert!(h.pipeline.buffers().is_empty());
    }

    #[tokio::test]
    async fn test_empty_recording_still_transcodes() {
        let h = default_harness();
        h.pipeline.start("s1");
        finish(&h.pipeline, "s1").await;

        let calls = h.transcoder.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].0.is_empty());
    }

    #[tokio::test]
    async fn test_conversion_failure_skips_remote_call() {
        let h = harness(
            FakeTranscoder {
                fail: true,
                ..Default::default()
            },
            None,
            FakeAnalysis::default(),
        );
        h.pipeline.start("s1");
        h.pipeline.append_raw("s1", b"garbage");
        let payload = finish(&h.pipeline, "s1").await;

        assert_eq!(
            error_fields(&payload),
            ("Conversion failed".to_string(), "Failed to convert audio to WAV format".to_string())
        );
        assert!(h.analysis.clips.lock().unwrap().is_empty());
        assert!(!h.pipeline.buffers().contains("s1"));
    }

    #[tokio::test]
    async fn test_remote_failure_is_forwarded() {
        let h = harness(
            FakeTranscoder::default(),
            None,
            FakeAnalysis {
                unreachable: true,
                ..Default::default()
            },
        );
        h.pipeline.append_raw("s1", b"abc");
        let (error, message) = error_fields(&finish(&h.pipeline, "s1").await);
        assert_eq!(error, "Connection refused (os error 111)");
        assert_eq!(message, "Failed to connect to Hume API.");
    }

    #[tokio::test]
    async fn test_bad_chunk_keeps_session_alive() {
        let h = default_harness();
        h.pipeline.start("s1");
        h.pipeline.append_raw("s1", b"ok");

        let err = h.pipeline.append_chunk("s1", "not base64!!").unwrap_err();
        assert!(matches!(err, PipelineError::Decode(_)));
        assert_eq!(h.pipeline.buffers().buffered_len("s1"), Some(2));

        finish(&h.pipeline, "s1").await;
        assert_eq!(h.transcoder.calls.lock().unwrap()[0].0, b"ok".to_vec());
        assert_eq!(h.pipeline.stats().chunk_errors, 1);
    }

    #[tokio::test]
    async fn test_legacy_trims_only_long_recordings() {
        let long = harness(FakeTranscoder::default(), Some(7.5), FakeAnalysis::default());
        long.pipeline.legacy_one_shot("s1", &b64(b"long")).await;
        assert_eq!(long.transcoder.calls.lock().unwrap()[0].1, 5);

        let short = harness(FakeTranscoder::default(), Some(3.0), FakeAnalysis::default());
        short.pipeline.legacy_one_shot("s1", &b64(b"short")).await;
        assert_eq!(short.transcoder.calls.lock().unwrap()[0].1, 0);

        let exact = harness(FakeTranscoder::default(), Some(5.0), FakeAnalysis::default());
        exact.pipeline.legacy_one_shot("s1", &b64(b"exact")).await;
        assert_eq!(exact.transcoder.calls.lock().unwrap()[0].1, 0);
    }

    #[tokio::test]
    async fn test_legacy_unknown_duration_means_no_trim() {
        let h = harness(FakeTranscoder::default(), None, FakeAnalysis::default());
        let payload = h.pipeline.legacy_one_shot("s1", &b64(b"webm")).await;
        assert!(!payload.is_error());
        assert_eq!(h.transcoder.calls.lock().unwrap()[0], (b"webm".to_vec(), 0));
        // never touches the registry
        assert!(h.pipeline.buffers().is_empty());
    }

    #[tokio::test]
    async fn test_legacy_decode_failure() {
        let h = default_harness();
        let payload = h.pipeline.legacy_one_shot("s1", "%%%").await;
        let (_, message) = error_fields(&payload);
        assert_eq!(message, "Server error processing audio data");
        assert!(h.transcoder.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sessions_do_not_share_bytes() {
        let h = default_harness();
        h.pipeline.start("a");
        h.pipeline.start("b");
        h.pipeline.append_raw("a", b"aaaa");
        h.pipeline.append_raw("b", b"bb");
        h.pipeline.append_raw("a", b"AA");

        finish(&h.pipeline, "b").await;
        finish(&h.pipeline, "a").await;

        let calls = h.transcoder.calls.lock().unwrap();
        assert_eq!(calls[0].0, b"bb".to_vec());
        assert_eq!(calls[1].0, b"aaaaAA".to_vec());
    }

    #[tokio::test]
    async fn test_stats_track_outcomes() {
        let h = default_harness();
        h.pipeline.append_raw("s1", b"abc");
        finish(&h.pipeline, "s1").await;
        finish(&h.pipeline, "s1").await;

        let stats = h.pipeline.stats();
        assert_eq!(stats.analyses_completed, 1);
        assert_eq!(stats.analyses_failed, 1);
        assert_eq!(stats.chunks_received, 1);
        assert_eq!(stats.bytes_received, 3);
    }

    #[test]
    fn test_evict_idle_counts() {
        let h = default_harness();
        h.pipeline.start("old");
        std::thread::sleep(Duration::from_millis(120));
        assert_eq!(h.pipeline.evict_idle(Duration::from_millis(50)), vec!["old".to_string()]);
        assert_eq!(h.pipeline.stats().sessions_evicted, 1);
    }
}
