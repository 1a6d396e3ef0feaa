//! # Session Buffer Manager
//!
//! Process-wide registry mapping an opaque session id to its in-progress
//! [`AccumulationBuffer`]. This is the only shared mutable state in the
//! service.
//!
//! ## Buffer Lifecycle:
//! 1. **start**: fresh empty buffer, replacing any previous one (no merge)
//! 2. **append**: bytes added in arrival order; buffer created lazily if a
//!    chunk shows up without a start
//! 3. **take_and_clear**: everything handed back and the entry removed
//! 4. **clear**: removal on disconnect/error, idempotent
//! 5. **evict_idle**: timer-driven removal of abandoned recordings
//!
//! ## Thread Safety:
//! Backed by a `DashMap`, so each operation on one id is atomic with respect
//! to that id while unrelated sessions only contend on a shard lock for the
//! duration of a single map operation.

use crate::audio::buffer::AccumulationBuffer;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// `take_and_clear` on an id with no buffer. Distinct from an empty buffer,
/// which is valid and yields zero bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoData;

impl fmt::Display for NoData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "no buffer exists for this session")
    }
}

impl std::error::Error for NoData {}

#[derive(Default)]
pub struct SessionBufferManager {
    buffers: DashMap<String, AccumulationBuffer>,
}

impl SessionBufferManager {
    pub fn new() -> Self {
        Self {
            buffers: DashMap::new(),
        }
    }

    /// Allocate a fresh buffer. Returns `true` if an older buffer was
    /// replaced.
    pub fn start(&self, session_id: &str) -> bool {
        let replaced = self
            .buffers
            .insert(session_id.to_string(), AccumulationBuffer::new())
            .is_some();
        if replaced {
            debug!(session_id, "Replaced existing buffer on start");
        }
        replaced
    }

    /// Append a chunk, creating the buffer if `start` never happened.
    /// Returns the buffered length afterwards.
    pub fn append(&self, session_id: &str, chunk: &[u8]) -> usize {
        let mut entry = self
            .buffers
            .entry(session_id.to_string())
            .or_insert_with(AccumulationBuffer::new);
        entry.append(chunk);
        entry.len()
    }

    /// Remove the buffer and return its concatenated bytes.
    pub fn take_and_clear(&self, session_id: &str) -> Result<Vec<u8>, NoData> {
        self.buffers
            .remove(session_id)
            .map(|(_, buffer)| buffer.into_bytes())
            .ok_or(NoData)
    }

    /// Drop the buffer if present. Returns whether anything was removed.
    pub fn clear(&self, session_id: &str) -> bool {
        self.buffers.remove(session_id).is_some()
    }

    /// Remove every buffer idle for longer than `max_idle`, returning the
    /// evicted ids.
    pub fn evict_idle(&self, max_idle: Duration) -> Vec<String> {
        let stale: Vec<String> = self
            .buffers
            .iter()
            .filter(|entry| entry.value().idle_for() > max_idle)
            .map(|entry| entry.key().clone())
            .collect();

        // re-check under the entry lock: a chunk may have landed since the scan
        stale
            .into_iter()
            .filter(|id| {
                self.buffers
                    .remove_if(id, |_, buffer| buffer.idle_for() > max_idle)
                    .is_some()
            })
            .collect()
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.buffers.contains_key(session_id)
    }

    pub fn buffered_len(&self, session_id: &str) -> Option<usize> {
        self.buffers.get(session_id).map(|buffer| buffer.len())
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn session_info(&self, session_id: &str) -> Option<SessionInfo> {
        self.buffers
            .get(session_id)
            .map(|entry| SessionInfo::from_buffer(entry.key(), entry.value()))
    }

    /// Snapshot for the sessions endpoint.
    pub fn summary(&self) -> SessionManagerSummary {
        let mut sessions: Vec<SessionInfo> = self
            .buffers
            .iter()
            .map(|entry| SessionInfo::from_buffer(entry.key(), entry.value()))
            .collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        SessionManagerSummary {
            total_sessions: sessions.len(),
            total_buffered_bytes: sessions.iter().map(|s| s.buffered_bytes).sum(),
            sessions,
        }
    }
}

/// Per-session view used in summaries.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub buffered_bytes: usize,
    pub chunk_count: usize,
    pub created_at: DateTime<Utc>,
    pub idle_seconds: u64,
}

impl SessionInfo {
    fn from_buffer(session_id: &str, buffer: &AccumulationBuffer) -> Self {
        Self {
            session_id: session_id.to_string(),
            buffered_bytes: buffer.len(),
            chunk_count: buffer.chunk_count(),
            created_at: buffer.created_at(),
            idle_seconds: buffer.idle_for().as_secs(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SessionManagerSummary {
    pub total_sessions: usize,
    pub total_buffered_bytes: usize,
    pub sessions: Vec<SessionInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_start_append_take() {
        let manager = SessionBufferManager::new();
        manager.start("a");
        manager.append("a", &[1u8; 1000]);
        assert_eq!(manager.append("a", &[2u8; 500]), 1500);

        let bytes = manager.take_and_clear("a").unwrap();
        assert_eq!(bytes.len(), 1500);
        assert_eq!(&bytes[..1000], &[1u8; 1000][..]);
        assert_eq!(&bytes[1000..], &[2u8; 500][..]);
        assert!(!manager.contains("a"));
    }

    #[test]
    fn test_take_without_buffer_is_no_data() {
        let manager = SessionBufferManager::new();
        assert_eq!(manager.take_and_clear("missing"), Err(NoData));
    }

    #[test]
    fn test_empty_buffer_is_not_no_data() {
        let manager = SessionBufferManager::new();
        manager.start("a");
        assert_eq!(manager.take_and_clear("a"), Ok(Vec::new()));
    }

    #[test]
    fn test_restart_replaces_without_merge() {
        let manager = SessionBufferManager::new();
        assert!(!manager.start("a"));
        manager.append("a", b"old");
        assert!(manager.start("a"));
        manager.append("a", b"new");
        assert_eq!(manager.take_and_clear("a").unwrap(), b"new".to_vec());
    }

    #[test]
    fn test_append_creates_buffer_lazily() {
        let manager = SessionBufferManager::new();
        manager.append("late", b"xyz");
        assert_eq!(manager.buffered_len("late"), Some(3));
    }

    #[test]
    fn test_clear_is_idempotent() {
        let manager = SessionBufferManager::new();
        manager.start("a");
        assert!(manager.clear("a"));
        assert!(!manager.clear("a"));
        assert!(manager.is_empty());
    }

    #[test]
    fn test_evict_idle_only_removes_stale() {
        let manager = SessionBufferManager::new();
        manager.start("stale");
        std::thread::sleep(Duration::from_millis(150));
        manager.start("fresh");

        let evicted = manager.evict_idle(Duration::from_millis(100));
        assert_eq!(evicted, vec!["stale".to_string()]);
        assert!(manager.contains("fresh"));
        assert!(!manager.contains("stale"));
    }

    #[test]
    fn test_summary_totals() {
        let manager = SessionBufferManager::new();
        manager.append("a", &[0u8; 10]);
        manager.append("b", &[0u8; 5]);
        manager.append("b", &[0u8; 5]);

        let summary = manager.summary();
        assert_eq!(summary.total_sessions, 2);
        assert_eq!(summary.total_buffered_bytes, 20);
        let b = manager.session_info("b").unwrap();
        assert_eq!(b.chunk_count, 2);
    }

    #[test]
    fn test_concurrent_sessions_stay_isolated() {
        let manager = Arc::new(SessionBufferManager::new());
        let handles: Vec<_> = (0..8u8)
            .map(|n| {
                let manager = manager.clone();
                std::thread::spawn(move || {
                    let id = format!("session-{}", n);
                    manager.start(&id);
                    for _ in 0..100 {
                        manager.append(&id, &[n; 7]);
                    }
                    manager.take_and_clear(&id).unwrap()
                })
            })
            .collect();

        for (n, handle) in handles.into_iter().enumerate() {
            let bytes = handle.join().unwrap();
            assert_eq!(bytes.len(), 700);
            assert!(bytes.iter().all(|&b| b == n as u8));
        }
        assert!(manager.is_empty());
    }
}
