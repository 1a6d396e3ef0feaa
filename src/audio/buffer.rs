//! # Accumulation Buffer
//!
//! Append-only byte store for one recording. Chunks are kept opaque: the
//! browser sends fragments of a webm/opus stream that only decode as a
//! whole, so nothing here looks inside them.

use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};

/// Bytes of one in-progress recording plus bookkeeping for expiry and
/// reporting.
///
/// Owned exclusively by its registry entry; never shared.
#[derive(Debug)]
pub struct AccumulationBuffer {
    data: Vec<u8>,
    chunk_count: usize,
    created_at: DateTime<Utc>,
    last_activity: Instant,
}

impl AccumulationBuffer {
    pub fn new() -> Self {
        Self {
            data: Vec::new(),
            chunk_count: 0,
            created_at: Utc::now(),
            last_activity: Instant::now(),
        }
    }

    /// Append one chunk verbatim. Empty chunks still count as activity.
    pub fn append(&mut self, chunk: &[u8]) {
        self.data.extend_from_slice(chunk);
        self.chunk_count += 1;
        self.last_activity = Instant::now();
    }

    /// Consume the buffer, yielding all chunks concatenated in arrival order.
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunk_count
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.elapsed()
    }
}

impl Default for AccumulationBuffer {
    fn default() -> Self {
        Self::new()
    }
}
