//! Chunk storage for trajectory payloads
//!
//! Chunks are immutable byte payloads shared by reference across items.
//! The store keeps only weak entries: items own the strong handles, so a
//! chunk is destroyed as soon as the last referencing item (or in-flight
//! writer buffer) drops its handle. A periodic sweep removes dead entries.

use crate::trajectory::DType;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use tracing::debug;

/// Process-unique chunk identifier, supplied by the writer
pub type ChunkKey = u64;

/// Shared, cheaply clonable handle to an immutable chunk
pub type ChunkHandle = Arc<Chunk>;

/// The range of episode steps covered by a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceRange {
    /// Episode the steps belong to
    pub episode_id: u64,
    /// First step index (inclusive)
    pub start: u32,
    /// Last step index (inclusive)
    pub end: u32,
    /// Whether the payload is delta-encoded against the previous step
    pub delta_encoded: bool,
}

/// An immutable tensor payload
///
/// The payload bytes are opaque to the core; `dtype` and `shape` describe a
/// single element so table signatures can be validated without decoding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Writer-assigned key, unique within the process
    pub key: ChunkKey,
    /// Serialized tensor payload
    pub data: Vec<u8>,
    /// Steps covered by this chunk
    pub sequence_range: SequenceRange,
    /// Element dtype
    pub dtype: DType,
    /// Per-element shape
    pub shape: Vec<u64>,
}

impl Chunk {
    /// Number of steps covered by this chunk
    pub fn num_steps(&self) -> u32 {
        self.sequence_range.end - self.sequence_range.start + 1
    }
}

/// Process-wide, content-addressed chunk registry
///
/// Holds `Weak` entries only; it never keeps a chunk alive by itself.
#[derive(Debug, Default)]
pub struct ChunkStore {
    chunks: DashMap<ChunkKey, Weak<Chunk>>,
}

impl ChunkStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a chunk, or return the already-registered handle for its key
    ///
    /// Writers are responsible for key uniqueness, so a live entry under the
    /// same key is taken to be the same chunk.
    pub fn insert_or_get(&self, chunk: Chunk) -> ChunkHandle {
        match self.chunks.entry(chunk.key) {
            dashmap::mapref::entry::Entry::Occupied(mut entry) => {
                if let Some(existing) = entry.get().upgrade() {
                    return existing;
                }
                let handle = Arc::new(chunk);
                entry.insert(Arc::downgrade(&handle));
                handle
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                let handle = Arc::new(chunk);
                entry.insert(Arc::downgrade(&handle));
                handle
            }
        }
    }

    /// Get a strong handle for a live chunk
    pub fn get(&self, key: ChunkKey) -> Option<ChunkHandle> {
        self.chunks.get(&key).and_then(|entry| entry.upgrade())
    }

    /// Whether a live chunk is registered under `key`
    pub fn contains(&self, key: ChunkKey) -> bool {
        self.get(key).is_some()
    }

    /// Number of live chunks
    pub fn len(&self) -> usize {
        self.chunks
            .iter()
            .filter(|entry| entry.value().strong_count() > 0)
            .count()
    }

    /// Whether no live chunks are registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove entries whose chunk has been destroyed, returning how many
    /// were swept
    pub fn cleanup(&self) -> usize {
        let before = self.chunks.len();
        self.chunks.retain(|_, weak| weak.strong_count() > 0);
        let swept = before - self.chunks.len();
        if swept > 0 {
            debug!(swept, live = self.chunks.len(), "Swept dead chunk entries");
        }
        swept
    }
}
