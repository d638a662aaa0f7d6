//! Serializable table snapshots
//!
//! A snapshot is taken in one critical section and carries strong handles
//! to every referenced chunk, so asynchronous serialization never observes
//! a freed chunk.

use crate::chunk::ChunkHandle;
use crate::item::ItemKey;
use crate::rate_limiter::RateLimiterCheckpoint;
use crate::selectors::SelectorOptions;
use crate::trajectory::{Signature, Trajectory};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One item as stored in a checkpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemCheckpoint {
    /// Item key
    pub key: ItemKey,
    /// Priority at snapshot time
    pub priority: f64,
    /// Times-sampled count at snapshot time
    pub times_sampled: u32,
    /// Original insertion time
    pub inserted_at: DateTime<Utc>,
    /// Per-table insertion sequence; restore replays inserts in this order
    pub sequence: u64,
    /// Chunk references
    pub trajectory: Trajectory,
}

/// Everything needed to rebuild a behaviorally equivalent table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableCheckpoint {
    /// Table name
    pub name: String,
    /// Capacity
    pub max_size: usize,
    /// Per-item sample cap; 0 disables expiry
    pub max_times_sampled: u32,
    /// Sampler descriptor
    pub sampler: SelectorOptions,
    /// Remover descriptor
    pub remover: SelectorOptions,
    /// Limiter configuration and counters
    pub limiter: RateLimiterCheckpoint,
    /// Optional trajectory schema
    pub signature: Option<Signature>,
    /// Items ordered by insertion sequence
    pub items: Vec<ItemCheckpoint>,
}

/// A checkpoint plus the strong chunk handles that keep its payloads alive
#[derive(Debug, Clone)]
pub struct TableSnapshot {
    /// The serializable table state
    pub checkpoint: TableCheckpoint,
    /// Deduplicated handles for every chunk any item references
    pub chunks: Vec<ChunkHandle>,
}
