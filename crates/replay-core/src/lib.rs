//! # replay-core: In-Memory Experience Replay Tables
//!
//! Writers continuously insert trajectory fragments and samplers pull them
//! back under configurable probability distributions, with both sides
//! coordinated by a two-sided rate limiter. Several named tables coexist
//! in one process and share payload bytes through a process-wide,
//! reference-counted chunk store.
//!
//! # Key Components
//!
//! - **Selectors**: five interchangeable distributions over item keys
//!   (uniform, FIFO, LIFO, prioritized sum-tree, min/max heap)
//! - **Rate Limiter**: couples insert and sample counts through a
//!   samples-per-insert ratio window with cooperative blocking
//! - **Table**: the concurrent item container with capacity eviction,
//!   extension hooks and atomic checkpoint snapshots
//! - **Chunk Store**: weak-entry registry keeping payloads deduplicated
//!   while items own the strong handles
//! - **Sample Worker**: per-table thread serializing flexible batch
//!   requests
//!
//! ## Quick Start
//!
//! ```
//! use replay_core::{
//!     Chunk, ChunkStore, DType, Item, RateLimiter, SequenceRange, Table, Trajectory,
//!     selectors::{FifoSelector, UniformSelector},
//! };
//! use replay_core::trajectory::{ChunkSlice, Column};
//! use std::sync::Arc;
//!
//! # fn main() -> replay_core::Result<()> {
//! let store = Arc::new(ChunkStore::new());
//! let chunk = store.insert_or_get(Chunk {
//!     key: 1,
//!     data: vec![0u8; 64],
//!     sequence_range: SequenceRange { episode_id: 1, start: 0, end: 3, delta_encoded: false },
//!     dtype: DType::F32,
//!     shape: vec![4],
//! });
//!
//! let table = Table::new(
//!     "replay",
//!     1000,
//!     0,
//!     Box::new(UniformSelector::new()),
//!     Box::new(FifoSelector::new()),
//!     RateLimiter::min_size(1)?,
//!     None,
//!     store,
//! )?;
//!
//! let trajectory = Trajectory::new(vec![Column {
//!     slices: vec![ChunkSlice { chunk_key: 1, offset: 0, length: 4 }],
//!     squeeze: false,
//!     dtype: DType::F32,
//!     shape: vec![4],
//! }]);
//! table.insert_or_assign(Item::new(7, "replay", 1.0, trajectory))?;
//!
//! let batch = table.sample(1, 0, None)?;
//! assert_eq!(batch[0].key, 7);
//! # drop(chunk);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod chunk;
pub mod error;
pub mod extensions;
pub mod item;
pub mod rate_limiter;
pub mod selectors;
pub mod snapshot;
pub mod table;
pub mod trajectory;
pub mod worker;

pub use chunk::{Chunk, ChunkHandle, ChunkKey, ChunkStore, SequenceRange};
pub use error::{Error, Result, RATE_LIMITER_TIMEOUT_MESSAGE};
pub use extensions::{TableExtension, TableStats, TableStatsExtension, TableStatsHandle};
pub use item::{Item, ItemKey, SampledItem};
pub use rate_limiter::{
    Cancellation, RateLimiter, RateLimiterCheckpoint, RateLimiterInfo,
};
pub use selectors::{ItemSelector, KeyWithProbability, SelectorOptions};
pub use snapshot::{ItemCheckpoint, TableCheckpoint, TableSnapshot};
pub use table::{Table, TableInfo};
pub use trajectory::{ColumnSpec, DType, Signature, Trajectory};
pub use worker::{SampleRequest, SampleWorker};
