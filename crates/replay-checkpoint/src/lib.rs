//! # replay-checkpoint: On-Disk Snapshots for Replay Tables
//!
//! Persists the snapshots produced by `replay_core::Table::checkpoint`
//! into timestamp-named directories of CRC-framed record files, and
//! restores them into behaviorally equivalent tables.
//!
//! The layout contract:
//!
//! - `tables.tfrecord` — one serialized table checkpoint per table
//! - `chunks.tfrecord` — the deduplicated chunks the snapshot references
//! - `DONE` — empty marker written last; its absence means the
//!   checkpoint is in progress or corrupt and is skipped on load

#![warn(missing_docs)]

pub mod checkpointer;
pub mod error;
pub mod record;

pub use checkpointer::{Checkpointer, CHUNKS_FILE, DONE_FILE, TABLES_FILE};
pub use error::{Error, Result};
pub use record::{RecordReader, RecordWriter};
