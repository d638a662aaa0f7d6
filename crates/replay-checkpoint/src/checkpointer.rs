//! Checkpoint directory layout and lifecycle
//!
//! A checkpoint root holds timestamp-named subdirectories. Each contains
//! `tables.tfrecord` (one record per table), `chunks.tfrecord` (the
//! deduplicated chunks the snapshot references) and an empty `DONE` marker
//! written last. Directories without `DONE` are in progress or corrupt and
//! are never loaded. Names sort lexicographically by timestamp, so the
//! newest checkpoint is the greatest name.

use crate::record::{RecordReader, RecordWriter};
use crate::{Error, Result};
use chrono::Utc;
use replay_core::{Chunk, ChunkHandle, ChunkStore, Table, TableCheckpoint, TableSnapshot};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Per-table record file
pub const TABLES_FILE: &str = "tables.tfrecord";
/// Deduplicated chunk record file
pub const CHUNKS_FILE: &str = "chunks.tfrecord";
/// Marker written after both record files are synced
pub const DONE_FILE: &str = "DONE";

/// Saves and restores table snapshots under a checkpoint root
pub struct Checkpointer {
    root: PathBuf,
    fallback: Option<PathBuf>,
}

impl Checkpointer {
    /// Create a checkpointer writing under `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            fallback: None,
        }
    }

    /// Also consult `fallback` on load when `root` holds no valid
    /// checkpoint
    pub fn with_fallback(root: impl Into<PathBuf>, fallback: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            fallback: Some(fallback.into()),
        }
    }

    /// The checkpoint root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Snapshot every table and persist one new checkpoint directory
    ///
    /// Record files are written and synced before the `DONE` marker, so a
    /// crash mid-save leaves a directory loaders skip.
    pub fn save(&self, tables: &[&Table]) -> Result<PathBuf> {
        let snapshots: Vec<TableSnapshot> = tables.iter().map(|table| table.checkpoint()).collect();
        self.save_snapshots(&snapshots)
    }

    /// Persist already-taken snapshots
    pub fn save_snapshots(&self, snapshots: &[TableSnapshot]) -> Result<PathBuf> {
        let name = Utc::now().format("%Y%m%dT%H%M%S%.9fZ").to_string();
        let dir = self.root.join(&name);
        fs::create_dir_all(&dir)?;

        let mut tables_writer = RecordWriter::create(dir.join(TABLES_FILE))?;
        for snapshot in snapshots {
            tables_writer.write(&snapshot.checkpoint)?;
        }
        tables_writer.finish()?;

        let mut chunks: HashMap<u64, &ChunkHandle> = HashMap::new();
        for snapshot in snapshots {
            for handle in &snapshot.chunks {
                chunks.entry(handle.key).or_insert(handle);
            }
        }
        let mut chunks_writer = RecordWriter::create(dir.join(CHUNKS_FILE))?;
        for handle in chunks.into_values() {
            chunks_writer.write(handle.as_ref())?;
        }
        let num_chunks = chunks_writer.records_written();
        chunks_writer.finish()?;

        fs::File::create(dir.join(DONE_FILE))?.sync_all()?;
        info!(
            checkpoint = %dir.display(),
            tables = snapshots.len(),
            chunks = num_chunks,
            "Wrote checkpoint"
        );
        Ok(dir)
    }

    /// DONE-marked checkpoint directories under `root`, oldest first
    fn valid_dirs(root: &Path) -> Result<Vec<PathBuf>> {
        let mut dirs = Vec::new();
        let entries = match fs::read_dir(root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(dirs),
            Err(err) => return Err(err.into()),
        };
        for entry in entries {
            let path = entry?.path();
            if !path.is_dir() {
                continue;
            }
            if path.join(DONE_FILE).is_file() {
                dirs.push(path);
            } else {
                warn!(dir = %path.display(), "Skipping checkpoint directory without DONE marker");
            }
        }
        dirs.sort();
        Ok(dirs)
    }

    /// The newest valid checkpoint directory, consulting the fallback
    /// root only when the primary has none
    pub fn latest_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = Self::valid_dirs(&self.root)?.pop() {
            return Ok(dir);
        }
        if let Some(fallback) = &self.fallback {
            if let Some(dir) = Self::valid_dirs(fallback)?.pop() {
                info!(dir = %dir.display(), "Falling back to secondary checkpoint root");
                return Ok(dir);
            }
        }
        Err(Error::NoCheckpoint(self.root.display().to_string()))
    }

    /// Restore every table from the newest valid checkpoint
    ///
    /// Chunks are registered in `store` before any table rebuild runs, so
    /// every restored item resolves its references.
    pub fn load_latest(&self, store: &Arc<ChunkStore>) -> Result<Vec<Table>> {
        let dir = self.latest_dir()?;
        Self::load_dir(&dir, store)
    }

    /// Restore every table from one checkpoint directory
    pub fn load_dir(dir: &Path, store: &Arc<ChunkStore>) -> Result<Vec<Table>> {
        if !dir.join(DONE_FILE).is_file() {
            return Err(Error::NoCheckpoint(dir.display().to_string()));
        }

        let mut chunk_reader = RecordReader::open(dir.join(CHUNKS_FILE))?;
        let mut handles: Vec<ChunkHandle> = Vec::new();
        while let Some(chunk) = chunk_reader.read::<Chunk>()? {
            handles.push(store.insert_or_get(chunk));
        }

        let mut table_reader = RecordReader::open(dir.join(TABLES_FILE))?;
        let checkpoints: Vec<TableCheckpoint> = table_reader.read_all()?;
        let mut tables = Vec::with_capacity(checkpoints.len());
        for checkpoint in checkpoints {
            tables.push(Table::from_checkpoint(checkpoint, Arc::clone(store))?);
        }

        debug!(
            checkpoint = %dir.display(),
            tables = tables.len(),
            chunks = handles.len(),
            "Loaded checkpoint"
        );
        Ok(tables)
    }

    /// Delete all but the newest `keep` valid checkpoint directories,
    /// returning how many were removed
    pub fn keep_latest(&self, keep: usize) -> Result<usize> {
        let dirs = Self::valid_dirs(&self.root)?;
        if dirs.len() <= keep {
            return Ok(0);
        }
        let stale = dirs.len() - keep;
        for dir in &dirs[..stale] {
            debug!(dir = %dir.display(), "Pruning old checkpoint");
            fs::remove_dir_all(dir)?;
        }
        Ok(stale)
    }
}
