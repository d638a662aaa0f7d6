//! Priority-indexed item tables
//!
//! A table owns its items, a sampling selector, a removal selector, a rate
//! limiter and a set of extension hooks. One mutex serializes every
//! state-mutating operation; blocking admission waits happen *outside* that
//! mutex and the non-blocking predicate is re-tested under it before any
//! commit, so a successful operation always observes the limiter admitting
//! it at the moment of commit.

use crate::chunk::{ChunkHandle, ChunkStore};
use crate::extensions::TableExtension;
use crate::item::{Item, ItemKey, SampledItem};
use crate::rate_limiter::{Cancellation, RateLimiter, RateLimiterInfo};
use crate::selectors::{ItemSelector, SelectorOptions};
use crate::snapshot::{ItemCheckpoint, TableCheckpoint, TableSnapshot};
use crate::trajectory::Signature;
use crate::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Flexible batch size used for stochastic samplers when the caller asks
/// for auto-selection. Deterministic samplers always resolve to 1 so
/// limiter checks interleave with every pick.
const DEFAULT_FLEXIBLE_BATCH: usize = 32;

struct TableEntry {
    item: Item,
    chunks: Vec<ChunkHandle>,
}

struct TableState {
    items: HashMap<ItemKey, TableEntry>,
    sampler: Box<dyn ItemSelector>,
    remover: Box<dyn ItemSelector>,
    extensions: Vec<Box<dyn TableExtension>>,
    next_sequence: u64,
}

impl TableState {
    /// Remove an item, firing hooks and bumping the limiter's delete count.
    fn remove_item(&mut self, limiter: &RateLimiter, key: ItemKey) -> Result<TableEntry> {
        let entry = self
            .items
            .remove(&key)
            .ok_or_else(|| Error::Internal(format!("item {key} missing from item map")))?;
        self.sampler.delete(key)?;
        self.remover.delete(key)?;
        limiter.record_delete();
        for extension in &mut self.extensions {
            extension.on_delete(&entry.item);
        }
        Ok(entry)
    }
}

/// Summary statistics for one table
#[derive(Debug, Clone)]
pub struct TableInfo {
    /// Table name
    pub name: String,
    /// Current number of items
    pub size: usize,
    /// Capacity
    pub max_size: usize,
    /// Per-item sample cap; 0 disables expiry
    pub max_times_sampled: u32,
    /// Limiter configuration and counters
    pub limiter: RateLimiterInfo,
    /// Sampler descriptor
    pub sampler: SelectorOptions,
    /// Remover descriptor
    pub remover: SelectorOptions,
    /// Optional trajectory schema
    pub signature: Option<Signature>,
}

/// A named, capacity-bounded, rate-limited item container
pub struct Table {
    name: String,
    max_size: usize,
    max_times_sampled: u32,
    signature: Option<Signature>,
    sampler_options: SelectorOptions,
    remover_options: SelectorOptions,
    limiter: RateLimiter,
    store: Arc<ChunkStore>,
    cancel: Cancellation,
    state: Mutex<TableState>,
}

impl Table {
    /// Create a table
    ///
    /// `max_times_sampled == 0` disables sample-count expiry.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        max_size: usize,
        max_times_sampled: u32,
        sampler: Box<dyn ItemSelector>,
        remover: Box<dyn ItemSelector>,
        limiter: RateLimiter,
        signature: Option<Signature>,
        store: Arc<ChunkStore>,
    ) -> Result<Self> {
        let name = name.into();
        if max_size == 0 {
            return Err(Error::InvalidArgument(format!(
                "table {name}: max_size must be at least 1"
            )));
        }
        let sampler_options = sampler.options();
        let remover_options = remover.options();
        info!(
            table = %name,
            max_size,
            max_times_sampled,
            sampler = ?sampler_options,
            remover = ?remover_options,
            "Creating table"
        );
        Ok(Self {
            name,
            max_size,
            max_times_sampled,
            signature,
            sampler_options,
            remover_options,
            limiter,
            store,
            cancel: Cancellation::new(),
            state: Mutex::new(TableState {
                items: HashMap::new(),
                sampler,
                remover,
                extensions: Vec::new(),
                next_sequence: 0,
            }),
        })
    }

    /// Table name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current number of items
    pub fn num_items(&self) -> usize {
        self.state.lock().items.len()
    }

    /// The shared chunk store items resolve against
    pub fn chunk_store(&self) -> &Arc<ChunkStore> {
        &self.store
    }

    /// Attach an extension; hooks fire in registration order
    pub fn add_extension(&self, extension: Box<dyn TableExtension>) {
        self.state.lock().extensions.push(extension);
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancel all outstanding waiters; subsequent mutating calls fail with
    /// `Cancelled`
    pub fn close(&self) {
        info!(table = %self.name, "Closing table");
        self.cancel.cancel();
        self.limiter.cancel_all();
    }

    fn check_open(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled(format!("table {} is closed", self.name)));
        }
        Ok(())
    }

    fn validate_priority(&self, priority: f64) -> Result<()> {
        if !priority.is_finite() {
            return Err(Error::InvalidArgument(format!(
                "priority must be finite, got {priority}"
            )));
        }
        let prioritized = matches!(self.sampler_options, SelectorOptions::Prioritized { .. })
            || matches!(self.remover_options, SelectorOptions::Prioritized { .. });
        if prioritized && priority < 0.0 {
            return Err(Error::InvalidArgument(format!(
                "priority must be non-negative for prioritized selectors, got {priority}"
            )));
        }
        Ok(())
    }

    fn resolve_chunks(&self, item: &Item) -> Result<Vec<ChunkHandle>> {
        item.trajectory
            .chunk_keys()
            .into_iter()
            .map(|key| {
                self.store.get(key).ok_or_else(|| {
                    Error::FailedPrecondition(format!(
                        "chunk {key} referenced by item {} not found in the chunk store",
                        item.key
                    ))
                })
            })
            .collect()
    }

    fn remaining(deadline: Option<Instant>) -> Result<Option<Duration>> {
        match deadline {
            None => Ok(None),
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    Err(Error::rate_limiter_timeout())
                } else {
                    Ok(Some(remaining))
                }
            }
        }
    }

    /// Insert a new item, or update the priority of an existing one
    ///
    /// Blocks until the limiter admits an insert. On the assign path the
    /// priority is updated in place, no size change occurs and no insert is
    /// counted. If the insert pushes the table past `max_size`, victims
    /// chosen by the remover are evicted inside the same critical section.
    pub fn insert_or_assign(&self, item: Item) -> Result<()> {
        self.insert_or_assign_timeout(item, None)
    }

    /// [`insert_or_assign`](Self::insert_or_assign) with a deadline on the
    /// admission wait
    pub fn insert_or_assign_timeout(&self, item: Item, timeout: Option<Duration>) -> Result<()> {
        self.check_open()?;
        self.validate_priority(item.priority)?;
        item.trajectory.validate()?;
        if let Some(signature) = &self.signature {
            signature.validate(&item.trajectory)?;
        }
        let chunks = self.resolve_chunks(&item)?;

        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            self.limiter
                .await_can_insert(&self.cancel, Self::remaining(deadline)?)?;

            let mut state = self.state.lock();
            if state.items.contains_key(&item.key) {
                state.sampler.update(item.key, item.priority)?;
                state.remover.update(item.key, item.priority)?;
                let TableState {
                    items, extensions, ..
                } = &mut *state;
                let entry = items
                    .get_mut(&item.key)
                    .ok_or_else(|| Error::Internal(format!("item {} vanished", item.key)))?;
                entry.item.priority = item.priority;
                for extension in extensions.iter_mut() {
                    extension.on_update(&entry.item);
                }
                return Ok(());
            }

            // The wait ran without the table mutex; re-test before commit.
            if !self.limiter.can_insert() {
                drop(state);
                continue;
            }

            let mut item = item;
            item.table = self.name.clone();
            item.sequence = state.next_sequence;
            state.next_sequence += 1;

            state.sampler.insert(item.key, item.priority)?;
            if let Err(err) = state.remover.insert(item.key, item.priority) {
                let _ = state.sampler.delete(item.key);
                return Err(err);
            }
            let key = item.key;
            state.items.insert(key, TableEntry { item, chunks });
            self.limiter.record_insert();
            {
                let TableState {
                    items, extensions, ..
                } = &mut *state;
                let entry = items
                    .get(&key)
                    .ok_or_else(|| Error::Internal(format!("item {key} vanished")))?;
                for extension in extensions.iter_mut() {
                    extension.on_insert(&entry.item);
                }
            }

            while state.items.len() > self.max_size {
                let victim = state.remover.sample()?.key;
                debug!(table = %self.name, victim, "Evicting item over capacity");
                state.remove_item(&self.limiter, victim)?;
            }
            return Ok(());
        }
    }

    /// Apply priority updates and deletions atomically
    ///
    /// Deletes apply before updates. Unknown keys and invalid priorities
    /// are logged and skipped rather than surfaced; all other errors
    /// propagate.
    pub fn mutate_items(&self, updates: &[(ItemKey, f64)], deletes: &[ItemKey]) -> Result<()> {
        self.check_open()?;
        let mut state = self.state.lock();

        for &key in deletes {
            if state.items.contains_key(&key) {
                state.remove_item(&self.limiter, key)?;
            } else {
                warn!(table = %self.name, key, "Ignoring delete of unknown item");
            }
        }

        for &(key, priority) in updates {
            if !state.items.contains_key(&key) {
                warn!(table = %self.name, key, "Ignoring priority update of unknown item");
                continue;
            }
            if let Err(err) = self.validate_priority(priority) {
                warn!(table = %self.name, key, %err, "Skipping invalid priority update");
                continue;
            }
            state.sampler.update(key, priority)?;
            state.remover.update(key, priority)?;
            let TableState {
                items, extensions, ..
            } = &mut *state;
            let entry = items
                .get_mut(&key)
                .ok_or_else(|| Error::Internal(format!("item {key} vanished")))?;
            entry.item.priority = priority;
            for extension in extensions.iter_mut() {
                extension.on_update(&entry.item);
            }
        }
        Ok(())
    }

    /// Draw up to `min(flexible_batch_size, num_samples)` items in one
    /// critical section
    ///
    /// Waits for one sample admission, then keeps picking while the
    /// non-blocking predicate stays true, without releasing the table
    /// mutex between picks. `flexible_batch_size == 0` auto-selects: 1 for
    /// deterministic samplers, 32 for stochastic ones. Items reaching
    /// `max_times_sampled` are removed inside the same critical section.
    pub fn sample(
        &self,
        num_samples: usize,
        flexible_batch_size: usize,
        timeout: Option<Duration>,
    ) -> Result<Vec<SampledItem>> {
        self.check_open()?;
        if num_samples == 0 {
            return Ok(Vec::new());
        }
        let flexible = if flexible_batch_size == 0 {
            self.auto_flexible_batch()
        } else {
            flexible_batch_size
        };
        let max_batch = flexible.min(num_samples);
        let deadline = timeout.map(|t| Instant::now() + t);

        loop {
            self.limiter
                .await_can_sample(&self.cancel, Self::remaining(deadline)?)?;

            let mut state = self.state.lock();
            if !self.limiter.can_sample() {
                drop(state);
                continue;
            }

            let mut batch = Vec::with_capacity(max_batch);
            loop {
                batch.push(self.pick_locked(&mut state)?);
                if batch.len() == max_batch || !self.limiter.can_sample() {
                    break;
                }
            }
            return Ok(batch);
        }
    }

    /// Auto-selected flexible batch size for this table's sampler
    pub fn auto_flexible_batch(&self) -> usize {
        if self.sampler_options.is_deterministic() {
            1
        } else {
            DEFAULT_FLEXIBLE_BATCH
        }
    }

    fn pick_locked(&self, state: &mut TableState) -> Result<SampledItem> {
        let picked = state.sampler.sample()?;
        let table_size = state.items.len();

        let sampled = {
            let TableState {
                items, extensions, ..
            } = &mut *state;
            let entry = items
                .get_mut(&picked.key)
                .ok_or_else(|| Error::Internal(format!("sampled item {} vanished", picked.key)))?;
            entry.item.times_sampled += 1;
            self.limiter.record_sample();
            for extension in extensions.iter_mut() {
                extension.on_sample(&entry.item);
            }
            SampledItem {
                key: entry.item.key,
                priority: entry.item.priority,
                times_sampled: entry.item.times_sampled,
                trajectory: entry.item.trajectory.clone(),
                chunks: entry.chunks.clone(),
                probability: picked.probability,
                table_size,
            }
        };

        if self.max_times_sampled > 0 && sampled.times_sampled >= self.max_times_sampled {
            debug!(
                table = %self.name,
                key = sampled.key,
                times_sampled = sampled.times_sampled,
                "Removing item that reached its sample cap"
            );
            state.remove_item(&self.limiter, sampled.key)?;
        }
        Ok(sampled)
    }

    /// Remove every item and zero the limiter counters
    pub fn reset(&self) {
        info!(table = %self.name, "Resetting table");
        let mut state = self.state.lock();
        state.items.clear();
        state.sampler.clear();
        state.remover.clear();
        self.limiter.reset_counters();
        for extension in &mut state.extensions {
            extension.on_reset();
        }
    }

    /// Summary statistics
    pub fn info(&self) -> TableInfo {
        let state = self.state.lock();
        TableInfo {
            name: self.name.clone(),
            size: state.items.len(),
            max_size: self.max_size,
            max_times_sampled: self.max_times_sampled,
            limiter: self.limiter.info(),
            sampler: self.sampler_options,
            remover: self.remover_options,
            signature: self.signature.clone(),
        }
    }

    /// Produce a consistent snapshot of items, selectors and limiter state
    ///
    /// The snapshot holds strong handles to every referenced chunk so
    /// serialization can run after the mutex is released.
    pub fn checkpoint(&self) -> TableSnapshot {
        let state = self.state.lock();

        let mut items: Vec<ItemCheckpoint> = state
            .items
            .values()
            .map(|entry| ItemCheckpoint {
                key: entry.item.key,
                priority: entry.item.priority,
                times_sampled: entry.item.times_sampled,
                inserted_at: entry.item.inserted_at,
                sequence: entry.item.sequence,
                trajectory: entry.item.trajectory.clone(),
            })
            .collect();
        items.sort_by_key(|item| item.sequence);

        let mut chunks: HashMap<u64, ChunkHandle> = HashMap::new();
        for entry in state.items.values() {
            for handle in &entry.chunks {
                chunks.entry(handle.key).or_insert_with(|| handle.clone());
            }
        }

        TableSnapshot {
            checkpoint: TableCheckpoint {
                name: self.name.clone(),
                max_size: self.max_size,
                max_times_sampled: self.max_times_sampled,
                sampler: self.sampler_options,
                remover: self.remover_options,
                limiter: self.limiter.checkpoint(),
                signature: self.signature.clone(),
                items,
            },
            chunks: chunks.into_values().collect(),
        }
    }

    /// Rebuild a table from a checkpoint
    ///
    /// Every chunk the checkpointed items reference must already be
    /// registered in `store`. Items are replayed in insertion-sequence
    /// order so FIFO/LIFO behavior survives the round-trip; limiter
    /// counters resume from the checkpoint rather than being re-counted.
    pub fn from_checkpoint(checkpoint: TableCheckpoint, store: Arc<ChunkStore>) -> Result<Self> {
        let limiter = RateLimiter::from_checkpoint(&checkpoint.limiter)?;
        let table = Self::new(
            checkpoint.name,
            checkpoint.max_size,
            checkpoint.max_times_sampled,
            checkpoint.sampler.build(),
            checkpoint.remover.build(),
            limiter,
            checkpoint.signature,
            store,
        )?;

        let mut items = checkpoint.items;
        items.sort_by_key(|item| item.sequence);
        {
            let mut state = table.state.lock();
            for restored in items {
                let item = Item {
                    key: restored.key,
                    table: table.name.clone(),
                    priority: restored.priority,
                    trajectory: restored.trajectory,
                    times_sampled: restored.times_sampled,
                    inserted_at: restored.inserted_at,
                    sequence: restored.sequence,
                };
                let chunks = table.resolve_chunks(&item)?;
                state.sampler.insert(item.key, item.priority)?;
                state.remover.insert(item.key, item.priority)?;
                state.next_sequence = state.next_sequence.max(item.sequence + 1);
                state.items.insert(item.key, TableEntry { item, chunks });
            }
        }
        debug!(table = %table.name, size = table.num_items(), "Restored table from checkpoint");
        Ok(table)
    }

    /// Verify that the item map and both selectors agree on the key set
    /// and that the capacity bound holds
    pub fn check_consistency(&self) -> Result<()> {
        let state = self.state.lock();
        let mut item_keys: Vec<ItemKey> = state.items.keys().copied().collect();
        let mut sampler_keys = state.sampler.keys();
        let mut remover_keys = state.remover.keys();
        item_keys.sort_unstable();
        sampler_keys.sort_unstable();
        remover_keys.sort_unstable();

        if item_keys != sampler_keys || item_keys != remover_keys {
            return Err(Error::Internal(format!(
                "table {}: item map, sampler and remover key sets diverge",
                self.name
            )));
        }
        if state.items.len() > self.max_size {
            return Err(Error::Internal(format!(
                "table {}: size {} exceeds max_size {}",
                self.name,
                state.items.len(),
                self.max_size
            )));
        }
        Ok(())
    }
}
