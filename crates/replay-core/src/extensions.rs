//! Extension hooks observing table mutations
//!
//! Extensions run synchronously while the table mutex is held, in
//! registration order, so they observe every mutation before it becomes
//! visible to other callers. They must be fast and must never call back
//! into the table; heavier side effects belong on the extension's own
//! worker, fed from these callbacks.

use crate::item::Item;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Observer attached to a table
///
/// Default implementations are no-ops, so extensions implement only the
/// callbacks they care about.
pub trait TableExtension: Send {
    /// A new item was inserted
    fn on_insert(&mut self, item: &Item) {
        let _ = item;
    }

    /// An existing item's priority changed
    fn on_update(&mut self, item: &Item) {
        let _ = item;
    }

    /// An item was returned by a sample call
    fn on_sample(&mut self, item: &Item) {
        let _ = item;
    }

    /// An item was removed (eviction, expiry, or explicit delete)
    fn on_delete(&mut self, item: &Item) {
        let _ = item;
    }

    /// The table was reset
    fn on_reset(&mut self) {}
}

/// Point-in-time counters collected by [`TableStatsExtension`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableStats {
    /// Items inserted
    pub inserts: u64,
    /// Priority updates applied
    pub updates: u64,
    /// Samples served
    pub samples: u64,
    /// Items removed
    pub deletes: u64,
    /// Table resets
    pub resets: u64,
}

#[derive(Debug, Default)]
struct StatsInner {
    inserts: AtomicU64,
    updates: AtomicU64,
    samples: AtomicU64,
    deletes: AtomicU64,
    resets: AtomicU64,
}

/// Shared reader half of [`TableStatsExtension`]
#[derive(Debug, Clone, Default)]
pub struct TableStatsHandle(Arc<StatsInner>);

impl TableStatsHandle {
    /// Read the current counters
    pub fn snapshot(&self) -> TableStats {
        TableStats {
            inserts: self.0.inserts.load(Ordering::Relaxed),
            updates: self.0.updates.load(Ordering::Relaxed),
            samples: self.0.samples.load(Ordering::Relaxed),
            deletes: self.0.deletes.load(Ordering::Relaxed),
            resets: self.0.resets.load(Ordering::Relaxed),
        }
    }
}

/// Counts table mutations; readable without the table mutex
#[derive(Debug, Default)]
pub struct TableStatsExtension {
    inner: Arc<StatsInner>,
}

impl TableStatsExtension {
    /// Create an extension and its shared reader
    pub fn new() -> (Self, TableStatsHandle) {
        let inner = Arc::new(StatsInner::default());
        let handle = TableStatsHandle(Arc::clone(&inner));
        (Self { inner }, handle)
    }
}

impl TableExtension for TableStatsExtension {
    fn on_insert(&mut self, _item: &Item) {
        self.inner.inserts.fetch_add(1, Ordering::Relaxed);
    }

    fn on_update(&mut self, _item: &Item) {
        self.inner.updates.fetch_add(1, Ordering::Relaxed);
    }

    fn on_sample(&mut self, _item: &Item) {
        self.inner.samples.fetch_add(1, Ordering::Relaxed);
    }

    fn on_delete(&mut self, _item: &Item) {
        self.inner.deletes.fetch_add(1, Ordering::Relaxed);
    }

    fn on_reset(&mut self) {
        self.inner.resets.fetch_add(1, Ordering::Relaxed);
    }
}
