//! Last-in-first-out selection

use super::{
    empty_selector_error, key_exists_error, key_not_found_error, ItemSelector, KeyWithProbability,
    SelectorOptions,
};
use crate::item::ItemKey;
use crate::Result;
use std::collections::{BTreeMap, HashMap};

/// Always samples the most recently inserted key
///
/// Priorities are ignored and sampling is deterministic with probability
/// 1.0, mirroring [`FifoSelector`](super::FifoSelector) from the other end.
pub struct LifoSelector {
    ordered: BTreeMap<u64, ItemKey>,
    key_to_sequence: HashMap<ItemKey, u64>,
    next_sequence: u64,
}

impl LifoSelector {
    /// Create an empty selector
    pub fn new() -> Self {
        Self {
            ordered: BTreeMap::new(),
            key_to_sequence: HashMap::new(),
            next_sequence: 0,
        }
    }
}

impl Default for LifoSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl ItemSelector for LifoSelector {
    fn insert(&mut self, key: ItemKey, _priority: f64) -> Result<()> {
        if self.key_to_sequence.contains_key(&key) {
            return Err(key_exists_error(key));
        }
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.key_to_sequence.insert(key, sequence);
        self.ordered.insert(sequence, key);
        Ok(())
    }

    fn delete(&mut self, key: ItemKey) -> Result<()> {
        let sequence = self
            .key_to_sequence
            .remove(&key)
            .ok_or_else(|| key_not_found_error(key))?;
        self.ordered.remove(&sequence);
        Ok(())
    }

    fn update(&mut self, key: ItemKey, _priority: f64) -> Result<()> {
        if !self.key_to_sequence.contains_key(&key) {
            return Err(key_not_found_error(key));
        }
        Ok(())
    }

    fn sample(&mut self) -> Result<KeyWithProbability> {
        let (_, key) = self
            .ordered
            .iter()
            .next_back()
            .ok_or_else(empty_selector_error)?;
        Ok(KeyWithProbability {
            key: *key,
            probability: 1.0,
        })
    }

    fn clear(&mut self) {
        self.ordered.clear();
        self.key_to_sequence.clear();
    }

    fn len(&self) -> usize {
        self.ordered.len()
    }

    fn keys(&self) -> Vec<ItemKey> {
        self.ordered.values().copied().collect()
    }

    fn options(&self) -> SelectorOptions {
        SelectorOptions::Lifo
    }
}
