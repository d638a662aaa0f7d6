//! First-in-first-out selection

use super::{
    empty_selector_error, key_exists_error, key_not_found_error, ItemSelector, KeyWithProbability,
    SelectorOptions,
};
use crate::item::ItemKey;
use crate::Result;
use std::collections::{BTreeMap, HashMap};

/// Always samples the oldest inserted key
///
/// Priorities are ignored. Sampling is deterministic, so the reported
/// probability is always 1.0. When used as the sampler of a queue-shaped
/// table, exactly one worker must drain it or the pop order is no longer
/// the insertion order.
pub struct FifoSelector {
    ordered: BTreeMap<u64, ItemKey>,
    key_to_sequence: HashMap<ItemKey, u64>,
    next_sequence: u64,
}

impl FifoSelector {
    /// Create an empty selector
    pub fn new() -> Self {
        Self {
            ordered: BTreeMap::new(),
            key_to_sequence: HashMap::new(),
            next_sequence: 0,
        }
    }
}

impl Default for FifoSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl ItemSelector for FifoSelector {
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
            .next()
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
        SelectorOptions::Fifo
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_samples_oldest_first() {
        let mut selector = FifoSelector::new();
        for key in [5, 3, 9] {
            selector.insert(key, 0.0).unwrap();
        }
        assert_eq!(selector.sample().unwrap().key, 5);
        selector.delete(5).unwrap();
        assert_eq!(selector.sample().unwrap().key, 3);
        selector.delete(3).unwrap();
        assert_eq!(selector.sample().unwrap().key, 9);
    }

    #[test]
    fn test_sample_does_not_pop() {
        let mut selector = FifoSelector::new();
        selector.insert(1, 0.0).unwrap();
        assert_eq!(selector.sample().unwrap().key, 1);
        assert_eq!(selector.sample().unwrap().key, 1);
        assert_eq!(selector.len(), 1);
    }

    #[test]
    fn test_middle_delete_preserves_order() {
        let mut selector = FifoSelector::new();
        for key in [1, 2, 3] {
            selector.insert(key, 0.0).unwrap();
        }
        selector.delete(2).unwrap();
        assert_eq!(selector.keys(), vec![1, 3]);
    }

    #[test]
    fn test_deterministic_probability() {
        let mut selector = FifoSelector::new();
        selector.insert(7, 0.0).unwrap();
        assert_eq!(selector.sample().unwrap().probability, 1.0);
    }
}
