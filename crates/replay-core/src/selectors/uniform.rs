//! Uniform selection over all keys

use super::{
    empty_selector_error, key_exists_error, key_not_found_error, ItemSelector, KeyWithProbability,
    SelectorOptions,
};
use crate::item::ItemKey;
use crate::Result;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;

/// Samples every key with probability `1/n`
///
/// Keys live in a dense vector; delete swaps the tail into the freed slot,
/// so every operation is O(1).
pub struct UniformSelector {
    keys: Vec<ItemKey>,
    key_to_index: HashMap<ItemKey, usize>,
    rng: SmallRng,
}

impl UniformSelector {
    /// Create an empty selector
    pub fn new() -> Self {
        Self {
            keys: Vec::new(),
            key_to_index: HashMap::new(),
            rng: SmallRng::from_entropy(),
        }
    }
}

impl Default for UniformSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl ItemSelector for UniformSelector {
    fn insert(&mut self, key: ItemKey, _priority: f64) -> Result<()> {
        let index = self.keys.len();
        match self.key_to_index.entry(key) {
            std::collections::hash_map::Entry::Occupied(_) => Err(key_exists_error(key)),
            std::collections::hash_map::Entry::Vacant(entry) => {
                entry.insert(index);
                self.keys.push(key);
                Ok(())
            }
        }
    }

    fn delete(&mut self, key: ItemKey) -> Result<()> {
        let index = self
            .key_to_index
            .remove(&key)
            .ok_or_else(|| key_not_found_error(key))?;

        let last_index = self.keys.len() - 1;
        if index != last_index {
            let last_key = self.keys[last_index];
            self.keys[index] = last_key;
            self.key_to_index.insert(last_key, index);
        }
        self.keys.pop();
        Ok(())
    }

    fn update(&mut self, key: ItemKey, _priority: f64) -> Result<()> {
        if !self.key_to_index.contains_key(&key) {
            return Err(key_not_found_error(key));
        }
        Ok(())
    }

    fn sample(&mut self) -> Result<KeyWithProbability> {
        if self.keys.is_empty() {
            return Err(empty_selector_error());
        }
        let index = self.rng.gen_range(0..self.keys.len());
        Ok(KeyWithProbability {
            key: self.keys[index],
            probability: 1.0 / self.keys.len() as f64,
        })
    }

    fn clear(&mut self) {
        self.keys.clear();
        self.key_to_index.clear();
    }

    fn len(&self) -> usize {
        self.keys.len()
    }

    fn keys(&self) -> Vec<ItemKey> {
        self.keys.clone()
    }

    fn options(&self) -> SelectorOptions {
        SelectorOptions::Uniform
    }
}
