//! Prioritized selection over an array-encoded sum tree

use super::{
    empty_selector_error, key_exists_error, key_not_found_error, ItemSelector, KeyWithProbability,
    SelectorOptions,
};
use crate::item::ItemKey;
use crate::{Error, Result};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use tracing::debug;

/// Initial node capacity; doubled whenever exceeded.
const INITIAL_CAPACITY: usize = 131_072;

/// Relative tolerance on a node's stored subtree sum before the whole tree
/// is recomputed.
const SUM_TOLERANCE: f64 = 1e-4;

#[derive(Debug, Clone, Copy)]
struct Node {
    key: ItemKey,
    /// Exponentiated priority of this node plus the sums of both children.
    sum: f64,
    /// Exponentiated priority of this node alone. Kept separately because
    /// deriving it from `sum` loses precision as rounding errors build up.
    value: f64,
}

/// Samples keys with probability proportional to `priority ^ exponent`
///
/// The distribution lives in a flat binary tree where node `i` has children
/// `2i+1` and `2i+2` and stores the sum of its subtree's exponentiated
/// priorities. Insert, delete, update and sample are all O(log n).
///
/// Priorities and sums are doubles, so keys whose priorities differ by many
/// orders of magnitude will accumulate rounding error; priorities of roughly
/// the same scale with an exponent below ~2 stay well inside the tolerance.
pub struct PrioritizedSelector {
    priority_exponent: f64,
    capacity: usize,
    sum_tree: Vec<Node>,
    key_to_index: HashMap<ItemKey, usize>,
    rng: SmallRng,
}

impl PrioritizedSelector {
    /// Create an empty selector; `priority_exponent` must be non-negative
    pub fn new(priority_exponent: f64) -> Self {
        Self {
            priority_exponent,
            capacity: INITIAL_CAPACITY,
            sum_tree: Vec::new(),
            key_to_index: HashMap::new(),
            rng: SmallRng::from_entropy(),
        }
    }

    /// The configured priority exponent
    pub fn priority_exponent(&self) -> f64 {
        self.priority_exponent
    }

    fn exponentiate(&self, priority: f64) -> f64 {
        // Zero-priority keys stay unsampleable even with exponent zero.
        if priority == 0.0 {
            0.0
        } else {
            priority.powf(self.priority_exponent)
        }
    }

    fn check_priority(&self, key: ItemKey, priority: f64) -> Result<()> {
        if !priority.is_finite() || priority < 0.0 {
            return Err(Error::InvalidArgument(format!(
                "priority for key {key} must be finite and non-negative, got {priority}"
            )));
        }
        Ok(())
    }

    fn node_value(&self, index: usize) -> f64 {
        self.sum_tree[index].value
    }

    /// Subtree sum at `index`, or 0 past the end of the tree.
    fn node_sum(&self, index: usize) -> f64 {
        self.sum_tree.get(index).map_or(0.0, |node| node.sum)
    }

    /// Set the individual value of a node and propagate the delta to the
    /// root. If accumulated rounding drift at any touched node exceeds the
    /// tolerance, the whole tree is recomputed instead.
    fn set_node(&mut self, index: usize, value: f64) {
        let delta = value - self.sum_tree[index].value;
        self.sum_tree[index].value = value;

        let mut i = index;
        loop {
            self.sum_tree[i].sum += delta;

            let recomputed =
                self.sum_tree[i].value + self.node_sum(2 * i + 1) + self.node_sum(2 * i + 2);
            if (self.sum_tree[i].sum - recomputed).abs() > SUM_TOLERANCE * recomputed.abs() {
                self.reinitialize_sum_tree();
                return;
            }

            if i == 0 {
                break;
            }
            i = (i - 1) / 2;
        }
    }

    /// Recompute every subtree sum from the stored values, bottom-up.
    fn reinitialize_sum_tree(&mut self) {
        debug!(
            len = self.sum_tree.len(),
            "Rebuilding sum tree after rounding drift"
        );
        for i in (0..self.sum_tree.len()).rev() {
            self.sum_tree[i].sum =
                self.sum_tree[i].value + self.node_sum(2 * i + 1) + self.node_sum(2 * i + 2);
        }
    }

    #[cfg(test)]
    fn node_sum_for_testing(&self, index: usize) -> f64 {
        self.node_sum(index)
    }
}

impl ItemSelector for PrioritizedSelector {
    fn insert(&mut self, key: ItemKey, priority: f64) -> Result<()> {
        self.check_priority(key, priority)?;
        if self.key_to_index.contains_key(&key) {
            return Err(key_exists_error(key));
        }

        let index = self.sum_tree.len();
        if index == self.capacity {
            self.capacity *= 2;
            self.sum_tree.reserve(self.capacity - index);
        }
        self.sum_tree.push(Node {
            key,
            sum: 0.0,
            value: 0.0,
        });
        self.key_to_index.insert(key, index);
        let value = self.exponentiate(priority);
        self.set_node(index, value);
        Ok(())
    }

    fn delete(&mut self, key: ItemKey) -> Result<()> {
        let index = self
            .key_to_index
            .remove(&key)
            .ok_or_else(|| key_not_found_error(key))?;

        let last_index = self.sum_tree.len() - 1;
        if index != last_index {
            let moved_key = self.sum_tree[last_index].key;
            let moved_value = self.sum_tree[last_index].value;
            self.set_node(last_index, 0.0);
            self.sum_tree[index].key = moved_key;
            self.set_node(index, moved_value);
            self.key_to_index.insert(moved_key, index);
        } else {
            self.set_node(index, 0.0);
        }
        self.sum_tree.pop();
        Ok(())
    }

    fn update(&mut self, key: ItemKey, priority: f64) -> Result<()> {
        self.check_priority(key, priority)?;
        let index = *self
            .key_to_index
            .get(&key)
            .ok_or_else(|| key_not_found_error(key))?;
        let value = self.exponentiate(priority);
        self.set_node(index, value);
        Ok(())
    }

    fn sample(&mut self) -> Result<KeyWithProbability> {
        if self.sum_tree.is_empty() {
            return Err(empty_selector_error());
        }
        let total = self.sum_tree[0].sum;
        if total <= 0.0 {
            return Err(Error::FailedPrecondition(
                "cannot sample: every priority is zero".to_string(),
            ));
        }

        let mut target = self.rng.gen_range(0.0..total);
        let mut index = 0;
        loop {
            let left = 2 * index + 1;
            let left_sum = self.node_sum(left);
            if target < left_sum {
                index = left;
                continue;
            }
            target -= left_sum;

            let right = 2 * index + 2;
            // Floating-point slack past the last child lands on this node.
            if target < self.node_value(index) || right >= self.sum_tree.len() {
                break;
            }
            target -= self.node_value(index);
            index = right;
        }

        Ok(KeyWithProbability {
            key: self.sum_tree[index].key,
            probability: self.node_value(index) / total,
        })
    }

    fn clear(&mut self) {
        self.sum_tree.clear();
        self.key_to_index.clear();
        self.capacity = INITIAL_CAPACITY;
    }

    fn len(&self) -> usize {
        self.sum_tree.len()
    }

    fn keys(&self) -> Vec<ItemKey> {
        self.sum_tree.iter().map(|node| node.key).collect()
    }

    fn options(&self) -> SelectorOptions {
        SelectorOptions::Prioritized {
            priority_exponent: self.priority_exponent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn total_value(selector: &PrioritizedSelector) -> f64 {
        selector.sum_tree.iter().map(|node| node.value).sum()
    }

    #[test]
    fn test_root_sum_tracks_total() {
        let mut selector = PrioritizedSelector::new(1.0);
        for key in 0..100 {
            selector.insert(key, (key % 7) as f64).unwrap();
        }
        for key in (0..100).step_by(3) {
            selector.update(key, 2.5).unwrap();
        }
        for key in (0..100).step_by(5) {
            selector.delete(key).unwrap();
        }

        let expected = total_value(&selector);
        let observed = selector.node_sum_for_testing(0);
        assert!(
            (observed - expected).abs() <= SUM_TOLERANCE * expected,
            "observed {observed}, expected {expected}"
        );
    }

    #[test]
    fn test_negative_priority_rejected() {
        let mut selector = PrioritizedSelector::new(1.0);
        assert!(selector.insert(1, -0.5).is_err());
        selector.insert(1, 0.5).unwrap();
        assert!(selector.update(1, -1.0).is_err());
        assert!(selector.update(1, f64::NAN).is_err());
    }

    #[test]
    fn test_probability_proportional_to_priority() {
        let mut selector = PrioritizedSelector::new(1.0);
        selector.insert(1, 1.0).unwrap();
        selector.insert(2, 3.0).unwrap();
        selector.insert(3, 6.0).unwrap();

        let mut counts: HashMap<ItemKey, usize> = HashMap::new();
        let draws = 200_000;
        for _ in 0..draws {
            *counts.entry(selector.sample().unwrap().key).or_default() += 1;
        }
        let freq = |key: ItemKey| counts[&key] as f64 / draws as f64;
        assert!((freq(1) - 0.1).abs() < 0.01, "{}", freq(1));
        assert!((freq(2) - 0.3).abs() < 0.01, "{}", freq(2));
        assert!((freq(3) - 0.6).abs() < 0.01, "{}", freq(3));
    }

    #[test]
    fn test_exponent_reshapes_distribution() {
        let mut selector = PrioritizedSelector::new(2.0);
        selector.insert(1, 1.0).unwrap();
        selector.insert(2, 3.0).unwrap();

        let draws = 100_000;
        let mut hits = 0usize;
        for _ in 0..draws {
            if selector.sample().unwrap().key == 2 {
                hits += 1;
            }
        }
        // 9 / (1 + 9)
        let freq = hits as f64 / draws as f64;
        assert!((freq - 0.9).abs() < 0.01, "{freq}");
    }

    #[test]
    fn test_sample_reports_normalized_probability() {
        let mut selector = PrioritizedSelector::new(1.0);
        selector.insert(1, 1.0).unwrap();
        selector.insert(2, 4.0).unwrap();

        for _ in 0..100 {
            let picked = selector.sample().unwrap();
            let expected = if picked.key == 1 { 0.2 } else { 0.8 };
            assert!((picked.probability - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn test_zero_priority_never_sampled() {
        let mut selector = PrioritizedSelector::new(1.0);
        selector.insert(1, 0.0).unwrap();
        selector.insert(2, 1.0).unwrap();
        for _ in 0..1000 {
            assert_eq!(selector.sample().unwrap().key, 2);
        }
    }

    #[test]
    fn test_all_zero_priorities_cannot_sample() {
        let mut selector = PrioritizedSelector::new(1.0);
        selector.insert(1, 0.0).unwrap();
        assert!(matches!(
            selector.sample(),
            Err(Error::FailedPrecondition(_))
        ));
    }

    #[test]
    fn test_delete_swaps_last_node() {
        let mut selector = PrioritizedSelector::new(1.0);
        for key in 0..10 {
            selector.insert(key, 1.0 + key as f64).unwrap();
        }
        selector.delete(0).unwrap();
        assert_eq!(selector.len(), 9);

        let mut keys = selector.keys();
        keys.sort_unstable();
        assert_eq!(keys, (1..10).collect::<Vec<_>>());

        let expected = total_value(&selector);
        let observed = selector.node_sum_for_testing(0);
        assert!((observed - expected).abs() <= SUM_TOLERANCE * expected);
    }

    #[test]
    fn test_zero_exponent_is_uniform_over_nonzero() {
        let mut selector = PrioritizedSelector::new(0.0);
        selector.insert(1, 0.001).unwrap();
        selector.insert(2, 1000.0).unwrap();

        let draws = 100_000;
        let mut hits = 0usize;
        for _ in 0..draws {
            if selector.sample().unwrap().key == 1 {
                hits += 1;
            }
        }
        let freq = hits as f64 / draws as f64;
        assert!((freq - 0.5).abs() < 0.01, "{freq}");
    }

    #[test]
    fn test_clear_resets_state() {
        let mut selector = PrioritizedSelector::new(1.0);
        for key in 0..50 {
            selector.insert(key, 1.0).unwrap();
        }
        selector.clear();
        assert!(selector.is_empty());
        assert!(selector.sample().is_err());
        selector.insert(7, 2.0).unwrap();
        assert_eq!(selector.sample().unwrap().key, 7);
    }
}
