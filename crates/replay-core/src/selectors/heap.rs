//! Deterministic min/max-priority selection

use super::{
    empty_selector_error, key_exists_error, key_not_found_error, ItemSelector, KeyWithProbability,
    SelectorOptions,
};
use crate::item::ItemKey;
use crate::Result;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy)]
struct HeapNode {
    key: ItemKey,
    /// Priority multiplied by the heap sign; smaller pops first.
    cost: f64,
    /// Monotone counter bumped on every insert and update. Ties on cost pop
    /// in update order, which lets callers build LRU-style policies by
    /// re-updating on each touch.
    update_number: u64,
}

impl HeapNode {
    fn before(&self, other: &Self) -> bool {
        self.cost < other.cost
            || (self.cost == other.cost && self.update_number < other.update_number)
    }
}

/// Always samples the lowest (min-heap) or highest (max-heap) priority key
///
/// Backed by a binary heap over `(sign * priority, update_number)` with a
/// key-to-position map, so update and delete of arbitrary keys stay
/// O(log n). Sampling is deterministic with probability 1.0.
pub struct HeapSelector {
    sign: f64,
    update_count: u64,
    heap: Vec<HeapNode>,
    positions: HashMap<ItemKey, usize>,
}

impl HeapSelector {
    /// Create an empty selector; `min_heap` picks the smallest priority
    pub fn new(min_heap: bool) -> Self {
        Self {
            sign: if min_heap { 1.0 } else { -1.0 },
            update_count: 0,
            heap: Vec::new(),
            positions: HashMap::new(),
        }
    }

    /// Whether this selector pops the smallest priority first
    pub fn is_min_heap(&self) -> bool {
        self.sign == 1.0
    }

    fn swap(&mut self, a: usize, b: usize) {
        self.heap.swap(a, b);
        self.positions.insert(self.heap[a].key, a);
        self.positions.insert(self.heap[b].key, b);
    }

    fn sift_up(&mut self, mut index: usize) -> usize {
        while index > 0 {
            let parent = (index - 1) / 2;
            if self.heap[index].before(&self.heap[parent]) {
                self.swap(index, parent);
                index = parent;
            } else {
                break;
            }
        }
        index
    }

    fn sift_down(&mut self, mut index: usize) -> usize {
        loop {
            let mut smallest = index;
            for child in [2 * index + 1, 2 * index + 2] {
                if child < self.heap.len() && self.heap[child].before(&self.heap[smallest]) {
                    smallest = child;
                }
            }
            if smallest == index {
                return index;
            }
            self.swap(index, smallest);
            index = smallest;
        }
    }

    fn adjust(&mut self, index: usize) {
        let index = self.sift_up(index);
        self.sift_down(index);
    }
}

impl ItemSelector for HeapSelector {
    fn insert(&mut self, key: ItemKey, priority: f64) -> Result<()> {
        if self.positions.contains_key(&key) {
            return Err(key_exists_error(key));
        }
        let index = self.heap.len();
        self.heap.push(HeapNode {
            key,
            cost: priority * self.sign,
            update_number: self.update_count,
        });
        self.update_count += 1;
        self.positions.insert(key, index);
        self.sift_up(index);
        Ok(())
    }

    fn delete(&mut self, key: ItemKey) -> Result<()> {
        let index = self
            .positions
            .remove(&key)
            .ok_or_else(|| key_not_found_error(key))?;

        let last = self.heap.len() - 1;
        if index != last {
            self.heap.swap(index, last);
            self.positions.insert(self.heap[index].key, index);
            self.heap.pop();
            self.adjust(index);
        } else {
            self.heap.pop();
        }
        Ok(())
    }

    fn update(&mut self, key: ItemKey, priority: f64) -> Result<()> {
        let index = *self
            .positions
            .get(&key)
            .ok_or_else(|| key_not_found_error(key))?;
        self.heap[index].cost = priority * self.sign;
        self.heap[index].update_number = self.update_count;
        self.update_count += 1;
        self.adjust(index);
        Ok(())
    }

    fn sample(&mut self) -> Result<KeyWithProbability> {
        let root = self.heap.first().ok_or_else(empty_selector_error)?;
        Ok(KeyWithProbability {
            key: root.key,
            probability: 1.0,
        })
    }

    fn clear(&mut self) {
        self.heap.clear();
        self.positions.clear();
    }

    fn len(&self) -> usize {
        self.heap.len()
    }

    fn keys(&self) -> Vec<ItemKey> {
        self.heap.iter().map(|node| node.key).collect()
    }

    fn options(&self) -> SelectorOptions {
        SelectorOptions::Heap {
            min_heap: self.sign == 1.0,
        }
    }
}
