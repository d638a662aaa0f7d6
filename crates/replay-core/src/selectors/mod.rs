//! Item selectors: dynamic discrete distributions over item keys
//!
//! Every table owns two selectors, one for sampling and one for choosing
//! eviction victims. All five variants support insert/delete/update/sample
//! in sublinear time and are interchangeable behind [`ItemSelector`].
//!
//! Selectors are not internally thread-safe; the owning table's mutex
//! serializes access.

mod fifo;
mod heap;
mod lifo;
mod prioritized;
mod uniform;

pub use fifo::FifoSelector;
pub use heap::HeapSelector;
pub use lifo::LifoSelector;
pub use prioritized::PrioritizedSelector;
pub use uniform::UniformSelector;

use crate::item::ItemKey;
use crate::Result;
use serde::{Deserialize, Serialize};

/// A sampled key together with the probability of having picked it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyWithProbability {
    /// The sampled key
    pub key: ItemKey,
    /// Probability of this pick under the current distribution.
    /// Deterministic selectors report 1.0.
    pub probability: f64,
}

/// Serializable description of a selector, sufficient to rebuild an empty
/// one with the same behavior
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SelectorOptions {
    /// Uniform over all keys
    Uniform,
    /// Oldest inserted key first
    Fifo,
    /// Most recently inserted key first
    Lifo,
    /// Probability proportional to `priority ^ priority_exponent`
    Prioritized {
        /// Exponent applied to priorities before normalization
        priority_exponent: f64,
    },
    /// Deterministic min- or max-priority key
    Heap {
        /// Pop the smallest priority when true, the largest otherwise
        min_heap: bool,
    },
}

impl SelectorOptions {
    /// Whether `sample` always returns the same key for a fixed state
    pub fn is_deterministic(&self) -> bool {
        matches!(self, Self::Fifo | Self::Lifo | Self::Heap { .. })
    }

    /// Whether the variant interprets priorities at all
    pub fn uses_priority(&self) -> bool {
        matches!(self, Self::Prioritized { .. } | Self::Heap { .. })
    }

    /// Build an empty selector with this behavior
    pub fn build(&self) -> Box<dyn ItemSelector> {
        match *self {
            Self::Uniform => Box::new(UniformSelector::new()),
            Self::Fifo => Box::new(FifoSelector::new()),
            Self::Lifo => Box::new(LifoSelector::new()),
            Self::Prioritized { priority_exponent } => {
                Box::new(PrioritizedSelector::new(priority_exponent))
            }
            Self::Heap { min_heap } => Box::new(HeapSelector::new(min_heap)),
        }
    }
}

/// A dynamic distribution over item keys
///
/// `insert` fails with `InvalidArgument` for an existing key; `delete` and
/// `update` fail with `InvalidArgument` for an unknown one. `sample` fails
/// with `FailedPrecondition` when the selector is empty.
pub trait ItemSelector: Send {
    /// Add a key with the given priority
    fn insert(&mut self, key: ItemKey, priority: f64) -> Result<()>;

    /// Remove a key
    fn delete(&mut self, key: ItemKey) -> Result<()>;

    /// Change the priority of a key
    fn update(&mut self, key: ItemKey, priority: f64) -> Result<()>;

    /// Draw one key from the distribution
    fn sample(&mut self) -> Result<KeyWithProbability>;

    /// Remove all keys
    fn clear(&mut self);

    /// Number of keys currently tracked
    fn len(&self) -> usize;

    /// Whether the selector is empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All tracked keys, in unspecified order
    fn keys(&self) -> Vec<ItemKey>;

    /// Descriptor sufficient to rebuild an empty equivalent selector
    fn options(&self) -> SelectorOptions;
}

pub(crate) fn key_exists_error(key: ItemKey) -> crate::Error {
    crate::Error::InvalidArgument(format!("key {key} already inserted"))
}

pub(crate) fn key_not_found_error(key: ItemKey) -> crate::Error {
    crate::Error::InvalidArgument(format!("key {key} not found"))
}

pub(crate) fn empty_selector_error() -> crate::Error {
    crate::Error::FailedPrecondition("cannot sample from an empty selector".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_determinism_flags() {
        assert!(!SelectorOptions::Uniform.is_deterministic());
        assert!(!SelectorOptions::Prioritized {
            priority_exponent: 0.8
        }
        .is_deterministic());
        assert!(SelectorOptions::Fifo.is_deterministic());
        assert!(SelectorOptions::Lifo.is_deterministic());
        assert!(SelectorOptions::Heap { min_heap: true }.is_deterministic());
    }

    #[test]
    fn test_build_roundtrips_options() {
        for options in [
            SelectorOptions::Uniform,
            SelectorOptions::Fifo,
            SelectorOptions::Lifo,
            SelectorOptions::Prioritized {
                priority_exponent: 1.2,
            },
            SelectorOptions::Heap { min_heap: false },
        ] {
            let selector = options.build();
            assert_eq!(selector.options(), options);
            assert!(selector.is_empty());
        }
    }

    #[test]
    fn test_insert_then_delete_restores_empty_state() {
        for options in [
            SelectorOptions::Uniform,
            SelectorOptions::Fifo,
            SelectorOptions::Lifo,
            SelectorOptions::Prioritized {
                priority_exponent: 1.0,
            },
            SelectorOptions::Heap { min_heap: true },
        ] {
            let mut selector = options.build();
            selector.insert(9, 2.0).unwrap();
            selector.delete(9).unwrap();
            assert!(selector.is_empty());
            assert!(selector.keys().is_empty());
            assert!(selector.sample().is_err());
        }
    }

    #[test]
    fn test_common_key_semantics() {
        for options in [
            SelectorOptions::Uniform,
            SelectorOptions::Fifo,
            SelectorOptions::Lifo,
            SelectorOptions::Prioritized {
                priority_exponent: 1.0,
            },
            SelectorOptions::Heap { min_heap: true },
        ] {
            let mut selector = options.build();
            selector.insert(1, 1.0).unwrap();
            assert!(selector.insert(1, 1.0).is_err(), "{options:?}");
            assert!(selector.delete(2).is_err(), "{options:?}");
            assert!(selector.update(2, 1.0).is_err(), "{options:?}");
            selector.update(1, 3.0).unwrap();
            selector.delete(1).unwrap();
        }
    }
}
