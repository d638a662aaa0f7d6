//! Table, selector, limiter and checkpoint configuration

use crate::{ConfigError, Result};
use replay_core::selectors::SelectorOptions;
use replay_core::{RateLimiter, Signature, Table};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Selector configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SelectorConfig {
    /// Uniform over all keys
    #[default]
    Uniform,
    /// Oldest inserted key first
    Fifo,
    /// Most recently inserted key first
    Lifo,
    /// Probability proportional to `priority ^ priority_exponent`
    Prioritized {
        /// Exponent applied to priorities
        priority_exponent: f64,
    },
    /// Deterministic smallest-priority key
    MinHeap,
    /// Deterministic largest-priority key
    MaxHeap,
}

impl SelectorConfig {
    /// The selector descriptor this configuration resolves to
    pub fn options(&self) -> SelectorOptions {
        match *self {
            Self::Uniform => SelectorOptions::Uniform,
            Self::Fifo => SelectorOptions::Fifo,
            Self::Lifo => SelectorOptions::Lifo,
            Self::Prioritized { priority_exponent } => {
                SelectorOptions::Prioritized { priority_exponent }
            }
            Self::MinHeap => SelectorOptions::Heap { min_heap: true },
            Self::MaxHeap => SelectorOptions::Heap { min_heap: false },
        }
    }

    fn validate(&self, field: &str) -> Result<()> {
        if let Self::Prioritized { priority_exponent } = self {
            if !priority_exponent.is_finite() || *priority_exponent < 0.0 {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    message: format!(
                        "priority_exponent must be finite and non-negative, got {priority_exponent}"
                    ),
                });
            }
        }
        Ok(())
    }
}

/// Rate limiter configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimiterConfig {
    /// Target samples per insert
    pub samples_per_insert: f64,
    /// Minimum live items before sampling is admitted
    pub min_size_to_sample: u64,
    /// Lower bound of the admissible error window
    pub min_diff: f64,
    /// Upper bound of the admissible error window
    pub max_diff: f64,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self::min_size(1)
    }
}

impl RateLimiterConfig {
    /// Only require `min_size_to_sample` live items; never block otherwise
    pub fn min_size(min_size_to_sample: u64) -> Self {
        Self {
            samples_per_insert: 1.0,
            min_size_to_sample,
            min_diff: f64::MIN,
            max_diff: f64::MAX,
        }
    }

    /// Hold the sample rate near `samples_per_insert` times the insert
    /// rate, tolerating `error_buffer` samples of drift in each direction
    pub fn sample_to_insert_ratio(
        samples_per_insert: f64,
        min_size_to_sample: u64,
        error_buffer: f64,
    ) -> Self {
        let target = min_size_to_sample as f64 * samples_per_insert;
        Self {
            samples_per_insert,
            min_size_to_sample,
            min_diff: target - error_buffer,
            max_diff: target + error_buffer,
        }
    }

    /// Queue coupling: every item is sampled exactly once and inserts
    /// block while `size` unread items are pending
    pub fn queue(size: u64) -> Self {
        Self {
            samples_per_insert: 1.0,
            min_size_to_sample: 1,
            min_diff: 0.0,
            max_diff: size as f64,
        }
    }

    /// Build the limiter, validating the window
    pub fn build(&self) -> Result<RateLimiter> {
        Ok(RateLimiter::new(
            self.samples_per_insert,
            self.min_size_to_sample,
            self.min_diff,
            self.max_diff,
        )?)
    }
}

/// Checkpoint schedule and layout configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    /// Root directory for checkpoint subdirectories
    pub root: PathBuf,
    /// Secondary root consulted when the primary holds no checkpoint
    pub fallback: Option<PathBuf>,
    /// Seconds between automatic checkpoints; 0 disables the schedule
    pub interval_secs: u64,
    /// How many checkpoints to retain
    pub keep: usize,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/tmp/replay-checkpoints"),
            fallback: None,
            interval_secs: 0,
            keep: 3,
        }
    }
}

/// Configuration for one table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableConfig {
    /// Table name, unique within the server
    pub name: String,
    /// Capacity
    pub max_size: usize,
    /// Per-item sample cap; 0 disables expiry
    #[serde(default)]
    pub max_times_sampled: u32,
    /// Sampling selector
    #[serde(default)]
    pub sampler: SelectorConfig,
    /// Eviction selector
    #[serde(default = "default_remover")]
    pub remover: SelectorConfig,
    /// Rate limiter coupling
    #[serde(default)]
    pub rate_limiter: RateLimiterConfig,
    /// Optional trajectory schema
    #[serde(default)]
    pub signature: Option<Signature>,
}

fn default_remover() -> SelectorConfig {
    SelectorConfig::Fifo
}

impl TableConfig {
    /// A queue-shaped table: FIFO in, FIFO out, one sample per item
    pub fn queue(name: impl Into<String>, max_size: usize) -> Self {
        Self {
            name: name.into(),
            max_size,
            max_times_sampled: 1,
            sampler: SelectorConfig::Fifo,
            remover: SelectorConfig::Fifo,
            rate_limiter: RateLimiterConfig::queue(max_size as u64),
            signature: None,
        }
    }

    /// Validate all fields without building anything
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "name".to_string(),
                message: "table name must not be empty".to_string(),
            });
        }
        if self.max_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: format!("tables.{}.max_size", self.name),
                message: "must be at least 1".to_string(),
            });
        }
        self.sampler
            .validate(&format!("tables.{}.sampler", self.name))?;
        self.remover
            .validate(&format!("tables.{}.remover", self.name))?;
        if self.rate_limiter.min_diff > self.rate_limiter.max_diff {
            return Err(ConfigError::InvalidValue {
                field: format!("tables.{}.rate_limiter", self.name),
                message: format!(
                    "min_diff ({}) exceeds max_diff ({})",
                    self.rate_limiter.min_diff, self.rate_limiter.max_diff
                ),
            });
        }
        Ok(())
    }

    /// Build a ready table resolving chunks against `store`
    pub fn build(&self, store: Arc<replay_core::ChunkStore>) -> Result<Table> {
        self.validate()?;
        Ok(Table::new(
            self.name.clone(),
            self.max_size,
            self.max_times_sampled,
            self.sampler.options().build(),
            self.remover.options().build(),
            self.rate_limiter.build()?,
            self.signature.clone(),
            store,
        )?)
    }
}
