//! Items: the logical unit of replayable experience

use crate::chunk::ChunkHandle;
use crate::trajectory::Trajectory;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Process-unique item identifier, supplied by the writer
pub type ItemKey = u64;

/// A prioritized reference to a trajectory, owned by one table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    /// Writer-assigned key, unique within the process
    pub key: ItemKey,
    /// Name of the owning table
    pub table: String,
    /// Sampling priority; must be non-negative for priority-sensitive
    /// selectors
    pub priority: f64,
    /// Column-wise chunk references
    pub trajectory: Trajectory,
    /// How many times this item has been returned by `Table::sample`
    pub times_sampled: u32,
    /// Wall-clock insertion time
    pub inserted_at: DateTime<Utc>,
    /// Monotone per-table insertion sequence, assigned by the table.
    /// Checkpoints use it to restore FIFO/LIFO order.
    pub sequence: u64,
}

impl Item {
    /// Create a fresh item ready for insertion
    pub fn new(key: ItemKey, table: impl Into<String>, priority: f64, trajectory: Trajectory) -> Self {
        Self {
            key,
            table: table.into(),
            priority,
            trajectory,
            times_sampled: 0,
            inserted_at: Utc::now(),
            sequence: 0,
        }
    }
}

/// One sampled item, detached from the table
///
/// Holds its own strong chunk handles so serialization to the wire can
/// proceed after the table mutex is released.
#[derive(Debug, Clone)]
pub struct SampledItem {
    /// Item key
    pub key: ItemKey,
    /// Priority at the moment of sampling
    pub priority: f64,
    /// Times-sampled count including this sample
    pub times_sampled: u32,
    /// The item's trajectory
    pub trajectory: Trajectory,
    /// Strong handles for every chunk the trajectory references
    pub chunks: Vec<ChunkHandle>,
    /// Probability reported by the sampling selector
    pub probability: f64,
    /// Table size at the moment of the pick
    pub table_size: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_item_defaults() {
        let item = Item::new(42, "replay", 1.5, Trajectory::default());
        assert_eq!(item.key, 42);
        assert_eq!(item.table, "replay");
        assert_eq!(item.priority, 1.5);
        assert_eq!(item.times_sampled, 0);
        assert_eq!(item.sequence, 0);
    }
}
