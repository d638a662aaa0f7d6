//! Trajectories: the tensor-shaped view of one item
//!
//! A trajectory is an ordered list of columns, each referencing slices of
//! chunks in the process-wide store. Columns carry the element dtype and
//! shape so an optional table signature can be validated without touching
//! payload bytes.

use crate::chunk::ChunkKey;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Element type of a trajectory column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    /// Boolean
    Bool,
    /// Unsigned 8-bit integer
    U8,
    /// Signed 32-bit integer
    I32,
    /// Signed 64-bit integer
    I64,
    /// 32-bit float
    F32,
    /// 64-bit float
    F64,
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bool => "bool",
            Self::U8 => "u8",
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::F32 => "f32",
            Self::F64 => "f64",
        };
        write!(f, "{name}")
    }
}

/// A contiguous run of rows within one chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkSlice {
    /// Chunk holding the rows
    pub chunk_key: ChunkKey,
    /// First row within the chunk
    pub offset: u32,
    /// Number of rows
    pub length: u32,
}

/// One column of a trajectory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    /// Chunk slices concatenated in order
    pub slices: Vec<ChunkSlice>,
    /// Squeeze a length-1 column to a rank-0 output
    pub squeeze: bool,
    /// Element dtype
    pub dtype: DType,
    /// Per-element shape
    pub shape: Vec<u64>,
}

impl Column {
    /// Total number of rows across all slices
    pub fn num_rows(&self) -> u64 {
        self.slices.iter().map(|s| u64::from(s.length)).sum()
    }
}

/// An ordered list of columns referencing shared chunks
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    /// The columns, in signature order
    pub columns: Vec<Column>,
}

impl Trajectory {
    /// Create a trajectory from columns
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    /// All referenced chunk keys, deduplicated, in first-reference order
    pub fn chunk_keys(&self) -> Vec<ChunkKey> {
        let mut keys = Vec::new();
        for column in &self.columns {
            for slice in &column.slices {
                if !keys.contains(&slice.chunk_key) {
                    keys.push(slice.chunk_key);
                }
            }
        }
        keys
    }

    /// Structural validation independent of any signature
    ///
    /// A squeezed column must reference exactly one row, and slices must be
    /// non-empty.
    pub fn validate(&self) -> Result<()> {
        for (i, column) in self.columns.iter().enumerate() {
            if column.slices.is_empty() {
                return Err(Error::InvalidArgument(format!(
                    "column {i} references no chunk slices"
                )));
            }
            if column.squeeze && column.num_rows() != 1 {
                return Err(Error::InvalidArgument(format!(
                    "column {i} is squeezed but has {} rows",
                    column.num_rows()
                )));
            }
        }
        Ok(())
    }
}

/// Expected dtype and partial shape of one signature column
///
/// `None` dimensions are wildcards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    /// Optional column name, for diagnostics only
    pub name: Option<String>,
    /// Required dtype
    pub dtype: DType,
    /// Required shape; `None` entries match any extent
    pub shape: Vec<Option<u64>>,
}

impl ColumnSpec {
    fn matches(&self, column: &Column) -> bool {
        if self.dtype != column.dtype || self.shape.len() != column.shape.len() {
            return false;
        }
        self.shape
            .iter()
            .zip(&column.shape)
            .all(|(spec, dim)| spec.map_or(true, |d| d == *dim))
    }
}

/// Optional per-table schema every inserted trajectory must satisfy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// Expected columns, in order
    pub columns: Vec<ColumnSpec>,
}

impl Signature {
    /// Check a trajectory against this signature
    pub fn validate(&self, trajectory: &Trajectory) -> Result<()> {
        if trajectory.columns.len() != self.columns.len() {
            return Err(Error::InvalidArgument(format!(
                "trajectory has {} columns, signature expects {}",
                trajectory.columns.len(),
                self.columns.len()
            )));
        }
        for (i, (spec, column)) in self.columns.iter().zip(&trajectory.columns).enumerate() {
            if !spec.matches(column) {
                let name = spec.name.as_deref().unwrap_or("<unnamed>");
                return Err(Error::InvalidArgument(format!(
                    "column {i} ({name}): got {} {:?}, signature expects {} {:?}",
                    column.dtype, column.shape, spec.dtype, spec.shape
                )));
            }
        }
        Ok(())
    }
}
