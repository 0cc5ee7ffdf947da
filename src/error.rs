//! Error types for freshet.

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during index mutation, search, or persistence.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum IndexError {
    /// Invalid parameter value.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Dimension mismatch between a vector and the index.
    #[error("dimension mismatch: vector has {vector_dim} dimensions, index expects {index_dim}")]
    DimensionMismatch { vector_dim: usize, index_dim: usize },

    /// Tag is already mapped to a live or tombstoned slot.
    #[error("tag {0} already present")]
    DuplicateTag(u32),

    /// Tag is not mapped to any slot.
    #[error("tag {0} not found")]
    UnknownTag(u32),

    /// No free slot is available for a new point.
    #[error("capacity exhausted: no free slot available")]
    CapacityExhausted,

    /// The consolidation gate could not be acquired within the bounded wait.
    #[error("consolidation gate unavailable after {0:?}")]
    LockTimeout(Duration),

    /// A structural post-condition check failed.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// The operation is not supported in the index's current configuration.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// File read/write failure during save/load.
    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for IndexError {
    fn from(e: std::io::Error) -> Self {
        IndexError::Io(e.to_string())
    }
}

/// Result type alias for freshet operations.
pub type Result<T> = std::result::Result<T, IndexError>;
