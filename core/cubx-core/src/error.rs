//! Error types for the CUBX aggregation engine.
//!
//! All public APIs return `CubxResult<T>` — no panics in library code for
//! runtime conditions. Violated preconditions (programmer errors, such as
//! granting a member on a non-custom hierarchy) assert instead.

use thiserror::Error;

/// Unified error type for all CUBX operations.
#[derive(Debug, Error)]
pub enum CubxError {
    /// A rollup or crossjoin would produce more cells than the addressable cap
    #[error("cell limit exceeded: {cells} cells, maximum {max}")]
    LimitExceeded { cells: u64, max: u64 },

    /// Operation is not implemented for this configuration
    #[error("not supported: {0}")]
    Unsupported(String),

    /// Value datatype does not match the dataset's storage type
    #[error("datatype mismatch: expected {expected}, got {actual}")]
    DatatypeMismatch { expected: String, actual: String },

    /// Cell coordinate falls outside the segment's axes
    #[error("coordinate out of range: {0}")]
    CoordinateOutOfRange(String),

    /// Rollup sources disagree on dimensionality or column shape
    #[error("segment shape mismatch: {0}")]
    ShapeMismatch(String),

    /// Segment population failed or was cancelled by the execution layer
    #[error("segment population failed: {0}")]
    PopulationFailed(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for all CUBX operations.
pub type CubxResult<T> = Result<T, CubxError>;

impl From<serde_json::Error> for CubxError {
    fn from(err: serde_json::Error) -> Self {
        CubxError::Serialization(err.to_string())
    }
}

impl From<bincode::Error> for CubxError {
    fn from(err: bincode::Error) -> Self {
        CubxError::Serialization(err.to_string())
    }
}
