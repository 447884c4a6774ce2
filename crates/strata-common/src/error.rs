//! Error types for StrataDB.

use thiserror::Error;

/// Result type alias using StrataError.
pub type Result<T> = std::result::Result<T, StrataError>;

/// Errors that can occur in StrataDB operations.
#[derive(Debug, Error)]
pub enum StrataError {
    // Access errors
    #[error("Index out of bounds: {index} (size {size})")]
    OutOfBounds { index: usize, size: usize },

    #[error("Invalid range: [{begin}, {end}) over size {size}")]
    InvalidRange {
        begin: usize,
        end: usize,
        size: usize,
    },

    #[error("Operation on detached accessor")]
    DetachedAccess,

    // Column errors
    #[error("Column is not nullable")]
    ColumnNotNullable,

    #[error("Unique constraint violation on indexed column")]
    UniqueConstraint,

    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    // Arena errors
    #[error("Arena allocation failed: requested {requested} bytes")]
    AllocFailed { requested: usize },

    #[error("Invalid ref: {ref_value:#x}, reason: {reason}")]
    InvalidRef { ref_value: u64, reason: String },

    #[error("Node corrupted at ref {ref_value:#x}: {reason}")]
    NodeCorrupted { ref_value: u64, reason: String },

    // Structural errors
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Spec mismatch: {0}")]
    SpecMismatch(String),

    #[error("Table not found: index {0}")]
    TableNotFound(usize),

    #[error("Column not found: {0}")]
    ColumnNotFound(String),

    // I/O errors (slice writer)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl StrataError {
    /// Builds an OutOfBounds error after a failed bounds check.
    pub fn out_of_bounds(index: usize, size: usize) -> Self {
        StrataError::OutOfBounds { index, size }
    }

    /// Builds an InvariantViolation with the given description.
    pub fn invariant(reason: impl Into<String>) -> Self {
        StrataError::InvariantViolation(reason.into())
    }
}
