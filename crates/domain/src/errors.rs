//! Domain-level errors

use thiserror::Error;

/// Errors that can occur in the domain layer
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    /// Species label is empty or malformed
    #[error("Invalid species label: {0}")]
    InvalidLabel(String),

    /// Reference image id is empty or malformed
    #[error("Invalid image id: {0}")]
    InvalidImageId(String),

    /// Requested result count is out of range
    #[error("Invalid top_k: {0} (must be a positive integer)")]
    InvalidTopK(i64),

    /// Class mapping is not a dense bijection
    #[error("Invalid class mapping: {0}")]
    InvalidClassMapping(String),

    /// Model output does not match the loaded class mapping
    #[error("Shape mismatch: expected {expected} values, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    /// Validation failed
    #[error("Validation failed: {0}")]
    ValidationError(String),
}

impl DomainError {
    /// Create a shape mismatch error
    pub const fn shape_mismatch(expected: usize, actual: usize) -> Self {
        Self::ShapeMismatch { expected, actual }
    }
}
