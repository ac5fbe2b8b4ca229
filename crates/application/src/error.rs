//! Application-level errors

use domain::DomainError;
use thiserror::Error;

/// Errors that can occur in the application layer
///
/// Every request-facing failure maps to exactly one of these kinds so the
/// transport can answer with a typed response.
#[derive(Debug, Error)]
pub enum ApplicationError {
    /// Model or index is not loaded
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Upload could not be decoded as an image
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    /// Request parameter out of range
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Forward pass or index search failed
    #[error("Inference failure: {0}")]
    InferenceFailure(String),

    /// Configuration or artifact error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApplicationError {
    /// Whether the caller can fix the request and retry
    pub const fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidImage(_) | Self::InvalidParameter(_))
    }
}

impl From<DomainError> for ApplicationError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::InvalidTopK(_)
            | DomainError::InvalidLabel(_)
            | DomainError::InvalidImageId(_)
            | DomainError::ValidationError(_) => Self::InvalidParameter(err.to_string()),
            DomainError::ShapeMismatch { .. } => Self::InferenceFailure(err.to_string()),
            DomainError::InvalidClassMapping(_) => Self::Configuration(err.to_string()),
        }
    }
}
