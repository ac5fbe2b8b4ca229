//! Vision runtime errors

use thiserror::Error;

/// Errors that can occur in the model runtime or the vector index
#[derive(Debug, Error)]
pub enum VisionError {
    /// Bytes are not a decodable image
    #[error("Image decode failed: {0}")]
    Decode(String),

    /// Preprocessing parameters are inconsistent
    #[error("Invalid preprocessing: {0}")]
    Preprocess(String),

    /// Checkpoint is malformed or inconsistent
    #[error("Invalid checkpoint: {0}")]
    Checkpoint(String),

    /// Weights could not be read into the network or a tensor op failed
    #[error("Model runtime error: {0}")]
    Runtime(String),

    /// Tensor has the wrong shape for the model
    #[error("Shape mismatch: expected {expected}, got {actual}")]
    Shape { expected: String, actual: String },

    /// Forward pass produced NaN or infinity
    #[error("Non-finite values in {0}")]
    NonFinite(&'static str),

    /// Index file or query is invalid
    #[error("Index error: {0}")]
    Index(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl VisionError {
    /// Create a shape error from anything displayable
    pub fn shape(expected: impl ToString, actual: impl ToString) -> Self {
        Self::Shape {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    /// Whether the error was caused by the input image rather than the runtime
    pub const fn is_input_error(&self) -> bool {
        matches!(self, Self::Decode(_))
    }
}

impl From<burn::record::RecorderError> for VisionError {
    fn from(err: burn::record::RecorderError) -> Self {
        Self::Runtime(format!("{err:?}"))
    }
}

impl From<image::ImageError> for VisionError {
    fn from(err: image::ImageError) -> Self {
        Self::Decode(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_error_message() {
        let err = VisionError::shape("3x224x224", "3x10x10");
        assert_eq!(err.to_string(), "Shape mismatch: expected 3x224x224, got 3x10x10");
    }

    #[test]
    fn only_decode_is_input_error() {
        assert!(VisionError::Decode("bad".into()).is_input_error());
        assert!(!VisionError::NonFinite("logits").is_input_error());
    }
}
