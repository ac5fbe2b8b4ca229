//! Image decoding and preprocessing port

use async_trait::async_trait;
use bytes::Bytes;
use domain::value_objects::ImageTensor;
#[cfg(test)]
use mockall::automock;

use crate::error::ApplicationError;

/// Port turning untrusted upload bytes into a model input
///
/// Implementations decode to RGB, resize the shorter side and center crop,
/// exactly as validation-time preprocessing did. Undecodable input must be
/// reported as [`ApplicationError::InvalidImage`].
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ImagePreprocessorPort: Send + Sync {
    /// Decode and preprocess an uploaded image
    async fn prepare(&self, bytes: Bytes) -> Result<ImageTensor, ApplicationError>;
}
