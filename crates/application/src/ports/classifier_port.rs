//! Model runtime port
//!
//! Defines the forward pass of the backbone plus classification head.

use async_trait::async_trait;
use domain::value_objects::{Embedding, ImageTensor};
#[cfg(test)]
use mockall::automock;

use crate::error::ApplicationError;

/// Output of a full forward pass
#[derive(Debug, Clone, PartialEq)]
pub struct ModelOutput {
    /// One raw score per class, in class index order
    pub logits: Vec<f32>,
    /// Penultimate-layer features
    pub embedding: Embedding,
}

/// Port for running the trained classifier
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClassifierPort: Send + Sync {
    /// Run backbone and head, returning logits and the embedding
    async fn infer(&self, image: ImageTensor) -> Result<ModelOutput, ApplicationError>;

    /// Run the backbone only
    async fn embed(&self, image: ImageTensor) -> Result<Embedding, ApplicationError>;

    /// Length of every embedding this model produces
    fn embedding_size(&self) -> usize;

    /// Number of logits the head produces
    fn num_classes(&self) -> usize;
}
