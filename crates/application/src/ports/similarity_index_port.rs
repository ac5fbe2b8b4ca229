//! Vector index port

use async_trait::async_trait;
use domain::value_objects::Embedding;
#[cfg(test)]
use mockall::automock;

use crate::error::ApplicationError;

/// A raw search hit as returned by the index
///
/// `position` is signed because index formats report missing neighbours with
/// negative sentinels; callers must bounds-check it against the id list.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexHit {
    pub position: i64,
    pub distance: f32,
}

/// Port for nearest-neighbour search over reference embeddings
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SimilarityIndexPort: Send + Sync {
    /// Find the `k` nearest vectors, ascending by distance
    async fn search(&self, query: Embedding, k: usize) -> Result<Vec<IndexHit>, ApplicationError>;

    /// Number of stored vectors
    fn vector_count(&self) -> usize;

    /// Dimension of every stored vector
    fn dimension(&self) -> usize;

    /// Name of the distance metric the index was built with
    fn metric(&self) -> String;
}
