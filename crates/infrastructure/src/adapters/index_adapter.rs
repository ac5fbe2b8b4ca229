//! Vector index adapter

use std::sync::Arc;

use ai_vision::FlatIndex;
use application::{
    ApplicationError,
    ports::{IndexHit, SimilarityIndexPort},
};
use async_trait::async_trait;
use domain::value_objects::Embedding;

use super::{map_join_error, map_vision_error};

/// Exhaustive search on the blocking pool
#[derive(Debug, Clone)]
pub struct FlatIndexAdapter {
    index: Arc<FlatIndex>,
}

impl FlatIndexAdapter {
    /// Wrap a loaded index
    pub fn new(index: FlatIndex) -> Self {
        Self {
            index: Arc::new(index),
        }
    }
}

#[async_trait]
impl SimilarityIndexPort for FlatIndexAdapter {
    async fn search(&self, query: Embedding, k: usize) -> Result<Vec<IndexHit>, ApplicationError> {
        let index = Arc::clone(&self.index);
        let neighbours = tokio::task::spawn_blocking(move || index.search(query.as_slice(), k))
            .await
            .map_err(|e| map_join_error(&e))?
            .map_err(map_vision_error)?;

        Ok(neighbours
            .into_iter()
            .map(|n| IndexHit {
                position: i64::try_from(n.position).unwrap_or(-1),
                distance: n.distance,
            })
            .collect())
    }

    fn vector_count(&self) -> usize {
        self.index.len()
    }

    fn dimension(&self) -> usize {
        self.index.dimension()
    }

    fn metric(&self) -> String {
        self.index.metric().to_string()
    }
}
