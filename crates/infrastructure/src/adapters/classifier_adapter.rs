//! Classifier adapter over the vision runtime

use std::sync::Arc;

use ai_vision::SpeciesClassifier;
use application::{ApplicationError, ports::ClassifierPort, ports::ModelOutput};
use async_trait::async_trait;
use domain::value_objects::{Embedding, ImageTensor};

use super::{map_join_error, map_vision_error};

/// Runs forward passes on the blocking pool
#[derive(Debug, Clone)]
pub struct VisionClassifierAdapter {
    model: Arc<SpeciesClassifier>,
}

impl VisionClassifierAdapter {
    /// Wrap a loaded model
    pub fn new(model: SpeciesClassifier) -> Self {
        Self {
            model: Arc::new(model),
        }
    }
}

#[async_trait]
impl ClassifierPort for VisionClassifierAdapter {
    async fn infer(&self, image: ImageTensor) -> Result<ModelOutput, ApplicationError> {
        let model = Arc::clone(&self.model);
        let (logits, embedding) = tokio::task::spawn_blocking(move || model.infer(&image))
            .await
            .map_err(|e| map_join_error(&e))?
            .map_err(map_vision_error)?;
        Ok(ModelOutput { logits, embedding })
    }

    async fn embed(&self, image: ImageTensor) -> Result<Embedding, ApplicationError> {
        let model = Arc::clone(&self.model);
        tokio::task::spawn_blocking(move || model.embed(&image))
            .await
            .map_err(|e| map_join_error(&e))?
            .map_err(map_vision_error)
    }

    fn embedding_size(&self) -> usize {
        self.model.embedding_size()
    }

    fn num_classes(&self) -> usize {
        self.model.num_classes()
    }
}
