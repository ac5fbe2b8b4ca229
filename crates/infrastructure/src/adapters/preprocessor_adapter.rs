//! Image preprocessing adapter

use std::sync::Arc;

use ai_vision::Preprocessor;
use application::{ApplicationError, ports::ImagePreprocessorPort};
use async_trait::async_trait;
use bytes::Bytes;
use domain::value_objects::ImageTensor;

use super::{map_join_error, map_vision_error};

/// Decodes uploads on the blocking pool
#[derive(Debug, Clone)]
pub struct ImagePreprocessorAdapter {
    preprocessor: Arc<Preprocessor>,
}

impl ImagePreprocessorAdapter {
    /// Wrap a configured preprocessor
    pub fn new(preprocessor: Preprocessor) -> Self {
        Self {
            preprocessor: Arc::new(preprocessor),
        }
    }
}

#[async_trait]
impl ImagePreprocessorPort for ImagePreprocessorAdapter {
    async fn prepare(&self, bytes: Bytes) -> Result<ImageTensor, ApplicationError> {
        let preprocessor = Arc::clone(&self.preprocessor);
        tokio::task::spawn_blocking(move || preprocessor.prepare(&bytes))
            .await
            .map_err(|e| map_join_error(&e))?
            .map_err(map_vision_error)
    }
}
