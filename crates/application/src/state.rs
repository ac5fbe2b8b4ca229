//! Process-wide serving state
//!
//! A [`ServingState`] is built once by the lifecycle and then only read. It is
//! published as a whole, so a reader sees either the old or the new model,
//! class mapping and index together, never a mix.

use std::{fmt, sync::Arc};

use chrono::{DateTime, Utc};
use domain::{
    entities::ClassMapping,
    value_objects::{ComputeDevice, ImageId},
};
use serde::Serialize;

use crate::{
    error::ApplicationError,
    ports::{ClassifierPort, SimilarityIndexPort},
};

/// A checkpoint loaded onto a compute device
#[derive(Clone)]
pub struct LoadedModel {
    pub classifier: Arc<dyn ClassifierPort>,
    pub classes: Arc<ClassMapping>,
    pub embedding_size: usize,
    /// Where the checkpoint came from (for status and logs)
    pub source: String,
}

impl fmt::Debug for LoadedModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedModel")
            .field("num_classes", &self.classes.len())
            .field("embedding_size", &self.embedding_size)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

/// A vector index with the reference ids for its positions
#[derive(Clone)]
pub struct LoadedIndex {
    pub index: Arc<dyn SimilarityIndexPort>,
    pub image_ids: Arc<Vec<ImageId>>,
}

impl fmt::Debug for LoadedIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedIndex")
            .field("vectors", &self.index.vector_count())
            .field("image_ids", &self.image_ids.len())
            .finish_non_exhaustive()
    }
}

/// Model lifecycle state
#[derive(Debug, Clone)]
pub enum ModelState {
    /// No checkpoint was found or it failed to load
    Unloaded,
    /// Checkpoint loaded and ready for inference
    Loaded(LoadedModel),
}

impl ModelState {
    /// Whether a model is available
    pub const fn is_loaded(&self) -> bool {
        matches!(self, Self::Loaded(_))
    }
}

/// Embedding index lifecycle state
#[derive(Debug, Clone)]
pub enum IndexState {
    /// No index files, or loading failed
    Absent,
    /// Index loaded alongside its id list
    Ready(LoadedIndex),
}

impl IndexState {
    /// Whether an index is available
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }
}

/// Everything a request handler reads
#[derive(Debug, Clone)]
pub struct ServingState {
    device: ComputeDevice,
    model: ModelState,
    index: IndexState,
    loaded_at: Option<DateTime<Utc>>,
}

impl ServingState {
    /// Assemble a state; an index without a model is dropped
    pub fn new(device: ComputeDevice, model: ModelState, index: IndexState) -> Self {
        let index = if model.is_loaded() {
            index
        } else {
            IndexState::Absent
        };
        let loaded_at = model.is_loaded().then(Utc::now);
        Self {
            device,
            model,
            index,
            loaded_at,
        }
    }

    /// A state with nothing loaded
    pub fn unloaded(device: ComputeDevice) -> Self {
        Self::new(device, ModelState::Unloaded, IndexState::Absent)
    }

    /// The compute device chosen at startup
    pub const fn device(&self) -> &ComputeDevice {
        &self.device
    }

    /// Model lifecycle state
    pub const fn model(&self) -> &ModelState {
        &self.model
    }

    /// Index lifecycle state
    pub const fn index(&self) -> &IndexState {
        &self.index
    }

    /// The loaded model, or `ServiceUnavailable`
    pub fn require_model(&self) -> Result<&LoadedModel, ApplicationError> {
        match &self.model {
            ModelState::Loaded(model) => Ok(model),
            ModelState::Unloaded => Err(ApplicationError::ServiceUnavailable(
                "Model not loaded".to_string(),
            )),
        }
    }

    /// The loaded index, or `ServiceUnavailable`
    pub fn require_index(&self) -> Result<&LoadedIndex, ApplicationError> {
        match &self.index {
            IndexState::Ready(index) => Ok(index),
            IndexState::Absent => Err(ApplicationError::ServiceUnavailable(
                "Embedding index not loaded".to_string(),
            )),
        }
    }

    /// Queryable summary for readiness checks
    pub fn status(&self) -> ServingStatus {
        let (num_classes, embedding_size, model_source) = match &self.model {
            ModelState::Loaded(m) => (
                Some(m.classes.len()),
                Some(m.embedding_size),
                Some(m.source.clone()),
            ),
            ModelState::Unloaded => (None, None, None),
        };
        let (index_size, index_metric) = match &self.index {
            IndexState::Ready(i) => (Some(i.index.vector_count()), Some(i.index.metric())),
            IndexState::Absent => (None, None),
        };

        ServingStatus {
            model_loaded: self.model.is_loaded(),
            index_loaded: self.index.is_ready(),
            num_classes,
            embedding_size,
            index_size,
            index_metric,
            model_source,
            device: self.device.to_string(),
            loaded_at: self.loaded_at,
        }
    }
}

/// Serializable snapshot of the serving state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServingStatus {
    pub model_loaded: bool,
    pub index_loaded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_classes: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_metric: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_source: Option<String>,
    pub device: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loaded_at: Option<DateTime<Utc>>,
}
