//! Filesystem artifact loader
//!
//! Reads the checkpoint, the side-car class mapping, the vector index and its
//! id list from `artifacts.model_dir`. A missing checkpoint or missing index
//! files are reported as `Ok(None)`; unreadable or inconsistent files are
//! errors that the lifecycle logs.

use std::{fs, path::Path, sync::Arc};

use ai_vision::{
    Checkpoint, DevicePreference, EmbeddingMapping, FlatIndex, SpeciesClassifier, resolve_device,
};
use application::{
    ApplicationError,
    ports::ArtifactLoaderPort,
    state::{LoadedIndex, LoadedModel},
};
use async_trait::async_trait;
use domain::{
    entities::{ClassMapping, ClassMappingDocument},
    value_objects::{ComputeDevice, ImageId},
};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::{classifier_adapter::VisionClassifierAdapter, index_adapter::FlatIndexAdapter};
use crate::config::ArtifactConfig;

/// Loads artifacts from a directory
#[derive(Debug, Clone)]
pub struct FsArtifactLoader {
    artifacts: ArtifactConfig,
    device_preference: DevicePreference,
}

impl FsArtifactLoader {
    /// Create a loader for an artifact layout
    pub const fn new(artifacts: ArtifactConfig, device_preference: DevicePreference) -> Self {
        Self {
            artifacts,
            device_preference,
        }
    }

    /// The artifact layout
    pub const fn artifacts(&self) -> &ArtifactConfig {
        &self.artifacts
    }

    /// Summarise what is on disk without building a serving state
    pub fn inspect(&self) -> ArtifactReport {
        inspect_artifacts(&self.artifacts)
    }
}

#[async_trait]
impl ArtifactLoaderPort for FsArtifactLoader {
    fn resolve_device(&self) -> ComputeDevice {
        resolve_device(self.device_preference)
    }

    async fn load_model(
        &self,
        device: &ComputeDevice,
    ) -> Result<Option<LoadedModel>, ApplicationError> {
        let artifacts = self.artifacts.clone();
        let device = device.clone();
        tokio::task::spawn_blocking(move || load_model(&artifacts, device))
            .await
            .map_err(|e| ApplicationError::Internal(format!("model loading task failed: {e}")))?
    }

    async fn load_index(
        &self,
        _model: &LoadedModel,
    ) -> Result<Option<LoadedIndex>, ApplicationError> {
        let artifacts = self.artifacts.clone();
        tokio::task::spawn_blocking(move || load_index(&artifacts))
            .await
            .map_err(|e| ApplicationError::Internal(format!("index loading task failed: {e}")))?
    }
}

fn config_error(path: &Path, err: impl std::fmt::Display) -> ApplicationError {
    ApplicationError::Configuration(format!("{}: {err}", path.display()))
}

fn load_model(
    artifacts: &ArtifactConfig,
    device: ComputeDevice,
) -> Result<Option<LoadedModel>, ApplicationError> {
    let path = artifacts.checkpoint_path();
    if !path.is_file() {
        debug!(path = %path.display(), "No checkpoint file");
        return Ok(None);
    }

    let checkpoint = Checkpoint::load(&path).map_err(|e| config_error(&path, e))?;
    let classes = checkpoint
        .class_mapping()
        .map_err(|e| config_error(&path, e))?;
    check_side_car(artifacts, &classes);

    let embedding_size = checkpoint.embedding_size;
    let model = SpeciesClassifier::from_checkpoint(&checkpoint, device)
        .map_err(|e| config_error(&path, e))?;

    Ok(Some(LoadedModel {
        classifier: Arc::new(VisionClassifierAdapter::new(model)),
        classes: Arc::new(classes),
        embedding_size,
        source: path.display().to_string(),
    }))
}

/// Compare the side-car mapping with the checkpoint; the checkpoint wins
fn check_side_car(artifacts: &ArtifactConfig, classes: &ClassMapping) -> Option<bool> {
    let path = artifacts.class_mapping_path();
    if !path.is_file() {
        debug!(path = %path.display(), "No side-car class mapping");
        return None;
    }

    let side_car = fs::read(&path)
        .map_err(|e| e.to_string())
        .and_then(|raw| {
            serde_json::from_slice::<ClassMappingDocument>(&raw).map_err(|e| e.to_string())
        })
        .and_then(|doc| ClassMapping::try_from(doc).map_err(|e| e.to_string()));

    match side_car {
        Ok(side_car) if &side_car == classes => Some(true),
        Ok(_) => {
            warn!(
                path = %path.display(),
                "Side-car class mapping differs from the checkpoint, using the checkpoint"
            );
            Some(false)
        },
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Side-car class mapping is unreadable");
            Some(false)
        },
    }
}

fn load_index(artifacts: &ArtifactConfig) -> Result<Option<LoadedIndex>, ApplicationError> {
    let index_path = artifacts.index_path();
    let ids_path = artifacts.embedding_mapping_path();

    match (index_path.is_file(), ids_path.is_file()) {
        (false, false) => return Ok(None),
        (true, false) | (false, true) => {
            warn!(
                index = %index_path.display(),
                image_ids = %ids_path.display(),
                "Only one of the index files exists, similarity search disabled"
            );
            return Ok(None);
        },
        (true, true) => {},
    }

    let index = FlatIndex::load(&index_path).map_err(|e| config_error(&index_path, e))?;
    let mapping = EmbeddingMapping::load(&ids_path).map_err(|e| config_error(&ids_path, e))?;
    let image_ids = mapping
        .image_ids
        .into_iter()
        .map(ImageId::new)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| config_error(&ids_path, e))?;

    info!(
        vectors = index.len(),
        dimension = index.dimension(),
        image_ids = image_ids.len(),
        "Read embedding index"
    );

    Ok(Some(LoadedIndex {
        index: Arc::new(FlatIndexAdapter::new(index)),
        image_ids: Arc::new(image_ids),
    }))
}

/// Checkpoint facts for operators
#[derive(Debug, Clone, Serialize)]
pub struct CheckpointSummary {
    pub path: String,
    pub num_classes: usize,
    pub embedding_size: usize,
    pub input_size: usize,
    pub stage_blocks: Vec<usize>,
    pub base_width: usize,
    pub weights: String,
    pub weights_format: String,
    /// Whether the weights file exists next to the manifest
    pub weights_present: bool,
    pub species: Vec<String>,
}

/// Index facts for operators
#[derive(Debug, Clone, Serialize)]
pub struct IndexSummary {
    pub path: String,
    pub vectors: usize,
    pub dimension: usize,
    pub metric: String,
    pub image_ids: usize,
}

/// What the artifact store holds and whether it is consistent
#[derive(Debug, Clone, Default, Serialize)]
pub struct ArtifactReport {
    pub model_dir: String,
    pub checkpoint: Option<CheckpointSummary>,
    pub checkpoint_error: Option<String>,
    /// `None` when there is no side-car file
    pub class_mapping_consistent: Option<bool>,
    pub index: Option<IndexSummary>,
    pub index_error: Option<String>,
}

impl ArtifactReport {
    /// Whether the server would load a model and, if present, the index
    pub fn is_servable(&self) -> bool {
        let Some(checkpoint) = &self.checkpoint else {
            return false;
        };
        if !checkpoint.weights_present {
            return false;
        }
        match &self.index {
            Some(index) => index.dimension == checkpoint.embedding_size,
            None => self.index_error.is_none(),
        }
    }
}

fn inspect_artifacts(artifacts: &ArtifactConfig) -> ArtifactReport {
    let mut report = ArtifactReport {
        model_dir: artifacts.model_dir.display().to_string(),
        ..ArtifactReport::default()
    };

    let checkpoint_path = artifacts.checkpoint_path();
    if checkpoint_path.is_file() {
        match Checkpoint::load(&checkpoint_path).and_then(|c| {
            let classes = c.class_mapping()?;
            Ok((c, classes))
        }) {
            Ok((checkpoint, classes)) => {
                report.class_mapping_consistent = check_side_car(artifacts, &classes);
                report.checkpoint = Some(CheckpointSummary {
                    path: checkpoint_path.display().to_string(),
                    num_classes: checkpoint.num_classes,
                    embedding_size: checkpoint.embedding_size,
                    input_size: checkpoint.architecture.input_size,
                    stage_blocks: checkpoint.architecture.stage_blocks.clone(),
                    base_width: checkpoint.architecture.base_width,
                    weights: checkpoint.weights_path().display().to_string(),
                    weights_format: checkpoint.weights.format.to_string(),
                    weights_present: checkpoint.weights_path().is_file(),
                    species: classes.display_names_sorted(),
                });
            },
            Err(e) => report.checkpoint_error = Some(e.to_string()),
        }
    } else {
        report.checkpoint_error = Some(format!("{} not found", checkpoint_path.display()));
    }

    match load_index(artifacts) {
        Ok(Some(loaded)) => {
            report.index = Some(IndexSummary {
                path: artifacts.index_path().display().to_string(),
                vectors: loaded.index.vector_count(),
                dimension: loaded.index.dimension(),
                metric: loaded.index.metric(),
                image_ids: loaded.image_ids.len(),
            });
        },
        Ok(None) => {},
        Err(e) => report.index_error = Some(e.to_string()),
    }

    report
}
