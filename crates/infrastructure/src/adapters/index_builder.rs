//! Offline construction of the reference embedding index
//!
//! Embeds every decodable image in a directory with the current checkpoint
//! and writes the index plus id list the server loads at startup. Image ids
//! are file stems; files are visited in path order so rebuilding from the
//! same directory yields the same positions.

use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
};

use ai_vision::{
    Checkpoint, DevicePreference, DistanceMetric, EmbeddingMapping, FlatIndex, InferenceConfig,
    Preprocessor, SpeciesClassifier, VisionError, resolve_device,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::ArtifactConfig;

/// Outcome of an index build
#[derive(Debug, Clone, Serialize)]
pub struct IndexBuildReport {
    pub indexed: usize,
    pub dimension: usize,
    pub metric: String,
    /// `(file, reason)` for every file that was not indexed
    pub skipped: Vec<(String, String)>,
    pub index_path: PathBuf,
    pub mapping_path: PathBuf,
}

/// Builds `embeddings.index` and `embedding_mapping.json`
#[derive(Debug, Clone)]
pub struct IndexBuilder {
    artifacts: ArtifactConfig,
    preprocessor: Preprocessor,
    metric: DistanceMetric,
}

impl IndexBuilder {
    /// Create a builder using the serving preprocessing settings
    pub fn new(
        artifacts: ArtifactConfig,
        inference: &InferenceConfig,
        metric: DistanceMetric,
    ) -> Result<Self, VisionError> {
        Ok(Self {
            artifacts,
            preprocessor: Preprocessor::from_config(inference)?,
            metric,
        })
    }

    /// Embed every image in `image_dir` and write the index files
    pub fn build(&self, image_dir: &Path) -> Result<IndexBuildReport, VisionError> {
        let checkpoint = Checkpoint::load(&self.artifacts.checkpoint_path())?;
        let model =
            SpeciesClassifier::from_checkpoint(&checkpoint, resolve_device(DevicePreference::Cpu))?;

        let mut files: Vec<PathBuf> = fs::read_dir(image_dir)?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .collect();
        files.sort();

        let mut index = FlatIndex::new(model.embedding_size(), self.metric)?;
        let mut image_ids = Vec::with_capacity(files.len());
        let mut seen = HashSet::new();
        let mut skipped = Vec::new();

        for path in files {
            let name = path.display().to_string();
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string)
            else {
                skipped.push((name, "file name is not valid UTF-8".to_string()));
                continue;
            };
            if stem.is_empty() || !seen.insert(stem.clone()) {
                skipped.push((name, format!("duplicate or empty id '{stem}'")));
                continue;
            }

            let bytes = fs::read(&path)?;
            let tensor = match self.preprocessor.prepare(&bytes) {
                Ok(tensor) => tensor,
                Err(e) if e.is_input_error() => {
                    debug!(file = %name, error = %e, "Skipping undecodable file");
                    skipped.push((name, e.to_string()));
                    continue;
                },
                Err(e) => return Err(e),
            };

            let embedding = model.embed(&tensor)?;
            index.add(embedding.as_slice())?;
            image_ids.push(stem);
        }

        let index_path = self.artifacts.index_path();
        let mapping_path = self.artifacts.embedding_mapping_path();
        index.save(&index_path)?;
        EmbeddingMapping { image_ids }.save(&mapping_path)?;

        if !skipped.is_empty() {
            warn!(skipped = skipped.len(), "Some files were not indexed");
        }
        info!(
            indexed = index.len(),
            dimension = index.dimension(),
            metric = %self.metric,
            path = %index_path.display(),
            "Embedding index written"
        );

        Ok(IndexBuildReport {
            indexed: index.len(),
            dimension: index.dimension(),
            metric: self.metric.to_string(),
            skipped,
            index_path,
            mapping_path,
        })
    }
}
