//! Artifact store layout.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Where trained artifacts live
///
/// All file names are resolved relative to `model_dir`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactConfig {
    /// Directory holding every artifact
    #[serde(default = "default_model_dir")]
    pub model_dir: PathBuf,

    /// Checkpoint with weights and class mapping
    #[serde(default = "default_checkpoint_file")]
    pub checkpoint_file: String,

    /// Side-car class mapping written at training time
    #[serde(default = "default_class_mapping_file")]
    pub class_mapping_file: String,

    /// Serialized vector index
    #[serde(default = "default_index_file")]
    pub index_file: String,

    /// Reference image ids for the index positions
    #[serde(default = "default_embedding_mapping_file")]
    pub embedding_mapping_file: String,
}

fn default_model_dir() -> PathBuf {
    PathBuf::from("models")
}

fn default_checkpoint_file() -> String {
    "species_classifier.json".to_string()
}

fn default_class_mapping_file() -> String {
    "class_mapping.json".to_string()
}

fn default_index_file() -> String {
    "embeddings.index".to_string()
}

fn default_embedding_mapping_file() -> String {
    "embedding_mapping.json".to_string()
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            model_dir: default_model_dir(),
            checkpoint_file: default_checkpoint_file(),
            class_mapping_file: default_class_mapping_file(),
            index_file: default_index_file(),
            embedding_mapping_file: default_embedding_mapping_file(),
        }
    }
}

impl ArtifactConfig {
    /// Default layout rooted at another directory
    pub fn in_dir(model_dir: impl AsRef<Path>) -> Self {
        Self {
            model_dir: model_dir.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    /// Path of the checkpoint
    pub fn checkpoint_path(&self) -> PathBuf {
        self.model_dir.join(&self.checkpoint_file)
    }

    /// Path of the side-car class mapping
    pub fn class_mapping_path(&self) -> PathBuf {
        self.model_dir.join(&self.class_mapping_file)
    }

    /// Path of the vector index
    pub fn index_path(&self) -> PathBuf {
        self.model_dir.join(&self.index_file)
    }

    /// Path of the id list
    pub fn embedding_mapping_path(&self) -> PathBuf {
        self.model_dir.join(&self.embedding_mapping_file)
    }
}
