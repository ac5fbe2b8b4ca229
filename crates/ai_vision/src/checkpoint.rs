//! Trained checkpoint format
//!
//! A checkpoint is a JSON manifest (`species_classifier.json`) naming the
//! network architecture, the class mapping and a weights file stored next
//! to it. Weights are either a burn record written with `CompactRecorder`
//! or the `.pth` file produced by the PyTorch training script, whose
//! `model_state_dict` is remapped onto the burn module tree on load.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use burn::{
    module::Module,
    record::{CompactRecorder, FullPrecisionSettings, Recorder},
    tensor::backend::Backend,
};
use burn_import::pytorch::{LoadArgs, PyTorchFileRecorder};
use domain::entities::ClassMapping;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    error::VisionError,
    network::{SpeciesNet, SpeciesNetConfig},
};

/// Version written by this crate
pub const FORMAT_VERSION: u32 = 2;

/// Extension burn's `CompactRecorder` gives its files
pub const BURN_WEIGHTS_EXTENSION: &str = "mpk";

/// Encoding of the weights file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeightsFormat {
    /// Named MessagePack record written by burn
    Burn,
    /// `torch.save` dictionary with a `model_state_dict` entry
    Pytorch,
}

impl std::fmt::Display for WeightsFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Burn => write!(f, "burn"),
            Self::Pytorch => write!(f, "pytorch"),
        }
    }
}

/// Weights file reference, relative to the manifest directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightsFile {
    pub file: String,
    pub format: WeightsFormat,
}

/// A trained species classifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub format_version: u32,
    pub architecture: SpeciesNetConfig,
    pub class_to_idx: BTreeMap<String, usize>,
    pub num_classes: usize,
    pub embedding_size: usize,
    pub weights: WeightsFile,
    #[serde(skip)]
    base_dir: PathBuf,
}

impl Checkpoint {
    /// Describe a network and the classes its head was trained on
    pub fn new(
        architecture: SpeciesNetConfig,
        classes: &ClassMapping,
        weights: WeightsFile,
    ) -> Result<Self, VisionError> {
        let checkpoint = Self {
            format_version: FORMAT_VERSION,
            embedding_size: architecture.embedding_size(),
            architecture,
            class_to_idx: classes.class_to_index(),
            num_classes: classes.len(),
            weights,
            base_dir: PathBuf::new(),
        };
        checkpoint.validate()?;
        Ok(checkpoint)
    }

    /// Read and validate a manifest; the weights are not touched yet
    pub fn load(path: &Path) -> Result<Self, VisionError> {
        let raw = fs::read(path)?;
        let mut checkpoint: Self = serde_json::from_slice(&raw)?;
        checkpoint.base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        checkpoint.validate()?;
        Ok(checkpoint)
    }

    /// Write the manifest as JSON
    pub fn save(&self, path: &Path) -> Result<(), VisionError> {
        fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }

    /// Save `network` in the burn format next to `manifest_path` and write
    /// the manifest pointing at it
    pub fn save_with_network<B: Backend>(
        manifest_path: &Path,
        classes: &ClassMapping,
        architecture: SpeciesNetConfig,
        network: &SpeciesNet<B>,
    ) -> Result<Self, VisionError> {
        let base_dir = manifest_path.parent().map(Path::to_path_buf).unwrap_or_default();
        let stem = manifest_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("species_classifier");
        let file = format!("{stem}.{BURN_WEIGHTS_EXTENSION}");

        let mut checkpoint = Self::new(
            architecture,
            classes,
            WeightsFile {
                file: file.clone(),
                format: WeightsFormat::Burn,
            },
        )?;
        checkpoint.base_dir = base_dir;

        network
            .clone()
            .save_file(checkpoint.weights_path(), &CompactRecorder::new())?;
        checkpoint.save(manifest_path)?;
        Ok(checkpoint)
    }

    /// Check every cross-field invariant of the manifest
    pub fn validate(&self) -> Result<(), VisionError> {
        if self.format_version != FORMAT_VERSION {
            return Err(VisionError::Checkpoint(format!(
                "unsupported format version {}",
                self.format_version
            )));
        }
        self.architecture.validate()?;

        if self.num_classes != self.class_to_idx.len() {
            return Err(VisionError::Checkpoint(format!(
                "num_classes is {} but class_to_idx has {} entries",
                self.num_classes,
                self.class_to_idx.len()
            )));
        }
        if self.architecture.num_classes != self.num_classes {
            return Err(VisionError::Checkpoint(format!(
                "architecture has {} outputs for {} classes",
                self.architecture.num_classes, self.num_classes
            )));
        }
        if self.embedding_size != self.architecture.embedding_size() {
            return Err(VisionError::Checkpoint(format!(
                "embedding_size is {} but the architecture produces {}",
                self.embedding_size,
                self.architecture.embedding_size()
            )));
        }
        if self.weights.file.is_empty() {
            return Err(VisionError::Checkpoint("weights file is empty".to_string()));
        }
        self.class_mapping().map(|_| ())
    }

    /// The validated class mapping
    pub fn class_mapping(&self) -> Result<ClassMapping, VisionError> {
        ClassMapping::from_pairs(self.class_to_idx.clone())
            .map_err(|e| VisionError::Checkpoint(e.to_string()))
    }

    /// Absolute location of the weights file
    pub fn weights_path(&self) -> PathBuf {
        self.base_dir.join(&self.weights.file)
    }

    /// Build the network and read its weights onto `device`
    pub fn load_network<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Result<SpeciesNet<B>, VisionError> {
        let path = self.weights_path();
        if !path.is_file() {
            return Err(VisionError::Checkpoint(format!(
                "weights file {} not found",
                path.display()
            )));
        }
        debug!(path = %path.display(), format = %self.weights.format, "Reading weights");

        let network = self.architecture.init::<B>(device);
        match self.weights.format {
            WeightsFormat::Burn => Ok(network.load_file(path, &CompactRecorder::new(), device)?),
            WeightsFormat::Pytorch => {
                let record: <SpeciesNet<B> as Module<B>>::Record =
                    PyTorchFileRecorder::<FullPrecisionSettings>::default()
                        .load(torchvision_load_args(path), device)?;
                Ok(network.load_record(record))
            },
        }
    }
}

/// Map the training script's state dict onto [`SpeciesNet`]
///
/// The script wraps torchvision's ResNet children in `backbone`
/// (`0` conv1, `1` bn1, `4..=7` the stages) and keeps the head as `fc`.
fn torchvision_load_args(path: PathBuf) -> LoadArgs {
    LoadArgs::new(path)
        .with_top_level_key("model_state_dict")
        .with_key_remap(r"^backbone\.0\.(.+)$", "conv1.$1")
        .with_key_remap(r"^backbone\.1\.(.+)$", "bn1.$1")
        .with_key_remap(r"^backbone\.4\.(.+)$", "layer1.$1")
        .with_key_remap(r"^backbone\.5\.(.+)$", "layer2.$1")
        .with_key_remap(r"^backbone\.6\.(.+)$", "layer3.$1")
        .with_key_remap(r"^backbone\.7\.(.+)$", "layer4.$1")
        .with_key_remap(r"^(.+)\.downsample\.0\.(.+)$", "$1.downsample.conv.$2")
        .with_key_remap(r"^(.+)\.downsample\.1\.(.+)$", "$1.downsample.bn.$2")
}

#[cfg(test)]
pub(crate) mod tests {
    use burn::tensor::Tensor;

    use super::*;
    use crate::network::tests::{TestBackend, tiny_config};

    pub(crate) fn two_classes() -> ClassMapping {
        ClassMapping::from_pairs([("Panthera_onca", 0), ("Panthera_leo", 1)]).unwrap()
    }

    /// A tiny burn checkpoint written into `dir`
    pub(crate) fn tiny_checkpoint(dir: &Path) -> Checkpoint {
        let config = tiny_config(2);
        let network = config.init::<TestBackend>(&Default::default());
        Checkpoint::save_with_network(
            &dir.join("species_classifier.json"),
            &two_classes(),
            config,
            &network,
        )
        .unwrap()
    }

    #[test]
    fn manifest_round_trips_and_resolves_weights() {
        let dir = tempfile::tempdir().unwrap();
        let written = tiny_checkpoint(dir.path());

        let loaded = Checkpoint::load(&dir.path().join("species_classifier.json")).unwrap();
        assert_eq!(loaded.num_classes, 2);
        assert_eq!(loaded.embedding_size, written.architecture.embedding_size());
        assert_eq!(loaded.weights.format, WeightsFormat::Burn);
        assert_eq!(loaded.weights_path(), dir.path().join("species_classifier.mpk"));
        assert!(loaded.weights_path().is_file());
    }

    #[test]
    fn loaded_weights_reproduce_saved_network() {
        let dir = tempfile::tempdir().unwrap();
        let ckpt = tiny_checkpoint(dir.path());
        let device = Default::default();

        let first = ckpt.load_network::<TestBackend>(&device).unwrap();
        let second = Checkpoint::load(&dir.path().join("species_classifier.json"))
            .unwrap()
            .load_network::<TestBackend>(&device)
            .unwrap();

        let input = Tensor::<TestBackend, 4>::full([1, 3, 32, 32], 0.4, &device);
        let (a, _) = first.forward(input.clone());
        let (b, _) = second.forward(input);
        assert_eq!(
            a.into_data().to_vec::<f32>().unwrap(),
            b.into_data().to_vec::<f32>().unwrap()
        );
    }

    #[test]
    fn missing_weights_file_is_checkpoint_error() {
        let dir = tempfile::tempdir().unwrap();
        let ckpt = tiny_checkpoint(dir.path());
        fs::remove_file(ckpt.weights_path()).unwrap();

        let err = ckpt.load_network::<TestBackend>(&Default::default()).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn class_count_mismatch_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut ckpt = tiny_checkpoint(dir.path());
        ckpt.num_classes = 3;
        assert!(ckpt.validate().is_err());
    }

    #[test]
    fn head_width_must_match_classes() {
        let err = Checkpoint::new(
            tiny_config(5),
            &two_classes(),
            WeightsFile {
                file: "w.mpk".into(),
                format: WeightsFormat::Burn,
            },
        )
        .unwrap_err();
        assert!(err.to_string().contains("5 outputs"));
    }

    #[test]
    fn embedding_size_must_match_architecture() {
        let dir = tempfile::tempdir().unwrap();
        let mut ckpt = tiny_checkpoint(dir.path());
        ckpt.embedding_size = 2048;
        assert!(ckpt.validate().unwrap_err().to_string().contains("embedding_size"));
    }

    #[test]
    fn unknown_version_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut ckpt = tiny_checkpoint(dir.path());
        ckpt.format_version = 1;
        assert!(ckpt.validate().is_err());
    }

    #[test]
    fn garbage_file_is_json_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, b"{not json").unwrap();
        assert!(matches!(Checkpoint::load(&path), Err(VisionError::Json(_))));
    }

    #[test]
    fn pytorch_manifest_parses() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("species_classifier.json");
        let manifest = serde_json::json!({
            "format_version": FORMAT_VERSION,
            "architecture": {
                "num_classes": 2,
                "stage_blocks": [3, 4, 6, 3],
                "base_width": 64,
                "input_size": 224,
                "input_normalizations": 2
            },
            "class_to_idx": {"Panthera_leo": 1, "Panthera_onca": 0},
            "num_classes": 2,
            "embedding_size": 2048,
            "weights": {"file": "species_classifier.pth", "format": "pytorch"}
        });
        fs::write(&path, serde_json::to_vec(&manifest).unwrap()).unwrap();

        let ckpt = Checkpoint::load(&path).unwrap();
        assert_eq!(ckpt.weights.format, WeightsFormat::Pytorch);
        assert_eq!(ckpt.architecture.input_normalizations, 2);
        assert_eq!(ckpt.weights_path(), dir.path().join("species_classifier.pth"));
    }
}
