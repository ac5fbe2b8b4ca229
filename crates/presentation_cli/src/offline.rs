//! Commands that work on the artifact store directly, without a server

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use ai_vision::{
    Checkpoint, CpuBackend, DistanceMetric, Preprocessor, SpeciesNetConfig, WeightsFile,
    WeightsFormat,
};
use anyhow::Context;
use application::{
    AdmissionGate, ArtifactLifecycle, ArtifactLoaderPort, ImagePreprocessorPort, SpeciesService,
};
use bytes::Bytes;
use domain::entities::{ClassMapping, ClassMappingDocument, PredictionResult};
use infrastructure::{
    AppConfig, ArtifactReport, FsArtifactLoader, ImagePreprocessorAdapter, IndexBuildReport,
    IndexBuilder,
};
use tracing::{debug, info, warn};

/// Load configuration the way the server does, then apply CLI overrides
pub fn load_config(path: Option<&Path>, model_dir: Option<PathBuf>) -> AppConfig {
    let loaded = match path {
        Some(path) => AppConfig::load_from_file(path),
        None => AppConfig::load(),
    };
    let mut config = loaded.unwrap_or_else(|e| {
        warn!("Failed to load config, using defaults: {}", e);
        AppConfig::default()
    });
    if let Some(dir) = model_dir {
        config.artifacts.model_dir = dir;
    }
    debug!(model_dir = %config.artifacts.model_dir.display(), "Using artifact store");
    config
}

/// Summarise the artifact store
pub fn inspect(config: &AppConfig) -> ArtifactReport {
    FsArtifactLoader::new(config.artifacts.clone(), config.inference.device).inspect()
}

/// Run one prediction through the same serving core the server uses
pub async fn predict_file(
    config: &AppConfig,
    image: &Path,
    top_k: Option<i64>,
) -> anyhow::Result<PredictionResult> {
    let bytes = tokio::fs::read(image)
        .await
        .with_context(|| format!("Failed to read {}", image.display()))?;

    let preprocessor = Preprocessor::from_config(&config.inference)?;
    let preprocessor: Arc<dyn ImagePreprocessorPort> =
        Arc::new(ImagePreprocessorAdapter::new(preprocessor));
    let loader: Arc<dyn ArtifactLoaderPort> = Arc::new(FsArtifactLoader::new(
        config.artifacts.clone(),
        config.inference.device,
    ));

    let service = SpeciesService::start(
        ArtifactLifecycle::new(loader),
        preprocessor,
        AdmissionGate::new(1),
    )
    .await;

    Ok(service.predict(Bytes::from(bytes), top_k).await?)
}

/// Embed every image in a directory and write the index files
pub async fn build_index(
    config: &AppConfig,
    image_dir: PathBuf,
    metric: DistanceMetric,
) -> anyhow::Result<IndexBuildReport> {
    let builder = IndexBuilder::new(config.artifacts.clone(), &config.inference, metric)?;
    let report = tokio::task::spawn_blocking(move || builder.build(&image_dir)).await??;
    Ok(report)
}

/// Write a manifest serving a `.pth` file saved by the PyTorch training script
///
/// The class mapping comes from the `class_mapping.json` the script writes
/// next to the weights, falling back to the artifact store's side-car. The
/// script normalises inputs in its data loader and again inside the model,
/// so the manifest records two normalisation passes.
pub fn import_weights(
    config: &AppConfig,
    weights: &Path,
    verify: bool,
) -> anyhow::Result<Checkpoint> {
    let side_car = weights.with_file_name("class_mapping.json");
    let mapping_path = if side_car.is_file() {
        side_car
    } else {
        config.artifacts.class_mapping_path()
    };
    let raw = std::fs::read(&mapping_path)
        .with_context(|| format!("Failed to read {}", mapping_path.display()))?;
    let document: ClassMappingDocument = serde_json::from_slice(&raw)
        .with_context(|| format!("Invalid class mapping {}", mapping_path.display()))?;
    let classes = ClassMapping::try_from(document)?;

    let model_dir = &config.artifacts.model_dir;
    let file = weights
        .strip_prefix(model_dir)
        .unwrap_or(weights)
        .display()
        .to_string();

    let architecture = SpeciesNetConfig::resnet50(classes.len()).with_input_normalizations(2);
    let mut checkpoint = Checkpoint::new(
        architecture,
        &classes,
        WeightsFile {
            file,
            format: WeightsFormat::Pytorch,
        },
    )?;

    let manifest = config.artifacts.checkpoint_path();
    std::fs::create_dir_all(model_dir)?;
    checkpoint.save(&manifest)?;
    checkpoint = Checkpoint::load(&manifest)?;

    if verify {
        checkpoint
            .load_network::<CpuBackend>(&Default::default())
            .with_context(|| format!("{} does not match ResNet-50", weights.display()))?;
    }
    info!(
        manifest = %manifest.display(),
        classes = classes.len(),
        "PyTorch weights imported"
    );
    Ok(checkpoint)
}
