//! Artifact lifecycle - startup initialisation and reload
//!
//! Initialisation never fails: any error while loading the model or the
//! index is logged and leaves that component Unloaded/Absent.

use std::{fmt, sync::Arc, time::Instant};

use tracing::{error, info, instrument, warn};

use crate::{
    ports::ArtifactLoaderPort,
    state::{IndexState, LoadedModel, ModelState, ServingState},
};

/// Result of re-running the initialisation sequence
#[derive(Debug, Clone)]
pub enum ReloadOutcome {
    /// The new state should be published
    Replaced(ServingState),
    /// The reload would have lost a loaded model; keep the current state
    KeptPrevious,
}

/// Builds [`ServingState`] values from the artifact store
pub struct ArtifactLifecycle {
    loader: Arc<dyn ArtifactLoaderPort>,
}

impl fmt::Debug for ArtifactLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArtifactLifecycle").finish_non_exhaustive()
    }
}

impl ArtifactLifecycle {
    /// Create a lifecycle over an artifact loader
    pub fn new(loader: Arc<dyn ArtifactLoaderPort>) -> Self {
        Self { loader }
    }

    /// Resolve the device, load the model, then try the index
    #[instrument(skip(self))]
    pub async fn initialize(&self) -> ServingState {
        let start = Instant::now();
        let device = self.loader.resolve_device();
        info!(device = %device, "Compute device selected");

        let model = match self.loader.load_model(&device).await {
            Ok(Some(model)) => {
                info!(
                    classes = model.classes.len(),
                    embedding_size = model.embedding_size,
                    source = %model.source,
                    "Model loaded"
                );
                ModelState::Loaded(model)
            },
            Ok(None) => {
                warn!("Model checkpoint not found, serving without a model");
                ModelState::Unloaded
            },
            Err(e) => {
                error!(error = %e, "Failed to load model, serving without a model");
                ModelState::Unloaded
            },
        };

        let index = match &model {
            ModelState::Loaded(m) => self.load_index(m).await,
            ModelState::Unloaded => IndexState::Absent,
        };

        let state = ServingState::new(device, model, index);
        info!(
            model_loaded = state.model().is_loaded(),
            index_loaded = state.index().is_ready(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Serving state initialised"
        );
        state
    }

    async fn load_index(&self, model: &LoadedModel) -> IndexState {
        match self.loader.load_index(model).await {
            Ok(Some(loaded)) => {
                let dimension = loaded.index.dimension();
                if dimension != model.embedding_size {
                    warn!(
                        index_dimension = dimension,
                        embedding_size = model.embedding_size,
                        "Embedding index dimension does not match the model, index not loaded"
                    );
                    return IndexState::Absent;
                }

                let vectors = loaded.index.vector_count();
                if vectors != loaded.image_ids.len() {
                    warn!(
                        vectors,
                        image_ids = loaded.image_ids.len(),
                        "Embedding index and id list differ in length"
                    );
                }

                info!(vectors, metric = %loaded.index.metric(), "Embedding index loaded");
                IndexState::Ready(loaded)
            },
            Ok(None) => {
                info!("No embedding index found, similarity search disabled");
                IndexState::Absent
            },
            Err(e) => {
                warn!(error = %e, "Failed to load embedding index, similarity search disabled");
                IndexState::Absent
            },
        }
    }

    /// Re-run initialisation for a live process
    ///
    /// A reload that loses a model the current state has is refused.
    #[instrument(skip(self, current))]
    pub async fn reload(&self, current: &ServingState) -> ReloadOutcome {
        let next = self.initialize().await;
        if current.model().is_loaded() && !next.model().is_loaded() {
            warn!("Reload could not load a model, keeping the previous artifacts");
            return ReloadOutcome::KeptPrevious;
        }
        ReloadOutcome::Replaced(next)
    }
}
