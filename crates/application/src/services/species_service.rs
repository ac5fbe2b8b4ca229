//! Species service - prediction, embedding, similarity and catalog
//!
//! Every operation reads the published [`ServingState`] once, checks that the
//! components it needs are loaded, validates parameters and only then decodes
//! the image and touches the model runtime.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Instant,
};

use arc_swap::ArcSwap;
use bytes::Bytes;
use domain::{
    entities::{PredictionResult, SimilarMatch, SimilarityResult},
    value_objects::{Embedding, TopK},
};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::{
    error::ApplicationError,
    ports::{ImagePreprocessorPort, ModelOutput},
    services::{
        admission::{AdmissionGate, AdmissionPermit},
        lifecycle::{ArtifactLifecycle, ReloadOutcome},
    },
    state::{LoadedModel, ServingState, ServingStatus},
};

/// Counters kept by the serving core
#[derive(Debug, Default)]
struct Counters {
    inferences: AtomicU64,
    inference_latency_ms: AtomicU64,
    index_inconsistencies: AtomicU64,
    unavailable: AtomicU64,
}

/// Snapshot of the serving core counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ServiceStats {
    pub inferences_total: u64,
    pub inference_latency_ms_total: u64,
    pub index_inconsistencies_total: u64,
    pub unavailable_total: u64,
    pub in_flight_inferences: usize,
    pub max_concurrent_inferences: usize,
}

/// The serving core
pub struct SpeciesService {
    state: ArcSwap<ServingState>,
    lifecycle: ArtifactLifecycle,
    preprocessor: Arc<dyn ImagePreprocessorPort>,
    gate: AdmissionGate,
    default_top_k: TopK,
    counters: Counters,
}

impl fmt::Debug for SpeciesService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpeciesService")
            .field("gate", &self.gate)
            .field("default_top_k", &self.default_top_k)
            .finish_non_exhaustive()
    }
}

impl SpeciesService {
    /// Create a service around an already built state
    pub fn new(
        state: ServingState,
        lifecycle: ArtifactLifecycle,
        preprocessor: Arc<dyn ImagePreprocessorPort>,
        gate: AdmissionGate,
    ) -> Self {
        Self {
            state: ArcSwap::from_pointee(state),
            lifecycle,
            preprocessor,
            gate,
            default_top_k: TopK::default(),
            counters: Counters::default(),
        }
    }

    /// Run the startup initialisation and create the service
    pub async fn start(
        lifecycle: ArtifactLifecycle,
        preprocessor: Arc<dyn ImagePreprocessorPort>,
        gate: AdmissionGate,
    ) -> Self {
        let state = lifecycle.initialize().await;
        Self::new(state, lifecycle, preprocessor, gate)
    }

    /// Use a different count when the client does not send `top_k`
    #[must_use]
    pub const fn with_default_top_k(mut self, top_k: TopK) -> Self {
        self.default_top_k = top_k;
        self
    }

    /// Rank the most probable species for an image
    #[instrument(skip(self, image), fields(image_len = image.len()))]
    pub async fn predict(
        &self,
        image: Bytes,
        top_k: Option<i64>,
    ) -> Result<PredictionResult, ApplicationError> {
        let state = self.state.load_full();
        let model = self.require_model(&state)?;
        let top_k = self.resolve_top_k(top_k)?;

        let permit = self.gate.admit().await?;
        let output = self.forward(&permit, model, image).await?;
        drop(permit);
        let result = PredictionResult::from_logits(&output.logits, &model.classes, top_k)
            .map_err(|e| ApplicationError::InferenceFailure(e.to_string()))?;

        debug!(
            top_k = top_k.get(),
            returned = result.len(),
            top = ?result.top_match().map(|p| p.label.as_str()),
            "Prediction ranked"
        );
        Ok(result)
    }

    /// Extract the backbone embedding for an image
    #[instrument(skip(self, image), fields(image_len = image.len()))]
    pub async fn embed(&self, image: Bytes) -> Result<Embedding, ApplicationError> {
        let state = self.state.load_full();
        let model = self.require_model(&state)?;
        let permit = self.gate.admit().await?;
        self.extract_embedding(&permit, model, image).await
    }

    /// Find reference images closest to an image
    #[instrument(skip(self, image), fields(image_len = image.len()))]
    pub async fn find_similar(
        &self,
        image: Bytes,
        top_k: Option<i64>,
    ) -> Result<SimilarityResult, ApplicationError> {
        let state = self.state.load_full();
        let model = self.require_model(&state)?;
        let loaded = state.require_index().inspect_err(|_| {
            self.counters.unavailable.fetch_add(1, Ordering::Relaxed);
        })?;
        let top_k = self.resolve_top_k(top_k)?;

        // one permit covers the forward pass and the index scan
        let permit = self.gate.admit().await?;
        let embedding = self.extract_embedding(&permit, model, image).await?;
        let k = top_k.clamp_to(loaded.index.vector_count());
        if k == 0 {
            return Ok(SimilarityResult::default());
        }

        let hits = loaded.index.search(embedding, k).await?;
        drop(permit);
        let mut matches = Vec::with_capacity(hits.len());
        for hit in hits {
            let id = usize::try_from(hit.position)
                .ok()
                .and_then(|pos| loaded.image_ids.get(pos));
            match id {
                Some(id) => matches.push(SimilarMatch::new(id.clone(), hit.distance)),
                None => {
                    self.counters
                        .index_inconsistencies
                        .fetch_add(1, Ordering::Relaxed);
                    warn!(
                        position = hit.position,
                        image_ids = loaded.image_ids.len(),
                        "Index returned a position without an image id, skipping"
                    );
                },
            }
        }

        debug!(requested = k, returned = matches.len(), "Similarity search done");
        Ok(SimilarityResult::new(matches))
    }

    /// Sorted display names of every species the model knows
    pub fn list_species(&self) -> Result<Vec<String>, ApplicationError> {
        let state = self.state.load();
        let model = self.require_model(&state)?;
        Ok(model.classes.display_names_sorted())
    }

    /// Current serving status
    pub fn status(&self) -> ServingStatus {
        self.state.load().status()
    }

    /// Whether a model is loaded
    pub fn is_ready(&self) -> bool {
        self.state.load().model().is_loaded()
    }

    /// Fail fast when prediction and embedding cannot be served
    ///
    /// Lets a transport refuse a request before reading its body.
    pub fn ensure_model_loaded(&self) -> Result<(), ApplicationError> {
        let state = self.state.load();
        self.require_model(&state).map(|_| ())
    }

    /// Fail fast when similarity search cannot be served
    pub fn ensure_similarity_ready(&self) -> Result<(), ApplicationError> {
        let state = self.state.load();
        self.require_model(&state)?;
        state.require_index().map(|_| ()).inspect_err(|_| {
            self.counters.unavailable.fetch_add(1, Ordering::Relaxed);
        })
    }

    /// Atomically replace the serving state
    pub fn publish(&self, state: ServingState) {
        self.state.store(Arc::new(state));
    }

    /// Reload artifacts and publish them unless that would lose the model
    #[instrument(skip(self))]
    pub async fn reload(&self) -> ServingStatus {
        let current = self.state.load_full();
        match self.lifecycle.reload(&current).await {
            ReloadOutcome::Replaced(next) => {
                self.publish(next);
                info!("Artifacts reloaded");
            },
            ReloadOutcome::KeptPrevious => {},
        }
        self.status()
    }

    /// Counter snapshot
    pub fn stats(&self) -> ServiceStats {
        ServiceStats {
            inferences_total: self.counters.inferences.load(Ordering::Relaxed),
            inference_latency_ms_total: self.counters.inference_latency_ms.load(Ordering::Relaxed),
            index_inconsistencies_total: self
                .counters
                .index_inconsistencies
                .load(Ordering::Relaxed),
            unavailable_total: self.counters.unavailable.load(Ordering::Relaxed),
            in_flight_inferences: self.gate.in_flight(),
            max_concurrent_inferences: self.gate.capacity(),
        }
    }

    fn require_model<'a>(
        &self,
        state: &'a ServingState,
    ) -> Result<&'a LoadedModel, ApplicationError> {
        state.require_model().inspect_err(|_| {
            self.counters.unavailable.fetch_add(1, Ordering::Relaxed);
        })
    }

    fn resolve_top_k(&self, top_k: Option<i64>) -> Result<TopK, ApplicationError> {
        match top_k {
            Some(value) => Ok(TopK::new(value)?),
            None => Ok(self.default_top_k),
        }
    }

    async fn forward(
        &self,
        _admitted: &AdmissionPermit,
        model: &LoadedModel,
        image: Bytes,
    ) -> Result<ModelOutput, ApplicationError> {
        let tensor = self.preprocessor.prepare(image).await?;

        let start = Instant::now();
        let output = model.classifier.infer(tensor).await?;
        self.record_inference(start);

        if output.logits.len() != model.classes.len() {
            return Err(ApplicationError::InferenceFailure(format!(
                "model produced {} logits for {} classes",
                output.logits.len(),
                model.classes.len()
            )));
        }
        Ok(output)
    }

    async fn extract_embedding(
        &self,
        _admitted: &AdmissionPermit,
        model: &LoadedModel,
        image: Bytes,
    ) -> Result<Embedding, ApplicationError> {
        let tensor = self.preprocessor.prepare(image).await?;

        let start = Instant::now();
        let embedding = model.classifier.embed(tensor).await?;
        self.record_inference(start);

        if embedding.len() != model.embedding_size {
            return Err(ApplicationError::InferenceFailure(format!(
                "model produced an embedding of length {}, expected {}",
                embedding.len(),
                model.embedding_size
            )));
        }
        if !embedding.is_finite() {
            return Err(ApplicationError::InferenceFailure(
                "embedding contains non-finite values".to_string(),
            ));
        }
        Ok(embedding)
    }

    fn record_inference(&self, start: Instant) {
        let latency = start.elapsed().as_millis() as u64;
        self.counters.inferences.fetch_add(1, Ordering::Relaxed);
        self.counters
            .inference_latency_ms
            .fetch_add(latency, Ordering::Relaxed);
        debug!(latency_ms = latency, "Inference complete");
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::atomic::AtomicUsize, time::Duration};

    use async_trait::async_trait;
    use domain::{
        entities::ClassMapping,
        value_objects::{ComputeDevice, ImageId, ImageTensor},
    };
    use tokio::task::JoinSet;

    use super::*;
    use crate::{
        ports::{
            ClassifierPort, IndexHit, MockArtifactLoaderPort, MockClassifierPort,
            MockImagePreprocessorPort, MockSimilarityIndexPort,
        },
        state::{IndexState, LoadedIndex, ModelState},
    };

    fn cpu() -> ComputeDevice {
        ComputeDevice::Cpu { threads: 1 }
    }

    fn tensor() -> ImageTensor {
        ImageTensor::new(1, 1, vec![0.5; 3]).unwrap()
    }

    fn lifecycle() -> ArtifactLifecycle {
        ArtifactLifecycle::new(Arc::new(MockArtifactLoaderPort::new()))
    }

    fn ok_preprocessor() -> MockImagePreprocessorPort {
        let mut pre = MockImagePreprocessorPort::new();
        pre.expect_prepare().returning(|_| Ok(tensor()));
        pre
    }

    fn big_cats_model(classifier: MockClassifierPort) -> LoadedModel {
        LoadedModel {
            classifier: Arc::new(classifier),
            classes: Arc::new(
                ClassMapping::from_pairs([("Panthera_onca", 0), ("Panthera_leo", 1)]).unwrap(),
            ),
            embedding_size: 2,
            source: "test".to_string(),
        }
    }

    fn abc_index(hits: Vec<IndexHit>) -> LoadedIndex {
        let mut index = MockSimilarityIndexPort::new();
        index.expect_vector_count().return_const(3usize);
        index.expect_dimension().return_const(2usize);
        index.expect_metric().returning(|| "squared_l2".to_string());
        index
            .expect_search()
            .returning(move |_, k| Ok(hits.iter().copied().take(k).collect()));
        LoadedIndex {
            index: Arc::new(index),
            image_ids: Arc::new(
                ["a", "b", "c"]
                    .iter()
                    .map(|s| ImageId::new(*s).unwrap())
                    .collect(),
            ),
        }
    }

    fn service(
        model: ModelState,
        index: IndexState,
        pre: MockImagePreprocessorPort,
    ) -> SpeciesService {
        SpeciesService::new(
            ServingState::new(cpu(), model, index),
            lifecycle(),
            Arc::new(pre),
            AdmissionGate::new(2),
        )
    }

    fn unloaded_service() -> SpeciesService {
        let mut pre = MockImagePreprocessorPort::new();
        pre.expect_prepare().never();
        service(ModelState::Unloaded, IndexState::Absent, pre)
    }

    #[test]
    fn service_debug() {
        let debug = format!("{:?}", unloaded_service());
        assert!(debug.contains("SpeciesService"));
    }

    #[tokio::test]
    async fn unloaded_rejects_every_operation_without_runtime_calls() {
        let service = unloaded_service();
        let img = Bytes::from_static(b"jpeg");

        assert!(matches!(
            service.predict(img.clone(), Some(5)).await,
            Err(ApplicationError::ServiceUnavailable(_))
        ));
        assert!(matches!(
            service.embed(img.clone()).await,
            Err(ApplicationError::ServiceUnavailable(_))
        ));
        assert!(matches!(
            service.find_similar(img, Some(5)).await,
            Err(ApplicationError::ServiceUnavailable(_))
        ));
        assert!(matches!(
            service.list_species(),
            Err(ApplicationError::ServiceUnavailable(_))
        ));
        assert_eq!(service.stats().inferences_total, 0);
        assert_eq!(service.stats().unavailable_total, 4);
    }

    #[test]
    fn readiness_checks_follow_published_state() {
        let unloaded = unloaded_service();
        assert!(matches!(
            unloaded.ensure_model_loaded(),
            Err(ApplicationError::ServiceUnavailable(_))
        ));
        assert!(unloaded.ensure_similarity_ready().is_err());
        assert_eq!(unloaded.stats().unavailable_total, 2);

        let without_index = service(
            ModelState::Loaded(big_cats_model(MockClassifierPort::new())),
            IndexState::Absent,
            ok_preprocessor(),
        );
        assert!(without_index.ensure_model_loaded().is_ok());
        assert_eq!(
            without_index.ensure_similarity_ready().unwrap_err().to_string(),
            "Service unavailable: Embedding index not loaded"
        );

        let ready = service(
            ModelState::Loaded(big_cats_model(MockClassifierPort::new())),
            IndexState::Ready(abc_index(Vec::new())),
            ok_preprocessor(),
        );
        assert!(ready.ensure_similarity_ready().is_ok());
    }

    #[tokio::test]
    async fn unloaded_checked_before_top_k() {
        let service = unloaded_service();
        let err = service
            .predict(Bytes::from_static(b"x"), Some(0))
            .await
            .unwrap_err();
        assert!(matches!(err, ApplicationError::ServiceUnavailable(_)));
    }

    #[tokio::test]
    async fn predicts_big_cats() {
        let mut classifier = MockClassifierPort::new();
        classifier.expect_infer().returning(|_| {
            Ok(ModelOutput {
                logits: vec![2.0, 0.5],
                embedding: Embedding::new(vec![0.1, 0.2]),
            })
        });
        let service = service(
            ModelState::Loaded(big_cats_model(classifier)),
            IndexState::Absent,
            ok_preprocessor(),
        );

        let result = service
            .predict(Bytes::from_static(b"img"), Some(2))
            .await
            .unwrap();
        let preds = result.predictions();
        assert_eq!(preds.len(), 2);
        assert_eq!(preds[0].label.display_name(), "Panthera onca");
        assert_eq!(preds[1].label.display_name(), "Panthera leo");
        assert!(preds[0].probability > preds[1].probability);
        assert!(preds[0].probability + preds[1].probability <= 1.0 + 1e-6);
        assert_eq!(service.stats().inferences_total, 1);
    }

    #[tokio::test]
    async fn predict_is_idempotent() {
        let mut classifier = MockClassifierPort::new();
        classifier.expect_infer().times(2).returning(|_| {
            Ok(ModelOutput {
                logits: vec![0.3, 0.9],
                embedding: Embedding::new(vec![0.0, 0.0]),
            })
        });
        let service = service(
            ModelState::Loaded(big_cats_model(classifier)),
            IndexState::Absent,
            ok_preprocessor(),
        );

        let a = service.predict(Bytes::from_static(b"i"), None).await.unwrap();
        let b = service.predict(Bytes::from_static(b"i"), None).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn zero_top_k_is_invalid_without_inference() {
        let mut classifier = MockClassifierPort::new();
        classifier.expect_infer().never();
        let mut pre = MockImagePreprocessorPort::new();
        pre.expect_prepare().never();
        let service = service(
            ModelState::Loaded(big_cats_model(classifier)),
            IndexState::Absent,
            pre,
        );

        let err = service
            .predict(Bytes::from_static(b"img"), Some(0))
            .await
            .unwrap_err();
        assert!(matches!(err, ApplicationError::InvalidParameter(_)));
        assert_eq!(service.stats().inferences_total, 0);
    }

    #[tokio::test]
    async fn invalid_image_never_reaches_model() {
        let mut classifier = MockClassifierPort::new();
        classifier.expect_infer().never();
        let mut pre = MockImagePreprocessorPort::new();
        pre.expect_prepare()
            .returning(|_| Err(ApplicationError::InvalidImage("not an image".into())));
        let service = service(
            ModelState::Loaded(big_cats_model(classifier)),
            IndexState::Absent,
            pre,
        );

        let err = service
            .predict(Bytes::from_static(b"hello"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApplicationError::InvalidImage(_)));
    }

    #[tokio::test]
    async fn wrong_logit_count_is_inference_failure() {
        let mut classifier = MockClassifierPort::new();
        classifier.expect_infer().returning(|_| {
            Ok(ModelOutput {
                logits: vec![1.0],
                embedding: Embedding::new(vec![0.0, 0.0]),
            })
        });
        let service = service(
            ModelState::Loaded(big_cats_model(classifier)),
            IndexState::Absent,
            ok_preprocessor(),
        );

        let err = service
            .predict(Bytes::from_static(b"img"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApplicationError::InferenceFailure(_)));
    }

    #[tokio::test]
    async fn embedding_has_configured_length() {
        let mut classifier = MockClassifierPort::new();
        classifier
            .expect_embed()
            .returning(|_| Ok(Embedding::new(vec![0.25, 0.75])));
        let service = service(
            ModelState::Loaded(big_cats_model(classifier)),
            IndexState::Absent,
            ok_preprocessor(),
        );

        let embedding = service.embed(Bytes::from_static(b"img")).await.unwrap();
        assert_eq!(embedding.len(), 2);
    }

    #[tokio::test]
    async fn similar_requires_index() {
        let mut classifier = MockClassifierPort::new();
        classifier.expect_embed().never();
        let mut pre = MockImagePreprocessorPort::new();
        pre.expect_prepare().never();
        let service = service(
            ModelState::Loaded(big_cats_model(classifier)),
            IndexState::Absent,
            pre,
        );

        let err = service
            .find_similar(Bytes::from_static(b"img"), Some(1))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Service unavailable: Embedding index not loaded");
    }

    #[tokio::test]
    async fn similar_returns_nearest_reference() {
        let mut classifier = MockClassifierPort::new();
        classifier
            .expect_embed()
            .returning(|_| Ok(Embedding::new(vec![1.0, 0.0])));
        let service = service(
            ModelState::Loaded(big_cats_model(classifier)),
            IndexState::Ready(abc_index(vec![
                IndexHit {
                    position: 1,
                    distance: 0.5,
                },
                IndexHit {
                    position: 0,
                    distance: 2.0,
                },
            ])),
            ok_preprocessor(),
        );

        let result = service
            .find_similar(Bytes::from_static(b"img"), Some(1))
            .await
            .unwrap();
        assert_eq!(result.len(), 1);
        let m = &result.matches()[0];
        assert_eq!(m.image_id.as_str(), "b");
        assert!((m.distance - 0.5).abs() < f32::EPSILON);
        assert!((m.similarity - 1.0 / 1.5).abs() < 1e-6);
    }

    #[tokio::test]
    async fn out_of_range_positions_are_skipped_and_counted() {
        let mut classifier = MockClassifierPort::new();
        classifier
            .expect_embed()
            .returning(|_| Ok(Embedding::new(vec![1.0, 0.0])));
        let service = service(
            ModelState::Loaded(big_cats_model(classifier)),
            IndexState::Ready(abc_index(vec![
                IndexHit {
                    position: 2,
                    distance: 0.1,
                },
                IndexHit {
                    position: 7,
                    distance: 0.2,
                },
                IndexHit {
                    position: -1,
                    distance: 0.3,
                },
            ])),
            ok_preprocessor(),
        );

        let result = service
            .find_similar(Bytes::from_static(b"img"), Some(3))
            .await
            .unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result.matches()[0].image_id.as_str(), "c");
        assert_eq!(service.stats().index_inconsistencies_total, 2);
    }

    #[tokio::test]
    async fn similar_with_negative_top_k_is_invalid() {
        let mut classifier = MockClassifierPort::new();
        classifier.expect_embed().never();
        let service = service(
            ModelState::Loaded(big_cats_model(classifier)),
            IndexState::Ready(abc_index(Vec::new())),
            ok_preprocessor(),
        );

        let err = service
            .find_similar(Bytes::from_static(b"img"), Some(-2))
            .await
            .unwrap_err();
        assert!(matches!(err, ApplicationError::InvalidParameter(_)));
    }

    #[test]
    fn species_listing_is_sorted_display_form() {
        let service = service(
            ModelState::Loaded(big_cats_model(MockClassifierPort::new())),
            IndexState::Absent,
            ok_preprocessor(),
        );
        assert_eq!(
            service.list_species().unwrap(),
            vec!["Panthera leo", "Panthera onca"]
        );
    }

    #[tokio::test]
    async fn reload_publishes_new_state() {
        let mut loader = MockArtifactLoaderPort::new();
        loader.expect_resolve_device().returning(cpu);
        loader
            .expect_load_model()
            .returning(|_| Ok(Some(big_cats_model(MockClassifierPort::new()))));
        loader.expect_load_index().returning(|_| Ok(None));

        let service = SpeciesService::new(
            ServingState::unloaded(cpu()),
            ArtifactLifecycle::new(Arc::new(loader)),
            Arc::new(ok_preprocessor()),
            AdmissionGate::new(1),
        );
        assert!(!service.is_ready());

        let status = service.reload().await;
        assert!(status.model_loaded);
        assert!(service.is_ready());
        assert_eq!(status.num_classes, Some(2));
    }

    #[tokio::test]
    async fn start_runs_initialisation() {
        let mut loader = MockArtifactLoaderPort::new();
        loader.expect_resolve_device().returning(cpu);
        loader.expect_load_model().returning(|_| Ok(None));

        let service = SpeciesService::start(
            ArtifactLifecycle::new(Arc::new(loader)),
            Arc::new(ok_preprocessor()),
            AdmissionGate::new(1),
        )
        .await;
        assert!(!service.status().model_loaded);
    }

    #[tokio::test]
    async fn similar_holds_one_permit_through_index_search() {
        let gate = AdmissionGate::new(1);
        let seen_in_flight = Arc::new(AtomicU64::new(u64::MAX));

        let mut classifier = MockClassifierPort::new();
        classifier
            .expect_embed()
            .returning(|_| Ok(Embedding::new(vec![1.0, 0.0])));

        let mut index = MockSimilarityIndexPort::new();
        index.expect_vector_count().return_const(3usize);
        let (search_gate, seen) = (gate.clone(), Arc::clone(&seen_in_flight));
        index.expect_search().returning(move |_, _| {
            seen.store(search_gate.in_flight() as u64, Ordering::SeqCst);
            Ok(vec![IndexHit {
                position: 0,
                distance: 0.0,
            }])
        });
        let index = LoadedIndex {
            index: Arc::new(index),
            image_ids: Arc::new(vec![ImageId::new("a").unwrap()]),
        };

        let service = SpeciesService::new(
            ServingState::new(
                cpu(),
                ModelState::Loaded(big_cats_model(classifier)),
                IndexState::Ready(index),
            ),
            lifecycle(),
            Arc::new(ok_preprocessor()),
            gate.clone(),
        );

        let result = service
            .find_similar(Bytes::from_static(b"img"), Some(1))
            .await
            .unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(seen_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(gate.in_flight(), 0);
    }

    /// Parks every forward pass on a barrier and records how many overlap
    struct ParkingClassifier {
        barrier: tokio::sync::Barrier,
        gate: AdmissionGate,
        running: AtomicUsize,
        peak_running: AtomicUsize,
        peak_admitted: AtomicUsize,
    }

    impl ParkingClassifier {
        fn new(gate: AdmissionGate) -> Self {
            Self {
                barrier: tokio::sync::Barrier::new(gate.capacity()),
                gate,
                running: AtomicUsize::new(0),
                peak_running: AtomicUsize::new(0),
                peak_admitted: AtomicUsize::new(0),
            }
        }

        async fn park(&self) {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_running.fetch_max(now, Ordering::SeqCst);
            self.peak_admitted
                .fetch_max(self.gate.in_flight(), Ordering::SeqCst);
            self.barrier.wait().await;
            self.running.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl ClassifierPort for ParkingClassifier {
        async fn infer(&self, _image: ImageTensor) -> Result<ModelOutput, ApplicationError> {
            self.park().await;
            Ok(ModelOutput {
                logits: vec![1.0, 0.0],
                embedding: Embedding::new(vec![0.5, 0.5]),
            })
        }

        async fn embed(&self, _image: ImageTensor) -> Result<Embedding, ApplicationError> {
            self.park().await;
            Ok(Embedding::new(vec![0.5, 0.5]))
        }

        fn embedding_size(&self) -> usize {
            2
        }

        fn num_classes(&self) -> usize {
            2
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn gate_bounds_concurrent_predict_and_similar() {
        const CAPACITY: usize = 3;
        let gate = AdmissionGate::new(CAPACITY);
        let classifier = Arc::new(ParkingClassifier::new(gate.clone()));

        let model = LoadedModel {
            classifier: Arc::clone(&classifier) as Arc<dyn ClassifierPort>,
            ..big_cats_model(MockClassifierPort::new())
        };
        let index = abc_index(vec![IndexHit {
            position: 0,
            distance: 0.25,
        }]);
        let service = Arc::new(SpeciesService::new(
            ServingState::new(cpu(), ModelState::Loaded(model), IndexState::Ready(index)),
            lifecycle(),
            Arc::new(ok_preprocessor()),
            gate.clone(),
        ));

        let mut tasks = JoinSet::new();
        for i in 0..2 * CAPACITY {
            let service = Arc::clone(&service);
            tasks.spawn(async move {
                let image = Bytes::from_static(b"img");
                if i % 2 == 0 {
                    service.predict(image, Some(1)).await.map(|r| r.len())
                } else {
                    service.find_similar(image, Some(1)).await.map(|r| r.len())
                }
            });
        }

        let results = tokio::time::timeout(Duration::from_secs(10), tasks.join_all())
            .await
            .unwrap();
        assert!(results.iter().all(|r| matches!(r, Ok(1))));

        // the barrier only opens once CAPACITY calls overlap
        assert_eq!(classifier.peak_running.load(Ordering::SeqCst), CAPACITY);
        assert!(classifier.peak_admitted.load(Ordering::SeqCst) <= CAPACITY);
        assert_eq!(gate.in_flight(), 0);
        assert_eq!(service.stats().inferences_total, 2 * CAPACITY as u64);
    }

    fn felids_model() -> LoadedModel {
        LoadedModel {
            classifier: Arc::new(MockClassifierPort::new()),
            classes: Arc::new(
                ClassMapping::from_pairs([
                    ("Panthera_onca", 0),
                    ("Panthera_leo", 1),
                    ("Felis_catus", 2),
                ])
                .unwrap(),
            ),
            embedding_size: 4,
            source: "reloaded".to_string(),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn readers_see_whole_old_or_whole_new_state_during_reload() {
        let old = ServingState::new(
            cpu(),
            ModelState::Loaded(big_cats_model(MockClassifierPort::new())),
            IndexState::Ready(abc_index(Vec::new())),
        );
        let new = ServingState::new(cpu(), ModelState::Loaded(felids_model()), IndexState::Absent);

        let mut loader = MockArtifactLoaderPort::new();
        loader.expect_resolve_device().returning(cpu);
        loader
            .expect_load_model()
            .returning(|_| Ok(Some(felids_model())));
        loader.expect_load_index().returning(|_| Ok(None));

        let service = Arc::new(SpeciesService::new(
            old.clone(),
            ArtifactLifecycle::new(Arc::new(loader)),
            Arc::new(ok_preprocessor()),
            AdmissionGate::new(1),
        ));

        let mut readers = JoinSet::new();
        for _ in 0..4 {
            let service = Arc::clone(&service);
            readers.spawn(async move {
                for _ in 0..500 {
                    let status = service.status();
                    let snapshot = (status.num_classes, status.embedding_size, status.index_size);
                    assert!(
                        snapshot == (Some(2), Some(2), Some(3))
                            || snapshot == (Some(3), Some(4), None),
                        "torn state {snapshot:?}"
                    );
                    let species = service.list_species().unwrap().len();
                    assert!(species == 2 || species == 3);
                    tokio::task::yield_now().await;
                }
            });
        }

        for round in 0..100 {
            if round % 2 == 0 {
                service.reload().await;
            } else {
                service.publish(old.clone());
            }
            tokio::task::yield_now().await;
        }
        service.publish(new);

        tokio::time::timeout(Duration::from_secs(10), readers.join_all())
            .await
            .unwrap();
        assert_eq!(service.status().num_classes, Some(3));
    }
}
