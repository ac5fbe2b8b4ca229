//! Image inference handlers: prediction, embedding extraction, similarity
//!
//! Images arrive as a multipart upload in the `file` field. `top_k` is a
//! query parameter parsed as a signed integer so that zero and negative
//! values reach the serving core and come back as `invalid_parameter`.
//!
//! Loaded state is checked before the query or the body is looked at, so an
//! unloaded server answers 503 whatever the upload looks like.

use std::{future::Future, time::Instant};

use axum::{
    Json,
    extract::{
        Multipart, Query, State, multipart::MultipartRejection, rejection::QueryRejection,
    },
};
use bytes::Bytes;
use domain::entities::{PredictionResult, SimilarityResult};
use serde::{Deserialize, Serialize};

use crate::{error::ApiError, state::AppState};

/// Multipart field carrying the image
pub const IMAGE_FIELD: &str = "file";

/// Query string of the ranked endpoints
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct TopKQuery {
    pub top_k: Option<i64>,
}

/// One ranked species
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionItem {
    /// Display form of the label
    pub scientific_name: String,
    /// Percentage rounded to two decimals
    pub probability: f64,
}

/// Response of `POST /predict`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionResponse {
    pub predictions: Vec<PredictionItem>,
    pub top_match: String,
    /// Percentage of the top match, rounded to two decimals
    pub confidence: f64,
}

impl TryFrom<PredictionResult> for PredictionResponse {
    type Error = ApiError;

    fn try_from(result: PredictionResult) -> Result<Self, Self::Error> {
        let top = result
            .top_match()
            .ok_or_else(|| ApiError::InferenceFailure("prediction was empty".to_string()))?;
        let top_match = top.label.display_name();
        let confidence = top.probability_percent();

        let predictions = result
            .predictions()
            .iter()
            .map(|p| PredictionItem {
                scientific_name: p.label.display_name(),
                probability: p.probability_percent(),
            })
            .collect();

        Ok(Self {
            predictions,
            top_match,
            confidence,
        })
    }
}

/// Response of `POST /embeddings`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingResponse {
    pub embedding_size: usize,
    pub embedding: Vec<f32>,
}

/// One reference image close to the query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarImage {
    pub image_id: String,
    pub distance: f32,
    pub similarity: f32,
}

/// Response of `POST /similar`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarityResponse {
    pub similar_count: usize,
    pub similar_images: Vec<SimilarImage>,
}

impl From<SimilarityResult> for SimilarityResponse {
    fn from(result: SimilarityResult) -> Self {
        let similar_images: Vec<_> = result
            .matches()
            .iter()
            .map(|m| SimilarImage {
                image_id: m.image_id.to_string(),
                distance: m.distance,
                similarity: m.similarity,
            })
            .collect();
        Self {
            similar_count: similar_images.len(),
            similar_images,
        }
    }
}

/// `POST /predict?top_k=N`
pub async fn predict(
    State(state): State<AppState>,
    query: Result<Query<TopKQuery>, QueryRejection>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<PredictionResponse>, ApiError> {
    state.species_service.ensure_model_loaded()?;
    let top_k = parse_query(query)?.top_k;
    let image = read_image(multipart).await?;

    let result = timed(&state, state.species_service.predict(image, top_k)).await?;
    Ok(Json(PredictionResponse::try_from(result)?))
}

/// `POST /embeddings`
pub async fn embeddings(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<EmbeddingResponse>, ApiError> {
    state.species_service.ensure_model_loaded()?;
    let image = read_image(multipart).await?;

    let embedding = timed(&state, state.species_service.embed(image)).await?;
    Ok(Json(EmbeddingResponse {
        embedding_size: embedding.len(),
        embedding: embedding.into_inner(),
    }))
}

/// `POST /similar?top_k=N`
pub async fn similar(
    State(state): State<AppState>,
    query: Result<Query<TopKQuery>, QueryRejection>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<SimilarityResponse>, ApiError> {
    state.species_service.ensure_similarity_ready()?;
    let top_k = parse_query(query)?.top_k;
    let image = read_image(multipart).await?;

    let result = timed(&state, state.species_service.find_similar(image, top_k)).await?;
    Ok(Json(SimilarityResponse::from(result)))
}

fn parse_query(query: Result<Query<TopKQuery>, QueryRejection>) -> Result<TopKQuery, ApiError> {
    query
        .map(|Query(q)| q)
        .map_err(|e| ApiError::InvalidParameter(format!("top_k must be an integer: {e}")))
}

/// Pull the bytes of the image field out of the upload
async fn read_image(multipart: Result<Multipart, MultipartRejection>) -> Result<Bytes, ApiError> {
    let mut multipart =
        multipart.map_err(|e| ApiError::BadRequest(format!("expected a multipart upload: {e}")))?;

    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some(IMAGE_FIELD) {
            return Ok(field.bytes().await?);
        }
    }

    Err(ApiError::BadRequest(format!(
        "multipart field '{IMAGE_FIELD}' is required"
    )))
}

/// Run a serving core call and record its outcome
async fn timed<T, F>(state: &AppState, call: F) -> Result<T, ApiError>
where
    F: Future<Output = Result<T, application::ApplicationError>>,
{
    let start = Instant::now();
    let result = call.await;
    state
        .metrics
        .record_inference(result.is_ok(), start.elapsed().as_micros() as u64);
    result.map_err(ApiError::from)
}
