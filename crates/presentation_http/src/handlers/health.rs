//! Liveness and readiness handlers

use application::ServingStatus;
use axum::{Json, extract::State, http::StatusCode};
use serde::{Deserialize, Serialize};

use crate::state::AppState;

/// Root liveness response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootResponse {
    pub status: String,
    pub message: String,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub model_loaded: bool,
    pub index_loaded: bool,
}

/// Readiness response
#[derive(Debug, Clone, Serialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub serving: ServingStatus,
}

/// `GET /` - the API is up
pub async fn root() -> Json<RootResponse> {
    Json(RootResponse {
        status: "ok".to_string(),
        message: "Species identification API is running".to_string(),
    })
}

/// Liveness check - is the server running?
///
/// Always 200; artifact state is reported but does not change the status.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let status = state.species_service.status();
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        model_loaded: status.model_loaded,
        index_loaded: status.index_loaded,
    })
}

/// Readiness check - can the server answer predictions?
pub async fn readiness_check(
    State(state): State<AppState>,
) -> (StatusCode, Json<ReadinessResponse>) {
    let serving = state.species_service.status();
    let ready = serving.model_loaded;
    let status_code = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(ReadinessResponse { ready, serving }))
}
