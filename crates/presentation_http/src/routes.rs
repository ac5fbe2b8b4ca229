//! Route definitions

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
};
use tower_http::limit::RequestBodyLimitLayer;

use crate::{handlers, middleware::track_requests, state::AppState};

/// Create the main router with all routes
///
/// Uploads are bounded by `server.max_upload_bytes`; every request is
/// counted in the metrics collector.
pub fn create_router(state: AppState) -> Router {
    let max_upload = state.config.server.max_upload_bytes;

    let inference = Router::new()
        .route("/predict", post(handlers::inference::predict))
        .route("/embeddings", post(handlers::inference::embeddings))
        .route("/similar", post(handlers::inference::similar))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_upload));

    Router::new()
        // Health and status endpoints
        .route("/", get(handlers::health::root))
        .route("/health", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::readiness_check))
        // Metrics endpoints
        .route("/metrics", get(handlers::metrics::get_metrics))
        .route(
            "/metrics/prometheus",
            get(handlers::metrics::get_metrics_prometheus),
        )
        // Catalog and inference
        .route("/species", get(handlers::species::list_species))
        .merge(inference)
        .layer(middleware::from_fn_with_state(state.clone(), track_requests))
        // Attach state
        .with_state(state)
}
