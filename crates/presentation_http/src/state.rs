//! Application state shared across handlers

use std::sync::Arc;

use application::SpeciesService;
use infrastructure::AppConfig;

use crate::handlers::metrics::MetricsCollector;

/// Shared application state
#[derive(Debug, Clone)]
pub struct AppState {
    /// Serving core for prediction, embeddings and similarity search
    pub species_service: Arc<SpeciesService>,
    /// Application configuration
    pub config: Arc<AppConfig>,
    /// Request and inference counters
    pub metrics: Arc<MetricsCollector>,
}

impl AppState {
    /// Create state with a fresh metrics collector
    pub fn new(species_service: Arc<SpeciesService>, config: Arc<AppConfig>) -> Self {
        Self {
            species_service,
            config,
            metrics: Arc::new(MetricsCollector::new()),
        }
    }
}
