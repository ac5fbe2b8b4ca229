//! Species catalog handler

use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};

use crate::{error::ApiError, state::AppState};

/// Every species the loaded model can predict
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeciesListResponse {
    pub species_count: usize,
    /// Display names, sorted
    pub species: Vec<String>,
}

/// `GET /species`
pub async fn list_species(
    State(state): State<AppState>,
) -> Result<Json<SpeciesListResponse>, ApiError> {
    let species = state.species_service.list_species()?;
    Ok(Json(SpeciesListResponse {
        species_count: species.len(),
        species,
    }))
}
