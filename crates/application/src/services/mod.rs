//! Application services - Use case implementations

mod admission;
mod lifecycle;
mod species_service;

pub use admission::{AdmissionGate, AdmissionPermit};
pub use lifecycle::{ArtifactLifecycle, ReloadOutcome};
pub use species_service::{ServiceStats, SpeciesService};
