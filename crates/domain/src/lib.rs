//! Domain layer for the species identification service
//!
//! Contains the value objects, entities and pure ranking math shared by every
//! other layer. This layer has no I/O and defines the ubiquitous language:
//! species labels, reference image ids, class mappings, predictions and
//! similarity matches.

pub mod entities;
pub mod errors;
pub mod value_objects;

pub use entities::*;
pub use errors::DomainError;
pub use value_objects::*;
