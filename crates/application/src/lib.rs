//! Application layer - Serving core and port definitions
//!
//! Owns the process-wide serving state (loaded model, class mapping,
//! embedding index, compute device) and the use cases that read it:
//! prediction, embedding extraction, similarity search and the species
//! catalog. Adapters in the infrastructure layer implement the ports.

pub mod error;
pub mod ports;
pub mod services;
pub mod state;

pub use error::ApplicationError;
pub use ports::*;
pub use services::*;
pub use state::*;
