//! HTTP presentation layer for the species identification service
//!
//! Thin axum surface over [`application::SpeciesService`]: multipart image
//! uploads in, typed JSON results or typed errors out.

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod reload;
pub mod routes;
pub mod state;

pub use error::{ApiError, ErrorResponse, set_expose_internal_errors};
pub use middleware::{REQUEST_ID_HEADER, RequestId, RequestIdLayer};
pub use reload::spawn_artifact_reload_handler;
pub use routes::create_router;
pub use state::AppState;
