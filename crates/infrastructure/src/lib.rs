//! Infrastructure layer - Adapters for external systems
//!
//! Implements the application ports on top of the vision runtime and the
//! filesystem artifact store. Also owns layered configuration and logging
//! setup shared by the server and the CLI.

pub mod adapters;
pub mod config;
pub mod telemetry;
#[cfg(test)]
pub mod testing;

pub use adapters::*;
pub use config::{AppConfig, ArtifactConfig, Environment, ServerConfig};
pub use telemetry::{LogFormat, TelemetryConfig, TelemetryError, init_telemetry};
