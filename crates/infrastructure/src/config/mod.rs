//! Application configuration
//!
//! Split into focused sub-modules:
//! - `server`: HTTP server settings
//! - `artifacts`: artifact store layout
//!
//! Inference settings are owned by the vision runtime and logging settings by
//! the telemetry module; both are embedded here so a single file and a single
//! environment prefix configure the whole process.

mod artifacts;
mod server;

use std::{fmt, path::Path};

use ai_vision::InferenceConfig;
use serde::{Deserialize, Serialize};

pub use artifacts::ArtifactConfig;
pub use server::ServerConfig;

use crate::telemetry::TelemetryConfig;

/// Prefix of every configuration environment variable
pub const ENV_PREFIX: &str = "SPECIES";

/// Shared default for boolean `true` fields across config structs
pub(crate) const fn default_true() -> bool {
    true
}

/// Application environment (development or production)
///
/// Controls whether internal error details reach API clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Development environment - internal error details are exposed
    #[default]
    Development,
    /// Production environment - internal error details are hidden
    Production,
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Development => write!(f, "development"),
            Self::Production => write!(f, "production"),
        }
    }
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            _ => Err(format!(
                "Invalid environment: {s}. Use 'development' or 'production'"
            )),
        }
    }
}

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application environment (development or production)
    #[serde(default)]
    pub environment: Option<Environment>,

    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Artifact store layout
    #[serde(default)]
    pub artifacts: ArtifactConfig,

    /// Inference configuration
    #[serde(default)]
    pub inference: InferenceConfig,

    /// Logging configuration
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    /// Load configuration from environment and optional `config.toml`
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::build(config::File::with_name("config").required(false))
    }

    /// Load configuration from a specific file, still honouring the environment
    pub fn load_from_file(path: &Path) -> Result<Self, config::ConfigError> {
        Self::build(config::File::from(path).required(true))
    }

    fn build<S>(file: S) -> Result<Self, config::ConfigError>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let builder = config::Config::builder()
            // Start with defaults
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8000)?
            .set_default("artifacts.model_dir", "models")?
            // Load from file if exists
            .add_source(file)
            // Override with environment variables (e.g., SPECIES_SERVER__PORT)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("server.allowed_origins")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// The configured environment, development when unset
    pub fn environment(&self) -> Environment {
        self.environment.unwrap_or_default()
    }

    /// Whether API errors may carry internal details
    pub fn expose_internal_errors(&self) -> bool {
        self.environment() == Environment::Development
    }
}
