//! Artifact reload on SIGHUP
//!
//! Re-runs the startup loading sequence and publishes the result without a
//! restart. The serving core keeps the previous state when the new artifacts
//! would leave it without a model.

use std::sync::Arc;

use application::SpeciesService;
use tracing::{error, info, warn};

/// Spawn a background task that reloads artifacts on every SIGHUP
#[cfg(unix)]
pub fn spawn_artifact_reload_handler(service: Arc<SpeciesService>) {
    use tokio::signal::unix::{SignalKind, signal};

    tokio::spawn(async move {
        let mut sighup = match signal(SignalKind::hangup()) {
            Ok(s) => s,
            Err(e) => {
                error!("Failed to install SIGHUP handler: {}", e);
                return;
            },
        };

        while sighup.recv().await.is_some() {
            info!("📥 Received SIGHUP, reloading artifacts...");
            let status = service.reload().await;
            if status.model_loaded {
                info!(
                    num_classes = ?status.num_classes,
                    index_loaded = status.index_loaded,
                    index_size = ?status.index_size,
                    "✅ Artifact reload complete"
                );
            } else {
                warn!("⚠️ No model available after reload, still serving 503");
            }
        }
    });
}

/// No-op on non-Unix systems
#[cfg(not(unix))]
pub fn spawn_artifact_reload_handler(_service: Arc<SpeciesService>) {
    warn!("SIGHUP artifact reload not supported on this platform");
}
