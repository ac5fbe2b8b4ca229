//! Species identification HTTP server
//!
//! Main entry point for the HTTP API server.

use std::{sync::Arc, time::Duration};

use ai_vision::Preprocessor;
use application::{
    AdmissionGate, ArtifactLifecycle, ArtifactLoaderPort, ImagePreprocessorPort, SpeciesService,
};
use axum::http::StatusCode;
use domain::value_objects::TopK;
use infrastructure::{AppConfig, FsArtifactLoader, ImagePreprocessorAdapter, init_telemetry};
use presentation_http::{
    RequestIdLayer, routes, set_expose_internal_errors, spawn_artifact_reload_handler,
    state::AppState,
};
use tokio::{net::TcpListener, signal};
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Configuration first so logging can honour its settings
    let (config, config_error) = match AppConfig::load() {
        Ok(config) => (config, None),
        Err(e) => (AppConfig::default(), Some(e)),
    };

    init_telemetry(&config.telemetry, config.server.log_format)?;
    if let Some(e) = config_error {
        warn!("Failed to load config, using defaults: {}", e);
    }

    info!("🦜 Species API v{} starting...", env!("CARGO_PKG_VERSION"));
    info!(
        host = %config.server.host,
        port = %config.server.port,
        environment = %config.environment(),
        model_dir = %config.artifacts.model_dir.display(),
        device = %config.inference.device,
        "Configuration loaded"
    );

    set_expose_internal_errors(config.expose_internal_errors());

    // Serving core
    let preprocessor = Preprocessor::from_config(&config.inference)
        .map_err(|e| anyhow::anyhow!("Invalid preprocessing settings: {e}"))?;
    let preprocessor: Arc<dyn ImagePreprocessorPort> =
        Arc::new(ImagePreprocessorAdapter::new(preprocessor));
    let loader: Arc<dyn ArtifactLoaderPort> = Arc::new(FsArtifactLoader::new(
        config.artifacts.clone(),
        config.inference.device,
    ));
    let gate = AdmissionGate::new(config.inference.effective_concurrency());
    let default_top_k = i64::try_from(config.inference.default_top_k)
        .map_err(anyhow::Error::from)
        .and_then(|k| TopK::new(k).map_err(anyhow::Error::from))
        .map_err(|e| anyhow::anyhow!("Invalid inference.default_top_k: {e}"))?;

    let species_service = Arc::new(
        SpeciesService::start(ArtifactLifecycle::new(loader), preprocessor, gate)
            .await
            .with_default_top_k(default_top_k),
    );

    let status = species_service.status();
    if status.model_loaded {
        info!(
            num_classes = ?status.num_classes,
            embedding_size = ?status.embedding_size,
            index_loaded = status.index_loaded,
            device = %status.device,
            "🧠 Model ready"
        );
    } else {
        warn!("⚠️ No model loaded, inference endpoints will answer 503 until a reload succeeds");
    }

    spawn_artifact_reload_handler(Arc::clone(&species_service));

    let state = AppState::new(species_service, Arc::new(config.clone()));

    // Build router
    let app = routes::create_router(state);

    // Configure CORS layer
    let cors_layer = if config.server.allowed_origins.is_empty() {
        // Development mode: allow all origins
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        use axum::http::{HeaderValue, Method};
        let origins: Vec<HeaderValue> = config
            .server
            .allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers(Any)
    };

    let request_timeout = Duration::from_secs(config.server.request_timeout_secs);

    // Add middleware (last added = outermost)
    let mut app = app
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            request_timeout,
        ))
        .layer(TraceLayer::new_for_http());
    if config.server.cors_enabled {
        app = app.layer(cors_layer);
    }
    let app = app.layer(RequestIdLayer::new());

    // Start server
    let addr = config.server.bind_address();
    let listener = TcpListener::bind(&addr).await?;

    info!("🚀 Server listening on http://{}", addr);
    info!("🔄 SIGHUP reloads model artifacts (Unix only)");

    let shutdown_timeout = Duration::from_secs(config.server.shutdown_timeout_secs.unwrap_or(30));

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_timeout))
        .await?;

    info!("👋 Server shutdown complete");

    Ok(())
}

/// Wait for shutdown signals (SIGINT, SIGTERM) and handle graceful shutdown
async fn shutdown_signal(timeout: Duration) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("📥 Received Ctrl+C, initiating graceful shutdown...");
        }
        () = terminate => {
            info!("📥 Received SIGTERM, initiating graceful shutdown...");
        }
    }

    info!("⏳ Waiting up to {:?} for connections to close...", timeout);
}
