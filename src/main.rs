//! OCR Recognition Service
//!
//! REST (Axum) text recognition backed by ONNX Runtime, with engines
//! constructed lazily per variant and shared across requests.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use roocr::api::rest::{create_rest_router, AppState};
use roocr::config::Config;
use roocr::engine::{select_device, EngineRegistry, OrtEngineFactory, OrtRuntimeProbe};
use roocr::service::OcrService;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!("Starting OCR Recognition Service v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config_path = Config::default_path();
    let mut config = if std::path::Path::new(&config_path).exists() {
        Config::load(&config_path)?
    } else {
        info!("No config at {}, using defaults", config_path);
        Config::default()
    };
    config.apply_env();
    config.validate().context("Invalid configuration")?;

    info!("Configuration loaded:");
    info!("  Listen: {}:{}", config.server.host, config.server.port);
    info!("  Device preference: {:?}", config.inference.device);
    info!("  Variants: {}", config.variants.keys().cloned().collect::<Vec<_>>().join(", "));
    info!("  Default variant: {}", config.inference.default_variant);

    // Pick the compute device once; every engine is built on it
    let probe = OrtRuntimeProbe::new(config.inference.onnxruntime_path.clone());
    let selection = select_device(&probe, config.inference.device);
    if !selection.runtime_loaded {
        warn!("ONNX Runtime unavailable; recognition requests will fail until it is installed");
    }

    let factory = Arc::new(OrtEngineFactory::new(
        config.inference.intra_threads,
        selection.runtime_loaded,
    ));
    let registry = Arc::new(EngineRegistry::new(&config, selection.device, factory)?);

    if !config.inference.preload.is_empty() {
        let preload = config.inference.preload.clone();
        let registry = registry.clone();
        let ready = tokio::task::spawn_blocking(move || registry.preload(&preload)).await?;
        info!("Preloaded {}/{} variant(s)", ready, config.inference.preload.len());
    }

    let service = Arc::new(OcrService::new(
        registry,
        selection,
        &config.inference.default_variant,
    ));

    let app_state = Arc::new(AppState {
        service,
        start_time: Instant::now(),
    });
    let router = create_rest_router(app_state, &config.server);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("OCR Recognition Service is ready!");
    info!("REST: http://{}/health", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Goodbye!");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received, draining connections...");
}
