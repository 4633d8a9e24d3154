//! photo-preload: adaptive image cache and preloading engine.
//!
//! Lists a photo directory, keeps decoded images resident under a memory
//! budget that follows system memory pressure, and prefetches ahead of
//! navigation. A UI process drives it over HTTP.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tokio::time::MissedTickBehavior;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use photo_preload::catalog::list_images;
use photo_preload::config::{Cli, Config};
use photo_preload::decode::image_backend::ImageCrateBackend;
use photo_preload::manager::ImageManager;
use photo_preload::monitor::{ProcMeminfo, TelemetryMonitor};
use photo_preload::server::api::{build_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments.
    let cli = Cli::parse();

    // Initialize tracing/logging.
    let filter = if cli.verbose {
        "photo_preload=debug,tower_http=debug"
    } else {
        "photo_preload=info,tower_http=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_target(true)
        .init();

    info!("photo-preload v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration.
    let config = Config::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    info!(
        max_cache_bytes = config.max_cache_bytes,
        min_budget_bytes = config.cache.min_budget_bytes,
        max_concurrency = config.max_concurrency,
        preload_depth = config.default_preload_depth,
        "Configuration loaded"
    );

    // List the collection.
    let paths = list_images(&cli.dir).await?;
    if paths.is_empty() {
        warn!(dir = %cli.dir.display(), "No images found");
    }

    // Start memory sampling. One sample up front so the first budget
    // reflects the machine's actual state.
    let monitor = Arc::new(TelemetryMonitor::new(
        Arc::new(ProcMeminfo::new()),
        config.monitor.clone(),
    ));
    let initial = monitor.sample().await;
    let sampler = monitor.spawn_sampler();
    info!(pressure = %initial, "Memory monitor started");

    // Build the engine.
    let manager = Arc::new(ImageManager::new(
        &config,
        paths,
        Arc::new(ImageCrateBackend::new()),
        monitor.clone(),
    ));
    if !manager.is_empty() {
        manager.jump_to(0).await?;
    }

    // React to pressure changes between requests too.
    let ticker = {
        let manager = manager.clone();
        let period = config.monitor.sample_interval().max(Duration::from_millis(50));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                manager.tick().await;
            }
        })
    };

    // Build the HTTP router.
    let state = Arc::new(AppState::new(manager.clone())?);
    let app = build_router(state).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive()),
    );

    // Start the server.
    let listen_addr = cli.listen.unwrap_or_else(|| config.server.listen.clone());
    info!(addr = listen_addr, "Starting server");

    let listener = TcpListener::bind(&listen_addr).await?;
    info!("Listening on {listen_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for shutdown signal");
            }
        })
        .await?;

    info!("Shutting down");
    ticker.abort();
    sampler.abort();
    let _ = ticker.await;
    match Arc::try_unwrap(manager) {
        Ok(manager) => manager.shutdown().await,
        Err(_) => warn!("Image manager still referenced, skipping worker shutdown"),
    }

    Ok(())
}
