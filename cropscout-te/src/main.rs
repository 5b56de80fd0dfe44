//! cropscout-te - Triage Engine Microservice
//!
//! Aggregates quality observations into per-grower evidence windows,
//! classifies the probable cause, fans out to specialist analyzers,
//! and publishes exactly one diagnosis per window.
//!
//! Default port: 5850

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use cropscout_common::events::EventBus;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cropscout_te::config::EngineConfig;
use cropscout_te::AppState;

/// Command-line arguments for cropscout-te
#[derive(Parser, Debug)]
#[command(name = "cropscout-te")]
#[command(about = "Quality-issue triage engine for CropScout")]
#[command(version)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "5850", env = "CROPSCOUT_TE_PORT")]
    port: u16,

    /// Data directory holding the engine database
    #[arg(short, long, env = "CROPSCOUT_DATA_DIR")]
    data_dir: Option<String>,

    /// Engine config file (service endpoints, analyzer fleet, routes)
    #[arg(short, long, env = "CROPSCOUT_TE_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cropscout_te=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    info!("Starting CropScout Triage Engine on port {}", args.port);
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    // Resolve the data directory (CLI → ENV → config file → default)
    let data_dir =
        cropscout_common::config::resolve_data_dir(args.data_dir.as_deref(), "CROPSCOUT_DATA_DIR")
            .context("Failed to resolve data directory")?;
    info!("Data directory: {}", data_dir.display());

    let db_path = data_dir.join("cropscout.db");
    let db_pool = cropscout_te::db::init_database_pool(&db_path)
        .await
        .context("Failed to initialize database")?;
    info!("Database: {}", db_path.display());

    // Tuning parameters come from the settings table, topology from TOML
    let params = cropscout_te::db::settings::load_engine_params(&db_pool)
        .await
        .context("Failed to load engine parameters")?;
    let engine_config = EngineConfig::load(args.config.as_deref())
        .context("Failed to load engine config")?;

    let event_bus = Arc::new(EventBus::new(256));
    let shutdown = CancellationToken::new();

    let (aggregation, engine) = cropscout_te::start_engine(
        db_pool.clone(),
        event_bus.clone(),
        params,
        &engine_config,
        shutdown.clone(),
    )
    .await
    .context("Failed to start triage engine")?;
    info!("Triage engine started");

    let state = AppState::new(db_pool, event_bus, aggregation);
    let app = cropscout_te::build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // Stop the background tasks and let in-flight windows settle
    shutdown.cancel();
    let _ = engine.pipeline.await;
    let _ = engine.sweeper.await;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
