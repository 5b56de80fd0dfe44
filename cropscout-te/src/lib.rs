//! cropscout-te library interface for testing
//!
//! Exposes public APIs for integration testing

pub mod adapters;
pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use crate::error::{ApiError, ApiResult};

use crate::adapters::{HttpAnalyzer, HttpClassifier, HttpContextProvider, HttpRetriever};
use crate::adapters::analyzer::RetrievalSettings;
use crate::adapters::{AnalyzerRegistry, KnowledgeRetriever};
use crate::config::EngineConfig;
use crate::models::EngineParams;
use crate::services::{
    AggregationEngine, DiagnosisPublisher, ExpirySweeper, FanOutCoordinator, ReadyWindow,
    TriageRouter, WindowPipeline,
};
use axum::Router;
use chrono::{DateTime, Utc};
use cropscout_common::events::EventBus;
use cropscout_common::Error;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Event bus for SSE broadcasting
    pub event_bus: Arc<EventBus>,
    /// Ingest entry point for the observation endpoint
    pub aggregation: Arc<AggregationEngine>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last error for diagnostic purposes
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(db: SqlitePool, event_bus: Arc<EventBus>, aggregation: Arc<AggregationEngine>) -> Self {
        Self {
            db,
            event_bus,
            aggregation,
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::observation_routes())
        .merge(api::window_routes())
        .merge(api::diagnosis_routes())
        .merge(api::health_routes())
        .route("/events", get(api::event_stream))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Handles to the background half of the engine
///
/// Dropping the handles does not stop the tasks; cancel the token passed
/// to [`start_engine`] and await these to shut down cleanly.
pub struct EngineHandle {
    /// Sender feeding ready windows into the pipeline
    pub ready_tx: mpsc::Sender<ReadyWindow>,
    /// Pipeline dispatcher task
    pub pipeline: tokio::task::JoinHandle<()>,
    /// Expiry sweeper task
    pub sweeper: tokio::task::JoinHandle<()>,
}

/// Wire up and start the triage engine
///
/// Builds the HTTP adapters from `config`, recovers windows left ready
/// by a previous run, and spawns the pipeline dispatcher and expiry
/// sweeper. Returns the ingest entry point plus the task handles.
pub async fn start_engine(
    db: SqlitePool,
    event_bus: Arc<EventBus>,
    params: EngineParams,
    config: &EngineConfig,
    shutdown: CancellationToken,
) -> cropscout_common::Result<(Arc<AggregationEngine>, EngineHandle)> {
    let retriever: Option<Arc<dyn KnowledgeRetriever>> =
        if config.retrieval_url.trim().is_empty() {
            tracing::info!("Knowledge retrieval disabled (no retrieval_url configured)");
            None
        } else {
            let retriever = HttpRetriever::new(config.retrieval_url.clone())
                .map_err(|e| Error::Config(format!("Retrieval adapter: {}", e)))?;
            Some(Arc::new(retriever))
        };

    let retrieval = RetrievalSettings {
        top_k: params.retrieval_top_k,
        min_similarity: params.retrieval_min_similarity,
    };

    let mut registry = AnalyzerRegistry::new();
    for analyzer in &config.analyzers {
        let adapter = HttpAnalyzer::new(
            analyzer.id.clone(),
            analyzer.endpoint.clone(),
            analyzer.domain.clone(),
            retriever.clone(),
            retrieval,
        )
        .map_err(|e| Error::Config(format!("Analyzer adapter {}: {}", analyzer.id, e)))?;
        registry.register(Arc::new(adapter));
    }
    tracing::info!(analyzers = registry.count(), "Analyzer fleet registered");

    let classifier = HttpClassifier::new(config.classifier_url.clone())
        .map_err(|e| Error::Config(format!("Classifier adapter: {}", e)))?;
    let context_provider = HttpContextProvider::new(config.context_url.clone())
        .map_err(|e| Error::Config(format!("Context adapter: {}", e)))?;

    let router = TriageRouter::new(
        Arc::new(classifier),
        config.routing_table(),
        params.clone(),
        event_bus.clone(),
    );
    let fanout = FanOutCoordinator::new(
        registry,
        params.clone(),
        event_bus.clone(),
        Arc::new(Semaphore::new(params.global_concurrency)),
    );
    let publisher = DiagnosisPublisher::new(db.clone(), event_bus.clone(), params.clone());

    let (ready_tx, ready_rx) = mpsc::channel(256);

    let pipeline = Arc::new(WindowPipeline::new(
        db.clone(),
        event_bus.clone(),
        params.clone(),
        Arc::new(router),
        Arc::new(fanout),
        Arc::new(publisher),
        Arc::new(context_provider),
        shutdown.clone(),
    ));

    // Windows promoted before a crash pick up where they left off
    pipeline.recover_pending(&ready_tx).await?;

    let pipeline_handle = pipeline.spawn(ready_rx);

    let sweeper = ExpirySweeper::new(
        db.clone(),
        event_bus.clone(),
        params.clone(),
        ready_tx.clone(),
        shutdown,
    );
    let sweeper_handle = sweeper.spawn();

    let aggregation = Arc::new(AggregationEngine::new(db, event_bus, params, ready_tx.clone()));

    Ok((
        aggregation,
        EngineHandle {
            ready_tx,
            pipeline: pipeline_handle,
            sweeper: sweeper_handle,
        },
    ))
}
