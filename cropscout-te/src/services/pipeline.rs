//! Ready-window processing pipeline
//!
//! A dispatcher drains the ready queue and spawns one task per window;
//! windows from different growers analyze fully in parallel. Each
//! window runs triage, fan-out, and publication as one attempt, with a
//! bounded number of whole-window retries before the window is parked
//! in the failed state for human attention. Ready windows that never
//! reached publication are re-enqueued at startup.

use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use cropscout_common::{EventBus, ScoutEvent};

use crate::adapters::{GrowerContext, GrowerContextProvider};
use crate::db;
use crate::models::{EngineParams, EvidenceWindow};
use crate::services::{DiagnosisPublisher, FanOutCoordinator, TriageRouter};

/// A window handed to the pipeline
#[derive(Debug)]
pub enum ReadyWindow {
    /// Stored window, loaded from the database when processed
    Stored(Uuid),
    /// In-memory window from the ingest fallback path
    Ephemeral(Box<EvidenceWindow>),
}

pub struct WindowPipeline {
    db: SqlitePool,
    event_bus: Arc<EventBus>,
    params: EngineParams,
    router: Arc<TriageRouter>,
    fanout: Arc<FanOutCoordinator>,
    publisher: Arc<DiagnosisPublisher>,
    context_provider: Arc<dyn GrowerContextProvider>,
    shutdown: CancellationToken,
}

impl WindowPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: SqlitePool,
        event_bus: Arc<EventBus>,
        params: EngineParams,
        router: Arc<TriageRouter>,
        fanout: Arc<FanOutCoordinator>,
        publisher: Arc<DiagnosisPublisher>,
        context_provider: Arc<dyn GrowerContextProvider>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            db,
            event_bus,
            params,
            router,
            fanout,
            publisher,
            context_provider,
            shutdown,
        }
    }

    /// Run the dispatcher until shutdown or the queue closes
    pub fn spawn(self: Arc<Self>, mut ready_rx: mpsc::Receiver<ReadyWindow>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!("Window pipeline started");
            loop {
                tokio::select! {
                    _ = self.shutdown.cancelled() => {
                        info!("Window pipeline stopped");
                        return;
                    }
                    next = ready_rx.recv() => {
                        match next {
                            Some(ready) => {
                                let pipeline = self.clone();
                                tokio::spawn(async move {
                                    pipeline.process(ready).await;
                                });
                            }
                            None => {
                                info!("Ready queue closed, window pipeline stopping");
                                return;
                            }
                        }
                    }
                }
            }
        })
    }

    /// Re-enqueue ready windows that never reached publication
    ///
    /// Called once at startup so a crash between promotion and
    /// publication delays a window instead of losing it.
    pub async fn recover_pending(
        &self,
        ready_tx: &mpsc::Sender<ReadyWindow>,
    ) -> cropscout_common::Result<usize> {
        let pending = db::windows::pending_ready_windows(&self.db).await?;
        let mut enqueued = 0;
        for window_id in pending {
            if ready_tx.send(ReadyWindow::Stored(window_id)).await.is_err() {
                warn!("Ready queue closed during recovery");
                break;
            }
            enqueued += 1;
        }
        if enqueued > 0 {
            info!(count = enqueued, "Re-enqueued unfinished ready windows");
        }
        Ok(enqueued)
    }

    /// Process one ready window end to end
    pub async fn process(&self, ready: ReadyWindow) {
        let (window, ephemeral) = match ready {
            ReadyWindow::Stored(window_id) => {
                match db::windows::load_window(&self.db, window_id).await {
                    Ok(Some(window)) => (window, false),
                    Ok(None) => {
                        warn!(window_id = %window_id, "Ready window not found, skipping");
                        return;
                    }
                    Err(e) => {
                        // Startup recovery will pick the window up again
                        warn!(window_id = %window_id, error = %e, "Failed to load ready window");
                        self.event_bus.emit_lossy(ScoutEvent::DatabaseError {
                            operation: "load_window".to_string(),
                            error: e.to_string(),
                            timestamp: chrono::Utc::now(),
                        });
                        return;
                    }
                }
            }
            ReadyWindow::Ephemeral(window) => (*window, true),
        };

        if window.is_terminal() {
            debug!(window_id = %window.window_id, "Window already finished, skipping");
            return;
        }

        self.run_window(window, ephemeral).await;
    }

    /// Attempt the window with bounded retries
    async fn run_window(&self, window: EvidenceWindow, ephemeral: bool) {
        let mut backoff = std::time::Duration::from_millis(self.params.window_retry_backoff_ms);
        let mut last_error = String::new();

        for attempt in 1..=self.params.window_retries {
            match self.attempt_window(&window, ephemeral).await {
                Ok(()) => return,
                Err(e) => {
                    last_error = e.to_string();
                    warn!(
                        window_id = %window.window_id,
                        attempt = attempt,
                        error = %last_error,
                        "Window analysis attempt failed"
                    );
                    if !ephemeral {
                        if let Err(e) =
                            db::windows::record_attempt(&self.db, window.window_id, attempt, &last_error)
                                .await
                        {
                            warn!(window_id = %window.window_id, error = %e, "Failed to record attempt");
                        }
                    }
                    if attempt < self.params.window_retries {
                        tokio::time::sleep(backoff).await;
                        backoff *= 2;
                    }
                }
            }
        }

        error!(
            window_id = %window.window_id,
            grower_id = %window.grower_id,
            attempts = self.params.window_retries,
            error = %last_error,
            "Window analysis failed, parking for attention"
        );
        if !ephemeral {
            if let Err(e) = db::windows::fail_window(
                &self.db,
                window.window_id,
                self.params.window_retries,
                &last_error,
            )
            .await
            {
                warn!(window_id = %window.window_id, error = %e, "Failed to park window");
            }
        }
        self.event_bus.emit_lossy(ScoutEvent::WindowAnalysisFailed {
            window_id: window.window_id,
            grower_id: window.grower_id.clone(),
            attempts: self.params.window_retries,
            error: last_error,
            timestamp: chrono::Utc::now(),
        });
    }

    /// One triage, fan-out, publish attempt
    async fn attempt_window(
        &self,
        window: &EvidenceWindow,
        ephemeral: bool,
    ) -> cropscout_common::Result<()> {
        // Context is best effort; triage proceeds without it
        let context = match self.context_provider.context_for(&window.grower_id).await {
            Ok(context) => context,
            Err(e) => {
                debug!(
                    grower_id = %window.grower_id,
                    error = %e,
                    "No grower context available, proceeding without"
                );
                GrowerContext::default()
            }
        };

        let decision = self.router.route(window, &context).await;
        let findings = self.fanout.analyze_window(window, &decision, &context).await;

        // A window with no successful finding is retried whole rather
        // than published as an empty diagnosis
        if findings.iter().all(|f| !f.succeeded) {
            return Err(cropscout_common::Error::Internal(format!(
                "all {} analyzer calls failed",
                findings.len()
            )));
        }

        self.publisher
            .publish(window, decision, findings, ephemeral)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mock::{MockAnalyzer, MockClassifier, MockContextProvider};
    use crate::adapters::AnalyzerRegistry;
    use crate::models::{ObservationEvent, RoutingTable, WindowStatus};
    use cropscout_common::ReadyTrigger;
    use serde_json::json;
    use tokio::sync::Semaphore;

    fn fast_params() -> EngineParams {
        EngineParams {
            analyzer_backoff_ms: 10,
            window_retry_backoff_ms: 10,
            emit_retries: 0,
            ..Default::default()
        }
    }

    async fn harness(
        classifier: MockClassifier,
        analyzers: Vec<Arc<MockAnalyzer>>,
        context: MockContextProvider,
        params: EngineParams,
    ) -> (
        Arc<WindowPipeline>,
        SqlitePool,
        Arc<EventBus>,
        tempfile::TempDir,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let pool = db::init_database_pool(&dir.path().join("test.db"))
            .await
            .unwrap();
        let event_bus = Arc::new(EventBus::new(256));

        let mut registry = AnalyzerRegistry::new();
        for analyzer in analyzers {
            registry.register(analyzer);
        }

        let router = Arc::new(TriageRouter::new(
            Arc::new(classifier),
            RoutingTable::builtin(),
            params.clone(),
            event_bus.clone(),
        ));
        let fanout = Arc::new(FanOutCoordinator::new(
            registry,
            params.clone(),
            event_bus.clone(),
            Arc::new(Semaphore::new(params.global_concurrency)),
        ));
        let publisher = Arc::new(DiagnosisPublisher::new(
            pool.clone(),
            event_bus.clone(),
            params.clone(),
        ));
        let pipeline = Arc::new(WindowPipeline::new(
            pool.clone(),
            event_bus.clone(),
            params,
            router,
            fanout,
            publisher,
            Arc::new(context),
            CancellationToken::new(),
        ));

        (pipeline, pool, event_bus, dir)
    }

    async fn ready_window(pool: &SqlitePool, grower_id: &str) -> Uuid {
        let event = ObservationEvent::new(
            grower_id.to_string(),
            0.5,
            json!({"note": "yellowing between veins"}),
        );
        let window = EvidenceWindow::new(event, chrono::Duration::minutes(30));
        db::observations::insert_observation(pool, &window.events[0], window.window_id)
            .await
            .unwrap();
        db::windows::save_window(pool, &window).await.unwrap();
        db::windows::mark_ready(pool, window.window_id, ReadyTrigger::EventCap)
            .await
            .unwrap();
        window.window_id
    }

    /// A ready window flows through to a stored diagnosis
    #[tokio::test]
    async fn test_ready_window_produces_diagnosis() {
        let (pipeline, pool, _bus, _dir) = harness(
            MockClassifier::returning("pest_pressure", 0.9),
            vec![Arc::new(MockAnalyzer::succeeding(
                "pest",
                "aphid infestation",
                0.85,
            ))],
            MockContextProvider::returning(GrowerContext::default()),
            fast_params(),
        )
        .await;

        let window_id = ready_window(&pool, "G-1").await;
        pipeline.process(ReadyWindow::Stored(window_id)).await;

        let diagnosis = db::diagnoses::find_diagnosis_for_window(&pool, window_id)
            .await
            .unwrap()
            .expect("diagnosis should exist");
        assert_eq!(diagnosis.grower_id, "G-1");
        assert_eq!(diagnosis.findings.len(), 1);
        assert!(diagnosis.findings[0].succeeded);

        let window = db::windows::load_window(&pool, window_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(window.status, WindowStatus::Triaged);
    }

    /// High confidence runs exactly one analyzer
    #[tokio::test]
    async fn test_high_confidence_runs_single_analyzer() {
        let pest = Arc::new(MockAnalyzer::succeeding("pest", "aphid infestation", 0.8));
        let pathology = Arc::new(MockAnalyzer::succeeding("pathology", "leaf rust", 0.7));
        let (pipeline, pool, _bus, _dir) = harness(
            MockClassifier::returning("pest_pressure", 0.9),
            vec![pest.clone(), pathology.clone()],
            MockContextProvider::returning(GrowerContext::default()),
            fast_params(),
        )
        .await;

        let window_id = ready_window(&pool, "G-1").await;
        pipeline.process(ReadyWindow::Stored(window_id)).await;

        assert_eq!(pest.calls(), 1);
        assert_eq!(pathology.calls(), 0);
    }

    /// Moderate confidence runs the plausible set in parallel
    #[tokio::test]
    async fn test_moderate_confidence_runs_plausible_set() {
        let pest = Arc::new(MockAnalyzer::succeeding("pest", "aphid infestation", 0.8));
        let pathology = Arc::new(MockAnalyzer::succeeding("pathology", "leaf rust", 0.7));
        let (pipeline, pool, _bus, _dir) = harness(
            MockClassifier::returning("disease", 0.5),
            vec![pest.clone(), pathology.clone()],
            MockContextProvider::returning(GrowerContext::default()),
            fast_params(),
        )
        .await;

        let window_id = ready_window(&pool, "G-1").await;
        pipeline.process(ReadyWindow::Stored(window_id)).await;

        assert_eq!(pest.calls(), 1);
        assert_eq!(pathology.calls(), 1);
    }

    /// Partial analyzer failure still publishes, keeping the failures
    #[tokio::test]
    async fn test_partial_failure_still_publishes() {
        let (pipeline, pool, _bus, _dir) = harness(
            MockClassifier::returning("disease", 0.5),
            vec![
                Arc::new(MockAnalyzer::succeeding("pathology", "leaf rust", 0.7)),
                Arc::new(MockAnalyzer::failing("pest")),
            ],
            MockContextProvider::returning(GrowerContext::default()),
            EngineParams {
                analyzer_retries: 0,
                ..fast_params()
            },
        )
        .await;

        let window_id = ready_window(&pool, "G-1").await;
        pipeline.process(ReadyWindow::Stored(window_id)).await;

        let diagnosis = db::diagnoses::find_diagnosis_for_window(&pool, window_id)
            .await
            .unwrap()
            .expect("diagnosis should exist");
        assert_eq!(diagnosis.findings.len(), 2);
        assert_eq!(diagnosis.findings.iter().filter(|f| f.succeeded).count(), 1);
        assert_eq!(diagnosis.findings.iter().filter(|f| !f.succeeded).count(), 1);
    }

    /// Total analyzer failure parks the window for attention
    #[tokio::test]
    async fn test_total_failure_parks_window() {
        let (pipeline, pool, bus, _dir) = harness(
            MockClassifier::returning("pest_pressure", 0.9),
            vec![Arc::new(MockAnalyzer::failing("pest"))],
            MockContextProvider::returning(GrowerContext::default()),
            EngineParams {
                analyzer_retries: 0,
                window_retries: 2,
                ..fast_params()
            },
        )
        .await;
        let mut rx = bus.subscribe();

        let window_id = ready_window(&pool, "G-1").await;
        pipeline.process(ReadyWindow::Stored(window_id)).await;

        let window = db::windows::load_window(&pool, window_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(window.status, WindowStatus::Failed);
        assert_eq!(window.attempts, 2);
        assert!(window.last_error.is_some());

        assert!(db::diagnoses::find_diagnosis_for_window(&pool, window_id)
            .await
            .unwrap()
            .is_none());

        let attention = db::windows::needs_attention(&pool).await.unwrap();
        assert_eq!(attention.len(), 1);
        assert_eq!(attention[0].window_id, window_id);

        let mut saw_failure = false;
        while let Ok(event) = rx.try_recv() {
            if event.event_type() == "WindowAnalysisFailed" {
                saw_failure = true;
            }
        }
        assert!(saw_failure);
    }

    /// Missing grower context degrades to analysis without it
    #[tokio::test]
    async fn test_context_failure_does_not_block() {
        let (pipeline, pool, _bus, _dir) = harness(
            MockClassifier::returning("pest_pressure", 0.9),
            vec![Arc::new(MockAnalyzer::succeeding(
                "pest",
                "aphid infestation",
                0.85,
            ))],
            MockContextProvider::failing(),
            fast_params(),
        )
        .await;

        let window_id = ready_window(&pool, "G-1").await;
        pipeline.process(ReadyWindow::Stored(window_id)).await;

        assert!(db::diagnoses::find_diagnosis_for_window(&pool, window_id)
            .await
            .unwrap()
            .is_some());
    }

    /// Concurrent processing of one window publishes exactly once
    #[tokio::test]
    async fn test_concurrent_processing_publishes_once() {
        let (pipeline, pool, bus, _dir) = harness(
            MockClassifier::returning("pest_pressure", 0.9),
            vec![Arc::new(MockAnalyzer::succeeding(
                "pest",
                "aphid infestation",
                0.85,
            ))],
            MockContextProvider::returning(GrowerContext::default()),
            fast_params(),
        )
        .await;
        let mut rx = bus.subscribe();

        let window_id = ready_window(&pool, "G-1").await;
        tokio::join!(
            pipeline.process(ReadyWindow::Stored(window_id)),
            pipeline.process(ReadyWindow::Stored(window_id)),
        );

        assert!(db::diagnoses::find_diagnosis_for_window(&pool, window_id)
            .await
            .unwrap()
            .is_some());

        let mut ready_notifications = 0;
        while let Ok(event) = rx.try_recv() {
            if event.event_type() == "DiagnosisReady" {
                ready_notifications += 1;
            }
        }
        assert_eq!(ready_notifications, 1);
    }

    /// An already-finished window is skipped without a second publish
    #[tokio::test]
    async fn test_finished_window_is_skipped() {
        let (pipeline, pool, bus, _dir) = harness(
            MockClassifier::returning("pest_pressure", 0.9),
            vec![Arc::new(MockAnalyzer::succeeding(
                "pest",
                "aphid infestation",
                0.85,
            ))],
            MockContextProvider::returning(GrowerContext::default()),
            fast_params(),
        )
        .await;

        let window_id = ready_window(&pool, "G-1").await;
        pipeline.process(ReadyWindow::Stored(window_id)).await;

        let mut rx = bus.subscribe();
        pipeline.process(ReadyWindow::Stored(window_id)).await;
        assert!(rx.try_recv().is_err());
    }

    /// Startup recovery re-enqueues ready windows without diagnoses
    #[tokio::test]
    async fn test_recover_pending_reenqueues_ready_windows() {
        let (pipeline, pool, _bus, _dir) = harness(
            MockClassifier::returning("pest_pressure", 0.9),
            vec![Arc::new(MockAnalyzer::succeeding(
                "pest",
                "aphid infestation",
                0.85,
            ))],
            MockContextProvider::returning(GrowerContext::default()),
            fast_params(),
        )
        .await;

        let window_id = ready_window(&pool, "G-1").await;
        let (ready_tx, mut ready_rx) = mpsc::channel(16);
        let recovered = pipeline.recover_pending(&ready_tx).await.unwrap();

        assert_eq!(recovered, 1);
        match ready_rx.try_recv().unwrap() {
            ReadyWindow::Stored(id) => assert_eq!(id, window_id),
            other => panic!("expected Stored, got {:?}", other),
        }
    }

    /// An ephemeral window publishes without store involvement
    #[tokio::test]
    async fn test_ephemeral_window_processes_in_memory() {
        let (pipeline, pool, bus, _dir) = harness(
            MockClassifier::returning("pest_pressure", 0.9),
            vec![Arc::new(MockAnalyzer::succeeding(
                "pest",
                "aphid infestation",
                0.85,
            ))],
            MockContextProvider::returning(GrowerContext::default()),
            fast_params(),
        )
        .await;
        let mut rx = bus.subscribe();

        let event = ObservationEvent::new("G-9".to_string(), 0.9, json!({}));
        let mut window = EvidenceWindow::new(event, chrono::Duration::minutes(30));
        window.mark_ready(ReadyTrigger::CriticalBypass);
        let window_id = window.window_id;

        pipeline
            .process(ReadyWindow::Ephemeral(Box::new(window)))
            .await;

        assert!(db::diagnoses::find_diagnosis_for_window(&pool, window_id)
            .await
            .unwrap()
            .is_none());

        let mut saw_ready = false;
        while let Ok(event) = rx.try_recv() {
            if event.event_type() == "DiagnosisReady" {
                saw_ready = true;
            }
        }
        assert!(saw_ready);
    }
}
