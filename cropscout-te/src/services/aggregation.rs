//! Sliding-window evidence aggregation
//!
//! Each grower has at most one open window. Incoming observations
//! append to it and slide its idle expiry forward; the window is
//! promoted to ready when the event cap fills, when a critical-severity
//! observation arrives, or (via the sweeper) when the idle timer runs
//! out. Promotion is a compare-and-swap on the stored status so that
//! concurrent ingest and sweep enqueue a window exactly once.

use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use cropscout_common::{EventBus, ReadyTrigger, Result, ScoutEvent};

use crate::db;
use crate::models::{EngineParams, EvidenceWindow, ObservationEvent};
use crate::services::pipeline::ReadyWindow;

/// Result of ingesting one observation
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IngestOutcome {
    /// Event recorded in a window
    Accepted {
        window_id: Uuid,
        event_count: u32,
        /// Set when this ingest promoted the window to ready
        ready_trigger: Option<ReadyTrigger>,
    },
    /// Event id was already recorded; no state changed
    Duplicate { window_id: Uuid },
    /// Persistence failed; event processed as an ephemeral
    /// single-event window
    Fallback { window_id: Uuid },
}

impl IngestOutcome {
    pub fn window_id(&self) -> Uuid {
        match self {
            IngestOutcome::Accepted { window_id, .. } => *window_id,
            IngestOutcome::Duplicate { window_id } => *window_id,
            IngestOutcome::Fallback { window_id } => *window_id,
        }
    }
}

/// Ingest path coordinator
///
/// Mutations for one grower are serialized through a per-grower lock,
/// so concurrent ingest for the same grower cannot open two windows.
/// Different growers proceed fully in parallel.
#[derive(Clone)]
pub struct AggregationEngine {
    db: SqlitePool,
    event_bus: Arc<EventBus>,
    params: EngineParams,
    ready_tx: mpsc::Sender<ReadyWindow>,
    grower_locks: Arc<RwLock<HashMap<String, Arc<Mutex<()>>>>>,
}

impl AggregationEngine {
    pub fn new(
        db: SqlitePool,
        event_bus: Arc<EventBus>,
        params: EngineParams,
        ready_tx: mpsc::Sender<ReadyWindow>,
    ) -> Self {
        Self {
            db,
            event_bus,
            params,
            ready_tx,
            grower_locks: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Ingest one observation event
    ///
    /// Replaying an already-recorded event id returns its original
    /// window with no state change. A persistence failure degrades to
    /// an ephemeral single-event window sent straight to the pipeline
    /// so the observation is not dropped.
    pub async fn ingest(&self, event: ObservationEvent) -> Result<IngestOutcome> {
        let lock = self.grower_lock(&event.grower_id).await;
        let _guard = lock.lock().await;

        match db::observations::find_window_for_event(&self.db, event.event_id).await {
            Ok(Some(window_id)) => {
                debug!(
                    event_id = %event.event_id,
                    window_id = %window_id,
                    "Duplicate event id ignored"
                );
                return Ok(IngestOutcome::Duplicate { window_id });
            }
            Ok(None) => {}
            Err(e) => return self.ingest_fallback(event, e).await,
        }

        let idle_window = self.params.idle_window();
        let (mut window, opened) =
            match db::windows::find_open_window(&self.db, &event.grower_id).await {
                Ok(Some(mut open)) => {
                    open.append(event.clone(), idle_window);
                    (open, false)
                }
                Ok(None) => (EvidenceWindow::new(event.clone(), idle_window), true),
                Err(e) => return self.ingest_fallback(event, e).await,
            };

        if let Err(e) = db::observations::insert_observation(&self.db, &event, window.window_id).await
        {
            return self.ingest_fallback(event, e).await;
        }
        if let Err(e) = db::windows::save_window(&self.db, &window).await {
            return self.ingest_fallback(event, e).await;
        }

        if opened {
            info!(
                window_id = %window.window_id,
                grower_id = %window.grower_id,
                "Opened evidence window"
            );
            self.event_bus.emit_lossy(ScoutEvent::WindowOpened {
                window_id: window.window_id,
                grower_id: window.grower_id.clone(),
                expires_at: window.expires_at,
                timestamp: chrono::Utc::now(),
            });
        }

        self.event_bus.emit_lossy(ScoutEvent::ObservationIngested {
            grower_id: event.grower_id.clone(),
            event_id: event.event_id,
            window_id: window.window_id,
            window_event_count: window.event_count(),
            timestamp: chrono::Utc::now(),
        });

        // Critical severity bypasses aggregation; a full window is
        // promoted without waiting for the idle timer
        let trigger = if event.severity_hint >= self.params.critical_severity {
            Some(ReadyTrigger::CriticalBypass)
        } else if window.at_cap(self.params.event_cap) {
            Some(ReadyTrigger::EventCap)
        } else {
            None
        };

        let promoted = match trigger {
            Some(t) => self.promote_ready(&window, t).await,
            None => None,
        };

        Ok(IngestOutcome::Accepted {
            window_id: window.window_id,
            event_count: window.event_count(),
            ready_trigger: promoted,
        })
    }

    /// Promote a stored window open->ready and enqueue it
    ///
    /// Returns the trigger if this call won the promotion. Losing the
    /// swap means another worker already promoted the window.
    async fn promote_ready(
        &self,
        window: &EvidenceWindow,
        trigger: ReadyTrigger,
    ) -> Option<ReadyTrigger> {
        match db::windows::mark_ready(&self.db, window.window_id, trigger).await {
            Ok(true) => {
                info!(
                    window_id = %window.window_id,
                    grower_id = %window.grower_id,
                    trigger = %trigger,
                    event_count = window.event_count(),
                    "Window ready"
                );
                self.event_bus.emit_lossy(ScoutEvent::WindowReady {
                    window_id: window.window_id,
                    grower_id: window.grower_id.clone(),
                    trigger,
                    event_count: window.event_count(),
                    timestamp: chrono::Utc::now(),
                });
                if self
                    .ready_tx
                    .send(ReadyWindow::Stored(window.window_id))
                    .await
                    .is_err()
                {
                    warn!(
                        window_id = %window.window_id,
                        "Pipeline channel closed, window will be recovered at next startup"
                    );
                }
                Some(trigger)
            }
            Ok(false) => {
                debug!(
                    window_id = %window.window_id,
                    "Window already promoted by another worker"
                );
                None
            }
            Err(e) => {
                // The window stays open; the sweeper will promote it
                // once its idle timer expires
                warn!(
                    window_id = %window.window_id,
                    error = %e,
                    "Failed to promote window, leaving open for sweeper"
                );
                self.event_bus.emit_lossy(ScoutEvent::DatabaseError {
                    operation: "mark_ready".to_string(),
                    error: e.to_string(),
                    timestamp: chrono::Utc::now(),
                });
                None
            }
        }
    }

    /// Degraded path when persistence fails
    ///
    /// The event becomes its own ready window, handed to the pipeline
    /// in memory. The observation is analyzed but idempotence and
    /// aggregation guarantees are suspended until the store recovers.
    async fn ingest_fallback(
        &self,
        event: ObservationEvent,
        error: cropscout_common::Error,
    ) -> Result<IngestOutcome> {
        warn!(
            grower_id = %event.grower_id,
            event_id = %event.event_id,
            error = %error,
            "Persistence failed, processing event as ephemeral single-event window"
        );
        self.event_bus.emit_lossy(ScoutEvent::IngestFallback {
            grower_id: event.grower_id.clone(),
            event_id: event.event_id,
            error: error.to_string(),
            timestamp: chrono::Utc::now(),
        });

        let trigger = if event.severity_hint >= self.params.critical_severity {
            ReadyTrigger::CriticalBypass
        } else {
            ReadyTrigger::IdleExpiry
        };

        let mut window = EvidenceWindow::new(event, self.params.idle_window());
        window.mark_ready(trigger);

        self.event_bus.emit_lossy(ScoutEvent::WindowReady {
            window_id: window.window_id,
            grower_id: window.grower_id.clone(),
            trigger,
            event_count: 1,
            timestamp: chrono::Utc::now(),
        });

        let window_id = window.window_id;
        if self
            .ready_tx
            .send(ReadyWindow::Ephemeral(Box::new(window)))
            .await
            .is_err()
        {
            warn!(
                window_id = %window_id,
                "Pipeline channel closed, ephemeral window dropped"
            );
        }

        Ok(IngestOutcome::Fallback { window_id })
    }

    async fn grower_lock(&self, grower_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.grower_locks.write().await;
        locks
            .entry(grower_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
