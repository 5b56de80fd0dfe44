//! Exactly-once diagnosis publication
//!
//! The store enforces one diagnosis per window; the insert is the
//! decider. Whichever worker lands the row first owns the downstream
//! notification, every other attempt becomes a no-op. Notification
//! delivery is retried on its own schedule and never rolls back a
//! committed diagnosis.

use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{debug, info, warn};

use cropscout_common::{EventBus, Result, ScoutEvent};

use crate::db;
use crate::models::{AnalyzerFinding, Diagnosis, EngineParams, EvidenceWindow, TriageDecision};

/// What happened to a publish attempt
#[derive(Debug)]
pub enum PublishOutcome {
    /// This attempt created the diagnosis and sent the notification
    Published(Box<Diagnosis>),
    /// Another attempt already published this window
    AlreadyPublished,
}

pub struct DiagnosisPublisher {
    db: SqlitePool,
    event_bus: Arc<EventBus>,
    params: EngineParams,
}

impl DiagnosisPublisher {
    pub fn new(db: SqlitePool, event_bus: Arc<EventBus>, params: EngineParams) -> Self {
        Self {
            db,
            event_bus,
            params,
        }
    }

    /// Assemble and publish the diagnosis for a processed window
    ///
    /// `ephemeral` windows (the ingest fallback path) bypass the store
    /// entirely; their diagnosis exists only as the notification.
    pub async fn publish(
        &self,
        window: &EvidenceWindow,
        decision: TriageDecision,
        findings: Vec<AnalyzerFinding>,
        ephemeral: bool,
    ) -> Result<PublishOutcome> {
        let diagnosis = Diagnosis {
            diagnosis_id: uuid::Uuid::new_v4(),
            window_id: window.window_id,
            grower_id: window.grower_id.clone(),
            source_event_ids: window.source_event_ids(),
            triage: decision,
            findings,
            created_at: chrono::Utc::now(),
        };

        if !ephemeral {
            let inserted = db::diagnoses::insert_diagnosis(&self.db, &diagnosis).await?;
            if !inserted {
                debug!(
                    window_id = %window.window_id,
                    "Diagnosis already published for window, skipping notification"
                );
                // The earlier publisher may have died before finishing
                // the window transition
                if let Err(e) = db::windows::complete_window(&self.db, window.window_id).await {
                    warn!(window_id = %window.window_id, error = %e, "Failed to complete window");
                }
                return Ok(PublishOutcome::AlreadyPublished);
            }
        }

        info!(
            diagnosis_id = %diagnosis.diagnosis_id,
            window_id = %window.window_id,
            grower_id = %window.grower_id,
            findings = diagnosis.findings.len(),
            flagged = diagnosis.triage.flagged_for_review,
            "Diagnosis published"
        );

        self.notify(&diagnosis).await;

        if !ephemeral {
            if let Err(e) = db::windows::complete_window(&self.db, window.window_id).await {
                // The diagnosis row already guards against reprocessing
                warn!(window_id = %window.window_id, error = %e, "Failed to complete window");
                self.event_bus.emit_lossy(ScoutEvent::DatabaseError {
                    operation: "complete_window".to_string(),
                    error: e.to_string(),
                    timestamp: chrono::Utc::now(),
                });
            }
        }

        Ok(PublishOutcome::Published(Box::new(diagnosis)))
    }

    /// Send the diagnosis-ready notification, retrying delivery
    ///
    /// Delivery fails only when nobody is subscribed; retrying gives
    /// late subscribers a chance to catch the notification before it
    /// is dropped.
    async fn notify(&self, diagnosis: &Diagnosis) {
        let summary = diagnosis.summary();
        let event = ScoutEvent::DiagnosisReady {
            diagnosis_id: summary.diagnosis_id,
            window_id: summary.window_id,
            grower_id: summary.grower_id,
            top_condition: summary.top_condition,
            top_confidence: summary.top_confidence,
            flagged_for_review: summary.flagged_for_review,
            timestamp: chrono::Utc::now(),
        };

        for attempt in 0..=self.params.emit_retries {
            if attempt > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(self.params.emit_retry_ms))
                    .await;
            }
            if self.event_bus.emit(event.clone()).is_ok() {
                if attempt > 0 {
                    debug!(
                        diagnosis_id = %diagnosis.diagnosis_id,
                        attempt = attempt + 1,
                        "Diagnosis notification delivered after retry"
                    );
                }
                return;
            }
        }

        warn!(
            diagnosis_id = %diagnosis.diagnosis_id,
            "Diagnosis notification undelivered, no subscribers"
        );
    }
}
