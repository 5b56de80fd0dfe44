//! Idle-expiry sweeper
//!
//! Periodically promotes open windows whose idle timer has run out.
//! Promotion goes through the same compare-and-swap as the ingest
//! path, so a window racing between sweep and a cap or bypass ingest
//! is enqueued exactly once.

use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use cropscout_common::{EventBus, ReadyTrigger, ScoutEvent};

use crate::db;
use crate::models::EngineParams;
use crate::services::pipeline::ReadyWindow;

pub struct ExpirySweeper {
    db: SqlitePool,
    event_bus: Arc<EventBus>,
    params: EngineParams,
    ready_tx: mpsc::Sender<ReadyWindow>,
    shutdown: CancellationToken,
}

impl ExpirySweeper {
    pub fn new(
        db: SqlitePool,
        event_bus: Arc<EventBus>,
        params: EngineParams,
        ready_tx: mpsc::Sender<ReadyWindow>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            db,
            event_bus,
            params,
            ready_tx,
            shutdown,
        }
    }

    /// Run the sweep loop until shutdown
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.params.sweep_interval());
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            info!(
                interval_seconds = self.params.sweep_interval_seconds,
                "Expiry sweeper started"
            );

            loop {
                tokio::select! {
                    _ = self.shutdown.cancelled() => {
                        info!("Expiry sweeper stopped");
                        return;
                    }
                    _ = ticker.tick() => {
                        self.sweep().await;
                    }
                }
            }
        })
    }

    /// One sweep pass: promote every open window past its expiry
    pub async fn sweep(&self) {
        let now = chrono::Utc::now();
        let expired = match db::windows::expired_open_windows(&self.db, now).await {
            Ok(expired) => expired,
            Err(e) => {
                warn!(error = %e, "Failed to query expired windows");
                self.event_bus.emit_lossy(ScoutEvent::DatabaseError {
                    operation: "expired_open_windows".to_string(),
                    error: e.to_string(),
                    timestamp: now,
                });
                return;
            }
        };

        for (window_id, grower_id) in expired {
            match db::windows::mark_ready(&self.db, window_id, ReadyTrigger::IdleExpiry).await {
                Ok(true) => {
                    let event_count = match db::windows::load_window(&self.db, window_id).await {
                        Ok(Some(window)) => window.event_count(),
                        _ => 0,
                    };
                    info!(
                        window_id = %window_id,
                        grower_id = %grower_id,
                        event_count = event_count,
                        "Idle window ready"
                    );
                    self.event_bus.emit_lossy(ScoutEvent::WindowReady {
                        window_id,
                        grower_id,
                        trigger: ReadyTrigger::IdleExpiry,
                        event_count,
                        timestamp: chrono::Utc::now(),
                    });
                    if self
                        .ready_tx
                        .send(ReadyWindow::Stored(window_id))
                        .await
                        .is_err()
                    {
                        warn!("Pipeline channel closed, stopping sweep pass");
                        return;
                    }
                }
                Ok(false) => {
                    debug!(window_id = %window_id, "Window already promoted");
                }
                Err(e) => {
                    warn!(window_id = %window_id, error = %e, "Failed to promote expired window");
                    self.event_bus.emit_lossy(ScoutEvent::DatabaseError {
                        operation: "mark_ready".to_string(),
                        error: e.to_string(),
                        timestamp: chrono::Utc::now(),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EvidenceWindow, ObservationEvent, WindowStatus};
    use serde_json::json;

    async fn test_sweeper() -> (
        ExpirySweeper,
        mpsc::Receiver<ReadyWindow>,
        SqlitePool,
        tempfile::TempDir,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let pool = db::init_database_pool(&dir.path().join("test.db"))
            .await
            .unwrap();
        let (ready_tx, ready_rx) = mpsc::channel(16);
        let sweeper = ExpirySweeper::new(
            pool.clone(),
            Arc::new(EventBus::new(64)),
            EngineParams::default(),
            ready_tx,
            CancellationToken::new(),
        );
        (sweeper, ready_rx, pool, dir)
    }

    fn stale_window(grower_id: &str, idle_minutes: i64) -> EvidenceWindow {
        let mut event = ObservationEvent::new(grower_id.to_string(), 0.4, json!({}));
        event.observed_at = chrono::Utc::now() - chrono::Duration::minutes(idle_minutes);
        EvidenceWindow::new(event, chrono::Duration::minutes(30))
    }

    /// A window idle past its expiry is promoted with the idle trigger
    #[tokio::test]
    async fn test_sweep_promotes_expired_window() {
        let (sweeper, mut rx, pool, _dir) = test_sweeper().await;

        let window = stale_window("G-1", 45);
        db::windows::save_window(&pool, &window).await.unwrap();
        db::observations::insert_observation(&pool, &window.events[0], window.window_id)
            .await
            .unwrap();

        sweeper.sweep().await;

        let stored = db::windows::load_window(&pool, window.window_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, WindowStatus::Ready);
        assert_eq!(stored.ready_trigger, Some(ReadyTrigger::IdleExpiry));

        match rx.try_recv().unwrap() {
            ReadyWindow::Stored(id) => assert_eq!(id, window.window_id),
            other => panic!("expected Stored, got {:?}", other),
        }
    }

    /// Windows still inside their idle window are left alone
    #[tokio::test]
    async fn test_sweep_ignores_active_window() {
        let (sweeper, mut rx, pool, _dir) = test_sweeper().await;

        let window = stale_window("G-1", 10);
        db::windows::save_window(&pool, &window).await.unwrap();

        sweeper.sweep().await;

        let stored = db::windows::load_window(&pool, window.window_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, WindowStatus::Open);
        assert!(rx.try_recv().is_err());
    }

    /// A window promoted elsewhere is not re-enqueued by the sweep
    #[tokio::test]
    async fn test_sweep_skips_already_ready_window() {
        let (sweeper, mut rx, pool, _dir) = test_sweeper().await;

        let window = stale_window("G-1", 45);
        db::windows::save_window(&pool, &window).await.unwrap();
        db::windows::mark_ready(&pool, window.window_id, ReadyTrigger::EventCap)
            .await
            .unwrap();

        sweeper.sweep().await;

        let stored = db::windows::load_window(&pool, window.window_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.ready_trigger, Some(ReadyTrigger::EventCap));
        assert!(rx.try_recv().is_err());
    }
}
