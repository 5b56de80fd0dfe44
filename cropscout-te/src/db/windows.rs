//! Evidence window persistence and state transitions
//!
//! The open→ready transition is a conditional UPDATE so that live
//! ingestion and the background sweep cannot both enqueue the same
//! window.

use cropscout_common::events::ReadyTrigger;
use cropscout_common::Result;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::db::observations::load_window_events;
use crate::models::{EvidenceWindow, WindowStatus};
use crate::utils::retry_on_lock;

/// Save a window row to the database (observations are stored separately)
///
/// Uses retry_on_lock to handle transient database lock contention.
pub async fn save_window(pool: &SqlitePool, window: &EvidenceWindow) -> Result<()> {
    // Prepare all data BEFORE acquiring database connection
    let window_id = window.window_id.to_string();
    let grower_id = window.grower_id.clone();
    let status = window.status.as_str();
    let opened_at = window.opened_at.to_rfc3339();
    let last_event_at = window.last_event_at.to_rfc3339();
    let expires_at = window.expires_at.to_rfc3339();
    let bypass_triggered = window.bypass_triggered as i64;
    let ready_trigger = window.ready_trigger.map(|t| t.to_string());
    let attempts = window.attempts as i64;
    let last_error = window.last_error.clone();

    let max_wait_ms = max_lock_wait_ms(pool).await?;

    retry_on_lock("save_window", max_wait_ms, || async {
        sqlx::query(
            r#"
            INSERT INTO evidence_windows (
                window_id, grower_id, status, opened_at, last_event_at,
                expires_at, bypass_triggered, ready_trigger, attempts, last_error
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(window_id) DO UPDATE SET
                status = excluded.status,
                last_event_at = excluded.last_event_at,
                expires_at = excluded.expires_at,
                bypass_triggered = excluded.bypass_triggered,
                ready_trigger = excluded.ready_trigger,
                attempts = excluded.attempts,
                last_error = excluded.last_error
            "#,
        )
        .bind(&window_id)
        .bind(&grower_id)
        .bind(status)
        .bind(&opened_at)
        .bind(&last_event_at)
        .bind(&expires_at)
        .bind(bypass_triggered)
        .bind(&ready_trigger)
        .bind(attempts)
        .bind(&last_error)
        .execute(pool)
        .await
        .map_err(cropscout_common::Error::Database)?;

        Ok(())
    })
    .await
}

/// Load a window with its observations
pub async fn load_window(pool: &SqlitePool, window_id: Uuid) -> Result<Option<EvidenceWindow>> {
    let row = sqlx::query(
        r#"
        SELECT window_id, grower_id, status, opened_at, last_event_at,
               expires_at, bypass_triggered, ready_trigger, attempts, last_error
        FROM evidence_windows
        WHERE window_id = ?
        "#,
    )
    .bind(window_id.to_string())
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => Ok(Some(window_from_row(pool, row).await?)),
        None => Ok(None),
    }
}

/// The grower's open window, if one exists
pub async fn find_open_window(
    pool: &SqlitePool,
    grower_id: &str,
) -> Result<Option<EvidenceWindow>> {
    let row = sqlx::query(
        r#"
        SELECT window_id, grower_id, status, opened_at, last_event_at,
               expires_at, bypass_triggered, ready_trigger, attempts, last_error
        FROM evidence_windows
        WHERE grower_id = ? AND status = 'open'
        "#,
    )
    .bind(grower_id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => Ok(Some(window_from_row(pool, row).await?)),
        None => Ok(None),
    }
}

/// Atomically transition a window open→ready
///
/// Exactly one caller wins when ingestion and the sweep race; the loser
/// sees false and must not enqueue the window.
pub async fn mark_ready(
    pool: &SqlitePool,
    window_id: Uuid,
    trigger: ReadyTrigger,
) -> Result<bool> {
    let bypass = (trigger == ReadyTrigger::CriticalBypass) as i64;

    let result = sqlx::query(
        r#"
        UPDATE evidence_windows
        SET status = 'ready',
            ready_trigger = ?,
            bypass_triggered = CASE WHEN ? = 1 THEN 1 ELSE bypass_triggered END
        WHERE window_id = ? AND status = 'open'
        "#,
    )
    .bind(trigger.to_string())
    .bind(bypass)
    .bind(window_id.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Atomically transition a window ready→triaged after publication
pub async fn complete_window(pool: &SqlitePool, window_id: Uuid) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE evidence_windows SET status = 'triaged' WHERE window_id = ? AND status = 'ready'",
    )
    .bind(window_id.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Atomically transition a window ready→failed after exhausting retries
pub async fn fail_window(
    pool: &SqlitePool,
    window_id: Uuid,
    attempts: u32,
    error: &str,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE evidence_windows
        SET status = 'failed', attempts = ?, last_error = ?
        WHERE window_id = ? AND status = 'ready'
        "#,
    )
    .bind(attempts as i64)
    .bind(error)
    .bind(window_id.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Record a whole-window analysis attempt that will be retried
pub async fn record_attempt(
    pool: &SqlitePool,
    window_id: Uuid,
    attempts: u32,
    error: &str,
) -> Result<()> {
    sqlx::query("UPDATE evidence_windows SET attempts = ?, last_error = ? WHERE window_id = ?")
        .bind(attempts as i64)
        .bind(error)
        .bind(window_id.to_string())
        .execute(pool)
        .await?;

    Ok(())
}

/// Open windows whose idle deadline has passed
///
/// Returns (window_id, grower_id) pairs; the sweep still has to win the
/// open→ready transition for each before enqueueing.
pub async fn expired_open_windows(
    pool: &SqlitePool,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<Vec<(Uuid, String)>> {
    let rows = sqlx::query(
        r#"
        SELECT window_id, grower_id
        FROM evidence_windows
        WHERE status = 'open' AND expires_at <= ?
        "#,
    )
    .bind(now.to_rfc3339())
    .fetch_all(pool)
    .await?;

    let mut expired = Vec::with_capacity(rows.len());
    for row in rows {
        let window_id_str: String = row.get("window_id");
        let window_id = Uuid::parse_str(&window_id_str).map_err(|e| {
            cropscout_common::Error::Internal(format!("Failed to parse window_id: {}", e))
        })?;
        expired.push((window_id, row.get("grower_id")));
    }

    Ok(expired)
}

/// Ready windows with no published diagnosis, for startup recovery
///
/// A crash between readiness and publication leaves windows here; they
/// are re-enqueued when the engine restarts.
pub async fn pending_ready_windows(pool: &SqlitePool) -> Result<Vec<Uuid>> {
    let rows = sqlx::query(
        r#"
        SELECT w.window_id
        FROM evidence_windows w
        LEFT JOIN diagnoses d ON d.window_id = w.window_id
        WHERE w.status = 'ready' AND d.window_id IS NULL
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut pending = Vec::with_capacity(rows.len());
    for row in rows {
        let window_id_str: String = row.get("window_id");
        let window_id = Uuid::parse_str(&window_id_str).map_err(|e| {
            cropscout_common::Error::Internal(format!("Failed to parse window_id: {}", e))
        })?;
        pending.push(window_id);
    }

    Ok(pending)
}

/// Failed windows awaiting human attention, most recent first
pub async fn needs_attention(pool: &SqlitePool) -> Result<Vec<EvidenceWindow>> {
    let rows = sqlx::query(
        r#"
        SELECT window_id, grower_id, status, opened_at, last_event_at,
               expires_at, bypass_triggered, ready_trigger, attempts, last_error
        FROM evidence_windows
        WHERE status = 'failed'
        ORDER BY last_event_at DESC
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut windows = Vec::with_capacity(rows.len());
    for row in rows {
        windows.push(window_from_row(pool, row).await?);
    }

    Ok(windows)
}

/// Parse a window row and attach its observations
async fn window_from_row(pool: &SqlitePool, row: sqlx::sqlite::SqliteRow) -> Result<EvidenceWindow> {
    let window_id_str: String = row.get("window_id");
    let window_id = Uuid::parse_str(&window_id_str).map_err(|e| {
        cropscout_common::Error::Internal(format!("Failed to parse window_id: {}", e))
    })?;

    let status_str: String = row.get("status");
    let status = WindowStatus::parse(&status_str).ok_or_else(|| {
        cropscout_common::Error::Internal(format!("Unknown window status: {}", status_str))
    })?;

    let opened_at = parse_utc(row.get("opened_at"), "opened_at")?;
    let last_event_at = parse_utc(row.get("last_event_at"), "last_event_at")?;
    let expires_at = parse_utc(row.get("expires_at"), "expires_at")?;

    let ready_trigger: Option<String> = row.get("ready_trigger");
    let ready_trigger = match ready_trigger.as_deref() {
        Some("idle_expiry") => Some(ReadyTrigger::IdleExpiry),
        Some("event_cap") => Some(ReadyTrigger::EventCap),
        Some("critical_bypass") => Some(ReadyTrigger::CriticalBypass),
        Some(other) => {
            return Err(cropscout_common::Error::Internal(format!(
                "Unknown ready trigger: {}",
                other
            )))
        }
        None => None,
    };

    let events = load_window_events(pool, window_id).await?;

    Ok(EvidenceWindow {
        window_id,
        grower_id: row.get("grower_id"),
        status,
        events,
        opened_at,
        last_event_at,
        expires_at,
        bypass_triggered: row.get::<i64, _>("bypass_triggered") != 0,
        ready_trigger,
        attempts: row.get::<i64, _>("attempts") as u32,
        last_error: row.get("last_error"),
    })
}

fn parse_utc(value: String, field: &str) -> Result<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(&value)
        .map_err(|e| {
            cropscout_common::Error::Internal(format!("Failed to parse {}: {}", field, e))
        })
        .map(|dt| dt.with_timezone(&chrono::Utc))
}

/// Max lock wait time from settings (default 5000ms)
async fn max_lock_wait_ms(pool: &SqlitePool) -> Result<u64> {
    let max_wait_ms: i64 = sqlx::query_scalar(
        "SELECT CAST(value AS INTEGER) FROM settings WHERE key = 'te_database_max_lock_wait_ms'",
    )
    .fetch_optional(pool)
    .await?
    .unwrap_or(5000);

    Ok(max_wait_ms.max(0) as u64)
}
