//! Observation persistence
//!
//! Observations are keyed by their collector-assigned event_id, so
//! duplicate delivery is absorbed at the insert.

use cropscout_common::Result;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::ObservationEvent;

/// Insert an observation into a window
///
/// Returns true if the observation was newly inserted, false if this
/// event_id was already stored (duplicate delivery).
pub async fn insert_observation(
    pool: &SqlitePool,
    event: &ObservationEvent,
    window_id: Uuid,
) -> Result<bool> {
    let payload = serde_json::to_string(&event.payload).map_err(|e| {
        cropscout_common::Error::Internal(format!("Failed to serialize payload: {}", e))
    })?;

    let result = sqlx::query(
        r#"
        INSERT INTO observations (
            event_id, grower_id, window_id, observed_at, severity_hint, payload
        ) VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(event_id) DO NOTHING
        "#,
    )
    .bind(event.event_id.to_string())
    .bind(&event.grower_id)
    .bind(window_id.to_string())
    .bind(event.observed_at.to_rfc3339())
    .bind(event.severity_hint)
    .bind(&payload)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Window an already-stored observation belongs to, if any
pub async fn find_window_for_event(pool: &SqlitePool, event_id: Uuid) -> Result<Option<Uuid>> {
    let window_id: Option<String> =
        sqlx::query_scalar("SELECT window_id FROM observations WHERE event_id = ?")
            .bind(event_id.to_string())
            .fetch_optional(pool)
            .await?;

    window_id
        .map(|s| {
            Uuid::parse_str(&s).map_err(|e| {
                cropscout_common::Error::Internal(format!("Failed to parse window_id: {}", e))
            })
        })
        .transpose()
}

/// Load a window's observations in insertion order
pub async fn load_window_events(
    pool: &SqlitePool,
    window_id: Uuid,
) -> Result<Vec<ObservationEvent>> {
    let rows = sqlx::query(
        r#"
        SELECT event_id, grower_id, observed_at, severity_hint, payload
        FROM observations
        WHERE window_id = ?
        ORDER BY rowid
        "#,
    )
    .bind(window_id.to_string())
    .fetch_all(pool)
    .await?;

    let mut events = Vec::with_capacity(rows.len());
    for row in rows {
        let event_id_str: String = row.get("event_id");
        let event_id = Uuid::parse_str(&event_id_str).map_err(|e| {
            cropscout_common::Error::Internal(format!("Failed to parse event_id: {}", e))
        })?;

        let observed_at: String = row.get("observed_at");
        let observed_at = chrono::DateTime::parse_from_rfc3339(&observed_at)
            .map_err(|e| {
                cropscout_common::Error::Internal(format!("Failed to parse observed_at: {}", e))
            })?
            .with_timezone(&chrono::Utc);

        let payload: String = row.get("payload");
        let payload: serde_json::Value = serde_json::from_str(&payload).map_err(|e| {
            cropscout_common::Error::Internal(format!("Failed to deserialize payload: {}", e))
        })?;

        events.push(ObservationEvent {
            event_id,
            grower_id: row.get("grower_id"),
            observed_at,
            severity_hint: row.get("severity_hint"),
            payload,
        });
    }

    Ok(events)
}
