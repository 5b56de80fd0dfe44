//! Diagnosis persistence
//!
//! The UNIQUE constraint on window_id is the exactly-once boundary:
//! whichever publisher wins the insert owns emission, every other
//! attempt is a duplicate no-op.

use cropscout_common::Result;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::{AnalyzerFinding, Diagnosis, TriageDecision};

/// Insert a diagnosis if its window has none yet
///
/// Returns true if this call published the diagnosis, false if a
/// diagnosis for the window already existed.
pub async fn insert_diagnosis(pool: &SqlitePool, diagnosis: &Diagnosis) -> Result<bool> {
    // Prepare all data BEFORE acquiring database connection
    let diagnosis_id = diagnosis.diagnosis_id.to_string();
    let window_id = diagnosis.window_id.to_string();
    let grower_id = diagnosis.grower_id.clone();
    let source_event_ids = serde_json::to_string(&diagnosis.source_event_ids).map_err(|e| {
        cropscout_common::Error::Internal(format!("Failed to serialize source_event_ids: {}", e))
    })?;
    let triage = serde_json::to_string(&diagnosis.triage).map_err(|e| {
        cropscout_common::Error::Internal(format!("Failed to serialize triage: {}", e))
    })?;
    let findings = serde_json::to_string(&diagnosis.findings).map_err(|e| {
        cropscout_common::Error::Internal(format!("Failed to serialize findings: {}", e))
    })?;
    let created_at = diagnosis.created_at.to_rfc3339();

    let result = sqlx::query(
        r#"
        INSERT INTO diagnoses (
            diagnosis_id, window_id, grower_id, source_event_ids,
            triage, findings, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(window_id) DO NOTHING
        "#,
    )
    .bind(&diagnosis_id)
    .bind(&window_id)
    .bind(&grower_id)
    .bind(&source_event_ids)
    .bind(&triage)
    .bind(&findings)
    .bind(&created_at)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Load a diagnosis by its identifier
pub async fn load_diagnosis(pool: &SqlitePool, diagnosis_id: Uuid) -> Result<Option<Diagnosis>> {
    let row = sqlx::query(
        r#"
        SELECT diagnosis_id, window_id, grower_id, source_event_ids,
               triage, findings, created_at
        FROM diagnoses
        WHERE diagnosis_id = ?
        "#,
    )
    .bind(diagnosis_id.to_string())
    .fetch_optional(pool)
    .await?;

    row.map(diagnosis_from_row).transpose()
}

/// Load the diagnosis published for a window, if any
pub async fn find_diagnosis_for_window(
    pool: &SqlitePool,
    window_id: Uuid,
) -> Result<Option<Diagnosis>> {
    let row = sqlx::query(
        r#"
        SELECT diagnosis_id, window_id, grower_id, source_event_ids,
               triage, findings, created_at
        FROM diagnoses
        WHERE window_id = ?
        "#,
    )
    .bind(window_id.to_string())
    .fetch_optional(pool)
    .await?;

    row.map(diagnosis_from_row).transpose()
}

fn diagnosis_from_row(row: sqlx::sqlite::SqliteRow) -> Result<Diagnosis> {
    let diagnosis_id_str: String = row.get("diagnosis_id");
    let diagnosis_id = Uuid::parse_str(&diagnosis_id_str).map_err(|e| {
        cropscout_common::Error::Internal(format!("Failed to parse diagnosis_id: {}", e))
    })?;

    let window_id_str: String = row.get("window_id");
    let window_id = Uuid::parse_str(&window_id_str).map_err(|e| {
        cropscout_common::Error::Internal(format!("Failed to parse window_id: {}", e))
    })?;

    let source_event_ids: String = row.get("source_event_ids");
    let source_event_ids: Vec<Uuid> = serde_json::from_str(&source_event_ids).map_err(|e| {
        cropscout_common::Error::Internal(format!("Failed to deserialize source_event_ids: {}", e))
    })?;

    let triage: String = row.get("triage");
    let triage: TriageDecision = serde_json::from_str(&triage).map_err(|e| {
        cropscout_common::Error::Internal(format!("Failed to deserialize triage: {}", e))
    })?;

    let findings: String = row.get("findings");
    let findings: Vec<AnalyzerFinding> = serde_json::from_str(&findings).map_err(|e| {
        cropscout_common::Error::Internal(format!("Failed to deserialize findings: {}", e))
    })?;

    let created_at: String = row.get("created_at");
    let created_at = chrono::DateTime::parse_from_rfc3339(&created_at)
        .map_err(|e| {
            cropscout_common::Error::Internal(format!("Failed to parse created_at: {}", e))
        })?
        .with_timezone(&chrono::Utc);

    Ok(Diagnosis {
        diagnosis_id,
        window_id,
        grower_id: row.get("grower_id"),
        source_event_ids,
        triage,
        findings,
        created_at,
    })
}
