//! Database access for cropscout-te
//!
//! SQLite-backed evidence store and diagnosis store. Observations,
//! windows, and diagnoses live in their own tables; the settings table
//! carries engine parameter overrides.

pub mod diagnoses;
pub mod observations;
pub mod settings;
pub mod windows;

use anyhow::Result;
use sqlx::SqlitePool;
use std::path::Path;

/// Initialize database connection pool
///
/// Connects to scout.db in the data directory, creating it on first run.
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Use proper SQLite URI with mode=rwc (read, write, create)
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;

    init_tables(&pool).await?;

    Ok(pool)
}

/// Initialize cropscout-te tables
///
/// Creates the settings, observations, evidence_windows, and diagnoses
/// tables if they don't exist. Public so test harnesses can build the
/// schema over an in-memory pool.
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    // Settings table for parameter persistence
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Observations keyed by their idempotency key; duplicate delivery
    // becomes an ignored insert
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS observations (
            event_id TEXT PRIMARY KEY,
            grower_id TEXT NOT NULL,
            window_id TEXT NOT NULL,
            observed_at TEXT NOT NULL,
            severity_hint REAL NOT NULL,
            payload TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_observations_window ON observations(window_id)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS evidence_windows (
            window_id TEXT PRIMARY KEY,
            grower_id TEXT NOT NULL,
            status TEXT NOT NULL,
            opened_at TEXT NOT NULL,
            last_event_at TEXT NOT NULL,
            expires_at TEXT NOT NULL,
            bypass_triggered INTEGER NOT NULL DEFAULT 0,
            ready_trigger TEXT,
            attempts INTEGER NOT NULL DEFAULT 0,
            last_error TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // At most one open window per grower
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_windows_one_open_per_grower
            ON evidence_windows(grower_id) WHERE status = 'open'
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_windows_status ON evidence_windows(status)",
    )
    .execute(pool)
    .await?;

    // Diagnoses are exactly-once per window via the UNIQUE constraint
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS diagnoses (
            diagnosis_id TEXT PRIMARY KEY,
            window_id TEXT NOT NULL UNIQUE,
            grower_id TEXT NOT NULL,
            source_event_ids TEXT NOT NULL,
            triage TEXT NOT NULL,
            findings TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_diagnoses_grower ON diagnoses(grower_id)")
        .execute(pool)
        .await?;

    tracing::info!(
        "Database tables initialized (settings, observations, evidence_windows, diagnoses)"
    );

    Ok(())
}
