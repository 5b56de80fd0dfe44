//! Settings table access
//!
//! Engine parameters carry compiled defaults; any key present in the
//! settings table overrides its default at startup.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::models::EngineParams;

/// Load engine parameters from the settings table
///
/// Returns defaults for any key not set in the database.
pub async fn load_engine_params(pool: &SqlitePool) -> Result<EngineParams> {
    let mut params = EngineParams::default();
    let mut loaded_count = 0;

    if let Some(val) = get_setting_i64(pool, "te_idle_window_seconds").await? {
        params.idle_window_seconds = val;
        loaded_count += 1;
    }
    if let Some(val) = get_setting_u32(pool, "te_event_cap").await? {
        params.event_cap = val;
        loaded_count += 1;
    }
    if let Some(val) = get_setting_f64(pool, "te_critical_severity").await? {
        params.critical_severity = val;
        loaded_count += 1;
    }
    if let Some(val) = get_setting_u64(pool, "te_sweep_interval_seconds").await? {
        params.sweep_interval_seconds = val;
        loaded_count += 1;
    }
    if let Some(val) = get_setting_f64(pool, "te_accept_threshold").await? {
        params.accept_threshold = val;
        loaded_count += 1;
    }
    if let Some(val) = get_setting_f64(pool, "te_review_threshold").await? {
        params.review_threshold = val;
        loaded_count += 1;
    }
    if let Some(val) = get_setting_u64(pool, "te_classifier_timeout_seconds").await? {
        params.classifier_timeout_seconds = val;
        loaded_count += 1;
    }
    if let Some(val) = get_setting_u64(pool, "te_analyzer_timeout_seconds").await? {
        params.analyzer_timeout_seconds = val;
        loaded_count += 1;
    }
    if let Some(val) = get_setting_u32(pool, "te_analyzer_retries").await? {
        params.analyzer_retries = val;
        loaded_count += 1;
    }
    if let Some(val) = get_setting_u64(pool, "te_analyzer_backoff_ms").await? {
        params.analyzer_backoff_ms = val;
        loaded_count += 1;
    }
    if let Some(val) = get_setting_u64(pool, "te_window_concurrency").await? {
        params.window_concurrency = val as usize;
        loaded_count += 1;
    }
    if let Some(val) = get_setting_u64(pool, "te_global_concurrency").await? {
        params.global_concurrency = val as usize;
        loaded_count += 1;
    }
    if let Some(val) = get_setting_u32(pool, "te_window_retries").await? {
        params.window_retries = val;
        loaded_count += 1;
    }
    if let Some(val) = get_setting_u64(pool, "te_window_retry_backoff_ms").await? {
        params.window_retry_backoff_ms = val;
        loaded_count += 1;
    }
    if let Some(val) = get_setting_u32(pool, "te_emit_retries").await? {
        params.emit_retries = val;
        loaded_count += 1;
    }
    if let Some(val) = get_setting_u64(pool, "te_emit_retry_ms").await? {
        params.emit_retry_ms = val;
        loaded_count += 1;
    }
    if let Some(val) = get_setting_u32(pool, "te_retrieval_top_k").await? {
        params.retrieval_top_k = val;
        loaded_count += 1;
    }
    if let Some(val) = get_setting_f64(pool, "te_retrieval_min_similarity").await? {
        params.retrieval_min_similarity = val;
        loaded_count += 1;
    }
    if let Some(val) = get_setting_f64(pool, "te_merge_similarity").await? {
        params.merge_similarity = val;
        loaded_count += 1;
    }

    tracing::info!(
        "Loaded {} engine parameter overrides from database",
        loaded_count
    );
    Ok(params)
}

/// Read a raw setting value
pub async fn get_setting(pool: &SqlitePool, key: &str) -> Result<Option<String>> {
    let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;

    Ok(value)
}

/// Write a setting value (upsert)
pub async fn set_setting(pool: &SqlitePool, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO settings (key, value) VALUES (?, ?) ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await?;

    Ok(())
}

// Helper functions to get typed settings

async fn get_setting_u32(pool: &SqlitePool, key: &str) -> Result<Option<u32>> {
    match get_setting(pool, key).await? {
        Some(v) => Ok(Some(v.parse()?)),
        None => Ok(None),
    }
}

async fn get_setting_u64(pool: &SqlitePool, key: &str) -> Result<Option<u64>> {
    match get_setting(pool, key).await? {
        Some(v) => Ok(Some(v.parse()?)),
        None => Ok(None),
    }
}

async fn get_setting_i64(pool: &SqlitePool, key: &str) -> Result<Option<i64>> {
    match get_setting(pool, key).await? {
        Some(v) => Ok(Some(v.parse()?)),
        None => Ok(None),
    }
}

async fn get_setting_f64(pool: &SqlitePool, key: &str) -> Result<Option<f64>> {
    match get_setting(pool, key).await? {
        Some(v) => Ok(Some(v.parse()?)),
        None => Ok(None),
    }
}
