//! Window inspection endpoints

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use cropscout_common::events::ReadyTrigger;
use serde::Serialize;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::models::{EvidenceWindow, WindowStatus};
use crate::AppState;

/// Window view returned by the inspection endpoints
///
/// Events are summarized as a count; the raw payloads stay internal.
#[derive(Debug, Serialize)]
pub struct WindowResponse {
    pub window_id: Uuid,
    pub grower_id: String,
    pub status: WindowStatus,
    pub event_count: u32,
    pub opened_at: DateTime<Utc>,
    pub last_event_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub bypass_triggered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ready_trigger: Option<ReadyTrigger>,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl From<&EvidenceWindow> for WindowResponse {
    fn from(window: &EvidenceWindow) -> Self {
        Self {
            window_id: window.window_id,
            grower_id: window.grower_id.clone(),
            status: window.status,
            event_count: window.event_count(),
            opened_at: window.opened_at,
            last_event_at: window.last_event_at,
            expires_at: window.expires_at,
            bypass_triggered: window.bypass_triggered,
            ready_trigger: window.ready_trigger,
            attempts: window.attempts,
            last_error: window.last_error.clone(),
        }
    }
}

/// GET /windows/:window_id
pub async fn get_window(
    State(state): State<AppState>,
    Path(window_id): Path<Uuid>,
) -> ApiResult<Json<WindowResponse>> {
    let window = crate::db::windows::load_window(&state.db, window_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Window not found: {}", window_id)))?;

    Ok(Json(WindowResponse::from(&window)))
}

/// GET /growers/:grower_id/window
///
/// The grower's currently open window, if any.
pub async fn get_open_window(
    State(state): State<AppState>,
    Path(grower_id): Path<String>,
) -> ApiResult<Json<WindowResponse>> {
    let window = crate::db::windows::find_open_window(&state.db, &grower_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("No open window for grower: {}", grower_id)))?;

    Ok(Json(WindowResponse::from(&window)))
}

/// GET /windows/needs-attention
///
/// Windows parked as failed after exhausting analysis attempts. These
/// require an operator decision; the engine never retries them on its
/// own.
pub async fn list_needs_attention(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<WindowResponse>>> {
    let windows = crate::db::windows::needs_attention(&state.db).await?;
    Ok(Json(windows.iter().map(WindowResponse::from).collect()))
}

/// Build window inspection routes
pub fn window_routes() -> Router<AppState> {
    Router::new()
        .route("/windows/needs-attention", get(list_needs_attention))
        .route("/windows/:window_id", get(get_window))
        .route("/growers/:grower_id/window", get(get_open_window))
}
