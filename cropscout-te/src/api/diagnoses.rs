//! Diagnosis lookup endpoints

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::models::Diagnosis;
use crate::AppState;

/// GET /diagnoses/:diagnosis_id
pub async fn get_diagnosis(
    State(state): State<AppState>,
    Path(diagnosis_id): Path<Uuid>,
) -> ApiResult<Json<Diagnosis>> {
    let diagnosis = crate::db::diagnoses::load_diagnosis(&state.db, diagnosis_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Diagnosis not found: {}", diagnosis_id)))?;

    Ok(Json(diagnosis))
}

/// GET /windows/:window_id/diagnosis
///
/// The diagnosis published for a window. 404 while the window is still
/// open or undergoing analysis.
pub async fn get_window_diagnosis(
    State(state): State<AppState>,
    Path(window_id): Path<Uuid>,
) -> ApiResult<Json<Diagnosis>> {
    let diagnosis = crate::db::diagnoses::find_diagnosis_for_window(&state.db, window_id)
        .await?
        .ok_or_else(|| {
            ApiError::NotFound(format!("No diagnosis published for window: {}", window_id))
        })?;

    Ok(Json(diagnosis))
}

/// Build diagnosis lookup routes
pub fn diagnosis_routes() -> Router<AppState> {
    Router::new()
        .route("/diagnoses/:diagnosis_id", get(get_diagnosis))
        .route("/windows/:window_id/diagnosis", get(get_window_diagnosis))
}
