//! Observation ingest endpoint

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::models::{severity_from_quality_percent, ObservationEvent};
use crate::services::IngestOutcome;
use crate::AppState;

/// POST /observations request
#[derive(Debug, Deserialize)]
pub struct SubmitObservationRequest {
    pub grower_id: String,
    /// Idempotency key; generated when absent
    pub event_id: Option<Uuid>,
    /// Observation timestamp; now when absent
    pub observed_at: Option<DateTime<Utc>>,
    /// Normalized severity in [0, 1]
    pub severity_hint: Option<f64>,
    /// Batch quality percentage (100 = perfect), used when no
    /// severity_hint is given
    pub quality_percent: Option<f64>,
    /// Opaque evidence blob (image references, measurements)
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// POST /observations response
#[derive(Debug, Serialize)]
pub struct SubmitObservationResponse {
    pub event_id: Uuid,
    #[serde(flatten)]
    pub outcome: IngestOutcome,
}

/// POST /observations
///
/// Accept one observation event into the grower's evidence window.
/// Returns 202 Accepted; diagnosis happens asynchronously and is
/// announced over SSE.
pub async fn submit_observation(
    State(state): State<AppState>,
    Json(request): Json<SubmitObservationRequest>,
) -> ApiResult<(StatusCode, Json<SubmitObservationResponse>)> {
    if request.grower_id.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "grower_id must not be empty".to_string(),
        ));
    }

    let severity_hint = match (request.severity_hint, request.quality_percent) {
        (Some(severity), _) => {
            if !(0.0..=1.0).contains(&severity) {
                return Err(ApiError::BadRequest(format!(
                    "severity_hint must be in [0, 1], got {}",
                    severity
                )));
            }
            severity
        }
        (None, Some(percent)) => {
            if !(0.0..=100.0).contains(&percent) {
                return Err(ApiError::BadRequest(format!(
                    "quality_percent must be in [0, 100], got {}",
                    percent
                )));
            }
            severity_from_quality_percent(percent)
        }
        (None, None) => {
            return Err(ApiError::BadRequest(
                "one of severity_hint or quality_percent is required".to_string(),
            ))
        }
    };

    let event = ObservationEvent {
        event_id: request.event_id.unwrap_or_else(Uuid::new_v4),
        grower_id: request.grower_id,
        observed_at: request.observed_at.unwrap_or_else(Utc::now),
        severity_hint,
        payload: request.payload,
    };
    let event_id = event.event_id;

    let outcome = state.aggregation.ingest(event).await?;

    tracing::debug!(
        event_id = %event_id,
        window_id = %outcome.window_id(),
        "Observation accepted"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitObservationResponse { event_id, outcome }),
    ))
}

/// Build observation routes
pub fn observation_routes() -> Router<AppState> {
    Router::new().route("/observations", post(submit_observation))
}
