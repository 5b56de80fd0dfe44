//! Observation event model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One quality signal for one grower at one point in time
///
/// Immutable once created. Produced by an upstream collector, consumed
/// exactly once by the aggregation engine (idempotent on `event_id`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservationEvent {
    /// Idempotency key assigned by the collector
    pub event_id: Uuid,

    /// Grower the observation belongs to
    pub grower_id: String,

    /// When the observation was made
    pub observed_at: DateTime<Utc>,

    /// Normalized severity in [0, 1]
    pub severity_hint: f64,

    /// Opaque evidence blob (image references, measurements)
    pub payload: serde_json::Value,
}

impl ObservationEvent {
    /// Create a new observation with a fresh idempotency key
    pub fn new(grower_id: String, severity_hint: f64, payload: serde_json::Value) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            grower_id,
            observed_at: Utc::now(),
            severity_hint: severity_hint.clamp(0.0, 1.0),
            payload,
        }
    }
}

/// Derive a severity hint from a quality percentage (100 = perfect)
///
/// Collectors report batch quality as a percentage; severity is the
/// normalized complement, clamped to [0, 1].
pub fn severity_from_quality_percent(percent: f64) -> f64 {
    ((100.0 - percent) / 100.0).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Quality 100% maps to severity 0, quality 0% to severity 1
    #[test]
    fn test_severity_from_quality_percent_bounds() {
        assert_eq!(severity_from_quality_percent(100.0), 0.0);
        assert_eq!(severity_from_quality_percent(0.0), 1.0);
        assert_eq!(severity_from_quality_percent(75.0), 0.25);
    }

    /// Out-of-range quality percentages are clamped
    #[test]
    fn test_severity_from_quality_percent_clamps() {
        assert_eq!(severity_from_quality_percent(150.0), 0.0);
        assert_eq!(severity_from_quality_percent(-20.0), 1.0);
    }

    /// Constructor clamps severity hints into [0, 1]
    #[test]
    fn test_new_clamps_severity() {
        let event = ObservationEvent::new("G-1".to_string(), 1.7, serde_json::json!({}));
        assert_eq!(event.severity_hint, 1.0);

        let event = ObservationEvent::new("G-1".to_string(), -0.3, serde_json::json!({}));
        assert_eq!(event.severity_hint, 0.0);
    }
}
