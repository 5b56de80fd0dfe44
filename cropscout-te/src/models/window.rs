//! Evidence window state machine
//!
//! A window progresses open → ready → triaged, or open → ready → failed
//! when every analyzer attempt is exhausted. Triaged and failed are
//! terminal.

use chrono::{DateTime, Utc};
use cropscout_common::events::ReadyTrigger;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::ObservationEvent;

/// Evidence window lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowStatus {
    /// Accumulating observations, idle timer running
    Open,
    /// Readiness reached, awaiting or undergoing triage
    Ready,
    /// Diagnosis published
    Triaged,
    /// All analyzers failed and window retries are exhausted
    Failed,
}

impl WindowStatus {
    /// Database representation
    pub fn as_str(&self) -> &'static str {
        match self {
            WindowStatus::Open => "open",
            WindowStatus::Ready => "ready",
            WindowStatus::Triaged => "triaged",
            WindowStatus::Failed => "failed",
        }
    }

    /// Parse the database representation
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(WindowStatus::Open),
            "ready" => Some(WindowStatus::Ready),
            "triaged" => Some(WindowStatus::Triaged),
            "failed" => Some(WindowStatus::Failed),
            _ => None,
        }
    }
}

/// State transition event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub window_id: Uuid,
    pub old_status: WindowStatus,
    pub new_status: WindowStatus,
    pub transitioned_at: DateTime<Utc>,
}

/// Per-grower aggregation unit
///
/// At most one open window exists per grower at any time; that invariant
/// is enforced by the store, this type only models one window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceWindow {
    /// Unique window identifier
    pub window_id: Uuid,

    /// Grower the window belongs to
    pub grower_id: String,

    /// Current lifecycle state
    pub status: WindowStatus,

    /// Aggregated observations in insertion order
    pub events: Vec<ObservationEvent>,

    /// When the window opened
    pub opened_at: DateTime<Utc>,

    /// Observation time of the most recent event
    pub last_event_at: DateTime<Utc>,

    /// Sliding idle deadline; passing it makes the window ready
    pub expires_at: DateTime<Utc>,

    /// A critical-severity observation forced immediate readiness
    pub bypass_triggered: bool,

    /// What pushed the window to ready (set on the open→ready transition)
    pub ready_trigger: Option<ReadyTrigger>,

    /// Whole-window analysis attempts made so far
    pub attempts: u32,

    /// Last analysis error, kept for the needs-attention view
    pub last_error: Option<String>,
}

impl EvidenceWindow {
    /// Open a new window seeded with its first observation
    pub fn new(event: ObservationEvent, idle_window: chrono::Duration) -> Self {
        let observed_at = event.observed_at;
        Self {
            window_id: Uuid::new_v4(),
            grower_id: event.grower_id.clone(),
            status: WindowStatus::Open,
            events: vec![event],
            opened_at: observed_at,
            last_event_at: observed_at,
            expires_at: observed_at + idle_window,
            bypass_triggered: false,
            ready_trigger: None,
            attempts: 0,
            last_error: None,
        }
    }

    /// Append an observation and slide the idle deadline
    pub fn append(&mut self, event: ObservationEvent, idle_window: chrono::Duration) {
        self.last_event_at = event.observed_at;
        self.expires_at = event.observed_at + idle_window;
        self.events.push(event);
    }

    /// Number of aggregated observations
    pub fn event_count(&self) -> u32 {
        self.events.len() as u32
    }

    /// Whether the window holds the configured maximum number of events
    pub fn at_cap(&self, event_cap: u32) -> bool {
        self.event_count() >= event_cap
    }

    /// Idempotency keys of every aggregated observation
    pub fn source_event_ids(&self) -> Vec<Uuid> {
        self.events.iter().map(|e| e.event_id).collect()
    }

    /// Transition to a new state
    pub fn transition_to(&mut self, new_status: WindowStatus) -> StateTransition {
        let transition = StateTransition {
            window_id: self.window_id,
            old_status: self.status,
            new_status,
            transitioned_at: Utc::now(),
        };
        self.status = new_status;
        transition
    }

    /// Mark the window ready, recording what triggered readiness
    pub fn mark_ready(&mut self, trigger: ReadyTrigger) -> StateTransition {
        self.ready_trigger = Some(trigger);
        if trigger == ReadyTrigger::CriticalBypass {
            self.bypass_triggered = true;
        }
        self.transition_to(WindowStatus::Ready)
    }

    /// Check if the window is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, WindowStatus::Triaged | WindowStatus::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn observation(grower: &str, severity: f64) -> ObservationEvent {
        ObservationEvent::new(grower.to_string(), severity, json!({"note": "spotting"}))
    }

    /// A new window opens with one event and a sliding deadline
    #[test]
    fn test_new_window_opens_with_first_event() {
        let event = observation("G-1", 0.4);
        let observed_at = event.observed_at;
        let window = EvidenceWindow::new(event, chrono::Duration::minutes(30));

        assert_eq!(window.status, WindowStatus::Open);
        assert_eq!(window.event_count(), 1);
        assert_eq!(window.opened_at, observed_at);
        assert_eq!(window.expires_at, observed_at + chrono::Duration::minutes(30));
        assert!(!window.bypass_triggered);
    }

    /// Appending slides the idle deadline forward
    #[test]
    fn test_append_slides_expiry() {
        let mut window =
            EvidenceWindow::new(observation("G-1", 0.4), chrono::Duration::minutes(30));
        let first_expiry = window.expires_at;

        let mut later = observation("G-1", 0.5);
        later.observed_at = window.last_event_at + chrono::Duration::minutes(10);
        window.append(later, chrono::Duration::minutes(30));

        assert_eq!(window.event_count(), 2);
        assert_eq!(window.expires_at, first_expiry + chrono::Duration::minutes(10));
    }

    /// at_cap reflects the configured event cap
    #[test]
    fn test_at_cap() {
        let mut window =
            EvidenceWindow::new(observation("G-1", 0.2), chrono::Duration::minutes(30));
        assert!(!window.at_cap(3));

        window.append(observation("G-1", 0.3), chrono::Duration::minutes(30));
        window.append(observation("G-1", 0.1), chrono::Duration::minutes(30));
        assert!(window.at_cap(3));
    }

    /// mark_ready records the trigger and sets the bypass flag only for
    /// critical bypass
    #[test]
    fn test_mark_ready_records_trigger() {
        let mut window =
            EvidenceWindow::new(observation("G-1", 0.9), chrono::Duration::minutes(30));
        let transition = window.mark_ready(ReadyTrigger::CriticalBypass);

        assert_eq!(transition.old_status, WindowStatus::Open);
        assert_eq!(transition.new_status, WindowStatus::Ready);
        assert_eq!(window.ready_trigger, Some(ReadyTrigger::CriticalBypass));
        assert!(window.bypass_triggered);

        let mut window =
            EvidenceWindow::new(observation("G-2", 0.2), chrono::Duration::minutes(30));
        window.mark_ready(ReadyTrigger::IdleExpiry);
        assert!(!window.bypass_triggered);
    }

    /// Triaged and failed are terminal; open and ready are not
    #[test]
    fn test_terminal_states() {
        let mut window =
            EvidenceWindow::new(observation("G-1", 0.4), chrono::Duration::minutes(30));
        assert!(!window.is_terminal());

        window.transition_to(WindowStatus::Ready);
        assert!(!window.is_terminal());

        window.transition_to(WindowStatus::Triaged);
        assert!(window.is_terminal());

        window.transition_to(WindowStatus::Failed);
        assert!(window.is_terminal());
    }

    /// Status round-trips through its database representation
    #[test]
    fn test_status_parse_round_trip() {
        for status in [
            WindowStatus::Open,
            WindowStatus::Ready,
            WindowStatus::Triaged,
            WindowStatus::Failed,
        ] {
            assert_eq!(WindowStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(WindowStatus::parse("bogus"), None);
    }
}
