//! Event types for the CropScout event system
//!
//! Provides shared event definitions and the EventBus used by the
//! triage engine and any co-located services.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// What pushed an evidence window from open to ready
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadyTrigger {
    /// Sliding idle timer elapsed with no new events
    IdleExpiry,
    /// Window reached its event cap
    EventCap,
    /// A critical-severity observation forced immediate readiness
    CriticalBypass,
}

impl std::fmt::Display for ReadyTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReadyTrigger::IdleExpiry => write!(f, "idle_expiry"),
            ReadyTrigger::EventCap => write!(f, "event_cap"),
            ReadyTrigger::CriticalBypass => write!(f, "critical_bypass"),
        }
    }
}

/// CropScout event types
///
/// Events are broadcast via EventBus and can be serialized for SSE
/// transmission. All engine events use this central enum for type safety
/// and exhaustive matching.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ScoutEvent {
    /// An observation event was accepted into a window
    ///
    /// Triggers:
    /// - SSE: Update live window displays
    ObservationIngested {
        /// Grower the observation belongs to
        grower_id: String,
        /// Idempotency key of the observation
        event_id: Uuid,
        /// Window the observation landed in
        window_id: Uuid,
        /// Events accumulated in the window so far
        window_event_count: u32,
        /// When the observation was ingested
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A new evidence window was opened for a grower
    WindowOpened {
        /// Window UUID
        window_id: Uuid,
        /// Grower the window belongs to
        grower_id: String,
        /// When the idle timer will expire if no further events arrive
        expires_at: chrono::DateTime<chrono::Utc>,
        /// When the window opened
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// An evidence window became ready for triage
    ///
    /// Triggers:
    /// - Pipeline: Run triage and fan-out for the window
    /// - SSE: Update window status displays
    WindowReady {
        /// Window UUID
        window_id: Uuid,
        /// Grower the window belongs to
        grower_id: String,
        /// What forced readiness
        trigger: ReadyTrigger,
        /// Events aggregated in the window
        event_count: u32,
        /// When readiness was detected
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Triage classification finished for a window
    TriageCompleted {
        /// Window UUID
        window_id: Uuid,
        /// Grower the window belongs to
        grower_id: String,
        /// Classified probable cause
        classification: String,
        /// Classifier confidence in [0, 1]
        confidence: f64,
        /// Analyzer identifiers the window was routed to
        routed_to: Vec<String>,
        /// Whether the window was flagged for human review
        flagged_for_review: bool,
        /// When triage completed
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// One analyzer call failed after exhausting its retries
    ///
    /// The window still produces a diagnosis if any sibling analyzer
    /// succeeds; this event exists for monitoring.
    AnalyzerCallFailed {
        /// Window UUID
        window_id: Uuid,
        /// Analyzer that failed
        analyzer_id: String,
        /// Final error message
        error: String,
        /// When the failure was recorded
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A merged diagnosis was published for a window
    ///
    /// Triggers:
    /// - Downstream consumers: deliver the diagnosis (idempotent on
    ///   diagnosis_id, emission is at-least-once)
    /// - SSE: Update diagnosis displays
    DiagnosisReady {
        /// Diagnosis UUID
        diagnosis_id: Uuid,
        /// Source window UUID
        window_id: Uuid,
        /// Grower the diagnosis belongs to
        grower_id: String,
        /// Condition named by the highest-confidence finding, if any
        top_condition: Option<String>,
        /// Confidence of that finding
        top_confidence: Option<f64>,
        /// Whether the diagnosis carries a review flag
        flagged_for_review: bool,
        /// When the diagnosis was published
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Every analyzer failed for a window and window-level retries are
    /// exhausted; the window now needs human attention
    WindowAnalysisFailed {
        /// Window UUID
        window_id: Uuid,
        /// Grower the window belongs to
        grower_id: String,
        /// Whole-window attempts made before giving up
        attempts: u32,
        /// Last error message
        error: String,
        /// When the window was marked failed
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Persisting an observation failed and the event was processed as
    /// a single-event window instead of being dropped
    IngestFallback {
        /// Grower the observation belongs to
        grower_id: String,
        /// Idempotency key of the observation
        event_id: Uuid,
        /// Persistence error that forced the fallback
        error: String,
        /// When the fallback fired
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Database operation failed
    DatabaseError {
        /// Operation that failed (e.g. "save_window")
        operation: String,
        /// Error message
        error: String,
        /// When the error occurred
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl ScoutEvent {
    /// Get event type as string for filtering
    pub fn event_type(&self) -> &str {
        match self {
            ScoutEvent::ObservationIngested { .. } => "ObservationIngested",
            ScoutEvent::WindowOpened { .. } => "WindowOpened",
            ScoutEvent::WindowReady { .. } => "WindowReady",
            ScoutEvent::TriageCompleted { .. } => "TriageCompleted",
            ScoutEvent::AnalyzerCallFailed { .. } => "AnalyzerCallFailed",
            ScoutEvent::DiagnosisReady { .. } => "DiagnosisReady",
            ScoutEvent::WindowAnalysisFailed { .. } => "WindowAnalysisFailed",
            ScoutEvent::IngestFallback { .. } => "IngestFallback",
            ScoutEvent::DatabaseError { .. } => "DatabaseError",
        }
    }
}

/// Central event distribution bus for application-wide events
///
/// The EventBus uses tokio::broadcast internally, providing:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Automatic cleanup when subscribers drop
/// - Lagged message detection for slow subscribers
///
/// # Capacity Recommendations
///
/// - Production: 1000
/// - Testing: 10-100
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ScoutEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Arguments
    ///
    /// * `capacity` - Number of events to buffer before dropping old events
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Returns a receiver that will receive all events emitted after
    /// subscription. Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<ScoutEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: ScoutEvent,
    ) -> Result<usize, broadcast::error::SendError<ScoutEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    ///
    /// This is useful for non-critical events where it's acceptable if
    /// no component is currently listening.
    pub fn emit_lossy(&self, event: ScoutEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    ///
    /// Useful for debugging and monitoring
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
