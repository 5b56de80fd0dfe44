//! Confidence-based triage routing
//!
//! One classifier call per ready window, bounded by a deadline. The
//! verdict's confidence picks the routing: high confidence goes to the
//! single best-matching analyzer, moderate confidence fans out to the
//! plausible set, and low confidence becomes an unknown classification
//! routed to every analyzer and flagged for review. Classifier failure
//! degrades the same way as low confidence; evidence is never
//! discarded for lack of a verdict.

use std::sync::Arc;
use tracing::{debug, info, warn};

use cropscout_common::{EventBus, ScoutEvent};

use crate::adapters::{ClassifierVerdict, EvidenceClassifier, GrowerContext};
use crate::models::{Classification, EngineParams, EvidenceWindow, RoutingTable, TriageDecision};

pub struct TriageRouter {
    classifier: Arc<dyn EvidenceClassifier>,
    routing: RoutingTable,
    params: EngineParams,
    event_bus: Arc<EventBus>,
}

impl TriageRouter {
    pub fn new(
        classifier: Arc<dyn EvidenceClassifier>,
        routing: RoutingTable,
        params: EngineParams,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            classifier,
            routing,
            params,
            event_bus,
        }
    }

    /// Classify a ready window and decide which analyzers see it
    pub async fn route(&self, window: &EvidenceWindow, context: &GrowerContext) -> TriageDecision {
        let verdict = match tokio::time::timeout(
            self.params.classifier_timeout(),
            self.classifier.classify(window, context),
        )
        .await
        {
            Ok(Ok(verdict)) => {
                debug!(
                    window_id = %window.window_id,
                    classifier = self.classifier.name(),
                    label = %verdict.label,
                    confidence = verdict.confidence,
                    "Classifier verdict"
                );
                Some(verdict)
            }
            Ok(Err(e)) => {
                warn!(
                    window_id = %window.window_id,
                    classifier = self.classifier.name(),
                    error = %e,
                    "Classifier failed, routing to all analyzers"
                );
                None
            }
            Err(_) => {
                warn!(
                    window_id = %window.window_id,
                    classifier = self.classifier.name(),
                    timeout_seconds = self.params.classifier_timeout_seconds,
                    "Classifier timed out, routing to all analyzers"
                );
                None
            }
        };

        let decision = match verdict {
            Some(verdict) => self.decide(window, verdict),
            None => self.degraded_decision(window),
        };

        info!(
            window_id = %window.window_id,
            classification = %decision.classification,
            confidence = decision.confidence,
            routed_to = ?decision.routed_to,
            flagged = decision.flagged_for_review,
            "Triage decision"
        );
        self.event_bus.emit_lossy(ScoutEvent::TriageCompleted {
            window_id: window.window_id,
            grower_id: window.grower_id.clone(),
            classification: decision.classification.to_string(),
            confidence: decision.confidence,
            routed_to: decision.routed_to.clone(),
            flagged_for_review: decision.flagged_for_review,
            timestamp: chrono::Utc::now(),
        });

        decision
    }

    fn decide(&self, window: &EvidenceWindow, verdict: ClassifierVerdict) -> TriageDecision {
        let confidence = verdict.confidence.clamp(0.0, 1.0);

        // Below the review floor the label is not trusted at all
        let classification = if confidence < self.params.review_threshold {
            Classification::Unknown
        } else {
            Classification::from_label(&verdict.label)
        };

        let (routed_to, flagged_for_review) = if classification == Classification::Unknown {
            (self.routing.all_analyzers().to_vec(), true)
        } else if confidence >= self.params.accept_threshold {
            match self.routing.primary_for(classification) {
                Some(primary) => (vec![primary.to_string()], false),
                // No route configured for this cause; fall back to the
                // plausible set rather than dropping the window
                None => (self.routing.plausible_for(classification), false),
            }
        } else {
            (self.routing.plausible_for(classification), false)
        };

        TriageDecision {
            window_id: window.window_id,
            classification,
            confidence,
            routed_to,
            flagged_for_review,
            decided_at: chrono::Utc::now(),
        }
    }

    fn degraded_decision(&self, window: &EvidenceWindow) -> TriageDecision {
        TriageDecision {
            window_id: window.window_id,
            classification: Classification::Unknown,
            confidence: 0.0,
            routed_to: self.routing.all_analyzers().to_vec(),
            flagged_for_review: true,
            decided_at: chrono::Utc::now(),
        }
    }
}
