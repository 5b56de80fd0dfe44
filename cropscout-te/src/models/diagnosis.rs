//! Merged diagnosis model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{AnalyzerFinding, TriageDecision};

/// The merged, publishable result for one window
///
/// Immutable after publication. Findings are concatenated, never
/// collapsed; ordering puts the primary (highest-confidence) finding of
/// each condition group first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnosis {
    /// Unique diagnosis identifier
    pub diagnosis_id: Uuid,

    /// Source window (unique per diagnosis, enforced by the store)
    pub window_id: Uuid,

    /// Grower the diagnosis belongs to
    pub grower_id: String,

    /// Every observation that contributed evidence
    pub source_event_ids: Vec<Uuid>,

    /// The triage decision that routed this window
    pub triage: TriageDecision,

    /// Merged analyzer findings, primary first
    pub findings: Vec<AnalyzerFinding>,

    /// When the diagnosis was assembled
    pub created_at: DateTime<Utc>,
}

impl Diagnosis {
    /// Highest-confidence successful finding, if any
    pub fn top_finding(&self) -> Option<&AnalyzerFinding> {
        self.findings.iter().find(|f| f.succeeded)
    }

    /// Compact summary for downstream notification
    pub fn summary(&self) -> DiagnosisSummary {
        let top = self.top_finding();
        DiagnosisSummary {
            diagnosis_id: self.diagnosis_id,
            window_id: self.window_id,
            grower_id: self.grower_id.clone(),
            top_condition: top.map(|f| f.condition.clone()),
            top_confidence: top.map(|f| f.confidence),
            flagged_for_review: self.triage.flagged_for_review,
            created_at: self.created_at,
        }
    }
}

/// Compact diagnosis summary carried in downstream notifications
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosisSummary {
    pub diagnosis_id: Uuid,
    pub window_id: Uuid,
    pub grower_id: String,
    pub top_condition: Option<String>,
    pub top_confidence: Option<f64>,
    pub flagged_for_review: bool,
    pub created_at: DateTime<Utc>,
}
