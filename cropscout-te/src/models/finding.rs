//! Analyzer finding model

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Knowledge reference attached to a finding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    /// Knowledge domain the passage came from (e.g. "pest_management")
    pub domain: String,
    /// Passage identifier or title
    pub reference: String,
    /// Retrieval similarity score in [0, 1]
    pub similarity: f64,
}

/// Output of one specialist analyzer for one window
///
/// Failed calls are recorded as findings too, with `succeeded = false`
/// and the final error message, so partial failure stays visible in the
/// merged diagnosis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerFinding {
    /// Analyzer that produced the finding
    pub analyzer_id: String,

    /// Window the finding applies to
    pub window_id: Uuid,

    /// Named condition (e.g. "aphid infestation")
    pub condition: String,

    /// Analyzer confidence in [0, 1]
    pub confidence: f64,

    /// Assessed severity in [0, 1]
    pub severity: f64,

    /// Free-text analysis detail
    pub details: String,

    /// Knowledge references consulted, if any
    #[serde(default)]
    pub citations: Vec<Citation>,

    /// Whether the analyzer call succeeded
    pub succeeded: bool,

    /// Final error message for failed calls
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AnalyzerFinding {
    /// Record for an analyzer call that failed after exhausting retries
    pub fn failed(analyzer_id: String, window_id: Uuid, error: String) -> Self {
        Self {
            analyzer_id,
            window_id,
            condition: String::new(),
            confidence: 0.0,
            severity: 0.0,
            details: String::new(),
            citations: Vec::new(),
            succeeded: false,
            error: Some(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Failed findings carry the error and zeroed scores
    #[test]
    fn test_failed_finding() {
        let window_id = Uuid::new_v4();
        let finding = AnalyzerFinding::failed(
            "pest".to_string(),
            window_id,
            "timed out after 10s".to_string(),
        );

        assert!(!finding.succeeded);
        assert_eq!(finding.window_id, window_id);
        assert_eq!(finding.confidence, 0.0);
        assert_eq!(finding.error.as_deref(), Some("timed out after 10s"));
    }

    /// The error field is omitted from JSON for successful findings
    #[test]
    fn test_error_omitted_when_succeeded() {
        let finding = AnalyzerFinding {
            analyzer_id: "pathology".to_string(),
            window_id: Uuid::new_v4(),
            condition: "leaf rust".to_string(),
            confidence: 0.88,
            severity: 0.6,
            details: "rust pustules on lower canopy".to_string(),
            citations: vec![],
            succeeded: true,
            error: None,
        };

        let json = serde_json::to_string(&finding).expect("Serialization should succeed");
        assert!(!json.contains("\"error\""));
        assert!(json.contains("\"condition\":\"leaf rust\""));
    }
}
