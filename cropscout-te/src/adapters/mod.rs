//! External capability adapters
//!
//! Narrow trait seams around everything the engine calls out to: the
//! evidence classifier, the specialist analyzers, knowledge retrieval,
//! and the grower context service. The core orchestration logic stays
//! deterministic and unit-testable behind these traits.
//!
//! # Adapters
//! - **classifier** - classify evidence → (cause, confidence)
//! - **analyzer** - analyze evidence for one cause → finding
//! - **retrieval** - ranked-passage knowledge lookup
//! - **context** - grower/region context from upstream services

pub mod analyzer;
pub mod classifier;
pub mod context;
pub mod retrieval;

#[cfg(test)]
pub mod mock;

pub use analyzer::{AnalyzerRegistry, HttpAnalyzer};
pub use classifier::HttpClassifier;
pub use context::HttpContextProvider;
pub use retrieval::HttpRetriever;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{Citation, EvidenceWindow, TriageDecision};

/// Adapter call error
#[derive(Debug, Error)]
pub enum AdapterError {
    /// Call exceeded its deadline
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Network communication error
    #[error("Network error: {0}")]
    Network(String),

    /// External API error
    #[error("API error: {0}")]
    Api(String),

    /// Failed to parse response or data
    #[error("Parse error: {0}")]
    Parse(String),

    /// Required capability not available
    #[error("Adapter not available: {0}")]
    NotAvailable(String),

    /// Internal processing error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<reqwest::Error> for AdapterError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            AdapterError::Timeout(e.to_string())
        } else if e.is_decode() {
            AdapterError::Parse(e.to_string())
        } else {
            AdapterError::Network(e.to_string())
        }
    }
}

/// Classifier output: a free-text cause label with confidence
///
/// The label is mapped onto the classification enum by the triage
/// router; unrecognized labels become unknown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierVerdict {
    pub label: String,
    pub confidence: f64,
}

/// Successful analyzer output, before the coordinator wraps it into a
/// finding record
#[derive(Debug, Clone)]
pub struct AnalyzerReport {
    pub condition: String,
    pub confidence: f64,
    pub severity: f64,
    pub details: String,
    pub citations: Vec<Citation>,
}

/// One retrieved knowledge passage with its similarity score
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedPassage {
    pub reference: String,
    pub excerpt: String,
    pub similarity: f64,
}

/// Grower and region context fetched from upstream domain services
///
/// Unavailability degrades to the default (empty) context; triage never
/// blocks on it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GrowerContext {
    pub region: Option<String>,
    pub crop: Option<String>,
    pub weather_summary: Option<String>,
}

/// Classify an evidence window's probable cause
#[async_trait::async_trait]
pub trait EvidenceClassifier: Send + Sync {
    /// Classifier name for logging
    fn name(&self) -> &'static str;

    /// Classify the window's ordered evidence plus grower context
    ///
    /// # Errors
    /// Returns `AdapterError` on timeout or failure; the router degrades
    /// to route-to-all rather than propagating.
    async fn classify(
        &self,
        window: &EvidenceWindow,
        context: &GrowerContext,
    ) -> Result<ClassifierVerdict, AdapterError>;
}

/// Produce a specialist finding for one classified cause
#[async_trait::async_trait]
pub trait SpecialistAnalyzer: Send + Sync {
    /// Analyzer identifier as routed by the routing table
    fn analyzer_id(&self) -> &str;

    /// Analyze the window for this analyzer's specialty
    ///
    /// Implementations may consult knowledge retrieval internally; a
    /// failed or low-relevance retrieval must degrade to analysis
    /// without context, noted in the report details, never an error.
    async fn analyze(
        &self,
        window: &EvidenceWindow,
        decision: &TriageDecision,
        context: &GrowerContext,
    ) -> Result<AnalyzerReport, AdapterError>;
}

/// Ranked-passage knowledge lookup by domain tag
#[async_trait::async_trait]
pub trait KnowledgeRetriever: Send + Sync {
    /// Retrieve up to top_k passages at or above min_similarity
    async fn retrieve(
        &self,
        domain: &str,
        query: &str,
        top_k: u32,
        min_similarity: f64,
    ) -> Result<Vec<RankedPassage>, AdapterError>;
}

/// Grower/region context lookup
#[async_trait::async_trait]
pub trait GrowerContextProvider: Send + Sync {
    /// Fetch context for a grower
    async fn context_for(&self, grower_id: &str) -> Result<GrowerContext, AdapterError>;
}
