//! HTTP specialist analyzer adapter and registry
//!
//! Each analyzer wraps one external specialist service. Before calling
//! it, the adapter consults knowledge retrieval for the analyzer's
//! domain; a failed or empty retrieval degrades to analysis without
//! context rather than failing the call.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::adapters::{
    AdapterError, AnalyzerReport, GrowerContext, KnowledgeRetriever, RankedPassage,
    SpecialistAnalyzer,
};
use crate::models::{Citation, EvidenceWindow, ObservationEvent, TriageDecision};

const USER_AGENT: &str = "cropscout-te/0.1";

#[derive(Serialize)]
struct AnalyzeRequest<'a> {
    grower_id: &'a str,
    classification: &'a str,
    classification_confidence: f64,
    events: &'a [ObservationEvent],
    context: &'a GrowerContext,
    passages: &'a [RankedPassage],
}

#[derive(Debug, Deserialize)]
struct AnalyzeResponse {
    condition: String,
    confidence: f64,
    severity: f64,
    #[serde(default)]
    details: String,
}

/// Retrieval parameters shared by every analyzer client
#[derive(Debug, Clone, Copy)]
pub struct RetrievalSettings {
    pub top_k: u32,
    pub min_similarity: f64,
}

/// Specialist analyzer service client
pub struct HttpAnalyzer {
    analyzer_id: String,
    endpoint: String,
    /// Knowledge domain tag for retrieval (e.g. "pest_management")
    domain: String,
    client: reqwest::Client,
    rate_limiter: governor::RateLimiter<
        governor::state::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
    retriever: Option<Arc<dyn KnowledgeRetriever>>,
    retrieval: RetrievalSettings,
}

impl HttpAnalyzer {
    /// Build a client for one analyzer service
    pub fn new(
        analyzer_id: String,
        endpoint: String,
        domain: String,
        retriever: Option<Arc<dyn KnowledgeRetriever>>,
        retrieval: RetrievalSettings,
    ) -> Result<Self, AdapterError> {
        // Safe: 10 is always non-zero
        let quota = governor::Quota::per_second(std::num::NonZeroU32::new(10).unwrap());
        let rate_limiter = governor::RateLimiter::direct(quota);

        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| AdapterError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            analyzer_id,
            endpoint,
            domain,
            client,
            rate_limiter,
            retriever,
            retrieval,
        })
    }

    /// Fetch knowledge passages, degrading to none on any failure
    async fn fetch_passages(&self, query: &str) -> (Vec<RankedPassage>, Option<String>) {
        let retriever = match &self.retriever {
            Some(r) => r,
            None => return (Vec::new(), Some("no retriever configured".to_string())),
        };

        match retriever
            .retrieve(
                &self.domain,
                query,
                self.retrieval.top_k,
                self.retrieval.min_similarity,
            )
            .await
        {
            Ok(passages) if passages.is_empty() => {
                (Vec::new(), Some("no passages above similarity threshold".to_string()))
            }
            Ok(passages) => (passages, None),
            Err(e) => {
                warn!(
                    analyzer = %self.analyzer_id,
                    domain = %self.domain,
                    error = %e,
                    "Knowledge retrieval failed, analyzing without context"
                );
                (Vec::new(), Some(format!("retrieval failed: {}", e)))
            }
        }
    }
}

#[async_trait::async_trait]
impl SpecialistAnalyzer for HttpAnalyzer {
    fn analyzer_id(&self) -> &str {
        &self.analyzer_id
    }

    async fn analyze(
        &self,
        window: &EvidenceWindow,
        decision: &TriageDecision,
        context: &GrowerContext,
    ) -> Result<AnalyzerReport, AdapterError> {
        let query = evidence_query(window, decision);
        let (passages, degraded) = self.fetch_passages(&query).await;

        debug!(
            analyzer = %self.analyzer_id,
            window_id = %window.window_id,
            passages = passages.len(),
            "Calling analyzer"
        );

        // Rate limit API calls
        self.rate_limiter.until_ready().await;

        let url = format!("{}/analyze", self.endpoint);
        let request = AnalyzeRequest {
            grower_id: &window.grower_id,
            classification: decision.classification.as_str(),
            classification_confidence: decision.confidence,
            events: &window.events,
            context,
            passages: &passages,
        };

        let response = self.client.post(&url).json(&request).send().await?;

        if !response.status().is_success() {
            return Err(AdapterError::Api(format!(
                "Analyzer {} returned {}",
                self.analyzer_id,
                response.status()
            )));
        }

        let report: AnalyzeResponse = response
            .json()
            .await
            .map_err(|e| AdapterError::Parse(format!("Failed to parse analyzer response: {}", e)))?;

        let details = match degraded {
            Some(reason) => {
                if report.details.is_empty() {
                    format!("[analyzed without knowledge context: {}]", reason)
                } else {
                    format!(
                        "{} [analyzed without knowledge context: {}]",
                        report.details, reason
                    )
                }
            }
            None => report.details,
        };

        let citations = passages
            .into_iter()
            .map(|p| Citation {
                domain: self.domain.clone(),
                reference: p.reference,
                similarity: p.similarity,
            })
            .collect();

        Ok(AnalyzerReport {
            condition: report.condition,
            confidence: report.confidence.clamp(0.0, 1.0),
            severity: report.severity.clamp(0.0, 1.0),
            details,
            citations,
        })
    }
}

/// Build the retrieval query from the window's evidence
///
/// Collector payloads carry free-text notes under "note"; those plus the
/// classified cause make a usable retrieval query.
fn evidence_query(window: &EvidenceWindow, decision: &TriageDecision) -> String {
    let mut parts = vec![decision.classification.as_str().replace('_', " ")];
    if let Some(crop_notes) = collect_notes(&window.events) {
        parts.push(crop_notes);
    }
    parts.join(" ")
}

fn collect_notes(events: &[ObservationEvent]) -> Option<String> {
    let notes: Vec<&str> = events
        .iter()
        .filter_map(|e| e.payload.get("note").and_then(|v| v.as_str()))
        .collect();
    if notes.is_empty() {
        None
    } else {
        Some(notes.join(" "))
    }
}

/// Analyzer lookup keyed by analyzer identifier
///
/// The routing table names analyzers by id; the registry resolves those
/// ids to live adapters.
#[derive(Clone, Default)]
pub struct AnalyzerRegistry {
    analyzers: HashMap<String, Arc<dyn SpecialistAnalyzer>>,
}

impl AnalyzerRegistry {
    pub fn new() -> Self {
        Self {
            analyzers: HashMap::new(),
        }
    }

    /// Register an analyzer under its own id
    pub fn register(&mut self, analyzer: Arc<dyn SpecialistAnalyzer>) {
        self.analyzers
            .insert(analyzer.analyzer_id().to_string(), analyzer);
    }

    /// Resolve an analyzer id
    pub fn get(&self, analyzer_id: &str) -> Option<Arc<dyn SpecialistAnalyzer>> {
        self.analyzers.get(analyzer_id).cloned()
    }

    /// Number of registered analyzers
    pub fn count(&self) -> usize {
        self.analyzers.len()
    }
}
