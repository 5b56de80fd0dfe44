//! Parallel analyzer fan-out
//!
//! Runs every routed analyzer for a window concurrently, bounded by a
//! per-window limit and a platform-wide semaphore shared across all
//! windows. Individual calls get a deadline and bounded retries with
//! exponential backoff; a call that still fails becomes a failed
//! finding record rather than an error, so one bad analyzer never
//! sinks the window.

use std::cmp::Ordering;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use cropscout_common::{EventBus, ScoutEvent};

use crate::adapters::{AnalyzerRegistry, GrowerContext};
use crate::models::{AnalyzerFinding, EngineParams, EvidenceWindow, TriageDecision};

pub struct FanOutCoordinator {
    registry: AnalyzerRegistry,
    params: EngineParams,
    event_bus: Arc<EventBus>,
    /// Caps simultaneous external analyzer calls across every window
    global_limit: Arc<Semaphore>,
}

impl FanOutCoordinator {
    pub fn new(
        registry: AnalyzerRegistry,
        params: EngineParams,
        event_bus: Arc<EventBus>,
        global_limit: Arc<Semaphore>,
    ) -> Self {
        Self {
            registry,
            params,
            event_bus,
            global_limit,
        }
    }

    /// Invoke every routed analyzer and collect findings in merge order
    ///
    /// Always returns one finding per routed analyzer. Callers detect
    /// total failure by checking that no finding succeeded.
    pub async fn analyze_window(
        &self,
        window: &EvidenceWindow,
        decision: &TriageDecision,
        context: &GrowerContext,
    ) -> Vec<AnalyzerFinding> {
        let per_window = Arc::new(Semaphore::new(self.params.window_concurrency));

        let calls = decision
            .routed_to
            .iter()
            .map(|analyzer_id| self.run_analyzer(analyzer_id, window, decision, context, per_window.clone()));
        let findings = futures::future::join_all(calls).await;

        merge_findings(findings, self.params.merge_similarity)
    }

    /// One analyzer call with deadline, retries, and failure capture
    async fn run_analyzer(
        &self,
        analyzer_id: &str,
        window: &EvidenceWindow,
        decision: &TriageDecision,
        context: &GrowerContext,
        per_window: Arc<Semaphore>,
    ) -> AnalyzerFinding {
        let analyzer = match self.registry.get(analyzer_id) {
            Some(analyzer) => analyzer,
            None => {
                warn!(
                    analyzer_id = %analyzer_id,
                    window_id = %window.window_id,
                    "Routed analyzer has no registered adapter"
                );
                return self.record_failure(
                    analyzer_id,
                    window,
                    "no adapter registered".to_string(),
                );
            }
        };

        let _window_permit = match per_window.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                return self.record_failure(
                    analyzer_id,
                    window,
                    "window concurrency limiter closed".to_string(),
                )
            }
        };
        let _global_permit = match self.global_limit.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                return self.record_failure(
                    analyzer_id,
                    window,
                    "global concurrency limiter closed".to_string(),
                )
            }
        };

        let deadline = self.params.analyzer_timeout();
        let mut backoff = std::time::Duration::from_millis(self.params.analyzer_backoff_ms);
        let mut last_error = String::new();

        for attempt in 0..=self.params.analyzer_retries {
            if attempt > 0 {
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }

            match tokio::time::timeout(deadline, analyzer.analyze(window, decision, context)).await
            {
                Ok(Ok(report)) => {
                    debug!(
                        analyzer_id = %analyzer_id,
                        window_id = %window.window_id,
                        condition = %report.condition,
                        confidence = report.confidence,
                        "Analyzer finding"
                    );
                    return AnalyzerFinding {
                        analyzer_id: analyzer_id.to_string(),
                        window_id: window.window_id,
                        condition: report.condition,
                        confidence: report.confidence.clamp(0.0, 1.0),
                        severity: report.severity.clamp(0.0, 1.0),
                        details: report.details,
                        citations: report.citations,
                        succeeded: true,
                        error: None,
                    };
                }
                Ok(Err(e)) => {
                    last_error = e.to_string();
                    warn!(
                        analyzer_id = %analyzer_id,
                        window_id = %window.window_id,
                        attempt = attempt + 1,
                        error = %last_error,
                        "Analyzer call failed"
                    );
                }
                Err(_) => {
                    last_error = format!("timed out after {}s", self.params.analyzer_timeout_seconds);
                    warn!(
                        analyzer_id = %analyzer_id,
                        window_id = %window.window_id,
                        attempt = attempt + 1,
                        "Analyzer call timed out"
                    );
                }
            }
        }

        self.record_failure(analyzer_id, window, last_error)
    }

    fn record_failure(
        &self,
        analyzer_id: &str,
        window: &EvidenceWindow,
        error: String,
    ) -> AnalyzerFinding {
        self.event_bus.emit_lossy(ScoutEvent::AnalyzerCallFailed {
            window_id: window.window_id,
            analyzer_id: analyzer_id.to_string(),
            error: error.clone(),
            timestamp: chrono::Utc::now(),
        });
        AnalyzerFinding::failed(analyzer_id.to_string(), window.window_id, error)
    }
}

/// Order findings for the diagnosis without discarding any
///
/// Successful findings whose conditions agree (Jaro-Winkler similarity
/// at or above the threshold, case-insensitive) are grouped; within a
/// group the highest-confidence finding leads and the rest follow as
/// secondary evidence. Groups are ordered by their leading confidence.
/// Failed records keep their place at the end.
pub(crate) fn merge_findings(
    findings: Vec<AnalyzerFinding>,
    similarity_threshold: f64,
) -> Vec<AnalyzerFinding> {
    let (succeeded, failed): (Vec<_>, Vec<_>) =
        findings.into_iter().partition(|f| f.succeeded);

    let mut groups: Vec<Vec<AnalyzerFinding>> = Vec::new();
    for finding in succeeded {
        let condition = finding.condition.to_lowercase();
        let group = groups.iter_mut().find(|members| {
            members.iter().any(|m| {
                strsim::jaro_winkler(&m.condition.to_lowercase(), &condition)
                    >= similarity_threshold
            })
        });
        match group {
            Some(members) => members.push(finding),
            None => groups.push(vec![finding]),
        }
    }

    for members in &mut groups {
        members.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(Ordering::Equal)
        });
    }
    groups.sort_by(|a, b| {
        let lead_a = a.first().map(|f| f.confidence).unwrap_or(0.0);
        let lead_b = b.first().map(|f| f.confidence).unwrap_or(0.0);
        lead_b.partial_cmp(&lead_a).unwrap_or(Ordering::Equal)
    });

    let mut merged: Vec<AnalyzerFinding> = groups.into_iter().flatten().collect();
    merged.extend(failed);
    merged
}
