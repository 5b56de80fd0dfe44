//! Mock adapters for tests
//!
//! Configurable in-process stand-ins for the external classifier,
//! analyzer, retrieval, and context services.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use crate::adapters::{
    AdapterError, AnalyzerReport, ClassifierVerdict, EvidenceClassifier, GrowerContext,
    GrowerContextProvider, KnowledgeRetriever, RankedPassage, SpecialistAnalyzer,
};
use crate::models::{EvidenceWindow, TriageDecision};

/// Classifier returning a fixed verdict, or failing on demand
pub struct MockClassifier {
    label: String,
    confidence: f64,
    fail: bool,
    delay: Option<Duration>,
}

impl MockClassifier {
    pub fn returning(label: &str, confidence: f64) -> Self {
        Self {
            label: label.to_string(),
            confidence,
            fail: false,
            delay: None,
        }
    }

    pub fn failing() -> Self {
        Self {
            label: String::new(),
            confidence: 0.0,
            fail: true,
            delay: None,
        }
    }

    /// Sleep before answering, for deadline tests
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait::async_trait]
impl EvidenceClassifier for MockClassifier {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn classify(
        &self,
        _window: &EvidenceWindow,
        _context: &GrowerContext,
    ) -> Result<ClassifierVerdict, AdapterError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(AdapterError::Api("mock classifier failure".to_string()));
        }
        Ok(ClassifierVerdict {
            label: self.label.clone(),
            confidence: self.confidence,
        })
    }
}

/// Analyzer with scriptable failures and a call counter
pub struct MockAnalyzer {
    analyzer_id: String,
    condition: String,
    confidence: f64,
    severity: f64,
    always_fail: bool,
    fail_remaining: AtomicU32,
    delay: Option<Duration>,
    calls: AtomicU32,
}

impl MockAnalyzer {
    pub fn succeeding(analyzer_id: &str, condition: &str, confidence: f64) -> Self {
        Self {
            analyzer_id: analyzer_id.to_string(),
            condition: condition.to_string(),
            confidence,
            severity: 0.5,
            always_fail: false,
            fail_remaining: AtomicU32::new(0),
            delay: None,
            calls: AtomicU32::new(0),
        }
    }

    pub fn failing(analyzer_id: &str) -> Self {
        Self {
            analyzer_id: analyzer_id.to_string(),
            condition: String::new(),
            confidence: 0.0,
            severity: 0.0,
            always_fail: true,
            fail_remaining: AtomicU32::new(0),
            delay: None,
            calls: AtomicU32::new(0),
        }
    }

    /// Fail the first `times` calls, then succeed
    pub fn failing_times(analyzer_id: &str, times: u32, condition: &str, confidence: f64) -> Self {
        Self {
            analyzer_id: analyzer_id.to_string(),
            condition: condition.to_string(),
            confidence,
            severity: 0.5,
            always_fail: false,
            fail_remaining: AtomicU32::new(times),
            delay: None,
            calls: AtomicU32::new(0),
        }
    }

    /// Sleep before answering, for deadline tests
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_severity(mut self, severity: f64) -> Self {
        self.severity = severity;
        self
    }

    /// Total calls received
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl SpecialistAnalyzer for MockAnalyzer {
    fn analyzer_id(&self) -> &str {
        &self.analyzer_id
    }

    async fn analyze(
        &self,
        _window: &EvidenceWindow,
        _decision: &TriageDecision,
        _context: &GrowerContext,
    ) -> Result<AnalyzerReport, AdapterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.always_fail {
            return Err(AdapterError::Network(format!(
                "mock analyzer {} failure",
                self.analyzer_id
            )));
        }

        if self.fail_remaining.load(Ordering::SeqCst) > 0 {
            self.fail_remaining.fetch_sub(1, Ordering::SeqCst);
            return Err(AdapterError::Network(format!(
                "mock analyzer {} transient failure",
                self.analyzer_id
            )));
        }

        Ok(AnalyzerReport {
            condition: self.condition.clone(),
            confidence: self.confidence,
            severity: self.severity,
            details: format!("mock analysis from {}", self.analyzer_id),
            citations: Vec::new(),
        })
    }
}

/// Retriever returning fixed passages, or failing on demand
pub struct MockRetriever {
    passages: Vec<RankedPassage>,
    fail: bool,
}

impl MockRetriever {
    pub fn returning(passages: Vec<RankedPassage>) -> Self {
        Self {
            passages,
            fail: false,
        }
    }

    pub fn empty() -> Self {
        Self {
            passages: Vec::new(),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            passages: Vec::new(),
            fail: true,
        }
    }
}

#[async_trait::async_trait]
impl KnowledgeRetriever for MockRetriever {
    async fn retrieve(
        &self,
        _domain: &str,
        _query: &str,
        top_k: u32,
        min_similarity: f64,
    ) -> Result<Vec<RankedPassage>, AdapterError> {
        if self.fail {
            return Err(AdapterError::Network("mock retrieval failure".to_string()));
        }
        Ok(self
            .passages
            .iter()
            .filter(|p| p.similarity >= min_similarity)
            .take(top_k as usize)
            .cloned()
            .collect())
    }
}

/// Context provider returning a fixed context, or failing on demand
pub struct MockContextProvider {
    context: GrowerContext,
    fail: bool,
}

impl MockContextProvider {
    pub fn returning(context: GrowerContext) -> Self {
        Self {
            context,
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            context: GrowerContext::default(),
            fail: true,
        }
    }
}

#[async_trait::async_trait]
impl GrowerContextProvider for MockContextProvider {
    async fn context_for(&self, _grower_id: &str) -> Result<GrowerContext, AdapterError> {
        if self.fail {
            return Err(AdapterError::Network("mock context failure".to_string()));
        }
        Ok(self.context.clone())
    }
}
