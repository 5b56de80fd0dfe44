//! Engine tuning parameters
//!
//! Compiled defaults for aggregation, triage, fan-out, and publication.
//! Every value can be overridden from the settings table at startup.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Triage engine parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineParams {
    /// Sliding idle window before an open window becomes ready (default: 30 minutes)
    #[serde(default = "default_idle_window_seconds")]
    pub idle_window_seconds: i64,

    /// Maximum events per window before forced readiness (default: 10)
    #[serde(default = "default_event_cap")]
    pub event_cap: u32,

    /// Severity hint at or above which readiness bypasses the idle timer (default: 0.8)
    #[serde(default = "default_critical_severity")]
    pub critical_severity: f64,

    /// Background expiry sweep tick (default: 5s)
    #[serde(default = "default_sweep_interval_seconds")]
    pub sweep_interval_seconds: u64,

    /// Confidence at or above which a single analyzer is routed (default: 0.7)
    #[serde(default = "default_accept_threshold")]
    pub accept_threshold: f64,

    /// Confidence below which the window is flagged for review (default: 0.3)
    #[serde(default = "default_review_threshold")]
    pub review_threshold: f64,

    /// Classifier call timeout (default: 5s)
    #[serde(default = "default_classifier_timeout_seconds")]
    pub classifier_timeout_seconds: u64,

    /// Per-analyzer call timeout (default: 10s)
    #[serde(default = "default_analyzer_timeout_seconds")]
    pub analyzer_timeout_seconds: u64,

    /// Retries per analyzer call after the first attempt (default: 2)
    #[serde(default = "default_analyzer_retries")]
    pub analyzer_retries: u32,

    /// Initial backoff between analyzer retries, doubled each retry (default: 200ms)
    #[serde(default = "default_analyzer_backoff_ms")]
    pub analyzer_backoff_ms: u64,

    /// Simultaneous analyzer calls per window (default: 5)
    #[serde(default = "default_window_concurrency")]
    pub window_concurrency: usize,

    /// Simultaneous outbound analyzer calls platform-wide (default: 16)
    #[serde(default = "default_global_concurrency")]
    pub global_concurrency: usize,

    /// Whole-window attempts when every analyzer fails (default: 3)
    #[serde(default = "default_window_retries")]
    pub window_retries: u32,

    /// Initial backoff between whole-window attempts, doubled each time (default: 1s)
    #[serde(default = "default_window_retry_backoff_ms")]
    pub window_retry_backoff_ms: u64,

    /// Emission retries after a successful diagnosis write (default: 3)
    #[serde(default = "default_emit_retries")]
    pub emit_retries: u32,

    /// Delay between emission retries (default: 500ms)
    #[serde(default = "default_emit_retry_ms")]
    pub emit_retry_ms: u64,

    /// Knowledge retrieval passages per analyzer call (default: 5)
    #[serde(default = "default_retrieval_top_k")]
    pub retrieval_top_k: u32,

    /// Minimum retrieval similarity to include a passage (default: 0.6)
    #[serde(default = "default_retrieval_min_similarity")]
    pub retrieval_min_similarity: f64,

    /// Jaro-Winkler similarity at which two conditions merge-group (default: 0.85)
    #[serde(default = "default_merge_similarity")]
    pub merge_similarity: f64,
}

// Default value functions
fn default_idle_window_seconds() -> i64 {
    1800
}

fn default_event_cap() -> u32 {
    10
}

fn default_critical_severity() -> f64 {
    0.8
}

fn default_sweep_interval_seconds() -> u64 {
    5
}

fn default_accept_threshold() -> f64 {
    0.7
}

fn default_review_threshold() -> f64 {
    0.3
}

fn default_classifier_timeout_seconds() -> u64 {
    5
}

fn default_analyzer_timeout_seconds() -> u64 {
    10
}

fn default_analyzer_retries() -> u32 {
    2
}

fn default_analyzer_backoff_ms() -> u64 {
    200
}

fn default_window_concurrency() -> usize {
    5
}

fn default_global_concurrency() -> usize {
    16
}

fn default_window_retries() -> u32 {
    3
}

fn default_window_retry_backoff_ms() -> u64 {
    1000
}

fn default_emit_retries() -> u32 {
    3
}

fn default_emit_retry_ms() -> u64 {
    500
}

fn default_retrieval_top_k() -> u32 {
    5
}

fn default_retrieval_min_similarity() -> f64 {
    0.6
}

fn default_merge_similarity() -> f64 {
    0.85
}

impl Default for EngineParams {
    fn default() -> Self {
        Self {
            idle_window_seconds: default_idle_window_seconds(),
            event_cap: default_event_cap(),
            critical_severity: default_critical_severity(),
            sweep_interval_seconds: default_sweep_interval_seconds(),
            accept_threshold: default_accept_threshold(),
            review_threshold: default_review_threshold(),
            classifier_timeout_seconds: default_classifier_timeout_seconds(),
            analyzer_timeout_seconds: default_analyzer_timeout_seconds(),
            analyzer_retries: default_analyzer_retries(),
            analyzer_backoff_ms: default_analyzer_backoff_ms(),
            window_concurrency: default_window_concurrency(),
            global_concurrency: default_global_concurrency(),
            window_retries: default_window_retries(),
            window_retry_backoff_ms: default_window_retry_backoff_ms(),
            emit_retries: default_emit_retries(),
            emit_retry_ms: default_emit_retry_ms(),
            retrieval_top_k: default_retrieval_top_k(),
            retrieval_min_similarity: default_retrieval_min_similarity(),
            merge_similarity: default_merge_similarity(),
        }
    }
}

impl EngineParams {
    /// Sliding idle window as a chrono duration
    pub fn idle_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.idle_window_seconds)
    }

    /// Sweep tick as a std duration
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }

    /// Classifier call timeout
    pub fn classifier_timeout(&self) -> Duration {
        Duration::from_secs(self.classifier_timeout_seconds)
    }

    /// Per-analyzer call timeout
    pub fn analyzer_timeout(&self) -> Duration {
        Duration::from_secs(self.analyzer_timeout_seconds)
    }
}
