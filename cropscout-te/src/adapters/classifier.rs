//! HTTP classifier adapter
//!
//! Thin JSON client for the external classify capability. The service
//! wraps a language model, so calls are rate limited and the engine
//! treats the response as an opaque (label, confidence) pair.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::adapters::{AdapterError, ClassifierVerdict, EvidenceClassifier, GrowerContext};
use crate::models::{EvidenceWindow, ObservationEvent};

const USER_AGENT: &str = "cropscout-te/0.1";

#[derive(Serialize)]
struct ClassifyRequest<'a> {
    grower_id: &'a str,
    events: &'a [ObservationEvent],
    context: &'a GrowerContext,
}

#[derive(Debug, Deserialize)]
struct ClassifyResponse {
    classification: String,
    confidence: f64,
}

/// Classifier service client
pub struct HttpClassifier {
    base_url: String,
    client: reqwest::Client,
    rate_limiter: governor::RateLimiter<
        governor::state::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl HttpClassifier {
    /// Build a client for the classifier service at base_url
    ///
    /// Requests are limited to 5/second; the per-call deadline is
    /// enforced by the triage router, the client timeout is only a
    /// backstop.
    pub fn new(base_url: String) -> Result<Self, AdapterError> {
        // Safe: 5 is always non-zero
        let quota = governor::Quota::per_second(std::num::NonZeroU32::new(5).unwrap());
        let rate_limiter = governor::RateLimiter::direct(quota);

        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| AdapterError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url,
            client,
            rate_limiter,
        })
    }
}

#[async_trait::async_trait]
impl EvidenceClassifier for HttpClassifier {
    fn name(&self) -> &'static str {
        "http_classifier"
    }

    async fn classify(
        &self,
        window: &EvidenceWindow,
        context: &GrowerContext,
    ) -> Result<ClassifierVerdict, AdapterError> {
        debug!(window_id = %window.window_id, "Classifying evidence window");

        // Rate limit API calls
        self.rate_limiter.until_ready().await;

        let url = format!("{}/classify", self.base_url);
        let request = ClassifyRequest {
            grower_id: &window.grower_id,
            events: &window.events,
            context,
        };

        let response = self.client.post(&url).json(&request).send().await?;

        if !response.status().is_success() {
            return Err(AdapterError::Api(format!(
                "Classifier returned {}",
                response.status()
            )));
        }

        let verdict: ClassifyResponse = response
            .json()
            .await
            .map_err(|e| AdapterError::Parse(format!("Failed to parse classifier response: {}", e)))?;

        debug!(
            window_id = %window.window_id,
            classification = %verdict.classification,
            confidence = verdict.confidence,
            "Classifier verdict received"
        );

        Ok(ClassifierVerdict {
            label: verdict.classification,
            confidence: verdict.confidence.clamp(0.0, 1.0),
        })
    }
}
