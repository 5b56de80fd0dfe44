//! Knowledge retrieval service client

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::adapters::{AdapterError, KnowledgeRetriever, RankedPassage};

const USER_AGENT: &str = "cropscout-te/0.1";

#[derive(Serialize)]
struct RetrieveRequest<'a> {
    domain: &'a str,
    query: &'a str,
    top_k: u32,
    min_similarity: f64,
}

#[derive(Debug, Deserialize)]
struct RetrieveResponse {
    #[serde(default)]
    passages: Vec<RankedPassage>,
}

/// Client for the agronomy knowledge retrieval service
pub struct HttpRetriever {
    base_url: String,
    client: reqwest::Client,
    rate_limiter: governor::RateLimiter<
        governor::state::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl HttpRetriever {
    pub fn new(base_url: String) -> Result<Self, AdapterError> {
        // Safe: 10 is always non-zero
        let quota = governor::Quota::per_second(std::num::NonZeroU32::new(10).unwrap());
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
impl KnowledgeRetriever for HttpRetriever {
    async fn retrieve(
        &self,
        domain: &str,
        query: &str,
        top_k: u32,
        min_similarity: f64,
    ) -> Result<Vec<RankedPassage>, AdapterError> {
        // Rate limit API calls
        self.rate_limiter.until_ready().await;

        let url = format!("{}/retrieve", self.base_url);
        let request = RetrieveRequest {
            domain,
            query,
            top_k,
            min_similarity,
        };

        let response = self.client.post(&url).json(&request).send().await?;

        if !response.status().is_success() {
            return Err(AdapterError::Api(format!(
                "Retrieval service returned {}",
                response.status()
            )));
        }

        let body: RetrieveResponse = response
            .json()
            .await
            .map_err(|e| AdapterError::Parse(format!("Failed to parse retrieval response: {}", e)))?;

        // The service is asked for min_similarity but enforce it here too
        let passages: Vec<RankedPassage> = body
            .passages
            .into_iter()
            .filter(|p| p.similarity >= min_similarity)
            .take(top_k as usize)
            .collect();

        debug!(
            domain = %domain,
            passages = passages.len(),
            "Retrieved knowledge passages"
        );

        Ok(passages)
    }
}
