//! Grower context service client
//!
//! Fetches region, crop, and recent weather for a grower. Callers treat
//! a failed fetch as "no context" rather than failing the pipeline.

use tracing::debug;

use crate::adapters::{AdapterError, GrowerContext, GrowerContextProvider};

const USER_AGENT: &str = "cropscout-te/0.1";

pub struct HttpContextProvider {
    base_url: String,
    client: reqwest::Client,
    rate_limiter: governor::RateLimiter<
        governor::state::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl HttpContextProvider {
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
impl GrowerContextProvider for HttpContextProvider {
    async fn context_for(&self, grower_id: &str) -> Result<GrowerContext, AdapterError> {
        // Rate limit API calls
        self.rate_limiter.until_ready().await;

        let url = format!("{}/growers/{}/context", self.base_url, grower_id);
        let response = self.client.get(&url).send().await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(AdapterError::NotAvailable(format!(
                "No context for grower {}",
                grower_id
            )));
        }

        if !response.status().is_success() {
            return Err(AdapterError::Api(format!(
                "Context service returned {}",
                response.status()
            )));
        }

        let context: GrowerContext = response
            .json()
            .await
            .map_err(|e| AdapterError::Parse(format!("Failed to parse context response: {}", e)))?;

        debug!(grower_id = %grower_id, "Fetched grower context");

        Ok(context)
    }
}
