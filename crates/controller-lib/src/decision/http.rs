//! HTTP decision model
//!
//! Posts the feature vector as JSON to `<endpoint>/predict`.

use super::{async_trait, DecisionModel, DecisionRequest, DecisionResponse};
use crate::error::{ControlError, Result};
use crate::rate_limit::RateLimiter;
use anyhow::Context;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Configuration for the HTTP decision model
#[derive(Debug, Clone)]
pub struct HttpModelConfig {
    /// Base URL of the decision service (e.g., "http://localhost:8003")
    pub endpoint: String,
    /// Transport-level request timeout
    pub request_timeout: Duration,
}

impl Default for HttpModelConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8003".to_string(),
            request_timeout: Duration::from_secs(2),
        }
    }
}

pub struct HttpDecisionModel {
    client: reqwest::Client,
    predict_url: Url,
    request_timeout: Duration,
    limiter: RateLimiter,
}

impl HttpDecisionModel {
    pub fn new(config: HttpModelConfig, limiter: RateLimiter) -> anyhow::Result<Self> {
        let predict_url = predict_url(&config.endpoint)?;
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("Failed to build decision HTTP client")?;

        Ok(Self {
            client,
            predict_url,
            request_timeout: config.request_timeout,
            limiter,
        })
    }

    pub fn predict_url(&self) -> &Url {
        &self.predict_url
    }

    fn map_error(&self, err: reqwest::Error) -> ControlError {
        if err.is_timeout() {
            ControlError::DecisionTimeout(self.request_timeout)
        } else if err.is_decode() {
            ControlError::DecisionInvalid(format!("malformed decision response: {}", err))
        } else {
            ControlError::Unavailable(format!("decision endpoint: {}", err))
        }
    }
}

/// Resolve `<endpoint>/predict`, keeping any path prefix of the endpoint
fn predict_url(endpoint: &str) -> anyhow::Result<Url> {
    let mut base = Url::parse(endpoint)
        .with_context(|| format!("Invalid decision endpoint '{}'", endpoint))?;
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join("predict")
        .with_context(|| format!("Invalid decision endpoint '{}'", endpoint))
}

#[async_trait]
impl DecisionModel for HttpDecisionModel {
    async fn score(&self, request: &DecisionRequest) -> Result<DecisionResponse> {
        self.limiter.acquire().await;

        debug!(workload = %request.workload, url = %self.predict_url, "Requesting decision");
        let response = self
            .client
            .post(self.predict_url.clone())
            .json(request)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ControlError::Unavailable(format!(
                "decision endpoint returned {}",
                status
            )));
        }

        response
            .json::<DecisionResponse>()
            .await
            .map_err(|e| self.map_error(e))
    }
}
