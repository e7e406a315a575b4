use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GenerationError {
    #[error("generation service rate limited the request")]
    RateLimited,
    #[error("generation request was invalid: {message}")]
    InvalidRequest { message: String },
    #[error("generation service failed upstream: {message}")]
    UpstreamFailure { message: String },
    #[error("generation request timed out")]
    Timeout,
}

impl GenerationError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited | Self::UpstreamFailure { .. } | Self::Timeout)
    }
}

/// Response-generation service. `mode` tags the request with the calling
/// stage or response channel so the service can route to the right model
/// configuration.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn generate(&self, prompt: &str, mode: &str) -> Result<String, GenerationError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 2, base_delay_ms: 250, max_delay_ms: 5_000 }
    }
}

impl RetryPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

/// Bounded-backoff retry for transient generation failures. These retries
/// happen at the call site and never consume the validation retry budget.
pub async fn generate_with_retry(
    client: &dyn LlmClient,
    prompt: &str,
    mode: &str,
    policy: &RetryPolicy,
) -> Result<String, GenerationError> {
    let mut attempt = 0;
    loop {
        match client.generate(prompt, mode).await {
            Ok(text) => return Ok(text),
            Err(error) if error.is_transient() && attempt < policy.max_retries => {
                warn!(attempt, mode, error = %error, "generation attempt failed; backing off");
                tokio::time::sleep(policy.backoff(attempt)).await;
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}

/// HTTP generation client. Expects `POST {base}/v1/generate` with
/// `{model, mode, prompt}` returning `{"text": ...}`.
pub struct HttpLlmClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<SecretString>,
    model: String,
}

impl HttpLlmClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<SecretString>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, GenerationError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| GenerationError::UpstreamFailure { message: error.to_string() })?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    text: String,
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn generate(&self, prompt: &str, mode: &str) -> Result<String, GenerationError> {
        let mut request = self.http.post(format!("{}/v1/generate", self.base_url)).json(
            &serde_json::json!({
                "model": self.model,
                "mode": mode,
                "prompt": prompt,
            }),
        );
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }

        let response = request.send().await.map_err(|error| {
            if error.is_timeout() {
                GenerationError::Timeout
            } else {
                GenerationError::UpstreamFailure { message: error.to_string() }
            }
        })?;

        match response.status() {
            status if status.is_success() => {}
            reqwest::StatusCode::TOO_MANY_REQUESTS => return Err(GenerationError::RateLimited),
            status if status.is_client_error() => {
                let message = response.text().await.unwrap_or_default();
                return Err(GenerationError::InvalidRequest { message });
            }
            status => {
                return Err(GenerationError::UpstreamFailure {
                    message: format!("unexpected status {status}"),
                })
            }
        }

        let payload: GenerateResponse = response
            .json()
            .await
            .map_err(|error| GenerationError::UpstreamFailure { message: error.to_string() })?;
        Ok(payload.text)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use super::{generate_with_retry, GenerationError, LlmClient, RetryPolicy};

    struct FlakyClient {
        failures_before_success: u32,
        attempts: AtomicU32,
    }

    #[async_trait]
    impl LlmClient for FlakyClient {
        async fn generate(&self, _prompt: &str, _mode: &str) -> Result<String, GenerationError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < self.failures_before_success {
                Err(GenerationError::UpstreamFailure { message: "flaky".to_string() })
            } else {
                Ok("recovered".to_string())
            }
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy { max_retries: 2, base_delay_ms: 1, max_delay_ms: 2 }
    }

    #[tokio::test]
    async fn transient_failures_are_retried_with_backoff() {
        let client = FlakyClient { failures_before_success: 2, attempts: AtomicU32::new(0) };
        let text = generate_with_retry(&client, "prompt", "draft", &fast_policy())
            .await
            .expect("recovers within budget");
        assert_eq!(text, "recovered");
        assert_eq!(client.attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_budget_is_bounded() {
        let client = FlakyClient { failures_before_success: 10, attempts: AtomicU32::new(0) };
        let error = generate_with_retry(&client, "prompt", "draft", &fast_policy())
            .await
            .expect_err("budget exhausted");
        assert!(error.is_transient());
        assert_eq!(client.attempts.load(Ordering::SeqCst), 3);
    }

    struct InvalidClient;

    #[async_trait]
    impl LlmClient for InvalidClient {
        async fn generate(&self, _prompt: &str, _mode: &str) -> Result<String, GenerationError> {
            Err(GenerationError::InvalidRequest { message: "bad prompt".to_string() })
        }
    }

    #[tokio::test]
    async fn non_transient_failures_are_not_retried() {
        let error = generate_with_retry(&InvalidClient, "prompt", "plan", &fast_policy())
            .await
            .expect_err("invalid request is terminal");
        assert!(!error.is_transient());
    }
}
