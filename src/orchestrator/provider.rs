//! Provider abstraction: a thin reqwest-backed client behind an
//! `#[async_trait]` trait so the orchestrator never depends on a concrete
//! vendor SDK.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::{JobKind, JobParams, JobResult};

pub struct GenerateRequest<'a> {
    pub kind: JobKind,
    pub params: &'a JobParams,
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("request to provider failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("provider returned an error status: {0}")]
    Status(u16),
    #[error("provider response could not be parsed: {0}")]
    Decode(String),
    #[error("provider reported job failure: {0}")]
    JobFailed(String),
    #[error("polling for a terminal status timed out")]
    PollTimeout,
}

/// Result of a live reachability probe, reported by `healthAll` alongside
/// each provider's circuit state.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct HealthStatus {
    pub ok: bool,
    pub latency_ms: u64,
}

#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;
    async fn generate(&self, request: &GenerateRequest<'_>) -> Result<JobResult, ProviderError>;
    /// Short-timeout reachability probe, independent of the circuit
    /// breaker's cached state.
    async fn health(&self) -> HealthStatus;
}

#[async_trait]
pub trait CaptionProvider: Send + Sync {
    async fn caption(&self, image_url: &str) -> Result<String, ProviderError>;
}

/// A generic HTTP-backed GPU provider. Most production providers behind
/// this spec (Stability, Runway-style endpoints, in-house inference
/// clusters) speak a JSON request/response shape close enough to this to
/// share one client.
///
/// Handles both provider dialects: synchronous providers reply
/// `status=completed` with a media url inline; job-oriented providers reply
/// `status=started` with a `provider_job_id` and are followed up with
/// `poll_until_terminal` against their status endpoint.
pub struct HttpProvider {
    name: String,
    base_url: String,
    api_key: secrecy::Secret<String>,
    client: reqwest::Client,
    poll_interval: Duration,
    poll_timeout: Duration,
}

impl HttpProvider {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, api_key: String, timeout_ms: u64) -> Self {
        Self::with_polling(name, base_url, api_key, timeout_ms, 2_000, 120_000)
    }

    pub fn with_polling(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: String,
        timeout_ms: u64,
        poll_interval_ms: u64,
        poll_timeout_ms: u64,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .expect("failed to build reqwest client");

        Self {
            name: name.into(),
            base_url: base_url.into(),
            api_key: secrecy::Secret::new(api_key),
            client,
            poll_interval: Duration::from_millis(poll_interval_ms),
            poll_timeout: Duration::from_millis(poll_timeout_ms),
        }
    }

    async fn poll_until_terminal(&self, provider_job_id: &str) -> Result<JobResult, ProviderError> {
        use secrecy::ExposeSecret;

        let deadline = tokio::time::Instant::now() + self.poll_timeout;
        loop {
            let response = self
                .client
                .get(format!("{}/v1/status/{}", self.base_url, provider_job_id))
                .bearer_auth(self.api_key.expose_secret())
                .send()
                .await?;

            if !response.status().is_success() {
                return Err(ProviderError::Status(response.status().as_u16()));
            }

            let parsed: StatusResponse = response
                .json()
                .await
                .map_err(|e| ProviderError::Decode(e.to_string()))?;

            match parsed.status.as_str() {
                "completed" => {
                    let media_url = parsed
                        .media_url
                        .ok_or_else(|| ProviderError::Decode("completed status missing media_url".to_string()))?;
                    return Ok(JobResult {
                        media_url,
                        latency_ms: None,
                        caption: None,
                    });
                }
                "failed" => {
                    return Err(ProviderError::JobFailed(
                        parsed.error.unwrap_or_else(|| "provider job failed".to_string()),
                    ));
                }
                "started" => {
                    if tokio::time::Instant::now() >= deadline {
                        return Err(ProviderError::PollTimeout);
                    }
                    tokio::time::sleep(self.poll_interval).await;
                }
                other => return Err(ProviderError::Decode(format!("unexpected status {other}"))),
            }
        }
    }
}

#[derive(Serialize)]
struct GenerateBody<'a> {
    kind: &'a str,
    prompt: &'a str,
    negative_prompt: Option<&'a str>,
    width: Option<u32>,
    height: Option<u32>,
    init_image_url: Option<&'a str>,
    duration_seconds: Option<u32>,
    fps: Option<u32>,
    seed: Option<i64>,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default = "default_completed_status")]
    status: String,
    media_url: Option<String>,
    provider_job_id: Option<String>,
    error: Option<String>,
}

fn default_completed_status() -> String {
    "completed".to_string()
}

#[derive(Deserialize)]
struct StatusResponse {
    status: String,
    media_url: Option<String>,
    error: Option<String>,
}

#[async_trait]
impl Provider for HttpProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, request: &GenerateRequest<'_>) -> Result<JobResult, ProviderError> {
        use secrecy::ExposeSecret;

        let body = GenerateBody {
            kind: request.kind.queue_name(),
            prompt: &request.params.prompt,
            negative_prompt: request.params.negative_prompt.as_deref(),
            width: request.params.width,
            height: request.params.height,
            init_image_url: request.params.init_image_url.as_deref(),
            duration_seconds: request.params.duration_seconds,
            fps: request.params.fps,
            seed: request.params.seed,
        };

        let response = self
            .client
            .post(format!("{}/v1/generate", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ProviderError::Status(response.status().as_u16()));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;

        match parsed.status.as_str() {
            "completed" => {
                let media_url = parsed
                    .media_url
                    .ok_or_else(|| ProviderError::Decode("completed status missing media_url".to_string()))?;
                Ok(JobResult {
                    media_url,
                    latency_ms: None,
                    caption: None,
                })
            }
            "started" => {
                let provider_job_id = parsed
                    .provider_job_id
                    .ok_or_else(|| ProviderError::Decode("started status missing provider_job_id".to_string()))?;
                self.poll_until_terminal(&provider_job_id).await
            }
            "failed" => Err(ProviderError::JobFailed(
                parsed.error.unwrap_or_else(|| "provider job failed".to_string()),
            )),
            other => Err(ProviderError::Decode(format!("unexpected status {other}"))),
        }
    }

    async fn health(&self) -> HealthStatus {
        use secrecy::ExposeSecret;

        let started = std::time::Instant::now();
        let probe = self
            .client
            .get(format!("{}/v1/health", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .send()
            .await;

        let ok = matches!(probe, Ok(response) if response.status().is_success());
        HealthStatus {
            ok,
            latency_ms: started.elapsed().as_millis() as u64,
        }
    }
}

#[derive(Deserialize)]
struct CaptionResponse {
    caption: String,
}

#[async_trait]
impl CaptionProvider for HttpProvider {
    async fn caption(&self, image_url: &str) -> Result<String, ProviderError> {
        use secrecy::ExposeSecret;

        let response = self
            .client
            .post(format!("{}/v1/caption", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&serde_json::json!({ "image_url": image_url }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ProviderError::Status(response.status().as_u16()));
        }

        let parsed: CaptionResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;

        Ok(parsed.caption)
    }
}
