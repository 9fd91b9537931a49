//! GPU provider orchestration. Fans a generation request out across an
//! ordered list of providers, each guarded by its own circuit breaker, and
//! retries the whole ordered list up to `retry_attempts` times before giving
//! up.

pub mod circuit;
pub mod provider;

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::configuration::GpuSettings;
use crate::domain::{JobKind, JobParams, JobResult};

pub use circuit::{CircuitState, ProviderCircuit};
pub use provider::{CaptionProvider, GenerateRequest, HealthStatus, Provider, ProviderError};

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("all providers exhausted for job kind {0:?}")]
    AllProvidersExhausted(JobKind),
    #[error("provider {0} circuit is open")]
    CircuitOpen(String),
    #[error("provider error: {0}")]
    Provider(String),
}

pub struct Orchestrator {
    providers: Vec<Arc<dyn Provider>>,
    caption_provider: Option<Arc<dyn CaptionProvider>>,
    circuits: circuit::CircuitRegistry,
    retry_attempts: u32,
}

impl Orchestrator {
    pub fn new(
        providers: Vec<Arc<dyn Provider>>,
        caption_provider: Option<Arc<dyn CaptionProvider>>,
        settings: &GpuSettings,
    ) -> Self {
        Self {
            providers,
            caption_provider,
            circuits: circuit::CircuitRegistry::new(settings),
            retry_attempts: settings.retry_attempts,
        }
    }

    /// For each of `retry_attempts` rounds, walk the configured provider
    /// order; a provider whose circuit is open is skipped without being
    /// called. Returns the first success; otherwise `AllProvidersExhausted`.
    pub async fn generate(
        &self,
        kind: JobKind,
        params: &JobParams,
    ) -> Result<JobResult, OrchestratorError> {
        let request = GenerateRequest { kind, params };

        for attempt in 0..self.retry_attempts {
            for provider in &self.providers {
                let name = provider.name();

                if !self.circuits.allow_request(name).await {
                    tracing::debug!(provider = name, attempt, "circuit open, skipping");
                    continue;
                }

                let started = std::time::Instant::now();
                match provider.generate(&request).await {
                    Ok(mut result) => {
                        result.latency_ms = Some(started.elapsed().as_millis() as u64);
                        self.circuits.record_success(name).await;
                        return Ok(result);
                    }
                    Err(e) => {
                        tracing::warn!(provider = name, attempt, error = %e, "provider call failed");
                        self.circuits.record_failure(name).await;
                    }
                }
            }

            if attempt + 1 < self.retry_attempts {
                let jitter_ms = rand::thread_rng().gen_range(50..250);
                tokio::time::sleep(Duration::from_millis(jitter_ms)).await;
            }
        }

        Err(OrchestratorError::AllProvidersExhausted(kind))
    }

    pub async fn caption(&self, image_url: &str) -> Option<String> {
        let provider = self.caption_provider.as_ref()?;
        match provider.caption(image_url).await {
            Ok(caption) => Some(caption),
            Err(e) => {
                tracing::warn!(error = %e, "caption enrichment failed, continuing without it");
                None
            }
        }
    }

    /// Fans a short-timeout health probe out to every provider and pairs it
    /// with that provider's current circuit state.
    pub async fn health_all(&self) -> Vec<ProviderHealthReport> {
        let mut out = Vec::with_capacity(self.providers.len());
        for provider in &self.providers {
            let circuit = self.circuits.state(provider.name()).await;
            let probe = provider.health().await;
            out.push(ProviderHealthReport {
                name: provider.name().to_string(),
                circuit,
                probe,
            });
        }
        out
    }
}

pub struct ProviderHealthReport {
    pub name: String,
    pub circuit: CircuitState,
    pub probe: HealthStatus,
}
