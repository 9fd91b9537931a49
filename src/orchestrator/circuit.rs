//! Per-provider circuit breaker. States mirror the classic
//! closed/open/half-open machine: `failure_threshold` consecutive failures
//! trip the breaker, a `cooldown_ms` window later it lets exactly one probe
//! request through (half-open), and that probe's outcome decides whether it
//! closes again or re-opens.

use std::collections::HashMap;
use std::time::Instant;

use tokio::sync::RwLock;

use crate::configuration::GpuSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct ProviderCircuit {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

impl ProviderCircuit {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
        }
    }
}

pub struct CircuitRegistry {
    circuits: RwLock<HashMap<String, ProviderCircuit>>,
    failure_threshold: u32,
    cooldown_ms: u64,
}

impl CircuitRegistry {
    pub fn new(settings: &GpuSettings) -> Self {
        Self {
            circuits: RwLock::new(HashMap::new()),
            failure_threshold: settings.failure_threshold,
            cooldown_ms: settings.cooldown_ms,
        }
    }

    /// Returns whether a call to `provider` should be attempted right now,
    /// transitioning Open -> HalfOpen if the cooldown has elapsed.
    pub async fn allow_request(&self, provider: &str) -> bool {
        let mut circuits = self.circuits.write().await;
        let circuit = circuits
            .entry(provider.to_string())
            .or_insert_with(ProviderCircuit::new);

        match circuit.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => false, // a probe is already in flight
            CircuitState::Open => {
                let elapsed = circuit
                    .opened_at
                    .map(|t| t.elapsed().as_millis() as u64)
                    .unwrap_or(u64::MAX);
                if elapsed >= self.cooldown_ms {
                    circuit.state = CircuitState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub async fn record_success(&self, provider: &str) {
        let mut circuits = self.circuits.write().await;
        let circuit = circuits
            .entry(provider.to_string())
            .or_insert_with(ProviderCircuit::new);

        if circuit.state != CircuitState::Closed {
            tracing::info!(provider, "circuit closed after successful probe");
        }
        circuit.state = CircuitState::Closed;
        circuit.consecutive_failures = 0;
        circuit.opened_at = None;
    }

    pub async fn record_failure(&self, provider: &str) {
        let mut circuits = self.circuits.write().await;
        let circuit = circuits
            .entry(provider.to_string())
            .or_insert_with(ProviderCircuit::new);

        circuit.consecutive_failures += 1;

        let should_open = match circuit.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => circuit.consecutive_failures >= self.failure_threshold,
            CircuitState::Open => false,
        };

        if should_open {
            circuit.state = CircuitState::Open;
            circuit.opened_at = Some(Instant::now());
            tracing::warn!(provider, failures = circuit.consecutive_failures, "circuit opened");
        }
    }

    pub async fn state(&self, provider: &str) -> CircuitState {
        let circuits = self.circuits.read().await;
        circuits
            .get(provider)
            .map(|c| c.state)
            .unwrap_or(CircuitState::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(failure_threshold: u32, cooldown_ms: u64) -> GpuSettings {
        GpuSettings {
            primary: "alpha".to_string(),
            fallback: vec!["beta".to_string()],
            timeout_ms: 5000,
            retry_attempts: 2,
            failure_threshold,
            cooldown_ms,
            caption_timeout_ms: 3000,
            poll_interval_ms: 2000,
            poll_timeout_ms: 120_000,
        }
    }

    #[tokio::test]
    async fn opens_after_threshold_consecutive_failures() {
        let registry = CircuitRegistry::new(&settings(2, 10_000));

        assert!(registry.allow_request("alpha").await);
        registry.record_failure("alpha").await;
        assert_eq!(registry.state("alpha").await, CircuitState::Closed);

        registry.record_failure("alpha").await;
        assert_eq!(registry.state("alpha").await, CircuitState::Open);
        assert!(!registry.allow_request("alpha").await);
    }

    #[tokio::test]
    async fn half_open_probe_failure_reopens_the_circuit() {
        let registry = CircuitRegistry::new(&settings(1, 0));

        registry.record_failure("alpha").await;
        assert_eq!(registry.state("alpha").await, CircuitState::Open);

        // cooldown is 0ms, so the next allow_request immediately probes
        assert!(registry.allow_request("alpha").await);
        assert_eq!(registry.state("alpha").await, CircuitState::HalfOpen);

        registry.record_failure("alpha").await;
        assert_eq!(registry.state("alpha").await, CircuitState::Open);
    }

    #[tokio::test]
    async fn successful_probe_closes_the_circuit() {
        let registry = CircuitRegistry::new(&settings(1, 0));

        registry.record_failure("alpha").await;
        assert!(registry.allow_request("alpha").await);
        registry.record_success("alpha").await;

        assert_eq!(registry.state("alpha").await, CircuitState::Closed);
        assert!(registry.allow_request("alpha").await);
    }
}
