//! Single entry point the HTTP handlers call to turn a validated request
//! into a queued job: validate, price, reserve credits, create the job row,
//! enqueue. Each step pushes an undo onto one rollback stack so a failure
//! partway through leaves no orphaned reservation or job row behind, rather
//! than scattering that cleanup across each handler.

pub mod idempotency;

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::domain::{pricing, Job, JobKind, JobParams};
use crate::job_store::JobStore;
use crate::ledger::CreditLedger;
use crate::queue::Queue;
use crate::rate_limit::{RateLimiter, Tier};

pub use idempotency::IdempotencyStore;

#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },
    #[error("insufficient credits")]
    InsufficientCredits,
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<crate::ledger::LedgerError> for AdmissionError {
    fn from(e: crate::ledger::LedgerError) -> Self {
        match e {
            crate::ledger::LedgerError::InsufficientCredits => AdmissionError::InsufficientCredits,
            other => AdmissionError::Internal(other.into()),
        }
    }
}

impl From<crate::job_store::JobStoreError> for AdmissionError {
    fn from(e: crate::job_store::JobStoreError) -> Self {
        AdmissionError::Internal(e.into())
    }
}

impl From<crate::queue::QueueError> for AdmissionError {
    fn from(e: crate::queue::QueueError) -> Self {
        AdmissionError::Internal(e.into())
    }
}

/// Undo actions accumulated as admission proceeds, run in reverse on any
/// later failure.
enum Undo {
    RefundReservation {
        owner: String,
        amount: i64,
        job_ref: Uuid,
    },
}

pub struct AdmissionController {
    job_store: Arc<JobStore>,
    ledger: Arc<dyn CreditLedger>,
    queue: Arc<Queue>,
    rate_limiter: Arc<RateLimiter>,
}

impl AdmissionController {
    pub fn new(
        job_store: Arc<JobStore>,
        ledger: Arc<dyn CreditLedger>,
        queue: Arc<Queue>,
        rate_limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            job_store,
            ledger,
            queue,
            rate_limiter,
        }
    }

    pub async fn submit(
        &self,
        owner: &str,
        kind: JobKind,
        params: JobParams,
        base_tier: Tier,
    ) -> Result<Job, AdmissionError> {
        validate_params(kind, &params)?;

        let action = match kind {
            JobKind::Image => "generate_image",
            JobKind::Video => "generate_video",
            JobKind::Training => "generate_training",
        };

        let tier = self
            .rate_limiter
            .effective_tier(owner, base_tier)
            .await
            .unwrap_or(base_tier);
        let decision = self.rate_limiter.check(owner, action, tier).await;
        if !decision.allowed {
            return Err(AdmissionError::RateLimited {
                retry_after_ms: decision.retry_after_ms,
            });
        }

        let cost = pricing::price(kind, &params).map_err(AdmissionError::Validation)?;

        let mut undo: Vec<Undo> = Vec::new();

        let job = self.admit_inner(owner, kind, params, cost, &mut undo).await;

        if job.is_err() {
            self.rollback(undo).await;
        }

        job
    }

    async fn admit_inner(
        &self,
        owner: &str,
        kind: JobKind,
        params: JobParams,
        cost: i64,
        undo: &mut Vec<Undo>,
    ) -> Result<Job, AdmissionError> {
        let job_id = Uuid::new_v4();
        self.ledger
            .reserve(owner, cost, "job_reserve", Some(job_id))
            .await?;
        undo.push(Undo::RefundReservation {
            owner: owner.to_string(),
            amount: cost,
            job_ref: job_id,
        });

        let job = self
            .job_store
            .create_with_id(job_id, owner, kind, params, cost)
            .await?;

        self.queue.enqueue(job.id, kind).await?;

        tracing::info!(job_id = %job.id, owner, ?kind, cost, "job admitted");
        Ok(job)
    }

    async fn rollback(&self, undo: Vec<Undo>) {
        for action in undo.into_iter().rev() {
            match action {
                Undo::RefundReservation {
                    owner,
                    amount,
                    job_ref,
                } => {
                    if let Err(e) = self
                        .ledger
                        .refund(&owner, amount, job_ref, "admission_rollback")
                        .await
                    {
                        tracing::error!(error = %e, %job_ref, "failed to roll back credit reservation");
                    }
                }
            }
        }
    }
}

fn validate_params(kind: JobKind, params: &JobParams) -> Result<(), AdmissionError> {
    if params.prompt.trim().is_empty() {
        return Err(AdmissionError::Validation("prompt must not be empty".to_string()));
    }
    if params.prompt.len() > 4000 {
        return Err(AdmissionError::Validation("prompt exceeds 4000 characters".to_string()));
    }

    match kind {
        JobKind::Video => {
            if params.duration_seconds.is_none() && params.generation_type.is_none() {
                return Err(AdmissionError::Validation(
                    "video jobs require duration_seconds or generation_type".to_string(),
                ));
            }
        }
        JobKind::Training => {
            if params.training_steps.is_none() {
                return Err(AdmissionError::Validation(
                    "training jobs require training_steps".to_string(),
                ));
            }
        }
        JobKind::Image => {}
    }

    Ok(())
}

pub const DUPLICATE_SUBMISSION_WINDOW: Duration = Duration::from_secs(10);
