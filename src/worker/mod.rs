//! One processing loop per job kind, each pulled from its own queue: claim,
//! mark processing, optional caption enrichment, progress reporting,
//! terminal completion or failure with refund, and cancellation checkpoints.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::domain::{Job, JobKind, JobResult, JobState, JobStatusUpdate, ModerationStatus};
use crate::job_store::JobStore;
use crate::ledger::CreditLedger;
use crate::moderation::ModerationEngine;
use crate::notification::{Notification, NotificationCategory, NotificationDispatcher};
use crate::orchestrator::Orchestrator;
use crate::queue::Queue;

pub struct Worker {
    kind: JobKind,
    queue: Arc<Queue>,
    job_store: Arc<JobStore>,
    ledger: Arc<dyn CreditLedger>,
    orchestrator: Arc<Orchestrator>,
    moderation: Arc<ModerationEngine>,
    notifications: Arc<NotificationDispatcher>,
    poll_interval: Duration,
}

impl Worker {
    pub fn new(
        kind: JobKind,
        queue: Arc<Queue>,
        job_store: Arc<JobStore>,
        ledger: Arc<dyn CreditLedger>,
        orchestrator: Arc<Orchestrator>,
        moderation: Arc<ModerationEngine>,
        notifications: Arc<NotificationDispatcher>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            kind,
            queue,
            job_store,
            ledger,
            orchestrator,
            moderation,
            notifications,
            poll_interval,
        }
    }

    /// Runs until `shutdown` is cancelled. Each iteration claims at most one
    /// item; an empty queue sleeps for `poll_interval` before polling again.
    pub async fn run(&self, shutdown: CancellationToken) {
        loop {
            if shutdown.is_cancelled() {
                tracing::info!(kind = ?self.kind, "worker shutting down");
                return;
            }

            let claimed = tokio::select! {
                _ = shutdown.cancelled() => return,
                item = self.queue.claim_next(self.kind) => item,
            };

            match claimed {
                Ok(Some(item)) => {
                    let job_id = item.job_id;
                    if let Err(e) = self.process(item).await {
                        tracing::error!(%job_id, error = %e, "job processing failed unexpectedly");
                    }
                }
                Ok(None) => {
                    tokio::select! {
                        _ = shutdown.cancelled() => return,
                        _ = tokio::time::sleep(self.poll_interval) => {}
                    }
                }
                Err(e) => {
                    tracing::error!(kind = ?self.kind, error = %e, "failed to claim queue item");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }

    async fn process(&self, item: crate::queue::QueueItem) -> anyhow::Result<()> {
        let job_id = item.job_id;
        let job = self.job_store.get(job_id).await?;

        // Cancellation checkpoint: a job cancelled by its owner while still
        // queued never enters processing.
        if job.state == JobState::Cancelled {
            tracing::info!(%job_id, "job was cancelled before processing started");
            return Ok(());
        }

        if job.state != JobState::Processing {
            self.job_store
                .update_status(job_id, JobStatusUpdate::to_processing())
                .await?;
        }
        self.job_store
            .update_status(job_id, JobStatusUpdate::progress_to(25))
            .await?;

        let result = if self.kind == JobKind::Training {
            self.run_training_ladder(job_id, &job).await
        } else {
            self.run_generation(job_id, &job).await
        };

        match result {
            Ok(job_result) => self.complete(job_id, &job, job_result).await,
            Err(e) => {
                // Re-check for a cancellation that landed mid-flight before
                // deciding between a backoff retry and permanent failure.
                let latest = self.job_store.get(job_id).await?;
                if latest.state == JobState::Cancelled {
                    return Ok(());
                }

                let requeued = self.queue.retry_or_dead_letter(item, self.kind).await?;
                if requeued {
                    tracing::warn!(%job_id, error = %e, "job failed, requeued with backoff");
                    Ok(())
                } else {
                    self.fail(job_id, &job, e.to_string()).await
                }
            }
        }
    }

    async fn run_generation(&self, job_id: uuid::Uuid, job: &Job) -> anyhow::Result<JobResult> {
        self.job_store
            .update_status(job_id, JobStatusUpdate::progress_to(50))
            .await?;

        let mut params = job.params.clone();
        if params.caption_init_image {
            if let Some(image_url) = params.init_image_url.clone() {
                if let Some(caption) = self.orchestrator.caption(&image_url).await {
                    // Caption enrichment never writes back into the
                    // canonical params; it only augments this call's prompt.
                    params.prompt = format!("{} ({caption})", params.prompt);
                }
            }
        }

        let result = self.orchestrator.generate(job.kind, &params).await?;

        self.job_store
            .update_status(job_id, JobStatusUpdate::progress_to(90))
            .await?;

        Ok(result)
    }

    /// Training has no external provider in this deployment, so its
    /// progress follows the synthetic ladder 10/20/35/50/65/80/95/100 with a
    /// fixed delay between rungs.
    async fn run_training_ladder(&self, job_id: uuid::Uuid, _job: &Job) -> anyhow::Result<JobResult> {
        const LADDER: [i32; 8] = [10, 20, 35, 50, 65, 80, 95, 100];
        for &rung in &LADDER {
            tokio::time::sleep(Duration::from_millis(250)).await;
            if rung < 100 {
                self.job_store
                    .update_status(job_id, JobStatusUpdate::progress_to(rung))
                    .await?;
            }
        }

        Ok(JobResult {
            media_url: format!("synthetic://training/{job_id}"),
            latency_ms: None,
            caption: None,
        })
    }

    async fn complete(&self, job_id: uuid::Uuid, job: &Job, result: JobResult) -> anyhow::Result<()> {
        let provider = job.provider.clone().unwrap_or_else(|| "synthetic".to_string());
        let media_url = result.media_url.clone();
        self.job_store
            .update_status(job_id, JobStatusUpdate::to_completed(result, provider))
            .await?;

        self.notifications
            .dispatch(Notification {
                user_id: job.owner.clone(),
                category: NotificationCategory::JobCompleted,
                job_id,
                message: "your generation is ready".to_string(),
            })
            .await;

        self.moderate(job_id, job, &media_url).await;

        Ok(())
    }

    /// Runs moderation classification against the completed job's media and
    /// persists the outcome. Best effort: a classifier failure is logged and
    /// leaves `moderation=unknown`/`is_public=false`, the job's defaults
    /// since creation — it never un-completes the job.
    async fn moderate(&self, job_id: uuid::Uuid, job: &Job, media_url: &str) {
        // Account age isn't available from the upstream gateway yet; treat
        // every owner as newly created, the least-trusted band.
        let status = match self.moderation.evaluate(media_url, 0).await {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!(%job_id, error = %e, "moderation classification failed, leaving job unmoderated");
                return;
            }
        };

        let is_public = crate::moderation::is_public(status);
        if let Err(e) = self
            .job_store
            .update_status(
                job_id,
                JobStatusUpdate {
                    moderation: Some(status),
                    is_public: Some(is_public),
                    ..Default::default()
                },
            )
            .await
        {
            tracing::error!(%job_id, error = %e, "failed to persist moderation outcome");
            return;
        }

        if matches!(status, ModerationStatus::Block | ModerationStatus::Review) {
            self.notifications
                .dispatch(Notification {
                    user_id: job.owner.clone(),
                    category: NotificationCategory::ModerationEnforced,
                    job_id,
                    message: format!("your generation was flagged by moderation ({status:?})"),
                })
                .await;
        }
    }

    async fn fail(&self, job_id: uuid::Uuid, job: &Job, message: String) -> anyhow::Result<()> {
        self.job_store
            .update_status(
                job_id,
                JobStatusUpdate::to_failed(crate::domain::JobError {
                    code: "PROVIDER_FAILURE".to_string(),
                    message: message.clone(),
                }),
            )
            .await?;

        self.ledger
            .refund(&job.owner, job.cost, job_id, "job_failed")
            .await?;

        self.notifications
            .dispatch(Notification {
                user_id: job.owner.clone(),
                category: NotificationCategory::JobFailed,
                job_id,
                message,
            })
            .await;

        Ok(())
    }
}
