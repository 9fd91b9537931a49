//! Owns the canonical `jobs` table and is the only component allowed to
//! write job rows. All status mutations route through `validate_transition`
//! so the state-machine invariants hold regardless of which caller (worker,
//! admission, cancel handler) issues them.

use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{Job, JobKind, JobParams, JobState, JobStatusUpdate, validate_transition};

#[derive(Debug, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found")]
    NotFound,
    #[error("illegal transition: {0}")]
    IllegalTransition(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub struct JobStore {
    pool: PgPool,
}

impl JobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        owner: &str,
        kind: JobKind,
        params: JobParams,
        cost: i64,
    ) -> Result<Job, JobStoreError> {
        self.create_with_id(Uuid::new_v4(), owner, kind, params, cost).await
    }

    /// Like `create`, but the caller supplies the job id up front. Needed by
    /// the admission controller, which must reserve credits under the same
    /// id the job row will get so the debit and any later refund share one
    /// `job_ref` and net to zero.
    pub async fn create_with_id(
        &self,
        id: Uuid,
        owner: &str,
        kind: JobKind,
        params: JobParams,
        cost: i64,
    ) -> Result<Job, JobStoreError> {
        let params_json = serde_json::to_value(&params).map_err(|e| {
            JobStoreError::Database(sqlx::Error::Decode(Box::new(e)))
        })?;

        let job: Job = sqlx::query_as(
            r#"
            INSERT INTO jobs (id, owner, kind, params, cost, state, progress, attempts,
                               moderation, is_public, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, 'pending', 0, 0, 'unknown', false, now(), now())
            RETURNING id, owner, kind, params, cost, state, progress, attempts, provider,
                      result, error, moderation, is_public, created_at, updated_at, completed_at
            "#,
        )
        .bind(id)
        .bind(owner)
        .bind(kind)
        .bind(params_json)
        .bind(cost)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(job_id = %id, owner, ?kind, cost, "job created");
        Ok(job)
    }

    pub async fn get(&self, id: Uuid) -> Result<Job, JobStoreError> {
        let job: Option<Job> = sqlx::query_as(
            r#"
            SELECT id, owner, kind, params, cost, state, progress, attempts, provider,
                   result, error, moderation, is_public, created_at, updated_at, completed_at
            FROM jobs WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        job.ok_or(JobStoreError::NotFound)
    }

    pub async fn list_by_owner(&self, owner: &str, limit: i64) -> Result<Vec<Job>, JobStoreError> {
        let jobs: Vec<Job> = sqlx::query_as(
            r#"
            SELECT id, owner, kind, params, cost, state, progress, attempts, provider,
                   result, error, moderation, is_public, created_at, updated_at, completed_at
            FROM jobs WHERE owner = $1 ORDER BY created_at DESC LIMIT $2
            "#,
        )
        .bind(owner)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(jobs)
    }

    /// Used by the admission controller's duplicate-submission check
    /// within a short window.
    pub async fn get_recent_by_owner_and_prompt(
        &self,
        owner: &str,
        prompt: &str,
        within_seconds: i64,
    ) -> Result<Option<Job>, JobStoreError> {
        let job: Option<Job> = sqlx::query_as(
            r#"
            SELECT id, owner, kind, params, cost, state, progress, attempts, provider,
                   result, error, moderation, is_public, created_at, updated_at, completed_at
            FROM jobs
            WHERE owner = $1
              AND params->>'prompt' = $2
              AND created_at > now() - ($3 || ' seconds')::interval
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(owner)
        .bind(prompt)
        .bind(within_seconds.to_string())
        .fetch_optional(&self.pool)
        .await?;

        Ok(job)
    }

    pub async fn update_status(
        &self,
        id: Uuid,
        update: JobStatusUpdate,
    ) -> Result<Job, JobStoreError> {
        let mut tx = self.pool.begin().await?;

        let current: Job = sqlx::query_as(
            r#"
            SELECT id, owner, kind, params, cost, state, progress, attempts, provider,
                   result, error, moderation, is_public, created_at, updated_at, completed_at
            FROM jobs WHERE id = $1 FOR UPDATE
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(JobStoreError::NotFound)?;

        validate_transition(&current, &update).map_err(JobStoreError::IllegalTransition)?;

        let next_state = update.state.unwrap_or(current.state);
        let next_progress = update.progress.unwrap_or(current.progress);
        let next_provider = update.provider.or(current.provider);
        let next_result = update.result.or(current.result);
        let next_error = update.error.or(current.error);
        let next_moderation = update.moderation.unwrap_or(current.moderation);
        let next_is_public = update.is_public.unwrap_or(current.is_public);

        let result_json = next_result
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| JobStoreError::Database(sqlx::Error::Decode(Box::new(e))))?;
        let error_json = next_error
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| JobStoreError::Database(sqlx::Error::Decode(Box::new(e))))?;

        let newly_completed =
            current.state != JobState::Completed && next_state == JobState::Completed;

        let job: Job = sqlx::query_as(
            r#"
            UPDATE jobs
            SET state = $2, progress = $3, provider = $4, result = $5, error = $6,
                moderation = $7, is_public = $8, updated_at = now(),
                completed_at = CASE WHEN $9 THEN now() ELSE completed_at END,
                attempts = CASE WHEN $2 = 'processing' AND state != 'processing'
                                THEN attempts + 1 ELSE attempts END
            WHERE id = $1
            RETURNING id, owner, kind, params, cost, state, progress, attempts, provider,
                      result, error, moderation, is_public, created_at, updated_at, completed_at
            "#,
        )
        .bind(id)
        .bind(next_state)
        .bind(next_progress)
        .bind(next_provider)
        .bind(result_json)
        .bind(error_json)
        .bind(next_moderation)
        .bind(next_is_public)
        .bind(newly_completed)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::debug!(job_id = %id, ?next_state, next_progress, "job status updated");
        Ok(job)
    }
}
