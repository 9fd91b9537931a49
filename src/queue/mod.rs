//! Per-kind job queues with a dead letter queue. Backed by a single
//! `queue_items` table partitioned by `queue_name`; workers claim the oldest
//! ready item with `FOR UPDATE SKIP LOCKED` so multiple worker processes
//! never double-claim.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::JobKind;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct QueueItem {
    pub id: Uuid,
    pub job_id: Uuid,
    pub queue_name: String,
    pub attempts: i32,
    pub max_attempts: i32,
    pub available_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Per-kind retry policy: image/video back off exponentially, training uses
/// a fixed delay.
fn backoff_seconds(kind: JobKind, attempt: i32) -> i64 {
    match kind {
        JobKind::Image => 3 * 2i64.pow(attempt.max(0) as u32),
        JobKind::Video => 5 * 2i64.pow(attempt.max(0) as u32),
        JobKind::Training => 10,
    }
}

fn max_attempts(kind: JobKind) -> i32 {
    match kind {
        JobKind::Image => 3,
        JobKind::Video => 5,
        JobKind::Training => 3,
    }
}

pub struct Queue {
    pool: PgPool,
}

impl Queue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn enqueue(&self, job_id: Uuid, kind: JobKind) -> Result<(), QueueError> {
        sqlx::query(
            r#"
            INSERT INTO queue_items (id, job_id, queue_name, attempts, max_attempts, available_at, created_at)
            VALUES ($1, $2, $3, 0, $4, now(), now())
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(job_id)
        .bind(kind.queue_name())
        .bind(max_attempts(kind))
        .execute(&self.pool)
        .await?;

        tracing::debug!(%job_id, queue = kind.queue_name(), "job enqueued");
        Ok(())
    }

    /// Claims the next ready item for `kind`, if any. Uses `SKIP LOCKED` so
    /// concurrent workers never contend on the same row.
    pub async fn claim_next(&self, kind: JobKind) -> Result<Option<QueueItem>, QueueError> {
        let mut tx = self.pool.begin().await?;

        let item: Option<QueueItem> = sqlx::query_as(
            r#"
            SELECT id, job_id, queue_name, attempts, max_attempts, available_at, created_at
            FROM queue_items
            WHERE queue_name = $1 AND available_at <= now()
            ORDER BY created_at ASC
            LIMIT 1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(kind.queue_name())
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(ref item) = item {
            sqlx::query("DELETE FROM queue_items WHERE id = $1")
                .bind(item.id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(item)
    }

    /// Requeues a failed item with backoff, or routes it to the DLQ once
    /// `max_attempts` is exhausted.
    pub async fn retry_or_dead_letter(
        &self,
        item: QueueItem,
        kind: JobKind,
    ) -> Result<bool, QueueError> {
        let next_attempt = item.attempts + 1;
        if next_attempt >= item.max_attempts {
            sqlx::query(
                r#"
                INSERT INTO dead_letter_items (id, job_id, queue_name, attempts, created_at)
                VALUES ($1, $2, $3, $4, now())
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(item.job_id)
            .bind(kind.dlq_name())
            .bind(next_attempt)
            .execute(&self.pool)
            .await?;

            tracing::warn!(job_id = %item.job_id, queue = kind.dlq_name(), "job moved to dead letter queue");
            return Ok(false);
        }

        let delay = backoff_seconds(kind, item.attempts);
        sqlx::query(
            r#"
            INSERT INTO queue_items (id, job_id, queue_name, attempts, max_attempts, available_at, created_at)
            VALUES ($1, $2, $3, $4, now() + ($5 || ' seconds')::interval, now())
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(item.job_id)
        .bind(item.queue_name)
        .bind(next_attempt)
        .bind(item.max_attempts)
        .bind(delay.to_string())
        .execute(&self.pool)
        .await?;

        tracing::info!(job_id = %item.job_id, next_attempt, delay, "job requeued with backoff");
        Ok(true)
    }

    pub async fn dlq_depth(&self, kind: JobKind) -> Result<i64, QueueError> {
        let row: (i64,) =
            sqlx::query_as("SELECT count(*) FROM dead_letter_items WHERE queue_name = $1")
                .bind(kind.dlq_name())
                .fetch_one(&self.pool)
                .await?;
        Ok(row.0)
    }

    pub async fn queue_depth(&self, kind: JobKind) -> Result<i64, QueueError> {
        let row: (i64,) =
            sqlx::query_as("SELECT count(*) FROM queue_items WHERE queue_name = $1")
                .bind(kind.queue_name())
                .fetch_one(&self.pool)
                .await?;
        Ok(row.0)
    }
}
