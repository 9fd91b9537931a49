//! HTTP-edge idempotency guard. Distinct from the credit ledger's refund
//! idempotence: this one covers duplicate HTTP submissions (e.g. a client
//! retrying after a dropped response), not queue redelivery.

use sqlx::PgPool;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum IdempotencyError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub struct IdempotencyStore {
    pool: PgPool,
}

impl IdempotencyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Returns the job already admitted for this key, if any.
    pub async fn lookup(&self, owner: &str, key: &str) -> Result<Option<Uuid>, IdempotencyError> {
        let row: Option<(Uuid,)> = sqlx::query_as(
            "SELECT job_id FROM idempotency_keys WHERE key = $1 AND owner = $2",
        )
        .bind(key)
        .bind(owner)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.0))
    }

    /// Records the mapping. Races between two requests for the same new key
    /// resolve to whichever insert wins; the loser's job remains orphaned in
    /// the job store but the caller only ever observes the winner's job id
    /// on subsequent lookups.
    pub async fn record(&self, owner: &str, key: &str, job_id: Uuid) -> Result<(), IdempotencyError> {
        sqlx::query(
            r#"
            INSERT INTO idempotency_keys (key, owner, job_id, created_at)
            VALUES ($1, $2, $3, now())
            ON CONFLICT (key) DO NOTHING
            "#,
        )
        .bind(key)
        .bind(owner)
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
