//! Account credit balances and the append-only ledger of changes against them.
//!
//! All balance changes go through `reserve`/`refund`. Both are linearizable
//! per user: `reserve` takes a row lock on the user's balance row inside a
//! transaction so two concurrent reserves can never both observe the same
//! balance (no TOCTOU double-spend). Cross-user operations run in parallel —
//! the lock is per `user_id` row, not global.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("insufficient credits")]
    InsufficientCredits,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CreditTransaction {
    pub id: Uuid,
    pub user_id: String,
    pub delta: i64,
    pub reason_code: String,
    pub job_ref: Option<Uuid>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait CreditLedger: Send + Sync {
    /// Atomically verifies balance >= amount then appends a negative
    /// transaction. Returns the new transaction id.
    async fn reserve(
        &self,
        user_id: &str,
        amount: i64,
        reason_code: &str,
        job_ref: Option<Uuid>,
    ) -> Result<Uuid, LedgerError>;

    /// Appends a positive transaction. Idempotent given `job_ref`: calling
    /// this twice for the same job only refunds once.
    async fn refund(
        &self,
        user_id: &str,
        amount: i64,
        job_ref: Uuid,
        reason_code: &str,
    ) -> Result<(), LedgerError>;

    async fn balance(&self, user_id: &str) -> Result<i64, LedgerError>;
}

pub struct PgCreditLedger {
    pool: PgPool,
}

impl PgCreditLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn lock_balance_row(
        tx: &mut Transaction<'_, Postgres>,
        user_id: &str,
    ) -> Result<i64, LedgerError> {
        // Ensure the row exists, then take the row lock used to serialize
        // concurrent reserves for this user.
        sqlx::query(
            "INSERT INTO credit_balances (user_id, balance) VALUES ($1, 0)
             ON CONFLICT (user_id) DO NOTHING",
        )
        .bind(user_id)
        .execute(&mut **tx)
        .await?;

        let row: (i64,) = sqlx::query_as(
            "SELECT balance FROM credit_balances WHERE user_id = $1 FOR UPDATE",
        )
        .bind(user_id)
        .fetch_one(&mut **tx)
        .await?;

        Ok(row.0)
    }
}

#[async_trait]
impl CreditLedger for PgCreditLedger {
    async fn reserve(
        &self,
        user_id: &str,
        amount: i64,
        reason_code: &str,
        job_ref: Option<Uuid>,
    ) -> Result<Uuid, LedgerError> {
        let mut tx = self.pool.begin().await?;

        let balance = Self::lock_balance_row(&mut tx, user_id).await?;
        if balance < amount {
            tx.rollback().await?;
            return Err(LedgerError::InsufficientCredits);
        }

        let tx_id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO credit_transactions (id, user_id, delta, reason_code, job_ref, created_at)
             VALUES ($1, $2, $3, $4, $5, now())",
        )
        .bind(tx_id)
        .bind(user_id)
        .bind(-amount)
        .bind(reason_code)
        .bind(job_ref)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE credit_balances SET balance = balance - $1 WHERE user_id = $2")
            .bind(amount)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::info!(user_id, amount, reason_code, "reserved credits");
        Ok(tx_id)
    }

    async fn refund(
        &self,
        user_id: &str,
        amount: i64,
        job_ref: Uuid,
        reason_code: &str,
    ) -> Result<(), LedgerError> {
        let mut tx = self.pool.begin().await?;

        // At most one positive refund transaction per job id.
        let existing: Option<(Uuid,)> = sqlx::query_as(
            "SELECT id FROM credit_transactions WHERE job_ref = $1 AND delta > 0",
        )
        .bind(job_ref)
        .fetch_optional(&mut *tx)
        .await?;

        if existing.is_some() {
            tracing::debug!(user_id, %job_ref, "refund already recorded, skipping");
            tx.rollback().await?;
            return Ok(());
        }

        Self::lock_balance_row(&mut tx, user_id).await?;

        let tx_id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO credit_transactions (id, user_id, delta, reason_code, job_ref, created_at)
             VALUES ($1, $2, $3, $4, $5, now())",
        )
        .bind(tx_id)
        .bind(user_id)
        .bind(amount)
        .bind(reason_code)
        .bind(job_ref)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE credit_balances SET balance = balance + $1 WHERE user_id = $2")
            .bind(amount)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::info!(user_id, amount, %job_ref, "refunded credits");
        Ok(())
    }

    async fn balance(&self, user_id: &str) -> Result<i64, LedgerError> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT balance FROM credit_balances WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|r| r.0).unwrap_or(0))
    }
}
