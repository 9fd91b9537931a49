//! Sliding-window rate limiter. Tiered limits per (user, action): trusted /
//! base / restricted. Exceeding the window limit blocks the (user, action)
//! pair for `block_duration_ms` and records a violation; violations are
//! tallied over a 7-day ring so repeated offenders get demoted to the
//! restricted tier regardless of their account-age-derived tier.
//!
//! Fails open on store unavailability so a rate limiter outage never blocks
//! legitimate traffic; callers should treat a `StoreUnavailable` error as
//! "allow" and bump the `rate_limit_store_unavailable` counter rather than
//! surfacing a 5xx.

use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::configuration::RateLimitSettings;

#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    #[error("rate limit store unavailable")]
    StoreUnavailable(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Trusted,
    Base,
    Restricted,
}

impl Tier {
    /// Requests allowed per window for `action`. Trusted gets 2x base,
    /// restricted gets half (floored at 1).
    fn limit_for(&self, action: &str) -> u32 {
        let base = match action {
            "generate_image" => 20,
            "generate_video" => 5,
            "generate_training" => 2,
            "cancel_job" => 30,
            _ => 10,
        };
        match self {
            Tier::Trusted => base * 2,
            Tier::Base => base,
            Tier::Restricted => (base / 2).max(1),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Decision {
    pub allowed: bool,
    pub retry_after_ms: u64,
}

pub struct RateLimiter {
    pool: PgPool,
    window: Duration,
    settings: RateLimitSettings,
}

impl RateLimiter {
    pub fn new(pool: PgPool, window: Duration, settings: RateLimitSettings) -> Self {
        Self {
            pool,
            window,
            settings,
        }
    }

    /// Checks and records one request atomically. On store failure, honors
    /// `fail_open` from configuration instead of propagating the error to
    /// the caller as a hard failure.
    pub async fn check(&self, user_id: &str, action: &str, tier: Tier) -> Decision {
        match self.check_inner(user_id, action, tier).await {
            Ok(decision) => decision,
            Err(e) => {
                tracing::error!(error = %e, user_id, action, "rate limit store unavailable");
                Decision {
                    allowed: self.settings.fail_open,
                    retry_after_ms: 0,
                }
            }
        }
    }

    async fn check_inner(
        &self,
        user_id: &str,
        action: &str,
        tier: Tier,
    ) -> Result<Decision, RateLimitError> {
        let window_secs = self.window.as_secs() as i64;
        let limit = tier.limit_for(action) as i64;

        let mut tx = self.pool.begin().await?;

        let blocked: Option<(DateTime<Utc>,)> = sqlx::query_as(
            "SELECT blocked_until FROM rate_limit_blocks WHERE user_id = $1 AND action = $2 FOR UPDATE",
        )
        .bind(user_id)
        .bind(action)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some((blocked_until,)) = blocked {
            if blocked_until > Utc::now() {
                tx.commit().await?;
                let retry_after_ms = (blocked_until - Utc::now()).num_milliseconds().max(0) as u64;
                return Ok(Decision {
                    allowed: false,
                    retry_after_ms,
                });
            }
        }

        let count: (i64,) = sqlx::query_as(
            r#"
            SELECT count(*) FROM rate_events
            WHERE user_id = $1 AND action = $2
              AND occurred_at > now() - ($3 || ' seconds')::interval
            "#,
        )
        .bind(user_id)
        .bind(action)
        .bind(window_secs.to_string())
        .fetch_one(&mut *tx)
        .await?;

        if count.0 >= limit {
            sqlx::query(
                r#"
                INSERT INTO rate_limit_blocks (user_id, action, blocked_until)
                VALUES ($1, $2, now() + ($3 || ' milliseconds')::interval)
                ON CONFLICT (user_id, action)
                DO UPDATE SET blocked_until = excluded.blocked_until
                "#,
            )
            .bind(user_id)
            .bind(action)
            .bind(self.settings.block_duration_ms.to_string())
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "INSERT INTO rate_violations (id, user_id, reason, occurred_at) VALUES ($1, $2, $3, now())",
            )
            .bind(uuid::Uuid::new_v4())
            .bind(user_id)
            .bind(format!("rate_limit_exceeded:{action}"))
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
            return Ok(Decision {
                allowed: false,
                retry_after_ms: self.settings.block_duration_ms.max(0) as u64,
            });
        }

        sqlx::query(
            "INSERT INTO rate_events (id, user_id, action, occurred_at) VALUES ($1, $2, $3, now())",
        )
        .bind(uuid::Uuid::new_v4())
        .bind(user_id)
        .bind(action)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Decision {
            allowed: true,
            retry_after_ms: 0,
        })
    }

    /// Records a policy violation (e.g. a moderation block) against the
    /// user. Used by the admission path to demote repeat offenders.
    pub async fn record_violation(&self, user_id: &str, reason: &str) -> Result<(), RateLimitError> {
        sqlx::query(
            "INSERT INTO rate_violations (id, user_id, reason, occurred_at) VALUES ($1, $2, $3, now())",
        )
        .bind(uuid::Uuid::new_v4())
        .bind(user_id)
        .bind(reason)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Users with 3+ violations in the trailing 7 days are demoted to the
    /// restricted tier regardless of their account-age-derived tier.
    pub async fn effective_tier(&self, user_id: &str, base_tier: Tier) -> Result<Tier, RateLimitError> {
        let recent: (i64,) = sqlx::query_as(
            "SELECT count(*) FROM rate_violations WHERE user_id = $1 AND occurred_at > now() - interval '7 days'",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        if recent.0 >= 3 {
            Ok(Tier::Restricted)
        } else {
            Ok(base_tier)
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RateViolation {
    pub id: uuid::Uuid,
    pub user_id: String,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trusted_tier_doubles_base_limit() {
        assert_eq!(Tier::Base.limit_for("generate_image"), 20);
        assert_eq!(Tier::Trusted.limit_for("generate_image"), 40);
        assert_eq!(Tier::Restricted.limit_for("generate_image"), 10);
    }

    #[test]
    fn restricted_never_floors_to_zero() {
        assert_eq!(Tier::Restricted.limit_for("generate_training"), 1);
    }
}
