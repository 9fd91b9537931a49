mod common;

use std::sync::Arc;
use std::time::Duration;

use genforge::admission::AdmissionController;
use genforge::domain::{JobKind, JobParams, JobState, JobStatusUpdate, Quality};
use genforge::job_store::JobStore;
use genforge::ledger::{CreditLedger, PgCreditLedger};
use genforge::queue::Queue;
use genforge::rate_limit::{RateLimiter, Tier};
use serial_test::serial;

fn image_params() -> JobParams {
    JobParams {
        prompt: "a lighthouse at dusk".to_string(),
        negative_prompt: None,
        model: None,
        quality: Some(Quality::Standard),
        width: Some(512),
        height: Some(512),
        init_image_url: None,
        strength: None,
        caption_init_image: false,
        edit_type: None,
        generation_type: None,
        duration_seconds: None,
        fps: None,
        seed: None,
        training_steps: None,
        metadata: None,
    }
}

async fn grant_credits(pool: &sqlx::PgPool, user_id: &str, amount: i64) {
    sqlx::query("INSERT INTO credit_balances (user_id, balance) VALUES ($1, $2)
                 ON CONFLICT (user_id) DO UPDATE SET balance = credit_balances.balance + $2")
        .bind(user_id)
        .bind(amount)
        .execute(pool)
        .await
        .expect("failed to grant test credits");
}

#[tokio::test]
#[serial]
async fn admitting_a_job_reserves_credits_and_enqueues_it() {
    let pool = common::spawn_test_pool().await;
    let job_store = Arc::new(JobStore::new(pool.clone()));
    let ledger = Arc::new(PgCreditLedger::new(pool.clone()));
    let queue = Arc::new(Queue::new(pool.clone()));
    let rate_limiter = Arc::new(RateLimiter::new(
        pool.clone(),
        Duration::from_secs(60),
        genforge::configuration::RateLimitSettings {
            fail_open: true,
            block_duration_ms: 1_800_000,
        },
    ));
    let admission = AdmissionController::new(job_store.clone(), ledger.clone(), queue.clone(), rate_limiter);

    grant_credits(&pool, "user-1", 100).await;

    let job = admission
        .submit("user-1", JobKind::Image, image_params(), Tier::Base)
        .await
        .expect("admission should succeed with sufficient credits");

    assert_eq!(job.state, JobState::Pending);
    assert_eq!(job.cost, 2); // standard quality image per the pricing table

    let balance = ledger.balance("user-1").await.unwrap();
    assert_eq!(balance, 98);

    let depth = queue.queue_depth(JobKind::Image).await.unwrap();
    assert_eq!(depth, 1);
}

#[tokio::test]
#[serial]
async fn admission_rejects_insufficient_credits_without_reserving() {
    let pool = common::spawn_test_pool().await;
    let job_store = Arc::new(JobStore::new(pool.clone()));
    let ledger = Arc::new(PgCreditLedger::new(pool.clone()));
    let queue = Arc::new(Queue::new(pool.clone()));
    let rate_limiter = Arc::new(RateLimiter::new(
        pool.clone(),
        Duration::from_secs(60),
        genforge::configuration::RateLimitSettings {
            fail_open: true,
            block_duration_ms: 1_800_000,
        },
    ));
    let admission = AdmissionController::new(job_store, ledger.clone(), queue, rate_limiter);

    grant_credits(&pool, "user-2", 1).await;

    let result = admission
        .submit("user-2", JobKind::Image, image_params(), Tier::Base)
        .await;

    assert!(result.is_err());
    assert_eq!(ledger.balance("user-2").await.unwrap(), 1);
}

#[tokio::test]
#[serial]
async fn cancelling_a_pending_job_refunds_its_reservation() {
    let pool = common::spawn_test_pool().await;
    let job_store = Arc::new(JobStore::new(pool.clone()));
    let ledger = Arc::new(PgCreditLedger::new(pool.clone()));
    let queue = Arc::new(Queue::new(pool.clone()));
    let rate_limiter = Arc::new(RateLimiter::new(
        pool.clone(),
        Duration::from_secs(60),
        genforge::configuration::RateLimitSettings {
            fail_open: true,
            block_duration_ms: 1_800_000,
        },
    ));
    let admission = AdmissionController::new(job_store.clone(), ledger.clone(), queue, rate_limiter);

    grant_credits(&pool, "user-3", 50).await;
    let job = admission
        .submit("user-3", JobKind::Image, image_params(), Tier::Base)
        .await
        .unwrap();

    job_store
        .update_status(job.id, JobStatusUpdate::to_cancelled("changed my mind"))
        .await
        .unwrap();
    ledger.refund("user-3", job.cost, job.id, "job_cancelled").await.unwrap();

    assert_eq!(ledger.balance("user-3").await.unwrap(), 50);

    // Refund is idempotent given the job id.
    ledger.refund("user-3", job.cost, job.id, "job_cancelled").await.unwrap();
    assert_eq!(ledger.balance("user-3").await.unwrap(), 50);
}

#[tokio::test]
#[serial]
async fn terminal_jobs_reject_further_status_updates() {
    let pool = common::spawn_test_pool().await;
    let job_store = JobStore::new(pool.clone());

    let job = job_store
        .create("user-4", JobKind::Image, image_params(), 2)
        .await
        .unwrap();

    job_store
        .update_status(job.id, JobStatusUpdate::to_cancelled("owner request"))
        .await
        .unwrap();

    let result = job_store
        .update_status(job.id, JobStatusUpdate::progress_to(50))
        .await;

    assert!(result.is_err());
}
