mod common;

use std::time::Duration;

use genforge::configuration::RateLimitSettings;
use genforge::rate_limit::{RateLimiter, Tier};
use serial_test::serial;

#[tokio::test]
#[serial]
async fn exceeding_the_window_limit_denies_further_requests() {
    let pool = common::spawn_test_pool().await;
    let limiter = RateLimiter::new(
        pool,
        Duration::from_secs(60),
        RateLimitSettings {
            fail_open: true,
            block_duration_ms: 1_800_000,
        },
    );

    // restricted tier on cancel_job allows floor(30/2) = 15 requests per window
    for _ in 0..15 {
        let decision = limiter.check("user-1", "cancel_job", Tier::Restricted).await;
        assert!(decision.allowed);
    }

    let denied = limiter.check("user-1", "cancel_job", Tier::Restricted).await;
    assert!(!denied.allowed);
    assert!(denied.retry_after_ms > 0);
}

#[tokio::test]
#[serial]
async fn repeat_violations_demote_to_restricted_tier() {
    let pool = common::spawn_test_pool().await;
    let limiter = RateLimiter::new(
        pool,
        Duration::from_secs(60),
        RateLimitSettings {
            fail_open: true,
            block_duration_ms: 1_800_000,
        },
    );

    for _ in 0..3 {
        limiter.record_violation("user-2", "moderation_block").await.unwrap();
    }

    let tier = limiter.effective_tier("user-2", Tier::Trusted).await.unwrap();
    assert_eq!(tier, Tier::Restricted);
}
