//! Fixed-window rate limiter behaviour: window accounting, concurrency and
//! failure policies.

mod test_helpers;

use anyhow::Result;
use chrono::Duration as ChronoDuration;
use codex_resilience::rate_limit::RateLimitStatistics;
use codex_resilience::{
    client_key, ClientTier, FailurePolicy, InMemoryCounterStore, ManualClock, RateLimitSettings,
    RateLimiter,
};
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use test_helpers::{start_time, UnavailableStore};
use tokio::runtime::Runtime;
use tracing_test::traced_test;

fn limiter_with_clock(clock: &ManualClock) -> RateLimiter {
    let store = InMemoryCounterStore::with_clock(Arc::new(clock.clone()));
    RateLimiter::new(Arc::new(store), FailurePolicy::FailClosed)
}

#[tokio::test]
#[traced_test]
async fn test_fixed_window_scenario() -> Result<()> {
    let clock = ManualClock::new(start_time());
    let limiter = limiter_with_clock(&clock);
    let window = Duration::from_secs(60);

    // t = 0, 1, 2
    for _ in 0..3 {
        assert!(limiter.is_allowed("k", 3, window).await);
        clock.advance(ChronoDuration::seconds(1));
    }
    assert_eq!(limiter.remaining("k", 3).await, 0);

    // t = 3
    assert!(!limiter.is_allowed("k", 3, window).await);

    // t = 61, the first window expired at t = 60
    clock.advance(ChronoDuration::seconds(58));
    assert!(limiter.is_allowed("k", 3, window).await);
    assert_eq!(limiter.remaining("k", 3).await, 2);
    assert_eq!(
        limiter.reset_time("k").await,
        Some(start_time() + ChronoDuration::seconds(121))
    );

    Ok(())
}

#[tokio::test]
async fn test_nth_plus_one_rejected_and_keys_isolated() -> Result<()> {
    let limiter = RateLimiter::in_memory(FailurePolicy::FailClosed);
    let window = Duration::from_secs(3600);

    for _ in 0..5 {
        assert!(limiter.is_allowed("user:alice", 5, window).await);
    }
    assert!(!limiter.is_allowed("user:alice", 5, window).await);
    assert!(limiter.is_allowed("user:bob", 5, window).await);
    assert_eq!(limiter.remaining("user:bob", 5).await, 4);

    let stats: RateLimitStatistics = limiter.statistics();
    assert_eq!(stats.allowed_total, 6);
    assert_eq!(stats.rejected_total, 1);
    assert_eq!(stats.store_failures_total, 0);
    Ok(())
}

#[tokio::test]
async fn test_no_window_reports_full_quota() -> Result<()> {
    let limiter = RateLimiter::in_memory(FailurePolicy::FailClosed);
    assert_eq!(limiter.remaining("fresh", 10).await, 10);
    assert!(limiter.reset_time("fresh").await.is_none());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_admit_exactly_quota() -> Result<()> {
    let limiter = Arc::new(RateLimiter::in_memory(FailurePolicy::FailClosed));
    let window = Duration::from_secs(60);

    let handles: Vec<_> = (0..64)
        .map(|_| {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.is_allowed("shared", 10, window).await })
        })
        .collect();

    let mut admitted = 0;
    for handle in handles {
        if handle.await? {
            admitted += 1;
        }
    }

    assert_eq!(admitted, 10);
    assert_eq!(limiter.statistics().rejected_total, 54);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_background_purge_drops_expired_windows() -> Result<()> {
    let clock = ManualClock::new(start_time());
    let store = Arc::new(InMemoryCounterStore::with_clock(Arc::new(clock.clone())));
    let limiter = Arc::new(RateLimiter::new(store.clone(), FailurePolicy::FailClosed));
    let window = Duration::from_secs(60);

    for client in 0..50 {
        assert!(limiter.is_allowed(&format!("ip:10.0.0.{client}"), 5, window).await);
    }
    assert_eq!(store.len().await, 50);

    let purge = limiter.start_purging(window);

    // Still inside the window: the first sweep keeps everything
    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(store.len().await, 50);

    clock.advance(ChronoDuration::seconds(61));
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(store.is_empty().await);
    assert_eq!(limiter.remaining("ip:10.0.0.1", 5).await, 5);

    purge.abort();
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_concurrent_admissions_never_overshoot(quota in 1u64..20, extra in 1usize..40) {
        let rt = Runtime::new().unwrap();
        let callers = quota as usize + extra;

        let admitted = rt.block_on(async move {
            let limiter = Arc::new(RateLimiter::in_memory(FailurePolicy::FailClosed));
            let handles: Vec<_> = (0..callers)
                .map(|_| {
                    let limiter = limiter.clone();
                    tokio::spawn(async move {
                        limiter.is_allowed("k", quota, Duration::from_secs(60)).await
                    })
                })
                .collect();

            let mut admitted = 0u64;
            for handle in handles {
                if handle.await.unwrap() {
                    admitted += 1;
                }
            }
            admitted
        });

        prop_assert_eq!(admitted, quota);
    }
}

#[tokio::test]
#[traced_test]
async fn test_fail_closed_rejects_when_store_unavailable() -> Result<()> {
    let limiter = RateLimiter::new(Arc::new(UnavailableStore), FailurePolicy::FailClosed);

    let decision = limiter.check("k", 10, Duration::from_secs(60)).await;
    assert!(!decision.allowed);
    assert!(decision.degraded);
    assert_eq!(limiter.remaining("k", 10).await, 0);
    assert_eq!(limiter.statistics().store_failures_total, 2);
    Ok(())
}

#[tokio::test]
async fn test_fail_open_admits_when_store_unavailable() -> Result<()> {
    let limiter = RateLimiter::new(Arc::new(UnavailableStore), FailurePolicy::FailOpen);

    let decision = limiter.check("k", 10, Duration::from_secs(60)).await;
    assert!(decision.allowed);
    assert!(decision.degraded);
    assert_eq!(decision.remaining, 10);
    assert_eq!(limiter.remaining("k", 10).await, 10);
    assert!(limiter.try_check("k", 10, Duration::from_secs(60)).await.is_err());
    Ok(())
}

#[tokio::test]
async fn test_zero_window_rejected_without_store_failure() -> Result<()> {
    let limiter = RateLimiter::in_memory(FailurePolicy::FailOpen);
    assert!(!limiter.is_allowed("k", 10, Duration::ZERO).await);
    assert_eq!(limiter.statistics().store_failures_total, 0);
    Ok(())
}

#[tokio::test]
async fn test_decision_headers_and_client_tiers() -> Result<()> {
    let settings = RateLimitSettings::default();
    let limiter = RateLimiter::in_memory(settings.failure_policy);

    let key = client_key(None, Some("203.0.113.7, 10.0.0.1"), None, "127.0.0.1");
    assert_eq!(key, "ip:203.0.113.7");

    let tier = ClientTier::from_label(Some("premium"));
    let max = settings.max_requests_for(tier);
    assert_eq!(max, 5000);

    let decision = limiter.check(&key, max, settings.window()).await;
    let headers = decision.headers();
    assert_eq!(headers[0], ("X-RateLimit-Limit", "5000".to_string()));
    assert_eq!(headers[1], ("X-RateLimit-Remaining", "4999".to_string()));
    let reset: i64 = headers[2].1.parse()?;
    assert!(reset > 0);

    assert!(settings.is_exempt("/actuator/health"));
    assert!(!settings.is_exempt("/api/memories"));
    Ok(())
}
