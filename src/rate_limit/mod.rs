//! Fixed-window request rate limiting.
//!
//! Each key gets a counter that starts at 1 on the first request of a window
//! and expires `window` later. Requests are admitted while the post-increment
//! count is `<= max_requests`. The window is fixed rather than sliding, so a
//! client can burst up to twice the quota across a window boundary; in exchange
//! each call is a single atomic increment against the [`CounterStore`].

pub mod store;

pub use store::*;

use crate::error::{ResilienceError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

const KEY_PREFIX: &str = "rate_limit:";

/// What the limiter answers when the counter store cannot be reached
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    FailOpen,
    #[default]
    FailClosed,
}

impl FromStr for FailurePolicy {
    type Err = ResilienceError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fail-open" | "open" => Ok(FailurePolicy::FailOpen),
            "fail-closed" | "closed" => Ok(FailurePolicy::FailClosed),
            other => Err(ResilienceError::invalid_config(format!(
                "unknown rate limit failure policy '{other}' (expected fail-open or fail-closed)"
            ))),
        }
    }
}

/// Outcome of a single admission check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    pub reset_at: Option<DateTime<Utc>>,
    /// True when the counter store failed and the failure policy decided
    pub degraded: bool,
}

impl RateLimitDecision {
    /// Standard `X-RateLimit-*` response headers. Reset is epoch millis, 0 without a window.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        vec![
            ("X-RateLimit-Limit", self.limit.to_string()),
            ("X-RateLimit-Remaining", self.remaining.to_string()),
            (
                "X-RateLimit-Reset",
                self.reset_at
                    .map(|t| t.timestamp_millis())
                    .unwrap_or(0)
                    .to_string(),
            ),
        ]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitStatistics {
    pub allowed_total: u64,
    pub rejected_total: u64,
    pub store_failures_total: u64,
    pub failure_policy: FailurePolicy,
}

pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    failure_policy: FailurePolicy,
    allowed_total: AtomicU64,
    rejected_total: AtomicU64,
    store_failures_total: AtomicU64,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, failure_policy: FailurePolicy) -> Self {
        Self {
            store,
            failure_policy,
            allowed_total: AtomicU64::new(0),
            rejected_total: AtomicU64::new(0),
            store_failures_total: AtomicU64::new(0),
        }
    }

    pub fn in_memory(failure_policy: FailurePolicy) -> Self {
        Self::new(Arc::new(InMemoryCounterStore::new()), failure_policy)
    }

    pub fn store(&self) -> Arc<dyn CounterStore> {
        Arc::clone(&self.store)
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }

    /// Count one request against `key` and decide whether it is admitted
    pub async fn is_allowed(&self, key: &str, max_requests: u64, window: Duration) -> bool {
        self.check(key, max_requests, window).await.allowed
    }

    /// Like [`is_allowed`](Self::is_allowed) but returns the full decision.
    ///
    /// Store failures resolve through the configured [`FailurePolicy`] and are
    /// flagged with `degraded = true`.
    pub async fn check(&self, key: &str, max_requests: u64, window: Duration) -> RateLimitDecision {
        match self.try_check(key, max_requests, window).await {
            Ok(decision) => decision,
            Err(ResilienceError::ConfigurationInvalid(message)) => {
                warn!(key = key, "Rejecting request with invalid rate limit: {}", message);
                self.record(false);
                RateLimitDecision {
                    allowed: false,
                    limit: max_requests,
                    remaining: 0,
                    reset_at: None,
                    degraded: false,
                }
            }
            Err(e) => {
                self.store_failures_total.fetch_add(1, Ordering::Relaxed);
                let allowed = self.failure_policy == FailurePolicy::FailOpen;
                warn!(
                    key = key,
                    policy = ?self.failure_policy,
                    allowed = allowed,
                    "Rate limit counter store unavailable: {}",
                    e
                );
                self.record(allowed);
                RateLimitDecision {
                    allowed,
                    limit: max_requests,
                    remaining: if allowed { max_requests } else { 0 },
                    reset_at: None,
                    degraded: true,
                }
            }
        }
    }

    /// Admission check that surfaces store errors instead of applying the policy
    pub async fn try_check(
        &self,
        key: &str,
        max_requests: u64,
        window: Duration,
    ) -> Result<RateLimitDecision> {
        if window.is_zero() {
            return Err(ResilienceError::invalid_config(
                "rate limit window must be positive",
            ));
        }

        let snapshot = self
            .store
            .increment(&Self::store_key(key), window)
            .await?;
        let allowed = snapshot.count <= max_requests;
        self.record(allowed);

        if allowed {
            debug!(key = key, count = snapshot.count, limit = max_requests, "Rate limit check passed");
        } else {
            debug!(key = key, count = snapshot.count, limit = max_requests, "Rate limit exceeded");
        }

        Ok(RateLimitDecision {
            allowed,
            limit: max_requests,
            remaining: max_requests.saturating_sub(snapshot.count),
            reset_at: Some(snapshot.expires_at),
            degraded: false,
        })
    }

    /// Requests left in the current window; the full quota when no window is active
    pub async fn remaining(&self, key: &str, max_requests: u64) -> u64 {
        match self.store.snapshot(&Self::store_key(key)).await {
            Ok(Some(snapshot)) => max_requests.saturating_sub(snapshot.count),
            Ok(None) => max_requests,
            Err(e) => {
                self.store_failures_total.fetch_add(1, Ordering::Relaxed);
                warn!(key = key, policy = ?self.failure_policy, "Could not read remaining quota: {}", e);
                match self.failure_policy {
                    FailurePolicy::FailOpen => max_requests,
                    FailurePolicy::FailClosed => 0,
                }
            }
        }
    }

    /// When the active window for `key` ends, or `None` without an active window
    pub async fn reset_time(&self, key: &str) -> Option<DateTime<Utc>> {
        match self.store.snapshot(&Self::store_key(key)).await {
            Ok(snapshot) => snapshot.map(|s| s.expires_at),
            Err(e) => {
                self.store_failures_total.fetch_add(1, Ordering::Relaxed);
                warn!(key = key, "Could not read rate limit reset time: {}", e);
                None
            }
        }
    }

    /// Drop expired windows from the store. Store errors are logged and count as
    /// store failures.
    pub async fn purge_expired(&self) -> usize {
        match self.store.purge_expired().await {
            Ok(removed) => removed,
            Err(e) => {
                self.store_failures_total.fetch_add(1, Ordering::Relaxed);
                warn!("Could not purge expired rate limit windows: {}", e);
                0
            }
        }
    }

    /// Purge expired windows every `every` until the limiter is dropped or the
    /// returned handle is aborted.
    pub fn start_purging(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let limiter: Weak<Self> = Arc::downgrade(self);
        let every = every.max(Duration::from_secs(1));
        info!(every_secs = every.as_secs(), "Rate limit window purge started");

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                let Some(limiter) = limiter.upgrade() else {
                    break;
                };
                limiter.purge_expired().await;
            }
        })
    }

    pub fn statistics(&self) -> RateLimitStatistics {
        RateLimitStatistics {
            allowed_total: self.allowed_total.load(Ordering::Relaxed),
            rejected_total: self.rejected_total.load(Ordering::Relaxed),
            store_failures_total: self.store_failures_total.load(Ordering::Relaxed),
            failure_policy: self.failure_policy,
        }
    }

    fn record(&self, allowed: bool) {
        if allowed {
            self.allowed_total.fetch_add(1, Ordering::Relaxed);
        } else {
            self.rejected_total.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn store_key(key: &str) -> String {
        format!("{KEY_PREFIX}{key}")
    }
}

/// Quota tier of a client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientTier {
    Standard,
    Premium,
}

impl ClientTier {
    pub fn from_label(label: Option<&str>) -> Self {
        match label {
            Some(l) if l.trim().eq_ignore_ascii_case("premium") => ClientTier::Premium,
            _ => ClientTier::Standard,
        }
    }
}

/// Stable limiter key for a caller: the user id when known, otherwise the
/// first forwarded address, the real-ip address, then the peer address.
pub fn client_key(
    user_id: Option<&str>,
    forwarded_for: Option<&str>,
    real_ip: Option<&str>,
    remote_addr: &str,
) -> String {
    if let Some(user) = user_id.map(str::trim).filter(|u| !u.is_empty()) {
        return format!("user:{user}");
    }

    let forwarded = forwarded_for
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    let real = real_ip.map(str::trim).filter(|v| !v.is_empty());

    let ip = forwarded.or(real).unwrap_or(remote_addr);
    format!("ip:{ip}")
}

/// Quotas applied by request-handling collaborators
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    pub default_max_requests: u64,
    pub premium_max_requests: u64,
    pub window_seconds: u64,
    pub failure_policy: FailurePolicy,
    pub exempt_path_prefixes: Vec<String>,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            default_max_requests: 1000,
            premium_max_requests: 5000,
            window_seconds: 3600,
            failure_policy: FailurePolicy::FailClosed,
            exempt_path_prefixes: vec![
                "/actuator/".to_string(),
                "/swagger-ui/".to_string(),
                "/api-docs/".to_string(),
                "/favicon.ico".to_string(),
            ],
        }
    }
}

impl RateLimitSettings {
    pub fn max_requests_for(&self, tier: ClientTier) -> u64 {
        match tier {
            ClientTier::Standard => self.default_max_requests,
            ClientTier::Premium => self.premium_max_requests,
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }

    pub fn is_exempt(&self, path: &str) -> bool {
        self.exempt_path_prefixes
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_max_requests == 0 || self.premium_max_requests == 0 {
            return Err(ResilienceError::invalid_config(
                "rate limit quotas must be positive",
            ));
        }
        if self.window_seconds == 0 {
            return Err(ResilienceError::invalid_config(
                "rate limit window must be positive",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_key_prefers_user_then_forwarded_ip() {
        assert_eq!(
            client_key(Some("42"), Some("1.1.1.1"), None, "9.9.9.9"),
            "user:42"
        );
        assert_eq!(
            client_key(None, Some(" 10.0.0.1 , 10.0.0.2"), Some("8.8.8.8"), "9.9.9.9"),
            "ip:10.0.0.1"
        );
        assert_eq!(client_key(None, None, Some("8.8.8.8"), "9.9.9.9"), "ip:8.8.8.8");
        assert_eq!(client_key(Some(""), Some(""), None, "9.9.9.9"), "ip:9.9.9.9");
    }

    #[test]
    fn test_settings_tiers_and_exemptions() {
        let settings = RateLimitSettings::default();
        assert_eq!(settings.max_requests_for(ClientTier::from_label(Some("PREMIUM"))), 5000);
        assert_eq!(settings.max_requests_for(ClientTier::from_label(None)), 1000);
        assert!(settings.is_exempt("/actuator/health"));
        assert!(!settings.is_exempt("/api/courses"));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_failure_policy_parsing() {
        assert_eq!("fail-open".parse::<FailurePolicy>().unwrap(), FailurePolicy::FailOpen);
        assert_eq!("Closed".parse::<FailurePolicy>().unwrap(), FailurePolicy::FailClosed);
        assert!("maybe".parse::<FailurePolicy>().is_err());
    }

    #[test]
    fn test_decision_headers() {
        let decision = RateLimitDecision {
            allowed: true,
            limit: 3,
            remaining: 2,
            reset_at: None,
            degraded: false,
        };
        let headers = decision.headers();
        assert_eq!(headers[0], ("X-RateLimit-Limit", "3".to_string()));
        assert_eq!(headers[1], ("X-RateLimit-Remaining", "2".to_string()));
        assert_eq!(headers[2], ("X-RateLimit-Reset", "0".to_string()));
    }
}
