//! Health probes: one pluggable check per monitored component.
//!
//! A probe is stateless with respect to earlier calls. It must answer within
//! the supplied timeout and report failures as an unhealthy status rather than
//! returning an error; [`execute_probe`] additionally enforces the timeout from
//! the outside so a misbehaving probe cannot stall a cycle.

use super::{ComponentStatus, HealthLevel, IssueType};
use crate::error::ResilienceError;
use crate::rate_limit::CounterStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Component this probe reports on
    fn component(&self) -> &str;

    async fn check(&self, timeout: Duration) -> ComponentStatus;
}

/// Result of running one probe under the monitor's timeout
#[derive(Debug, Clone)]
pub struct ProbeRun {
    pub status: ComponentStatus,
    pub timed_out: bool,
    pub elapsed: Duration,
}

impl ProbeRun {
    /// The run's fault as an error, for callers that propagate rather than record it
    pub fn error(&self) -> Option<ResilienceError> {
        if self.timed_out {
            return Some(ResilienceError::ProbeTimeout {
                component: self.status.name.clone(),
                timeout_ms: self.elapsed.as_millis() as u64,
            });
        }
        if self.status.is_healthy() {
            return None;
        }
        Some(ResilienceError::ProbeFailure {
            component: self.status.name.clone(),
            message: self
                .status
                .error_message
                .clone()
                .unwrap_or_else(|| format!("reported {:?}", self.status.health).to_lowercase()),
        })
    }
}

/// Run `probe` bounded by `timeout`, stamping the result with `checked_at`.
pub async fn execute_probe(
    probe: &dyn HealthProbe,
    timeout: Duration,
    checked_at: DateTime<Utc>,
) -> ProbeRun {
    let component = probe.component().to_string();
    let start = Instant::now();

    let (status, timed_out) = match tokio::time::timeout(timeout, probe.check(timeout)).await {
        Ok(status) => (status, false),
        Err(_) => {
            warn!(
                component = %component,
                timeout_ms = timeout.as_millis() as u64,
                "Health probe timed out"
            );
            let fault = ResilienceError::ProbeTimeout {
                component: component.clone(),
                timeout_ms: timeout.as_millis() as u64,
            };
            let status = ComponentStatus::unhealthy(component.clone(), fault.to_string())
            .with_issue_type(IssueType::Timeout);
            (status, true)
        }
    };

    let elapsed = start.elapsed();
    let mut status = status.normalized();
    status.name = component;
    status.last_check_time = checked_at;
    if status.response_time_ms == 0 || timed_out {
        status.response_time_ms = elapsed.as_millis() as u64;
    }

    ProbeRun {
        status,
        timed_out,
        elapsed,
    }
}

/// Probe backed by an async closure
pub struct FnProbe<F> {
    component: String,
    check: F,
}

impl<F, Fut> FnProbe<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = ComponentStatus> + Send,
{
    pub fn new(component: impl Into<String>, check: F) -> Self {
        Self {
            component: component.into(),
            check,
        }
    }
}

#[async_trait]
impl<F, Fut> HealthProbe for FnProbe<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = ComponentStatus> + Send,
{
    fn component(&self) -> &str {
        &self.component
    }

    async fn check(&self, _timeout: Duration) -> ComponentStatus {
        (self.check)().await
    }
}

/// Cache connectivity probe over a rate-limit counter store
pub struct CounterStoreProbe {
    component: String,
    store: Arc<dyn CounterStore>,
    slow_threshold: Duration,
}

impl CounterStoreProbe {
    pub fn new(component: impl Into<String>, store: Arc<dyn CounterStore>) -> Self {
        Self {
            component: component.into(),
            store,
            slow_threshold: Duration::from_millis(250),
        }
    }

    pub fn with_slow_threshold(mut self, slow_threshold: Duration) -> Self {
        self.slow_threshold = slow_threshold;
        self
    }
}

#[async_trait]
impl HealthProbe for CounterStoreProbe {
    fn component(&self) -> &str {
        &self.component
    }

    async fn check(&self, _timeout: Duration) -> ComponentStatus {
        let start = Instant::now();
        let result = self.store.ping().await;
        let response_time_ms = start.elapsed().as_millis() as u64;

        let status = match result {
            Ok(()) if start.elapsed() > self.slow_threshold => ComponentStatus::degraded(
                self.component.as_str(),
                format!("Slow counter store response: {response_time_ms}ms"),
            ),
            Ok(()) => ComponentStatus::healthy(self.component.as_str()),
            Err(e) => {
                error!(component = %self.component, "Counter store health check failed: {}", e);
                ComponentStatus::unhealthy(self.component.as_str(), e.to_string())
            }
        };

        status.with_response_time(response_time_ms.max(1))
    }
}

/// Database connectivity probe (`SELECT 1`)
pub struct PostgresProbe {
    component: String,
    pool: PgPool,
    slow_threshold: Duration,
}

impl PostgresProbe {
    pub fn new(component: impl Into<String>, pool: PgPool) -> Self {
        Self {
            component: component.into(),
            pool,
            slow_threshold: Duration::from_millis(1000),
        }
    }

    pub fn with_slow_threshold(mut self, slow_threshold: Duration) -> Self {
        self.slow_threshold = slow_threshold;
        self
    }
}

#[async_trait]
impl HealthProbe for PostgresProbe {
    fn component(&self) -> &str {
        &self.component
    }

    async fn check(&self, timeout: Duration) -> ComponentStatus {
        let start = Instant::now();
        let query = sqlx::query("SELECT 1 as health_check").fetch_one(&self.pool);

        let status = match tokio::time::timeout(timeout, query).await {
            Ok(Ok(_)) => {
                let response_time = start.elapsed();
                if response_time > self.slow_threshold {
                    warn!(
                        component = %self.component,
                        "Database response time degraded: {}ms",
                        response_time.as_millis()
                    );
                    ComponentStatus::degraded(
                        self.component.as_str(),
                        format!("Slow database response: {}ms", response_time.as_millis()),
                    )
                } else {
                    debug!(component = %self.component, "Database connectivity check passed");
                    ComponentStatus::healthy(self.component.as_str())
                }
            }
            Ok(Err(e)) => {
                error!(component = %self.component, "Database health check failed: {}", e);
                ComponentStatus::unhealthy(
                    self.component.as_str(),
                    format!("Database connection failed: {e}"),
                )
            }
            Err(_) => ComponentStatus::unhealthy(
                self.component.as_str(),
                format!("Database did not answer within {}ms", timeout.as_millis()),
            )
            .with_issue_type(IssueType::Timeout),
        };

        status.with_response_time((start.elapsed().as_millis() as u64).max(1))
    }
}

/// Host memory pressure probe
pub struct SystemMemoryProbe {
    component: String,
}

impl SystemMemoryProbe {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
        }
    }

    /// Map a memory usage percentage onto a status
    pub fn classify(component: &str, used_percent: f64) -> ComponentStatus {
        let description = format!("Memory usage: {used_percent:.1}%");
        if used_percent < 80.0 {
            ComponentStatus::healthy(component)
        } else if used_percent < 95.0 {
            ComponentStatus::new(component, HealthLevel::Degraded, true)
                .with_error(description)
                .with_issue_type(IssueType::ResourceExhaustion)
        } else {
            ComponentStatus::new(component, HealthLevel::Unhealthy, false)
                .with_error(description)
                .with_issue_type(IssueType::ResourceExhaustion)
        }
    }
}

#[async_trait]
impl HealthProbe for SystemMemoryProbe {
    fn component(&self) -> &str {
        &self.component
    }

    async fn check(&self, _timeout: Duration) -> ComponentStatus {
        let start = Instant::now();
        let usage = tokio::task::spawn_blocking(|| {
            let mut system = sysinfo::System::new();
            system.refresh_memory();
            (system.used_memory(), system.total_memory())
        })
        .await;

        let status = match usage {
            Ok((_, 0)) => ComponentStatus::unknown(
                self.component.as_str(),
                "total memory reported as zero",
            ),
            Ok((used, total)) => {
                Self::classify(&self.component, used as f64 * 100.0 / total as f64)
            }
            Err(e) => ComponentStatus::unhealthy(
                self.component.as_str(),
                format!("memory sampling failed: {e}"),
            ),
        };

        status.with_response_time((start.elapsed().as_millis() as u64).max(1))
    }
}
