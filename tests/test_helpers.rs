//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use codex_resilience::monitoring::{HealthMonitoringConfig, HealthProbe};
use codex_resilience::rate_limit::{CounterStore, WindowSnapshot};
use codex_resilience::{
    CollectingAlertSink, ComponentStatus, HealthMonitor, ManualClock, ResilienceError, Result,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Counter store that is always unreachable
#[derive(Debug, Default)]
pub struct UnavailableStore;

#[async_trait]
impl CounterStore for UnavailableStore {
    async fn increment(&self, _key: &str, _window: Duration) -> Result<WindowSnapshot> {
        Err(ResilienceError::CounterStoreUnavailable(
            "connection refused".to_string(),
        ))
    }

    async fn snapshot(&self, _key: &str) -> Result<Option<WindowSnapshot>> {
        Err(ResilienceError::CounterStoreUnavailable(
            "connection refused".to_string(),
        ))
    }

    async fn ping(&self) -> Result<()> {
        Err(ResilienceError::CounterStoreUnavailable(
            "connection refused".to_string(),
        ))
    }
}

/// Probe whose answer the test controls, counting how often it ran
pub struct ScriptedProbe {
    component: String,
    status: Mutex<ComponentStatus>,
    delay: Duration,
    calls: AtomicUsize,
}

impl ScriptedProbe {
    pub fn new(status: ComponentStatus) -> Arc<Self> {
        Self::slow(status, Duration::ZERO)
    }

    /// Answers only after `delay`
    pub fn slow(status: ComponentStatus, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            component: status.name.clone(),
            status: Mutex::new(status),
            delay,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn healthy(component: &str) -> Arc<Self> {
        Self::new(ComponentStatus::healthy(component))
    }

    pub fn set(&self, status: ComponentStatus) {
        *self.status.lock().unwrap() = status;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HealthProbe for ScriptedProbe {
    fn component(&self) -> &str {
        &self.component
    }

    async fn check(&self, _timeout: Duration) -> ComponentStatus {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.status.lock().unwrap().clone()
    }
}

/// Probe that never answers on its own
pub struct HangingProbe {
    component: String,
}

impl HangingProbe {
    pub fn new(component: &str) -> Arc<Self> {
        Arc::new(Self {
            component: component.to_string(),
        })
    }
}

#[async_trait]
impl HealthProbe for HangingProbe {
    fn component(&self) -> &str {
        &self.component
    }

    async fn check(&self, _timeout: Duration) -> ComponentStatus {
        std::future::pending::<()>().await;
        ComponentStatus::healthy(self.component.as_str())
    }
}

pub struct TestMonitor {
    pub monitor: Arc<HealthMonitor>,
    pub alerts: Arc<CollectingAlertSink>,
    pub clock: ManualClock,
}

pub fn start_time() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

/// Monitor wired to a collecting sink and a manual clock
pub fn test_monitor(config: HealthMonitoringConfig) -> TestMonitor {
    let alerts = Arc::new(CollectingAlertSink::new());
    let clock = ManualClock::new(start_time());
    let monitor = HealthMonitor::new(config)
        .unwrap()
        .with_alert_sink(alerts.clone())
        .with_clock(Arc::new(clock.clone()));

    TestMonitor {
        monitor: Arc::new(monitor),
        alerts,
        clock,
    }
}

pub fn components(names: &[&str]) -> std::collections::BTreeSet<String> {
    names.iter().map(|n| n.to_string()).collect()
}
