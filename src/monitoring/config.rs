use crate::error::{ResilienceError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;
use std::time::Duration;

/// Where self-healing runs relative to the monitoring cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelfHealingMode {
    /// Heal inside the cycle; the report reflects post-healing state
    #[default]
    Inline,
    /// Heal on a spawned task; the outcome is folded into the next report
    Detached,
}

impl FromStr for SelfHealingMode {
    type Err = ResilienceError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inline" => Ok(SelfHealingMode::Inline),
            "detached" => Ok(SelfHealingMode::Detached),
            other => Err(ResilienceError::invalid_config(format!(
                "unknown self-healing mode '{other}' (expected inline or detached)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthMonitoringConfig {
    pub interval_seconds: u64,
    pub alert_threshold_minutes: u64,
    pub enable_self_healing: bool,
    pub enable_alerting: bool,
    /// Empty means every registered probe is monitored
    pub monitored_components: BTreeSet<String>,
    pub critical_components: BTreeSet<String>,
    pub health_score_threshold: f64,
    pub max_retry_attempts: u32,
    pub timeout_ms: u64,
    pub self_healing_mode: SelfHealingMode,
    pub remediation_timeout_ms: u64,
    pub retry_backoff_ms: u64,
}

impl Default for HealthMonitoringConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 60,
            alert_threshold_minutes: 5,
            enable_self_healing: true,
            enable_alerting: true,
            monitored_components: BTreeSet::new(),
            critical_components: BTreeSet::new(),
            health_score_threshold: 80.0,
            max_retry_attempts: 3,
            timeout_ms: 30_000,
            self_healing_mode: SelfHealingMode::Inline,
            remediation_timeout_ms: 10_000,
            retry_backoff_ms: 100,
        }
    }
}

impl HealthMonitoringConfig {
    pub fn is_component_critical(&self, component: &str) -> bool {
        self.critical_components.contains(component)
    }

    // TODO: confirm with product whether an empty list should mean "monitor nothing"
    // for some deployments; callers only see this through `is_component_monitored`.
    pub fn is_component_monitored(&self, component: &str) -> bool {
        self.monitored_components.is_empty() || self.monitored_components.contains(component)
    }

    pub fn should_trigger_alert(&self, health_score: f64) -> bool {
        health_score < self.health_score_threshold
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn remediation_timeout(&self) -> Duration {
        Duration::from_millis(self.remediation_timeout_ms)
    }

    pub fn alert_threshold(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.alert_threshold_minutes as i64)
    }

    pub fn validate(&self) -> Result<()> {
        if self.interval_seconds == 0 {
            return Err(ResilienceError::invalid_config(
                "interval_seconds must be positive",
            ));
        }
        if self.alert_threshold_minutes == 0 {
            return Err(ResilienceError::invalid_config(
                "alert_threshold_minutes must be positive",
            ));
        }
        if self.timeout_ms == 0 {
            return Err(ResilienceError::invalid_config("timeout_ms must be positive"));
        }
        if self.remediation_timeout_ms == 0 {
            return Err(ResilienceError::invalid_config(
                "remediation_timeout_ms must be positive",
            ));
        }
        if !self.health_score_threshold.is_finite()
            || !(0.0..=100.0).contains(&self.health_score_threshold)
        {
            return Err(ResilienceError::invalid_config(format!(
                "health_score_threshold must be within 0-100, got {}",
                self.health_score_threshold
            )));
        }
        Ok(())
    }
}
