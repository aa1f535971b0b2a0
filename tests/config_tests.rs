//! Environment driven configuration loading.

use anyhow::Result;
use codex_resilience::monitoring::SelfHealingMode;
use codex_resilience::{Config, FailurePolicy, LogFormat};
use serial_test::serial;
use std::env;

const VARS: &[&str] = &[
    "HEALTH_CHECK_INTERVAL_SECONDS",
    "HEALTH_ALERT_THRESHOLD_MINUTES",
    "HEALTH_ENABLE_SELF_HEALING",
    "HEALTH_ENABLE_ALERTING",
    "HEALTH_MONITORED_COMPONENTS",
    "HEALTH_CRITICAL_COMPONENTS",
    "HEALTH_SCORE_THRESHOLD",
    "HEALTH_MAX_RETRY_ATTEMPTS",
    "HEALTH_TIMEOUT_MS",
    "HEALTH_SELF_HEALING_MODE",
    "RATE_LIMIT_DEFAULT_MAX_REQUESTS",
    "RATE_LIMIT_PREMIUM_MAX_REQUESTS",
    "RATE_LIMIT_WINDOW_SECONDS",
    "RATE_LIMIT_FAILURE_POLICY",
    "RATE_LIMIT_EXEMPT_PATHS",
    "DATABASE_URL",
    "LOG_LEVEL",
    "LOG_FORMAT",
];

fn clear_env() {
    for var in VARS {
        env::remove_var(var);
    }
}

#[test]
#[serial]
fn test_defaults_without_environment() -> Result<()> {
    clear_env();
    let config = Config::from_env()?;

    assert_eq!(config.monitoring.interval_seconds, 60);
    assert_eq!(config.monitoring.alert_threshold_minutes, 5);
    assert!(config.monitoring.monitored_components.is_empty());
    assert_eq!(config.rate_limit.window_seconds, 3600);
    assert_eq!(config.rate_limit.failure_policy, FailurePolicy::FailClosed);
    assert!(config.database_url.is_none());
    assert_eq!(config.log_format, LogFormat::Text);
    config.validate()?;
    Ok(())
}

#[test]
#[serial]
fn test_environment_overrides() -> Result<()> {
    clear_env();
    env::set_var("HEALTH_CHECK_INTERVAL_SECONDS", "15");
    env::set_var("HEALTH_ENABLE_ALERTING", "false");
    env::set_var("HEALTH_MONITORED_COMPONENTS", "database, cache");
    env::set_var("HEALTH_CRITICAL_COMPONENTS", "database");
    env::set_var("HEALTH_SCORE_THRESHOLD", "90.5");
    env::set_var("HEALTH_SELF_HEALING_MODE", "detached");
    env::set_var("RATE_LIMIT_FAILURE_POLICY", "fail-open");
    env::set_var("RATE_LIMIT_EXEMPT_PATHS", "/health,/metrics");
    env::set_var("DATABASE_URL", "postgresql://localhost/codex");
    env::set_var("LOG_FORMAT", "json");

    let config = Config::from_env()?;
    clear_env();

    assert_eq!(config.monitoring.interval_seconds, 15);
    assert!(!config.monitoring.enable_alerting);
    assert_eq!(config.monitoring.monitored_components.len(), 2);
    assert!(config.monitoring.is_component_critical("database"));
    assert_eq!(config.monitoring.health_score_threshold, 90.5);
    assert_eq!(config.monitoring.self_healing_mode, SelfHealingMode::Detached);
    assert_eq!(config.rate_limit.failure_policy, FailurePolicy::FailOpen);
    assert!(config.rate_limit.is_exempt("/metrics"));
    assert_eq!(
        config.database_url.as_deref(),
        Some("postgresql://localhost/codex")
    );
    assert_eq!(config.log_format, LogFormat::Json);
    config.validate()?;
    Ok(())
}

#[test]
#[serial]
fn test_malformed_values_rejected() {
    clear_env();
    env::set_var("HEALTH_TIMEOUT_MS", "soon");
    assert!(Config::from_env().is_err());
    clear_env();

    env::set_var("RATE_LIMIT_FAILURE_POLICY", "maybe");
    assert!(Config::from_env().is_err());
    clear_env();
}

#[test]
#[serial]
fn test_out_of_range_values_fail_validation() -> Result<()> {
    clear_env();
    env::set_var("HEALTH_SCORE_THRESHOLD", "120");
    env::set_var("RATE_LIMIT_DEFAULT_MAX_REQUESTS", "0");

    let config = Config::from_env()?;
    clear_env();

    assert!(config.validate().is_err());
    Ok(())
}
