use crate::monitoring::{HealthMonitoringConfig, SelfHealingMode};
use crate::rate_limit::{FailurePolicy, RateLimitSettings};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Health monitoring settings
    pub monitoring: HealthMonitoringConfig,

    /// Rate limiting quotas and failure policy
    pub rate_limit: RateLimitSettings,

    /// PostgreSQL URL; enables the database probe when set
    pub database_url: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    pub log_level: String,

    /// Log output format (text or json)
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            monitoring: HealthMonitoringConfig::default(),
            rate_limit: RateLimitSettings::default(),
            database_url: None,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
        }
    }
}

fn parse_var<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("Invalid {}: {}", name, e)),
        Err(_) => Ok(None),
    }
}

fn parse_list(value: &str) -> BTreeSet<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok(); // Load .env file if present

        let mut config = Config::default();

        // Health monitoring
        let monitoring = &mut config.monitoring;
        if let Some(interval) = parse_var("HEALTH_CHECK_INTERVAL_SECONDS")? {
            monitoring.interval_seconds = interval;
        }
        if let Some(minutes) = parse_var("HEALTH_ALERT_THRESHOLD_MINUTES")? {
            monitoring.alert_threshold_minutes = minutes;
        }
        if let Some(enable) = parse_var("HEALTH_ENABLE_SELF_HEALING")? {
            monitoring.enable_self_healing = enable;
        }
        if let Some(enable) = parse_var("HEALTH_ENABLE_ALERTING")? {
            monitoring.enable_alerting = enable;
        }
        if let Ok(components) = env::var("HEALTH_MONITORED_COMPONENTS") {
            monitoring.monitored_components = parse_list(&components);
        }
        if let Ok(components) = env::var("HEALTH_CRITICAL_COMPONENTS") {
            monitoring.critical_components = parse_list(&components);
        }
        if let Some(threshold) = parse_var("HEALTH_SCORE_THRESHOLD")? {
            monitoring.health_score_threshold = threshold;
        }
        if let Some(attempts) = parse_var("HEALTH_MAX_RETRY_ATTEMPTS")? {
            monitoring.max_retry_attempts = attempts;
        }
        if let Some(timeout) = parse_var("HEALTH_TIMEOUT_MS")? {
            monitoring.timeout_ms = timeout;
        }
        if let Some(mode) = parse_var::<SelfHealingMode>("HEALTH_SELF_HEALING_MODE")? {
            monitoring.self_healing_mode = mode;
        }

        // Rate limiting
        let rate_limit = &mut config.rate_limit;
        if let Some(max) = parse_var("RATE_LIMIT_DEFAULT_MAX_REQUESTS")? {
            rate_limit.default_max_requests = max;
        }
        if let Some(max) = parse_var("RATE_LIMIT_PREMIUM_MAX_REQUESTS")? {
            rate_limit.premium_max_requests = max;
        }
        if let Some(window) = parse_var("RATE_LIMIT_WINDOW_SECONDS")? {
            rate_limit.window_seconds = window;
        }
        if let Some(policy) = parse_var::<FailurePolicy>("RATE_LIMIT_FAILURE_POLICY")? {
            rate_limit.failure_policy = policy;
        }
        if let Ok(paths) = env::var("RATE_LIMIT_EXEMPT_PATHS") {
            rate_limit.exempt_path_prefixes = parse_list(&paths).into_iter().collect();
        }

        config.database_url = env::var("DATABASE_URL").ok().filter(|url| !url.is_empty());

        if let Ok(level) = env::var("LOG_LEVEL") {
            config.log_level = level;
        }
        if let Ok(format) = env::var("LOG_FORMAT") {
            config.log_format = match format.trim().to_ascii_lowercase().as_str() {
                "json" => LogFormat::Json,
                "text" | "pretty" => LogFormat::Text,
                other => return Err(anyhow::anyhow!("Invalid LOG_FORMAT: {}", other)),
            };
        }

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.monitoring
            .validate()
            .map_err(|e| anyhow::anyhow!("Monitoring configuration error: {e}"))?;
        self.rate_limit
            .validate()
            .map_err(|e| anyhow::anyhow!("Rate limit configuration error: {e}"))?;

        if let Some(url) = &self.database_url {
            if !url.starts_with("postgres://") && !url.starts_with("postgresql://") {
                return Err(anyhow::anyhow!(
                    "DATABASE_URL must be a postgres:// or postgresql:// URL"
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_list() {
        let list = parse_list(" cache, database ,,queue");
        assert_eq!(list.len(), 3);
        assert!(list.contains("database"));
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.rate_limit.default_max_requests, 1000);
        assert_eq!(config.rate_limit.premium_max_requests, 5000);
    }

    #[test]
    fn test_rejects_non_postgres_url() {
        let config = Config {
            database_url: Some("mysql://localhost/db".to_string()),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
