use thiserror::Error;

#[derive(Error, Debug)]
pub enum ResilienceError {
    #[error("Probe for {component} timed out after {timeout_ms}ms")]
    ProbeTimeout { component: String, timeout_ms: u64 },

    #[error("Probe for {component} failed: {message}")]
    ProbeFailure { component: String, message: String },

    #[error("Invalid configuration: {0}")]
    ConfigurationInvalid(String),

    #[error("Remediation for {component} failed: {message}")]
    RemediationFailure { component: String, message: String },

    #[error("Counter store unavailable: {0}")]
    CounterStoreUnavailable(String),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl ResilienceError {
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::ConfigurationInvalid(message.into())
    }

    pub fn remediation(component: &str, message: impl Into<String>) -> Self {
        Self::RemediationFailure {
            component: component.to_string(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ResilienceError>;
