pub mod clock;
pub mod config;
pub mod error;
pub mod monitoring;
pub mod rate_limit;

pub use clock::{system_clock, Clock, ManualClock, SystemClock};
pub use config::{Config, LogFormat};
pub use error::{ResilienceError, Result};

// Re-export monitoring types
pub use monitoring::{
    AlertSink, CollectingAlertSink, ComponentRegistry, ComponentStatus, HealthCheckResult,
    HealthIssue, HealthLevel, HealthMonitor, HealthMonitoringConfig, HealthProbe, IntoHealthIssue,
    IssueSeverity, IssueType, LogAlertSink, Remediator, ReportedIssue, SelfHealer,
    SelfHealingResult, SystemHealthReport,
};

// Re-export rate limiting types
pub use rate_limit::{
    client_key, ClientTier, CounterStore, FailurePolicy, InMemoryCounterStore, RateLimitDecision,
    RateLimitSettings, RateLimiter,
};
