pub mod alerts;
pub mod config;
pub mod healing;
pub mod health;
pub mod metrics;
pub mod probe;
pub mod registry;
pub mod report;

pub use alerts::*;
pub use config::*;
pub use healing::*;
pub use health::*;
pub use metrics::*;
pub use probe::*;
pub use registry::*;
pub use report::*;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthLevel {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

/// Latest observation of one component.
///
/// `operational == false` never coexists with `Healthy`; see [`ComponentStatus::normalized`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComponentStatus {
    pub name: String,
    pub health: HealthLevel,
    pub operational: bool,
    pub last_check_time: DateTime<Utc>,
    pub response_time_ms: u64,
    pub error_message: Option<String>,
    /// Probe's diagnosis of what is wrong, used when deriving issues
    pub issue_type: Option<IssueType>,
}

impl ComponentStatus {
    pub fn new(name: impl Into<String>, health: HealthLevel, operational: bool) -> Self {
        Self {
            name: name.into(),
            health,
            operational,
            last_check_time: Utc::now(),
            response_time_ms: 0,
            error_message: None,
            issue_type: None,
        }
        .normalized()
    }

    pub fn healthy(name: impl Into<String>) -> Self {
        Self::new(name, HealthLevel::Healthy, true)
    }

    pub fn degraded(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(name, HealthLevel::Degraded, true)
            .with_error(message)
            .with_issue_type(IssueType::PerformanceDegradation)
    }

    pub fn unhealthy(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(name, HealthLevel::Unhealthy, false)
            .with_error(message)
            .with_issue_type(IssueType::ConnectionFailure)
    }

    pub fn unknown(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(name, HealthLevel::Unknown, false).with_error(message)
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn with_issue_type(mut self, issue_type: IssueType) -> Self {
        self.issue_type = Some(issue_type);
        self
    }

    pub fn with_response_time(mut self, response_time_ms: u64) -> Self {
        self.response_time_ms = response_time_ms;
        self
    }

    pub fn checked_at(mut self, at: DateTime<Utc>) -> Self {
        self.last_check_time = at;
        self
    }

    /// Enforce the operational/health invariant: a non-operational component
    /// reported as healthy is downgraded to unhealthy.
    pub fn normalized(mut self) -> Self {
        if !self.operational && self.health == HealthLevel::Healthy {
            self.health = HealthLevel::Unhealthy;
        }
        self
    }

    pub fn is_healthy(&self) -> bool {
        self.operational && self.health == HealthLevel::Healthy
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueType {
    PerformanceDegradation,
    MemoryLeak,
    ConnectionFailure,
    Timeout,
    ErrorRateHigh,
    ResourceExhaustion,
}

/// Ordered from least to most severe, so `severity >= IssueSeverity::High` reads naturally
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueSeverity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthIssue {
    pub component: String,
    pub issue_type: IssueType,
    pub severity: IssueSeverity,
    pub description: String,
    pub detected_at: DateTime<Utc>,
    pub suggested_fix: Option<String>,
    pub auto_fixable: bool,
}

impl HealthIssue {
    pub fn new(
        component: impl Into<String>,
        issue_type: IssueType,
        severity: IssueSeverity,
        description: impl Into<String>,
    ) -> Self {
        Self {
            component: component.into(),
            issue_type,
            severity,
            description: description.into(),
            detected_at: Utc::now(),
            suggested_fix: None,
            auto_fixable: false,
        }
    }

    pub fn auto_fixable(mut self, suggested_fix: impl Into<String>) -> Self {
        self.auto_fixable = true;
        self.suggested_fix = Some(suggested_fix.into());
        self
    }

    /// `[High] Connection Failure in cache: connection refused`
    pub fn formatted(&self) -> String {
        format!(
            "[{}] {} in {}: {}",
            severity_label(self.severity),
            issue_type_label(self.issue_type),
            self.component,
            self.description
        )
    }
}

/// Issue handed over by an external validator (startup, dependency, schema or
/// configuration checks), reduced to what the self-healer needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportedIssue {
    pub component: String,
    pub description: String,
    pub auto_fixable: bool,
    pub issue_type: Option<IssueType>,
    pub severity: Option<IssueSeverity>,
}

impl ReportedIssue {
    pub fn new(component: impl Into<String>, description: impl Into<String>, auto_fixable: bool) -> Self {
        Self {
            component: component.into(),
            description: description.into(),
            auto_fixable,
            issue_type: None,
            severity: None,
        }
    }
}

/// Input accepted by self-healing. `detected_at` comes from the monitor's clock
/// and is used when the input does not carry its own detection time.
pub trait IntoHealthIssue {
    fn into_health_issue(self, detected_at: DateTime<Utc>) -> HealthIssue;
}

impl IntoHealthIssue for HealthIssue {
    fn into_health_issue(self, _detected_at: DateTime<Utc>) -> HealthIssue {
        self
    }
}

impl IntoHealthIssue for ReportedIssue {
    fn into_health_issue(self, detected_at: DateTime<Utc>) -> HealthIssue {
        HealthIssue {
            component: self.component,
            issue_type: self.issue_type.unwrap_or(IssueType::ErrorRateHigh),
            severity: self.severity.unwrap_or(IssueSeverity::Medium),
            description: self.description,
            detected_at,
            suggested_fix: None,
            auto_fixable: self.auto_fixable,
        }
    }
}
