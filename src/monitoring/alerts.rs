use super::{HealthIssue, IssueSeverity, IssueType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Mutex;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum AlertReason {
    /// Severity alone warrants paging
    Severity,
    /// Component has been non-healthy for at least the alert threshold
    Sustained { minutes: i64 },
    /// Overall health score fell below the configured threshold
    HealthScore { score: f64, threshold: f64 },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Alert {
    pub component: Option<String>,
    pub severity: IssueSeverity,
    pub reason: AlertReason,
    pub message: String,
    pub triggered_at: DateTime<Utc>,
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl Alert {
    pub fn for_issue(issue: &HealthIssue, reason: AlertReason, at: DateTime<Utc>) -> Self {
        let message = match &reason {
            AlertReason::Sustained { minutes } => {
                format!("ALERT: {} (unhealthy for {}m)", issue.formatted(), minutes)
            }
            _ => format!("ALERT: {}", issue.formatted()),
        };

        Self {
            component: Some(issue.component.clone()),
            severity: issue.severity,
            reason,
            message,
            triggered_at: at,
        }
    }

    pub fn health_score(score: f64, threshold: f64, at: DateTime<Utc>) -> Self {
        Self {
            component: None,
            severity: IssueSeverity::High,
            reason: AlertReason::HealthScore { score, threshold },
            message: format!(
                "ALERT: system health score {score:.1}% below threshold {threshold:.1}%"
            ),
            triggered_at: at,
        }
    }
}

/// Decide whether `issue` should raise an alert.
///
/// Critical issues always alert. High issues alert immediately unless they are
/// timeouts, which are treated as transient. Anything else alerts only once the
/// component has been continuously non-healthy for `threshold`, which keeps
/// flapping degraded states quiet.
pub fn alert_reason(
    issue: &HealthIssue,
    unhealthy_for: Option<chrono::Duration>,
    threshold: chrono::Duration,
) -> Option<AlertReason> {
    match issue.severity {
        IssueSeverity::Critical => return Some(AlertReason::Severity),
        IssueSeverity::High if issue.issue_type != IssueType::Timeout => {
            return Some(AlertReason::Severity)
        }
        _ => {}
    }

    unhealthy_for
        .filter(|elapsed| *elapsed >= threshold)
        .map(|elapsed| AlertReason::Sustained {
            minutes: elapsed.num_minutes(),
        })
}

/// Receives alerts produced by the monitor
pub trait AlertSink: Send + Sync {
    fn send(&self, alert: &Alert);
}

/// Writes alerts to the tracing log at a level matching their severity
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn send(&self, alert: &Alert) {
        match alert.severity {
            IssueSeverity::Critical | IssueSeverity::High => error!("🚨 {}", alert.message),
            IssueSeverity::Medium => warn!("🚨 {}", alert.message),
            IssueSeverity::Low => info!("{}", alert.message),
        }
    }
}

/// Keeps every alert in memory, for collaborators that poll instead of subscribe
#[derive(Debug, Default)]
pub struct CollectingAlertSink {
    alerts: Mutex<Vec<Alert>>,
}

impl CollectingAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn drain(&self) -> Vec<Alert> {
        std::mem::take(&mut *self.alerts.lock().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn len(&self) -> usize {
        self.alerts.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AlertSink for CollectingAlertSink {
    fn send(&self, alert: &Alert) {
        self.alerts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(alert.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn issue(severity: IssueSeverity, issue_type: IssueType) -> HealthIssue {
        HealthIssue::new("cache", issue_type, severity, "probe failed")
    }

    #[test]
    fn test_critical_and_high_alert_immediately() {
        let threshold = Duration::minutes(5);
        assert_eq!(
            alert_reason(&issue(IssueSeverity::Critical, IssueType::Timeout), None, threshold),
            Some(AlertReason::Severity)
        );
        assert_eq!(
            alert_reason(
                &issue(IssueSeverity::High, IssueType::ConnectionFailure),
                Some(Duration::zero()),
                threshold
            ),
            Some(AlertReason::Severity)
        );
    }

    #[test]
    fn test_degraded_and_timeouts_wait_for_threshold() {
        let threshold = Duration::minutes(5);
        let degraded = issue(IssueSeverity::Medium, IssueType::PerformanceDegradation);
        assert!(alert_reason(&degraded, Some(Duration::minutes(4)), threshold).is_none());
        assert_eq!(
            alert_reason(&degraded, Some(Duration::minutes(5)), threshold),
            Some(AlertReason::Sustained { minutes: 5 })
        );

        let timeout = issue(IssueSeverity::High, IssueType::Timeout);
        assert!(alert_reason(&timeout, Some(Duration::minutes(1)), threshold).is_none());
        assert!(alert_reason(&timeout, Some(Duration::minutes(6)), threshold).is_some());
    }

    #[test]
    fn test_collecting_sink() {
        let sink = CollectingAlertSink::new();
        let alert = Alert::health_score(50.0, 80.0, Utc::now());
        sink.send(&alert);
        assert_eq!(sink.len(), 1);
        assert_eq!(
            sink.drain()[0].message,
            "ALERT: system health score 50.0% below threshold 80.0%"
        );
        assert!(sink.is_empty());
    }
}
