//! Cycle results, reports and the presentation lookups used to render them.

use super::{ComponentStatus, HealthIssue, HealthLevel, IssueSeverity, IssueType, SelfHealingResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

pub fn health_label(level: HealthLevel) -> &'static str {
    match level {
        HealthLevel::Healthy => "Healthy",
        HealthLevel::Degraded => "Degraded",
        HealthLevel::Unhealthy => "Unhealthy",
        HealthLevel::Unknown => "Unknown",
    }
}

pub fn health_icon(level: HealthLevel) -> &'static str {
    match level {
        HealthLevel::Healthy => "✅",
        HealthLevel::Degraded => "🟡",
        HealthLevel::Unhealthy => "🔴",
        HealthLevel::Unknown => "❓",
    }
}

pub fn severity_label(severity: IssueSeverity) -> &'static str {
    match severity {
        IssueSeverity::Critical => "Critical",
        IssueSeverity::High => "High",
        IssueSeverity::Medium => "Medium",
        IssueSeverity::Low => "Low",
    }
}

pub fn issue_type_label(issue_type: IssueType) -> &'static str {
    match issue_type {
        IssueType::PerformanceDegradation => "Performance Degradation",
        IssueType::MemoryLeak => "Memory Leak",
        IssueType::ConnectionFailure => "Connection Failure",
        IssueType::Timeout => "Timeout",
        IssueType::ErrorRateHigh => "High Error Rate",
        IssueType::ResourceExhaustion => "Resource Exhaustion",
    }
}

/// One-line rendering of a component status
pub fn format_status(status: &ComponentStatus) -> String {
    let mut line = format!(
        "{} {}: {} ({}ms)",
        health_icon(status.health),
        status.name,
        health_label(status.health),
        status.response_time_ms
    );
    if let Some(message) = &status.error_message {
        line.push_str(" - ");
        line.push_str(message);
    }
    line
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OverallHealth {
    Healthy,
    Degraded,
    Unhealthy,
}

impl OverallHealth {
    pub fn label(&self) -> &'static str {
        match self {
            OverallHealth::Healthy => "HEALTHY",
            OverallHealth::Degraded => "DEGRADED",
            OverallHealth::Unhealthy => "UNHEALTHY",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PerformanceMetrics {
    pub components_checked: usize,
    pub healthy_components: usize,
    pub degraded_components: usize,
    pub unhealthy_components: usize,
    pub unknown_components: usize,
    pub probe_timeouts: usize,
    pub avg_response_time_ms: f64,
    pub max_response_time_ms: u64,
    /// Percentage of components that are healthy and operational
    pub health_score: f64,
}

impl PerformanceMetrics {
    pub fn from_statuses(statuses: &HashMap<String, ComponentStatus>, probe_timeouts: usize) -> Self {
        let mut metrics = PerformanceMetrics {
            components_checked: statuses.len(),
            probe_timeouts,
            health_score: 100.0,
            ..Default::default()
        };

        for status in statuses.values() {
            match status.health {
                HealthLevel::Healthy if status.operational => metrics.healthy_components += 1,
                HealthLevel::Healthy | HealthLevel::Unhealthy => metrics.unhealthy_components += 1,
                HealthLevel::Degraded => metrics.degraded_components += 1,
                HealthLevel::Unknown => metrics.unknown_components += 1,
            }
            metrics.max_response_time_ms = metrics.max_response_time_ms.max(status.response_time_ms);
        }

        if !statuses.is_empty() {
            let total: u64 = statuses.values().map(|s| s.response_time_ms).sum();
            metrics.avg_response_time_ms = total as f64 / statuses.len() as f64;
            metrics.health_score =
                metrics.healthy_components as f64 * 100.0 / statuses.len() as f64;
        }

        metrics
    }
}

/// Outcome of one monitoring cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub run_id: Uuid,
    pub healthy: bool,
    pub check_timestamp: DateTime<Utc>,
    pub component_statuses: HashMap<String, ComponentStatus>,
    pub health_issues: Vec<HealthIssue>,
    pub warnings: Vec<String>,
    pub recommendations: Vec<String>,
    pub alerts: Vec<String>,
    pub performance_metrics: PerformanceMetrics,
    pub overall_health: OverallHealth,
    pub overall_health_status: String,
    pub health_check_time_ms: u64,
    /// Self-healing performed in this cycle, or the detached outcome carried over from the last one
    pub self_healing: Option<SelfHealingResult>,
}

impl HealthCheckResult {
    pub fn has_health_issues(&self) -> bool {
        !self.health_issues.is_empty()
    }

    pub fn summary(&self) -> String {
        if self.healthy {
            format!(
                "✅ System {} - {} warnings",
                self.overall_health_status.to_lowercase(),
                self.warnings.len()
            )
        } else {
            format!(
                "❌ System unhealthy - {} issues, {} warnings",
                self.health_issues.len(),
                self.warnings.len()
            )
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemHealthReport {
    pub healthy: bool,
    pub report_timestamp: DateTime<Utc>,
    pub component_health: HashMap<String, ComponentStatus>,
    pub health_issues: Vec<HealthIssue>,
    pub recommendations: Vec<String>,
    pub performance_metrics: PerformanceMetrics,
    pub overall_health_status: String,
    pub healthy_component_count: usize,
    pub total_component_count: usize,
    pub health_percentage: f64,
    pub report_generation_time_ms: u64,
    pub last_self_healing: Option<SelfHealingResult>,
}

impl SystemHealthReport {
    pub fn from_check(result: &HealthCheckResult, generation_time_ms: u64) -> Self {
        let metrics = result.performance_metrics.clone();
        Self {
            healthy: result.healthy,
            report_timestamp: result.check_timestamp,
            component_health: result.component_statuses.clone(),
            health_issues: result.health_issues.clone(),
            recommendations: result.recommendations.clone(),
            overall_health_status: result.overall_health_status.clone(),
            healthy_component_count: metrics.healthy_components,
            total_component_count: metrics.components_checked,
            health_percentage: metrics.health_score,
            performance_metrics: metrics,
            report_generation_time_ms: generation_time_ms,
            last_self_healing: result.self_healing.clone(),
        }
    }

    pub fn summary(&self) -> String {
        if self.healthy {
            format!(
                "✅ System healthy - {}/{} components operational ({:.1}%)",
                self.healthy_component_count, self.total_component_count, self.health_percentage
            )
        } else {
            format!(
                "❌ System unhealthy - {} issues, {}/{} components operational ({:.1}%)",
                self.health_issues.len(),
                self.healthy_component_count,
                self.total_component_count,
                self.health_percentage
            )
        }
    }
}
