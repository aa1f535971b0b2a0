//! Bounded, automated remediation of auto-fixable issues.
//!
//! The healer owns a list of [`Remediator`]s. For each auto-fixable issue the
//! first remediator that claims it is tried up to `max_attempts` times, with
//! exponential backoff between tries. Every outcome (success, error, timeout,
//! panic) is recorded in the [`SelfHealingResult`]; nothing escapes the call.

use super::{execute_probe, HealthIssue, HealthMonitoringConfig, HealthProbe, IssueType};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

#[async_trait]
pub trait Remediator: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this remediator knows how to fix `issue`
    fn handles(&self, issue: &HealthIssue) -> bool;

    /// Human readable description of the action, used as the suggested fix
    fn describe(&self, issue: &HealthIssue) -> String {
        format!("{} for {}", self.name(), issue.component)
    }

    /// Perform one remediation action. `Ok` carries a short outcome description.
    async fn remediate(&self, issue: &HealthIssue) -> Result<String>;
}

/// Remediator backed by an async closure, scoped to one component
pub struct FnRemediator<F> {
    name: String,
    component: String,
    issue_types: Vec<IssueType>,
    action: F,
}

impl<F, Fut> FnRemediator<F>
where
    F: Fn(HealthIssue) -> Fut + Send + Sync,
    Fut: Future<Output = Result<String>> + Send,
{
    pub fn new(name: impl Into<String>, component: impl Into<String>, action: F) -> Self {
        Self {
            name: name.into(),
            component: component.into(),
            issue_types: Vec::new(),
            action,
        }
    }

    /// Restrict to the given issue types; by default every type is handled
    pub fn for_issue_types(mut self, issue_types: impl IntoIterator<Item = IssueType>) -> Self {
        self.issue_types = issue_types.into_iter().collect();
        self
    }
}

#[async_trait]
impl<F, Fut> Remediator for FnRemediator<F>
where
    F: Fn(HealthIssue) -> Fut + Send + Sync,
    Fut: Future<Output = Result<String>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn handles(&self, issue: &HealthIssue) -> bool {
        issue.component == self.component
            && (self.issue_types.is_empty() || self.issue_types.contains(&issue.issue_type))
    }

    async fn remediate(&self, issue: &HealthIssue) -> Result<String> {
        (self.action)(issue.clone()).await
    }
}

/// Re-triggers a component's probe; succeeds once the probe reports healthy
pub struct ReprobeRemediator {
    probe: Arc<dyn HealthProbe>,
    timeout: Duration,
}

impl ReprobeRemediator {
    pub fn new(probe: Arc<dyn HealthProbe>, timeout: Duration) -> Self {
        Self { probe, timeout }
    }
}

#[async_trait]
impl Remediator for ReprobeRemediator {
    fn name(&self) -> &str {
        "re-probe"
    }

    fn handles(&self, issue: &HealthIssue) -> bool {
        issue.component == self.probe.component()
    }

    fn describe(&self, issue: &HealthIssue) -> String {
        format!("Re-run health probe for {}", issue.component)
    }

    async fn remediate(&self, issue: &HealthIssue) -> Result<String> {
        let run = execute_probe(self.probe.as_ref(), self.timeout, Utc::now()).await;
        match run.error() {
            None => Ok(format!("{} reported healthy on re-probe", issue.component)),
            Some(fault) => Err(fault),
        }
    }
}

/// Bounds applied to one healing call
#[derive(Debug, Clone)]
pub struct HealingPolicy {
    pub max_attempts: u32,
    pub remediation_timeout: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub jitter: bool,
}

impl Default for HealingPolicy {
    fn default() -> Self {
        Self::from_config(&HealthMonitoringConfig::default())
    }
}

impl HealingPolicy {
    pub fn from_config(config: &HealthMonitoringConfig) -> Self {
        Self {
            max_attempts: config.max_retry_attempts,
            remediation_timeout: config.remediation_timeout(),
            initial_backoff: Duration::from_millis(config.retry_backoff_ms),
            max_backoff: Duration::from_secs(5),
            jitter: true,
        }
    }

    fn next_backoff(&self, current: Duration) -> Duration {
        let mut next = current.saturating_mul(2);
        if self.jitter {
            let jitter_amount = next.as_secs_f64() * 0.1 * rand::random::<f64>();
            next = Duration::from_secs_f64(next.as_secs_f64() + jitter_amount);
        }
        next.min(self.max_backoff)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemediationAttempt {
    pub component: String,
    pub issue_type: IssueType,
    pub remediator: String,
    /// 1-based attempt number for this issue within the call
    pub attempt: u32,
    pub succeeded: bool,
    pub detail: String,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelfHealingResult {
    pub issues_addressed: Vec<HealthIssue>,
    pub attempts: Vec<RemediationAttempt>,
    pub remaining_issues: Vec<HealthIssue>,
    pub healing_time_ms: u64,
    pub completed_at: DateTime<Utc>,
}

impl SelfHealingResult {
    pub fn actions_attempted(&self) -> usize {
        self.attempts.len()
    }

    pub fn failed_attempts(&self) -> usize {
        self.attempts.iter().filter(|a| !a.succeeded).count()
    }

    pub fn fully_healed(&self) -> bool {
        self.remaining_issues.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "🔧 Self-healing: {} fixed, {} remaining, {} actions in {}ms",
            self.issues_addressed.len(),
            self.remaining_issues.len(),
            self.attempts.len(),
            self.healing_time_ms
        )
    }
}

#[derive(Default)]
pub struct SelfHealer {
    remediators: RwLock<Vec<Arc<dyn Remediator>>>,
}

impl SelfHealer {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, remediator: Arc<dyn Remediator>) {
        info!("Registering remediator '{}'", remediator.name());
        self.remediators.write().await.push(remediator);
    }

    /// The remediator that would be used for `issue`, if any
    pub async fn remediator_for(&self, issue: &HealthIssue) -> Option<Arc<dyn Remediator>> {
        self.remediators
            .read()
            .await
            .iter()
            .find(|r| r.handles(issue))
            .cloned()
    }

    pub async fn can_remediate(&self, issue: &HealthIssue) -> bool {
        self.remediator_for(issue).await.is_some()
    }

    pub async fn attempt_self_healing(
        &self,
        issues: Vec<HealthIssue>,
        policy: &HealingPolicy,
    ) -> SelfHealingResult {
        let start = Instant::now();
        let mut issues_addressed = Vec::new();
        let mut remaining_issues = Vec::new();
        let mut attempts = Vec::new();

        // Attempts are bounded per (component, issue type) so duplicates in one
        // call share a budget.
        let mut used: HashMap<(String, IssueType), u32> = HashMap::new();

        for issue in issues {
            if !issue.auto_fixable {
                remaining_issues.push(issue);
                continue;
            }

            let Some(remediator) = self.remediator_for(&issue).await else {
                debug!(component = %issue.component, "No remediator registered");
                remaining_issues.push(issue);
                continue;
            };

            let key = (issue.component.clone(), issue.issue_type);
            let mut healed = false;
            let mut backoff = policy.initial_backoff;

            loop {
                let count = used.entry(key.clone()).or_insert(0);
                if *count >= policy.max_attempts {
                    break;
                }
                *count += 1;
                let attempt_number = *count;

                let attempt = Self::run_attempt(
                    remediator.as_ref(),
                    &issue,
                    attempt_number,
                    policy.remediation_timeout,
                )
                .await;
                healed = attempt.succeeded;
                attempts.push(attempt);

                if healed || attempt_number >= policy.max_attempts {
                    break;
                }
                if !backoff.is_zero() {
                    tokio::time::sleep(backoff).await;
                    backoff = policy.next_backoff(backoff);
                }
            }

            if healed {
                info!(component = %issue.component, "✅ Self-healing succeeded");
                issues_addressed.push(issue);
            } else {
                warn!(component = %issue.component, "Self-healing did not resolve issue");
                remaining_issues.push(issue);
            }
        }

        SelfHealingResult {
            issues_addressed,
            attempts,
            remaining_issues,
            healing_time_ms: start.elapsed().as_millis() as u64,
            completed_at: Utc::now(),
        }
    }

    async fn run_attempt(
        remediator: &dyn Remediator,
        issue: &HealthIssue,
        attempt: u32,
        timeout: Duration,
    ) -> RemediationAttempt {
        let start = Instant::now();
        let action = AssertUnwindSafe(remediator.remediate(issue)).catch_unwind();

        let (succeeded, detail) = match tokio::time::timeout(timeout, action).await {
            Ok(Ok(Ok(detail))) => (true, detail),
            Ok(Ok(Err(e))) => (false, e.to_string()),
            Ok(Err(_)) => (false, "remediation action panicked".to_string()),
            Err(_) => (
                false,
                format!("remediation timed out after {}ms", timeout.as_millis()),
            ),
        };

        if !succeeded {
            warn!(
                component = %issue.component,
                remediator = remediator.name(),
                attempt,
                "Remediation attempt failed: {}",
                detail
            );
        }

        RemediationAttempt {
            component: issue.component.clone(),
            issue_type: issue.issue_type,
            remediator: remediator.name().to_string(),
            attempt,
            succeeded,
            detail,
            elapsed_ms: start.elapsed().as_millis() as u64,
        }
    }
}
