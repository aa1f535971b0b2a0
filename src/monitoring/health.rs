//! The health monitor: runs probe cycles, keeps the registry current, raises
//! alerts, drives self-healing and owns the periodic scheduler.
//!
//! One cycle:
//! 1. select probes (configured set, or all registered probes when unset)
//! 2. run them concurrently, each bounded by `timeout_ms`
//! 3. commit every status at once; components not probed become `Unknown`
//! 4. aggregate health over the critical components
//! 5. derive issues and recommendations
//! 6. send alerts for severe or sustained issues
//! 7. self-heal auto-fixable issues, inline or detached
//! 8. keep the result as the latest report
//!
//! The scheduler skips fires a slow cycle overran instead of queueing them.

use super::{
    alert_reason, execute_probe, health_label, Alert, AlertSink, ComponentRegistry,
    ComponentStatus, HealingPolicy, HealthCheckResult, HealthIssue, HealthLevel, IntoHealthIssue,
    HealthMonitoringConfig, HealthProbe, IssueSeverity, IssueType, LogAlertSink, MonitorMetrics,
    OverallHealth, PerformanceMetrics, RegistryEntry, Remediator, SelfHealer, SelfHealingMode,
    SelfHealingResult, SystemHealthReport,
};
use crate::clock::{system_clock, Clock};
use crate::error::{ResilienceError, Result};
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchedulerState {
    Stopped,
    Running,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerStatistics {
    pub state: SchedulerState,
    /// Active interval while running
    pub interval_seconds: Option<u64>,
    pub total_cycles: u64,
    /// Fires dropped because a cycle ran past them
    pub skipped_fires: u64,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub last_cycle_duration_ms: Option<u64>,
    pub started_at: Option<DateTime<Utc>>,
}

impl Default for SchedulerStatistics {
    fn default() -> Self {
        Self {
            state: SchedulerState::Stopped,
            interval_seconds: None,
            total_cycles: 0,
            skipped_fires: 0,
            last_cycle_at: None,
            last_cycle_duration_ms: None,
            started_at: None,
        }
    }
}

struct SchedulerHandle {
    shutdown_tx: broadcast::Sender<()>,
    interval_tx: watch::Sender<u64>,
    task: JoinHandle<()>,
}

/// Health verdict computed from one registry snapshot
struct Assessment {
    statuses: HashMap<String, ComponentStatus>,
    healthy: bool,
    overall: OverallHealth,
    issues: Vec<HealthIssue>,
    warnings: Vec<String>,
    recommendations: Vec<String>,
    metrics: PerformanceMetrics,
}

/// Turn a non-healthy status into an issue.
///
/// Unhealthy or non-operational components are `Critical` when configured as
/// critical and `High` otherwise; degraded ones are `Medium`; unknown ones `Low`.
pub fn derive_issue(
    status: &ComponentStatus,
    critical: bool,
    detected_at: DateTime<Utc>,
) -> Option<HealthIssue> {
    if status.is_healthy() {
        return None;
    }

    let description = status.error_message.clone().unwrap_or_else(|| {
        format!(
            "component reported {}",
            health_label(status.health).to_lowercase()
        )
    });

    let (issue_type, severity) = match status.health {
        HealthLevel::Unknown => (IssueType::ConnectionFailure, IssueSeverity::Low),
        HealthLevel::Degraded if status.operational => (
            status.issue_type.unwrap_or(IssueType::PerformanceDegradation),
            IssueSeverity::Medium,
        ),
        _ => (
            status.issue_type.unwrap_or(IssueType::ConnectionFailure),
            if critical {
                IssueSeverity::Critical
            } else {
                IssueSeverity::High
            },
        ),
    };

    let mut issue = HealthIssue::new(&status.name, issue_type, severity, description);
    issue.detected_at = detected_at;
    Some(issue)
}

pub struct HealthMonitor {
    config: ArcSwap<HealthMonitoringConfig>,
    probes: RwLock<Vec<Arc<dyn HealthProbe>>>,
    registry: ComponentRegistry,
    healer: Arc<SelfHealer>,
    alert_sink: Arc<dyn AlertSink>,
    clock: Arc<dyn Clock>,
    metrics: Arc<MonitorMetrics>,
    latest: RwLock<Option<HealthCheckResult>>,
    last_healing: Arc<RwLock<Option<SelfHealingResult>>>,
    /// At most one detached healing run is in flight
    detached_healing: Mutex<Option<JoinHandle<()>>>,
    scheduler: Mutex<Option<SchedulerHandle>>,
    statistics: Arc<RwLock<SchedulerStatistics>>,
}

impl HealthMonitor {
    pub fn new(config: HealthMonitoringConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            config: ArcSwap::from_pointee(config),
            probes: RwLock::new(Vec::new()),
            registry: ComponentRegistry::new(),
            healer: Arc::new(SelfHealer::new()),
            alert_sink: Arc::new(LogAlertSink),
            clock: system_clock(),
            metrics: Arc::new(MonitorMetrics::new()?),
            latest: RwLock::new(None),
            last_healing: Arc::new(RwLock::new(None)),
            detached_healing: Mutex::new(None),
            scheduler: Mutex::new(None),
            statistics: Arc::new(RwLock::new(SchedulerStatistics::default())),
        })
    }

    pub fn with_alert_sink(mut self, alert_sink: Arc<dyn AlertSink>) -> Self {
        self.alert_sink = alert_sink;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Register a probe, replacing any earlier probe for the same component
    pub async fn register_probe(&self, probe: Arc<dyn HealthProbe>) {
        let mut probes = self.probes.write().await;
        probes.retain(|p| p.component() != probe.component());
        info!(component = probe.component(), "Registered health probe");
        probes.push(probe);
    }

    pub async fn register_remediator(&self, remediator: Arc<dyn Remediator>) {
        self.healer.register(remediator).await;
    }

    pub async fn probe_count(&self) -> usize {
        self.probes.read().await.len()
    }

    /// Read access to component state; only the monitor commits to it
    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    pub fn metrics(&self) -> &MonitorMetrics {
        &self.metrics
    }

    /// Run exactly one monitoring cycle and return its result.
    ///
    /// Never fails: probe and remediation faults are reflected in the result.
    #[instrument(skip(self))]
    pub async fn perform_health_check(&self) -> HealthCheckResult {
        let start = Instant::now();
        let config = self.config.load_full();
        let now = self.clock.now();
        let run_id = Uuid::new_v4();
        debug!(%run_id, "Starting health check cycle");

        let probes = self.selected_probes(&config).await;
        let (mut statuses, mut probe_timeouts) = self.run_probes(&probes, &config, now).await;

        let missing: Vec<String> = config
            .monitored_components
            .iter()
            .filter(|name| !statuses.iter().any(|s| &s.name == *name))
            .cloned()
            .collect();
        for name in missing {
            warn!(component = %name, "Monitored component has no registered probe");
            statuses.push(ComponentStatus::unknown(name, "no probe registered").checked_at(now));
        }

        let stale = self.registry.commit_cycle(statuses, now).await;
        if !stale.is_empty() {
            debug!(components = ?stale, "Marked components not probed this cycle as unknown");
        }

        let entries = self.registry.entries().await;
        let mut assessment = self.assess(&config, &entries, now, probe_timeouts).await;

        let alerts = if config.enable_alerting {
            let alerts = Self::collect_alerts(&config, &assessment, &entries, now);
            for alert in &alerts {
                self.alert_sink.send(alert);
            }
            self.metrics.alerts_total.inc_by(alerts.len() as u64);
            alerts.into_iter().map(|a| a.message).collect()
        } else {
            Vec::new()
        };

        let self_healing = if config.enable_self_healing
            && assessment.issues.iter().any(|i| i.auto_fixable)
        {
            match config.self_healing_mode {
                SelfHealingMode::Inline => {
                    let result = self
                        .heal_inline(&config, &probes, &mut assessment, &mut probe_timeouts, now)
                        .await;
                    Some(result)
                }
                SelfHealingMode::Detached => {
                    self.heal_detached(&config, assessment.issues.clone()).await
                }
            }
        } else {
            None
        };

        let unhealthy = assessment
            .statuses
            .values()
            .filter(|s| !s.is_healthy())
            .count();
        let elapsed = start.elapsed();

        let result = HealthCheckResult {
            run_id,
            healthy: assessment.healthy,
            check_timestamp: now,
            component_statuses: assessment.statuses,
            health_issues: assessment.issues,
            warnings: assessment.warnings,
            recommendations: assessment.recommendations,
            alerts,
            performance_metrics: assessment.metrics,
            overall_health: assessment.overall,
            overall_health_status: assessment.overall.label().to_string(),
            health_check_time_ms: elapsed.as_millis() as u64,
            self_healing,
        };

        self.metrics.record_cycle(elapsed, unhealthy);
        info!(
            %run_id,
            healthy = result.healthy,
            components = result.component_statuses.len(),
            issues = result.health_issues.len(),
            duration_ms = result.health_check_time_ms,
            "{}",
            result.summary()
        );

        *self.latest.write().await = Some(result.clone());
        result
    }

    async fn selected_probes(&self, config: &HealthMonitoringConfig) -> Vec<Arc<dyn HealthProbe>> {
        self.probes
            .read()
            .await
            .iter()
            .filter(|p| config.is_component_monitored(p.component()))
            .cloned()
            .collect()
    }

    async fn run_probes(
        &self,
        probes: &[Arc<dyn HealthProbe>],
        config: &HealthMonitoringConfig,
        checked_at: DateTime<Utc>,
    ) -> (Vec<ComponentStatus>, usize) {
        let timeout = config.probe_timeout();
        let runs = join_all(
            probes
                .iter()
                .map(|probe| execute_probe(probe.as_ref(), timeout, checked_at)),
        )
        .await;

        let mut timeouts = 0;
        let statuses = runs
            .into_iter()
            .map(|run| {
                self.metrics.record_probe(run.elapsed, run.timed_out);
                if run.timed_out {
                    timeouts += 1;
                }

                let status = run.status;
                match status.health {
                    HealthLevel::Healthy => debug!(
                        component = %status.name,
                        latency_ms = status.response_time_ms,
                        "Component healthy"
                    ),
                    HealthLevel::Degraded => warn!(
                        component = %status.name,
                        latency_ms = status.response_time_ms,
                        "Component degraded: {}",
                        status.error_message.as_deref().unwrap_or("no detail")
                    ),
                    HealthLevel::Unhealthy | HealthLevel::Unknown => error!(
                        component = %status.name,
                        latency_ms = status.response_time_ms,
                        "Component unhealthy: {}",
                        status.error_message.as_deref().unwrap_or("no detail")
                    ),
                }
                status
            })
            .collect();

        (statuses, timeouts)
    }

    async fn assess(
        &self,
        config: &HealthMonitoringConfig,
        entries: &HashMap<String, RegistryEntry>,
        now: DateTime<Utc>,
        probe_timeouts: usize,
    ) -> Assessment {
        let statuses: HashMap<String, ComponentStatus> = entries
            .iter()
            .map(|(name, entry)| (name.clone(), entry.status.clone()))
            .collect();
        let metrics = PerformanceMetrics::from_statuses(&statuses, probe_timeouts);

        let mut warnings = Vec::new();
        let mut recommendations = Vec::new();
        let mut issues = Vec::new();

        let mut healthy = true;
        for component in &config.critical_components {
            match statuses.get(component) {
                Some(status) if status.is_healthy() => {}
                Some(_) => healthy = false,
                None => {
                    healthy = false;
                    warnings.push(format!("Critical component {component} has not reported"));
                }
            }
        }

        let mut names: Vec<&String> = statuses.keys().collect();
        names.sort();

        for name in names {
            let status = &statuses[name];
            let Some(mut issue) =
                derive_issue(status, config.is_component_critical(name), now)
            else {
                continue;
            };

            match status.health {
                HealthLevel::Degraded => {
                    warnings.push(format!("{name} is degraded: {}", issue.description));
                    recommendations.push(format!("Monitor {name} - performance declining"));
                }
                HealthLevel::Unknown => {
                    warnings.push(format!("{name} status unknown: {}", issue.description));
                    recommendations.push(format!("Verify probe registration for {name}"));
                }
                HealthLevel::Unhealthy | HealthLevel::Healthy => {
                    recommendations.push(format!("Investigate {name} - significant issues detected"));
                }
            }

            if let Some(remediator) = self.healer.remediator_for(&issue).await {
                let fix = remediator.describe(&issue);
                issue = issue.auto_fixable(fix);
            }
            issues.push(issue);
        }

        if config.should_trigger_alert(metrics.health_score) {
            warnings.push(format!(
                "Health score {:.1}% below threshold {:.1}%",
                metrics.health_score, config.health_score_threshold
            ));
        }

        let overall = if !healthy {
            OverallHealth::Unhealthy
        } else if !issues.is_empty() || config.should_trigger_alert(metrics.health_score) {
            OverallHealth::Degraded
        } else {
            OverallHealth::Healthy
        };

        Assessment {
            statuses,
            healthy,
            overall,
            issues,
            warnings,
            recommendations,
            metrics,
        }
    }

    fn collect_alerts(
        config: &HealthMonitoringConfig,
        assessment: &Assessment,
        entries: &HashMap<String, RegistryEntry>,
        now: DateTime<Utc>,
    ) -> Vec<Alert> {
        let threshold = config.alert_threshold();
        let mut alerts: Vec<Alert> = assessment
            .issues
            .iter()
            .filter_map(|issue| {
                let unhealthy_for = entries
                    .get(&issue.component)
                    .and_then(|e| e.unhealthy_since)
                    .map(|since| now - since);
                alert_reason(issue, unhealthy_for, threshold)
                    .map(|reason| Alert::for_issue(issue, reason, now))
            })
            .collect();

        if config.should_trigger_alert(assessment.metrics.health_score) {
            alerts.push(Alert::health_score(
                assessment.metrics.health_score,
                config.health_score_threshold,
                now,
            ));
        }

        alerts
    }

    /// Heal within the cycle, then re-probe the healed components so the
    /// result reflects post-healing state.
    async fn heal_inline(
        &self,
        config: &HealthMonitoringConfig,
        probes: &[Arc<dyn HealthProbe>],
        assessment: &mut Assessment,
        probe_timeouts: &mut usize,
        now: DateTime<Utc>,
    ) -> SelfHealingResult {
        let policy = HealingPolicy::from_config(config);
        let result = self
            .healer
            .attempt_self_healing(assessment.issues.clone(), &policy)
            .await;
        self.metrics
            .record_remediation(result.actions_attempted(), result.failed_attempts());
        info!("{}", result.summary());
        *self.last_healing.write().await = Some(result.clone());

        let healed: BTreeSet<&str> = result
            .issues_addressed
            .iter()
            .map(|i| i.component.as_str())
            .collect();
        if healed.is_empty() {
            return result;
        }

        let reprobes: Vec<Arc<dyn HealthProbe>> = probes
            .iter()
            .filter(|p| healed.contains(p.component()))
            .cloned()
            .collect();
        let (statuses, timeouts) = self.run_probes(&reprobes, config, self.clock.now()).await;
        *probe_timeouts += timeouts;
        self.registry.commit_all(statuses).await;

        let entries = self.registry.entries().await;
        *assessment = self.assess(config, &entries, now, *probe_timeouts).await;
        result
    }

    /// Spawn healing off the cycle. Returns the previous detached outcome, if any.
    ///
    /// While an earlier detached run is still working the new one is skipped;
    /// its issues are seen again by the next cycle.
    async fn heal_detached(
        &self,
        config: &HealthMonitoringConfig,
        issues: Vec<HealthIssue>,
    ) -> Option<SelfHealingResult> {
        let carried = self.last_healing.read().await.clone();

        let mut in_flight = self.detached_healing.lock().await;
        if in_flight.as_ref().is_some_and(|task| !task.is_finished()) {
            debug!("Detached self-healing still running, skipping this cycle's run");
            self.metrics.healing_skipped_total.inc();
            return carried;
        }

        let policy = HealingPolicy::from_config(config);
        let healer = self.healer.clone();
        let last_healing = self.last_healing.clone();
        let metrics = self.metrics.clone();

        *in_flight = Some(tokio::spawn(async move {
            let result = healer.attempt_self_healing(issues, &policy).await;
            metrics.record_remediation(result.actions_attempted(), result.failed_attempts());
            info!("{}", result.summary());
            *last_healing.write().await = Some(result);
        }));

        carried
    }

    /// Wait for a detached healing run to finish
    async fn drain_detached_healing(&self) {
        let Some(task) = self.detached_healing.lock().await.take() else {
            return;
        };

        if let Err(e) = task.await {
            error!("Detached self-healing task failed: {}", e);
        }
    }

    pub async fn get_component_health_statuses(&self) -> HashMap<String, ComponentStatus> {
        self.registry.snapshot().await
    }

    pub async fn latest_result(&self) -> Option<HealthCheckResult> {
        self.latest.read().await.clone()
    }

    pub fn get_monitoring_configuration(&self) -> HealthMonitoringConfig {
        (*self.config.load_full()).clone()
    }

    /// Validate and atomically replace the configuration. An invalid
    /// configuration is rejected and the previous one stays active.
    pub async fn update_monitoring_configuration(
        &self,
        config: HealthMonitoringConfig,
    ) -> Result<()> {
        if let Err(e) = config.validate() {
            warn!("Rejected monitoring configuration update: {}", e);
            return Err(e);
        }

        let interval_seconds = config.interval_seconds;
        self.config.store(Arc::new(config));

        if let Some(handle) = self.scheduler.lock().await.as_ref() {
            if *handle.interval_tx.borrow() != interval_seconds {
                handle.interval_tx.send_replace(interval_seconds);
                self.statistics.write().await.interval_seconds = Some(interval_seconds);
            }
        }

        info!("Monitoring configuration updated");
        Ok(())
    }

    /// Alerts that the current registry state warrants, independent of
    /// `enable_alerting`. Nothing is sent to the alert sink.
    pub async fn generate_health_alerts(&self) -> Vec<String> {
        let config = self.config.load_full();
        let now = self.clock.now();
        let entries = self.registry.entries().await;
        let assessment = self.assess(&config, &entries, now, 0).await;

        Self::collect_alerts(&config, &assessment, &entries, now)
            .into_iter()
            .map(|alert| alert.message)
            .collect()
    }

    /// Attempt to heal externally supplied issues with the configured bounds
    pub async fn attempt_self_healing<I>(
        &self,
        issues: impl IntoIterator<Item = I>,
    ) -> SelfHealingResult
    where
        I: IntoHealthIssue,
    {
        let config = self.config.load_full();
        let policy = HealingPolicy::from_config(&config);
        let now = self.clock.now();
        let issues: Vec<HealthIssue> = issues
            .into_iter()
            .map(|issue| issue.into_health_issue(now))
            .collect();

        let result = self.healer.attempt_self_healing(issues, &policy).await;
        self.metrics
            .record_remediation(result.actions_attempted(), result.failed_attempts());
        *self.last_healing.write().await = Some(result.clone());
        result
    }

    /// Run a fresh cycle and wrap it as a report
    pub async fn generate_health_report(&self) -> SystemHealthReport {
        let start = Instant::now();
        let result = self.perform_health_check().await;

        let mut report = SystemHealthReport::from_check(&result, start.elapsed().as_millis() as u64);
        if report.last_self_healing.is_none() {
            report.last_self_healing = self.last_healing.read().await.clone();
        }
        report
    }

    /// Start periodic cycles. Calling this while running replaces the interval
    /// on the existing schedule rather than starting a second one.
    pub async fn start_scheduled_health_checks(self: &Arc<Self>, interval_seconds: u64) -> Result<()> {
        if interval_seconds == 0 {
            return Err(ResilienceError::invalid_config(
                "interval_seconds must be positive",
            ));
        }

        self.config.rcu(|current| {
            let mut config = HealthMonitoringConfig::clone(current);
            config.interval_seconds = interval_seconds;
            config
        });

        let mut scheduler = self.scheduler.lock().await;
        if let Some(handle) = scheduler.as_ref().filter(|h| !h.task.is_finished()) {
            if *handle.interval_tx.borrow() == interval_seconds {
                debug!(interval_seconds, "Scheduled health checks already running");
            } else {
                handle.interval_tx.send_replace(interval_seconds);
                info!(interval_seconds, "Replaced health check interval");
            }
            self.statistics.write().await.interval_seconds = Some(interval_seconds);
            return Ok(());
        }

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let (interval_tx, interval_rx) = watch::channel(interval_seconds);
        let task = tokio::spawn(Self::schedule_loop(
            Arc::downgrade(self),
            shutdown_rx,
            interval_rx,
            self.statistics.clone(),
        ));

        {
            let mut stats = self.statistics.write().await;
            stats.state = SchedulerState::Running;
            stats.interval_seconds = Some(interval_seconds);
            stats.started_at = Some(self.clock.now());
        }

        *scheduler = Some(SchedulerHandle {
            shutdown_tx,
            interval_tx,
            task,
        });
        info!(interval_seconds, "Scheduled health checks started");
        Ok(())
    }

    /// Cancel the next fire, then wait for an in-flight cycle to commit and for
    /// any detached healing run to finish
    pub async fn stop_scheduled_health_checks(&self) {
        let handle = self.scheduler.lock().await.take();

        match handle {
            Some(handle) => {
                let _ = handle.shutdown_tx.send(());
                if let Err(e) = handle.task.await {
                    error!("Health check scheduler task failed: {}", e);
                }

                {
                    let mut stats = self.statistics.write().await;
                    stats.state = SchedulerState::Stopped;
                    stats.interval_seconds = None;
                }
                info!("Scheduled health checks stopped");
            }
            None => debug!("Scheduled health checks not running"),
        }

        self.drain_detached_healing().await;
    }

    pub async fn is_running(&self) -> bool {
        self.scheduler
            .lock()
            .await
            .as_ref()
            .is_some_and(|h| !h.task.is_finished())
    }

    pub async fn scheduler_statistics(&self) -> SchedulerStatistics {
        self.statistics.read().await.clone()
    }

    async fn schedule_loop(
        monitor: Weak<Self>,
        mut shutdown_rx: broadcast::Receiver<()>,
        mut interval_rx: watch::Receiver<u64>,
        statistics: Arc<RwLock<SchedulerStatistics>>,
    ) {
        let mut period = Duration::from_secs(*interval_rx.borrow_and_update());
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.recv() => {
                    debug!("Health check scheduler received shutdown signal");
                    break;
                }
                changed = interval_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    period = Duration::from_secs(*interval_rx.borrow_and_update());
                    ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                }
                _ = ticker.tick() => {
                    let Some(monitor) = monitor.upgrade() else {
                        break;
                    };

                    let started = tokio::time::Instant::now();
                    let result = monitor.perform_health_check().await;
                    let elapsed = started.elapsed();
                    let missed = (elapsed.as_nanos() / period.as_nanos().max(1)) as u64;

                    {
                        let mut stats = statistics.write().await;
                        stats.total_cycles += 1;
                        stats.skipped_fires += missed;
                        stats.last_cycle_at = Some(result.check_timestamp);
                        stats.last_cycle_duration_ms = Some(elapsed.as_millis() as u64);
                    }

                    if missed > 0 {
                        warn!(
                            missed,
                            duration_ms = elapsed.as_millis() as u64,
                            "Health check cycle overran its interval, skipping missed fires"
                        );
                        monitor.metrics.skipped_fires_total.inc_by(missed);
                    }
                }
            }
        }

        statistics.write().await.state = SchedulerState::Stopped;
    }
}
