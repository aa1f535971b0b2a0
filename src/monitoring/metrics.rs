use crate::error::Result;
use prometheus::{
    exponential_buckets, Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::error;

/// Prometheus metrics for the health monitor
pub struct MonitorMetrics {
    registry: Arc<Registry>,

    // Cycle metrics
    pub cycles_total: IntCounter,
    pub cycle_duration_seconds: Histogram,
    pub skipped_fires_total: IntCounter,

    // Probe metrics
    pub probe_duration_seconds: Histogram,
    pub probe_timeouts_total: IntCounter,
    pub unhealthy_components: IntGauge,

    // Self-healing metrics
    pub remediation_attempts_total: IntCounter,
    pub remediation_failures_total: IntCounter,
    pub healing_skipped_total: IntCounter,

    pub alerts_total: IntCounter,
}

impl MonitorMetrics {
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());

        let cycles_total = IntCounter::with_opts(Opts::new(
            "health_cycles_total",
            "Total number of completed health check cycles",
        ))?;
        registry.register(Box::new(cycles_total.clone()))?;

        let cycle_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "health_cycle_duration_seconds",
                "Duration of health check cycles in seconds",
            )
            .buckets(exponential_buckets(0.001, 2.0, 16)?),
        )?;
        registry.register(Box::new(cycle_duration_seconds.clone()))?;

        let skipped_fires_total = IntCounter::with_opts(Opts::new(
            "health_skipped_fires_total",
            "Scheduled fires skipped because a cycle overran its interval",
        ))?;
        registry.register(Box::new(skipped_fires_total.clone()))?;

        let probe_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "health_probe_duration_seconds",
                "Duration of individual health probes in seconds",
            )
            .buckets(exponential_buckets(0.001, 2.0, 16)?),
        )?;
        registry.register(Box::new(probe_duration_seconds.clone()))?;

        let probe_timeouts_total = IntCounter::with_opts(Opts::new(
            "health_probe_timeouts_total",
            "Total number of probes that exceeded their timeout",
        ))?;
        registry.register(Box::new(probe_timeouts_total.clone()))?;

        let unhealthy_components = IntGauge::with_opts(Opts::new(
            "health_unhealthy_components",
            "Components not healthy after the latest cycle",
        ))?;
        registry.register(Box::new(unhealthy_components.clone()))?;

        let remediation_attempts_total = IntCounter::with_opts(Opts::new(
            "health_remediation_attempts_total",
            "Total number of self-healing remediation attempts",
        ))?;
        registry.register(Box::new(remediation_attempts_total.clone()))?;

        let remediation_failures_total = IntCounter::with_opts(Opts::new(
            "health_remediation_failures_total",
            "Total number of failed or timed out remediation attempts",
        ))?;
        registry.register(Box::new(remediation_failures_total.clone()))?;

        let healing_skipped_total = IntCounter::with_opts(Opts::new(
            "health_healing_skipped_total",
            "Detached self-healing runs skipped because the previous run was still in progress",
        ))?;
        registry.register(Box::new(healing_skipped_total.clone()))?;

        let alerts_total = IntCounter::with_opts(Opts::new(
            "health_alerts_total",
            "Total number of alerts delivered to the alert sink",
        ))?;
        registry.register(Box::new(alerts_total.clone()))?;

        Ok(Self {
            registry,
            cycles_total,
            cycle_duration_seconds,
            skipped_fires_total,
            probe_duration_seconds,
            probe_timeouts_total,
            unhealthy_components,
            remediation_attempts_total,
            remediation_failures_total,
            healing_skipped_total,
            alerts_total,
        })
    }

    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    pub fn record_probe(&self, elapsed: Duration, timed_out: bool) {
        self.probe_duration_seconds.observe(elapsed.as_secs_f64());
        if timed_out {
            self.probe_timeouts_total.inc();
        }
    }

    pub fn record_cycle(&self, elapsed: Duration, unhealthy: usize) {
        self.cycles_total.inc();
        self.cycle_duration_seconds.observe(elapsed.as_secs_f64());
        self.unhealthy_components.set(unhealthy as i64);
    }

    pub fn record_remediation(&self, attempts: usize, failures: usize) {
        self.remediation_attempts_total.inc_by(attempts as u64);
        self.remediation_failures_total.inc_by(failures as u64);
    }

    /// Text exposition format
    pub fn gather_text(&self) -> String {
        use prometheus::TextEncoder;
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder
            .encode_to_string(&metric_families)
            .unwrap_or_else(|e| {
                error!("Failed to encode metrics: {}", e);
                String::new()
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_exposition() {
        let metrics = MonitorMetrics::new().unwrap();
        metrics.record_probe(Duration::from_millis(15), true);
        metrics.record_cycle(Duration::from_millis(40), 2);
        metrics.record_remediation(3, 1);

        assert_eq!(metrics.probe_timeouts_total.get(), 1);
        assert_eq!(metrics.remediation_failures_total.get(), 1);

        let text = metrics.gather_text();
        assert!(text.contains("health_cycles_total 1"));
        assert!(text.contains("health_unhealthy_components 2"));
        assert!(text.contains("health_remediation_attempts_total 3"));
    }
}
