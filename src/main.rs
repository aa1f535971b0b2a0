use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use codex_resilience::monitoring::{
    format_status, CounterStoreProbe, HealthProbe, PostgresProbe, ReprobeRemediator,
    SystemMemoryProbe,
};
use codex_resilience::{Config, HealthMonitor, LogFormat, RateLimiter};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "codex-resilience")]
#[command(about = "Component health monitoring, self-healing and rate limiting")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one health check cycle and print the report
    Check {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run scheduled health checks until interrupted
    Run,
}

fn init_logging(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.log_level.clone().into());
    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn build_monitor(config: &Config, limiter: &RateLimiter) -> Result<Arc<HealthMonitor>> {
    let monitor = HealthMonitor::new(config.monitoring.clone())
        .context("Failed to create health monitor")?;

    let mut probes: Vec<Arc<dyn HealthProbe>> = vec![
        Arc::new(SystemMemoryProbe::new("memory")),
        Arc::new(CounterStoreProbe::new("rate-limit-store", limiter.store())),
    ];

    if let Some(url) = &config.database_url {
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(Duration::from_millis(config.monitoring.timeout_ms))
            .connect_lazy(url)
            .context("Invalid DATABASE_URL")?;
        probes.push(Arc::new(PostgresProbe::new("database", pool)));
    }

    let probe_timeout = config.monitoring.probe_timeout();
    for probe in probes {
        monitor
            .register_remediator(Arc::new(ReprobeRemediator::new(probe.clone(), probe_timeout)))
            .await;
        monitor.register_probe(probe).await;
    }

    Ok(Arc::new(monitor))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::from_env()?;
    config.validate()?;
    init_logging(&config);

    let limiter = Arc::new(RateLimiter::in_memory(config.rate_limit.failure_policy));
    let monitor = build_monitor(&config, &limiter).await?;

    match cli.command {
        Commands::Check { json } => {
            let report = monitor.generate_health_report().await;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", report.summary());
                println!("Overall: {}", report.overall_health_status);

                let mut names: Vec<&String> = report.component_health.keys().collect();
                names.sort();
                for name in names {
                    println!("  {}", format_status(&report.component_health[name]));
                }
                for issue in &report.health_issues {
                    println!("  - {}", issue.formatted());
                }
                for recommendation in &report.recommendations {
                    println!("  > {recommendation}");
                }
            }

            if !report.healthy {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Run => {
            monitor
                .start_scheduled_health_checks(config.monitoring.interval_seconds)
                .await?;
            let purge = limiter.start_purging(config.rate_limit.window());
            info!("Press Ctrl-C to stop");

            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for shutdown signal")?;

            info!("Shutdown signal received");
            monitor.stop_scheduled_health_checks().await;
            purge.abort();

            let stats = monitor.scheduler_statistics().await;
            info!(
                cycles = stats.total_cycles,
                skipped = stats.skipped_fires,
                "Health monitor stopped"
            );
            Ok(())
        }
    }
}
