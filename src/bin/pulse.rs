//! Pulse control-plane binary.

use std::sync::Arc;

use clap::Parser;
use pulse::cluster::fake::FakeCluster;
use pulse::{Collaborators, Config, Orchestrator};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Autoscaling control plane for a container-orchestrated cluster.
#[derive(Parser, Debug)]
#[command(name = "pulse", version = pulse::VERSION)]
struct Cli {
    /// Path to a configuration file (TOML/YAML/JSON, auto-detected by extension).
    #[arg(long, env = "PULSE_CONFIG_PATH")]
    config: Option<String>,

    /// Log output format.
    #[arg(long, value_enum, default_value = "pretty")]
    log_format: LogFormat,

    /// Deployment name this instance autoscales.
    #[arg(long, default_value = "default")]
    deployment: String,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Pretty => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
        LogFormat::Json => {
            tracing_subscriber::fmt().json().with_env_filter(filter).init();
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let config = match Config::load(cli.config.as_deref()) {
        Ok(cfg) => Arc::new(cfg),
        Err(err) => {
            error!(error = %err, "failed to load configuration");
            std::process::exit(1);
        }
    };

    info!(version = pulse::VERSION, deployment = %cli.deployment, "starting pulse");

    // Production wiring implements `WorkloadApi`/`NodeApi`/`BacklogSource`/
    // `OomSource` against the real cluster and broker; this binary ships
    // only the in-memory fake so it runs standalone.
    let cluster = Arc::new(FakeCluster::new().with_replicas(&cli.deployment, 1));
    let collaborators = Collaborators {
        workload_api: cluster.clone(),
        node_api: cluster.clone(),
        backlog_source: Arc::new(NoBacklog),
        oom_source: Arc::new(NoOom),
    };

    let mut orchestrator = Orchestrator::new(config.clone(), cli.deployment, 1, collaborators);

    let tick_interval = config.tick_interval;
    let mut interval = tokio::time::interval(tick_interval);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let decisions = orchestrator.tick().await;
                for decision in decisions {
                    info!(kind = ?decision.kind, success = decision.success, reason = %decision.reason, "tick decision");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received, finishing in-flight tick before exit");
                break;
            }
        }
    }
}

struct NoBacklog;

#[async_trait::async_trait]
impl pulse::backlog::BacklogSource for NoBacklog {
    async fn poll(&self) -> pulse::Result<(u64, f64)> {
        Ok((0, 0.0))
    }
}

struct NoOom;

#[async_trait::async_trait]
impl pulse::memory::OomSource for NoOom {
    async fn recent_oom_events(
        &self,
        _now: chrono::DateTime<chrono::Utc>,
        _lookback: std::time::Duration,
    ) -> pulse::Result<Vec<pulse::memory::OomSignal>> {
        Ok(vec![])
    }
}
