//! Control-plane configuration.
//!
//! All tunables live in a single immutable value constructed once at
//! startup (see §9 "Global state"). Loading hierarchy is env > file >
//! defaults, matching the precedence `knhk-config` uses for its own
//! layered configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{PulseError, Result};

/// Scoring weights and targets feeding the composite score (§4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Weight on normalized CPU.
    pub w_cpu: f64,
    /// Weight on normalized latency.
    pub w_lat: f64,
    /// Weight on normalized error rate.
    pub w_err: f64,
    /// Target CPU percent at which `norm(cpu, target) == 1`.
    pub cpu_target: f64,
    /// Target p95 latency (ms) at which `norm(latency, target) == 1`.
    pub latency_target_ms: f64,
    /// Target error rate percent at which `norm(err, target) == 1`.
    pub error_target_pct: f64,
    /// Score at or above which a scale-up is warranted.
    pub scale_up_score: f64,
    /// Score at or below which a scale-down is warranted.
    pub scale_down_score: f64,
    /// Score at or above which the critical bypass fires.
    pub critical_score: f64,
    /// Ratio of recent-window mean to baseline-window mean that constitutes a spike.
    pub spike_ratio: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            w_cpu: 0.4,
            w_lat: 0.4,
            w_err: 0.2,
            cpu_target: 70.0,
            latency_target_ms: 300.0,
            error_target_pct: 1.0,
            scale_up_score: 1.2,
            scale_down_score: 0.5,
            critical_score: 2.0,
            spike_ratio: 2.0,
        }
    }
}

/// Replica scaling bounds, steps, and cooldowns (§4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicaConfig {
    /// Minimum replicas ever targeted.
    pub min_replicas: u32,
    /// Maximum replicas ever targeted.
    pub max_replicas: u32,
    /// Step size for a composite scale-up.
    pub up_step: u32,
    /// Step size for a composite scale-down.
    pub down_step: u32,
    /// Multiplier applied to `current` on critical bypass.
    pub critical_factor: f64,
    /// Multiplier applied to `current` on spike response.
    pub spike_factor: f64,
    /// Cooldown after a successful scale-up.
    pub cooldown_replica_up: Duration,
    /// Cooldown after a successful scale-down.
    pub cooldown_replica_down: Duration,
    /// Cooldown on the critical bypass path.
    pub cooldown_critical: Duration,
    /// Backlog step size floor (actual step is `max(1, ceil(current * 0.25))`).
    pub backlog_step_min: u32,
    /// Oldest-message-age threshold (seconds) above which backlog pressure
    /// overrides the composite score.
    pub backlog_age_target_s: f64,
    /// Queue-size threshold above which backlog pressure overrides the
    /// composite score, independent of age or growth rate.
    pub backlog_size_threshold: u64,
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self {
            min_replicas: 1,
            max_replicas: 20,
            up_step: 2,
            down_step: 1,
            critical_factor: 2.0,
            spike_factor: 1.5,
            cooldown_replica_up: Duration::from_secs(180),
            cooldown_replica_down: Duration::from_secs(300),
            cooldown_critical: Duration::from_secs(30),
            backlog_step_min: 1,
            backlog_age_target_s: 60.0,
            backlog_size_threshold: 10_000,
        }
    }
}

/// Backlog polling thresholds (§4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BacklogConfig {
    /// How often to poll the monitoring API for queue state.
    pub backlog_interval: Duration,
    /// Queue size above which the backlog is pressuring.
    pub backlog_size_threshold: u64,
    /// Oldest-message age above which the backlog is pressuring.
    pub backlog_age_threshold_s: f64,
    /// Consecutive stale polls after which the state becomes `Unknown`.
    pub max_stale_intervals: u32,
}

impl Default for BacklogConfig {
    fn default() -> Self {
        Self {
            backlog_interval: Duration::from_secs(15),
            backlog_size_threshold: 10_000,
            backlog_age_threshold_s: 60.0,
            max_stale_intervals: 4,
        }
    }
}

/// Node health and node-pool scaling configuration (§4.3, §4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// How often `NodeMonitor` polls node status.
    pub node_poll_interval: Duration,
    /// How long a node must be observed not-ready before it counts toward capacity loss.
    pub not_ready_grace: Duration,
    /// Capacity-loss fraction above which `CapacityCritical` fires.
    pub critical_capacity_loss: f64,
    /// Cooldown after a successful node scale-up.
    pub cooldown_node_up: Duration,
    /// Cooldown after a successful node scale-down.
    pub cooldown_node_down: Duration,
    /// Minimum gap between node actions even on the emergency path.
    pub min_action_gap: Duration,
    /// Grace period given to each pod eviction during a drain.
    pub eviction_grace: Duration,
    /// Deadline for the whole drain-eviction phase.
    pub eviction_deadline: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_poll_interval: Duration::from_secs(10),
            not_ready_grace: Duration::from_secs(60),
            critical_capacity_loss: 0.30,
            cooldown_node_up: Duration::from_secs(300),
            cooldown_node_down: Duration::from_secs(600),
            min_action_gap: Duration::from_secs(60),
            eviction_grace: Duration::from_secs(30),
            eviction_deadline: Duration::from_secs(45),
        }
    }
}

/// Memory (OOM) remediation configuration (§4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// How far back to look for an `OOMKilled` termination reason.
    pub oom_lookback: Duration,
    /// Multiplier applied to the previous limit on remediation.
    pub memory_growth: f64,
    /// Hard cap on any patched memory limit, in bytes.
    pub memory_cap_bytes: u64,
    /// Maximum repeated OOM escalations before marking a deployment unsafe to optimize.
    pub max_oom_escalations: u32,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            oom_lookback: Duration::from_secs(600),
            memory_growth: 1.5,
            memory_cap_bytes: 4 * 1024 * 1024 * 1024,
            max_oom_escalations: 3,
        }
    }
}

/// Top-level, immutable control-plane configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Sliding-window duration for `MetricsWindow`.
    pub window_seconds: u64,
    /// Maximum samples retained regardless of age.
    pub max_samples: usize,
    /// Maximum out-of-order skew tolerated before a sample is rejected.
    pub sample_skew: Duration,
    /// How often the Orchestrator runs a decision tick.
    pub tick_interval: Duration,
    /// How many Decisions to retain for introspection.
    pub decision_retention: usize,
    /// Scoring sub-configuration.
    pub scoring: ScoringConfig,
    /// Replica controller sub-configuration.
    pub replica: ReplicaConfig,
    /// Backlog probe sub-configuration.
    pub backlog: BacklogConfig,
    /// Node monitor / node scaler sub-configuration.
    pub node: NodeConfig,
    /// Memory optimizer sub-configuration.
    pub memory: MemoryConfig,
    /// Default deadline for external calls not otherwise specified.
    pub external_call_deadline: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            window_seconds: 300,
            max_samples: 600,
            sample_skew: Duration::from_secs(2),
            tick_interval: Duration::from_secs(10),
            decision_retention: 500,
            scoring: ScoringConfig::default(),
            replica: ReplicaConfig::default(),
            backlog: BacklogConfig::default(),
            node: NodeConfig::default(),
            memory: MemoryConfig::default(),
            external_call_deadline: Duration::from_secs(5),
        }
    }
}

impl Config {
    /// Load configuration from an optional file, layered with `PULSE_`-prefixed
    /// environment variable overrides, falling back to defaults.
    ///
    /// Loading hierarchy: env > file > defaults.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&Config::default()).map_err(|e| {
                PulseError::Config(format!("failed to seed defaults: {e}"))
            })?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("PULSE")
                .separator("__")
                .try_parsing(true),
        );

        let raw = builder
            .build()
            .map_err(|e| PulseError::Config(format!("failed to assemble config: {e}")))?;

        let cfg: Config = raw
            .try_deserialize()
            .map_err(|e| PulseError::Config(format!("failed to deserialize config: {e}")))?;

        cfg.validate()?;
        Ok(cfg)
    }

    /// Validate invariants that aren't representable in the type system.
    pub fn validate(&self) -> Result<()> {
        let sum = self.scoring.w_cpu + self.scoring.w_lat + self.scoring.w_err;
        if (sum - 1.0).abs() > 1e-6 {
            return Err(PulseError::Config(format!(
                "scoring weights must sum to 1 (got {sum})"
            )));
        }

        if self.replica.min_replicas > self.replica.max_replicas {
            return Err(PulseError::Config(format!(
                "min_replicas ({}) exceeds max_replicas ({})",
                self.replica.min_replicas, self.replica.max_replicas
            )));
        }

        if self.scoring.scale_down_score >= self.scoring.scale_up_score {
            return Err(PulseError::Config(
                "scale_down_score must be below scale_up_score".to_string(),
            ));
        }

        if self.scoring.critical_score < self.scoring.scale_up_score {
            return Err(PulseError::Config(
                "critical_score must be at or above scale_up_score".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.node.critical_capacity_loss) {
            return Err(PulseError::Config(
                "critical_capacity_loss must be in [0, 1]".to_string(),
            ));
        }

        Ok(())
    }
}
