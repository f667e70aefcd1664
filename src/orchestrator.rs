//! # Orchestrator — the control-plane tick
//!
//! Ties every component together into the single tick described in
//! §4.8: ingest, refresh backlog/node state, scan for OOM events, score,
//! decide and apply a replica intent, consider a node action, then
//! append the tick's decisions to the log. Ordering invariants (a pod
//! scale-up always precedes any node scale-up in the same tick; a node
//! scale-down waits a full tick after a replica change) are enforced
//! here, not in the individual components.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument, warn};

use crate::backlog::{BacklogProbe, BacklogSource};
use crate::bus::BusSubscriber;
use crate::cluster::{NodeApi, WorkloadApi};
use crate::config::Config;
use crate::error::Result;
use crate::hooks::{HookContext, HookPoint, HookRegistry};
use crate::knowledge::{hold_decision, DecisionLog, DecisionSink, StatusSnapshot};
use crate::memory::{MemoryOptimizer, OomSource, RemediationOutcome};
use crate::metrics::MetricsWindow;
use crate::nodes::{NodeEvent, NodeMonitor};
use crate::nodescaler::NodeScaler;
use crate::replica::{DecisionContext, ReplicaController};
use crate::scorer;
use crate::types::{CooldownLedger, CooldownScope, Decision, DecisionKind, MetricSample, Severity};

/// Everything the Orchestrator needs beyond its own sub-components,
/// supplied once at construction.
pub struct Collaborators {
    /// Workload principal: replica scaling and memory patches.
    pub workload_api: Arc<dyn WorkloadApi>,
    /// Node principal: cordon/drain/resize/list.
    pub node_api: Arc<dyn NodeApi>,
    /// Queue-depth source for the backlog probe.
    pub backlog_source: Arc<dyn BacklogSource>,
    /// OOM event source for the memory optimizer.
    pub oom_source: Arc<dyn OomSource>,
}

/// Drives one deployment's full autoscaling loop.
pub struct Orchestrator {
    config: Arc<Config>,
    deployment: String,
    collaborators: Collaborators,

    metrics: MetricsWindow,
    bus: BusSubscriber,
    backlog: BacklogProbe,
    nodes: NodeMonitor,

    replica_controller: ReplicaController,
    node_scaler: NodeScaler,
    memory_optimizer: MemoryOptimizer,

    cooldowns: CooldownLedger,
    decisions: DecisionLog,
    hooks: HookRegistry,

    current_replicas: u32,
    tick_number: AtomicU64,
    last_replica_change_tick: Option<u64>,
}

impl Orchestrator {
    /// Construct an Orchestrator for `deployment`, starting from
    /// `initial_replicas` (typically read from the cluster at startup).
    pub fn new(
        config: Arc<Config>,
        deployment: impl Into<String>,
        initial_replicas: u32,
        collaborators: Collaborators,
    ) -> Self {
        Self {
            metrics: MetricsWindow::new(
                std::time::Duration::from_secs(config.window_seconds),
                config.max_samples,
                config.sample_skew,
            ),
            bus: BusSubscriber::new(),
            backlog: BacklogProbe::new(config.backlog.clone()),
            nodes: NodeMonitor::new(config.node.clone()),
            replica_controller: ReplicaController::new(),
            node_scaler: NodeScaler::new(config.node.clone()),
            memory_optimizer: MemoryOptimizer::new(config.memory.clone()),
            cooldowns: CooldownLedger::new(),
            decisions: DecisionLog::new(config.decision_retention),
            hooks: HookRegistry::new(),
            deployment: deployment.into(),
            current_replicas: initial_replicas,
            tick_number: AtomicU64::new(0),
            last_replica_change_tick: None,
            config,
            collaborators,
        }
    }

    /// Register a hook, visible to every future tick.
    pub fn register_hook<F, Fut>(&mut self, point: HookPoint, f: F)
    where
        F: Fn(HookContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        self.hooks.register(point, f);
    }

    /// Feed a raw bus payload into the metrics window. Malformed
    /// payloads are counted by the `BusSubscriber` and otherwise ignored.
    pub fn ingest_raw(&mut self, payload: &[u8]) {
        if let Some(sample) = self.bus.ingest(payload) {
            self.ingest_sample(sample);
        }
    }

    /// Feed an already-parsed sample directly into the metrics window,
    /// logging (not failing the tick) if it's rejected as stale.
    pub fn ingest_sample(&mut self, sample: MetricSample) {
        if let Err(err) = self.metrics.insert(sample) {
            warn!(error = %err, "dropped sample");
        }
    }

    /// Run one full tick: refresh, score, decide, apply, record.
    #[instrument(skip(self))]
    pub async fn tick(&mut self) -> Vec<Decision> {
        let now = Utc::now();
        let tick_number = self.tick_number.fetch_add(1, Ordering::SeqCst);

        self.hooks.run(HookPoint::PreTick, HookContext::new()).await;

        self.hooks.run(HookPoint::PreMonitor, HookContext::new()).await;
        self.metrics.trim(now);
        self.backlog.tick(self.collaborators.backlog_source.as_ref()).await;
        let node_events = self.refresh_nodes(now).await;
        self.hooks.run(HookPoint::PostMonitor, HookContext::new()).await;

        let mut decisions = Vec::new();

        decisions.extend(self.scan_memory(now).await);

        self.hooks.run(HookPoint::PreDecide, HookContext::new()).await;
        let stats = self.metrics.snapshot();
        let backlog_state = self.backlog.snapshot();
        let score = scorer::score(&stats, &self.config.scoring);

        let replica_decision = {
            let ctx = DecisionContext {
                stats: &stats,
                score,
                severity: stats.current_severity,
                backlog: &backlog_state,
                current_replicas: self.current_replicas,
                now,
                cooldowns: &self.cooldowns,
                cfg: &self.config.replica,
                scoring_cfg: &self.config.scoring,
            };
            self.replica_controller.decide(&ctx)
        };
        self.hooks.run(HookPoint::PostDecide, HookContext::new()).await;

        match replica_decision {
            Some(intent) => {
                self.hooks.run(HookPoint::PreExecute, HookContext::new()).await;
                let from = self.current_replicas;
                let outcome = self
                    .replica_controller
                    .apply(self.collaborators.workload_api.as_ref(), &self.deployment, &intent)
                    .await;
                self.hooks.run(HookPoint::PostExecute, HookContext::new()).await;

                let kind = if intent.target_replicas > from {
                    DecisionKind::ReplicaScaleUp
                } else {
                    DecisionKind::ReplicaScaleDown
                };

                if outcome.success {
                    let scope = if kind == DecisionKind::ReplicaScaleUp {
                        CooldownScope::ReplicaUp
                    } else {
                        CooldownScope::ReplicaDown
                    };
                    let cooldown = if intent.severity == Severity::Critical {
                        self.cooldowns.record(
                            CooldownScope::Critical,
                            now,
                            chrono::Duration::from_std(self.config.replica.cooldown_critical).unwrap_or_default(),
                        );
                        self.config.replica.cooldown_critical
                    } else if kind == DecisionKind::ReplicaScaleUp {
                        self.config.replica.cooldown_replica_up
                    } else {
                        self.config.replica.cooldown_replica_down
                    };
                    self.cooldowns
                        .record(scope, now, chrono::Duration::from_std(cooldown).unwrap_or_default());

                    self.current_replicas = intent.target_replicas;
                    self.last_replica_change_tick = Some(tick_number);
                    info!(from, to = intent.target_replicas, "replica count changed");
                }

                decisions.push(Decision {
                    id: uuid::Uuid::new_v4(),
                    ts: now,
                    kind,
                    from: from.to_string(),
                    to: intent.target_replicas.to_string(),
                    reason: intent.reason,
                    severity: intent.severity,
                    success: outcome.success,
                });
            }
            None => decisions.push(hold_decision(self.current_replicas)),
        }

        decisions.extend(
            self.consider_node_action(node_events, tick_number, now)
                .await,
        );

        for decision in &decisions {
            self.decisions.record(decision.clone());
        }

        self.hooks.run(HookPoint::PostTick, HookContext::new()).await;
        decisions
    }

    async fn refresh_nodes(&mut self, now: chrono::DateTime<Utc>) -> Vec<NodeEvent> {
        match self.collaborators.node_api.list_nodes().await {
            Ok(observed) => self.nodes.reconcile(observed, now),
            Err(err) => {
                warn!(error = %err, "failed to list nodes");
                Vec::new()
            }
        }
    }

    async fn scan_memory(&mut self, now: chrono::DateTime<Utc>) -> Vec<Decision> {
        let outcomes = self
            .memory_optimizer
            .tick(
                self.collaborators.oom_source.as_ref(),
                self.collaborators.workload_api.as_ref(),
                &self.deployment,
                now,
            )
            .await;

        outcomes
            .into_iter()
            .map(|outcome| match outcome {
                RemediationOutcome::Applied(event) => Decision {
                    id: uuid::Uuid::new_v4(),
                    ts: now,
                    kind: DecisionKind::MemoryRemediation,
                    from: event.previous_limit_bytes.to_string(),
                    to: event.new_limit_bytes.to_string(),
                    reason: format!(
                        "OOM remediation for {}/{}{}",
                        event.pod,
                        event.container,
                        if event.applied { "" } else { " (limit patched, not yet observed on a ready pod)" }
                    ),
                    severity: Severity::Warning,
                    success: event.applied,
                },
                RemediationOutcome::UnsafeToOptimize { pod, container, escalations } => Decision {
                    id: uuid::Uuid::new_v4(),
                    ts: now,
                    kind: DecisionKind::MemoryRemediation,
                    from: escalations.to_string(),
                    to: escalations.to_string(),
                    reason: format!("{pod}/{container} unsafe to optimize after {escalations} escalations"),
                    severity: Severity::Critical,
                    success: false,
                },
            })
            .collect()
    }

    /// Decide on a node-pool action, honoring the "pod scale-up always
    /// precedes node scale-up" and "node scale-down waits a full tick
    /// after a replica change" ordering invariants. Every `NodeLost`
    /// transition is quarantined (cordoned) on the spot, independent of
    /// the aggregate capacity-loss severity this poll produced. Emergency
    /// path: if capacity is critical, a node scale-up fires even though a
    /// replica scale-up was already decided this tick (it's the replica
    /// decision itself that takes priority in *application order*, not in
    /// eligibility).
    async fn consider_node_action(
        &mut self,
        node_events: Vec<NodeEvent>,
        tick_number: u64,
        now: chrono::DateTime<Utc>,
    ) -> Vec<Decision> {
        let mut decisions = Vec::new();

        for event in &node_events {
            if let NodeEvent::NodeLost { name } = event {
                let outcome = self.node_scaler.cordon(self.collaborators.node_api.as_ref(), name).await;
                warn!(node = %name, success = outcome.success, "quarantining lost node");
                decisions.push(Decision {
                    id: uuid::Uuid::new_v4(),
                    ts: now,
                    kind: DecisionKind::NodeCordon,
                    from: name.clone(),
                    to: name.clone(),
                    reason: "node lost past grace period, quarantined".into(),
                    severity: Severity::Warning,
                    success: outcome.success,
                });
            }
        }

        let critical = node_events
            .iter()
            .any(|e| matches!(e, NodeEvent::CapacityCritical { .. }));
        let degraded = node_events
            .iter()
            .any(|e| matches!(e, NodeEvent::CapacityDegraded { .. }));

        if critical {
            let delta = self.nodes.lost_count().max(1) as i32;
            let outcome = self
                .node_scaler
                .scale_up(self.collaborators.node_api.as_ref(), delta, now, &mut self.cooldowns, true)
                .await;
            decisions.push(Decision {
                id: uuid::Uuid::new_v4(),
                ts: now,
                kind: DecisionKind::NodeScaleUp,
                from: "n/a".into(),
                to: format!("+{delta}"),
                reason: "capacity loss at or above critical threshold".into(),
                severity: Severity::Critical,
                success: outcome.success,
            });
        } else if degraded {
            let replica_settled = self.last_replica_change_tick.map_or(true, |t| tick_number > t);
            tracing::debug!(replica_settled, "capacity degraded but below critical threshold, holding");
        } else {
            // No pressure signal at all. Node scale-down candidate
            // selection is intentionally left to an operator-supplied
            // policy (see design notes); Pulse never initiates a
            // speculative node scale-down on its own.
            let _ = self.cooldowns.is_allowed(CooldownScope::NodeDown, now);
        }

        decisions
    }

    /// A point-in-time summary suitable for an introspection surface.
    pub fn status(&self) -> StatusSnapshot {
        StatusSnapshot {
            ts: Utc::now(),
            current_replicas: self.current_replicas,
            backlog: self.backlog.snapshot(),
            node_capacity_loss: self.nodes.capacity_loss(),
            recent_decisions: self.decisions.recent(50),
        }
    }
}
