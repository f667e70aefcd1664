//! Core data model.
//!
//! These types map directly onto the data model in the specification:
//! `MetricSample`, `BacklogState`, `NodeState`, `ReplicaIntent`,
//! `CooldownLedger`, `Decision`, and `MemoryEvent`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Severity attached to a metric sample or a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    /// Business as usual.
    Normal,
    /// Notable deviation, not yet action-worthy on its own.
    Warning,
    /// Bypasses cooldowns via the critical path.
    Critical,
}

/// A single observation ingested from the message bus.
///
/// Samples are immutable: created on ingest, discarded when the window
/// evicts them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSample {
    /// When the sample was observed (bus-provided, defaulting to receive time).
    pub observed_at: DateTime<Utc>,
    /// CPU utilization percent (0..100+, can exceed 100 on multi-core saturation).
    pub cpu_pct: f64,
    /// p95 latency in milliseconds.
    pub latency_p95_ms: f64,
    /// p99 latency in milliseconds.
    pub latency_p99_ms: f64,
    /// Error rate percent.
    pub error_rate_pct: f64,
    /// Severity reported alongside the sample.
    pub severity: Severity,
    /// Free-form source tag (which publisher produced this sample).
    pub source: Option<String>,
}

/// Freshness of a snapshot produced by a monitoring collaborator.
///
/// Per the "no zero from unknown" invariant: a dependent signal that is
/// `Unknown` must never be treated as `0` by a decision rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Freshness {
    /// Value reflects the most recent successful poll.
    Fresh,
    /// Value is the last known good one; a poll failed but we're within budget.
    Stale,
    /// Too many consecutive poll failures; the value must not be trusted.
    Unknown,
}

/// Backlog (message-queue) state, refreshed at a fixed cadence by `BacklogProbe`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacklogState {
    /// Current queue depth.
    pub size: u64,
    /// Age in seconds of the oldest unprocessed message.
    pub oldest_age_s: f64,
    /// Growth rate of `size`, in items/second. `None` means "unknown", never zero.
    pub growth_rate_per_s: Option<f64>,
    /// Freshness of this snapshot.
    pub freshness: Freshness,
    /// Consecutive intervals the growth rate has been positive.
    pub consecutive_growth_intervals: u32,
}

impl BacklogState {
    /// An empty, unpolled backlog state.
    pub fn unknown() -> Self {
        Self {
            size: 0,
            oldest_age_s: 0.0,
            growth_rate_per_s: None,
            freshness: Freshness::Unknown,
            consecutive_growth_intervals: 0,
        }
    }

    /// Whether the backlog is "pressuring" per spec §4.2.
    pub fn is_pressuring(&self, size_threshold: u64, age_threshold_s: f64) -> bool {
        if self.freshness == Freshness::Unknown {
            return false;
        }
        self.size > size_threshold
            || self.oldest_age_s > age_threshold_s
            || self.consecutive_growth_intervals >= 2
    }
}

/// A pod scheduled on a node, with enough ownership metadata to decide
/// whether a drain should evict it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodRef {
    /// Pod name.
    pub name: String,
    /// Whether this pod is owned by a DaemonSet (never evicted by a drain;
    /// it is recreated on whichever node remains once this one is removed).
    pub daemon_set: bool,
}

/// Readiness/schedulability record for a single cluster node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeState {
    /// Node name.
    pub name: String,
    /// Whether the node's status conditions report Ready.
    pub ready: bool,
    /// Whether the node accepts new pods (`spec.unschedulable` and taints considered).
    pub schedulable: bool,
    /// Taint keys currently applied.
    pub taints: Vec<String>,
    /// When the node's readiness last changed.
    pub last_transition_ts: DateTime<Utc>,
    /// Whether NodeMonitor has quarantined this node (cordoned, excluded from scheduling).
    pub quarantined: bool,
}

/// A decision by `ReplicaController::decide` about the target replica count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicaIntent {
    /// Desired replica count.
    pub target_replicas: u32,
    /// Human-readable reason (surfaced in the Decision log and status endpoint).
    pub reason: String,
    /// When this intent was generated.
    pub generated_at: DateTime<Utc>,
    /// Severity driving the intent.
    pub severity: Severity,
}

/// A named cooldown scope tracked by the `CooldownLedger`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CooldownScope {
    /// Scaling replicas up.
    ReplicaUp,
    /// Scaling replicas down.
    ReplicaDown,
    /// Scaling the node pool up.
    NodeUp,
    /// Scaling the node pool down.
    NodeDown,
    /// The critical bypass path (still rate limited, just more permissive).
    Critical,
}

/// Tracks the earliest time each cooldown scope is next permitted to act.
///
/// Owned exclusively by the Orchestrator; this is the mechanism that
/// enforces "at most one replica action and one node action per tick"
/// and the monotonic-cooldown invariant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CooldownLedger {
    next_allowed: HashMap<CooldownScope, DateTime<Utc>>,
}

impl CooldownLedger {
    /// Create an empty ledger — every scope is immediately permitted.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `scope` may act at `now`.
    pub fn is_allowed(&self, scope: CooldownScope, now: DateTime<Utc>) -> bool {
        match self.next_allowed.get(&scope) {
            Some(next) => now >= *next,
            None => true,
        }
    }

    /// Record a successful action, pushing the scope's cooldown forward.
    pub fn record(&mut self, scope: CooldownScope, now: DateTime<Utc>, cooldown: chrono::Duration) {
        self.next_allowed.insert(scope, now + cooldown);
    }

    /// When `scope` will next be permitted, if ever restricted.
    pub fn next_allowed_at(&self, scope: CooldownScope) -> Option<DateTime<Utc>> {
        self.next_allowed.get(&scope).copied()
    }
}

/// The kind of autonomic action a `Decision` records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecisionKind {
    /// No action was taken this tick.
    Hold,
    /// Replica count was increased.
    ReplicaScaleUp,
    /// Replica count was decreased.
    ReplicaScaleDown,
    /// Node pool was increased.
    NodeScaleUp,
    /// Node pool was decreased.
    NodeScaleDown,
    /// A node was cordoned.
    NodeCordon,
    /// A node drain did not complete.
    NodeDrainIncomplete,
    /// A deployment's memory limits were patched upward.
    MemoryRemediation,
}

/// Append-only historical record of a control-plane action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    /// Unique identifier.
    pub id: Uuid,
    /// When the decision was recorded.
    pub ts: DateTime<Utc>,
    /// What kind of action this was.
    pub kind: DecisionKind,
    /// Previous state (e.g. replica count, node count).
    pub from: String,
    /// New state.
    pub to: String,
    /// Why this decision was made.
    pub reason: String,
    /// Severity that drove it.
    pub severity: Severity,
    /// Whether the mutation succeeded.
    pub success: bool,
}

/// Record of a detected and (attempted) remediated OOM event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEvent {
    /// Pod name.
    pub pod: String,
    /// Container name within the pod.
    pub container: String,
    /// When the OOM was observed.
    pub observed_ts: DateTime<Utc>,
    /// Memory limit before remediation, in bytes.
    pub previous_limit_bytes: u64,
    /// Memory limit after remediation, in bytes.
    pub new_limit_bytes: u64,
    /// Whether a ready pod has been observed with the new limit.
    pub applied: bool,
}

/// Outcome of an apply-style operation (C5/C6/C7), surfaced via the
/// Decision log and the status endpoint rather than as a raised error.
#[derive(Debug, Clone)]
pub struct Outcome {
    /// Whether the mutation succeeded.
    pub success: bool,
    /// Human-readable detail (error reason on failure).
    pub detail: String,
}

impl Outcome {
    /// Construct a successful outcome.
    pub fn ok(detail: impl Into<String>) -> Self {
        Self { success: true, detail: detail.into() }
    }

    /// Construct a failed outcome.
    pub fn failed(detail: impl Into<String>) -> Self {
        Self { success: false, detail: detail.into() }
    }
}
