//! # NodeMonitor — node readiness tracking and capacity-loss detection
//!
//! Polls the cluster API for node status on a fixed cadence, applies a
//! hysteresis grace period before counting a node against capacity, and
//! raises `CapacityDegraded`/`CapacityCritical` events the Orchestrator
//! uses to trigger an emergency node scale-up (§4.3).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};

use crate::config::NodeConfig;
use crate::types::NodeState;

/// Events raised by a poll, consumed by the Orchestrator to decide on
/// node-pool or quarantine action.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeEvent {
    /// A node that was ready is now observed not-ready past the grace period.
    NodeLost { name: String },
    /// A previously lost node has returned to ready.
    NodeRecovered { name: String },
    /// Capacity loss crossed above zero but below the critical threshold.
    CapacityDegraded { loss_fraction: f64 },
    /// Capacity loss crossed the critical threshold; emergency scale-up is warranted.
    CapacityCritical { loss_fraction: f64 },
}

/// Per-node hysteresis bookkeeping: we only count a node against capacity
/// once it has been continuously not-ready for `not_ready_grace`.
struct Tracked {
    state: NodeState,
    not_ready_since: Option<DateTime<Utc>>,
    counted_lost: bool,
}

/// Tracks cluster node readiness and derives a capacity-loss fraction.
pub struct NodeMonitor {
    config: NodeConfig,
    nodes: HashMap<String, Tracked>,
}

impl NodeMonitor {
    /// Construct a monitor with no known nodes.
    pub fn new(config: NodeConfig) -> Self {
        Self { config, nodes: HashMap::new() }
    }

    /// Reconcile against a freshly polled set of node states, returning
    /// the events this poll produced. Nodes absent from `observed` that
    /// were previously tracked are treated as removed and dropped
    /// silently — the cluster API is the source of truth for membership.
    #[instrument(skip(self, observed))]
    pub fn reconcile(&mut self, observed: Vec<NodeState>, now: DateTime<Utc>) -> Vec<NodeEvent> {
        let mut events = Vec::new();
        let mut seen = std::collections::HashSet::new();

        for node in observed {
            seen.insert(node.name.clone());
            let entry = self.nodes.entry(node.name.clone()).or_insert_with(|| Tracked {
                state: node.clone(),
                not_ready_since: None,
                counted_lost: false,
            });

            let mut node = node;
            if node.ready {
                if entry.counted_lost {
                    info!(node = %node.name, "node recovered");
                    events.push(NodeEvent::NodeRecovered { name: node.name.clone() });
                }
                entry.not_ready_since = None;
                entry.counted_lost = false;
                node.quarantined = false;
            } else {
                if entry.not_ready_since.is_none() {
                    entry.not_ready_since = Some(now);
                }
                let since = entry.not_ready_since.unwrap();
                let grace = chrono::Duration::from_std(self.config.not_ready_grace).unwrap_or_default();
                if !entry.counted_lost && now - since >= grace {
                    warn!(node = %node.name, "node lost past grace period");
                    entry.counted_lost = true;
                    node.quarantined = true;
                    events.push(NodeEvent::NodeLost { name: node.name.clone() });
                } else if entry.counted_lost {
                    node.quarantined = true;
                }
            }

            entry.state = node;
        }

        self.nodes.retain(|name, _| seen.contains(name));

        let total = self.nodes.len();
        let lost = self.nodes.values().filter(|t| t.counted_lost).count();
        let loss_fraction = if total > 0 { lost as f64 / total as f64 } else { 0.0 };

        if loss_fraction >= self.config.critical_capacity_loss {
            events.push(NodeEvent::CapacityCritical { loss_fraction });
        } else if loss_fraction > 0.0 {
            events.push(NodeEvent::CapacityDegraded { loss_fraction });
        }

        events
    }

    /// Current fraction of tracked nodes counted as lost.
    pub fn capacity_loss(&self) -> f64 {
        let total = self.nodes.len();
        if total == 0 {
            return 0.0;
        }
        self.lost_count() as f64 / total as f64
    }

    /// Current count of nodes counted as lost (past the not-ready grace).
    pub fn lost_count(&self) -> usize {
        self.nodes.values().filter(|t| t.counted_lost).count()
    }

    /// Names of nodes currently counted as lost.
    pub fn lost_node_names(&self) -> Vec<String> {
        self.nodes
            .values()
            .filter(|t| t.counted_lost)
            .map(|t| t.state.name.clone())
            .collect()
    }

    /// Whether `name` is currently quarantined (cordoned after being
    /// counted lost). Unknown nodes are reported as not quarantined.
    pub fn is_quarantined(&self, name: &str) -> bool {
        self.nodes.get(name).map_or(false, |t| t.state.quarantined)
    }

    /// Ready, schedulable, non-quarantined nodes eligible to receive
    /// evicted pods during a drain.
    pub fn eligible_drain_targets(&self, exclude: &str) -> Vec<String> {
        self.nodes
            .values()
            .filter(|t| t.state.name != exclude)
            .filter(|t| t.state.ready && t.state.schedulable && !t.state.quarantined)
            .map(|t| t.state.name.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str, ready: bool) -> NodeState {
        NodeState {
            name: name.to_string(),
            ready,
            schedulable: true,
            taints: vec![],
            last_transition_ts: Utc::now(),
            quarantined: false,
        }
    }

    #[test]
    fn node_not_lost_before_grace_period_elapses() {
        let mut monitor = NodeMonitor::new(NodeConfig {
            not_ready_grace: std::time::Duration::from_secs(60),
            ..NodeConfig::default()
        });
        let t0 = Utc::now();
        let events = monitor.reconcile(vec![node("n1", false)], t0);
        assert!(events.iter().all(|e| !matches!(e, NodeEvent::NodeLost { .. })));
    }

    #[test]
    fn node_lost_after_grace_period() {
        let mut monitor = NodeMonitor::new(NodeConfig {
            not_ready_grace: std::time::Duration::from_secs(60),
            ..NodeConfig::default()
        });
        let t0 = Utc::now();
        monitor.reconcile(vec![node("n1", false)], t0);
        let events = monitor.reconcile(vec![node("n1", false)], t0 + chrono::Duration::seconds(61));
        assert!(events.contains(&NodeEvent::NodeLost { name: "n1".into() }));
    }

    #[test]
    fn capacity_critical_when_loss_exceeds_threshold() {
        let mut monitor = NodeMonitor::new(NodeConfig {
            not_ready_grace: std::time::Duration::from_secs(0),
            critical_capacity_loss: 0.3,
            ..NodeConfig::default()
        });
        let t0 = Utc::now();
        let events = monitor.reconcile(
            vec![node("n1", false), node("n2", false), node("n3", true)],
            t0 + chrono::Duration::seconds(1),
        );
        assert!(events.iter().any(|e| matches!(e, NodeEvent::CapacityCritical { .. })));
    }

    #[test]
    fn recovered_node_clears_lost_status() {
        let mut monitor = NodeMonitor::new(NodeConfig {
            not_ready_grace: std::time::Duration::from_secs(0),
            ..NodeConfig::default()
        });
        let t0 = Utc::now();
        monitor.reconcile(vec![node("n1", false)], t0 + chrono::Duration::seconds(1));
        let events = monitor.reconcile(vec![node("n1", true)], t0 + chrono::Duration::seconds(2));
        assert!(events.contains(&NodeEvent::NodeRecovered { name: "n1".into() }));
    }

    #[test]
    fn a_node_lost_past_grace_is_quarantined_regardless_of_aggregate_loss() {
        let mut monitor = NodeMonitor::new(NodeConfig {
            not_ready_grace: std::time::Duration::from_secs(0),
            critical_capacity_loss: 0.9,
            ..NodeConfig::default()
        });
        let t0 = Utc::now();
        let events = monitor.reconcile(
            vec![node("n1", false), node("n2", true), node("n3", true), node("n4", true)],
            t0 + chrono::Duration::seconds(1),
        );
        assert!(events.contains(&NodeEvent::NodeLost { name: "n1".into() }));
        assert!(!events.iter().any(|e| matches!(e, NodeEvent::CapacityCritical { .. })));
        assert!(monitor.is_quarantined("n1"));
        assert!(!monitor.is_quarantined("n2"));
    }
}
