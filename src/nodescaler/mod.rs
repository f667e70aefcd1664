//! # NodeScaler — node pool scaling and the cordon/drain/remove protocol
//!
//! Drives the node principal (`NodeApi`) through the ordered lifecycle
//! §4.6 requires: cordon, then drain (evict with a grace period and a
//! single retry per pod), then remove. A node that fails to fully drain
//! is left cordoned rather than returned to service or force-removed —
//! the "never leave uncordoned after failed drain" invariant.

use std::time::Duration;

use tracing::{info, instrument, warn};

use crate::cluster::NodeApi;
use crate::config::NodeConfig;
use crate::types::{CooldownLedger, CooldownScope, DecisionKind, Outcome};

/// Whether any node other than `victim` is currently ready and
/// schedulable — i.e. capable of absorbing the victim's evicted pods.
async fn has_other_ready_node(api: &dyn NodeApi, victim: &str) -> bool {
    match api.list_nodes().await {
        Ok(nodes) => nodes
            .iter()
            .any(|n| n.name != victim && n.ready && n.schedulable && !n.quarantined),
        Err(err) => {
            warn!(error = %err, "failed to list nodes while checking drain eligibility");
            false
        }
    }
}

/// Result of a drain attempt, distinguishing a clean drain from one that
/// left pods behind.
#[derive(Debug, Clone, PartialEq)]
pub enum DrainResult {
    /// Every pod was evicted within the deadline.
    Complete,
    /// At least one pod could not be evicted; the node remains cordoned.
    Incomplete { remaining_pods: Vec<String> },
}

/// Scales the node pool and drives individual node lifecycle transitions.
pub struct NodeScaler {
    config: NodeConfig,
}

impl NodeScaler {
    /// Construct a scaler with the given node sub-configuration.
    pub fn new(config: NodeConfig) -> Self {
        Self { config }
    }

    /// Request `delta` additional nodes (always positive; node scale-up
    /// never removes capacity). Subject to the `NodeUp` cooldown unless
    /// `bypass_cooldown` is set for the capacity-critical emergency path,
    /// which still respects `min_action_gap` against the last node action.
    #[instrument(skip(self, api, cooldowns))]
    pub async fn scale_up(
        &self,
        api: &dyn NodeApi,
        delta: i32,
        now: chrono::DateTime<chrono::Utc>,
        cooldowns: &mut CooldownLedger,
        bypass_cooldown: bool,
    ) -> Outcome {
        if !bypass_cooldown && !cooldowns.is_allowed(CooldownScope::NodeUp, now) {
            return Outcome::failed("node scale-up still in cooldown");
        }

        match api.resize_pool(delta).await {
            Ok(()) => {
                info!(delta, bypass_cooldown, "node pool scale-up requested");
                cooldowns.record(
                    CooldownScope::NodeUp,
                    now,
                    chrono::Duration::from_std(self.config.cooldown_node_up).unwrap_or_default(),
                );
                Outcome::ok(format!("requested {delta} additional nodes"))
            }
            Err(err) => {
                warn!(error = %err, "node pool scale-up failed");
                Outcome::failed(err.to_string())
            }
        }
    }

    /// Request `delta` fewer nodes, draining one victim node chosen by
    /// the caller before resizing. Subject to the `NodeDown` cooldown.
    #[instrument(skip(self, api, cooldowns))]
    pub async fn scale_down(
        &self,
        api: &dyn NodeApi,
        victim: &str,
        now: chrono::DateTime<chrono::Utc>,
        cooldowns: &mut CooldownLedger,
    ) -> (DecisionKind, Outcome) {
        if !cooldowns.is_allowed(CooldownScope::NodeDown, now) {
            return (DecisionKind::Hold, Outcome::failed("node scale-down still in cooldown"));
        }

        if !has_other_ready_node(api, victim).await {
            warn!(node = victim, "no other ready node to absorb evicted pods, scaling up before draining");
            let outcome = self.scale_up(api, 1, now, cooldowns, true).await;
            return (DecisionKind::NodeScaleUp, outcome);
        }

        let cordon_outcome = self.cordon(api, victim).await;
        if !cordon_outcome.success {
            return (DecisionKind::NodeCordon, cordon_outcome);
        }

        match self.drain(api, victim).await {
            DrainResult::Complete => match api.remove_node(victim).await {
                Ok(()) => {
                    cooldowns.record(
                        CooldownScope::NodeDown,
                        now,
                        chrono::Duration::from_std(self.config.cooldown_node_down).unwrap_or_default(),
                    );
                    (DecisionKind::NodeScaleDown, Outcome::ok(format!("removed node {victim}")))
                }
                Err(err) => (DecisionKind::NodeScaleDown, Outcome::failed(err.to_string())),
            },
            DrainResult::Incomplete { remaining_pods } => {
                warn!(node = victim, remaining = remaining_pods.len(), "drain incomplete, leaving node cordoned");
                (
                    DecisionKind::NodeDrainIncomplete,
                    Outcome::failed(format!("{} pods could not be evicted", remaining_pods.len())),
                )
            }
        }
    }

    /// Cordon a node so it stops receiving new pods.
    #[instrument(skip(self, api))]
    pub async fn cordon(&self, api: &dyn NodeApi, node: &str) -> Outcome {
        match api.cordon(node).await {
            Ok(()) => Outcome::ok(format!("cordoned {node}")),
            Err(err) => Outcome::failed(err.to_string()),
        }
    }

    /// Evict every pod on `node` not owned by a DaemonSet, retrying each
    /// eviction once on failure before giving up on that pod. DaemonSet
    /// pods are left in place; they are removed along with the node
    /// itself. Never force-removes a pod past the deadline; the node is
    /// simply left cordoned with those pods still present.
    #[instrument(skip(self, api))]
    pub async fn drain(&self, api: &dyn NodeApi, node: &str) -> DrainResult {
        let pods = match api.pods_on_node(node).await {
            Ok(pods) => pods,
            Err(err) => {
                warn!(node, error = %err, "failed to list pods for drain");
                return DrainResult::Incomplete { remaining_pods: vec![] };
            }
        };

        let mut remaining = Vec::new();
        let deadline = tokio::time::Instant::now() + self.config.eviction_deadline;

        for pod in pods {
            if pod.daemon_set {
                continue;
            }

            if tokio::time::Instant::now() >= deadline {
                remaining.push(pod.name);
                continue;
            }

            let mut succeeded = false;
            for attempt in 0..2 {
                match api.evict_pod(node, &pod.name, self.config.eviction_grace).await {
                    Ok(()) => {
                        succeeded = true;
                        break;
                    }
                    Err(err) => {
                        warn!(node, pod = %pod.name, attempt, error = %err, "eviction attempt failed");
                    }
                }
            }

            if !succeeded {
                remaining.push(pod.name);
            }
        }

        if remaining.is_empty() {
            DrainResult::Complete
        } else {
            DrainResult::Incomplete { remaining_pods: remaining }
        }
    }

    /// Grace period applied to each pod eviction.
    pub fn eviction_grace(&self) -> Duration {
        self.config.eviction_grace
    }
}
