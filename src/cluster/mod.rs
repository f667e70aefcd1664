//! # Cluster API client traits
//!
//! Splits mutation capability into two least-privilege principals, per
//! §6: a workload principal that can only scale replicas and patch
//! resource limits, and a node principal that can only cordon/drain/
//! resize the node pool. Neither trait exposes read access to the
//! other's resources, and nothing in this crate ships a real wire
//! client — production callers implement these traits against their
//! own cluster API.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{NodeState, PodRef};

/// Mutations available to the replica/memory control path.
#[async_trait]
pub trait WorkloadApi: Send + Sync {
    /// Set a deployment's replica count. Idempotent: setting the same
    /// value twice succeeds without effect.
    async fn scale_replicas(&self, deployment: &str, target: u32) -> Result<()>;

    /// Patch a container's memory request/limit, in bytes.
    async fn patch_memory_limits(
        &self,
        deployment: &str,
        container: &str,
        request_bytes: u64,
        limit_bytes: u64,
    ) -> Result<()>;

    /// Current replica count, as last observed by the cluster API.
    async fn current_replicas(&self, deployment: &str) -> Result<u32>;

    /// Whether a ready pod for `container` currently reports `limit_bytes`
    /// as its effective memory limit. Used to confirm a memory patch has
    /// actually rolled out before marking remediation applied.
    async fn pod_observed_with_limit(&self, deployment: &str, container: &str, limit_bytes: u64) -> Result<bool>;
}

/// Mutations and reads available to the node lifecycle control path.
#[async_trait]
pub trait NodeApi: Send + Sync {
    /// List all nodes and their current readiness/schedulability.
    async fn list_nodes(&self) -> Result<Vec<NodeState>>;

    /// Mark a node unschedulable without evicting existing pods.
    async fn cordon(&self, node: &str) -> Result<()>;

    /// Mark a node schedulable again.
    async fn uncordon(&self, node: &str) -> Result<()>;

    /// Evict a single pod from a node, honoring the given grace period.
    async fn evict_pod(&self, node: &str, pod: &str, grace: std::time::Duration) -> Result<()>;

    /// Pods currently scheduled on a node, with ownership metadata.
    async fn pods_on_node(&self, node: &str) -> Result<Vec<PodRef>>;

    /// Remove a drained node from the pool entirely.
    async fn remove_node(&self, node: &str) -> Result<()>;

    /// Resize the node pool by `delta` (positive to add, negative to remove).
    async fn resize_pool(&self, delta: i32) -> Result<()>;
}

/// In-memory fakes used by integration tests and the bench harness.
/// Never compiled into the production binary's dependency graph beyond
/// `#[cfg(test)]`/dev-dependency usage.
pub mod fake {
    use super::*;
    use std::sync::Mutex;

    /// A fully in-memory `WorkloadApi` + `NodeApi` implementation backed
    /// by a handful of `Mutex`-guarded maps, for scenario tests.
    pub struct FakeCluster {
        replicas: Mutex<std::collections::HashMap<String, u32>>,
        nodes: Mutex<Vec<NodeState>>,
        pods: Mutex<std::collections::HashMap<String, Vec<PodRef>>>,
        pool_size: Mutex<i32>,
        /// Last memory limit patched per (deployment, container), simulating
        /// instant pod recreation onto the new limit once patched.
        patched_limits: Mutex<std::collections::HashMap<(String, String), u64>>,
    }

    impl FakeCluster {
        /// An empty fake cluster with no deployments, nodes, or pods.
        pub fn new() -> Self {
            Self {
                replicas: Mutex::new(std::collections::HashMap::new()),
                nodes: Mutex::new(Vec::new()),
                pods: Mutex::new(std::collections::HashMap::new()),
                pool_size: Mutex::new(0),
                patched_limits: Mutex::new(std::collections::HashMap::new()),
            }
        }

        /// Seed a deployment's starting replica count.
        pub fn with_replicas(self, deployment: &str, count: u32) -> Self {
            self.replicas.lock().unwrap().insert(deployment.to_string(), count);
            self
        }

        /// Seed the node list.
        pub fn with_nodes(self, nodes: Vec<NodeState>) -> Self {
            *self.nodes.lock().unwrap() = nodes;
            self
        }

        /// Seed pods scheduled on a node.
        pub fn with_pods(self, node: &str, pods: Vec<PodRef>) -> Self {
            self.pods.lock().unwrap().insert(node.to_string(), pods);
            self
        }
    }

    impl Default for FakeCluster {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl WorkloadApi for FakeCluster {
        async fn scale_replicas(&self, deployment: &str, target: u32) -> Result<()> {
            self.replicas.lock().unwrap().insert(deployment.to_string(), target);
            Ok(())
        }

        async fn patch_memory_limits(
            &self,
            deployment: &str,
            container: &str,
            _request_bytes: u64,
            limit_bytes: u64,
        ) -> Result<()> {
            self.patched_limits
                .lock()
                .unwrap()
                .insert((deployment.to_string(), container.to_string()), limit_bytes);
            Ok(())
        }

        async fn current_replicas(&self, deployment: &str) -> Result<u32> {
            Ok(*self.replicas.lock().unwrap().get(deployment).unwrap_or(&0))
        }

        async fn pod_observed_with_limit(&self, deployment: &str, container: &str, limit_bytes: u64) -> Result<bool> {
            let key = (deployment.to_string(), container.to_string());
            Ok(self.patched_limits.lock().unwrap().get(&key) == Some(&limit_bytes))
        }
    }

    #[async_trait]
    impl NodeApi for FakeCluster {
        async fn list_nodes(&self) -> Result<Vec<NodeState>> {
            Ok(self.nodes.lock().unwrap().clone())
        }

        async fn cordon(&self, node: &str) -> Result<()> {
            let mut nodes = self.nodes.lock().unwrap();
            if let Some(n) = nodes.iter_mut().find(|n| n.name == node) {
                n.schedulable = false;
                n.quarantined = true;
            }
            Ok(())
        }

        async fn uncordon(&self, node: &str) -> Result<()> {
            let mut nodes = self.nodes.lock().unwrap();
            if let Some(n) = nodes.iter_mut().find(|n| n.name == node) {
                n.schedulable = true;
                n.quarantined = false;
            }
            Ok(())
        }

        async fn evict_pod(&self, node: &str, pod: &str, _grace: std::time::Duration) -> Result<()> {
            let mut pods = self.pods.lock().unwrap();
            if let Some(list) = pods.get_mut(node) {
                list.retain(|p| p.name != pod);
            }
            Ok(())
        }

        async fn pods_on_node(&self, node: &str) -> Result<Vec<PodRef>> {
            Ok(self.pods.lock().unwrap().get(node).cloned().unwrap_or_default())
        }

        async fn remove_node(&self, node: &str) -> Result<()> {
            self.nodes.lock().unwrap().retain(|n| n.name != node);
            Ok(())
        }

        async fn resize_pool(&self, delta: i32) -> Result<()> {
            *self.pool_size.lock().unwrap() += delta;
            Ok(())
        }
    }
}
