//! # MemoryOptimizer — OOM detection and memory-limit remediation
//!
//! Watches for `OOMKilled` terminations within a lookback window and
//! patches the offending container's memory request/limit upward,
//! proportionally, through the workload principal. Escalates a bounded
//! number of times before giving up and flagging the deployment
//! `UnsafeToOptimize` rather than growing limits without bound (§4.7).

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};

use crate::cluster::WorkloadApi;
use crate::config::MemoryConfig;
use crate::error::Result;
use crate::types::MemoryEvent;

/// A single observed OOM termination, as reported by the cluster API.
#[derive(Debug, Clone)]
pub struct OomSignal {
    /// Pod name.
    pub pod: String,
    /// Container name within the pod.
    pub container: String,
    /// When the termination was observed.
    pub observed_ts: DateTime<Utc>,
    /// The memory limit in effect at the time of the kill, in bytes.
    pub previous_limit_bytes: u64,
    /// The memory request in effect at the time of the kill, in bytes.
    pub previous_request_bytes: u64,
    /// Lowest reasonable memory request, used as a floor for scaling.
    pub request_floor_bytes: u64,
}

/// Source of OOM signals; production callers implement this against the
/// cluster's event stream or container runtime interface.
#[async_trait]
pub trait OomSource: Send + Sync {
    /// OOM signals observed within `lookback` of `now`.
    async fn recent_oom_events(&self, now: DateTime<Utc>, lookback: std::time::Duration) -> Result<Vec<OomSignal>>;
}

/// Outcome of a remediation decision for a single container.
#[derive(Debug, Clone, PartialEq)]
pub enum RemediationOutcome {
    /// A new, larger limit was computed and applied.
    Applied(MemoryEvent),
    /// The container has escalated past `max_oom_escalations`; no further
    /// action will be taken automatically.
    UnsafeToOptimize { pod: String, container: String, escalations: u32 },
}

/// Tracks per-container escalation counts and drives remediation.
pub struct MemoryOptimizer {
    config: MemoryConfig,
    escalations: HashMap<(String, String), u32>,
}

impl MemoryOptimizer {
    /// Construct an optimizer with no prior escalation history.
    pub fn new(config: MemoryConfig) -> Self {
        Self { config, escalations: HashMap::new() }
    }

    /// Poll `source` for recent OOM events and apply remediation through
    /// `api` for each one, returning the outcome of each decision.
    #[instrument(skip(self, source, api))]
    pub async fn tick(
        &mut self,
        source: &dyn OomSource,
        api: &dyn WorkloadApi,
        deployment: &str,
        now: DateTime<Utc>,
    ) -> Vec<RemediationOutcome> {
        let events = match source.recent_oom_events(now, self.config.oom_lookback).await {
            Ok(events) => events,
            Err(err) => {
                warn!(error = %err, "failed to fetch OOM events");
                return Vec::new();
            }
        };

        let mut outcomes = Vec::new();
        for event in events {
            outcomes.push(self.remediate(api, deployment, &event).await);
        }
        outcomes
    }

    /// Compute and apply (or refuse) remediation for a single OOM signal.
    async fn remediate(
        &mut self,
        api: &dyn WorkloadApi,
        deployment: &str,
        signal: &OomSignal,
    ) -> RemediationOutcome {
        let key = (signal.pod.clone(), signal.container.clone());
        let escalations = self.escalations.entry(key.clone()).or_insert(0);

        if *escalations >= self.config.max_oom_escalations {
            warn!(pod = %signal.pod, container = %signal.container, "memory escalation cap reached");
            return RemediationOutcome::UnsafeToOptimize {
                pod: signal.pod.clone(),
                container: signal.container.clone(),
                escalations: *escalations,
            };
        }

        let grown = (signal.previous_limit_bytes as f64 * self.config.memory_growth).ceil() as u64;
        let new_limit_bytes = grown.min(self.config.memory_cap_bytes);

        let previous_ratio = if signal.previous_limit_bytes > 0 {
            signal.previous_request_bytes as f64 / signal.previous_limit_bytes as f64
        } else {
            0.5
        };
        let new_request_bytes =
            ((new_limit_bytes as f64 * previous_ratio).ceil() as u64).max(signal.request_floor_bytes);

        match api
            .patch_memory_limits(deployment, &signal.container, new_request_bytes, new_limit_bytes)
            .await
        {
            Ok(()) => {
                *escalations += 1;
                let applied = api
                    .pod_observed_with_limit(deployment, &signal.container, new_limit_bytes)
                    .await
                    .unwrap_or(false);
                if applied {
                    info!(
                        pod = %signal.pod,
                        container = %signal.container,
                        new_limit_bytes,
                        "applied memory remediation, confirmed on a ready pod"
                    );
                } else {
                    warn!(
                        pod = %signal.pod,
                        container = %signal.container,
                        new_limit_bytes,
                        "memory limit patched but not yet observed on a ready pod"
                    );
                }
                RemediationOutcome::Applied(MemoryEvent {
                    pod: signal.pod.clone(),
                    container: signal.container.clone(),
                    observed_ts: signal.observed_ts,
                    previous_limit_bytes: signal.previous_limit_bytes,
                    new_limit_bytes,
                    applied,
                })
            }
            Err(err) => {
                warn!(pod = %signal.pod, error = %err, "memory remediation failed to apply");
                RemediationOutcome::UnsafeToOptimize {
                    pod: signal.pod.clone(),
                    container: signal.container.clone(),
                    escalations: *escalations,
                }
            }
        }
    }
}
