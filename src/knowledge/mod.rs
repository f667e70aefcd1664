//! # Decision log and status surface
//!
//! A bounded, append-only record of every action the control plane has
//! taken, kept for introspection rather than as an input to future
//! decisions — Pulse's rules are stateless aside from the cooldown
//! ledger, unlike the success-rate feedback loop this module is
//! structurally descended from. Persistence is left pluggable behind
//! `DecisionSink`; the shipped implementation is in-memory only.

use std::collections::VecDeque;

use chrono::Utc;
use tracing::debug;

use crate::types::{BacklogState, Decision, DecisionKind, Severity};

/// Where decisions are durably recorded, if at all. The in-memory ring
/// buffer satisfies this trivially; a production deployment can back it
/// with whatever store it already operates.
pub trait DecisionSink: Send + Sync {
    /// Record one decision. Must not block the calling tick for long;
    /// implementations that need durability should buffer and flush
    /// asynchronously rather than make `record` itself slow.
    fn record(&mut self, decision: Decision);

    /// The most recent `limit` decisions, newest last.
    fn recent(&self, limit: usize) -> Vec<Decision>;
}

/// A fixed-capacity ring buffer of recent decisions.
pub struct DecisionLog {
    capacity: usize,
    entries: VecDeque<Decision>,
}

impl DecisionLog {
    /// Construct a log retaining at most `capacity` decisions.
    pub fn new(capacity: usize) -> Self {
        Self { capacity, entries: VecDeque::with_capacity(capacity) }
    }
}

impl DecisionSink for DecisionLog {
    fn record(&mut self, decision: Decision) {
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        debug!(kind = ?decision.kind, success = decision.success, "recorded decision");
        self.entries.push_back(decision);
    }

    fn recent(&self, limit: usize) -> Vec<Decision> {
        self.entries.iter().rev().take(limit).rev().cloned().collect()
    }
}

/// A point-in-time summary of control-plane state, suitable for a
/// status inspection surface without standing up an HTTP dashboard.
#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    /// When this snapshot was taken.
    pub ts: chrono::DateTime<Utc>,
    /// Replica count as of the last tick.
    pub current_replicas: u32,
    /// Last known backlog state.
    pub backlog: BacklogState,
    /// Fraction of nodes currently counted as lost.
    pub node_capacity_loss: f64,
    /// Most recent decisions, newest last.
    pub recent_decisions: Vec<Decision>,
}

/// Build a `Decision` for a hold tick, used when no rule fired.
pub fn hold_decision(current_replicas: u32) -> Decision {
    Decision {
        id: uuid::Uuid::new_v4(),
        ts: Utc::now(),
        kind: DecisionKind::Hold,
        from: current_replicas.to_string(),
        to: current_replicas.to_string(),
        reason: "no rule fired".to_string(),
        severity: Severity::Normal,
        success: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decision(kind: DecisionKind) -> Decision {
        Decision {
            id: uuid::Uuid::new_v4(),
            ts: Utc::now(),
            kind,
            from: "1".into(),
            to: "2".into(),
            reason: "test".into(),
            severity: Severity::Normal,
            success: true,
        }
    }

    #[test]
    fn ring_buffer_evicts_oldest_beyond_capacity() {
        let mut log = DecisionLog::new(2);
        log.record(decision(DecisionKind::Hold));
        log.record(decision(DecisionKind::ReplicaScaleUp));
        log.record(decision(DecisionKind::ReplicaScaleDown));

        let recent = log.recent(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].kind, DecisionKind::ReplicaScaleUp);
        assert_eq!(recent[1].kind, DecisionKind::ReplicaScaleDown);
    }

    #[test]
    fn recent_respects_limit_smaller_than_buffer() {
        let mut log = DecisionLog::new(10);
        for _ in 0..5 {
            log.record(decision(DecisionKind::Hold));
        }
        assert_eq!(log.recent(2).len(), 2);
    }
}
