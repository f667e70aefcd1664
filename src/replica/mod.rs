//! # ReplicaController — replica scaling decisions and application
//!
//! An ordered list of rule objects, each given a chance to produce an
//! intent before the next is consulted (§4.5, §9 design note). The first
//! rule to fire wins; if none fire, the controller holds. Applying an
//! intent goes through the workload principal's `WorkloadApi` with a
//! bounded retry/backoff schedule.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};

use crate::cluster::WorkloadApi;
use crate::config::{ReplicaConfig, ScoringConfig};
use crate::error::PulseError;
use crate::metrics::Stats;
use crate::scorer::{self, Score};
use crate::types::{BacklogState, CooldownLedger, CooldownScope, Outcome, ReplicaIntent, Severity};

/// Everything a rule needs to decide whether to fire, gathered once per
/// tick by the Orchestrator.
pub struct DecisionContext<'a> {
    /// Latest metrics snapshot.
    pub stats: &'a Stats,
    /// Composite score computed from `stats`.
    pub score: Score,
    /// Severity carried by the most recently ingested sample.
    pub severity: Severity,
    /// Latest backlog snapshot.
    pub backlog: &'a BacklogState,
    /// Replica count observed at the start of this tick.
    pub current_replicas: u32,
    /// Tick timestamp.
    pub now: DateTime<Utc>,
    /// Cooldown ledger, read-only from a rule's perspective.
    pub cooldowns: &'a CooldownLedger,
    /// Replica sub-configuration.
    pub cfg: &'a ReplicaConfig,
    /// Scoring sub-configuration.
    pub scoring_cfg: &'a ScoringConfig,
}

/// A single ordered decision rule.
trait Rule: Send + Sync {
    fn evaluate(&self, ctx: &DecisionContext) -> Option<ReplicaIntent>;
}

fn clamp_target(target: u32, cfg: &ReplicaConfig) -> u32 {
    target.clamp(cfg.min_replicas, cfg.max_replicas)
}

/// Fires when the sample stream is tagged `severity=Critical` or the
/// composite score is at or above `critical_score`, bypassing the
/// ordinary cooldown in favor of the (shorter) critical cooldown.
struct CriticalBypassRule;
impl Rule for CriticalBypassRule {
    fn evaluate(&self, ctx: &DecisionContext) -> Option<ReplicaIntent> {
        let tagged_critical = ctx.severity == Severity::Critical;
        if !tagged_critical && ctx.score.composite < ctx.scoring_cfg.critical_score {
            return None;
        }
        if !ctx.cooldowns.is_allowed(CooldownScope::Critical, ctx.now) {
            return None;
        }

        let target = clamp_target(
            (ctx.current_replicas as f64 * ctx.cfg.critical_factor).ceil() as u32,
            ctx.cfg,
        );
        if target <= ctx.current_replicas {
            return None;
        }

        let reason = if tagged_critical {
            format!("critical bypass: sample tagged critical (composite score {:.2})", ctx.score.composite)
        } else {
            format!("critical bypass: composite score {:.2}", ctx.score.composite)
        };

        Some(ReplicaIntent {
            target_replicas: target,
            reason,
            generated_at: ctx.now,
            severity: Severity::Critical,
        })
    }
}

/// Fires when the backlog is pressuring, overriding the composite score
/// entirely — a deep queue demands capacity even if CPU/latency look fine.
struct BacklogOverrideRule;
impl Rule for BacklogOverrideRule {
    fn evaluate(&self, ctx: &DecisionContext) -> Option<ReplicaIntent> {
        if !ctx
            .backlog
            .is_pressuring(ctx.cfg.backlog_size_threshold, ctx.cfg.backlog_age_target_s)
        {
            return None;
        }
        if !ctx.cooldowns.is_allowed(CooldownScope::ReplicaUp, ctx.now) {
            return None;
        }

        let step = ctx
            .cfg
            .backlog_step_min
            .max((ctx.current_replicas as f64 * 0.25).ceil() as u32);
        let target = clamp_target(ctx.current_replicas + step, ctx.cfg);
        if target <= ctx.current_replicas {
            return None;
        }

        Some(ReplicaIntent {
            target_replicas: target,
            reason: format!(
                "backlog pressure: size={} oldest_age_s={:.1}",
                ctx.backlog.size, ctx.backlog.oldest_age_s
            ),
            generated_at: ctx.now,
            severity: Severity::Warning,
        })
    }
}

/// Fires on a short-lived CPU spike relative to baseline, ahead of the
/// composite rules that average over the whole window. Behaves like the
/// critical bypass rule: it is gated on the critical cooldown rather
/// than the ordinary replica-up cooldown, so an active scale-up cooldown
/// never suppresses a genuine spike response.
struct SpikeResponseRule;
impl Rule for SpikeResponseRule {
    fn evaluate(&self, ctx: &DecisionContext) -> Option<ReplicaIntent> {
        if !scorer::is_spike(ctx.stats, ctx.scoring_cfg) {
            return None;
        }
        if !ctx.cooldowns.is_allowed(CooldownScope::Critical, ctx.now) {
            return None;
        }

        let target = clamp_target(
            (ctx.current_replicas as f64 * ctx.cfg.spike_factor).ceil() as u32,
            ctx.cfg,
        );
        if target <= ctx.current_replicas {
            return None;
        }

        Some(ReplicaIntent {
            target_replicas: target,
            reason: "recent CPU spike relative to baseline".to_string(),
            generated_at: ctx.now,
            severity: Severity::Critical,
        })
    }
}

/// Ordinary scale-up when the composite score sits above `scale_up_score`.
struct CompositeUpRule;
impl Rule for CompositeUpRule {
    fn evaluate(&self, ctx: &DecisionContext) -> Option<ReplicaIntent> {
        if ctx.score.composite < ctx.scoring_cfg.scale_up_score {
            return None;
        }
        if !ctx.cooldowns.is_allowed(CooldownScope::ReplicaUp, ctx.now) {
            return None;
        }

        let target = clamp_target(ctx.current_replicas + ctx.cfg.up_step, ctx.cfg);
        if target <= ctx.current_replicas {
            return None;
        }

        Some(ReplicaIntent {
            target_replicas: target,
            reason: format!("composite score {:.2} above scale-up threshold", ctx.score.composite),
            generated_at: ctx.now,
            severity: Severity::Normal,
        })
    }
}

/// Ordinary scale-down when the composite score sits at or below
/// `scale_down_score` and the backlog isn't pressuring.
struct CompositeDownRule;
impl Rule for CompositeDownRule {
    fn evaluate(&self, ctx: &DecisionContext) -> Option<ReplicaIntent> {
        if ctx.score.composite > ctx.scoring_cfg.scale_down_score {
            return None;
        }
        if ctx.backlog.is_pressuring(ctx.cfg.backlog_size_threshold, ctx.cfg.backlog_age_target_s) {
            return None;
        }
        if !ctx.cooldowns.is_allowed(CooldownScope::ReplicaDown, ctx.now) {
            return None;
        }

        let target = clamp_target(
            ctx.current_replicas.saturating_sub(ctx.cfg.down_step),
            ctx.cfg,
        );
        if target >= ctx.current_replicas {
            return None;
        }

        Some(ReplicaIntent {
            target_replicas: target,
            reason: format!("composite score {:.2} at or below scale-down threshold", ctx.score.composite),
            generated_at: ctx.now,
            severity: Severity::Normal,
        })
    }
}

/// Decides replica intents and applies them through the workload
/// principal, in the fixed rule order: critical bypass, backlog
/// override, spike response, composite up, composite down, hold.
pub struct ReplicaController {
    rules: Vec<Box<dyn Rule>>,
}

impl ReplicaController {
    /// Construct a controller with the standard rule ordering.
    pub fn new() -> Self {
        Self {
            rules: vec![
                Box::new(CriticalBypassRule),
                Box::new(BacklogOverrideRule),
                Box::new(SpikeResponseRule),
                Box::new(CompositeUpRule),
                Box::new(CompositeDownRule),
            ],
        }
    }

    /// Evaluate the rule chain, returning the first rule's intent or
    /// `None` if every rule held.
    #[instrument(skip(self, ctx))]
    pub fn decide(&self, ctx: &DecisionContext) -> Option<ReplicaIntent> {
        for rule in &self.rules {
            if let Some(intent) = rule.evaluate(ctx) {
                return Some(intent);
            }
        }
        None
    }

    /// Apply an intent through the workload principal, retrying
    /// transient failures with a fixed 100ms/400ms/1s backoff. A
    /// `Permission` error is treated as non-retryable and fails
    /// immediately.
    #[instrument(skip(self, api, intent))]
    pub async fn apply(
        &self,
        api: &dyn WorkloadApi,
        deployment: &str,
        intent: &ReplicaIntent,
    ) -> Outcome {
        const BACKOFFS: [Duration; 3] = [
            Duration::from_millis(100),
            Duration::from_millis(400),
            Duration::from_secs(1),
        ];

        let mut attempt = 0;
        loop {
            match api.scale_replicas(deployment, intent.target_replicas).await {
                Ok(()) => {
                    info!(deployment, target = intent.target_replicas, "applied replica intent");
                    return Outcome::ok(intent.reason.clone());
                }
                Err(PulseError::Permission { reason, .. }) => {
                    warn!(deployment, reason = %reason, "replica scale rejected, not retrying");
                    return Outcome::failed(reason);
                }
                Err(err) if attempt < BACKOFFS.len() => {
                    warn!(deployment, attempt, error = %err, "retrying replica scale");
                    tokio::time::sleep(BACKOFFS[attempt]).await;
                    attempt += 1;
                }
                Err(err) => {
                    warn!(deployment, error = %err, "replica scale failed after retries");
                    return Outcome::failed(err.to_string());
                }
            }
        }
    }
}

impl Default for ReplicaController {
    fn default() -> Self {
        Self::new()
    }
}
