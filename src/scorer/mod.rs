//! # Scorer — composite score and spike detection
//!
//! Pure functions over a `Stats` snapshot (§4.4). Stateless by design:
//! the Scorer never holds its own history, it only reads what
//! `MetricsWindow` already computed, so its output is trivially
//! reproducible in tests and benches.

use tracing::instrument;

use crate::config::ScoringConfig;
use crate::metrics::Stats;

/// A clamp of `value / reference` to `[0, 3]`, matching §4.4's
/// normalization: saturating above 3x target prevents a single runaway
/// field from dominating the composite score.
fn norm(value: f64, reference: f64) -> f64 {
    if reference <= 0.0 {
        return 0.0;
    }
    (value / reference).clamp(0.0, 3.0)
}

/// The composite pressure score and its contributing normalized terms.
#[derive(Debug, Clone, Copy)]
pub struct Score {
    /// Weighted sum of normalized CPU, latency, and error-rate terms.
    pub composite: f64,
    /// Normalized CPU term.
    pub cpu_term: f64,
    /// Normalized latency term.
    pub latency_term: f64,
    /// Normalized error-rate term.
    pub error_term: f64,
}

/// Compute the composite pressure score from a metrics snapshot.
#[instrument(skip(stats, cfg))]
pub fn score(stats: &Stats, cfg: &ScoringConfig) -> Score {
    let cpu_term = norm(stats.cpu.p95, cfg.cpu_target);
    let latency_term = norm(stats.latency_p95.p95, cfg.latency_target_ms);
    let error_term = norm(stats.error_rate.mean, cfg.error_target_pct);

    let composite = cfg.w_cpu * cpu_term + cfg.w_lat * latency_term + cfg.w_err * error_term;

    Score { composite, cpu_term, latency_term, error_term }
}

/// Whether the recent window represents a spike relative to baseline.
///
/// Requires at least 3 samples in the recent window and a non-degenerate
/// baseline (falls back to a small epsilon when the baseline mean is
/// zero, so a baseline of exactly 0 doesn't produce a divide-by-zero
/// false positive on the first nonzero sample).
pub fn is_spike(stats: &Stats, cfg: &ScoringConfig) -> bool {
    const BASELINE_EPSILON: f64 = 1e-6;

    if stats.recent_count < 3 {
        return false;
    }

    let (Some(recent), Some(baseline)) = (stats.recent_cpu_mean, stats.baseline_cpu_mean) else {
        return false;
    };

    let ratio = recent / baseline.max(BASELINE_EPSILON);
    ratio >= cfg.spike_ratio
}
