//! # MetricsWindow — sliding-window store and derived statistics
//!
//! Owns the bounded buffer of `MetricSample`s ingested from the message
//! bus and computes the `Stats` snapshot the Scorer and ReplicaController
//! read from. Guarded by a single writer (the Orchestrator's ingest path)
//! with many readers taking a consistent snapshot, per §5.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, instrument, warn};

use crate::error::{PulseError, Result};
use crate::types::{MetricSample, Severity};

/// One numeric field's percentile/central-tendency summary.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FieldStats {
    /// Arithmetic mean.
    pub mean: f64,
    /// 50th percentile.
    pub median: f64,
    /// 90th percentile.
    pub p90: f64,
    /// 95th percentile.
    pub p95: f64,
    /// 99th percentile.
    pub p99: f64,
}

/// Direction of a metric's recent trend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trend {
    /// Values are rising.
    Rising,
    /// Values are falling.
    Falling,
    /// No meaningful movement.
    Stable,
}

/// A point-in-time statistical summary of the window.
#[derive(Debug, Clone)]
pub struct Stats {
    /// Number of samples the summary was computed over.
    pub count: usize,
    /// CPU field stats.
    pub cpu: FieldStats,
    /// p95 latency field stats.
    pub latency_p95: FieldStats,
    /// p99 latency field stats.
    pub latency_p99: FieldStats,
    /// Error rate field stats.
    pub error_rate: FieldStats,
    /// Trend of CPU over the last K samples.
    pub cpu_trend: Trend,
    /// Mean CPU over the last 30s ("recent").
    pub recent_cpu_mean: Option<f64>,
    /// Number of samples in the recent window.
    pub recent_count: usize,
    /// Mean CPU over the preceding 300s, excluding the recent window ("baseline").
    pub baseline_cpu_mean: Option<f64>,
    /// Severity carried by the most recently ingested sample. A publisher
    /// tagging a sample `Critical` must be able to trigger the critical
    /// bypass even when the composite score alone wouldn't.
    pub current_severity: Severity,
}

impl Stats {
    /// An empty summary for a window with no samples.
    fn empty() -> Self {
        Self {
            count: 0,
            cpu: FieldStats::default(),
            latency_p95: FieldStats::default(),
            latency_p99: FieldStats::default(),
            error_rate: FieldStats::default(),
            cpu_trend: Trend::Stable,
            recent_cpu_mean: None,
            recent_count: 0,
            baseline_cpu_mean: None,
            current_severity: Severity::Normal,
        }
    }
}

const RECENT_WINDOW: Duration = Duration::from_secs(30);
const BASELINE_WINDOW: Duration = Duration::from_secs(300);
const TREND_K: usize = 10;

/// Bounded, time- and capacity-evicted buffer of metric samples.
pub struct MetricsWindow {
    window: Duration,
    max_samples: usize,
    skew: Duration,
    samples: VecDeque<MetricSample>,
}

impl MetricsWindow {
    /// Create a window bounded by both age (`window`) and `max_samples`.
    pub fn new(window: Duration, max_samples: usize, skew: Duration) -> Self {
        Self {
            window,
            max_samples,
            skew,
            samples: VecDeque::with_capacity(max_samples),
        }
    }

    /// Insert a sample, rejecting it with `StaleSample` if it arrives more
    /// than `skew` out of order relative to the newest sample already held.
    ///
    /// Amortized O(1): eviction happens lazily in `trim`.
    #[instrument(skip(self, sample))]
    pub fn insert(&mut self, sample: MetricSample) -> Result<()> {
        if let Some(newest) = self.samples.back() {
            let delta = newest.observed_at - sample.observed_at;
            if delta > chrono::Duration::from_std(self.skew).unwrap_or_default() {
                let skew_ms = delta.num_milliseconds();
                warn!(skew_ms, "rejecting out-of-order sample");
                return Err(PulseError::StaleSample { skew_ms });
            }
        }

        if self.samples.len() >= self.max_samples {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
        Ok(())
    }

    /// Evict samples older than `window_seconds` relative to `now`.
    ///
    /// Invariant: after `trim(now)`, no sample older than `window_seconds`
    /// remains.
    pub fn trim(&mut self, now: DateTime<Utc>) {
        let cutoff = now - chrono::Duration::from_std(self.window).unwrap_or_default();
        while let Some(front) = self.samples.front() {
            if front.observed_at < cutoff {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Number of samples currently held.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the window holds no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Compute a `Stats` snapshot. O(n log n) in window size; the window
    /// is bounded so this stays cheap.
    #[instrument(skip(self))]
    pub fn snapshot(&self) -> Stats {
        if self.samples.is_empty() {
            return Stats::empty();
        }

        let cpu: Vec<f64> = self.samples.iter().map(|s| s.cpu_pct).collect();
        let lat95: Vec<f64> = self.samples.iter().map(|s| s.latency_p95_ms).collect();
        let lat99: Vec<f64> = self.samples.iter().map(|s| s.latency_p99_ms).collect();
        let err: Vec<f64> = self.samples.iter().map(|s| s.error_rate_pct).collect();

        let stats = Stats {
            count: self.samples.len(),
            cpu: field_stats(&cpu),
            latency_p95: field_stats(&lat95),
            latency_p99: field_stats(&lat99),
            error_rate: field_stats(&err),
            cpu_trend: self.cpu_trend(),
            recent_cpu_mean: self.windowed_mean(RECENT_WINDOW, None),
            recent_count: self.windowed_count(RECENT_WINDOW, None),
            baseline_cpu_mean: self.windowed_mean(BASELINE_WINDOW, Some(RECENT_WINDOW)),
            current_severity: self.samples.back().map_or(Severity::Normal, |s| s.severity),
        };

        debug!(count = stats.count, "computed metrics snapshot");
        stats
    }

    /// Mean of `cpu_pct` over the last `window` ending at `now`, optionally
    /// excluding an inner `exclude` window (used to compute the baseline
    /// window as [300s, 30s) back from now).
    fn windowed_mean(&self, window: Duration, exclude: Option<Duration>) -> Option<f64> {
        let now = self.samples.back()?.observed_at;
        let cutoff = now - chrono::Duration::from_std(window).unwrap_or_default();
        let exclude_cutoff = exclude.map(|e| now - chrono::Duration::from_std(e).unwrap_or_default());

        let values: Vec<f64> = self
            .samples
            .iter()
            .filter(|s| s.observed_at >= cutoff)
            .filter(|s| exclude_cutoff.map_or(true, |ec| s.observed_at < ec))
            .map(|s| s.cpu_pct)
            .collect();

        if values.is_empty() {
            None
        } else {
            Some(values.iter().sum::<f64>() / values.len() as f64)
        }
    }

    fn windowed_count(&self, window: Duration, exclude: Option<Duration>) -> usize {
        let Some(now) = self.samples.back().map(|s| s.observed_at) else {
            return 0;
        };
        let cutoff = now - chrono::Duration::from_std(window).unwrap_or_default();
        let exclude_cutoff = exclude.map(|e| now - chrono::Duration::from_std(e).unwrap_or_default());

        self.samples
            .iter()
            .filter(|s| s.observed_at >= cutoff)
            .filter(|s| exclude_cutoff.map_or(true, |ec| s.observed_at < ec))
            .count()
    }

    /// Trend over the last K samples: a simple OLS slope when there are
    /// enough points, otherwise mean-of-recent-quarter minus
    /// mean-of-older-quarter.
    fn cpu_trend(&self) -> Trend {
        let n = self.samples.len();
        if n < 2 {
            return Trend::Stable;
        }

        let k = n.min(TREND_K);
        let recent: Vec<f64> = self
            .samples
            .iter()
            .skip(n - k)
            .map(|s| s.cpu_pct)
            .collect();

        let slope = if k >= 10 {
            ols_slope(&recent)
        } else {
            let q = (recent.len() / 4).max(1);
            let older_mean = recent[..q].iter().sum::<f64>() / q as f64;
            let newer_mean = recent[recent.len() - q..].iter().sum::<f64>() / q as f64;
            newer_mean - older_mean
        };

        if slope > 0.01 {
            Trend::Rising
        } else if slope < -0.01 {
            Trend::Falling
        } else {
            Trend::Stable
        }
    }
}

fn ols_slope(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let x_mean = (n - 1.0) / 2.0;
    let y_mean = values.iter().sum::<f64>() / n;

    let mut numerator = 0.0;
    let mut denominator = 0.0;
    for (i, &y) in values.iter().enumerate() {
        let x = i as f64;
        numerator += (x - x_mean) * (y - y_mean);
        denominator += (x - x_mean).powi(2);
    }

    if denominator != 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}

/// Percentiles via nearest-rank with linear interpolation on a sorted copy.
///
/// `count < 10` clamps p99 to the maximum; `count < 2` collapses every
/// percentile to the single observation.
fn field_stats(values: &[f64]) -> FieldStats {
    if values.is_empty() {
        return FieldStats::default();
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());

    let n = sorted.len();
    let mean = sorted.iter().sum::<f64>() / n as f64;

    if n < 2 {
        let v = sorted[0];
        return FieldStats { mean, median: v, p90: v, p95: v, p99: v };
    }

    let median = percentile(&sorted, 0.50);
    let p90 = percentile(&sorted, 0.90);
    let p95 = percentile(&sorted, 0.95);
    let p99 = if n < 10 { *sorted.last().unwrap() } else { percentile(&sorted, 0.99) };

    FieldStats { mean, median, p90, p95, p99 }
}

/// Linear-interpolated percentile on an already-sorted slice.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }

    let rank = p * (n - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        let frac = rank - lo as f64;
        sorted[lo] + (sorted[hi] - sorted[lo]) * frac
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Severity;

    fn sample_at(secs: i64, cpu: f64) -> MetricSample {
        MetricSample {
            observed_at: Utc::now() + chrono::Duration::seconds(secs),
            cpu_pct: cpu,
            latency_p95_ms: 120.0,
            latency_p99_ms: 200.0,
            error_rate_pct: 0.2,
            severity: Severity::Normal,
            source: None,
        }
    }

    #[test]
    fn single_sample_collapses_percentiles() {
        let mut w = MetricsWindow::new(Duration::from_secs(300), 600, Duration::from_secs(2));
        w.insert(sample_at(0, 42.0)).unwrap();
        let stats = w.snapshot();
        assert_eq!(stats.cpu.median, 42.0);
        assert_eq!(stats.cpu.p95, 42.0);
        assert_eq!(stats.cpu.p99, 42.0);
    }

    #[test]
    fn rejects_stale_samples_beyond_skew() {
        let mut w = MetricsWindow::new(Duration::from_secs(300), 600, Duration::from_secs(2));
        w.insert(sample_at(10, 10.0)).unwrap();
        let err = w.insert(sample_at(0, 10.0)).unwrap_err();
        assert!(matches!(err, PulseError::StaleSample { .. }));
    }

    #[test]
    fn trim_evicts_samples_older_than_window() {
        let mut w = MetricsWindow::new(Duration::from_secs(60), 600, Duration::from_secs(2));
        w.insert(sample_at(0, 10.0)).unwrap();
        w.insert(sample_at(120, 10.0)).unwrap();
        let now = w.samples.back().unwrap().observed_at;
        w.trim(now);
        assert_eq!(w.len(), 1);
    }

    #[test]
    fn capacity_eviction_bounds_size() {
        let mut w = MetricsWindow::new(Duration::from_secs(3600), 3, Duration::from_secs(2));
        for i in 0..5 {
            w.insert(sample_at(i, 10.0)).unwrap();
        }
        assert_eq!(w.len(), 3);
    }

    #[test]
    fn snapshot_carries_most_recent_sample_severity() {
        let mut w = MetricsWindow::new(Duration::from_secs(300), 600, Duration::from_secs(2));
        w.insert(sample_at(0, 10.0)).unwrap();
        let mut critical = sample_at(1, 12.0);
        critical.severity = Severity::Critical;
        w.insert(critical).unwrap();
        assert_eq!(w.snapshot().current_severity, Severity::Critical);
    }

    #[test]
    fn percentiles_under_ten_samples_cap_p99_at_max() {
        let mut w = MetricsWindow::new(Duration::from_secs(300), 600, Duration::from_secs(2));
        for (i, cpu) in [10.0, 20.0, 30.0, 90.0].into_iter().enumerate() {
            w.insert(sample_at(i as i64, cpu)).unwrap();
        }
        let stats = w.snapshot();
        assert_eq!(stats.cpu.p99, 90.0);
    }
}
