//! # BacklogProbe — queue-depth polling and pressure classification
//!
//! Polls an external queue/broker for depth and oldest-message age on a
//! fixed cadence, independent of the metrics bus, and turns consecutive
//! poll failures into an explicit `Unknown` freshness rather than a
//! fabricated zero (§4.2, "no zero from unknown").

use async_trait::async_trait;
use chrono::Utc;
use tracing::{instrument, warn};

use crate::config::BacklogConfig;
use crate::error::Result;
use crate::types::{BacklogState, Freshness};

/// A source of raw backlog readings, implemented against whatever queue
/// technology backs the workload (SQS, a broker's management API, a
/// custom depth endpoint). Pulse ships only an in-memory fake; production
/// wiring lives outside this crate.
#[async_trait]
pub trait BacklogSource: Send + Sync {
    /// Fetch the current queue depth and the age in seconds of its oldest
    /// unprocessed message.
    async fn poll(&self) -> Result<(u64, f64)>;
}

/// Polls a `BacklogSource` on a fixed interval and derives `BacklogState`,
/// including the growth-rate signal the ReplicaController's backlog
/// override rule depends on.
pub struct BacklogProbe {
    config: BacklogConfig,
    last: Option<(u64, chrono::DateTime<Utc>)>,
    consecutive_failures: u32,
    state: BacklogState,
}

impl BacklogProbe {
    /// Construct a probe with no prior reading; the initial state is
    /// `Unknown` until the first successful poll.
    pub fn new(config: BacklogConfig) -> Self {
        Self {
            config,
            last: None,
            consecutive_failures: 0,
            state: BacklogState::unknown(),
        }
    }

    /// Poll `source` once and update internal state accordingly.
    ///
    /// On failure, freshness degrades to `Stale` immediately and to
    /// `Unknown` once `max_stale_intervals` consecutive failures have
    /// accumulated. `growth_rate_per_s` is only ever set from two
    /// successive successful polls; a gap leaves it `None`, never `0`.
    #[instrument(skip(self, source))]
    pub async fn tick(&mut self, source: &dyn BacklogSource) {
        match source.poll().await {
            Ok((size, oldest_age_s)) => {
                let now = Utc::now();
                let growth_rate_per_s = self.last.map(|(prev_size, prev_ts)| {
                    let dt = (now - prev_ts).num_milliseconds() as f64 / 1000.0;
                    if dt > 0.0 {
                        (size as i64 - prev_size as i64) as f64 / dt
                    } else {
                        0.0
                    }
                });

                let consecutive_growth_intervals = match growth_rate_per_s {
                    Some(rate) if rate > 0.0 => self.state.consecutive_growth_intervals + 1,
                    Some(_) => 0,
                    None => 0,
                };

                self.state = BacklogState {
                    size,
                    oldest_age_s,
                    growth_rate_per_s,
                    freshness: Freshness::Fresh,
                    consecutive_growth_intervals,
                };
                self.last = Some((size, now));
                self.consecutive_failures = 0;
            }
            Err(err) => {
                self.consecutive_failures += 1;
                warn!(error = %err, consecutive_failures = self.consecutive_failures, "backlog poll failed");

                if self.consecutive_failures >= self.config.max_stale_intervals {
                    self.state.freshness = Freshness::Unknown;
                    self.state.growth_rate_per_s = None;
                } else if self.state.freshness == Freshness::Fresh {
                    self.state.freshness = Freshness::Stale;
                }
            }
        }
    }

    /// The most recently computed state.
    pub fn snapshot(&self) -> BacklogState {
        self.state.clone()
    }

    /// Whether the backlog is currently pressuring, per configured thresholds.
    pub fn is_pressuring(&self) -> bool {
        self.state.is_pressuring(
            self.config.backlog_size_threshold,
            self.config.backlog_age_threshold_s,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FixedSource(Mutex<Vec<Result<(u64, f64)>>>);

    #[async_trait]
    impl BacklogSource for FixedSource {
        async fn poll(&self) -> Result<(u64, f64)> {
            let mut guard = self.0.lock().unwrap();
            if guard.is_empty() {
                panic!("exhausted fixture");
            }
            guard.remove(0)
        }
    }

    fn err() -> Result<(u64, f64)> {
        Err(crate::error::PulseError::Transient {
            operation: "poll".into(),
            attempts: 1,
            reason: "simulated".into(),
        })
    }

    #[tokio::test]
    async fn first_poll_is_fresh_with_unknown_growth() {
        let source = FixedSource(Mutex::new(vec![Ok((100, 5.0))]));
        let mut probe = BacklogProbe::new(BacklogConfig::default());
        probe.tick(&source).await;
        let state = probe.snapshot();
        assert_eq!(state.freshness, Freshness::Fresh);
        assert!(state.growth_rate_per_s.is_none());
    }

    #[tokio::test]
    async fn repeated_failures_degrade_to_unknown_not_zero() {
        let source = FixedSource(Mutex::new(vec![err(), err(), err(), err()]));
        let mut probe = BacklogProbe::new(BacklogConfig {
            max_stale_intervals: 3,
            ..BacklogConfig::default()
        });
        for _ in 0..3 {
            probe.tick(&source).await;
        }
        let state = probe.snapshot();
        assert_eq!(state.freshness, Freshness::Unknown);
        assert!(state.growth_rate_per_s.is_none());
        assert!(!probe.is_pressuring());
    }

    #[tokio::test]
    async fn pressuring_when_size_exceeds_threshold() {
        let source = FixedSource(Mutex::new(vec![Ok((50_000, 5.0))]));
        let mut probe = BacklogProbe::new(BacklogConfig::default());
        probe.tick(&source).await;
        assert!(probe.is_pressuring());
    }
}
