//! # Message bus ingestion
//!
//! Parses raw JSON payloads into `MetricSample`s per the wire schema in
//! §6. A missing timestamp defaults to receive time; unknown fields are
//! ignored; a payload that fails to parse at all is counted and dropped
//! rather than rejected at the transport level — the bus has already
//! accepted it, Pulse just can't use it.

use chrono::Utc;
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

use crate::types::{MetricSample, Severity};

/// Raw wire shape accepted from the bus. Unknown fields are ignored by
/// serde's default behavior (no `deny_unknown_fields`).
#[derive(Debug, Deserialize)]
struct RawMessage {
    observed_at: Option<chrono::DateTime<Utc>>,
    cpu_pct: f64,
    latency_p95_ms: f64,
    latency_p99_ms: f64,
    error_rate_pct: f64,
    #[serde(default)]
    severity: Option<Severity>,
    #[serde(default)]
    source: Option<String>,
}

/// Ingests raw bus payloads into `MetricSample`s, tracking how many
/// messages failed to parse.
#[derive(Default)]
pub struct BusSubscriber {
    malformed_count: AtomicU64,
}

impl BusSubscriber {
    /// Construct a subscriber with a zeroed malformed-message counter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse one raw payload. Returns `None` (and increments the
    /// malformed counter) if the payload doesn't match the wire schema.
    pub fn ingest(&self, payload: &[u8]) -> Option<MetricSample> {
        match serde_json::from_slice::<RawMessage>(payload) {
            Ok(raw) => Some(MetricSample {
                observed_at: raw.observed_at.unwrap_or_else(Utc::now),
                cpu_pct: raw.cpu_pct,
                latency_p95_ms: raw.latency_p95_ms,
                latency_p99_ms: raw.latency_p99_ms,
                error_rate_pct: raw.error_rate_pct,
                severity: raw.severity.unwrap_or(Severity::Normal),
                source: raw.source,
            }),
            Err(err) => {
                warn!(error = %err, "malformed bus message, dropping");
                self.malformed_count.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Total malformed messages observed since construction.
    pub fn malformed_count(&self) -> u64 {
        self.malformed_count.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_message() {
        let sub = BusSubscriber::new();
        let payload = br#"{"cpu_pct": 42.0, "latency_p95_ms": 100.0, "latency_p99_ms": 200.0, "error_rate_pct": 0.1}"#;
        let sample = sub.ingest(payload).unwrap();
        assert_eq!(sample.cpu_pct, 42.0);
        assert_eq!(sample.severity, Severity::Normal);
    }

    #[test]
    fn missing_timestamp_defaults_to_receive_time() {
        let sub = BusSubscriber::new();
        let before = Utc::now();
        let payload = br#"{"cpu_pct": 1.0, "latency_p95_ms": 1.0, "latency_p99_ms": 1.0, "error_rate_pct": 0.0}"#;
        let sample = sub.ingest(payload).unwrap();
        assert!(sample.observed_at >= before);
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let sub = BusSubscriber::new();
        let payload = br#"{"cpu_pct": 1.0, "latency_p95_ms": 1.0, "latency_p99_ms": 1.0, "error_rate_pct": 0.0, "whatever": true}"#;
        assert!(sub.ingest(payload).is_some());
    }

    #[test]
    fn malformed_payload_is_counted_and_dropped() {
        let sub = BusSubscriber::new();
        assert!(sub.ingest(b"not json").is_none());
        assert_eq!(sub.malformed_count(), 1);
    }
}
