//! Error types for the autoscaling control plane.

use thiserror::Error;

/// Result type used throughout Pulse.
pub type Result<T> = std::result::Result<T, PulseError>;

/// Errors that can occur constructing or driving the control plane.
///
/// Per the error handling design, C1-C4 never raise these to the
/// Orchestrator — they return snapshots with `Fresh`/`Stale`/`Unknown`
/// flags instead. This enum covers construction-time failures and the
/// failure payloads carried by C5/C6/C7 outcomes.
#[derive(Error, Debug)]
pub enum PulseError {
    /// Configuration failed to load or validate.
    #[error("configuration error: {0}")]
    Config(String),

    /// A sample arrived more than the allowed skew out of order.
    #[error("stale sample: observed_at is {skew_ms}ms before the window's latest timestamp")]
    StaleSample {
        /// How far out of order the sample was, in milliseconds.
        skew_ms: i64,
    },

    /// The cluster API rejected a mutation for a reason that must not be retried.
    #[error("permission error on {operation}: {reason}")]
    Permission {
        /// The mutation that was attempted.
        operation: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A transient cluster/monitoring/bus API failure, exhausted its retry budget.
    #[error("transient error on {operation} after {attempts} attempts: {reason}")]
    Transient {
        /// The operation that failed.
        operation: String,
        /// Retry attempts made.
        attempts: u32,
        /// Underlying reason.
        reason: String,
    },

    /// An internal invariant was violated; the current tick is aborted, not the process.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// Knowledge/decision-log storage error.
    #[error("storage error: {0}")]
    Storage(String),

    /// JSON (de)serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Catch-all for construction-time failures from collaborators.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
