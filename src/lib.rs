//! Pulse is an autoscaling control plane for a container-orchestrated
//! cluster. It observes request-level metrics, queue backlog, and node
//! health, then drives replica counts, the node pool, and container
//! memory limits to keep the workload within its target operating band.
//!
//! ```text
//!                 ┌─────────────┐
//!   bus ─────────▶│ MetricsWindow│──┐
//!                 └─────────────┘  │
//!   queue ───────▶│ BacklogProbe │──┤
//!                 └─────────────┘  ├─▶ Scorer ─▶ ReplicaController ─▶ WorkloadApi
//!   cluster API ─▶│ NodeMonitor  │──┤                                │
//!                 └─────────────┘  │                                ▼
//!                                  └─▶ NodeScaler ──────────────▶ NodeApi
//!                      MemoryOptimizer ─────────────────────────▶ WorkloadApi
//! ```
//!
//! Every tick is driven by [`orchestrator::Orchestrator::tick`]; nothing
//! in this crate reaches for global mutable state — each component's
//! state lives behind its own type and is only ever read through a
//! snapshot.

pub mod backlog;
pub mod bus;
pub mod cluster;
pub mod config;
pub mod error;
pub mod hooks;
pub mod knowledge;
pub mod memory;
pub mod metrics;
pub mod nodes;
pub mod nodescaler;
pub mod orchestrator;
pub mod replica;
pub mod scorer;
pub mod types;

pub use config::Config;
pub use error::{PulseError, Result};
pub use orchestrator::{Collaborators, Orchestrator};

/// Crate version, surfaced on the status snapshot and in logs at startup.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default tick interval when none is configured.
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 10_000;
