//! End-to-end scenario tests, one per literal example in the control
//! plane's design notes: steady state, composite scale-up, critical
//! bypass, spike response, backlog pressure, capacity-loss emergency
//! node scaling, and OOM remediation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use pulse::backlog::BacklogSource;
use pulse::cluster::fake::FakeCluster;
use pulse::config::Config;
use pulse::memory::{OomSignal, OomSource};
use pulse::metrics::MetricsWindow;
use pulse::nodes::{NodeEvent, NodeMonitor};
use pulse::nodescaler::NodeScaler;
use pulse::replica::{DecisionContext, ReplicaController};
use pulse::scorer;
use pulse::types::{CooldownLedger, CooldownScope, DecisionKind, MetricSample, NodeState, Severity};
use pulse::Orchestrator;

fn sample(cpu: f64, p95: f64, err: f64) -> MetricSample {
    MetricSample {
        observed_at: Utc::now(),
        cpu_pct: cpu,
        latency_p95_ms: p95,
        latency_p99_ms: p95 * 1.5,
        error_rate_pct: err,
        severity: Severity::Normal,
        source: None,
    }
}

struct EmptyBacklog;
#[async_trait]
impl BacklogSource for EmptyBacklog {
    async fn poll(&self) -> pulse::Result<(u64, f64)> {
        Ok((0, 0.0))
    }
}

struct NoOom;
#[async_trait]
impl OomSource for NoOom {
    async fn recent_oom_events(&self, _now: chrono::DateTime<Utc>, _lookback: Duration) -> pulse::Result<Vec<OomSignal>> {
        Ok(vec![])
    }
}

#[test]
fn scenario_1_steady_state_holds() {
    let mut window = MetricsWindow::new(Duration::from_secs(300), 600, Duration::from_secs(2));
    for _ in 0..60 {
        window.insert(sample(40.0, 120.0, 0.2)).unwrap();
    }
    let stats = window.snapshot();
    let cfg = Config::default();
    let score = scorer::score(&stats, &cfg.scoring);

    assert!((score.composite - 0.428).abs() < 0.01);

    let cooldowns = CooldownLedger::new();
    let controller = ReplicaController::new();
    let ctx = DecisionContext {
        stats: &stats,
        score,
        backlog: &pulse::types::BacklogState::unknown(),
        current_replicas: 4,
        now: Utc::now(),
        cooldowns: &cooldowns,
        cfg: &cfg.replica,
        scoring_cfg: &cfg.scoring,
        severity: stats.current_severity,
    };
    assert!(controller.decide(&ctx).is_none());
}

#[test]
fn scenario_2_composite_scale_up_targets_six() {
    let mut window = MetricsWindow::new(Duration::from_secs(300), 600, Duration::from_secs(2));
    for _ in 0..30 {
        window.insert(sample(90.0, 450.0, 0.5)).unwrap();
    }
    let stats = window.snapshot();
    let cfg = Config::default();
    let score = scorer::score(&stats, &cfg.scoring);
    assert!(score.composite >= cfg.scoring.scale_up_score);

    let cooldowns = CooldownLedger::new();
    let controller = ReplicaController::new();
    let ctx = DecisionContext {
        stats: &stats,
        score,
        backlog: &pulse::types::BacklogState::unknown(),
        current_replicas: 4,
        now: Utc::now(),
        cooldowns: &cooldowns,
        cfg: &cfg.replica,
        scoring_cfg: &cfg.scoring,
        severity: stats.current_severity,
    };
    let intent = controller.decide(&ctx).unwrap();
    assert_eq!(intent.target_replicas, 6);
}

#[test]
fn scenario_3_critical_bypass_then_cooldown_blocks_repeat() {
    let cfg = Config::default();
    let window_empty = MetricsWindow::new(Duration::from_secs(300), 600, Duration::from_secs(2));
    let stats = window_empty.snapshot();
    let critical_score = Score {
        composite: cfg.scoring.critical_score + 0.5,
        cpu_term: 3.0,
        latency_term: 3.0,
        error_term: 3.0,
    };

    let mut cooldowns = CooldownLedger::new();
    let controller = ReplicaController::new();
    let backlog = pulse::types::BacklogState::unknown();
    let t0 = Utc::now();

    let ctx = DecisionContext {
        stats: &stats,
        score: critical_score,
        backlog: &backlog,
        current_replicas: 5,
        now: t0,
        cooldowns: &cooldowns,
        cfg: &cfg.replica,
        scoring_cfg: &cfg.scoring,
        severity: Severity::Normal,
    };
    let intent = controller.decide(&ctx).unwrap();
    assert_eq!(intent.target_replicas, 10);
    assert_eq!(intent.severity, Severity::Critical);

    cooldowns.record(CooldownScope::Critical, t0, chrono::Duration::seconds(30));

    let t1 = t0 + chrono::Duration::seconds(10);
    let ctx2 = DecisionContext {
        stats: &stats,
        score: critical_score,
        backlog: &backlog,
        current_replicas: 10,
        now: t1,
        cooldowns: &cooldowns,
        cfg: &cfg.replica,
        scoring_cfg: &cfg.scoring,
        severity: Severity::Normal,
    };
    assert!(controller.decide(&ctx2).is_none());
}

#[test]
fn scenario_3b_critical_tagged_sample_bypasses_with_a_low_composite_score() {
    let cfg = Config::default();
    let mut window = MetricsWindow::new(Duration::from_secs(300), 600, Duration::from_secs(2));
    for _ in 0..30 {
        window.insert(sample(20.0, 80.0, 0.1)).unwrap();
    }
    let mut tagged = sample(20.0, 80.0, 0.1);
    tagged.severity = Severity::Critical;
    window.insert(tagged).unwrap();
    let stats = window.snapshot();
    let score = scorer::score(&stats, &cfg.scoring);
    assert!(score.composite < cfg.scoring.critical_score, "fixture should score well below the bypass threshold");

    let cooldowns = CooldownLedger::new();
    let controller = ReplicaController::new();
    let backlog = pulse::types::BacklogState::unknown();
    let ctx = DecisionContext {
        stats: &stats,
        score,
        backlog: &backlog,
        current_replicas: 5,
        now: Utc::now(),
        cooldowns: &cooldowns,
        cfg: &cfg.replica,
        scoring_cfg: &cfg.scoring,
        severity: stats.current_severity,
    };
    let intent = controller.decide(&ctx).unwrap();
    assert_eq!(intent.target_replicas, 10);
    assert_eq!(intent.severity, Severity::Critical);
}

use pulse::scorer::Score;

#[test]
fn scenario_4_spike_without_high_average_scales_by_spike_factor() {
    let cfg = Config::default();
    let mut stats = MetricsWindow::new(Duration::from_secs(300), 600, Duration::from_secs(2)).snapshot();
    stats.recent_count = 5;
    stats.recent_cpu_mean = Some(80.0);
    stats.baseline_cpu_mean = Some(30.0);

    assert!(scorer::is_spike(&stats, &cfg.scoring));

    let cooldowns = CooldownLedger::new();
    let controller = ReplicaController::new();
    let backlog = pulse::types::BacklogState::unknown();
    let low_score = Score { composite: 0.3, cpu_term: 0.3, latency_term: 0.3, error_term: 0.3 };

    let ctx = DecisionContext {
        stats: &stats,
        score: low_score,
        backlog: &backlog,
        current_replicas: 4,
        now: Utc::now(),
        cooldowns: &cooldowns,
        cfg: &cfg.replica,
        scoring_cfg: &cfg.scoring,
        severity: Severity::Normal,
    };
    let intent = controller.decide(&ctx).unwrap();
    assert_eq!(intent.target_replicas, 6);
}

#[test]
fn scenario_5_backlog_pressure_overrides_normal_score() {
    let cfg = Config::default();
    let stats = MetricsWindow::new(Duration::from_secs(300), 600, Duration::from_secs(2)).snapshot();
    let low_score = Score { composite: 0.3, cpu_term: 0.3, latency_term: 0.3, error_term: 0.3 };
    let backlog = pulse::types::BacklogState {
        size: 50_000,
        oldest_age_s: 120.0,
        growth_rate_per_s: Some(50.0),
        freshness: pulse::types::Freshness::Fresh,
        consecutive_growth_intervals: 2,
    };

    let cooldowns = CooldownLedger::new();
    let controller = ReplicaController::new();
    let ctx = DecisionContext {
        stats: &stats,
        score: low_score,
        backlog: &backlog,
        current_replicas: 4,
        now: Utc::now(),
        cooldowns: &cooldowns,
        cfg: &cfg.replica,
        scoring_cfg: &cfg.scoring,
        severity: Severity::Normal,
    };
    let intent = controller.decide(&ctx).unwrap();
    assert!(intent.target_replicas > 4);
    assert!(intent.reason.contains("backlog"));
}

fn node(name: &str, ready: bool) -> NodeState {
    NodeState {
        name: name.to_string(),
        ready,
        schedulable: true,
        taints: vec![],
        last_transition_ts: Utc::now(),
        quarantined: false,
    }
}

#[tokio::test]
async fn scenario_6_capacity_loss_triggers_emergency_node_scale() {
    let cfg = Config::default();
    let mut monitor = NodeMonitor::new(cfg.node.clone());
    let t0 = Utc::now();
    let nodes = vec![
        node("n1", false),
        node("n2", false),
        node("n3", false),
        node("n4", true),
        node("n5", true),
        node("n6", true),
        node("n7", true),
        node("n8", true),
    ];
    monitor.reconcile(nodes.clone(), t0);
    let events = monitor.reconcile(nodes, t0 + chrono::Duration::seconds(61));

    assert!(events.iter().any(|e| matches!(e, NodeEvent::CapacityCritical { .. })));
    assert!((monitor.capacity_loss() - 0.375).abs() < 0.001);

    let cluster = FakeCluster::new().with_nodes(vec![node("n1", false)]);
    let scaler = NodeScaler::new(cfg.node.clone());
    let mut cooldowns = CooldownLedger::new();
    cooldowns.record(CooldownScope::NodeUp, t0, chrono::Duration::seconds(300));

    let outcome = scaler
        .scale_up(&cluster, monitor.lost_count().max(1) as i32, t0 + chrono::Duration::seconds(61), &mut cooldowns, true)
        .await;
    assert!(outcome.success);
}

#[tokio::test]
async fn scenario_7_oom_remediation_grows_limit_below_cap() {
    let cfg = Config::default();
    let cluster = FakeCluster::new();
    let mut optimizer = pulse::memory::MemoryOptimizer::new(cfg.memory.clone());

    struct OneShot(OomSignal);
    #[async_trait]
    impl OomSource for OneShot {
        async fn recent_oom_events(&self, _now: chrono::DateTime<Utc>, _lookback: Duration) -> pulse::Result<Vec<OomSignal>> {
            Ok(vec![self.0.clone()])
        }
    }

    let signal = OomSignal {
        pod: "web-0".into(),
        container: "app".into(),
        observed_ts: Utc::now(),
        previous_limit_bytes: 512 * 1024 * 1024,
        previous_request_bytes: 256 * 1024 * 1024,
        request_floor_bytes: 128 * 1024 * 1024,
    };
    let source = OneShot(signal);

    let outcomes = optimizer.tick(&source, &cluster, "web", Utc::now()).await;
    match &outcomes[0] {
        pulse::memory::RemediationOutcome::Applied(event) => {
            assert_eq!(event.new_limit_bytes, 768 * 1024 * 1024);
            assert!(event.new_limit_bytes < cfg.memory.memory_cap_bytes);
            assert!(event.applied, "fake cluster confirms the patched limit immediately");
        }
        other => panic!("expected Applied, got {other:?}"),
    }
}

#[tokio::test]
async fn orchestrator_full_tick_runs_without_panicking() {
    let cluster = Arc::new(FakeCluster::new().with_replicas("web", 3));
    let mut orchestrator = Orchestrator::new(
        Arc::new(Config::default()),
        "web",
        3,
        pulse::Collaborators {
            workload_api: cluster.clone(),
            node_api: cluster,
            backlog_source: Arc::new(EmptyBacklog),
            oom_source: Arc::new(NoOom),
        },
    );

    let decisions = orchestrator.tick().await;
    assert!(!decisions.is_empty());
    assert!(decisions.iter().any(|d| d.kind == DecisionKind::Hold));
}
