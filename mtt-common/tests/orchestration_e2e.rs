//! End-to-end orchestration runs against the mock environment.
//!
//! Validates:
//!   - Phase order and settle pauses of a full test case
//!   - Bounce timing and handle cycling of the migration tool
//!   - Failure isolation between test cases, with teardown after each
//!   - Skip list, run list and describe-only dispositions
//!   - Interrupt handling and idempotent teardown

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use mtt_common::state::ZK_CONNECT_STR;
use mtt_common::testcase::discover_testcase_dirs;
use mtt_common::{
    CaseContext, CaseOutcome, CasePhase, ClusterConfig, EntityId, HarnessSettings, MockCall,
    MockCallKind, MockEnvironment, Orchestrator, Role, TestCase, TestSelection,
};
use serde_json::json;
use tempfile::TempDir;

// ===========================================================================
// Fixtures
// ===========================================================================

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn cluster_json() -> serde_json::Value {
    json!({
        "cluster_config": [
            {"entity_id": "0", "hostname": "zk-src", "role": "zookeeper", "cluster_name": "source"},
            {"entity_id": "1", "hostname": "broker-src", "role": "broker", "cluster_name": "source"},
            {"entity_id": "2", "hostname": "zk-dst", "role": "zookeeper", "cluster_name": "target"},
            {"entity_id": "3", "hostname": "broker-dst", "role": "broker", "cluster_name": "target"},
            {"entity_id": "4", "hostname": "mm", "role": "migration_tool", "cluster_name": "target"},
            {"entity_id": "5", "hostname": "localhost", "role": "producer_performance", "cluster_name": "source"},
            {"entity_id": "6", "hostname": "localhost", "role": "console_consumer", "cluster_name": "target"}
        ]
    })
}

struct Suite {
    dir: TempDir,
    cluster: ClusterConfig,
}

impl Suite {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let cluster_path = dir.path().join("cluster_config.json");
        std::fs::write(&cluster_path, cluster_json().to_string()).unwrap();
        let cluster = ClusterConfig::load(&cluster_path).unwrap();
        Self { dir, cluster }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn add_case(&self, name: &str, iterations: u32, downtime: &str, bounce: bool) -> PathBuf {
        let case_dir = self.path().join(name);
        std::fs::create_dir_all(&case_dir).unwrap();
        let properties = json!({
            "description": {"01": format!("{name}: bounce migration tool")},
            "testcase_args": {
                "num_iteration": iterations.to_string(),
                "bounced_entity_downtime_sec": downtime,
                "message_producing_free_time_sec": "15",
                "bounce_migration_tool": if bounce { "true" } else { "false" }
            },
            "entities": [{"entity_id": "0", "clientPort": "2188"}]
        });
        std::fs::write(
            case_dir.join(format!("{name}_properties.json")),
            properties.to_string(),
        )
        .unwrap();
        case_dir
    }

    fn orchestrator(&self, env: &Arc<MockEnvironment>) -> Orchestrator<MockEnvironment> {
        Orchestrator::new(
            Arc::clone(env),
            HarnessSettings::default(),
            self.path(),
            self.cluster.clone(),
        )
    }

    fn case_dirs(&self) -> Vec<PathBuf> {
        discover_testcase_dirs(self.path()).unwrap()
    }
}

fn never() -> std::future::Pending<()> {
    std::future::pending()
}

fn tool_events(env: &MockEnvironment, case: &str) -> Vec<(tokio::time::Instant, MockCall)> {
    env.events()
        .into_iter()
        .filter(|e| e.case == case)
        .filter(|e| match &e.call {
            MockCall::Start { role, .. } | MockCall::Stop { role, .. } => {
                *role == Role::MigrationTool
            }
            _ => false,
        })
        .map(|e| (e.at, e.call))
        .collect()
}

// ===========================================================================
// Full lifecycle
// ===========================================================================

#[tokio::test(start_paused = true)]
async fn test_bounce_scenario_cycles_tool_three_times() {
    init_tracing();
    let suite = Suite::new();
    suite.add_case("testcase_9001", 3, "2", true);
    let env = Arc::new(MockEnvironment::new());

    let report = suite
        .orchestrator(&env)
        .run_with_shutdown(&suite.case_dirs(), never())
        .await;

    assert!(report.all_passed(), "{report:?}");
    let case = &report.cases[0];
    assert_eq!(case.outcome, CaseOutcome::Passed);
    let bounces = case.bounces.as_ref().unwrap();
    assert_eq!(bounces.iterations_run, 3);
    assert_eq!(bounces.bounces.len(), 3);
    for bounce in &bounces.bounces {
        assert_eq!(bounce.entity_id, EntityId::new("4"));
        assert_ne!(bounce.old_handle, bounce.new_handle);
    }

    // Start, then per iteration: stop, 2s down, start, 15s interval.
    let events = tool_events(&env, "testcase_9001");
    assert!(matches!(events[0].1, MockCall::Start { .. }));
    for i in 0..3 {
        let (stop_at, stop) = &events[1 + 2 * i];
        let (start_at, start) = &events[2 + 2 * i];
        assert!(matches!(stop, MockCall::Stop { was_running: true, .. }));
        assert!(matches!(start, MockCall::Start { .. }));
        assert_eq!(*start_at - *stop_at, Duration::from_secs(2));
        if i > 0 {
            let (prev_start_at, _) = &events[2 * i];
            assert_eq!(*stop_at - *prev_start_at, Duration::from_secs(15));
        }
    }

    assert!(env.live_handles().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_phase_sequence_and_settle_pauses() {
    let suite = Suite::new();
    suite.add_case("testcase_1", 1, "1", false);
    let env = Arc::new(MockEnvironment::new());

    suite
        .orchestrator(&env)
        .run_with_shutdown(&suite.case_dirs(), never())
        .await;

    let events: Vec<_> = env
        .events()
        .into_iter()
        .filter(|e| e.case == "testcase_1")
        .filter(|e| !matches!(e.call, MockCall::ProducerRound { .. }))
        .collect();
    let kinds: Vec<MockCallKind> = events.iter().map(|e| e.call.kind()).collect();

    assert_eq!(kinds[0], MockCallKind::PrepareLogDirs);
    assert_eq!(kinds[1], MockCallKind::GenerateProperties);

    let start_roles: Vec<Role> = events
        .iter()
        .filter_map(|e| match &e.call {
            MockCall::Start { role, .. } => Some(*role),
            _ => None,
        })
        .collect();
    assert_eq!(
        start_roles,
        vec![
            Role::Zookeeper,
            Role::Zookeeper,
            Role::Broker,
            Role::Broker,
            Role::MigrationTool,
            Role::ConsoleConsumer,
        ]
    );

    // Coordination nodes settle 2s before brokers start.
    let last_zk = events
        .iter()
        .filter(|e| matches!(e.call, MockCall::Start { role: Role::Zookeeper, .. }))
        .last()
        .unwrap();
    let first_broker = events
        .iter()
        .find(|e| matches!(e.call, MockCall::Start { role: Role::Broker, .. }))
        .unwrap();
    assert_eq!(first_broker.at - last_zk.at, Duration::from_secs(2));

    // Brokers are stopped before coordination nodes, then the signature sweep.
    let tail: Vec<MockCallKind> = kinds
        .iter()
        .copied()
        .skip_while(|k| *k != MockCallKind::ForceTerminate)
        .collect();
    assert_eq!(
        &tail[..6],
        &[
            MockCallKind::ForceTerminate,
            MockCallKind::CollectLogs,
            MockCallKind::ValidateData,
            MockCallKind::ValidateChecksum,
            MockCallKind::RenderGraphs,
            MockCallKind::RenderDashboards,
        ]
    );
    let stop_roles: Vec<Role> = events
        .iter()
        .filter_map(|e| match &e.call {
            MockCall::Stop { role, .. } => Some(*role),
            _ => None,
        })
        .collect();
    assert_eq!(
        &stop_roles[..4],
        &[Role::Broker, Role::Broker, Role::Zookeeper, Role::Zookeeper]
    );
}

#[tokio::test(start_paused = true)]
async fn test_zero_iterations_never_touches_tool() {
    let suite = Suite::new();
    suite.add_case("testcase_1", 0, "5", true);
    let env = Arc::new(MockEnvironment::new());

    let report = suite
        .orchestrator(&env)
        .run_with_shutdown(&suite.case_dirs(), never())
        .await;

    assert_eq!(report.cases[0].outcome, CaseOutcome::Passed);
    assert_eq!(report.cases[0].bounces.as_ref().unwrap().iterations_run, 0);
    // One start, and only the teardown stop.
    let events = tool_events(&env, "testcase_1");
    assert_eq!(events.len(), 2);
    assert!(matches!(events[0].1, MockCall::Start { .. }));
    assert!(matches!(events[1].1, MockCall::Stop { .. }));
}

// ===========================================================================
// Failure isolation
// ===========================================================================

#[tokio::test(start_paused = true)]
async fn test_failing_case_does_not_stop_the_run() {
    let suite = Suite::new();
    for n in 1..=5 {
        suite.add_case(&format!("testcase_{n}"), 1, "1", true);
    }
    let env = Arc::new(MockEnvironment::new());
    env.fail_start_of(Some("testcase_2"), Role::Broker);

    let report = suite
        .orchestrator(&env)
        .run_with_shutdown(&suite.case_dirs(), never())
        .await;

    let outcomes: Vec<&str> = report.cases.iter().map(|c| c.outcome.label()).collect();
    assert_eq!(outcomes, vec!["PASSED", "FAILED", "PASSED", "PASSED", "PASSED"]);
    assert!(!report.all_passed());

    let failed = &report.cases[1];
    assert_eq!(failed.failed_phase, Some(CasePhase::StartBrokers));
    let teardown = failed.teardown.as_ref().unwrap();
    assert_eq!(teardown.stopped, vec!["zookeeper-0", "zookeeper-2"]);
    assert!(teardown.errors.is_empty());
    assert_eq!(env.count("testcase_2", MockCallKind::ForceTerminate), 1);

    assert!(env.live_handles().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_unreadable_definition_fails_before_anything_starts() {
    let suite = Suite::new();
    std::fs::create_dir_all(suite.path().join("testcase_1")).unwrap();
    suite.add_case("testcase_2", 1, "1", false);
    let env = Arc::new(MockEnvironment::new());

    let report = suite
        .orchestrator(&env)
        .run_with_shutdown(&suite.case_dirs(), never())
        .await;

    assert_eq!(report.cases[0].failed_phase, Some(CasePhase::LoadDefinition));
    assert!(env.calls_for("testcase_1").is_empty());
    assert_eq!(report.cases[1].outcome, CaseOutcome::Passed);
}

#[tokio::test(start_paused = true)]
async fn test_validation_mismatch_fails_but_graphs_render() {
    let suite = Suite::new();
    suite.add_case("testcase_1", 1, "1", false);
    let env = Arc::new(MockEnvironment::new());
    env.set_validation(false, true);

    let report = suite
        .orchestrator(&env)
        .run_with_shutdown(&suite.case_dirs(), never())
        .await;

    let case = &report.cases[0];
    assert!(matches!(&case.outcome, CaseOutcome::Failed(reason) if reason.contains("data_matched")));
    assert_eq!(case.failed_phase, Some(CasePhase::Validate));
    assert_eq!(case.validations.len(), 2);
    assert_eq!(env.count("testcase_1", MockCallKind::RenderGraphs), 1);
    assert_eq!(env.count("testcase_1", MockCallKind::RenderDashboards), 1);
}

// ===========================================================================
// Dispositions
// ===========================================================================

#[tokio::test(start_paused = true)]
async fn test_skip_and_run_lists() {
    let suite = Suite::new();
    for n in 1..=3 {
        suite.add_case(&format!("testcase_{n}"), 0, "1", false);
    }
    let env = Arc::new(MockEnvironment::new());
    let selection = TestSelection::new(
        vec!["testcase_2".to_string()],
        Some(vec!["testcase_1".to_string(), "testcase_2".to_string()]),
    );

    let report = suite
        .orchestrator(&env)
        .with_selection(selection)
        .run_with_shutdown(&suite.case_dirs(), never())
        .await;

    let outcomes: Vec<&str> = report.cases.iter().map(|c| c.outcome.label()).collect();
    assert_eq!(outcomes, vec!["PASSED", "SKIPPED", "SKIPPED"]);
    assert!(report.all_passed());
    assert!(env.calls_for("testcase_2").is_empty());
    assert!(env.calls_for("testcase_3").is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_describe_only_touches_nothing() {
    let suite = Suite::new();
    suite.add_case("testcase_1", 3, "1", true);
    suite.add_case("testcase_2", 3, "1", true);
    let env = Arc::new(MockEnvironment::new());

    let report = suite
        .orchestrator(&env)
        .describe_only(true)
        .run_with_shutdown(&suite.case_dirs(), never())
        .await;

    assert!(report.cases.iter().all(|c| c.outcome == CaseOutcome::Described));
    assert!(report.cases.iter().all(|c| c.teardown.is_none()));
    assert!(env.events().is_empty());
}

// ===========================================================================
// Interrupt and teardown
// ===========================================================================

#[tokio::test(start_paused = true)]
async fn test_interrupt_tears_down_and_ends_run() {
    let suite = Suite::new();
    suite.add_case("testcase_1", 3, "1", true);
    suite.add_case("testcase_2", 3, "1", true);
    let env = Arc::new(MockEnvironment::new());

    // Fires during the free-production window of the first case.
    let report = suite
        .orchestrator(&env)
        .run_with_shutdown(&suite.case_dirs(), tokio::time::sleep(Duration::from_secs(30)))
        .await;

    assert!(report.interrupted);
    assert!(!report.all_passed());
    assert_eq!(report.cases.len(), 1);
    let case = &report.cases[0];
    assert!(matches!(&case.outcome, CaseOutcome::Failed(reason) if reason.contains("Interrupted")));
    assert_eq!(case.failed_phase, Some(CasePhase::FreeProduction));

    let teardown = case.teardown.as_ref().unwrap();
    assert_eq!(teardown.stopped.len(), 5);
    assert!(teardown.producer.is_some_and(|p| p.acknowledged));
    assert!(env.live_handles().is_empty());
    assert!(env.calls_for("testcase_2").is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_teardown_twice_is_safe() {
    let suite = Suite::new();
    let dir = suite.add_case("testcase_1", 0, "1", false);
    let env = Arc::new(MockEnvironment::new());
    env.fail_in_case("testcase_1", MockCallKind::CollectLogs);
    let orchestrator = suite.orchestrator(&env);

    let mut ctx = CaseContext::new();
    let err = orchestrator
        .run_phases(&TestCase::from_dir(dir), &mut ctx)
        .await
        .unwrap_err();
    assert_eq!(err.phase(), Some(CasePhase::CollectLogs));
    assert_eq!(
        ctx.state.config(ZK_CONNECT_STR).as_deref(),
        Some("zk-src:2188")
    );

    let first = orchestrator.teardown(&mut ctx).await;
    let second = orchestrator.teardown(&mut ctx).await;

    // Cluster was already stopped; migration tool and consumer remain.
    assert_eq!(first.stopped, vec!["console_consumer-6", "migration_tool-4"]);
    assert!(first.producer.is_some());
    assert!(second.stopped.is_empty());
    assert!(second.errors.is_empty());
    assert!(second.producer.is_none());
    assert!(env.live_handles().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_teardown_without_load_has_no_work() {
    let suite = Suite::new();
    let env = Arc::new(MockEnvironment::new());
    let orchestrator = suite.orchestrator(&env);

    let mut ctx = CaseContext::new();
    let summary = orchestrator.teardown(&mut ctx).await;
    assert!(summary.stopped.is_empty());
    assert!(summary.errors.is_empty());
    assert!(env.events().is_empty());
}
