//! Property checks for the bounce loop and the producer stop protocol.
//!
//! Validates:
//!   - Bounce loop duration is iterations × (interval + downtime when enabled)
//!   - Every bounce replaces the handle and leaves exactly one live process
//!   - The producer acknowledges a stop regardless of round length

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use mtt_common::{
    BounceConfig, CaseEnv, ClusterConfig, Entity, EntityId, EntityRegistry, FaultInjector,
    MockEnvironment, ProducerCoordinator, Role, SharedTestState, TestCase, TestCaseArgs,
    TestCaseDefinition, TestEnvironment, Timings,
};
use proptest::prelude::*;
use tokio::time::Instant;

fn paused_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .unwrap()
}

fn case_env() -> CaseEnv {
    CaseEnv::new(
        TestCase::from_dir("/suite/testcase_1"),
        TestCaseDefinition::default(),
        TestCaseArgs {
            num_iteration: 0,
            bounced_entity_downtime_secs: 1,
            message_producing_free_time_secs: 0,
            bounce_migration_tool: true,
        },
        ClusterConfig::default(),
        PathBuf::from("/suite"),
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_bounce_loop_duration(
        iterations in 0u32..6,
        downtime in 0u64..10,
        interval in 0u64..30,
        enabled in any::<bool>(),
    ) {
        let rt = paused_runtime();
        let (elapsed, report, live) = rt.block_on(async {
            let env = Arc::new(MockEnvironment::new());
            let case = case_env();
            let registry = EntityRegistry::new();
            let tool = Entity::new("4", Role::MigrationTool, "mm");
            registry.register(tool.clone()).unwrap();
            let handle = env.start_entity(&case, &tool).await.unwrap();
            registry.record_handle(&tool.id, handle).unwrap();

            let injector = FaultInjector::new(Arc::clone(&env), Duration::from_secs(interval));
            let config = BounceConfig {
                iterations,
                downtime_secs: downtime,
                enabled,
                target: Role::MigrationTool,
            };
            let started = Instant::now();
            let report = injector.inject_faults(&case, &registry, &config).await.unwrap();
            (started.elapsed(), report, env.live_handles())
        });

        let per_iteration = interval + if enabled { downtime } else { 0 };
        prop_assert_eq!(elapsed, Duration::from_secs(u64::from(iterations) * per_iteration));
        prop_assert_eq!(report.iterations_run, iterations);
        let expected_bounces = if enabled { iterations as usize } else { 0 };
        prop_assert_eq!(report.bounces.len(), expected_bounces);
        for bounce in &report.bounces {
            prop_assert_eq!(&bounce.entity_id, &EntityId::new("4"));
            prop_assert_ne!(bounce.old_handle, bounce.new_handle);
        }
        prop_assert_eq!(live.len(), 1);
    }

    #[test]
    fn test_producer_always_acknowledges(
        round_ms in 0u64..5_000,
        pause_secs in 0u64..4,
        poll_secs in 0u64..4,
    ) {
        let rt = paused_runtime();
        let summary = rt.block_on(async {
            let env = Arc::new(MockEnvironment::new());
            env.set_producer_round(Duration::from_millis(round_ms));
            let coordinator = ProducerCoordinator::new(&Timings {
                producer_round_pause_secs: pause_secs,
                ack_poll_secs: poll_secs,
                ..Timings::default()
            });
            let state = Arc::new(SharedTestState::new());
            let producer = Entity::new("5", Role::ProducerPerformance, "localhost");
            let handle = coordinator.start_producer(
                Arc::clone(&env),
                Arc::new(case_env()),
                producer,
                Arc::clone(&state),
            );

            tokio::time::sleep(Duration::from_secs(3)).await;
            coordinator.stop_producer_and_await(&state).await.unwrap();
            assert!(state.stop_acknowledged());
            handle.shutdown(Duration::from_secs(5)).await
        });

        let summary = summary.unwrap();
        prop_assert!(summary.acknowledged);
        prop_assert_eq!(summary.failed_rounds, 0);
    }
}
