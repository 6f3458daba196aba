//! Orchestration engine: runs every test case of a suite through the fixed
//! phase sequence, then tears it down.
//!
//! A failing phase ends its test case and nothing else. Teardown runs after
//! every case that reached the run disposition, whether its phases passed,
//! failed or were interrupted. An interrupt tears down the current case and
//! ends the run.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{Instrument, error, info, info_span, warn};

use crate::cluster::ClusterConfig;
use crate::config::HarnessSettings;
use crate::coordinator::{ProducerCoordinator, ProducerHandle};
use crate::environment::{CaseEnv, TestEnvironment, ValidationCheck};
use crate::errors::{HarnessError, HarnessResult};
use crate::fault::{BounceReport, FaultInjector};
use crate::properties::connect_strings;
use crate::registry::EntityRegistry;
use crate::report::{CaseOutcome, CaseReport, RunReport, TeardownSummary};
use crate::state::{SharedTestState, ZK_CONNECT_STR};
use crate::testcase::{
    BounceConfig, Disposition, TestCase, TestCaseArgs, TestSelection, discover_testcase_dirs,
    format_description,
};
use crate::types::Role;

/// Phases of one test case, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CasePhase {
    LoadDefinition,
    PrepareLogDirs,
    GenerateProperties,
    StartZookeepers,
    StartBrokers,
    StartMigrationTool,
    CreateTopics,
    StartProducer,
    FreeProduction,
    BounceLoop,
    StopProducer,
    StartConsumer,
    StopCluster,
    ForceTerminate,
    CollectLogs,
    Validate,
    RenderGraphs,
}

impl CasePhase {
    pub const ALL: [CasePhase; 17] = [
        CasePhase::LoadDefinition,
        CasePhase::PrepareLogDirs,
        CasePhase::GenerateProperties,
        CasePhase::StartZookeepers,
        CasePhase::StartBrokers,
        CasePhase::StartMigrationTool,
        CasePhase::CreateTopics,
        CasePhase::StartProducer,
        CasePhase::FreeProduction,
        CasePhase::BounceLoop,
        CasePhase::StopProducer,
        CasePhase::StartConsumer,
        CasePhase::StopCluster,
        CasePhase::ForceTerminate,
        CasePhase::CollectLogs,
        CasePhase::Validate,
        CasePhase::RenderGraphs,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LoadDefinition => "load_definition",
            Self::PrepareLogDirs => "prepare_log_dirs",
            Self::GenerateProperties => "generate_properties",
            Self::StartZookeepers => "start_zookeepers",
            Self::StartBrokers => "start_brokers",
            Self::StartMigrationTool => "start_migration_tool",
            Self::CreateTopics => "create_topics",
            Self::StartProducer => "start_producer",
            Self::FreeProduction => "free_production",
            Self::BounceLoop => "bounce_loop",
            Self::StopProducer => "stop_producer",
            Self::StartConsumer => "start_consumer",
            Self::StopCluster => "stop_cluster",
            Self::ForceTerminate => "force_terminate",
            Self::CollectLogs => "collect_logs",
            Self::Validate => "validate",
            Self::RenderGraphs => "render_graphs",
        }
    }
}

impl std::fmt::Display for CasePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn at(phase: CasePhase) -> impl FnOnce(HarnessError) -> HarnessError {
    move |source| HarnessError::Phase {
        phase,
        source: Box::new(source),
    }
}

/// Mutable state of one test case run. Created fresh for every case.
#[derive(Debug, Default)]
pub struct CaseContext {
    pub env: Option<Arc<CaseEnv>>,
    pub registry: EntityRegistry,
    pub state: Arc<SharedTestState>,
    pub phase: Option<CasePhase>,
    pub bounces: Option<BounceReport>,
    pub validations: Vec<ValidationCheck>,
    producer: Option<ProducerHandle>,
}

impl CaseContext {
    pub fn new() -> Self {
        Self::default()
    }
}

pub struct Orchestrator<E> {
    env: Arc<E>,
    settings: HarnessSettings,
    suite_dir: PathBuf,
    suite_cluster: ClusterConfig,
    selection: TestSelection,
    describe_only: bool,
    coordinator: ProducerCoordinator,
}

impl<E: TestEnvironment> Orchestrator<E> {
    pub fn new(
        env: Arc<E>,
        settings: HarnessSettings,
        suite_dir: impl Into<PathBuf>,
        suite_cluster: ClusterConfig,
    ) -> Self {
        let coordinator = ProducerCoordinator::new(&settings.timings);
        Self {
            env,
            settings,
            suite_dir: suite_dir.into(),
            suite_cluster,
            selection: TestSelection::default(),
            describe_only: false,
            coordinator,
        }
    }

    pub fn with_selection(mut self, selection: TestSelection) -> Self {
        self.selection = selection;
        self
    }

    pub fn describe_only(mut self, describe_only: bool) -> Self {
        self.describe_only = describe_only;
        self
    }

    pub fn suite_dir(&self) -> &Path {
        &self.suite_dir
    }

    pub fn discover(&self) -> HarnessResult<Vec<PathBuf>> {
        discover_testcase_dirs(&self.suite_dir)
    }

    /// Run all cases, treating Ctrl-C as an interrupt.
    pub async fn run(&self, case_dirs: &[PathBuf]) -> RunReport {
        self.run_with_shutdown(case_dirs, async {
            if tokio::signal::ctrl_c().await.is_err() {
                warn!(component = "Orchestrator", "Cannot listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Run all cases in sorted-name order until `shutdown` resolves.
    pub async fn run_with_shutdown<F>(&self, case_dirs: &[PathBuf], shutdown: F) -> RunReport
    where
        F: Future<Output = ()>,
    {
        let mut report = RunReport::new();
        let mut dirs = case_dirs.to_vec();
        dirs.sort();
        let mut shutdown = std::pin::pin!(shutdown);

        for dir in dirs {
            let case = TestCase::from_dir(dir);
            let disposition = self.selection.disposition(&case.name, self.describe_only);
            match disposition {
                Disposition::DescribeOnly => {
                    report.cases.push(self.describe(&case));
                    continue;
                }
                Disposition::Skip(reason) => {
                    info!(component = "Orchestrator", testcase = %case.name, reason, "Skipping test case");
                    report
                        .cases
                        .push(CaseReport::new(&case.name, CaseOutcome::Skipped(reason)));
                    continue;
                }
                Disposition::Run => {}
            }

            let span = info_span!("testcase", name = %case.name);
            let started = Instant::now();
            let mut ctx = CaseContext::new();

            let result = tokio::select! {
                biased;
                _ = &mut shutdown => None,
                result = self.run_phases(&case, &mut ctx).instrument(span.clone()) => Some(result),
            };

            let teardown = self.teardown(&mut ctx).instrument(span).await;
            let mut case_report = CaseReport::new(&case.name, CaseOutcome::Passed);
            case_report.bounces = ctx.bounces.take();
            case_report.validations = std::mem::take(&mut ctx.validations);
            case_report.teardown = Some(teardown);

            let interrupted = result.is_none();
            match result {
                None => {
                    let err = HarnessError::Interrupted(case.name.clone());
                    error!(component = "Orchestrator", testcase = %case.name, "Interrupted, stopping run");
                    case_report.outcome = CaseOutcome::Failed(err.to_string());
                    case_report.failed_phase = ctx.phase;
                }
                Some(Err(err)) => {
                    let (phase, reason) = match err {
                        HarnessError::Phase { phase, source } => (Some(phase), source.chain()),
                        other => (ctx.phase, other.chain()),
                    };
                    error!(
                        component = "Orchestrator",
                        testcase = %case.name,
                        phase = ?phase,
                        error = %reason,
                        "Test case failed"
                    );
                    case_report.outcome = CaseOutcome::Failed(reason);
                    case_report.failed_phase = phase;
                }
                Some(Ok(())) => {
                    let failed: Vec<&str> = case_report
                        .validations
                        .iter()
                        .filter(|c| !c.passed)
                        .map(|c| c.name.as_str())
                        .collect();
                    if !failed.is_empty() {
                        case_report.outcome =
                            CaseOutcome::Failed(format!("validation failed: {}", failed.join(", ")));
                        case_report.failed_phase = Some(CasePhase::Validate);
                    }
                }
            }
            case_report.duration_ms = started.elapsed().as_millis() as u64;
            info!(
                component = "Orchestrator",
                testcase = %case.name,
                outcome = case_report.outcome.label(),
                duration_ms = case_report.duration_ms,
                "Test case finished"
            );
            report.cases.push(case_report);

            if interrupted {
                report.interrupted = true;
                break;
            }
        }

        report.finish();
        report
    }

    fn describe(&self, case: &TestCase) -> CaseReport {
        match case.load_definition() {
            Ok(definition) => {
                println!("{}", format_description(&case.name, &definition));
                CaseReport::new(&case.name, CaseOutcome::Described)
            }
            Err(e) => {
                let mut report = CaseReport::new(&case.name, CaseOutcome::Failed(e.chain()));
                report.failed_phase = Some(CasePhase::LoadDefinition);
                report
            }
        }
    }

    fn enter(ctx: &mut CaseContext, phase: CasePhase) {
        ctx.phase = Some(phase);
        info!(component = "Orchestrator", %phase, "Entering phase");
    }

    /// The phase sequence of one test case. Returns at the first failing phase.
    pub async fn run_phases(&self, case: &TestCase, ctx: &mut CaseContext) -> HarnessResult<()> {
        let timings = &self.settings.timings;

        Self::enter(ctx, CasePhase::LoadDefinition);
        let load = at(CasePhase::LoadDefinition);
        let (definition, args, cluster) = (|| {
            let definition = case.load_definition()?;
            let args = TestCaseArgs::from_definition(&definition)?;
            let cluster = ClusterConfig::for_testcase(&self.suite_cluster, &case.dir)?;
            Ok::<_, HarnessError>((definition, args, cluster))
        })()
        .map_err(load)?;
        info!(
            component = "Orchestrator",
            description = %format_description(&case.name, &definition).trim_end(),
            "Loaded test case"
        );
        ctx.registry = EntityRegistry::from_cluster(&cluster).map_err(at(CasePhase::LoadDefinition))?;
        if let Some(zk) = connect_strings(&cluster, &definition).get("source") {
            ctx.state.set_config(ZK_CONNECT_STR, zk.clone());
        }
        let case_env = Arc::new(CaseEnv::new(
            case.clone(),
            definition,
            args,
            cluster,
            self.suite_dir.clone(),
        ));
        ctx.env = Some(Arc::clone(&case_env));

        Self::enter(ctx, CasePhase::PrepareLogDirs);
        self.env
            .prepare_log_dirs(&case_env)
            .await
            .map_err(at(CasePhase::PrepareLogDirs))?;

        Self::enter(ctx, CasePhase::GenerateProperties);
        self.env
            .generate_properties(&case_env)
            .await
            .map_err(at(CasePhase::GenerateProperties))?;

        Self::enter(ctx, CasePhase::StartZookeepers);
        self.start_role(&case_env, ctx, Role::Zookeeper)
            .await
            .map_err(at(CasePhase::StartZookeepers))?;
        tokio::time::sleep(timings.zookeeper_settle()).await;

        Self::enter(ctx, CasePhase::StartBrokers);
        self.start_role(&case_env, ctx, Role::Broker)
            .await
            .map_err(at(CasePhase::StartBrokers))?;
        tokio::time::sleep(timings.broker_settle()).await;

        Self::enter(ctx, CasePhase::StartMigrationTool);
        self.start_role(&case_env, ctx, Role::MigrationTool)
            .await
            .map_err(at(CasePhase::StartMigrationTool))?;
        tokio::time::sleep(timings.migration_tool_settle()).await;

        Self::enter(ctx, CasePhase::CreateTopics);
        self.env
            .create_topics(&case_env)
            .await
            .map_err(at(CasePhase::CreateTopics))?;
        tokio::time::sleep(timings.topic_settle()).await;

        Self::enter(ctx, CasePhase::StartProducer);
        let producer = ctx
            .registry
            .first_of(Role::ProducerPerformance)
            .ok_or(HarnessError::NoEntityForRole(Role::ProducerPerformance))
            .map_err(at(CasePhase::StartProducer))?;
        ctx.producer = Some(self.coordinator.start_producer(
            Arc::clone(&self.env),
            Arc::clone(&case_env),
            producer,
            Arc::clone(&ctx.state),
        ));

        Self::enter(ctx, CasePhase::FreeProduction);
        tokio::time::sleep(Duration::from_secs(args.message_producing_free_time_secs)).await;

        Self::enter(ctx, CasePhase::BounceLoop);
        let injector = FaultInjector::new(Arc::clone(&self.env), timings.bounce_interval());
        let bounces = injector
            .inject_faults(&case_env, &ctx.registry, &BounceConfig::from_args(&args))
            .await
            .map_err(at(CasePhase::BounceLoop))?;
        ctx.bounces = Some(bounces);

        Self::enter(ctx, CasePhase::StopProducer);
        self.coordinator
            .stop_producer_and_await(&ctx.state)
            .await
            .map_err(at(CasePhase::StopProducer))?;

        Self::enter(ctx, CasePhase::StartConsumer);
        self.start_role(&case_env, ctx, Role::ConsoleConsumer)
            .await
            .map_err(at(CasePhase::StartConsumer))?;
        tokio::time::sleep(timings.consumer_settle()).await;

        Self::enter(ctx, CasePhase::StopCluster);
        for role in [Role::Broker, Role::Zookeeper] {
            self.stop_role(&case_env, ctx, role)
                .await
                .map_err(at(CasePhase::StopCluster))?;
        }

        Self::enter(ctx, CasePhase::ForceTerminate);
        self.env
            .force_terminate_matching(&case_env, &case_env.signature())
            .await
            .map_err(at(CasePhase::ForceTerminate))?;

        Self::enter(ctx, CasePhase::CollectLogs);
        self.env
            .collect_remote_logs(&case_env)
            .await
            .map_err(at(CasePhase::CollectLogs))?;

        Self::enter(ctx, CasePhase::Validate);
        let data = self
            .env
            .validate_data_equivalence(&case_env)
            .await
            .map_err(at(CasePhase::Validate))?;
        let checksums = self
            .env
            .validate_checksum_equivalence(&case_env)
            .await
            .map_err(at(CasePhase::Validate))?;
        for check in [data, checksums] {
            if check.passed {
                info!(component = "Orchestrator", check = %check.name, detail = %check.detail, "Validation passed");
            } else {
                warn!(component = "Orchestrator", check = %check.name, detail = %check.detail, "Validation failed");
            }
            ctx.validations.push(check);
        }

        // Attempted whatever the validation outcome.
        Self::enter(ctx, CasePhase::RenderGraphs);
        self.env
            .render_graphs(&case_env)
            .await
            .map_err(at(CasePhase::RenderGraphs))?;
        self.env
            .render_dashboards(&case_env)
            .await
            .map_err(at(CasePhase::RenderGraphs))?;

        Ok(())
    }

    async fn start_role(
        &self,
        case: &CaseEnv,
        ctx: &CaseContext,
        role: Role,
    ) -> HarnessResult<()> {
        let entities = ctx.registry.entities_of(role);
        if entities.is_empty() {
            warn!(component = "Orchestrator", %role, "No entities of role to start");
        }
        for entity in entities {
            let handle = self.env.start_entity(case, &entity).await?;
            info!(
                component = "Orchestrator",
                entity = %entity.id,
                %role,
                host = %entity.host,
                %handle,
                "Started entity"
            );
            ctx.registry.record_handle(&entity.id, handle)?;
        }
        Ok(())
    }

    async fn stop_role(&self, case: &CaseEnv, ctx: &CaseContext, role: Role) -> HarnessResult<()> {
        for entity in ctx.registry.entities_of(role) {
            if let Some(handle) = entity.handle {
                self.env.stop_entity(case, &entity, handle).await?;
                ctx.registry.clear_handle(&entity.id)?;
                info!(component = "Orchestrator", entity = %entity.id, %role, "Stopped entity");
            }
        }
        Ok(())
    }

    /// Stop the producer task and every running entity, then sweep by signature.
    ///
    /// Never fails; problems are logged and listed in the summary. Safe to
    /// call more than once.
    pub async fn teardown(&self, ctx: &mut CaseContext) -> TeardownSummary {
        let mut summary = TeardownSummary::default();

        if let Some(producer) = ctx.producer.take() {
            summary.producer = producer
                .shutdown(self.settings.timings.producer_grace())
                .await;
        }

        let Some(case) = ctx.env.clone() else {
            info!(component = "Orchestrator", "Nothing started, teardown has no work");
            return summary;
        };

        for role in Role::TEARDOWN_ORDER {
            for entity in ctx.registry.entities_of(role) {
                let Some(handle) = entity.handle else {
                    continue;
                };
                match self.env.stop_entity(&case, &entity, handle).await {
                    Ok(()) => summary.stopped.push(format!("{role}-{}", entity.id)),
                    Err(e) => {
                        error!(component = "Orchestrator", entity = %entity.id, error = %e, "Teardown stop failed");
                        summary.errors.push(e.to_string());
                    }
                }
                if let Err(e) = ctx.registry.clear_handle(&entity.id) {
                    summary.errors.push(e.to_string());
                }
            }
        }

        if let Err(e) = self
            .env
            .force_terminate_matching(&case, &case.signature())
            .await
        {
            error!(component = "Orchestrator", error = %e, "Teardown force terminate failed");
            summary.errors.push(e.to_string());
        }

        info!(
            component = "Orchestrator",
            stopped = summary.stopped.len(),
            errors = summary.errors.len(),
            "Teardown complete"
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_names_are_unique_snake_case() {
        let names: std::collections::HashSet<_> =
            CasePhase::ALL.iter().map(CasePhase::as_str).collect();
        assert_eq!(names.len(), CasePhase::ALL.len());
        assert_eq!(CasePhase::StartBrokers.to_string(), "start_brokers");
        assert_eq!(
            serde_json::to_string(&CasePhase::BounceLoop).unwrap(),
            "\"bounce_loop\""
        );
    }

    #[test]
    fn test_phase_wrapper_keeps_source() {
        let err = at(CasePhase::CreateTopics)(HarnessError::SetupFailed("zk down".into()));
        assert_eq!(err.phase(), Some(CasePhase::CreateTopics));
        assert!(err.chain().contains("zk down"));
    }
}
