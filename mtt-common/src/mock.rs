//! In-process test environment: records every call, hands out fresh process
//! handles and fails on demand.
//!
//! Timestamps come from [`tokio::time::Instant`], so under a paused runtime
//! tests can assert exact virtual durations between calls.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::environment::{CaseEnv, TestEnvironment, ValidationCheck};
use crate::errors::{HarnessError, HarnessResult};
use crate::types::{Entity, EntityId, ProcessHandle, Role};
use crate::validation::{CHECKSUM_CHECK, DATA_CHECK};

/// First handle handed out; later ones count up.
const FIRST_HANDLE: u32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MockCallKind {
    PrepareLogDirs,
    GenerateProperties,
    StartEntity,
    StopEntity,
    CreateTopics,
    ProducerRound,
    ForceTerminate,
    CollectLogs,
    ValidateData,
    ValidateChecksum,
    RenderGraphs,
    RenderDashboards,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    PrepareLogDirs,
    GenerateProperties,
    Start {
        entity: EntityId,
        role: Role,
        handle: ProcessHandle,
    },
    Stop {
        entity: EntityId,
        role: Role,
        handle: ProcessHandle,
        /// False when the handle was already gone; such a stop is a no-op.
        was_running: bool,
    },
    CreateTopics,
    ProducerRound { entity: EntityId },
    ForceTerminate { signature: String },
    CollectLogs,
    ValidateData,
    ValidateChecksum,
    RenderGraphs,
    RenderDashboards,
}

impl MockCall {
    pub fn kind(&self) -> MockCallKind {
        match self {
            Self::PrepareLogDirs => MockCallKind::PrepareLogDirs,
            Self::GenerateProperties => MockCallKind::GenerateProperties,
            Self::Start { .. } => MockCallKind::StartEntity,
            Self::Stop { .. } => MockCallKind::StopEntity,
            Self::CreateTopics => MockCallKind::CreateTopics,
            Self::ProducerRound { .. } => MockCallKind::ProducerRound,
            Self::ForceTerminate { .. } => MockCallKind::ForceTerminate,
            Self::CollectLogs => MockCallKind::CollectLogs,
            Self::ValidateData => MockCallKind::ValidateData,
            Self::ValidateChecksum => MockCallKind::ValidateChecksum,
            Self::RenderGraphs => MockCallKind::RenderGraphs,
            Self::RenderDashboards => MockCallKind::RenderDashboards,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MockEvent {
    pub at: Instant,
    pub case: String,
    pub call: MockCall,
}

#[derive(Debug, Clone)]
struct ScriptedFailure {
    case: Option<String>,
    kind: MockCallKind,
    role: Option<Role>,
}

impl ScriptedFailure {
    fn matches(&self, case: &str, kind: MockCallKind, role: Option<Role>) -> bool {
        self.kind == kind
            && self.case.as_deref().is_none_or(|c| c == case)
            && (self.role.is_none() || self.role == role)
    }
}

/// Use behind an `Arc`; every method takes `&self`.
#[derive(Debug)]
pub struct MockEnvironment {
    events: Mutex<Vec<MockEvent>>,
    next_handle: AtomicU32,
    /// Live handle → owning test case.
    live: Mutex<HashMap<ProcessHandle, String>>,
    failures: Mutex<Vec<ScriptedFailure>>,
    data_matches: AtomicBool,
    checksums_match: AtomicBool,
    producer_round: Mutex<Duration>,
}

impl Default for MockEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEnvironment {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            next_handle: AtomicU32::new(FIRST_HANDLE),
            live: Mutex::new(HashMap::new()),
            failures: Mutex::new(Vec::new()),
            data_matches: AtomicBool::new(true),
            checksums_match: AtomicBool::new(true),
            producer_round: Mutex::new(Duration::from_secs(1)),
        }
    }

    /// Fail every call of `kind`, in any test case.
    pub fn fail_on(&self, kind: MockCallKind) {
        self.push_failure(None, kind, None);
    }

    /// Fail every call of `kind` made for test case `case`.
    pub fn fail_in_case(&self, case: &str, kind: MockCallKind) {
        self.push_failure(Some(case.to_string()), kind, None);
    }

    /// Fail starting entities of `role`, optionally only in `case`.
    pub fn fail_start_of(&self, case: Option<&str>, role: Role) {
        self.push_failure(
            case.map(str::to_string),
            MockCallKind::StartEntity,
            Some(role),
        );
    }

    fn push_failure(&self, case: Option<String>, kind: MockCallKind, role: Option<Role>) {
        self.failures
            .lock()
            .expect("mock failures mutex poisoned")
            .push(ScriptedFailure { case, kind, role });
    }

    pub fn set_validation(&self, data_matches: bool, checksums_match: bool) {
        self.data_matches.store(data_matches, Ordering::SeqCst);
        self.checksums_match.store(checksums_match, Ordering::SeqCst);
    }

    /// How long one producer round takes.
    pub fn set_producer_round(&self, duration: Duration) {
        *self
            .producer_round
            .lock()
            .expect("mock producer_round mutex poisoned") = duration;
    }

    pub fn events(&self) -> Vec<MockEvent> {
        self.events.lock().expect("mock events mutex poisoned").clone()
    }

    pub fn calls_for(&self, case: &str) -> Vec<MockCall> {
        self.events()
            .into_iter()
            .filter(|e| e.case == case)
            .map(|e| e.call)
            .collect()
    }

    pub fn count(&self, case: &str, kind: MockCallKind) -> usize {
        self.calls_for(case)
            .iter()
            .filter(|c| c.kind() == kind)
            .count()
    }

    /// Handles started and not yet stopped, across all cases.
    pub fn live_handles(&self) -> Vec<ProcessHandle> {
        let mut handles: Vec<_> = self
            .live
            .lock()
            .expect("mock live mutex poisoned")
            .keys()
            .copied()
            .collect();
        handles.sort_by_key(|h| h.0);
        handles
    }

    fn record(&self, case: &CaseEnv, call: MockCall) {
        self.events
            .lock()
            .expect("mock events mutex poisoned")
            .push(MockEvent {
                at: Instant::now(),
                case: case.name().to_string(),
                call,
            });
    }

    fn check(&self, case: &CaseEnv, kind: MockCallKind, role: Option<Role>) -> HarnessResult<()> {
        let failing = self
            .failures
            .lock()
            .expect("mock failures mutex poisoned")
            .iter()
            .any(|f| f.matches(case.name(), kind, role));
        if failing {
            return Err(HarnessError::SetupFailed(format!(
                "scripted mock failure for {kind:?} in {}",
                case.name()
            )));
        }
        Ok(())
    }

    fn simple(&self, case: &CaseEnv, call: MockCall) -> HarnessResult<()> {
        let kind = call.kind();
        self.record(case, call);
        self.check(case, kind, None)
    }
}

impl TestEnvironment for MockEnvironment {
    async fn prepare_log_dirs(&self, case: &CaseEnv) -> HarnessResult<()> {
        self.simple(case, MockCall::PrepareLogDirs)
    }

    async fn generate_properties(&self, case: &CaseEnv) -> HarnessResult<()> {
        self.simple(case, MockCall::GenerateProperties)
    }

    async fn start_entity(&self, case: &CaseEnv, entity: &Entity) -> HarnessResult<ProcessHandle> {
        self.check(case, MockCallKind::StartEntity, Some(entity.role))
            .map_err(|e| HarnessError::StartFailed {
                entity: entity.id.clone(),
                role: entity.role,
                host: entity.host.clone(),
                reason: e.to_string(),
            })?;
        let handle = ProcessHandle(self.next_handle.fetch_add(1, Ordering::SeqCst));
        self.live
            .lock()
            .expect("mock live mutex poisoned")
            .insert(handle, case.name().to_string());
        self.record(
            case,
            MockCall::Start {
                entity: entity.id.clone(),
                role: entity.role,
                handle,
            },
        );
        Ok(handle)
    }

    async fn stop_entity(
        &self,
        case: &CaseEnv,
        entity: &Entity,
        handle: ProcessHandle,
    ) -> HarnessResult<()> {
        let was_running = self
            .live
            .lock()
            .expect("mock live mutex poisoned")
            .remove(&handle)
            .is_some();
        self.record(
            case,
            MockCall::Stop {
                entity: entity.id.clone(),
                role: entity.role,
                handle,
                was_running,
            },
        );
        self.check(case, MockCallKind::StopEntity, Some(entity.role))
            .map_err(|e| HarnessError::StopFailed {
                entity: entity.id.clone(),
                reason: e.to_string(),
            })
    }

    async fn create_topics(&self, case: &CaseEnv) -> HarnessResult<()> {
        self.simple(case, MockCall::CreateTopics)
    }

    async fn run_producer_round(&self, case: &CaseEnv, entity: &Entity) -> HarnessResult<()> {
        let round = *self
            .producer_round
            .lock()
            .expect("mock producer_round mutex poisoned");
        tokio::time::sleep(round).await;
        self.simple(
            case,
            MockCall::ProducerRound {
                entity: entity.id.clone(),
            },
        )
    }

    async fn force_terminate_matching(&self, case: &CaseEnv, signature: &str) -> HarnessResult<()> {
        self.live
            .lock()
            .expect("mock live mutex poisoned")
            .retain(|_, owner| owner != case.name());
        self.simple(
            case,
            MockCall::ForceTerminate {
                signature: signature.to_string(),
            },
        )
    }

    async fn collect_remote_logs(&self, case: &CaseEnv) -> HarnessResult<()> {
        self.simple(case, MockCall::CollectLogs)
    }

    async fn validate_data_equivalence(&self, case: &CaseEnv) -> HarnessResult<ValidationCheck> {
        self.simple(case, MockCall::ValidateData)?;
        Ok(if self.data_matches.load(Ordering::SeqCst) {
            ValidationCheck::passed(DATA_CHECK, "mock")
        } else {
            ValidationCheck::failed(DATA_CHECK, "mock: messages missing")
        })
    }

    async fn validate_checksum_equivalence(
        &self,
        case: &CaseEnv,
    ) -> HarnessResult<ValidationCheck> {
        self.simple(case, MockCall::ValidateChecksum)?;
        Ok(if self.checksums_match.load(Ordering::SeqCst) {
            ValidationCheck::passed(CHECKSUM_CHECK, "mock")
        } else {
            ValidationCheck::failed(CHECKSUM_CHECK, "mock: checksum mismatch")
        })
    }

    async fn render_graphs(&self, case: &CaseEnv) -> HarnessResult<()> {
        self.simple(case, MockCall::RenderGraphs)
    }

    async fn render_dashboards(&self, case: &CaseEnv) -> HarnessResult<()> {
        self.simple(case, MockCall::RenderDashboards)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::ClusterConfig;
    use crate::testcase::{TestCase, TestCaseArgs, TestCaseDefinition};
    use std::path::PathBuf;

    fn case_env(name: &str) -> CaseEnv {
        CaseEnv::new(
            TestCase::from_dir(PathBuf::from("/suite").join(name)),
            TestCaseDefinition::default(),
            TestCaseArgs {
                num_iteration: 0,
                bounced_entity_downtime_secs: 1,
                message_producing_free_time_secs: 0,
                bounce_migration_tool: false,
            },
            ClusterConfig::default(),
            PathBuf::from("/suite"),
        )
    }

    #[tokio::test]
    async fn test_handles_cycle_and_stale_stop_is_noop() {
        let mock = MockEnvironment::new();
        let case = case_env("testcase_1");
        let tool = Entity::new("3", Role::MigrationTool, "localhost");

        let first = mock.start_entity(&case, &tool).await.unwrap();
        let second = mock.start_entity(&case, &tool).await.unwrap();
        assert_ne!(first, second);

        mock.stop_entity(&case, &tool, first).await.unwrap();
        mock.stop_entity(&case, &tool, first).await.unwrap();
        let stops: Vec<bool> = mock
            .calls_for("testcase_1")
            .into_iter()
            .filter_map(|c| match c {
                MockCall::Stop { was_running, .. } => Some(was_running),
                _ => None,
            })
            .collect();
        assert_eq!(stops, vec![true, false]);
        assert_eq!(mock.live_handles(), vec![second]);
    }

    #[tokio::test]
    async fn test_scripted_failures_are_scoped() {
        let mock = MockEnvironment::new();
        mock.fail_in_case("testcase_2", MockCallKind::CreateTopics);
        mock.fail_start_of(None, Role::Broker);

        assert!(mock.create_topics(&case_env("testcase_1")).await.is_ok());
        assert!(mock.create_topics(&case_env("testcase_2")).await.is_err());

        let case = case_env("testcase_1");
        let broker = Entity::new("1", Role::Broker, "h");
        let zk = Entity::new("0", Role::Zookeeper, "h");
        assert!(matches!(
            mock.start_entity(&case, &broker).await,
            Err(HarnessError::StartFailed { .. })
        ));
        assert!(mock.start_entity(&case, &zk).await.is_ok());
    }

    #[tokio::test]
    async fn test_force_terminate_clears_case_handles() {
        let mock = MockEnvironment::new();
        let one = case_env("testcase_1");
        let two = case_env("testcase_2");
        let zk = Entity::new("0", Role::Zookeeper, "h");
        mock.start_entity(&one, &zk).await.unwrap();
        let kept = mock.start_entity(&two, &zk).await.unwrap();

        mock.force_terminate_matching(&one, &one.signature())
            .await
            .unwrap();
        assert_eq!(mock.live_handles(), vec![kept]);
    }

    #[tokio::test]
    async fn test_validation_results_follow_script() {
        let mock = MockEnvironment::new();
        let case = case_env("testcase_1");
        mock.set_validation(true, false);
        assert!(mock.validate_data_equivalence(&case).await.unwrap().passed);
        assert!(!mock.validate_checksum_equivalence(&case).await.unwrap().passed);
    }
}
