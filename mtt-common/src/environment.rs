//! The seam between the orchestration engine and the outside world.
//!
//! [`TestEnvironment`] covers everything the engine asks of remote hosts and
//! local tooling: process control, property generation, log collection,
//! validation and rendering. [`crate::ssh::SshEnvironment`] drives real hosts;
//! [`crate::mock::MockEnvironment`] records calls for tests and dry runs.

use std::future::Future;
use std::path::PathBuf;

use serde::Serialize;

use crate::cluster::ClusterConfig;
use crate::errors::HarnessResult;
use crate::testcase::{TestCase, TestCaseArgs, TestCaseDefinition};
use crate::types::{Entity, ProcessHandle};

/// Everything a collaborator needs to know about the test case being run.
#[derive(Debug, Clone)]
pub struct CaseEnv {
    pub case: TestCase,
    pub definition: TestCaseDefinition,
    pub args: TestCaseArgs,
    pub cluster: ClusterConfig,
    pub suite_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub dashboards_dir: PathBuf,
    /// Generated per-entity property files.
    pub config_dir: PathBuf,
}

impl CaseEnv {
    pub fn new(
        case: TestCase,
        definition: TestCaseDefinition,
        args: TestCaseArgs,
        cluster: ClusterConfig,
        suite_dir: PathBuf,
    ) -> Self {
        let logs_dir = case.dir.join("logs");
        let dashboards_dir = case.dir.join("dashboards");
        let config_dir = case.dir.join("config");
        Self {
            case,
            definition,
            args,
            cluster,
            suite_dir,
            logs_dir,
            dashboards_dir,
            config_dir,
        }
    }

    pub fn name(&self) -> &str {
        &self.case.name
    }

    /// Base property templates shared by every case of the suite.
    pub fn base_config_dir(&self) -> PathBuf {
        self.suite_dir.join("config")
    }

    /// `logs/<role>-<id>`, same layout locally and on the remote host.
    pub fn entity_log_dir(&self, entity: &Entity) -> PathBuf {
        self.logs_dir.join(format!("{}-{}", entity.role, entity.id))
    }

    pub fn entity_log_file(&self, entity: &Entity) -> PathBuf {
        let file_name = self
            .definition
            .entity(entity.id.as_str())
            .and_then(|e| e.log_filename.clone())
            .unwrap_or_else(|| format!("{}_{}.log", entity.role, entity.id));
        self.entity_log_dir(entity).join(file_name)
    }

    pub fn entity_config_file(&self, entity: &Entity) -> PathBuf {
        self.config_dir
            .join(crate::properties::config_filename_for(
                &self.definition,
                entity.role,
                entity.id.as_str(),
            ))
    }

    /// Text present in the command line of every process this case launched.
    pub fn signature(&self) -> String {
        self.config_dir.display().to_string()
    }
}

/// Outcome of one equivalence check. A failed check is a result, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationCheck {
    pub name: String,
    pub passed: bool,
    pub detail: String,
}

impl ValidationCheck {
    pub fn passed(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: true,
            detail: detail.into(),
        }
    }

    pub fn failed(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: false,
            detail: detail.into(),
        }
    }
}

/// Remote entity control plus the external tooling around a test case.
///
/// Implementations must make [`TestEnvironment::stop_entity`] safe to call on
/// a process that is already gone.
pub trait TestEnvironment: Send + Sync + 'static {
    /// Create local log directories and clear stale remote data and log directories.
    fn prepare_log_dirs(&self, case: &CaseEnv) -> impl Future<Output = HarnessResult<()>> + Send;

    /// Write the overridden per-entity property files.
    fn generate_properties(
        &self,
        case: &CaseEnv,
    ) -> impl Future<Output = HarnessResult<()>> + Send;

    /// Launch an entity in the background and return its parent process id.
    fn start_entity(
        &self,
        case: &CaseEnv,
        entity: &Entity,
    ) -> impl Future<Output = HarnessResult<ProcessHandle>> + Send;

    fn stop_entity(
        &self,
        case: &CaseEnv,
        entity: &Entity,
        handle: ProcessHandle,
    ) -> impl Future<Output = HarnessResult<()>> + Send;

    fn create_topics(&self, case: &CaseEnv) -> impl Future<Output = HarnessResult<()>> + Send;

    /// Run one bounded batch of the producer entity and wait for it to exit.
    fn run_producer_round(
        &self,
        case: &CaseEnv,
        entity: &Entity,
    ) -> impl Future<Output = HarnessResult<()>> + Send;

    /// Kill anything on any host whose command line still carries `signature`.
    fn force_terminate_matching(
        &self,
        case: &CaseEnv,
        signature: &str,
    ) -> impl Future<Output = HarnessResult<()>> + Send;

    fn collect_remote_logs(&self, case: &CaseEnv)
    -> impl Future<Output = HarnessResult<()>> + Send;

    /// Every produced message id was consumed from the target cluster.
    fn validate_data_equivalence(
        &self,
        case: &CaseEnv,
    ) -> impl Future<Output = HarnessResult<ValidationCheck>> + Send;

    /// Log segments of source and target brokers hold the same bytes.
    fn validate_checksum_equivalence(
        &self,
        case: &CaseEnv,
    ) -> impl Future<Output = HarnessResult<ValidationCheck>> + Send;

    fn render_graphs(&self, case: &CaseEnv) -> impl Future<Output = HarnessResult<()>> + Send;

    fn render_dashboards(&self, case: &CaseEnv)
    -> impl Future<Output = HarnessResult<()>> + Send;
}
