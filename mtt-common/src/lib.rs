//! Migration tool system test engine.
//!
//! Discovers test cases in a suite directory and runs each one through a
//! fixed lifecycle: start a source and target cluster plus the migration
//! tool, produce messages in the background while the tool is bounced,
//! stop everything, then validate and report.

pub mod cluster;
pub mod config;
pub mod coordinator;
pub mod environment;
pub mod errors;
pub mod fault;
pub mod metrics;
pub mod mock;
pub mod orchestrator;
pub mod properties;
pub mod registry;
pub mod report;
pub mod ssh;
pub mod state;
pub mod testcase;
pub mod types;
pub mod validation;

pub use cluster::{CLUSTER_CONFIG_FILE, ClusterConfig, ClusterEntityConfig};
pub use config::{HarnessSettings, Timings};
pub use coordinator::{ProducerCoordinator, ProducerHandle, ProducerSummary};
pub use environment::{CaseEnv, TestEnvironment, ValidationCheck};
pub use errors::{HarnessError, HarnessResult};
pub use fault::{BounceRecord, BounceReport, FaultInjector};
pub use mock::{MockCall, MockCallKind, MockEnvironment};
pub use orchestrator::{CaseContext, CasePhase, Orchestrator};
pub use registry::EntityRegistry;
pub use report::{CaseOutcome, CaseReport, RunReport, TeardownSummary};
pub use ssh::SshEnvironment;
pub use state::SharedTestState;
pub use testcase::{BounceConfig, TestCase, TestCaseArgs, TestCaseDefinition, TestSelection};
pub use types::{Entity, EntityId, ProcessHandle, Role};
