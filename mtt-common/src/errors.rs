//! Error types for the orchestration engine and its collaborators.

use std::path::PathBuf;
use std::time::Duration;

use crate::types::{EntityId, Role};

/// Error type for harness operations.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// A test case could not be prepared: bad settings, files or topology.
    #[error("Setup failed: {0}")]
    SetupFailed(String),

    /// Launching an entity failed or produced no process handle.
    #[error("Failed to start {entity} ({role}) on {host}: {reason}")]
    StartFailed {
        entity: EntityId,
        role: Role,
        host: String,
        reason: String,
    },

    /// Stopping a running entity failed.
    #[error("Failed to stop {entity}: {reason}")]
    StopFailed { entity: EntityId, reason: String },

    /// An ssh, scp or local shell command exited non-zero or could not spawn.
    #[error("Remote command on {host} failed: {reason}")]
    RemoteCommand { host: String, reason: String },

    /// A remote command exceeded the configured command timeout.
    #[error("Remote command on {host} timed out after {timeout:?}")]
    RemoteTimeout { host: String, timeout: Duration },

    /// The topology has no entity of a role the phase needs.
    #[error("No {0} entity registered for this test case")]
    NoEntityForRole(Role),

    /// An entity id absent from the registry.
    #[error("Entity not registered: {0}")]
    UnknownEntity(EntityId),

    /// Registering an entity id twice within one test case.
    #[error("Duplicate entity id: {0}")]
    DuplicateEntity(EntityId),

    /// The entity has no process handle, so it cannot be stopped or bounced.
    #[error("Entity {0} is not running")]
    EntityNotRunning(EntityId),

    /// A `testcase_args` value that does not parse.
    #[error("Invalid test case argument {name}: {value}")]
    InvalidArgument { name: String, value: String },

    /// A required `testcase_args` key is absent.
    #[error("Missing test case argument: {0}")]
    MissingArgument(String),

    #[error("Failed to read {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    ParseJson {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A property file line with no `=` or `:` separator.
    #[error("Invalid property line {line} in {path}")]
    InvalidProperty { path: PathBuf, line: usize },

    /// The optional acknowledgment timeout elapsed.
    ///
    /// Only raised when a timeout is configured; the default waits forever.
    #[error("Producer did not acknowledge stop within {0:?}")]
    AckTimeout(Duration),

    /// Error raised inside a case phase, tagged with that phase.
    #[error("Phase {phase} failed: {source}")]
    Phase {
        phase: crate::orchestrator::CasePhase,
        #[source]
        source: Box<HarnessError>,
    },

    /// Ctrl-C arrived while the named test case was running.
    #[error("Interrupted while running {0}")]
    Interrupted(String),

    /// Local filesystem or process error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl HarnessError {
    /// Phase in which this error surfaced, if it was raised by a case phase.
    pub fn phase(&self) -> Option<crate::orchestrator::CasePhase> {
        match self {
            Self::Phase { phase, .. } => Some(*phase),
            _ => None,
        }
    }

    /// Full cause chain rendered on one line, for logs and reports.
    pub fn chain(&self) -> String {
        let mut rendered = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            let text = cause.to_string();
            if !rendered.contains(&text) {
                rendered.push_str(": ");
                rendered.push_str(&text);
            }
            source = cause.source();
        }
        rendered
    }
}

/// Result type for harness operations.
pub type HarnessResult<T> = Result<T, HarnessError>;
