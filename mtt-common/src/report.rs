//! Per-case outcomes and the run report.

use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::coordinator::ProducerSummary;
use crate::environment::ValidationCheck;
use crate::errors::HarnessResult;
use crate::fault::BounceReport;
use crate::orchestrator::CasePhase;

/// Result of one test case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum CaseOutcome {
    Passed,
    Failed(String),
    Skipped(String),
    Described,
}

impl CaseOutcome {
    /// Upper-case name used in the summary table and in [`RunReport::count`].
    pub fn label(&self) -> &'static str {
        match self {
            Self::Passed => "PASSED",
            Self::Failed(_) => "FAILED",
            Self::Skipped(_) => "SKIPPED",
            Self::Described => "DESCRIBED",
        }
    }

    /// Skipped and described cases are not failures.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// What the guaranteed teardown did for a case.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TeardownSummary {
    /// Entity ids stopped, in teardown order.
    pub stopped: Vec<String>,
    /// Errors collected instead of raised.
    pub errors: Vec<String>,
    /// `None` when no producer ran or the task had to be aborted.
    pub producer: Option<ProducerSummary>,
}

/// Per-case entry of a [`RunReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaseReport {
    pub name: String,
    pub outcome: CaseOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_phase: Option<CasePhase>,
    pub validations: Vec<ValidationCheck>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounces: Option<BounceReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub teardown: Option<TeardownSummary>,
    /// Wall-clock time spent on the case, teardown included.
    pub duration_ms: u64,
}

impl CaseReport {
    pub fn new(name: impl Into<String>, outcome: CaseOutcome) -> Self {
        Self {
            name: name.into(),
            outcome,
            failed_phase: None,
            validations: Vec::new(),
            bounces: None,
            teardown: None,
            duration_ms: 0,
        }
    }
}

/// Everything one `mtt run` did, serializable as JSON.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Set when Ctrl-C ended the run early.
    pub interrupted: bool,
    pub cases: Vec<CaseReport>,
}

impl Default for RunReport {
    fn default() -> Self {
        Self::new()
    }
}

impl RunReport {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            interrupted: false,
            cases: Vec::new(),
        }
    }

    /// Stamp the finish time.
    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    /// True when nothing failed and the run was not interrupted.
    pub fn all_passed(&self) -> bool {
        !self.interrupted && !self.cases.iter().any(|c| c.outcome.is_failure())
    }

    /// Number of cases whose outcome has this label.
    pub fn count(&self, label: &str) -> usize {
        self.cases.iter().filter(|c| c.outcome.label() == label).count()
    }

    /// Write the report as pretty JSON, creating parent directories.
    pub fn write_json(&self, path: &Path) -> HarnessResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Plain-text table, one line per case.
    pub fn print_summary(&self, out: &mut impl Write) -> std::io::Result<()> {
        writeln!(out, "Run {}", self.run_id)?;
        for case in &self.cases {
            let detail = match &case.outcome {
                CaseOutcome::Failed(reason) => match case.failed_phase {
                    Some(phase) => format!("{phase}: {reason}"),
                    None => reason.clone(),
                },
                CaseOutcome::Skipped(reason) => reason.clone(),
                _ => String::new(),
            };
            writeln!(
                out,
                "  {:<24} {:<10} {:>8}ms  {}",
                case.name,
                case.outcome.label(),
                case.duration_ms,
                detail
            )?;
        }
        writeln!(
            out,
            "{} passed, {} failed, {} skipped, {} described{}",
            self.count("PASSED"),
            self.count("FAILED"),
            self.count("SKIPPED"),
            self.count("DESCRIBED"),
            if self.interrupted { " (interrupted)" } else { "" }
        )
    }
}
