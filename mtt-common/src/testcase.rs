//! Test case definitions, arguments, discovery and run/skip selection.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{HarnessError, HarnessResult};
use crate::types::Role;

/// Directory-name prefix identifying test cases inside a suite.
pub const TESTCASE_PREFIX: &str = "testcase_";

/// Skip list file at the suite root.
pub const SKIP_LIST_FILE: &str = "testcase_to_skip.json";

/// Run list file at the suite root.
pub const RUN_LIST_FILE: &str = "testcase_to_run.json";

/// Downtime applied to a bounced entity when none (or garbage) is configured.
pub const DEFAULT_BOUNCED_ENTITY_DOWNTIME_SECS: u64 = 1;

/// One entity entry of a test case properties file.
///
/// Keys other than the named ones are property overrides for the entity's
/// generated configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCaseEntity {
    pub entity_id: String,
    #[serde(default)]
    pub config_filename: Option<String>,
    #[serde(default)]
    pub log_filename: Option<String>,
    #[serde(flatten)]
    pub overrides: BTreeMap<String, String>,
}

/// Parsed `testcase_<n>_properties.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestCaseDefinition {
    #[serde(default)]
    pub description: BTreeMap<String, Value>,
    #[serde(default)]
    pub testcase_args: BTreeMap<String, Value>,
    #[serde(default)]
    pub entities: Vec<TestCaseEntity>,
}

impl TestCaseDefinition {
    /// Text value of a test case argument; numbers and booleans are stringified.
    pub fn arg(&self, name: &str) -> Option<String> {
        self.testcase_args.get(name).map(|value| match value {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        })
    }

    pub fn entity(&self, entity_id: &str) -> Option<&TestCaseEntity> {
        self.entities.iter().find(|e| e.entity_id == entity_id)
    }
}

/// Arguments controlling the bounce loop and producer timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TestCaseArgs {
    pub num_iteration: u32,
    pub bounced_entity_downtime_secs: u64,
    pub message_producing_free_time_secs: u64,
    pub bounce_migration_tool: bool,
}

impl TestCaseArgs {
    pub fn from_definition(definition: &TestCaseDefinition) -> HarnessResult<Self> {
        let num_iteration = required_number(definition, "num_iteration")?;
        let num_iteration = u32::try_from(num_iteration).map_err(|_| {
            HarnessError::InvalidArgument {
                name: "num_iteration".to_string(),
                value: num_iteration.to_string(),
            }
        })?;
        let message_producing_free_time_secs =
            required_number(definition, "message_producing_free_time_sec")?;

        // Optional; anything missing or unparsable falls back to the default.
        let bounced_entity_downtime_secs = definition
            .arg("bounced_entity_downtime_sec")
            .and_then(|text| text.trim().parse::<u64>().ok())
            .unwrap_or(DEFAULT_BOUNCED_ENTITY_DOWNTIME_SECS);

        let bounce_migration_tool = definition
            .arg("bounce_migration_tool")
            .ok_or_else(|| HarnessError::MissingArgument("bounce_migration_tool".to_string()))?
            .trim()
            .eq_ignore_ascii_case("true");

        Ok(Self {
            num_iteration,
            bounced_entity_downtime_secs,
            message_producing_free_time_secs,
            bounce_migration_tool,
        })
    }
}

fn required_number(definition: &TestCaseDefinition, name: &str) -> HarnessResult<u64> {
    let text = definition
        .arg(name)
        .ok_or_else(|| HarnessError::MissingArgument(name.to_string()))?;
    text.trim()
        .parse::<u64>()
        .map_err(|_| HarnessError::InvalidArgument {
            name: name.to_string(),
            value: text,
        })
}

/// Bounce loop configuration derived from the test case arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BounceConfig {
    pub iterations: u32,
    pub downtime_secs: u64,
    pub enabled: bool,
    pub target: Role,
}

impl BounceConfig {
    pub fn from_args(args: &TestCaseArgs) -> Self {
        Self {
            iterations: args.num_iteration,
            downtime_secs: args.bounced_entity_downtime_secs,
            enabled: args.bounce_migration_tool,
            target: Role::MigrationTool,
        }
    }
}

/// One discovered test case. The definition is loaded lazily so a broken
/// properties file fails that case only.
#[derive(Debug, Clone, PartialEq)]
pub struct TestCase {
    pub name: String,
    pub dir: PathBuf,
}

impl TestCase {
    pub fn from_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| dir.display().to_string());
        Self { name, dir }
    }

    pub fn properties_path(&self) -> PathBuf {
        self.dir.join(format!("{}_properties.json", self.name))
    }

    pub fn load_definition(&self) -> HarnessResult<TestCaseDefinition> {
        let path = self.properties_path();
        let content = std::fs::read_to_string(&path).map_err(|source| HarnessError::ReadFile {
            path: path.clone(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| HarnessError::ParseJson { path, source })
    }
}

/// Render a description block the way operators read it: one line per key, sorted.
pub fn format_description(name: &str, definition: &TestCaseDefinition) -> String {
    let mut out = format!("Test case: {name}\n");
    for (key, value) in &definition.description {
        let text = match value {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        out.push_str(&format!("  {key}: {text}\n"));
    }
    out
}

/// List test-case directories of a suite, sorted by name.
pub fn discover_testcase_dirs(suite_dir: &Path) -> HarnessResult<Vec<PathBuf>> {
    let entries = std::fs::read_dir(suite_dir).map_err(|source| HarnessError::ReadFile {
        path: suite_dir.to_path_buf(),
        source,
    })?;

    let mut dirs: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(TESTCASE_PREFIX))
        })
        .collect();
    dirs.sort();
    Ok(dirs)
}

/// What the engine does with a test case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    DescribeOnly,
    Skip(String),
    Run,
}

/// Skip list and run list, keyed by suite name then test-case name.
#[derive(Debug, Clone, Default)]
pub struct TestSelection {
    skip: HashSet<String>,
    run: Option<HashSet<String>>,
}

impl TestSelection {
    pub fn new(skip: impl IntoIterator<Item = String>, run: Option<Vec<String>>) -> Self {
        Self {
            skip: skip.into_iter().collect(),
            run: run.map(|names| names.into_iter().collect()),
        }
    }

    /// Load both lists for `suite_name`. Missing files mean "no restriction".
    pub fn load(
        suite_name: &str,
        skip_path: Option<&Path>,
        run_path: Option<&Path>,
    ) -> HarnessResult<Self> {
        let skip = match skip_path {
            Some(path) if path.is_file() => read_list(path, suite_name)?.unwrap_or_default(),
            _ => Vec::new(),
        };
        let run = match run_path {
            Some(path) if path.is_file() => read_list(path, suite_name)?,
            _ => None,
        };
        Ok(Self::new(skip, run))
    }

    pub fn disposition(&self, case_name: &str, describe_only: bool) -> Disposition {
        if describe_only {
            return Disposition::DescribeOnly;
        }
        if self.skip.contains(case_name) {
            return Disposition::Skip("listed in skip list".to_string());
        }
        match &self.run {
            Some(run) if !run.contains(case_name) => {
                Disposition::Skip("not listed in run list".to_string())
            }
            _ => Disposition::Run,
        }
    }
}

fn read_list(path: &Path, suite_name: &str) -> HarnessResult<Option<Vec<String>>> {
    let content = std::fs::read_to_string(path).map_err(|source| HarnessError::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;
    let lists: HashMap<String, Vec<String>> =
        serde_json::from_str(&content).map_err(|source| HarnessError::ParseJson {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(lists.get(suite_name).cloned())
}
