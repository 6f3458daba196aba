//! Cluster topology: which entity runs where, in which role.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{HarnessError, HarnessResult};
use crate::types::Role;

/// File name of a cluster configuration, at suite or test-case level.
pub const CLUSTER_CONFIG_FILE: &str = "cluster_config.json";

/// One entity entry of `cluster_config.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterEntityConfig {
    pub entity_id: String,
    pub hostname: String,
    pub role: Role,
    /// `source` or `target` for migration topologies.
    #[serde(default = "default_cluster_name")]
    pub cluster_name: String,
    #[serde(default = "default_kafka_home")]
    pub kafka_home: String,
    #[serde(default = "default_java_home")]
    pub java_home: String,
    #[serde(default)]
    pub jmx_port: Option<String>,
}

fn default_cluster_name() -> String {
    "source".to_string()
}

fn default_kafka_home() -> String {
    "default".to_string()
}

fn default_java_home() -> String {
    "default".to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    #[serde(rename = "cluster_config")]
    pub entities: Vec<ClusterEntityConfig>,
}

impl ClusterConfig {
    pub fn load(path: &Path) -> HarnessResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| HarnessError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self =
            serde_json::from_str(&content).map_err(|source| HarnessError::ParseJson {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Use the test case's own cluster configuration when present, else the suite's.
    pub fn for_testcase(suite: &ClusterConfig, testcase_dir: &Path) -> HarnessResult<Self> {
        let local = testcase_dir.join(CLUSTER_CONFIG_FILE);
        if local.is_file() {
            tracing::info!(
                component = "ClusterConfig",
                path = %local.display(),
                "Using test case level cluster configuration"
            );
            Self::load(&local)
        } else {
            Ok(suite.clone())
        }
    }

    fn validate(&self) -> HarnessResult<()> {
        let mut seen = std::collections::HashSet::new();
        for entity in &self.entities {
            if entity.entity_id.trim().is_empty() {
                return Err(HarnessError::SetupFailed(
                    "cluster entity with empty entity_id".to_string(),
                ));
            }
            if !seen.insert(entity.entity_id.as_str()) {
                return Err(HarnessError::SetupFailed(format!(
                    "entity_id {} appears twice in cluster configuration",
                    entity.entity_id
                )));
            }
        }
        Ok(())
    }

    pub fn entity(&self, entity_id: &str) -> Option<&ClusterEntityConfig> {
        self.entities.iter().find(|e| e.entity_id == entity_id)
    }

    pub fn of_role(&self, role: Role) -> impl Iterator<Item = &ClusterEntityConfig> {
        self.entities.iter().filter(move |e| e.role == role)
    }

    /// Distinct hosts, in first-seen order.
    pub fn hosts(&self) -> Vec<String> {
        let mut hosts: Vec<String> = Vec::new();
        for entity in &self.entities {
            if !hosts.contains(&entity.hostname) {
                hosts.push(entity.hostname.clone());
            }
        }
        hosts
    }
}

/// Locate the suite-level cluster configuration.
pub fn suite_cluster_config_path(suite_dir: &Path, explicit: Option<&Path>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(|| suite_dir.join(CLUSTER_CONFIG_FILE))
}
