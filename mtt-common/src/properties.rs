//! Java-style `key=value` property files and per-test-case overrides.
//!
//! Base templates live in the suite's `config/` directory. Each entity of a
//! test case gets its own copy in `testcase_<n>/config/` with the overrides
//! from the test case properties applied on top.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::cluster::ClusterConfig;
use crate::errors::{HarnessError, HarnessResult};
use crate::testcase::TestCaseDefinition;
use crate::types::Role;

/// Client port used when a coordination node does not override it.
pub const DEFAULT_CLIENT_PORT: &str = "2181";

/// Ordered property list; keeps the template's line order when rewritten.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    entries: Vec<(String, String)>,
}

impl Properties {
    pub fn parse(content: &str, origin: &Path) -> HarnessResult<Self> {
        let mut entries = Vec::new();
        for (index, raw) in content.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }
            let (key, value) = line
                .split_once('=')
                .or_else(|| line.split_once(':'))
                .ok_or_else(|| HarnessError::InvalidProperty {
                    path: origin.to_path_buf(),
                    line: index + 1,
                })?;
            entries.push((key.trim().to_string(), value.trim().to_string()));
        }
        Ok(Self { entries })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Replace an existing key in place, or append it.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.entries {
            out.push_str(key);
            out.push('=');
            out.push_str(value);
            out.push('\n');
        }
        out
    }
}

pub fn load_properties(path: &Path) -> HarnessResult<Properties> {
    let content = std::fs::read_to_string(path).map_err(|source| HarnessError::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;
    Properties::parse(&content, path)
}

/// Template file in the suite's `config/` directory for a role.
pub fn template_for(role: Role) -> &'static str {
    match role {
        Role::Zookeeper => "zookeeper.properties",
        Role::Broker => "server.properties",
        Role::MigrationTool => "migration_tool.properties",
        Role::ProducerPerformance => "producer_performance.properties",
        Role::ConsoleConsumer => "console_consumer.properties",
    }
}

/// Name of the generated configuration file for an entity.
pub fn config_filename_for(definition: &TestCaseDefinition, role: Role, entity_id: &str) -> String {
    definition
        .entity(entity_id)
        .and_then(|e| e.config_filename.clone())
        .unwrap_or_else(|| format!("{role}_{entity_id}.properties"))
}

/// Coordination connect string per cluster name (`host:port,host:port`).
pub fn connect_strings(
    cluster: &ClusterConfig,
    definition: &TestCaseDefinition,
) -> BTreeMap<String, String> {
    let mut by_cluster: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for zk in cluster.of_role(Role::Zookeeper) {
        let port = definition
            .entity(&zk.entity_id)
            .and_then(|e| e.overrides.get("clientPort").cloned())
            .unwrap_or_else(|| DEFAULT_CLIENT_PORT.to_string());
        by_cluster
            .entry(zk.cluster_name.clone())
            .or_default()
            .push(format!("{}:{}", zk.hostname, port));
    }
    by_cluster
        .into_iter()
        .map(|(name, nodes)| (name, nodes.join(",")))
        .collect()
}

/// Overrides the engine derives from the topology rather than the test case file.
fn derived_overrides(
    role: Role,
    cluster_name: &str,
    connect: &BTreeMap<String, String>,
) -> Vec<(&'static str, String)> {
    let own = connect.get(cluster_name).cloned();
    let source = connect.get("source").cloned().or_else(|| own.clone());
    match role {
        Role::Zookeeper => Vec::new(),
        Role::Broker => own.map(|c| vec![("zookeeper.connect", c)]).unwrap_or_default(),
        Role::MigrationTool | Role::ProducerPerformance | Role::ConsoleConsumer => {
            source.map(|c| vec![("zk.connect", c)]).unwrap_or_default()
        }
    }
}

/// Write one overridden property file per cluster entity into `case_config_dir`.
///
/// Returns the generated paths in cluster order.
pub fn apply_overrides(
    base_config_dir: &Path,
    case_config_dir: &Path,
    cluster: &ClusterConfig,
    definition: &TestCaseDefinition,
) -> HarnessResult<Vec<PathBuf>> {
    std::fs::create_dir_all(case_config_dir)?;
    let connect = connect_strings(cluster, definition);
    let mut generated = Vec::with_capacity(cluster.entities.len());

    for entity in &cluster.entities {
        let template = base_config_dir.join(template_for(entity.role));
        let mut props = if template.is_file() {
            load_properties(&template)?
        } else {
            tracing::debug!(
                component = "Properties",
                template = %template.display(),
                "No template for role, starting from empty properties"
            );
            Properties::default()
        };

        for (key, value) in derived_overrides(entity.role, &entity.cluster_name, &connect) {
            props.set(key, value);
        }
        if let Some(case_entity) = definition.entity(&entity.entity_id) {
            for (key, value) in &case_entity.overrides {
                props.set(key.clone(), value.clone());
            }
        }

        let file_name = config_filename_for(definition, entity.role, &entity.entity_id);
        let path = case_config_dir.join(file_name);
        std::fs::write(&path, props.render())?;
        generated.push(path);
    }

    Ok(generated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_skips_comments_and_keeps_order() {
        let props = Properties::parse(
            "# comment\nclientPort=2181\n\ndataDir = /tmp/zk\nmaxClientCnxns: 0\n",
            Path::new("zookeeper.properties"),
        )
        .unwrap();
        assert_eq!(props.len(), 3);
        assert_eq!(props.get("dataDir"), Some("/tmp/zk"));
        assert_eq!(props.get("maxClientCnxns"), Some("0"));
        assert!(props.render().starts_with("clientPort=2181\n"));
    }

    #[test]
    fn test_parse_rejects_garbage_line() {
        let err = Properties::parse("ok=1\njust words\n", Path::new("x.properties")).unwrap_err();
        assert!(matches!(err, HarnessError::InvalidProperty { line: 2, .. }));
    }

    #[test]
    fn test_set_replaces_in_place() {
        let mut props = Properties::parse("a=1\nb=2\n", Path::new("p")).unwrap();
        props.set("a", "9");
        props.set("c", "3");
        assert_eq!(props.render(), "a=9\nb=2\nc=3\n");
    }

    fn fixture() -> (ClusterConfig, TestCaseDefinition) {
        let cluster: ClusterConfig = serde_json::from_value(json!({
            "cluster_config": [
                {"entity_id": "0", "hostname": "zk-a", "role": "zookeeper", "cluster_name": "source"},
                {"entity_id": "1", "hostname": "zk-b", "role": "zookeeper", "cluster_name": "target"},
                {"entity_id": "2", "hostname": "b-a", "role": "broker", "cluster_name": "target"},
                {"entity_id": "3", "hostname": "mm", "role": "migration_tool", "cluster_name": "target"}
            ]
        }))
        .unwrap();
        let definition: TestCaseDefinition = serde_json::from_value(json!({
            "entities": [
                {"entity_id": "0", "clientPort": "2188", "config_filename": "zookeeper_0.properties"},
                {"entity_id": "2", "log.dir": "/tmp/kafka_server_2_logs", "brokerid": "2"}
            ]
        }))
        .unwrap();
        (cluster, definition)
    }

    #[test]
    fn test_connect_strings_per_cluster() {
        let (cluster, definition) = fixture();
        let connect = connect_strings(&cluster, &definition);
        assert_eq!(connect.get("source").map(String::as_str), Some("zk-a:2188"));
        assert_eq!(connect.get("target").map(String::as_str), Some("zk-b:2181"));
    }

    #[test]
    fn test_apply_overrides_writes_entity_files() {
        let (cluster, definition) = fixture();
        let base = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        std::fs::write(
            base.path().join("server.properties"),
            "brokerid=0\nlog.dir=/tmp/default\nzookeeper.connect=localhost:2181\n",
        )
        .unwrap();

        let generated = apply_overrides(base.path(), out.path(), &cluster, &definition).unwrap();
        assert_eq!(generated.len(), 4);
        assert!(out.path().join("zookeeper_0.properties").is_file());

        let broker = load_properties(&out.path().join("broker_2.properties")).unwrap();
        assert_eq!(broker.get("brokerid"), Some("2"));
        assert_eq!(broker.get("log.dir"), Some("/tmp/kafka_server_2_logs"));
        assert_eq!(broker.get("zookeeper.connect"), Some("zk-b:2181"));

        let tool = load_properties(&out.path().join("migration_tool_3.properties")).unwrap();
        assert_eq!(tool.get("zk.connect"), Some("zk-a:2188"));
    }
}
