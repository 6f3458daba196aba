//! Common types shared by the engine and its collaborators.

use serde::{Deserialize, Serialize};

/// Identifier of a managed entity, unique within a test case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Role a managed process plays in the test topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Coordination service node.
    Zookeeper,
    /// Message broker.
    Broker,
    /// The data-migration tool under test.
    MigrationTool,
    /// Background message producer.
    ProducerPerformance,
    /// Console consumer used to read back migrated data.
    ConsoleConsumer,
}

impl Role {
    /// Order in which teardown stops running entities.
    pub const TEARDOWN_ORDER: [Role; 5] = [
        Role::ConsoleConsumer,
        Role::ProducerPerformance,
        Role::MigrationTool,
        Role::Broker,
        Role::Zookeeper,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Zookeeper => "zookeeper",
            Self::Broker => "broker",
            Self::MigrationTool => "migration_tool",
            Self::ProducerPerformance => "producer_performance",
            Self::ConsoleConsumer => "console_consumer",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "zookeeper" => Ok(Self::Zookeeper),
            "broker" => Ok(Self::Broker),
            "migration_tool" => Ok(Self::MigrationTool),
            "producer_performance" => Ok(Self::ProducerPerformance),
            "console_consumer" => Ok(Self::ConsoleConsumer),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

/// Parent process id of a started remote entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessHandle(pub u32);

impl std::fmt::Display for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One managed remote process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub role: Role,
    pub host: String,
    /// Set while the process is running, cleared once stopped.
    pub handle: Option<ProcessHandle>,
}

impl Entity {
    pub fn new(id: impl Into<String>, role: Role, host: impl Into<String>) -> Self {
        Self {
            id: EntityId::new(id),
            role,
            host: host.into(),
            handle: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trips_through_text() {
        for role in Role::TEARDOWN_ORDER {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert!("kafka".parse::<Role>().is_err());
        assert_eq!(" Broker ".parse::<Role>().unwrap(), Role::Broker);
    }

    #[test]
    fn test_role_serde_uses_snake_case() {
        let json = serde_json::to_string(&Role::MigrationTool).unwrap();
        assert_eq!(json, "\"migration_tool\"");
    }

    #[test]
    fn test_entity_starts_stopped() {
        let entity = Entity::new("3", Role::MigrationTool, "localhost");
        assert!(!entity.is_running());
        assert_eq!(entity.id.as_str(), "3");
    }
}
