//! Entity registry: role → managed process handles for one test case.
//!
//! Entities keep their insertion order so role lookups are deterministic.
//! A bounce cycles the handle of an entity but never its identity.

use std::sync::Mutex;

use crate::cluster::ClusterConfig;
use crate::errors::{HarnessError, HarnessResult};
use crate::types::{Entity, EntityId, ProcessHandle, Role};

/// Entities of one test case and their current process handles.
///
/// Safe to share between the orchestrator, the fault injector and teardown.
#[derive(Debug, Default)]
pub struct EntityRegistry {
    entities: Mutex<Vec<Entity>>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry holding every entity of a cluster configuration.
    pub fn from_cluster(cluster: &ClusterConfig) -> HarnessResult<Self> {
        let registry = Self::new();
        for entry in &cluster.entities {
            registry.register(Entity::new(
                entry.entity_id.clone(),
                entry.role,
                entry.hostname.clone(),
            ))?;
        }
        Ok(registry)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Entity>> {
        self.entities.lock().expect("entity registry mutex poisoned")
    }

    /// Add an entity. Ids must be unique within the registry.
    pub fn register(&self, entity: Entity) -> HarnessResult<()> {
        let mut entities = self.lock();
        if entities.iter().any(|existing| existing.id == entity.id) {
            return Err(HarnessError::DuplicateEntity(entity.id));
        }
        entities.push(entity);
        Ok(())
    }

    /// Entities of a role, in insertion order.
    pub fn entities_of(&self, role: Role) -> Vec<Entity> {
        self.lock()
            .iter()
            .filter(|entity| entity.role == role)
            .cloned()
            .collect()
    }

    /// First registered entity of a role.
    pub fn first_of(&self, role: Role) -> Option<Entity> {
        self.lock().iter().find(|entity| entity.role == role).cloned()
    }

    /// Snapshot of one entity, handle included.
    pub fn get(&self, id: &EntityId) -> Option<Entity> {
        self.lock().iter().find(|entity| &entity.id == id).cloned()
    }

    /// Record a started process. Returns the handle it replaced, if any.
    pub fn record_handle(
        &self,
        id: &EntityId,
        handle: ProcessHandle,
    ) -> HarnessResult<Option<ProcessHandle>> {
        let mut entities = self.lock();
        let entity = entities
            .iter_mut()
            .find(|entity| &entity.id == id)
            .ok_or_else(|| HarnessError::UnknownEntity(id.clone()))?;
        Ok(entity.handle.replace(handle))
    }

    /// Forget the handle of a stopped process. Returns the cleared handle, if any.
    pub fn clear_handle(&self, id: &EntityId) -> HarnessResult<Option<ProcessHandle>> {
        let mut entities = self.lock();
        let entity = entities
            .iter_mut()
            .find(|entity| &entity.id == id)
            .ok_or_else(|| HarnessError::UnknownEntity(id.clone()))?;
        Ok(entity.handle.take())
    }

    /// Entities with a live handle.
    pub fn running(&self) -> Vec<Entity> {
        self.lock()
            .iter()
            .filter(|entity| entity.is_running())
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> EntityRegistry {
        let registry = EntityRegistry::new();
        registry
            .register(Entity::new("0", Role::Zookeeper, "host-a"))
            .unwrap();
        registry
            .register(Entity::new("1", Role::Broker, "host-b"))
            .unwrap();
        registry
            .register(Entity::new("2", Role::Broker, "host-c"))
            .unwrap();
        registry
            .register(Entity::new("3", Role::MigrationTool, "host-d"))
            .unwrap();
        registry
    }

    #[test]
    fn test_entities_of_keeps_insertion_order() {
        let registry = sample();
        let brokers: Vec<_> = registry
            .entities_of(Role::Broker)
            .into_iter()
            .map(|e| e.id.0)
            .collect();
        assert_eq!(brokers, vec!["1", "2"]);
        assert!(registry.entities_of(Role::ConsoleConsumer).is_empty());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let registry = sample();
        let err = registry
            .register(Entity::new("2", Role::Zookeeper, "host-z"))
            .unwrap_err();
        assert!(matches!(err, HarnessError::DuplicateEntity(id) if id.as_str() == "2"));
        assert_eq!(registry.len(), 4);
    }

    #[test]
    fn test_handle_cycle_keeps_identity() {
        let registry = sample();
        let id = EntityId::new("3");

        assert_eq!(registry.record_handle(&id, ProcessHandle(100)).unwrap(), None);
        assert_eq!(registry.clear_handle(&id).unwrap(), Some(ProcessHandle(100)));
        assert_eq!(registry.record_handle(&id, ProcessHandle(200)).unwrap(), None);

        let entity = registry.get(&id).unwrap();
        assert_eq!(entity.role, Role::MigrationTool);
        assert_eq!(entity.handle, Some(ProcessHandle(200)));
    }

    #[test]
    fn test_clear_handle_twice_is_noop() {
        let registry = sample();
        let id = EntityId::new("0");
        registry.record_handle(&id, ProcessHandle(7)).unwrap();
        assert!(registry.clear_handle(&id).unwrap().is_some());
        assert!(registry.clear_handle(&id).unwrap().is_none());
    }

    #[test]
    fn test_unknown_entity_errors() {
        let registry = sample();
        let err = registry
            .record_handle(&EntityId::new("99"), ProcessHandle(1))
            .unwrap_err();
        assert!(matches!(err, HarnessError::UnknownEntity(_)));
    }

    #[test]
    fn test_running_lists_only_started_entities() {
        let registry = sample();
        registry
            .record_handle(&EntityId::new("1"), ProcessHandle(11))
            .unwrap();
        let running = registry.running();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].id.as_str(), "1");
        assert_eq!(
            registry.first_of(Role::Broker).unwrap().handle,
            Some(ProcessHandle(11))
        );
    }
}
