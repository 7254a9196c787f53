//! In-memory `Store` for tests and embedding.

use dsl_types::{DslVersion, EntityRecord};
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

use super::Store;
use crate::error::{StoreError, StoreResult};

#[derive(Debug, Default)]
pub struct InMemoryStore {
    entities: RwLock<HashMap<Uuid, EntityRecord>>,
    versions: RwLock<HashMap<Uuid, Vec<DslVersion>>>,
    attributes: RwLock<HashMap<(Uuid, Uuid), serde_json::Value>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.read().len()
    }
}

impl Store for InMemoryStore {
    fn get_entity(&self, entity_id: Uuid) -> StoreResult<Option<EntityRecord>> {
        Ok(self.entities.read().get(&entity_id).cloned())
    }

    fn create_entity(&self, entity: &EntityRecord) -> StoreResult<()> {
        let mut entities = self.entities.write();
        if entities.contains_key(&entity.entity_id) {
            return Err(StoreError::AlreadyExists {
                entity_id: entity.entity_id,
            });
        }
        entities.insert(entity.entity_id, entity.clone());
        Ok(())
    }

    fn update_entity(&self, entity: &EntityRecord) -> StoreResult<()> {
        let mut entities = self.entities.write();
        match entities.get_mut(&entity.entity_id) {
            Some(stored) => {
                *stored = entity.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound {
                what: "entity",
                id: entity.entity_id,
            }),
        }
    }

    fn delete_entity(&self, entity_id: Uuid) -> StoreResult<()> {
        self.entities.write().remove(&entity_id);
        Ok(())
    }

    fn get_latest_dsl(&self, owner_id: Uuid) -> StoreResult<Option<DslVersion>> {
        Ok(self
            .versions
            .read()
            .get(&owner_id)
            .and_then(|history| history.last().cloned()))
    }

    fn insert_dsl(&self, version: &DslVersion) -> StoreResult<Uuid> {
        let mut versions = self.versions.write();
        let history = versions.entry(version.owner_id).or_default();
        if history.iter().any(|v| v.version == version.version) {
            return Err(StoreError::Conflict {
                owner_id: version.owner_id,
                version: version.version,
            });
        }
        let position = history.partition_point(|v| v.version < version.version);
        history.insert(position, version.clone());
        Ok(version.version_id)
    }

    fn get_dsl_history(&self, owner_id: Uuid) -> StoreResult<Vec<DslVersion>> {
        Ok(self
            .versions
            .read()
            .get(&owner_id)
            .cloned()
            .unwrap_or_default())
    }

    fn get_attribute_value(
        &self,
        entity_id: Uuid,
        attribute_id: Uuid,
    ) -> StoreResult<Option<serde_json::Value>> {
        Ok(self
            .attributes
            .read()
            .get(&(entity_id, attribute_id))
            .cloned())
    }

    fn set_attribute_value(
        &self,
        entity_id: Uuid,
        attribute_id: Uuid,
        value: serde_json::Value,
    ) -> StoreResult<()> {
        self.attributes
            .write()
            .insert((entity_id, attribute_id), value);
        Ok(())
    }

    fn clear_attribute_value(&self, entity_id: Uuid, attribute_id: Uuid) -> StoreResult<()> {
        self.attributes.write().remove(&(entity_id, attribute_id));
        Ok(())
    }
}
