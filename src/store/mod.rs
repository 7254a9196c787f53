//! Storage contract for entities, DSL versions and attribute values.
//!
//! All engine I/O goes through the synchronous [`Store`] trait. Callers hold
//! the relevant per-id slot while writing, so implementations only need to
//! make each individual call atomic.

pub mod memory;

pub use memory::InMemoryStore;

use dsl_types::{DslVersion, EntityRecord};
use uuid::Uuid;

use crate::error::StoreResult;

pub trait Store: Send + Sync {
    fn get_entity(&self, entity_id: Uuid) -> StoreResult<Option<EntityRecord>>;

    /// Fails with `AlreadyExists` if the id is taken
    fn create_entity(&self, entity: &EntityRecord) -> StoreResult<()>;

    /// Replace the stored entity (current state and lifecycle) in one write
    fn update_entity(&self, entity: &EntityRecord) -> StoreResult<()>;

    /// Remove an entity that never received a DSL version; a missing id is not an error
    fn delete_entity(&self, entity_id: Uuid) -> StoreResult<()>;

    fn get_latest_dsl(&self, owner_id: Uuid) -> StoreResult<Option<DslVersion>>;

    /// Persist a version; rejects a duplicate (owner, version) with `Conflict`
    fn insert_dsl(&self, version: &DslVersion) -> StoreResult<Uuid>;

    /// Every version of `owner_id`, oldest first
    fn get_dsl_history(&self, owner_id: Uuid) -> StoreResult<Vec<DslVersion>>;

    fn get_attribute_value(
        &self,
        entity_id: Uuid,
        attribute_id: Uuid,
    ) -> StoreResult<Option<serde_json::Value>>;

    fn set_attribute_value(
        &self,
        entity_id: Uuid,
        attribute_id: Uuid,
        value: serde_json::Value,
    ) -> StoreResult<()>;

    fn clear_attribute_value(&self, entity_id: Uuid, attribute_id: Uuid) -> StoreResult<()>;
}
