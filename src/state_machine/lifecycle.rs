//! Lifecycle manager: commits guarded transitions against the store.
//!
//! Writes to one entity are serialized through a per-entity slot; different
//! entities never contend. A transition is written as a single
//! `Store::update_entity` call carrying both the new state and the new
//! lifecycle record, so a failed write leaves nothing behind.

use chrono::Utc;
use dsl_types::{ContextMap, EntityRecord, LifecycleRecord};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::StateMachine;
use crate::error::{DSLError, DSLResult, StateError, StoreError};
use crate::store::Store;

pub struct LifecycleManager {
    store: Arc<dyn Store>,
    slots: RwLock<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl LifecycleManager {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            slots: RwLock::new(HashMap::new()),
        }
    }

    fn slot(&self, entity_id: Uuid) -> Arc<Mutex<()>> {
        if let Some(slot) = self.slots.read().get(&entity_id) {
            return slot.clone();
        }
        self.slots.write().entry(entity_id).or_default().clone()
    }

    /// Drop the slot once no writer holds or waits on it
    fn release(&self, entity_id: Uuid) {
        let mut slots = self.slots.write();
        if slots
            .get(&entity_id)
            .is_some_and(|slot| Arc::strong_count(slot) == 1)
        {
            slots.remove(&entity_id);
        }
    }

    /// Run `f` while holding the entity's writer slot
    pub fn with_entity_lock<R>(&self, entity_id: Uuid, f: impl FnOnce() -> R) -> R {
        let slot = self.slot(entity_id);
        let result = {
            let _guard = slot.lock();
            f()
        };
        drop(slot);
        self.release(entity_id);
        result
    }

    /// Writer slots currently held or waited on
    pub fn active_slots(&self) -> usize {
        self.slots.read().len()
    }

    /// Create an entity in the machine's initial state
    pub fn create_entity(
        &self,
        machine: &StateMachine,
        entity_type: &str,
        actor: &str,
    ) -> DSLResult<EntityRecord> {
        let entity = EntityRecord::new(entity_type, machine.domain(), machine.initial_state(), actor);
        self.store.create_entity(&entity)?;
        info!(
            entity_id = %entity.entity_id,
            domain = machine.domain(),
            state = %entity.current_state,
            "Entity created"
        );
        Ok(entity)
    }

    /// Remove a freshly created entity that nothing references yet
    pub(crate) fn discard_entity(&self, entity_id: Uuid) {
        match self.store.delete_entity(entity_id) {
            Ok(()) => debug!(entity_id = %entity_id, "Entity discarded"),
            Err(e) => warn!(entity_id = %entity_id, error = %e, "Entity discard failed"),
        }
    }

    pub fn load(&self, entity_id: Uuid) -> DSLResult<EntityRecord> {
        self.store
            .get_entity(entity_id)?
            .ok_or_else(|| StateError::EntityNotFound { entity_id }.into())
    }

    /// Validate and commit `entity -> to_state` under the entity's slot.
    pub fn transition_state(
        &self,
        machine: &StateMachine,
        entity_id: Uuid,
        to_state: &str,
        trigger: &str,
        context: &ContextMap,
        actor: &str,
        cancel: &CancellationToken,
    ) -> DSLResult<EntityRecord> {
        self.with_entity_lock(entity_id, || {
            let mut entity = self.load(entity_id)?;
            machine.validate_transition(&entity, to_state, context)?;

            if cancel.is_cancelled() {
                return Err(DSLError::cancelled("transition_state"));
            }

            self.commit_transition(&mut entity, to_state, trigger, context, actor)?;
            Ok(entity)
        })
    }

    /// Write an already-validated transition. Caller holds the entity slot.
    ///
    /// `entity` is only updated once the store accepted the write.
    pub(crate) fn commit_transition(
        &self,
        entity: &mut EntityRecord,
        to_state: &str,
        trigger: &str,
        context: &ContextMap,
        actor: &str,
    ) -> Result<LifecycleRecord, StoreError> {
        let record = LifecycleRecord::transition(
            entity.entity_id,
            entity.current_state.clone(),
            to_state,
            trigger,
            context.clone(),
            actor,
        );

        let mut updated = entity.clone();
        updated.current_state = to_state.to_string();
        updated.updated_at = Utc::now();
        updated.lifecycle.push(record.clone());

        self.store.update_entity(&updated)?;
        *entity = updated;

        info!(
            entity_id = %entity.entity_id,
            domain = %entity.domain,
            from = record.from_state.as_deref().unwrap_or(""),
            to = %record.to_state,
            trigger = %record.trigger,
            "Transition committed"
        );
        Ok(record)
    }

    /// Every lifecycle record of the entity, oldest first
    pub fn history(&self, entity_id: Uuid) -> DSLResult<Vec<LifecycleRecord>> {
        let entity = self.load(entity_id)?;
        debug!(entity_id = %entity_id, records = entity.lifecycle.len(), "Lifecycle history read");
        Ok(entity.lifecycle)
    }
}
