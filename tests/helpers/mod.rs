//! Shared fixtures for the integration tests.
//!
//! Every helper builds a fresh registry and in-memory store, so tests never
//! share entities or version counters.

#![allow(dead_code)]

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use ob_lifecycle::error::{StoreError, StoreResult};
use ob_lifecycle::generation::ScriptedGenerator;
use ob_lifecycle::vocabulary::{ArgType, AttributeDefinition, InMemoryAttributeDictionary};
use ob_lifecycle::{
    register_standard_domains, ContextMap, DirectDslGenerator, DomainRegistry, DslPipeline, DslVersion, EntityRecord,
    InMemoryStore, Orchestrator, OrchestratorConfig, RegistryConfig, RouterConfig, Store,
};

pub fn registry() -> Arc<DomainRegistry> {
    let registry = Arc::new(DomainRegistry::new(RegistryConfig::default()));
    register_standard_domains(&registry).expect("standard domains register");
    registry
}

pub fn pipeline() -> DslPipeline {
    DslPipeline::new(registry(), Arc::new(InMemoryStore::new()))
}

/// Orchestrator over the standard domains, driven by a scripted generator
pub fn orchestrator(config: OrchestratorConfig) -> (Arc<Orchestrator>, Arc<ScriptedGenerator>) {
    let pipeline = Arc::new(pipeline());
    let generator = Arc::new(ScriptedGenerator::new());
    let orchestrator = Orchestrator::new(pipeline, generator.clone(), RouterConfig::default(), config)
        .expect("standard planner is acyclic");
    (Arc::new(orchestrator), generator)
}

/// Context map from `(key, value)` pairs
pub fn context(pairs: &[(&str, serde_json::Value)]) -> ContextMap {
    pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.clone()))
        .collect()
}

// =============================================================================
// FAULT INJECTION
// =============================================================================

/// In-memory store whose operations can be made to fail on demand
#[derive(Debug, Default)]
pub struct FaultyStore {
    inner: InMemoryStore,
    failing: Mutex<HashSet<&'static str>>,
    creates_left: Mutex<Option<usize>>,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every call of `operation` (a `Store` method name) from now on
    pub fn fail(&self, operation: &'static str) {
        self.failing.lock().insert(operation);
    }

    /// Let `count` more entity creates succeed, then fail the rest
    pub fn fail_creates_after(&self, count: usize) {
        *self.creates_left.lock() = Some(count);
    }

    pub fn inner(&self) -> &InMemoryStore {
        &self.inner
    }

    fn check(&self, operation: &'static str) -> StoreResult<()> {
        if self.failing.lock().contains(operation) {
            return Err(StoreError::backend(
                operation,
                std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
            ));
        }
        Ok(())
    }
}

impl Store for FaultyStore {
    fn get_entity(&self, entity_id: Uuid) -> StoreResult<Option<EntityRecord>> {
        self.check("get_entity")?;
        self.inner.get_entity(entity_id)
    }

    fn create_entity(&self, entity: &EntityRecord) -> StoreResult<()> {
        self.check("create_entity")?;
        if let Some(left) = self.creates_left.lock().as_mut() {
            if *left == 0 {
                return Err(StoreError::backend(
                    "create_entity",
                    std::io::Error::new(std::io::ErrorKind::Other, "quota exceeded"),
                ));
            }
            *left -= 1;
        }
        self.inner.create_entity(entity)
    }

    fn update_entity(&self, entity: &EntityRecord) -> StoreResult<()> {
        self.check("update_entity")?;
        self.inner.update_entity(entity)
    }

    fn delete_entity(&self, entity_id: Uuid) -> StoreResult<()> {
        self.check("delete_entity")?;
        self.inner.delete_entity(entity_id)
    }

    fn get_latest_dsl(&self, owner_id: Uuid) -> StoreResult<Option<DslVersion>> {
        self.check("get_latest_dsl")?;
        self.inner.get_latest_dsl(owner_id)
    }

    fn insert_dsl(&self, version: &DslVersion) -> StoreResult<Uuid> {
        self.check("insert_dsl")?;
        self.inner.insert_dsl(version)
    }

    fn get_dsl_history(&self, owner_id: Uuid) -> StoreResult<Vec<DslVersion>> {
        self.check("get_dsl_history")?;
        self.inner.get_dsl_history(owner_id)
    }

    fn get_attribute_value(
        &self,
        entity_id: Uuid,
        attribute_id: Uuid,
    ) -> StoreResult<Option<serde_json::Value>> {
        self.check("get_attribute_value")?;
        self.inner.get_attribute_value(entity_id, attribute_id)
    }

    fn set_attribute_value(
        &self,
        entity_id: Uuid,
        attribute_id: Uuid,
        value: serde_json::Value,
    ) -> StoreResult<()> {
        self.check("set_attribute_value")?;
        self.inner.set_attribute_value(entity_id, attribute_id, value)
    }

    fn clear_attribute_value(&self, entity_id: Uuid, attribute_id: Uuid) -> StoreResult<()> {
        self.check("clear_attribute_value")?;
        self.inner.clear_attribute_value(entity_id, attribute_id)
    }
}

/// Pipeline over a [`FaultyStore`] that resolves one string attribute
pub fn faulty_pipeline() -> (DslPipeline, Arc<FaultyStore>, Uuid) {
    let attribute_id = Uuid::new_v4();
    let mut dictionary = InMemoryAttributeDictionary::new();
    dictionary.register(AttributeDefinition::new(attribute_id, "reference", ArgType::String));

    let store = Arc::new(FaultyStore::new());
    let pipeline = DslPipeline::new(registry(), store.clone()).with_attributes(Arc::new(dictionary));
    (pipeline, store, attribute_id)
}

/// Orchestrator over a [`FaultyStore`], taking DSL forms from the instruction
pub fn faulty_orchestrator(config: OrchestratorConfig) -> (Arc<Orchestrator>, Arc<FaultyStore>) {
    let store = Arc::new(FaultyStore::new());
    let pipeline = Arc::new(DslPipeline::new(registry(), store.clone()));
    let orchestrator = Orchestrator::new(pipeline, Arc::new(DirectDslGenerator), RouterConfig::default(), config)
        .expect("standard planner is acyclic");
    (Arc::new(orchestrator), store)
}
