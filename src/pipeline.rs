//! DSL Pipeline
//!
//! The single-entity write path: parse, vocabulary validation, from-state
//! check, guards, transition commit and accumulation. Everything after the
//! entity is loaded runs under that entity's writer slot, so two submissions
//! for one entity are linearized while different entities proceed in
//! parallel.

use dsl_types::{ContextMap, DslVersion, EntityRecord, LifecycleRecord};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::accumulator::{DslAccumulator, ValidatedFragment};
use crate::ast::VerbCall;
use crate::domains::Domain;
use crate::error::{DSLError, DSLResult, StateError, StoreError};
use crate::parser::parse_single_call;
use crate::registry::DomainRegistry;
use crate::state_machine::{LifecycleManager, StateCheck};
use crate::store::Store;
use crate::vocabulary::{AttributeDictionary, ValidatedCall, ValidationContext};

/// Result of one accepted submission
#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    /// Entity after the submission
    pub entity: EntityRecord,
    /// Document version holding the fragment
    pub version: DslVersion,
    /// Lifecycle record, when the verb moved the entity
    pub transition: Option<LifecycleRecord>,
    /// Identifiers produced and facts established by the verb
    pub context_updates: ContextMap,
}

impl SubmitOutcome {
    pub fn transitioned(&self) -> bool {
        self.transition.is_some()
    }
}

pub struct DslPipeline {
    registry: Arc<DomainRegistry>,
    store: Arc<dyn Store>,
    lifecycle: LifecycleManager,
    accumulator: DslAccumulator,
    attributes: Option<Arc<dyn AttributeDictionary>>,
}

impl DslPipeline {
    pub fn new(registry: Arc<DomainRegistry>, store: Arc<dyn Store>) -> Self {
        Self {
            lifecycle: LifecycleManager::new(store.clone()),
            accumulator: DslAccumulator::new(store.clone()),
            registry,
            store,
            attributes: None,
        }
    }

    /// Resolve `@attr{uuid}` arguments against `attributes`
    pub fn with_attributes(mut self, attributes: Arc<dyn AttributeDictionary>) -> Self {
        self.attributes = Some(attributes);
        self
    }

    pub fn registry(&self) -> &Arc<DomainRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    pub fn accumulator(&self) -> &DslAccumulator {
        &self.accumulator
    }

    /// Create an entity of `entity_type` in the domain's initial state
    pub fn create_entity(&self, domain: &str, entity_type: &str, actor: &str) -> DSLResult<EntityRecord> {
        let domain = self.registry.require(domain)?;
        self.lifecycle
            .create_entity(domain.state_machine(), entity_type, actor)
    }

    /// Remove an entity created for a caller that then failed to take ownership
    pub(crate) fn discard_entity(&self, entity_id: Uuid) {
        self.lifecycle.discard_entity(entity_id);
    }

    pub fn entity(&self, entity_id: Uuid) -> DSLResult<EntityRecord> {
        self.lifecycle.load(entity_id)
    }

    /// Parse `dsl_text` as one verb form and submit it
    pub fn submit(
        &self,
        entity_id: Uuid,
        domain: &str,
        dsl_text: &str,
        context: &ContextMap,
        actor: &str,
        cancel: &CancellationToken,
    ) -> DSLResult<SubmitOutcome> {
        let call = parse_single_call(dsl_text)?;
        self.submit_call(entity_id, domain, &call, context, actor, cancel)
    }

    /// Validate and commit an already-parsed call.
    ///
    /// Rejections leave the entity, its document and the attribute values
    /// untouched. Guards see `context`; the verb's produced identifiers and
    /// facts are returned in [`SubmitOutcome::context_updates`] for the caller
    /// to merge.
    pub fn submit_call(
        &self,
        entity_id: Uuid,
        domain_name: &str,
        call: &VerbCall,
        context: &ContextMap,
        actor: &str,
        cancel: &CancellationToken,
    ) -> DSLResult<SubmitOutcome> {
        if cancel.is_cancelled() {
            return Err(DSLError::cancelled("submit"));
        }
        let domain = self.registry.require(domain_name)?;
        domain.metrics().record_request();

        let result = self.lifecycle.with_entity_lock(entity_id, || {
            self.submit_locked(domain.as_ref(), entity_id, call, context, actor, cancel)
        });
        if let Err(e) = &result {
            domain.metrics().record_rejected();
            debug!(
                entity_id = %entity_id,
                domain = domain_name,
                verb = %call.verb,
                reason = %e.reason_code(),
                "Submission rejected"
            );
        }
        result
    }

    fn submit_locked(
        &self,
        domain: &dyn Domain,
        entity_id: Uuid,
        call: &VerbCall,
        context: &ContextMap,
        actor: &str,
        cancel: &CancellationToken,
    ) -> DSLResult<SubmitOutcome> {
        let mut entity = self.lifecycle.load(entity_id)?;
        if entity.domain != domain.name() {
            return Err(StateError::DomainMismatch {
                entity_id,
                expected: domain.name().to_string(),
                actual: entity.domain,
            }
            .into());
        }

        let mut validation = ValidationContext::new(context);
        if let Some(attributes) = &self.attributes {
            validation = validation.with_attributes(attributes.as_ref());
        }
        let validated = domain.validate(call, &validation)?;
        let check = domain.transition_check(&validated, &entity, context)?;

        if cancel.is_cancelled() {
            return Err(DSLError::cancelled("submit"));
        }

        let fragment = ValidatedFragment::new(&validated, &check);
        let before = entity.clone();
        let replaced = self.write_attributes(entity_id, &validated)?;

        let transition = match &check {
            StateCheck::Transition { to, .. } => {
                match self.lifecycle.commit_transition(
                    &mut entity,
                    to,
                    validated.verb(),
                    context,
                    actor,
                ) {
                    Ok(record) => Some(record),
                    Err(e) => {
                        self.restore_attributes(entity_id, &replaced);
                        return Err(e.into());
                    }
                }
            }
            StateCheck::Stay { .. } => None,
        };

        // The version insert is the last write; everything before it can be undone
        let version = match self.accumulator.append(entity_id, &fragment) {
            Ok(version) => version,
            Err(e) => {
                if transition.is_some() {
                    if let Err(restore) = self.store.update_entity(&before) {
                        warn!(entity_id = %entity_id, error = %restore, "Transition rollback failed");
                    }
                }
                self.restore_attributes(entity_id, &replaced);
                return Err(e.into());
            }
        };

        let definition = validated.definition();
        let mut context_updates = ContextMap::new();
        if let Some(key) = &definition.produces {
            match context.get(key) {
                Some(existing) => {
                    context_updates.insert(key.clone(), existing.clone());
                }
                None => {
                    context_updates.insert(
                        key.clone(),
                        serde_json::Value::String(Uuid::new_v4().to_string()),
                    );
                }
            }
        }
        for (key, value) in &definition.sets {
            context_updates.insert(key.clone(), value.clone());
        }

        domain.metrics().record_accepted(&entity.current_state);
        Ok(SubmitOutcome {
            entity,
            version,
            transition,
            context_updates,
        })
    }

    /// Write the call's attribute values and return the values they replaced.
    /// A failed write puts back the ones already written.
    fn write_attributes(
        &self,
        entity_id: Uuid,
        validated: &ValidatedCall,
    ) -> Result<Vec<(Uuid, Option<serde_json::Value>)>, StoreError> {
        let mut replaced = Vec::new();
        for (attribute_id, value) in validated.attribute_values() {
            let written = self
                .store
                .get_attribute_value(entity_id, *attribute_id)
                .and_then(|previous| {
                    self.store
                        .set_attribute_value(entity_id, *attribute_id, value.to_json())?;
                    Ok(previous)
                });
            match written {
                Ok(previous) => replaced.push((*attribute_id, previous)),
                Err(e) => {
                    self.restore_attributes(entity_id, &replaced);
                    return Err(e);
                }
            }
        }
        Ok(replaced)
    }

    fn restore_attributes(&self, entity_id: Uuid, replaced: &[(Uuid, Option<serde_json::Value>)]) {
        for (attribute_id, previous) in replaced.iter().rev() {
            let restored = match previous {
                Some(value) => self
                    .store
                    .set_attribute_value(entity_id, *attribute_id, value.clone()),
                None => self.store.clear_attribute_value(entity_id, *attribute_id),
            };
            if let Err(e) = restored {
                warn!(
                    entity_id = %entity_id,
                    attribute_id = %attribute_id,
                    error = %e,
                    "Attribute rollback failed"
                );
            }
        }
    }

    /// Every version of the entity's document, oldest first
    pub fn history(&self, entity_id: Uuid) -> DSLResult<Vec<DslVersion>> {
        self.accumulator.get_history(entity_id)
    }

    pub fn latest_dsl(&self, entity_id: Uuid) -> DSLResult<Option<DslVersion>> {
        self.accumulator.get_latest(entity_id)
    }

    pub fn dsl_at_version(&self, entity_id: Uuid, version: u64) -> DSLResult<DslVersion> {
        self.accumulator.get_by_version(entity_id, version)
    }

    pub fn lifecycle_history(&self, entity_id: Uuid) -> DSLResult<Vec<LifecycleRecord>> {
        self.lifecycle.history(entity_id)
    }

    pub fn attribute_value(
        &self,
        entity_id: Uuid,
        attribute_id: Uuid,
    ) -> DSLResult<Option<serde_json::Value>> {
        Ok(self.store.get_attribute_value(entity_id, attribute_id)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::register_standard_domains;
    use crate::registry::RegistryConfig;
    use crate::store::InMemoryStore;
    use crate::vocabulary::{ArgType, AttributeDefinition, InMemoryAttributeDictionary};
    use serde_json::json;

    fn pipeline() -> DslPipeline {
        let registry = Arc::new(DomainRegistry::new(RegistryConfig::default()));
        register_standard_domains(&registry).unwrap();
        DslPipeline::new(registry, Arc::new(InMemoryStore::new()))
    }

    #[test]
    fn test_kyc_guard_scenario() {
        let pipeline = pipeline();
        let cancel = CancellationToken::new();
        let entity = pipeline.create_entity("kyc", "CORPORATE", "analyst").unwrap();

        let begun = pipeline
            .submit(entity.entity_id, "kyc", "(kyc.begin)", &ContextMap::new(), "analyst", &cancel)
            .unwrap();
        assert_eq!(begun.entity.current_state, "KYC_PENDING");
        assert!(begun.context_updates.contains_key("kyc_case_id"));

        let mut context = ContextMap::new();
        context.insert("documents_verified".to_string(), json!(false));
        let err = pipeline
            .submit(entity.entity_id, "kyc", "(kyc.approve)", &context, "analyst", &cancel)
            .unwrap_err();
        assert_eq!(err.reason_code(), "state.guard_failed:documents_verified");
        assert_eq!(pipeline.history(entity.entity_id).unwrap().len(), 1);

        context.insert("documents_verified".to_string(), json!(true));
        let approved = pipeline
            .submit(entity.entity_id, "kyc", "(kyc.approve)", &context, "analyst", &cancel)
            .unwrap();
        let record = approved.transition.unwrap();
        assert_eq!(record.from_state.as_deref(), Some("KYC_PENDING"));
        assert_eq!(record.to_state, "KYC_APPROVED");
        assert_eq!(approved.version.version, 2);
        assert_eq!(approved.context_updates.get("kyc_approved"), Some(&json!(true)));
    }

    #[test]
    fn test_non_transition_verb_keeps_state() {
        let pipeline = pipeline();
        let cancel = CancellationToken::new();
        let entity = pipeline.create_entity("kyc", "CORPORATE", "analyst").unwrap();
        pipeline
            .submit(entity.entity_id, "kyc", "(kyc.begin)", &ContextMap::new(), "a", &cancel)
            .unwrap();

        let outcome = pipeline
            .submit(
                entity.entity_id,
                "kyc",
                r#"(kyc.collect-document :document-type "passport")"#,
                &ContextMap::new(),
                "a",
                &cancel,
            )
            .unwrap();
        assert!(!outcome.transitioned());
        assert_eq!(outcome.entity.current_state, "KYC_PENDING");
        assert_eq!(pipeline.lifecycle_history(entity.entity_id).unwrap().len(), 2);
    }

    #[test]
    fn test_rejections_leave_no_trace() {
        let pipeline = pipeline();
        let cancel = CancellationToken::new();
        let entity = pipeline.create_entity("kyc", "CORPORATE", "analyst").unwrap();

        let err = pipeline
            .submit(entity.entity_id, "kyc", "(kyc.approve)", &ContextMap::new(), "a", &cancel)
            .unwrap_err();
        assert_eq!(err.reason_code(), "state.verb_not_allowed:kyc.approve@KYC_NOT_STARTED");

        let err = pipeline
            .submit(entity.entity_id, "ubo", "(ubo.verify)", &ContextMap::new(), "a", &cancel)
            .unwrap_err();
        assert_eq!(err.reason_code(), "state.domain_mismatch:ubo");

        cancel.cancel();
        let err = pipeline
            .submit(entity.entity_id, "kyc", "(kyc.begin)", &ContextMap::new(), "a", &cancel)
            .unwrap_err();
        assert!(matches!(err, DSLError::Cancelled { .. }));

        assert!(pipeline.history(entity.entity_id).unwrap().is_empty());
        assert_eq!(pipeline.entity(entity.entity_id).unwrap().current_state, "KYC_NOT_STARTED");

        let metrics = pipeline.registry().get("kyc").unwrap().metrics().snapshot();
        assert_eq!(metrics.rejected, 1);
    }

    #[test]
    fn test_produced_id_is_kept_when_present() {
        let pipeline = pipeline();
        let cancel = CancellationToken::new();
        let entity = pipeline.create_entity("kyc", "CORPORATE", "a").unwrap();
        let mut context = ContextMap::new();
        context.insert("kyc_case_id".to_string(), json!("existing"));

        let outcome = pipeline
            .submit(entity.entity_id, "kyc", "(kyc.begin)", &context, "a", &cancel)
            .unwrap();
        assert_eq!(outcome.context_updates.get("kyc_case_id"), Some(&json!("existing")));
    }

    #[test]
    fn test_attribute_values_are_stored() {
        let attribute_id = Uuid::new_v4();
        let mut dictionary = InMemoryAttributeDictionary::new();
        dictionary.register(AttributeDefinition::new(attribute_id, "reference", ArgType::String));
        let pipeline = pipeline().with_attributes(Arc::new(dictionary));
        let cancel = CancellationToken::new();
        let entity = pipeline.create_entity("kyc", "CORPORATE", "a").unwrap();

        let text = format!(
            r#"(kyc.collect-document :document-type "passport" @attr{{{}}} = "REF-9")"#,
            attribute_id
        );
        pipeline
            .submit(entity.entity_id, "kyc", &text, &ContextMap::new(), "a", &cancel)
            .unwrap();
        assert_eq!(
            pipeline.attribute_value(entity.entity_id, attribute_id).unwrap(),
            Some(json!("REF-9"))
        );
    }
}
