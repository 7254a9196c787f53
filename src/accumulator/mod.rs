//! DSL Accumulator - append-only, versioned DSL documents
//!
//! Every accepted fragment becomes a new immutable [`DslVersion`] carrying both
//! the fragment and the full document as it stood after it. The document is
//! the state: replaying versions 1..=k reproduces the document at version k.
//!
//! ## Version counters
//! Each owner id has a writer slot holding the last persisted version. The
//! slot is seeded from `Store::get_latest_dsl` when it is created and
//! advanced only after the store accepted the insert, so versions stay
//! gapless. Different owners never share a slot, and a slot is dropped once
//! no writer holds or waits on it.
//!
//! ## Validated fragments only
//! [`ValidatedFragment`] can only be built inside the crate, from a call that
//! passed vocabulary validation and the state check.

use dsl_types::DslVersion;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{DSLError, DSLResult, StoreError};
use crate::state_machine::StateCheck;
use crate::store::Store;
use crate::vocabulary::ValidatedCall;

/// A fragment that already passed vocabulary and state-machine validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedFragment {
    verb: String,
    text: String,
    from_state: Option<String>,
    to_state: Option<String>,
}

impl ValidatedFragment {
    pub(crate) fn new(call: &ValidatedCall, check: &StateCheck) -> Self {
        let (from_state, to_state) = match check {
            StateCheck::Transition { from, to } => (Some(from.clone()), Some(to.clone())),
            StateCheck::Stay { .. } => (None, None),
        };
        Self {
            verb: call.verb().to_string(),
            text: call.render(),
            from_state,
            to_state,
        }
    }

    pub fn verb(&self) -> &str {
        &self.verb
    }

    /// Canonical DSL text appended to the document
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn from_state(&self) -> Option<&str> {
        self.from_state.as_deref()
    }

    pub fn to_state(&self) -> Option<&str> {
        self.to_state.as_deref()
    }
}

#[derive(Debug, Default)]
struct WriterSlot {
    seeded: bool,
    last_version: u64,
    document: String,
}

pub struct DslAccumulator {
    store: Arc<dyn Store>,
    slots: RwLock<HashMap<Uuid, Arc<Mutex<WriterSlot>>>>,
}

impl DslAccumulator {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            slots: RwLock::new(HashMap::new()),
        }
    }

    fn slot(&self, owner_id: Uuid) -> Arc<Mutex<WriterSlot>> {
        if let Some(slot) = self.slots.read().get(&owner_id) {
            return slot.clone();
        }
        self.slots.write().entry(owner_id).or_default().clone()
    }

    /// Append `fragment` as the next version of `owner_id`.
    ///
    /// Cancellation is observed before the slot is taken; once the insert is
    /// issued the append runs to completion.
    pub fn accumulate(
        &self,
        owner_id: Uuid,
        fragment: &ValidatedFragment,
        cancel: &CancellationToken,
    ) -> DSLResult<DslVersion> {
        if cancel.is_cancelled() {
            return Err(DSLError::cancelled("accumulate"));
        }
        Ok(self.append(owner_id, fragment)?)
    }

    /// Append without a cancellation checkpoint (callers already passed one)
    pub(crate) fn append(
        &self,
        owner_id: Uuid,
        fragment: &ValidatedFragment,
    ) -> Result<DslVersion, StoreError> {
        let slot = self.slot(owner_id);
        let result = {
            let mut guard = slot.lock();
            self.append_in_slot(&mut guard, owner_id, fragment)
        };
        drop(slot);
        self.release(owner_id);
        result
    }

    fn release(&self, owner_id: Uuid) {
        let mut slots = self.slots.write();
        if slots
            .get(&owner_id)
            .is_some_and(|slot| Arc::strong_count(slot) == 1)
        {
            slots.remove(&owner_id);
        }
    }

    /// Writer slots currently held or waited on
    pub fn active_slots(&self) -> usize {
        self.slots.read().len()
    }

    fn append_in_slot(
        &self,
        slot: &mut WriterSlot,
        owner_id: Uuid,
        fragment: &ValidatedFragment,
    ) -> Result<DslVersion, StoreError> {
        if !slot.seeded {
            if let Some(latest) = self.store.get_latest_dsl(owner_id)? {
                slot.last_version = latest.version;
                slot.document = latest.accumulated;
            }
            slot.seeded = true;
            debug!(owner_id = %owner_id, version = slot.last_version, "Accumulator slot seeded");
        }

        let next = slot.last_version + 1;
        let accumulated = if slot.document.is_empty() {
            fragment.text().to_string()
        } else {
            format!("{}\n{}", slot.document, fragment.text())
        };
        let version = DslVersion::new(owner_id, next, fragment.text(), accumulated);

        if let Err(e) = self.store.insert_dsl(&version) {
            // Someone else may own newer versions; reseed on the next append
            slot.seeded = false;
            warn!(owner_id = %owner_id, version = next, error = %e, "DSL insert rejected");
            return Err(e);
        }

        slot.last_version = next;
        slot.document = version.accumulated.clone();

        info!(
            owner_id = %owner_id,
            version = next,
            verb = fragment.verb(),
            "Fragment accumulated"
        );
        Ok(version)
    }

    pub fn get_latest(&self, owner_id: Uuid) -> DSLResult<Option<DslVersion>> {
        Ok(self.store.get_latest_dsl(owner_id)?)
    }

    /// All versions, oldest first
    pub fn get_history(&self, owner_id: Uuid) -> DSLResult<Vec<DslVersion>> {
        Ok(self.store.get_dsl_history(owner_id)?)
    }

    /// The document exactly as it stood after the `version`-th fragment
    pub fn get_by_version(&self, owner_id: Uuid, version: u64) -> DSLResult<DslVersion> {
        self.store
            .get_dsl_history(owner_id)?
            .into_iter()
            .find(|v| v.version == version)
            .ok_or_else(|| StoreError::VersionNotFound { owner_id, version }.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Value, VerbCall};
    use crate::store::InMemoryStore;
    use crate::vocabulary::{ArgType, ArgumentSpec, ValidationContext, VerbDefinition, Vocabulary};
    use proptest::prelude::*;

    fn vocabulary() -> Vocabulary {
        Vocabulary::builder("kyc", "1.0.0")
            .states(&["KYC_NOT_STARTED", "KYC_PENDING"])
            .verb(
                VerbDefinition::new("kyc.note", "case")
                    .arg(ArgumentSpec::required("text", ArgType::String)),
            )
            .build()
            .unwrap()
    }

    fn fragment(text: &str) -> ValidatedFragment {
        let call = VerbCall::new("kyc.note").with_arg("text", Value::String(text.to_string()));
        let validated = vocabulary().validate(&call, &ValidationContext::empty()).unwrap();
        ValidatedFragment::new(
            &validated,
            &StateCheck::Stay {
                state: "KYC_PENDING".to_string(),
            },
        )
    }

    #[test]
    fn test_versions_are_gapless() {
        let accumulator = DslAccumulator::new(Arc::new(InMemoryStore::new()));
        let owner = Uuid::new_v4();
        let cancel = CancellationToken::new();

        let v1 = accumulator.accumulate(owner, &fragment("a"), &cancel).unwrap();
        let v2 = accumulator.accumulate(owner, &fragment("b"), &cancel).unwrap();
        assert_eq!((v1.version, v2.version), (1, 2));
        assert_eq!(v2.accumulated, "(kyc.note :text \"a\")\n(kyc.note :text \"b\")");
        assert_eq!(accumulator.get_by_version(owner, 1).unwrap().accumulated, v1.accumulated);
    }

    #[test]
    fn test_counter_seeded_from_store() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let owner = Uuid::new_v4();
        store
            .insert_dsl(&DslVersion::new(owner, 1, "(kyc.begin)", "(kyc.begin)"))
            .unwrap();

        let accumulator = DslAccumulator::new(store);
        let version = accumulator.append(owner, &fragment("next")).unwrap();
        assert_eq!(version.version, 2);
        assert!(version.accumulated.starts_with("(kyc.begin)\n"));
    }

    #[test]
    fn test_released_slot_reseeds_from_store() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let owner = Uuid::new_v4();
        let accumulator = DslAccumulator::new(store.clone());
        accumulator.append(owner, &fragment("a")).unwrap();
        assert_eq!(accumulator.active_slots(), 0);

        // A second writer sharing the store claims version 2
        store
            .insert_dsl(&DslVersion::new(owner, 2, "(kyc.other)", "(kyc.note :text \"a\")\n(kyc.other)"))
            .unwrap();

        let next = accumulator.append(owner, &fragment("b")).unwrap();
        assert_eq!(next.version, 3);
        assert!(next.accumulated.contains("(kyc.other)"));
        assert_eq!(accumulator.active_slots(), 0);
    }

    #[test]
    fn test_slots_do_not_outlive_writers() {
        let accumulator = DslAccumulator::new(Arc::new(InMemoryStore::new()));
        let cancel = CancellationToken::new();
        for _ in 0..16 {
            accumulator
                .accumulate(Uuid::new_v4(), &fragment("x"), &cancel)
                .unwrap();
        }
        assert_eq!(accumulator.active_slots(), 0);
    }

    #[test]
    fn test_cancelled_accumulate_writes_nothing() {
        let accumulator = DslAccumulator::new(Arc::new(InMemoryStore::new()));
        let owner = Uuid::new_v4();
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert!(accumulator.accumulate(owner, &fragment("a"), &cancel).is_err());
        assert!(accumulator.get_history(owner).unwrap().is_empty());
    }

    #[test]
    fn test_missing_version() {
        let accumulator = DslAccumulator::new(Arc::new(InMemoryStore::new()));
        let err = accumulator.get_by_version(Uuid::new_v4(), 4).unwrap_err();
        assert_eq!(err.reason_code().split(':').next(), Some("store.version_not_found"));
    }

    proptest! {
        #[test]
        fn prop_history_replays_document(texts in proptest::collection::vec("[a-z ]{0,12}", 1..12)) {
            let accumulator = DslAccumulator::new(Arc::new(InMemoryStore::new()));
            let owner = Uuid::new_v4();
            let cancel = CancellationToken::new();
            let fragments: Vec<ValidatedFragment> = texts.iter().map(|t| fragment(t)).collect();

            for f in &fragments {
                accumulator.accumulate(owner, f, &cancel).unwrap();
            }

            let history = accumulator.get_history(owner).unwrap();
            prop_assert_eq!(history.len(), fragments.len());
            for (k, (version, f)) in history.iter().zip(&fragments).enumerate() {
                prop_assert_eq!(version.version, k as u64 + 1);
                prop_assert_eq!(&version.fragment, f.text());
                let expected: Vec<&str> = fragments[..=k].iter().map(|f| f.text()).collect();
                prop_assert_eq!(&accumulator.get_by_version(owner, k as u64 + 1).unwrap().accumulated, &expected.join("\n"));
            }
        }
    }
}
