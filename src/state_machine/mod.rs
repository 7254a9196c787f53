//! Guarded state machine for one domain lifecycle.
//!
//! The machine is an adjacency map plus a guard table keyed by edge. It is
//! immutable once built; committing transitions is the job of
//! [`lifecycle::LifecycleManager`].

pub mod guards;
pub mod lifecycle;

pub use guards::{evaluate_guard, Comparison, FlagGuard, Guard, PredicateGuard, PresenceGuard, ThresholdGuard};
pub use lifecycle::LifecycleManager;

use dsl_types::{ContextMap, EntityRecord};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use crate::error::{RegistryError, StateError};

/// Outcome of checking a verb against an entity's current state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateCheck {
    /// The verb moves the entity between two states
    Transition { from: String, to: String },
    /// The verb leaves the state unchanged
    Stay { state: String },
}

impl StateCheck {
    pub fn resulting_state(&self) -> &str {
        match self {
            StateCheck::Transition { to, .. } => to,
            StateCheck::Stay { state } => state,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StateMachine {
    domain: String,
    initial_state: String,
    transitions: BTreeMap<String, Vec<String>>,
    edge_guards: HashMap<(String, String), Vec<String>>,
    guards: HashMap<String, Arc<dyn Guard>>,
}

impl StateMachine {
    pub fn builder(domain: &str, initial_state: &str) -> StateMachineBuilder {
        StateMachineBuilder {
            domain: domain.to_string(),
            initial_state: initial_state.to_string(),
            transitions: BTreeMap::new(),
            edge_guards: HashMap::new(),
            guards: HashMap::new(),
            terminal: Vec::new(),
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn initial_state(&self) -> &str {
        &self.initial_state
    }

    /// Every state that appears as a source or target
    pub fn states(&self) -> Vec<String> {
        let mut states: Vec<String> = Vec::new();
        for (from, targets) in &self.transitions {
            for state in std::iter::once(from).chain(targets) {
                if !states.contains(state) {
                    states.push(state.clone());
                }
            }
        }
        states
    }

    pub fn knows_state(&self, state: &str) -> bool {
        self.transitions.contains_key(state)
            || self.transitions.values().any(|targets| targets.iter().any(|t| t == state))
    }

    /// Allowed next states
    pub fn transitions_from(&self, state: &str) -> &[String] {
        self.transitions.get(state).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Pure adjacency lookup
    pub fn can_transition(&self, from: &str, to: &str) -> bool {
        self.transitions_from(from).iter().any(|s| s == to)
    }

    /// True for states with no outgoing edges (including unknown states)
    pub fn is_terminal_state(&self, state: &str) -> bool {
        self.transitions_from(state).is_empty()
    }

    /// Guards registered on an edge, in declaration order
    pub fn guards_for(&self, from: &str, to: &str) -> &[String] {
        self.edge_guards
            .get(&(from.to_string(), to.to_string()))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn has_guard(&self, name: &str) -> bool {
        self.guards.contains_key(name)
    }

    pub fn guard(&self, name: &str) -> Option<&Arc<dyn Guard>> {
        self.guards.get(name)
    }

    /// Structural check followed by every edge guard in declaration order.
    pub fn validate_transition(
        &self,
        entity: &EntityRecord,
        to: &str,
        context: &ContextMap,
    ) -> Result<(), StateError> {
        let from = entity.current_state.as_str();
        if !self.knows_state(to) {
            return Err(StateError::UnknownState {
                state: to.to_string(),
            });
        }
        if self.is_terminal_state(from) {
            return Err(StateError::TerminalState {
                state: from.to_string(),
            });
        }
        if !self.can_transition(from, to) {
            return Err(StateError::IllegalTransition {
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        self.evaluate_guards(self.guards_for(from, to), entity, context)
    }

    /// Evaluate named guards in order, stopping at the first failure
    pub fn evaluate_guards(
        &self,
        names: &[String],
        entity: &EntityRecord,
        context: &ContextMap,
    ) -> Result<(), StateError> {
        for name in names {
            let guard = self.guards.get(name).ok_or_else(|| StateError::GuardFailed {
                guard: name.clone(),
                description: "guard is not registered".to_string(),
            })?;
            evaluate_guard(guard.as_ref(), entity, context)?;
        }
        Ok(())
    }

    /// Shortest explicit path (BFS), including both endpoints
    pub fn state_transition_path(&self, from: &str, to: &str) -> Result<Vec<String>, StateError> {
        if !self.knows_state(from) {
            return Err(StateError::UnknownState {
                state: from.to_string(),
            });
        }
        if from == to {
            return Ok(vec![from.to_string()]);
        }

        let mut previous: HashMap<&str, &str> = HashMap::new();
        let mut visited: HashSet<&str> = HashSet::from([from]);
        let mut queue: VecDeque<&str> = VecDeque::from([from]);

        while let Some(state) = queue.pop_front() {
            for next in self.transitions_from(state) {
                if !visited.insert(next.as_str()) {
                    continue;
                }
                previous.insert(next.as_str(), state);
                if next == to {
                    let mut path = vec![to.to_string()];
                    let mut cursor = to;
                    while let Some(&prev) = previous.get(cursor) {
                        path.push(prev.to_string());
                        cursor = prev;
                    }
                    path.reverse();
                    return Ok(path);
                }
                queue.push_back(next.as_str());
            }
        }

        Err(StateError::NoPath {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

pub struct StateMachineBuilder {
    domain: String,
    initial_state: String,
    transitions: BTreeMap<String, Vec<String>>,
    edge_guards: HashMap<(String, String), Vec<String>>,
    guards: HashMap<String, Arc<dyn Guard>>,
    terminal: Vec<String>,
}

impl StateMachineBuilder {
    /// Allow `from -> to` for each target
    pub fn transition(mut self, from: &str, to: &[&str]) -> Self {
        let targets = self.transitions.entry(from.to_string()).or_default();
        for state in to {
            if !targets.iter().any(|t| t == state) {
                targets.push(state.to_string());
            }
        }
        self
    }

    /// Allow `from -> to` for every listed source
    pub fn from_each(mut self, from: &[&str], to: &str) -> Self {
        for state in from {
            self = self.transition(state, &[to]);
        }
        self
    }

    /// Declare a state with no outgoing edges
    pub fn terminal(mut self, state: &str) -> Self {
        self.terminal.push(state.to_string());
        self
    }

    /// Attach named guards to an edge, evaluated in the given order
    pub fn guarded(mut self, from: &str, to: &str, guard_names: &[&str]) -> Self {
        self.edge_guards
            .entry((from.to_string(), to.to_string()))
            .or_default()
            .extend(guard_names.iter().map(|g| g.to_string()));
        self
    }

    pub fn guard(mut self, guard: impl Guard + 'static) -> Self {
        self.guards.insert(guard.name().to_string(), Arc::new(guard));
        self
    }

    pub fn build(mut self) -> Result<StateMachine, RegistryError> {
        for state in &self.terminal {
            if self.transitions.get(state).map_or(false, |t| !t.is_empty()) {
                return Err(RegistryError::InvalidTransition {
                    domain: self.domain.clone(),
                    verb: "<terminal>".to_string(),
                    from: state.clone(),
                    to: self.transitions[state].join("|"),
                });
            }
        }
        for ((from, to), names) in &self.edge_guards {
            if !self.transitions.get(from).map_or(false, |t| t.contains(to)) {
                return Err(RegistryError::InvalidTransition {
                    domain: self.domain.clone(),
                    verb: "<guard table>".to_string(),
                    from: from.clone(),
                    to: to.clone(),
                });
            }
            if let Some(name) = names.iter().find(|n| !self.guards.contains_key(*n)) {
                return Err(RegistryError::UnknownGuard {
                    domain: self.domain.clone(),
                    guard: name.clone(),
                });
            }
        }
        for state in std::mem::take(&mut self.terminal) {
            self.transitions.entry(state).or_default();
        }

        Ok(StateMachine {
            domain: self.domain,
            initial_state: self.initial_state,
            transitions: self.transitions,
            edge_guards: self.edge_guards,
            guards: self.guards,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn kyc_machine() -> StateMachine {
        StateMachine::builder("kyc", "KYC_NOT_STARTED")
            .transition("KYC_NOT_STARTED", &["KYC_PENDING"])
            .transition("KYC_PENDING", &["KYC_IN_REVIEW", "KYC_APPROVED", "KYC_REJECTED"])
            .transition("KYC_IN_REVIEW", &["KYC_APPROVED", "KYC_REJECTED"])
            .terminal("KYC_APPROVED")
            .terminal("KYC_REJECTED")
            .guard(FlagGuard::new("documents_verified", "All KYC documents must be verified"))
            .guard(FlagGuard::new("screening_clear", "Screening must be clear"))
            .guarded("KYC_PENDING", "KYC_APPROVED", &["documents_verified"])
            .guarded("KYC_IN_REVIEW", "KYC_APPROVED", &["documents_verified", "screening_clear"])
            .build()
            .unwrap()
    }

    fn entity_in(state: &str) -> EntityRecord {
        EntityRecord::new("CORPORATE", "kyc", state, "test")
    }

    #[test]
    fn test_adjacency_and_terminal() {
        let machine = kyc_machine();
        assert!(machine.can_transition("KYC_PENDING", "KYC_APPROVED"));
        assert!(!machine.can_transition("KYC_NOT_STARTED", "KYC_APPROVED"));
        assert!(machine.is_terminal_state("KYC_APPROVED"));
        assert!(machine.is_terminal_state("NOT_A_STATE"));
        assert!(!machine.is_terminal_state("KYC_PENDING"));
        assert!(machine.transitions_from("KYC_REJECTED").is_empty());
    }

    #[test]
    fn test_guarded_edge() {
        let machine = kyc_machine();
        let entity = entity_in("KYC_PENDING");

        let mut context = ContextMap::new();
        context.insert("documents_verified".to_string(), json!(false));
        let err = machine
            .validate_transition(&entity, "KYC_APPROVED", &context)
            .unwrap_err();
        assert_eq!(err.reason_code(), "state.guard_failed:documents_verified");

        context.insert("documents_verified".to_string(), json!(true));
        assert!(machine.validate_transition(&entity, "KYC_APPROVED", &context).is_ok());
    }

    #[test]
    fn test_guards_run_in_declaration_order() {
        let machine = kyc_machine();
        let entity = entity_in("KYC_IN_REVIEW");
        let mut context = ContextMap::new();
        context.insert("documents_verified".to_string(), json!(true));

        let err = machine
            .validate_transition(&entity, "KYC_APPROVED", &context)
            .unwrap_err();
        assert_eq!(
            err,
            StateError::GuardUnevaluable {
                guard: "screening_clear".to_string(),
                key: "screening_clear".to_string()
            }
        );
    }

    #[test]
    fn test_terminal_and_illegal() {
        let machine = kyc_machine();
        let err = machine
            .validate_transition(&entity_in("KYC_APPROVED"), "KYC_PENDING", &ContextMap::new())
            .unwrap_err();
        assert!(matches!(err, StateError::TerminalState { .. }));

        let err = machine
            .validate_transition(&entity_in("KYC_NOT_STARTED"), "KYC_REJECTED", &ContextMap::new())
            .unwrap_err();
        assert!(matches!(err, StateError::IllegalTransition { .. }));
    }

    #[test]
    fn test_shortest_path() {
        let machine = kyc_machine();
        assert_eq!(
            machine
                .state_transition_path("KYC_NOT_STARTED", "KYC_APPROVED")
                .unwrap(),
            vec!["KYC_NOT_STARTED", "KYC_PENDING", "KYC_APPROVED"]
        );
        assert!(matches!(
            machine.state_transition_path("KYC_APPROVED", "KYC_PENDING"),
            Err(StateError::NoPath { .. })
        ));
    }

    #[test]
    fn test_guard_on_missing_edge_rejected() {
        let result = StateMachine::builder("kyc", "A")
            .transition("A", &["B"])
            .guard(FlagGuard::new("flag", "flag"))
            .guarded("B", "A", &["flag"])
            .build();
        assert!(matches!(result, Err(RegistryError::InvalidTransition { .. })));

        let result = StateMachine::builder("kyc", "A")
            .transition("A", &["B"])
            .guarded("A", "B", &["missing"])
            .build();
        assert!(matches!(result, Err(RegistryError::UnknownGuard { .. })));
    }
}
