//! Guard Evaluation
//!
//! Guards are named predicates over an entity and the resolved context. Each
//! guard declares the context keys it needs; the state machine refuses to run
//! a guard whose keys are missing instead of treating it as passed.

use dsl_types::{ContextMap, EntityRecord};
use rust_decimal::Decimal;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::StateError;

/// A named transition predicate
pub trait Guard: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Context keys that must be present before `evaluate` runs
    fn required_keys(&self) -> Vec<String>;

    fn evaluate(&self, entity: &EntityRecord, context: &ContextMap) -> anyhow::Result<bool>;
}

impl fmt::Debug for dyn Guard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Guard").field("name", &self.name()).finish()
    }
}

/// Run one guard: required keys first, then the predicate.
pub fn evaluate_guard(
    guard: &dyn Guard,
    entity: &EntityRecord,
    context: &ContextMap,
) -> Result<(), StateError> {
    for key in guard.required_keys() {
        if !context.contains_key(&key) {
            return Err(StateError::GuardUnevaluable {
                guard: guard.name().to_string(),
                key,
            });
        }
    }

    match guard.evaluate(entity, context) {
        Ok(true) => Ok(()),
        Ok(false) => Err(StateError::GuardFailed {
            guard: guard.name().to_string(),
            description: guard.description().to_string(),
        }),
        Err(e) => Err(StateError::GuardFailed {
            guard: guard.name().to_string(),
            description: format!("{} ({})", guard.description(), e),
        }),
    }
}

// ============================================================================
// STANDARD GUARDS
// ============================================================================

/// Passes when a boolean context flag is true
#[derive(Debug, Clone)]
pub struct FlagGuard {
    name: String,
    description: String,
    key: String,
}

impl FlagGuard {
    /// Guard named after the flag it reads
    pub fn new(key: &str, description: &str) -> Self {
        Self {
            name: key.to_string(),
            description: description.to_string(),
            key: key.to_string(),
        }
    }
}

impl Guard for FlagGuard {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn required_keys(&self) -> Vec<String> {
        vec![self.key.clone()]
    }

    fn evaluate(&self, _entity: &EntityRecord, context: &ContextMap) -> anyhow::Result<bool> {
        match context.get(&self.key) {
            Some(serde_json::Value::Bool(flag)) => Ok(*flag),
            Some(serde_json::Value::String(s)) if s == "true" || s == "false" => Ok(s == "true"),
            Some(other) => anyhow::bail!("context key '{}' is not a boolean: {}", self.key, other),
            None => Ok(false),
        }
    }
}

/// Passes when a context key holds a non-empty value
#[derive(Debug, Clone)]
pub struct PresenceGuard {
    name: String,
    description: String,
    key: String,
}

impl PresenceGuard {
    pub fn new(name: &str, key: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            key: key.to_string(),
        }
    }
}

impl Guard for PresenceGuard {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    // Presence is the predicate itself, so nothing is required up front
    fn required_keys(&self) -> Vec<String> {
        Vec::new()
    }

    fn evaluate(&self, _entity: &EntityRecord, context: &ContextMap) -> anyhow::Result<bool> {
        Ok(match context.get(&self.key) {
            None | Some(serde_json::Value::Null) => false,
            Some(serde_json::Value::String(s)) => !s.trim().is_empty(),
            Some(serde_json::Value::Array(items)) => !items.is_empty(),
            Some(_) => true,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Equal,
    AtLeast,
    AtMost,
}

/// Compares a numeric context value against a threshold
#[derive(Debug, Clone)]
pub struct ThresholdGuard {
    name: String,
    description: String,
    key: String,
    comparison: Comparison,
    threshold: Decimal,
}

impl ThresholdGuard {
    pub fn new(
        name: &str,
        key: &str,
        comparison: Comparison,
        threshold: Decimal,
        description: &str,
    ) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            key: key.to_string(),
            comparison,
            threshold,
        }
    }
}

impl Guard for ThresholdGuard {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn required_keys(&self) -> Vec<String> {
        vec![self.key.clone()]
    }

    fn evaluate(&self, _entity: &EntityRecord, context: &ContextMap) -> anyhow::Result<bool> {
        let value = match context.get(&self.key) {
            Some(serde_json::Value::Number(n)) => Decimal::from_str(&n.to_string())
                .or_else(|_| Decimal::from_scientific(&n.to_string()))?,
            Some(serde_json::Value::String(s)) => Decimal::from_str(s.trim())?,
            other => anyhow::bail!("context key '{}' is not numeric: {:?}", self.key, other),
        };

        Ok(match self.comparison {
            Comparison::Equal => value == self.threshold,
            Comparison::AtLeast => value >= self.threshold,
            Comparison::AtMost => value <= self.threshold,
        })
    }
}

type Predicate = dyn Fn(&EntityRecord, &ContextMap) -> anyhow::Result<bool> + Send + Sync;

/// Arbitrary predicate with a declared key contract
#[derive(Clone)]
pub struct PredicateGuard {
    name: String,
    description: String,
    required_keys: Vec<String>,
    predicate: Arc<Predicate>,
}

impl PredicateGuard {
    pub fn new<F>(name: &str, description: &str, required_keys: &[&str], predicate: F) -> Self
    where
        F: Fn(&EntityRecord, &ContextMap) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            required_keys: required_keys.iter().map(|k| k.to_string()).collect(),
            predicate: Arc::new(predicate),
        }
    }
}

impl Guard for PredicateGuard {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn required_keys(&self) -> Vec<String> {
        self.required_keys.clone()
    }

    fn evaluate(&self, entity: &EntityRecord, context: &ContextMap) -> anyhow::Result<bool> {
        (self.predicate)(entity, context)
    }
}
