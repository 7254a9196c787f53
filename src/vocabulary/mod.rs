//! Vocabulary: declarative verb and argument schemas for one domain
//!
//! A [`Vocabulary`] is built once per domain through [`VocabularyBuilder`]
//! (which compiles every regex constraint up front) and is immutable
//! afterwards. Validation of candidate invocations lives in [`validator`].

pub mod attributes;
pub mod export;
pub mod validator;

pub use attributes::{AttributeDefinition, AttributeDictionary, InMemoryAttributeDictionary};
pub use export::{ArgumentExport, VerbExport, VocabularyExport};
pub use validator::{ValidatedCall, ValidationContext};

use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use crate::ast::{Value, VerbCall};
use crate::error::{RegistryError, ValidationError};

/// Minimum Jaro-Winkler similarity for "did you mean" suggestions
const VERB_SIMILARITY_THRESHOLD: f64 = 0.8;

// ============================================================================
// ARGUMENT SCHEMA
// ============================================================================

/// Semantic type of an argument
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgType {
    String,
    Uuid,
    Decimal,
    Date,
    Boolean,
    Enum(Vec<String>),
}

impl ArgType {
    /// Enum type from a list of allowed values
    pub fn one_of(values: &[&str]) -> Self {
        ArgType::Enum(values.iter().map(|v| v.to_string()).collect())
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ArgType::String => "string",
            ArgType::Uuid => "uuid",
            ArgType::Decimal => "decimal",
            ArgType::Date => "date",
            ArgType::Boolean => "boolean",
            ArgType::Enum(_) => "enum",
        }
    }
}

impl fmt::Display for ArgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgType::Enum(values) => write!(f, "enum({})", values.join("|")),
            other => write!(f, "{}", other.type_name()),
        }
    }
}

/// Per-argument value constraint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgConstraint {
    /// Regex the whole value must match; `rule` is the human-readable message
    Pattern { pattern: String, rule: String },
    Min { value: Decimal, inclusive: bool },
    Max { value: Decimal, inclusive: bool },
    MinLength(usize),
    MaxLength(usize),
}

impl ArgConstraint {
    /// Rule text reported when the constraint is violated
    pub fn rule(&self) -> String {
        match self {
            ArgConstraint::Pattern { rule, .. } => rule.clone(),
            ArgConstraint::Min { value, inclusive } => {
                format!("must be {} {}", if *inclusive { ">=" } else { ">" }, value)
            }
            ArgConstraint::Max { value, inclusive } => {
                format!("must be {} {}", if *inclusive { "<=" } else { "<" }, value)
            }
            ArgConstraint::MinLength(n) => format!("must be at least {} characters", n),
            ArgConstraint::MaxLength(n) => format!("must be at most {} characters", n),
        }
    }
}

/// Where a missing argument's value comes from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultValue {
    Literal(Value),
    /// Shared-context key, e.g. `kyc_case_id`
    FromContext(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArgumentSpec {
    pub name: String,
    pub arg_type: ArgType,
    pub required: bool,
    pub constraints: Vec<ArgConstraint>,
    pub default: Option<DefaultValue>,
    pub description: String,
}

impl ArgumentSpec {
    pub fn required(name: impl Into<String>, arg_type: ArgType) -> Self {
        Self {
            name: name.into(),
            arg_type,
            required: true,
            constraints: Vec::new(),
            default: None,
            description: String::new(),
        }
    }

    pub fn optional(name: impl Into<String>, arg_type: ArgType) -> Self {
        Self {
            required: false,
            ..Self::required(name, arg_type)
        }
    }

    pub fn pattern(mut self, pattern: &str, rule: &str) -> Self {
        self.constraints.push(ArgConstraint::Pattern {
            pattern: pattern.to_string(),
            rule: rule.to_string(),
        });
        self
    }

    /// Strictly greater than `value`
    pub fn greater_than(mut self, value: Decimal) -> Self {
        self.constraints.push(ArgConstraint::Min {
            value,
            inclusive: false,
        });
        self
    }

    pub fn range(mut self, min: Decimal, max: Decimal) -> Self {
        self.constraints.push(ArgConstraint::Min {
            value: min,
            inclusive: true,
        });
        self.constraints.push(ArgConstraint::Max {
            value: max,
            inclusive: true,
        });
        self
    }

    pub fn length(mut self, min: usize, max: usize) -> Self {
        self.constraints.push(ArgConstraint::MinLength(min));
        self.constraints.push(ArgConstraint::MaxLength(max));
        self
    }

    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(DefaultValue::Literal(value));
        self
    }

    pub fn from_context(mut self, key: &str) -> Self {
        self.default = Some(DefaultValue::FromContext(key.to_string()));
        self
    }

    pub fn describe(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }
}

// ============================================================================
// VERB SCHEMA
// ============================================================================

/// Structural transition a verb performs when it commits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    pub from_states: BTreeSet<String>,
    pub to_state: String,
}

impl StateTransition {
    pub fn new(from_states: &[&str], to_state: &str) -> Self {
        Self {
            from_states: from_states.iter().map(|s| s.to_string()).collect(),
            to_state: to_state.to_string(),
        }
    }

    pub fn allows_from(&self, state: &str) -> bool {
        self.from_states.contains(state)
    }
}

/// Cross-argument constraint on one verb
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerbConstraint {
    ExactlyOneOf(Vec<String>),
    AtLeastOneOf(Vec<String>),
}

impl VerbConstraint {
    pub fn names(&self) -> &[String] {
        match self {
            VerbConstraint::ExactlyOneOf(names) | VerbConstraint::AtLeastOneOf(names) => names,
        }
    }

    pub fn rule(&self) -> String {
        match self {
            VerbConstraint::ExactlyOneOf(names) => {
                format!("exactly one of {} must be provided", names.join(", "))
            }
            VerbConstraint::AtLeastOneOf(names) => {
                format!("at least one of {} must be provided", names.join(", "))
            }
        }
    }

    /// Whether `present` (count of provided member arguments) satisfies the rule
    pub fn is_satisfied(&self, present: usize) -> bool {
        match self {
            VerbConstraint::ExactlyOneOf(_) => present == 1,
            VerbConstraint::AtLeastOneOf(_) => present >= 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerbDefinition {
    pub name: String,
    pub category: String,
    pub description: String,
    pub args: Vec<ArgumentSpec>,
    pub transition: Option<StateTransition>,
    /// Extra guards evaluated on top of the edge guards
    pub guards: Vec<String>,
    pub idempotent: bool,
    pub constraints: Vec<VerbConstraint>,
    /// Context key that receives a fresh identifier when the verb commits
    pub produces: Option<String>,
    /// Shared-context facts established when the verb commits
    pub sets: Vec<(String, serde_json::Value)>,
}

impl VerbDefinition {
    pub fn new(name: &str, category: &str) -> Self {
        Self {
            name: name.to_string(),
            category: category.to_string(),
            description: String::new(),
            args: Vec::new(),
            transition: None,
            guards: Vec::new(),
            idempotent: false,
            constraints: Vec::new(),
            produces: None,
            sets: Vec::new(),
        }
    }

    pub fn describe(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn arg(mut self, spec: ArgumentSpec) -> Self {
        self.args.push(spec);
        self
    }

    pub fn transition(mut self, from_states: &[&str], to_state: &str) -> Self {
        self.transition = Some(StateTransition::new(from_states, to_state));
        self
    }

    pub fn guard(mut self, name: &str) -> Self {
        self.guards.push(name.to_string());
        self
    }

    pub fn idempotent(mut self) -> Self {
        self.idempotent = true;
        self
    }

    pub fn exactly_one_of(mut self, names: &[&str]) -> Self {
        self.constraints.push(VerbConstraint::ExactlyOneOf(
            names.iter().map(|n| n.to_string()).collect(),
        ));
        self
    }

    pub fn at_least_one_of(mut self, names: &[&str]) -> Self {
        self.constraints.push(VerbConstraint::AtLeastOneOf(
            names.iter().map(|n| n.to_string()).collect(),
        ));
        self
    }

    pub fn produces(mut self, context_key: &str) -> Self {
        self.produces = Some(context_key.to_string());
        self
    }

    pub fn sets(mut self, context_key: &str, value: serde_json::Value) -> Self {
        self.sets.push((context_key.to_string(), value));
        self
    }

    pub fn arg_spec(&self, name: &str) -> Option<&ArgumentSpec> {
        self.args.iter().find(|a| a.name == name)
    }

    /// Namespace part of the verb name
    pub fn namespace(&self) -> &str {
        self.name.split('.').next().unwrap_or(&self.name)
    }
}

/// Check verb name format: namespace.action, alphanumeric plus hyphens
pub fn is_valid_verb_name(verb: &str) -> bool {
    let parts: Vec<&str> = verb.split('.').collect();
    parts.len() == 2
        && parts.iter().all(|part| {
            !part.is_empty()
                && part.starts_with(|c: char| c.is_ascii_alphabetic())
                && part
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        })
}

// ============================================================================
// VOCABULARY
// ============================================================================

/// Immutable verb catalogue of one domain
#[derive(Debug, Clone)]
pub struct Vocabulary {
    domain: String,
    version: String,
    verbs: Vec<VerbDefinition>,
    index: HashMap<String, usize>,
    categories: BTreeMap<String, Vec<String>>,
    states: Vec<String>,
    patterns: HashMap<String, Regex>,
}

impl Vocabulary {
    pub fn builder(domain: &str, version: &str) -> VocabularyBuilder {
        VocabularyBuilder {
            domain: domain.to_string(),
            version: version.to_string(),
            verbs: Vec::new(),
            categories: BTreeMap::new(),
            states: Vec::new(),
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Verb definitions in declaration order
    pub fn verbs(&self) -> &[VerbDefinition] {
        &self.verbs
    }

    pub fn verb_names(&self) -> Vec<String> {
        self.verbs.iter().map(|v| v.name.clone()).collect()
    }

    pub fn get(&self, verb: &str) -> Option<&VerbDefinition> {
        self.index.get(verb).map(|&i| &self.verbs[i])
    }

    pub fn contains(&self, verb: &str) -> bool {
        self.index.contains_key(verb)
    }

    pub fn categories(&self) -> &BTreeMap<String, Vec<String>> {
        &self.categories
    }

    pub fn category(&self, name: &str) -> Option<&[String]> {
        self.categories.get(name).map(Vec::as_slice)
    }

    /// Declared lifecycle states
    pub fn states(&self) -> &[String] {
        &self.states
    }

    pub fn declares_state(&self, state: &str) -> bool {
        self.states.iter().any(|s| s == state)
    }

    /// Verb names declared more than once, in declaration order
    pub fn duplicate_verbs(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut duplicates = Vec::new();
        for verb in &self.verbs {
            if !seen.insert(verb.name.as_str()) && !duplicates.contains(&verb.name) {
                duplicates.push(verb.name.clone());
            }
        }
        duplicates
    }

    pub(crate) fn pattern(&self, pattern: &str) -> Option<&Regex> {
        self.patterns.get(pattern)
    }

    /// Closest verb names by Jaro-Winkler similarity, best first
    pub fn suggest(&self, verb: &str) -> Vec<String> {
        let mut scored: Vec<(String, f64)> = self
            .verbs
            .iter()
            .map(|v| (v.name.clone(), strsim::jaro_winkler(verb, &v.name)))
            .filter(|(_, score)| *score >= VERB_SIMILARITY_THRESHOLD)
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.dedup_by(|a, b| a.0 == b.0);
        scored.into_iter().take(3).map(|(v, _)| v).collect()
    }

    /// Validate one candidate invocation; see [`validator::validate_call`]
    pub fn validate(
        &self,
        call: &VerbCall,
        context: &ValidationContext<'_>,
    ) -> Result<ValidatedCall, ValidationError> {
        validator::validate_call(self, call, context)
    }
}

pub struct VocabularyBuilder {
    domain: String,
    version: String,
    verbs: Vec<VerbDefinition>,
    categories: BTreeMap<String, Vec<String>>,
    states: Vec<String>,
}

impl VocabularyBuilder {
    pub fn states(mut self, states: &[&str]) -> Self {
        self.states.extend(states.iter().map(|s| s.to_string()));
        self
    }

    pub fn verb(mut self, verb: VerbDefinition) -> Self {
        self.verbs.push(verb);
        self
    }

    /// Explicit category listing; verbs are also filed under their own category
    pub fn category(mut self, name: &str, verbs: &[&str]) -> Self {
        let members = self.categories.entry(name.to_string()).or_default();
        for verb in verbs {
            if !members.iter().any(|m| m == verb) {
                members.push(verb.to_string());
            }
        }
        self
    }

    /// Compile patterns and index verbs. Duplicate names are kept so the
    /// registry can reject them with the offending name.
    pub fn build(self) -> Result<Vocabulary, RegistryError> {
        let mut patterns = HashMap::new();
        for verb in &self.verbs {
            for arg in &verb.args {
                for constraint in &arg.constraints {
                    if let ArgConstraint::Pattern { pattern, .. } = constraint {
                        if patterns.contains_key(pattern) {
                            continue;
                        }
                        let regex =
                            Regex::new(pattern).map_err(|e| RegistryError::InvalidPattern {
                                verb: verb.name.clone(),
                                argument: arg.name.clone(),
                                message: e.to_string(),
                            })?;
                        patterns.insert(pattern.clone(), regex);
                    }
                }
            }
        }

        let mut index = HashMap::new();
        let mut categories = self.categories;
        for (i, verb) in self.verbs.iter().enumerate() {
            index.entry(verb.name.clone()).or_insert(i);
            let members = categories.entry(verb.category.clone()).or_default();
            if !members.contains(&verb.name) {
                members.push(verb.name.clone());
            }
        }

        Ok(Vocabulary {
            domain: self.domain,
            version: self.version,
            verbs: self.verbs,
            index,
            categories,
            states: self.states,
            patterns,
        })
    }
}
