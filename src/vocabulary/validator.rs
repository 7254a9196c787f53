//! Argument validation for verb invocations.
//!
//! Pure and side-effect free: the whole invocation is either accepted as a
//! [`ValidatedCall`] or rejected with every violation found.

use chrono::NaiveDate;
use dsl_types::ContextMap;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::str::FromStr;
use uuid::Uuid;

use super::{ArgConstraint, ArgType, ArgumentSpec, DefaultValue, StateTransition, VerbDefinition, Vocabulary};
use super::attributes::AttributeDictionary;
use crate::ast::{ArgKey, Argument, Value, VerbCall};
use crate::error::{ValidationError, Violation};

static EMPTY_CONTEXT: ContextMap = ContextMap::new();

/// Runtime values available while validating.
#[derive(Clone, Copy)]
pub struct ValidationContext<'a> {
    /// Shared context used for `FromContext` defaults
    pub context: &'a ContextMap,
    /// Dictionary resolving `@attr{uuid}` keys
    pub attributes: Option<&'a dyn AttributeDictionary>,
}

impl<'a> ValidationContext<'a> {
    pub fn new(context: &'a ContextMap) -> Self {
        Self {
            context,
            attributes: None,
        }
    }

    pub fn empty() -> ValidationContext<'static> {
        ValidationContext {
            context: &EMPTY_CONTEXT,
            attributes: None,
        }
    }

    pub fn with_attributes(mut self, attributes: &'a dyn AttributeDictionary) -> Self {
        self.attributes = Some(attributes);
        self
    }
}

/// An invocation that passed vocabulary validation.
///
/// Arguments are normalized to their declared types and missing arguments
/// are filled from context or static defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedCall {
    domain: String,
    call: VerbCall,
    definition: VerbDefinition,
    context_injected: Vec<String>,
    defaulted: Vec<String>,
    attribute_values: Vec<(Uuid, Value)>,
}

impl ValidatedCall {
    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn verb(&self) -> &str {
        &self.definition.name
    }

    /// Normalized call, as it will be rendered into the document
    pub fn call(&self) -> &VerbCall {
        &self.call
    }

    pub fn definition(&self) -> &VerbDefinition {
        &self.definition
    }

    pub fn transition(&self) -> Option<&StateTransition> {
        self.definition.transition.as_ref()
    }

    /// Arguments filled from shared context
    pub fn context_injected(&self) -> &[String] {
        &self.context_injected
    }

    /// Arguments filled from static defaults
    pub fn defaulted(&self) -> &[String] {
        &self.defaulted
    }

    /// Attribute-typed arguments, by attribute id
    pub fn attribute_values(&self) -> &[(Uuid, Value)] {
        &self.attribute_values
    }

    /// Canonical DSL text of the normalized call
    pub fn render(&self) -> String {
        self.call.to_string()
    }
}

struct CallCheck {
    args: Vec<Argument>,
    context_injected: Vec<String>,
    defaulted: Vec<String>,
    attribute_values: Vec<(Uuid, Value)>,
}

/// Validate `call` against `vocabulary`, collecting every violation.
pub fn validate_call(
    vocabulary: &Vocabulary,
    call: &VerbCall,
    context: &ValidationContext<'_>,
) -> Result<ValidatedCall, ValidationError> {
    let mut violations = Vec::new();

    let Some(definition) = vocabulary.get(&call.verb) else {
        return Err(ValidationError::single(
            call.verb.clone(),
            Violation::UnknownVerb {
                verb: call.verb.clone(),
                suggestions: vocabulary.suggest(&call.verb),
            },
        ));
    };

    let checked = check_args(vocabulary, definition, call, context, &mut violations);

    let mut children = Vec::with_capacity(call.children.len());
    for child in &call.children {
        match validate_call(vocabulary, child, context) {
            Ok(validated) => children.push(validated.call),
            Err(err) => violations.extend(err.violations),
        }
    }

    if !violations.is_empty() {
        return Err(ValidationError::new(call.verb.clone(), violations));
    }

    Ok(ValidatedCall {
        domain: vocabulary.domain().to_string(),
        call: VerbCall {
            verb: call.verb.clone(),
            args: checked.args,
            children,
        },
        definition: definition.clone(),
        context_injected: checked.context_injected,
        defaulted: checked.defaulted,
        attribute_values: checked.attribute_values,
    })
}

fn check_args(
    vocabulary: &Vocabulary,
    definition: &VerbDefinition,
    call: &VerbCall,
    context: &ValidationContext<'_>,
    violations: &mut Vec<Violation>,
) -> CallCheck {
    let mut checked = CallCheck {
        args: Vec::new(),
        context_injected: Vec::new(),
        defaulted: Vec::new(),
        attribute_values: Vec::new(),
    };
    let mut provided: HashSet<String> = HashSet::new();

    // 1. Provided arguments, in the order given
    for arg in &call.args {
        let (name, attribute_id) = match &arg.key {
            ArgKey::Keyword(name) => (name.clone(), None),
            ArgKey::Attribute(id) => {
                match context.attributes.and_then(|dict| dict.resolve(id)) {
                    Some(attribute) => (attribute.name, Some(*id)),
                    None => {
                        violations.push(Violation::UnresolvedAttribute { attribute_id: *id });
                        continue;
                    }
                }
            }
        };

        let Some(spec) = definition.arg_spec(&name) else {
            violations.push(Violation::UnknownArgument { name });
            continue;
        };

        if !provided.insert(name.clone()) {
            violations.push(Violation::constraint(&name, "given more than once"));
            continue;
        }

        match check_value(vocabulary, spec, &arg.value) {
            Ok(value) => {
                if let Some(id) = attribute_id {
                    checked.attribute_values.push((id, value.clone()));
                }
                checked.args.push(Argument {
                    key: arg.key.clone(),
                    value,
                });
            }
            Err(rules) => violations.extend(
                rules
                    .into_iter()
                    .map(|rule| Violation::constraint(&spec.name, rule)),
            ),
        }
    }

    // 2. Missing arguments: context default, static default, or violation
    for spec in &definition.args {
        if provided.contains(&spec.name) {
            continue;
        }

        let filled = match &spec.default {
            Some(DefaultValue::FromContext(key)) => context
                .context
                .get(key)
                .map(|json| (Value::from_json(json), true)),
            Some(DefaultValue::Literal(value)) => Some((Some(value.clone()), false)),
            None => None,
        };

        match filled {
            Some((Some(raw), from_context)) => match check_value(vocabulary, spec, &raw) {
                Ok(value) => {
                    checked.args.push(Argument {
                        key: ArgKey::Keyword(spec.name.clone()),
                        value,
                    });
                    provided.insert(spec.name.clone());
                    if from_context {
                        checked.context_injected.push(spec.name.clone());
                    } else {
                        checked.defaulted.push(spec.name.clone());
                    }
                }
                Err(rules) => violations.extend(
                    rules
                        .into_iter()
                        .map(|rule| Violation::constraint(&spec.name, rule)),
                ),
            },
            Some((None, _)) => violations.push(Violation::constraint(
                &spec.name,
                "context value has no DSL representation",
            )),
            None if spec.required => violations.push(Violation::MissingArgument {
                name: spec.name.clone(),
            }),
            None => {}
        }
    }

    // 3. Cross-argument constraints
    for constraint in &definition.constraints {
        let present = constraint
            .names()
            .iter()
            .filter(|name| provided.contains(name.as_str()))
            .count();
        if !constraint.is_satisfied(present) {
            violations.push(Violation::ArgumentGroup {
                names: constraint.names().to_vec(),
                rule: constraint.rule(),
            });
        }
    }

    checked
}

/// Coerce a value to the declared type, then apply every constraint.
/// Returns all failed rules.
fn check_value(
    vocabulary: &Vocabulary,
    spec: &ArgumentSpec,
    value: &Value,
) -> Result<Value, Vec<String>> {
    let typed = coerce(&spec.arg_type, value).map_err(|rule| vec![rule])?;

    let failures: Vec<String> = spec
        .constraints
        .iter()
        .filter(|constraint| !satisfies(vocabulary, constraint, &typed))
        .map(ArgConstraint::rule)
        .collect();

    if failures.is_empty() {
        Ok(typed)
    } else {
        Err(failures)
    }
}

fn coerce(arg_type: &ArgType, value: &Value) -> Result<Value, String> {
    match (arg_type, value) {
        (ArgType::String, Value::String(_)) => Ok(value.clone()),
        (ArgType::String, other) => Err(format!("must be a string, got {}", other.type_name())),

        (ArgType::Uuid, Value::String(s) | Value::Identifier(s)) => Uuid::parse_str(s)
            .map(|id| Value::String(id.to_string()))
            .map_err(|_| "must be a UUID".to_string()),
        (ArgType::Uuid, other) => Err(format!("must be a UUID, got {}", other.type_name())),

        (ArgType::Decimal, Value::Number(_)) => Ok(value.clone()),
        (ArgType::Decimal, Value::String(s)) => Decimal::from_str(s.trim())
            .map(Value::Number)
            .map_err(|_| "must be a decimal".to_string()),
        (ArgType::Decimal, other) => Err(format!("must be a decimal, got {}", other.type_name())),

        (ArgType::Date, Value::Date(_)) => Ok(value.clone()),
        (ArgType::Date, Value::String(s)) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .map(Value::Date)
            .map_err(|_| format!("unparsable date '{}' (expected YYYY-MM-DD)", s)),
        (ArgType::Date, other) => Err(format!("must be a date, got {}", other.type_name())),

        (ArgType::Boolean, Value::Boolean(_)) => Ok(value.clone()),
        (ArgType::Boolean, other) => Err(format!("must be a boolean, got {}", other.type_name())),

        (ArgType::Enum(allowed), Value::String(s) | Value::Identifier(s)) => {
            if allowed.iter().any(|a| a == s) {
                Ok(Value::Identifier(s.clone()))
            } else {
                Err(format!("must be one of {}", allowed.join(", ")))
            }
        }
        (ArgType::Enum(allowed), _) => Err(format!("must be one of {}", allowed.join(", "))),
    }
}

fn satisfies(vocabulary: &Vocabulary, constraint: &ArgConstraint, value: &Value) -> bool {
    match constraint {
        ArgConstraint::Pattern { pattern, .. } => match (value.as_str(), vocabulary.pattern(pattern)) {
            (Some(text), Some(regex)) => regex.is_match(text),
            // Patterns only constrain textual values
            (None, _) => true,
            (Some(_), None) => false,
        },
        ArgConstraint::Min { value: min, inclusive } => match value.as_decimal() {
            Some(n) if *inclusive => n >= *min,
            Some(n) => n > *min,
            None => true,
        },
        ArgConstraint::Max { value: max, inclusive } => match value.as_decimal() {
            Some(n) if *inclusive => n <= *max,
            Some(n) => n < *max,
            None => true,
        },
        ArgConstraint::MinLength(min) => value.as_str().map_or(true, |s| s.chars().count() >= *min),
        ArgConstraint::MaxLength(max) => value.as_str().map_or(true, |s| s.chars().count() <= *max),
    }
}
