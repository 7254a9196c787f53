//! Error handling for the lifecycle engine
//!
//! One `thiserror` enum per concern, aggregated into [`DSLError`]. Every
//! rejection is produced before any mutation and exposes a stable
//! `reason_code()` naming the verb, guard or field involved.

use std::fmt;

use dsl_types::SourceLocation;
use thiserror::Error;
use uuid::Uuid;

/// Main error type for the engine
#[derive(Error, Debug)]
pub enum DSLError {
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Routing error: {0}")]
    Routing(#[from] RoutingError),

    #[error("Orchestration error: {0}")]
    Orchestration(#[from] OrchestrationError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("DSL generation failed in domain '{domain}': {message}")]
    Generation { domain: String, message: String },

    #[error("Operation '{operation}' cancelled before commit")]
    Cancelled { operation: String },
}

impl DSLError {
    pub fn cancelled(operation: impl Into<String>) -> Self {
        DSLError::Cancelled {
            operation: operation.into(),
        }
    }

    /// Stable machine-readable code for the rejection
    pub fn reason_code(&self) -> String {
        match self {
            DSLError::Parse(e) => e.reason_code(),
            DSLError::Validation(e) => e.reason_code(),
            DSLError::State(e) => e.reason_code(),
            DSLError::Routing(e) => e.reason_code(),
            DSLError::Orchestration(e) => e.reason_code(),
            DSLError::Registry(e) => e.reason_code(),
            DSLError::Store(e) => e.reason_code(),
            DSLError::Config(e) => e.reason_code(),
            DSLError::Generation { domain, .. } => format!("generation.failed:{}", domain),
            DSLError::Cancelled { operation } => format!("cancelled:{}", operation),
        }
    }
}

// ============================================================================
// PARSE
// ============================================================================

/// Parse errors from the nom-based DSL parser
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("Syntax error at {location}: {message}")]
    Syntax {
        location: SourceLocation,
        message: String,
    },

    #[error("Unexpected trailing input at {location}")]
    TrailingInput { location: SourceLocation },

    #[error("Empty input: expected at least one verb form")]
    Empty,

    #[error("Expected a single verb form, found {count}")]
    MultipleForms { count: usize },
}

impl ParseError {
    pub fn reason_code(&self) -> String {
        match self {
            ParseError::Syntax { location, .. } => format!("parse.syntax:{}", location),
            ParseError::TrailingInput { location } => format!("parse.trailing_input:{}", location),
            ParseError::Empty => "parse.empty".to_string(),
            ParseError::MultipleForms { .. } => "parse.multiple_forms".to_string(),
        }
    }
}

// ============================================================================
// VALIDATION
// ============================================================================

/// A single problem found while validating one verb invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    UnknownVerb {
        verb: String,
        suggestions: Vec<String>,
    },
    MissingArgument {
        name: String,
    },
    ConstraintViolation {
        name: String,
        rule: String,
    },
    UnknownArgument {
        name: String,
    },
    UnresolvedAttribute {
        attribute_id: Uuid,
    },
    ArgumentGroup {
        names: Vec<String>,
        rule: String,
    },
}

impl Violation {
    pub fn constraint(name: impl Into<String>, rule: impl Into<String>) -> Self {
        Violation::ConstraintViolation {
            name: name.into(),
            rule: rule.into(),
        }
    }

    pub fn reason_code(&self) -> String {
        match self {
            Violation::UnknownVerb { verb, .. } => format!("validation.unknown_verb:{}", verb),
            Violation::MissingArgument { name } => format!("validation.missing_argument:{}", name),
            Violation::ConstraintViolation { name, .. } => {
                format!("validation.constraint_violation:{}", name)
            }
            Violation::UnknownArgument { name } => format!("validation.unknown_argument:{}", name),
            Violation::UnresolvedAttribute { attribute_id } => {
                format!("validation.unresolved_attribute:{}", attribute_id)
            }
            Violation::ArgumentGroup { names, .. } => {
                format!("validation.argument_group:{}", names.join("|"))
            }
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::UnknownVerb { verb, suggestions } => {
                write!(f, "unknown verb {}", verb)?;
                if !suggestions.is_empty() {
                    write!(f, " (did you mean {}?)", suggestions.join(", "))?;
                }
                Ok(())
            }
            Violation::MissingArgument { name } => {
                write!(f, "missing required argument {}", name)
            }
            Violation::ConstraintViolation { name, rule } => {
                write!(f, "constraint violation {}: {}", name, rule)
            }
            Violation::UnknownArgument { name } => write!(f, "unknown argument {}", name),
            Violation::UnresolvedAttribute { attribute_id } => {
                write!(f, "unresolved attribute {}", attribute_id)
            }
            Violation::ArgumentGroup { names, rule } => {
                write!(f, "argument group [{}]: {}", names.join(", "), rule)
            }
        }
    }
}

/// Every violation of one invocation, reported together
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{verb} rejected: {}", join_violations(.violations))]
pub struct ValidationError {
    pub verb: String,
    pub violations: Vec<Violation>,
}

impl ValidationError {
    pub fn new(verb: impl Into<String>, violations: Vec<Violation>) -> Self {
        Self {
            verb: verb.into(),
            violations,
        }
    }

    pub fn single(verb: impl Into<String>, violation: Violation) -> Self {
        Self::new(verb, vec![violation])
    }

    /// Code of the first violation, or the verb when there are none
    pub fn reason_code(&self) -> String {
        self.violations
            .first()
            .map(Violation::reason_code)
            .unwrap_or_else(|| format!("validation.failed:{}", self.verb))
    }

    pub fn reason_codes(&self) -> Vec<String> {
        self.violations.iter().map(Violation::reason_code).collect()
    }

    /// Whether any violation names `field` (as argument or verb)
    pub fn mentions(&self, field: &str) -> bool {
        self.violations.iter().any(|v| match v {
            Violation::UnknownVerb { verb, .. } => verb == field,
            Violation::MissingArgument { name }
            | Violation::ConstraintViolation { name, .. }
            | Violation::UnknownArgument { name } => name == field,
            Violation::ArgumentGroup { names, .. } => names.iter().any(|n| n == field),
            Violation::UnresolvedAttribute { attribute_id } => attribute_id.to_string() == field,
        })
    }
}

fn join_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(Violation::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

// ============================================================================
// STATE MACHINE
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("Illegal transition from {from} to {to}")]
    IllegalTransition { from: String, to: String },

    #[error("State {state} is terminal")]
    TerminalState { state: String },

    #[error("Guard '{guard}' failed: {description}")]
    GuardFailed { guard: String, description: String },

    #[error("Guard '{guard}' cannot be evaluated: missing context key '{key}'")]
    GuardUnevaluable { guard: String, key: String },

    #[error("Verb {verb} is not allowed in state {state}")]
    VerbNotAllowed { verb: String, state: String },

    #[error("Unknown state {state}")]
    UnknownState { state: String },

    #[error("No path from {from} to {to}")]
    NoPath { from: String, to: String },

    #[error("Entity {entity_id} not found")]
    EntityNotFound { entity_id: Uuid },

    #[error("Entity {entity_id} belongs to domain '{actual}', not '{expected}'")]
    DomainMismatch {
        entity_id: Uuid,
        expected: String,
        actual: String,
    },
}

impl StateError {
    pub fn reason_code(&self) -> String {
        match self {
            StateError::IllegalTransition { from, to } => {
                format!("state.illegal_transition:{}->{}", from, to)
            }
            StateError::TerminalState { state } => format!("state.terminal:{}", state),
            StateError::GuardFailed { guard, .. } => format!("state.guard_failed:{}", guard),
            StateError::GuardUnevaluable { guard, key } => {
                format!("state.guard_unevaluable:{}:{}", guard, key)
            }
            StateError::VerbNotAllowed { verb, state } => {
                format!("state.verb_not_allowed:{}@{}", verb, state)
            }
            StateError::UnknownState { state } => format!("state.unknown:{}", state),
            StateError::NoPath { from, to } => format!("state.no_path:{}->{}", from, to),
            StateError::EntityNotFound { entity_id } => {
                format!("state.entity_not_found:{}", entity_id)
            }
            StateError::DomainMismatch { expected, .. } => {
                format!("state.domain_mismatch:{}", expected)
            }
        }
    }
}

// ============================================================================
// ROUTING
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoutingError {
    #[error("No routing strategy matched the instruction")]
    NoMatch,

    #[error("Instruction is ambiguous between domains: {}", candidates.join(", "))]
    Ambiguous { candidates: Vec<String> },

    #[error("No domains are available for routing")]
    NoDomains,
}

impl RoutingError {
    pub fn reason_code(&self) -> String {
        match self {
            RoutingError::NoMatch => "routing.no_match".to_string(),
            RoutingError::Ambiguous { candidates } => {
                format!("routing.ambiguous:{}", candidates.join("|"))
            }
            RoutingError::NoDomains => "routing.no_domains".to_string(),
        }
    }
}

// ============================================================================
// ORCHESTRATION
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrchestrationError {
    #[error("Dependency cycle between domains: {}", domains.join(" -> "))]
    DependencyCycle { domains: Vec<String> },

    #[error("Domain '{domain}' depends on unfinished domain '{dependency}'")]
    UnmetDependency { domain: String, dependency: String },

    #[error("Session limit of {limit} reached")]
    SessionLimitExceeded { limit: usize },

    #[error("Session {session_id} not found or expired")]
    SessionNotFound { session_id: Uuid },

    #[error("Domain '{domain}' is not registered")]
    DomainNotRegistered { domain: String },

    #[error("Domain '{domain}' is not active in this session")]
    DomainNotActive { domain: String },

    #[error("Session {session_id} has completed every stage")]
    SessionComplete { session_id: Uuid },
}

impl OrchestrationError {
    pub fn reason_code(&self) -> String {
        match self {
            OrchestrationError::DependencyCycle { domains } => {
                format!("orchestration.dependency_cycle:{}", domains.join("|"))
            }
            OrchestrationError::UnmetDependency { domain, dependency } => {
                format!("orchestration.unmet_dependency:{}->{}", domain, dependency)
            }
            OrchestrationError::SessionLimitExceeded { .. } => {
                "orchestration.session_limit".to_string()
            }
            OrchestrationError::SessionNotFound { session_id } => {
                format!("orchestration.session_not_found:{}", session_id)
            }
            OrchestrationError::DomainNotRegistered { domain } => {
                format!("orchestration.domain_not_registered:{}", domain)
            }
            OrchestrationError::DomainNotActive { domain } => {
                format!("orchestration.domain_not_active:{}", domain)
            }
            OrchestrationError::SessionComplete { session_id } => {
                format!("orchestration.session_complete:{}", session_id)
            }
        }
    }
}

// ============================================================================
// REGISTRY
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Domain '{domain}' is already registered")]
    DuplicateDomain { domain: String },

    #[error("Verb '{verb}' is defined more than once in domain '{domain}'")]
    DuplicateVerb { domain: String, verb: String },

    #[error("Invalid verb name '{verb}' in domain '{domain}': expected namespace.action")]
    InvalidVerbName { domain: String, verb: String },

    #[error("Category '{category}' in domain '{domain}' references undefined verb '{verb}'")]
    UndefinedCategoryVerb {
        domain: String,
        category: String,
        verb: String,
    },

    #[error("Verb '{verb}' in domain '{domain}' names undeclared state '{state}'")]
    UndeclaredState {
        domain: String,
        verb: String,
        state: String,
    },

    #[error("Verb '{verb}' in domain '{domain}' declares edge {from} -> {to} absent from the state machine")]
    InvalidTransition {
        domain: String,
        verb: String,
        from: String,
        to: String,
    },

    #[error("Invalid pattern for {verb} :{argument}: {message}")]
    InvalidPattern {
        verb: String,
        argument: String,
        message: String,
    },

    #[error("Domain '{domain}' references unknown guard '{guard}'")]
    UnknownGuard { domain: String, guard: String },

    #[error("Domain '{domain}' not found")]
    DomainNotFound { domain: String },
}

impl RegistryError {
    pub fn reason_code(&self) -> String {
        match self {
            RegistryError::DuplicateDomain { domain } => {
                format!("registry.duplicate_domain:{}", domain)
            }
            RegistryError::DuplicateVerb { verb, .. } => format!("registry.duplicate_verb:{}", verb),
            RegistryError::InvalidVerbName { verb, .. } => {
                format!("registry.invalid_verb_name:{}", verb)
            }
            RegistryError::UndefinedCategoryVerb { verb, .. } => {
                format!("registry.undefined_category_verb:{}", verb)
            }
            RegistryError::UndeclaredState { state, .. } => {
                format!("registry.undeclared_state:{}", state)
            }
            RegistryError::InvalidTransition { verb, .. } => {
                format!("registry.invalid_transition:{}", verb)
            }
            RegistryError::InvalidPattern { argument, .. } => {
                format!("registry.invalid_pattern:{}", argument)
            }
            RegistryError::UnknownGuard { guard, .. } => {
                format!("registry.unknown_guard:{}", guard)
            }
            RegistryError::DomainNotFound { domain } => {
                format!("registry.domain_not_found:{}", domain)
            }
        }
    }
}

// ============================================================================
// STORE
// ============================================================================

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Version {version} already exists for {owner_id}")]
    Conflict { owner_id: Uuid, version: u64 },

    #[error("{what} {id} not found")]
    NotFound { what: &'static str, id: Uuid },

    #[error("Version {version} of {owner_id} not found")]
    VersionNotFound { owner_id: Uuid, version: u64 },

    #[error("Entity {entity_id} already exists")]
    AlreadyExists { entity_id: Uuid },

    #[error("Store operation '{operation}' failed: {source}")]
    Backend {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl StoreError {
    /// Wrap a backend failure with the name of the operation that hit it
    pub fn backend(
        operation: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        StoreError::Backend {
            operation: operation.into(),
            source: source.into(),
        }
    }

    pub fn reason_code(&self) -> String {
        match self {
            StoreError::Conflict { owner_id, version } => {
                format!("store.conflict:{}@{}", owner_id, version)
            }
            StoreError::NotFound { what, id } => format!("store.not_found:{}:{}", what, id),
            StoreError::VersionNotFound { owner_id, version } => {
                format!("store.version_not_found:{}@{}", owner_id, version)
            }
            StoreError::AlreadyExists { entity_id } => {
                format!("store.already_exists:{}", entity_id)
            }
            StoreError::Backend { operation, .. } => format!("store.backend:{}", operation),
        }
    }
}

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid YAML configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid value '{value}' for {var}: {message}")]
    InvalidEnv {
        var: String,
        value: String,
        message: String,
    },

    #[error("Invalid configuration for {field}: {message}")]
    Invalid { field: String, message: String },
}

impl ConfigError {
    pub fn reason_code(&self) -> String {
        match self {
            ConfigError::Io { path, .. } => format!("config.io:{}", path),
            ConfigError::Yaml(_) => "config.yaml".to_string(),
            ConfigError::InvalidEnv { var, .. } => format!("config.invalid_env:{}", var),
            ConfigError::Invalid { field, .. } => format!("config.invalid:{}", field),
        }
    }
}

/// Result type aliases for convenience
pub type DSLResult<T> = Result<T, DSLError>;
pub type ParseResult<T> = Result<T, ParseError>;
pub type ValidationResult<T> = Result<T, ValidationError>;
pub type StateResult<T> = Result<T, StateError>;
pub type RegistryResult<T> = Result<T, RegistryError>;
pub type StoreResult<T> = Result<T, StoreError>;
pub type ConfigResult<T> = Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_construction() {
        let state_err = StateError::GuardFailed {
            guard: "documents_verified".to_string(),
            description: "All KYC documents must be verified".to_string(),
        };

        let dsl_err = DSLError::from(state_err);
        assert!(matches!(dsl_err, DSLError::State(_)));
        assert_eq!(dsl_err.reason_code(), "state.guard_failed:documents_verified");
    }

    #[test]
    fn test_validation_error_reports_every_violation() {
        let error = ValidationError::new(
            "subscribe.request",
            vec![
                Violation::constraint("amount", "must be > 0"),
                Violation::constraint("currency", "must be 3 letters"),
            ],
        );

        assert_eq!(
            error.to_string(),
            "subscribe.request rejected: constraint violation amount: must be > 0; \
             constraint violation currency: must be 3 letters"
        );
        assert!(error.mentions("amount"));
        assert!(error.mentions("currency"));
        assert_eq!(error.reason_codes().len(), 2);
    }

    #[test]
    fn test_unknown_verb_suggestions_display() {
        let violation = Violation::UnknownVerb {
            verb: "kyc.aprove".to_string(),
            suggestions: vec!["kyc.approve".to_string()],
        };
        assert_eq!(
            violation.to_string(),
            "unknown verb kyc.aprove (did you mean kyc.approve?)"
        );
    }

    #[test]
    fn test_store_backend_keeps_operation() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let error = StoreError::backend("insert_dsl", io);
        assert_eq!(error.reason_code(), "store.backend:insert_dsl");
        assert!(error.to_string().contains("disk full"));
    }
}
