//! DSL Types - Level 1 Foundation Types
//!
//! This crate contains the pure records that every layer of the lifecycle
//! engine exchanges: lifecycle history, DSL document versions, entity records
//! and routing decisions.
//!
//! ## Architecture Level: LEVEL 1 (Foundation)
//!
//! This is the bottom layer of the dependency hierarchy. The engine crate
//! depends on this crate, but this crate depends on NOTHING else in the
//! workspace.
//!
//! ## Critical Rules
//!
//! 1. **NO BUSINESS LOGIC** - Only data structures
//! 2. **NO FUNCTIONS** - Except basic constructors and accessors
//! 3. **NO WORKSPACE DEPENDENCIES** - Cannot depend on other workspace crates
//! 4. **SERIALIZABLE** - All types must support serde
//! 5. **IMMUTABLE RECORDS** - History types are written once and never edited

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Resolved key/value context shared between guards, domains and sessions.
///
/// A `BTreeMap` keeps snapshots deterministic when they are serialized into
/// lifecycle records.
pub type ContextMap = BTreeMap<String, serde_json::Value>;

// ============================================================================
// SOURCE LOCATION AND POSITIONING
// ============================================================================

/// Source location in DSL content for error reporting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    /// Line number (1-based)
    pub line: usize,
    /// Column number (1-based)
    pub column: usize,
    /// Character offset from start of input
    pub offset: usize,
}

impl SourceLocation {
    /// Create a new source location
    pub fn new(line: usize, column: usize, offset: usize) -> Self {
        Self {
            line,
            column,
            offset,
        }
    }

    /// Compute the location of `offset` within `source`
    pub fn from_offset(source: &str, offset: usize) -> Self {
        let offset = offset.min(source.len());
        let consumed = &source[..offset];
        let line = consumed.matches('\n').count() + 1;
        let column = match consumed.rfind('\n') {
            Some(newline) => offset - newline,
            None => offset + 1,
        };
        Self {
            line,
            column,
            offset,
        }
    }
}

impl std::fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

// ============================================================================
// LIFECYCLE HISTORY
// ============================================================================

/// One committed state change of an entity.
///
/// Written exactly once, as part of the same store update that moves the
/// entity's current state. Never edited afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleRecord {
    /// Unique record identifier
    pub record_id: Uuid,
    /// Entity this record belongs to
    pub entity_id: Uuid,
    /// Previous state (`None` for the initial record)
    pub from_state: Option<String>,
    /// State entered
    pub to_state: String,
    /// What caused the change (usually a verb name)
    pub trigger: String,
    /// Guard context as it was when the guards were evaluated
    pub guard_context: ContextMap,
    /// User or system identifier
    pub actor: String,
    /// Commit timestamp
    pub recorded_at: DateTime<Utc>,
}

impl LifecycleRecord {
    /// Record for an entity entering its initial state
    pub fn initial(
        entity_id: Uuid,
        initial_state: impl Into<String>,
        actor: impl Into<String>,
    ) -> Self {
        Self {
            record_id: Uuid::new_v4(),
            entity_id,
            from_state: None,
            to_state: initial_state.into(),
            trigger: "entity.created".to_string(),
            guard_context: ContextMap::new(),
            actor: actor.into(),
            recorded_at: Utc::now(),
        }
    }

    /// Record for a guarded transition between two states
    pub fn transition(
        entity_id: Uuid,
        from_state: impl Into<String>,
        to_state: impl Into<String>,
        trigger: impl Into<String>,
        guard_context: ContextMap,
        actor: impl Into<String>,
    ) -> Self {
        Self {
            record_id: Uuid::new_v4(),
            entity_id,
            from_state: Some(from_state.into()),
            to_state: to_state.into(),
            trigger: trigger.into(),
            guard_context,
            actor: actor.into(),
            recorded_at: Utc::now(),
        }
    }

    /// Whether this is the record written at entity creation
    pub fn is_initial(&self) -> bool {
        self.from_state.is_none()
    }
}

/// An entity tracked through a domain lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    /// Entity identifier
    pub entity_id: Uuid,
    /// Business type (e.g. "CORPORATE", "INVESTOR")
    pub entity_type: String,
    /// Owning domain name
    pub domain: String,
    /// Current lifecycle state
    pub current_state: String,
    /// Every committed state change, oldest first
    pub lifecycle: Vec<LifecycleRecord>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last state change timestamp
    pub updated_at: DateTime<Utc>,
}

impl EntityRecord {
    /// Create a new entity sitting in `initial_state`, with its initial record
    pub fn new(
        entity_type: impl Into<String>,
        domain: impl Into<String>,
        initial_state: impl Into<String>,
        actor: impl Into<String>,
    ) -> Self {
        let entity_id = Uuid::new_v4();
        let initial_state = initial_state.into();
        let now = Utc::now();
        Self {
            entity_id,
            entity_type: entity_type.into(),
            domain: domain.into(),
            lifecycle: vec![LifecycleRecord::initial(
                entity_id,
                initial_state.clone(),
                actor,
            )],
            current_state: initial_state,
            created_at: now,
            updated_at: now,
        }
    }

    /// Most recent lifecycle record
    pub fn last_record(&self) -> Option<&LifecycleRecord> {
        self.lifecycle.last()
    }
}

// ============================================================================
// DSL DOCUMENT VERSIONS
// ============================================================================

/// One immutable version of an accumulated DSL document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DslVersion {
    /// Storage identifier of this version row
    pub version_id: Uuid,
    /// Entity or session the document belongs to
    pub owner_id: Uuid,
    /// Version number, starting at 1, gapless per owner
    pub version: u64,
    /// Canonical text of the fragment accepted at this version
    pub fragment: String,
    /// The whole document after this fragment was appended
    pub accumulated: String,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl DslVersion {
    /// Create the next version record for `owner_id`
    pub fn new(
        owner_id: Uuid,
        version: u64,
        fragment: impl Into<String>,
        accumulated: impl Into<String>,
    ) -> Self {
        Self {
            version_id: Uuid::new_v4(),
            owner_id,
            version,
            fragment: fragment.into(),
            accumulated: accumulated.into(),
            created_at: Utc::now(),
        }
    }
}

// ============================================================================
// ROUTING
// ============================================================================

/// Strategy that produced a routing decision, in priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingStrategy {
    /// "switch to domain X"
    ExplicitSwitch,
    /// A `(verb.name ...)` form identified the owning domain
    VerbExtraction,
    /// Known context keys or current state implied the domain
    ContextInference,
    /// Domain keyword lists scored against the message
    KeywordMatch,
    /// Session domain, configured default or first registered domain
    Fallback,
}

impl RoutingStrategy {
    /// All strategies in evaluation order
    pub const ALL: [RoutingStrategy; 5] = [
        RoutingStrategy::ExplicitSwitch,
        RoutingStrategy::VerbExtraction,
        RoutingStrategy::ContextInference,
        RoutingStrategy::KeywordMatch,
        RoutingStrategy::Fallback,
    ];

    /// Get strategy name
    pub fn as_str(&self) -> &'static str {
        match self {
            RoutingStrategy::ExplicitSwitch => "explicit_switch",
            RoutingStrategy::VerbExtraction => "verb_extraction",
            RoutingStrategy::ContextInference => "context_inference",
            RoutingStrategy::KeywordMatch => "keyword_match",
            RoutingStrategy::Fallback => "fallback",
        }
    }
}

impl std::fmt::Display for RoutingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of routing one instruction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    /// Chosen domain name
    pub domain: String,
    /// Strategy that matched
    pub strategy: RoutingStrategy,
    /// Confidence score (0.0 - 1.0)
    pub confidence: f64,
    /// Human-readable explanation
    pub reason: String,
}

impl RoutingDecision {
    /// Create a new routing decision
    pub fn new(
        domain: impl Into<String>,
        strategy: RoutingStrategy,
        confidence: f64,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            domain: domain.into(),
            strategy,
            confidence: confidence.clamp(0.0, 1.0),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_location_from_offset() {
        let source = "(a :b 1)\n(c :d \"x\")";
        let loc = SourceLocation::from_offset(source, 10);
        assert_eq!(loc.line, 2);
        assert_eq!(loc.column, 2);
        assert_eq!(format!("{}", loc), "2:2");

        let first = SourceLocation::from_offset(source, 0);
        assert_eq!((first.line, first.column), (1, 1));
    }

    #[test]
    fn test_entity_record_starts_with_initial_record() {
        let entity = EntityRecord::new("CORPORATE", "kyc", "KYC_NOT_STARTED", "system");
        assert_eq!(entity.current_state, "KYC_NOT_STARTED");
        assert_eq!(entity.lifecycle.len(), 1);

        let record = entity.last_record().unwrap();
        assert!(record.is_initial());
        assert_eq!(record.entity_id, entity.entity_id);
        assert_eq!(record.to_state, "KYC_NOT_STARTED");
    }

    #[test]
    fn test_routing_decision_clamps_confidence() {
        let decision = RoutingDecision::new("kyc", RoutingStrategy::Fallback, 1.7, "test");
        assert_eq!(decision.confidence, 1.0);
        assert_eq!(decision.strategy.as_str(), "fallback");
    }

    #[test]
    fn test_strategy_order() {
        let mut sorted = RoutingStrategy::ALL;
        sorted.sort();
        assert_eq!(sorted, RoutingStrategy::ALL);
    }

    #[test]
    fn test_records_serialize() {
        let version = DslVersion::new(Uuid::new_v4(), 1, "(a.b)", "(a.b)");
        let json = serde_json::to_string(&version).unwrap();
        let back: DslVersion = serde_json::from_str(&json).unwrap();
        assert_eq!(back, version);
    }
}
