//! OB Lifecycle - entity lifecycle engine for client onboarding
//!
//! Business domains (KYC, UBO, investor, custody, ...) describe their work as
//! a typed DSL vocabulary and a guarded state machine. Accepted verbs are
//! appended to an immutable, versioned DSL document per entity.
//!
//! ## Call chain
//! ```text
//! instruction -> Router -> Domain::generate_dsl -> Vocabulary::validate
//!             -> Domain::transition_check -> LifecycleManager (commit)
//!             -> DslAccumulator (append)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ob_lifecycle::{register_standard_domains, DomainRegistry, DslPipeline, InMemoryStore};
//! use tokio_util::sync::CancellationToken;
//!
//! let registry = Arc::new(DomainRegistry::new(Default::default()));
//! register_standard_domains(&registry).unwrap();
//! let pipeline = DslPipeline::new(registry, Arc::new(InMemoryStore::new()));
//!
//! let entity = pipeline.create_entity("kyc", "CORPORATE", "analyst").unwrap();
//! let outcome = pipeline
//!     .submit(entity.entity_id, "kyc", "(kyc.begin :level ENHANCED)", &Default::default(), "analyst", &CancellationToken::new())
//!     .unwrap();
//! assert_eq!(outcome.entity.current_state, "KYC_PENDING");
//! ```

// Core error handling
pub mod error;

// DSL text: AST, nom parser, verb extraction
pub mod ast;
pub mod parser;

// Typed vocabularies and argument validation
pub mod vocabulary;

// Guarded state machines and lifecycle commits
pub mod state_machine;

// Storage contract and in-memory backend
pub mod store;

// Append-only versioned DSL documents
pub mod accumulator;

// Candidate verb generation (AI boundary)
pub mod generation;

// Business domains; exports the `domain_accessors!` helper to later modules
#[macro_use]
pub mod domains;

pub mod registry;
pub mod router;
pub mod pipeline;
pub mod orchestrator;

pub mod config;
pub mod telemetry;

pub use accumulator::{DslAccumulator, ValidatedFragment};
pub use ast::{Value, VerbCall};
pub use config::EngineConfig;
pub use domains::{available_domains, register_standard_domains, standard_domains, Domain, DomainCore};
pub use error::{DSLError, DSLResult};
pub use generation::{CandidateVerb, DirectDslGenerator, DslGenerator, GenerationRequest, ScriptedGenerator};
pub use orchestrator::{
    ExecutionOutcome, ExecutionPlan, OrchestrationSession, Orchestrator, OrchestratorConfig, SessionRequest,
};
pub use parser::{parse_program, parse_single_call};
pub use pipeline::{DslPipeline, SubmitOutcome};
pub use registry::{DomainRegistry, RegistryConfig};
pub use router::{Router, RouterConfig, RoutingRequest};
pub use state_machine::{LifecycleManager, StateMachine};
pub use store::{InMemoryStore, Store};
pub use vocabulary::{ValidatedCall, Vocabulary};

pub use dsl_types::{
    ContextMap, DslVersion, EntityRecord, LifecycleRecord, RoutingDecision, RoutingStrategy,
};
