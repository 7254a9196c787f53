//! Domain Implementations Module
//!
//! A domain bundles a vocabulary, a state machine and the "generate DSL from
//! an instruction" contract. The engine never branches on a domain's name:
//! everything it needs goes through the [`Domain`] trait.
//!
//! ## Available Domains:
//! - `onboarding`: client onboarding case from creation to completion
//! - `kyc`: Know Your Customer verification
//! - `ubo`: Ultimate Beneficial Ownership discovery
//! - `investor`: fund investor subscriptions and redemptions
//! - `custody`: custody accounts and settlement instructions
//! - `compliance`: jurisdictional tax and regulatory clearance

/// Implements the accessor half of [`Domain`] for a type with a `core: DomainCore` field
macro_rules! domain_accessors {
    () => {
        fn name(&self) -> &str {
            &self.core.name
        }
        fn version(&self) -> &str {
            &self.core.version
        }
        fn description(&self) -> &str {
            &self.core.description
        }
        fn vocabulary(&self) -> &$crate::vocabulary::Vocabulary {
            &self.core.vocabulary
        }
        fn state_machine(&self) -> &$crate::state_machine::StateMachine {
            &self.core.machine
        }
        fn keywords(&self) -> &[String] {
            &self.core.keywords
        }
        fn context_keys(&self) -> &[String] {
            &self.core.context_keys
        }
        fn metrics(&self) -> &$crate::domains::DomainMetrics {
            &self.core.metrics
        }
    };
}

pub mod common;
pub mod compliance;
pub mod custody;
pub mod investor;
pub mod kyc;
pub mod metrics;
pub mod onboarding;
pub mod ubo;

pub use compliance::ComplianceDomain;
pub use custody::CustodyDomain;
pub use investor::InvestorDomain;
pub use kyc::KycDomain;
pub use metrics::{DomainMetrics, MetricsSnapshot};
pub use onboarding::OnboardingDomain;
pub use ubo::UboDomain;

use async_trait::async_trait;
use dsl_types::{ContextMap, EntityRecord};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::ast::VerbCall;
use crate::error::{DSLError, DSLResult, RegistryError, StateError, ValidationError};
use crate::generation::{DslGenerator, GenerationRequest};
use crate::registry::DomainRegistry;
use crate::state_machine::{StateCheck, StateMachine};
use crate::vocabulary::{ValidatedCall, ValidationContext, Vocabulary};

/// The single capability contract every domain implements
#[async_trait]
pub trait Domain: Send + Sync {
    fn name(&self) -> &str;
    fn version(&self) -> &str;
    fn description(&self) -> &str;
    fn vocabulary(&self) -> &Vocabulary;
    fn state_machine(&self) -> &StateMachine;

    /// Words that suggest an instruction belongs to this domain
    fn keywords(&self) -> &[String];

    /// Context keys holding this domain's entity identifiers
    fn context_keys(&self) -> &[String];

    fn metrics(&self) -> &DomainMetrics;

    fn is_healthy(&self) -> bool {
        self.metrics().is_healthy()
    }

    fn validate(
        &self,
        call: &VerbCall,
        context: &ValidationContext<'_>,
    ) -> Result<ValidatedCall, ValidationError> {
        self.vocabulary().validate(call, context)
    }

    /// Decide what a validated verb does to `entity` without committing it.
    ///
    /// A terminal entity accepts nothing. An idempotent verb whose target is
    /// the current state is a no-op. A transition verb must list the current
    /// state among its sources, then pass the edge guards and its own guards.
    /// A verb without a transition only runs its own guards.
    fn transition_check(
        &self,
        call: &ValidatedCall,
        entity: &EntityRecord,
        context: &ContextMap,
    ) -> Result<StateCheck, StateError> {
        let machine = self.state_machine();
        let state = entity.current_state.as_str();
        if machine.is_terminal_state(state) {
            return Err(StateError::TerminalState {
                state: state.to_string(),
            });
        }

        let definition = call.definition();
        let Some(transition) = definition.transition.as_ref() else {
            machine.evaluate_guards(&definition.guards, entity, context)?;
            return Ok(StateCheck::Stay {
                state: state.to_string(),
            });
        };

        if definition.idempotent && transition.to_state == state {
            return Ok(StateCheck::Stay {
                state: state.to_string(),
            });
        }
        if !transition.allows_from(state) {
            return Err(StateError::VerbNotAllowed {
                verb: definition.name.clone(),
                state: state.to_string(),
            });
        }

        machine.validate_transition(entity, &transition.to_state, context)?;
        machine.evaluate_guards(&definition.guards, entity, context)?;
        Ok(StateCheck::Transition {
            from: state.to_string(),
            to: transition.to_state.clone(),
        })
    }

    /// Ask `generator` for a candidate and convert it to an AST call.
    ///
    /// The result is unvalidated; callers run it through [`Domain::validate`].
    async fn generate_dsl(
        &self,
        request: &GenerationRequest,
        generator: &dyn DslGenerator,
    ) -> DSLResult<VerbCall> {
        let candidate = generator.generate(request).await.map_err(|e| {
            self.metrics().record_generation_failure();
            warn!(domain = self.name(), error = %e, "DSL generation failed");
            DSLError::Generation {
                domain: self.name().to_string(),
                message: format!("{:#}", e),
            }
        })?;

        debug!(
            domain = self.name(),
            verb = %candidate.verb,
            confidence = candidate.confidence,
            "Candidate verb proposed"
        );
        Ok(candidate.to_call()?)
    }

    /// Build the generator request for `entity`
    fn generation_request(
        &self,
        instruction: &str,
        entity: &EntityRecord,
        context: &ContextMap,
    ) -> GenerationRequest {
        GenerationRequest {
            domain: self.name().to_string(),
            instruction: instruction.to_string(),
            current_state: entity.current_state.clone(),
            context: context.clone(),
            vocabulary: self.vocabulary().export(),
        }
    }

    /// Polled by the registry health sweep
    async fn health_check(&self) -> bool {
        self.is_healthy()
    }
}

/// Shared parts of every standard domain
#[derive(Debug)]
pub struct DomainCore {
    pub name: String,
    pub version: String,
    pub description: String,
    pub vocabulary: Vocabulary,
    pub machine: StateMachine,
    pub keywords: Vec<String>,
    pub context_keys: Vec<String>,
    pub metrics: DomainMetrics,
}

impl DomainCore {
    /// Name and version come from the vocabulary
    pub fn new(description: &str, vocabulary: Vocabulary, machine: StateMachine) -> Self {
        Self {
            name: vocabulary.domain().to_string(),
            version: vocabulary.version().to_string(),
            description: description.to_string(),
            vocabulary,
            machine,
            keywords: Vec::new(),
            context_keys: Vec::new(),
            metrics: DomainMetrics::new(),
        }
    }

    pub fn keywords(mut self, keywords: &[&str]) -> Self {
        self.keywords = keywords.iter().map(|k| k.to_lowercase()).collect();
        self
    }

    pub fn context_keys(mut self, keys: &[&str]) -> Self {
        self.context_keys = keys.iter().map(|k| k.to_string()).collect();
        self
    }
}

/// Every shipped domain, in registration order
pub fn standard_domains() -> Result<Vec<Arc<dyn Domain>>, RegistryError> {
    Ok(vec![
        Arc::new(OnboardingDomain::new()?),
        Arc::new(KycDomain::new()?),
        Arc::new(UboDomain::new()?),
        Arc::new(InvestorDomain::new()?),
        Arc::new(CustodyDomain::new()?),
        Arc::new(ComplianceDomain::new()?),
    ])
}

/// Register all standard domains with the registry
pub fn register_standard_domains(registry: &DomainRegistry) -> Result<(), RegistryError> {
    for domain in standard_domains()? {
        registry.register(domain)?;
    }
    Ok(())
}

/// Names of the standard domains, in registration order
pub fn available_domains() -> Vec<&'static str> {
    vec!["onboarding", "kyc", "ubo", "investor", "custody", "compliance"]
}
