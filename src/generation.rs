//! DSL generation boundary
//!
//! A [`DslGenerator`] proposes one candidate verb invocation for a natural
//! language instruction. Its output is untrusted: the pipeline always converts
//! it back into a [`VerbCall`] and re-validates it against the domain
//! vocabulary and state machine before anything is committed.

use async_trait::async_trait;
use dsl_types::ContextMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::ast::{Value, VerbCall};
use crate::error::{ValidationError, Violation};
use crate::parser::extract_calls;
use crate::parser::idiomatic_parser::parse_attr_ref;
use crate::vocabulary::VocabularyExport;

/// Everything a generator sees for one instruction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub domain: String,
    pub instruction: String,
    pub current_state: String,
    pub context: ContextMap,
    pub vocabulary: VocabularyExport,
}

/// A proposed verb invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateVerb {
    pub verb: String,
    /// Argument name (or `@attr{uuid}`) to value
    pub arguments: serde_json::Map<String, serde_json::Value>,
    pub explanation: String,
    pub confidence: f64,
    /// Nested verb forms, in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<CandidateVerb>,
}

impl CandidateVerb {
    pub fn new(verb: &str) -> Self {
        Self {
            verb: verb.to_string(),
            arguments: serde_json::Map::new(),
            explanation: String::new(),
            confidence: 0.0,
            children: Vec::new(),
        }
    }

    pub fn with_child(mut self, child: CandidateVerb) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_argument(mut self, name: &str, value: serde_json::Value) -> Self {
        self.arguments.insert(name.to_string(), value);
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn explained(mut self, explanation: &str) -> Self {
        self.explanation = explanation.to_string();
        self
    }

    /// Convert to an AST call; unrepresentable values are reported together
    pub fn to_call(&self) -> Result<VerbCall, ValidationError> {
        let mut call = VerbCall::new(self.verb.clone());
        let mut violations = Vec::new();

        for (name, json) in &self.arguments {
            let Some(value) = Value::from_json(json) else {
                violations.push(Violation::constraint(
                    name.clone(),
                    "value must be a string, number, boolean or list",
                ));
                continue;
            };

            if name.starts_with("@attr{") {
                match parse_attr_ref(name) {
                    Ok(("", attribute_id)) => call = call.with_attribute(attribute_id, value),
                    _ => violations.push(Violation::constraint(
                        name.clone(),
                        "malformed attribute reference",
                    )),
                }
            } else {
                call = call.with_arg(name.clone(), value);
            }
        }

        for child in &self.children {
            match child.to_call() {
                Ok(child_call) => call.children.push(child_call),
                Err(e) => violations.extend(e.violations),
            }
        }

        if violations.is_empty() {
            Ok(call)
        } else {
            Err(ValidationError::new(self.verb.clone(), violations))
        }
    }

    /// Candidate mirroring an already-parsed call, nested forms included
    pub fn from_call(call: &VerbCall) -> Self {
        let mut candidate = CandidateVerb::new(&call.verb);
        for arg in &call.args {
            candidate
                .arguments
                .insert(arg.key.to_string().trim_start_matches(':').to_string(), arg.value.to_json());
        }
        candidate.children = call.children.iter().map(CandidateVerb::from_call).collect();
        candidate
    }
}

#[async_trait]
pub trait DslGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> anyhow::Result<CandidateVerb>;
}

/// Uses a DSL form embedded in the instruction itself.
///
/// Prefers a form whose verb the target vocabulary defines.
#[derive(Debug, Default, Clone)]
pub struct DirectDslGenerator;

#[async_trait]
impl DslGenerator for DirectDslGenerator {
    async fn generate(&self, request: &GenerationRequest) -> anyhow::Result<CandidateVerb> {
        let calls = extract_calls(&request.instruction);
        let known = calls
            .iter()
            .find(|c| request.vocabulary.verbs.iter().any(|v| v.name == c.verb));
        let call = match known.or_else(|| calls.first()) {
            Some(call) => call,
            None => anyhow::bail!("instruction contains no DSL form"),
        };

        Ok(CandidateVerb::from_call(call)
            .with_confidence(1.0)
            .explained("DSL form supplied in the instruction"))
    }
}

/// Replays queued outcomes in order; for tests and demos
#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    outcomes: Mutex<VecDeque<Result<CandidateVerb, String>>>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, candidate: CandidateVerb) -> &Self {
        self.outcomes.lock().push_back(Ok(candidate));
        self
    }

    pub fn push_failure(&self, message: &str) -> &Self {
        self.outcomes.lock().push_back(Err(message.to_string()));
        self
    }

    /// Requests seen so far
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().clone()
    }

    pub fn remaining(&self) -> usize {
        self.outcomes.lock().len()
    }
}

#[async_trait]
impl DslGenerator for ScriptedGenerator {
    async fn generate(&self, request: &GenerationRequest) -> anyhow::Result<CandidateVerb> {
        self.requests.lock().push(request.clone());
        match self.outcomes.lock().pop_front() {
            Some(Ok(candidate)) => Ok(candidate),
            Some(Err(message)) => Err(anyhow::anyhow!(message)),
            None => anyhow::bail!("no scripted candidate left for '{}'", request.instruction),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vocabulary::{VerbDefinition, Vocabulary};
    use serde_json::json;
    use uuid::Uuid;

    fn request(instruction: &str) -> GenerationRequest {
        let vocabulary = Vocabulary::builder("kyc", "1.0.0")
            .verb(VerbDefinition::new("kyc.begin", "case"))
            .build()
            .unwrap();
        GenerationRequest {
            domain: "kyc".to_string(),
            instruction: instruction.to_string(),
            current_state: "KYC_NOT_STARTED".to_string(),
            context: ContextMap::new(),
            vocabulary: vocabulary.export(),
        }
    }

    #[tokio::test]
    async fn test_direct_generator_prefers_known_verb() {
        let generator = DirectDslGenerator;
        let candidate = generator
            .generate(&request("(note.add :text \"x\") then (kyc.begin :level ENHANCED)"))
            .await
            .unwrap();
        assert_eq!(candidate.verb, "kyc.begin");
        assert_eq!(candidate.arguments.get("level"), Some(&json!("ENHANCED")));
        assert_eq!(candidate.confidence, 1.0);
    }

    #[tokio::test]
    async fn test_direct_generator_needs_a_form() {
        assert!(DirectDslGenerator.generate(&request("start kyc please")).await.is_err());
    }

    #[tokio::test]
    async fn test_scripted_generator_replays_in_order() {
        let generator = ScriptedGenerator::new();
        generator
            .push(CandidateVerb::new("kyc.begin"))
            .push_failure("model unavailable");

        assert_eq!(generator.generate(&request("one")).await.unwrap().verb, "kyc.begin");
        let err = generator.generate(&request("two")).await.unwrap_err();
        assert_eq!(err.to_string(), "model unavailable");
        assert!(generator.generate(&request("three")).await.is_err());
        assert_eq!(generator.requests().len(), 3);
    }

    #[test]
    fn test_candidate_to_call() {
        let attribute = Uuid::new_v4();
        let candidate = CandidateVerb::new("subscribe.request")
            .with_argument("amount", json!(100))
            .with_argument(&format!("@attr{{{}}}", attribute), json!("GB"))
            .with_argument("meta", json!({"nested": true}));

        let err = candidate.to_call().unwrap_err();
        assert!(err.mentions("meta"));

        let call = CandidateVerb::new("subscribe.request")
            .with_argument("amount", json!(100))
            .with_argument(&format!("@attr{{{}}}", attribute), json!("GB"))
            .to_call()
            .unwrap();
        assert_eq!(call.args.len(), 2);
        assert!(call.get("amount").is_some());
    }

    #[test]
    fn test_candidate_keeps_nested_forms() {
        let call = crate::parser::parse_single_call(
            r#"(ubo.declare-entities (ubo.entity :name "HoldCo") (ubo.entity :name "Ada"))"#,
        )
        .unwrap();
        let candidate = CandidateVerb::from_call(&call);
        assert_eq!(candidate.children.len(), 2);

        let rebuilt = candidate.to_call().unwrap();
        assert_eq!(rebuilt.children.len(), 2);
        assert_eq!(rebuilt.children[1].verb, "ubo.entity");
        assert_eq!(
            rebuilt.children[1].get("name"),
            Some(&Value::String("Ada".to_string()))
        );

        let err = CandidateVerb::new("ubo.declare-entities")
            .with_child(CandidateVerb::new("ubo.entity").with_argument("meta", json!({})))
            .to_call()
            .unwrap_err();
        assert!(err.mentions("meta"));
    }
}
