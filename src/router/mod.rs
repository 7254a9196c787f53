//! Domain Router
//!
//! Picks the domain that should handle an instruction. Strategies run in a
//! fixed priority order and the first one that matches wins:
//!
//! 1. **Explicit switch**: "switch to the kyc domain"
//! 2. **Verb extraction**: `(kyc.begin ...)` forms in the message, then the
//!    last form of the accumulated DSL
//! 3. **Context inference**: domain entity ids or `current_state` in context
//! 4. **Keyword match**: per-domain keyword lists
//! 5. **Fallback**: session domain, configured default, first registered
//!
//! A request may restrict routing to an allowed set of domains; every strategy
//! only considers domains in that set. The router never mutates domains or
//! sessions, only its own aggregate metrics.

use dsl_types::{ContextMap, RoutingDecision, RoutingStrategy};
use parking_lot::Mutex;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use tracing::{debug, info};

use crate::domains::Domain;
use crate::error::RoutingError;
use crate::parser::{extract_calls, extract_verbs_fallback};
use crate::registry::DomainRegistry;

// ---------------------------------------------------------------------------
// Confidence Constants
// ---------------------------------------------------------------------------

pub const EXPLICIT_CONFIDENCE: f64 = 1.0;

/// Verb found by the nom parser in the message
pub const PARSED_VERB_CONFIDENCE: f64 = 0.95;

/// Verb recovered by the regex fallback from the message
pub const RECOVERED_VERB_CONFIDENCE: f64 = 0.85;

/// Verb taken from the session's accumulated DSL
pub const ACCUMULATED_VERB_CONFIDENCE: f64 = 0.75;

pub const CONTEXT_KEY_CONFIDENCE: f64 = 0.8;
pub const UNIQUE_STATE_CONFIDENCE: f64 = 0.7;
pub const SHARED_STATE_CONFIDENCE: f64 = 0.6;

/// Keyword confidence for a single hit; each extra hit adds the step
pub const KEYWORD_BASE_CONFIDENCE: f64 = 0.4;
pub const KEYWORD_STEP: f64 = 0.05;
pub const KEYWORD_MAX_CONFIDENCE: f64 = 0.6;

pub const SESSION_FALLBACK_CONFIDENCE: f64 = 0.2;
pub const DEFAULT_FALLBACK_CONFIDENCE: f64 = 0.15;
pub const FIRST_FALLBACK_CONFIDENCE: f64 = 0.1;

fn switch_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?i)\b(?:switch|change|move|go)\s+(?:over\s+|back\s+)?to\s+(?:the\s+)?([a-z][a-z0-9_-]*)(?:\s+([a-z][a-z0-9_-]*))?",
        )
        .expect("switch pattern is valid")
    })
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Domain used by the fallback strategy when the session has none
    pub default_domain: Option<String>,
    /// Normalized alias → domain name
    pub aliases: BTreeMap<String, String>,
    /// When false, an instruction no strategy matches is rejected
    pub fallback_enabled: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        let aliases = [
            ("know-your-customer", "kyc"),
            ("customer-due-diligence", "kyc"),
            ("cdd", "kyc"),
            ("beneficial-ownership", "ubo"),
            ("ownership", "ubo"),
            ("client-onboarding", "onboarding"),
            ("investors", "investor"),
            ("transfer-agency", "investor"),
            ("custodian", "custody"),
            ("safekeeping", "custody"),
            ("tax", "compliance"),
            ("regulatory", "compliance"),
        ]
        .into_iter()
        .map(|(alias, domain)| (alias.to_string(), domain.to_string()))
        .collect();

        Self {
            default_domain: None,
            aliases,
            fallback_enabled: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// Everything the router may look at for one instruction
#[derive(Debug, Clone, Default)]
pub struct RoutingRequest {
    pub message: String,
    pub session_domain: Option<String>,
    pub context: ContextMap,
    pub accumulated_dsl: Option<String>,
    pub allowed_domains: Option<BTreeSet<String>>,
}

impl RoutingRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_session_domain(mut self, domain: impl Into<String>) -> Self {
        self.session_domain = Some(domain.into());
        self
    }

    pub fn with_context(mut self, context: ContextMap) -> Self {
        self.context = context;
        self
    }

    pub fn with_accumulated_dsl(mut self, dsl: impl Into<String>) -> Self {
        self.accumulated_dsl = Some(dsl.into());
        self
    }

    pub fn allowed<I, S>(mut self, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_domains = Some(domains.into_iter().map(Into::into).collect());
        self
    }

    fn permits(&self, domain: &str) -> bool {
        self.allowed_domains
            .as_ref()
            .map_or(true, |allowed| allowed.contains(domain))
    }
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct RouterCounters {
    routed: u64,
    failed: u64,
    by_strategy: BTreeMap<RoutingStrategy, u64>,
    confidence_sum: f64,
    latency_us_sum: u128,
}

/// Aggregate routing statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouterStats {
    pub routed: u64,
    pub failed: u64,
    pub by_strategy: BTreeMap<RoutingStrategy, u64>,
    pub mean_confidence: f64,
    pub mean_latency_us: f64,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub struct Router {
    registry: Arc<DomainRegistry>,
    config: RouterConfig,
    counters: Mutex<RouterCounters>,
}

impl Router {
    pub fn new(registry: Arc<DomainRegistry>, config: RouterConfig) -> Self {
        Self {
            registry,
            config,
            counters: Mutex::new(RouterCounters::default()),
        }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Route one instruction to a domain
    pub fn route(&self, request: &RoutingRequest) -> Result<RoutingDecision, RoutingError> {
        let started = Instant::now();
        let result = self.decide(request);
        let elapsed = started.elapsed().as_micros();

        let mut counters = self.counters.lock();
        match &result {
            Ok(decision) => {
                counters.routed += 1;
                *counters.by_strategy.entry(decision.strategy).or_default() += 1;
                counters.confidence_sum += decision.confidence;
                counters.latency_us_sum += elapsed;
                info!(
                    domain = %decision.domain,
                    strategy = %decision.strategy,
                    confidence = decision.confidence,
                    "Instruction routed"
                );
            }
            Err(e) => {
                counters.failed += 1;
                debug!(reason = %e.reason_code(), "Routing failed");
            }
        }
        result
    }

    fn decide(&self, request: &RoutingRequest) -> Result<RoutingDecision, RoutingError> {
        let candidates: Vec<Arc<dyn Domain>> = self
            .registry
            .list()
            .into_iter()
            .filter(|d| request.permits(d.name()))
            .collect();
        if candidates.is_empty() {
            return Err(RoutingError::NoDomains);
        }

        if let Some(decision) = self.explicit_switch(request, &candidates) {
            return Ok(decision);
        }
        if let Some(decision) = verb_extraction(request, &candidates)? {
            return Ok(decision);
        }
        if let Some(decision) = context_inference(request, &candidates) {
            return Ok(decision);
        }
        if let Some(decision) = keyword_match(request, &candidates) {
            return Ok(decision);
        }
        self.fallback(request, &candidates)
    }

    /// Normalize a spoken domain name and resolve it through the alias table
    pub fn resolve_name(&self, name: &str) -> String {
        let normalized = normalize_name(name);
        self.config
            .aliases
            .get(&normalized)
            .cloned()
            .unwrap_or(normalized)
    }

    fn explicit_switch(
        &self,
        request: &RoutingRequest,
        candidates: &[Arc<dyn Domain>],
    ) -> Option<RoutingDecision> {
        switch_pattern()
            .captures_iter(&request.message)
            .find_map(|captures| self.switch_target(&captures, candidates))
    }

    fn switch_target(
        &self,
        captures: &Captures<'_>,
        candidates: &[Arc<dyn Domain>],
    ) -> Option<RoutingDecision> {
        let words: Vec<&str> = [captures.get(1), captures.get(2)]
            .into_iter()
            .flatten()
            .map(|m| m.as_str())
            .filter(|w| !w.eq_ignore_ascii_case("domain"))
            .collect();

        let mut attempts = Vec::new();
        if words.len() > 1 {
            attempts.push(words.join(" "));
        }
        if let Some(first) = words.first() {
            attempts.push(first.to_string());
        }

        attempts.iter().find_map(|attempt| {
            let name = self.resolve_name(attempt);
            candidates.iter().find(|d| d.name() == name).map(|d| {
                RoutingDecision::new(
                    d.name(),
                    RoutingStrategy::ExplicitSwitch,
                    EXPLICIT_CONFIDENCE,
                    format!("explicit switch to '{}'", attempt),
                )
            })
        })
    }

    fn fallback(
        &self,
        request: &RoutingRequest,
        candidates: &[Arc<dyn Domain>],
    ) -> Result<RoutingDecision, RoutingError> {
        if !self.config.fallback_enabled {
            return Err(RoutingError::NoMatch);
        }

        let find = |name: &Option<String>| {
            name.as_deref()
                .and_then(|n| candidates.iter().find(|d| d.name() == n))
        };

        let (domain, confidence, reason) = if let Some(d) = find(&request.session_domain) {
            (d, SESSION_FALLBACK_CONFIDENCE, "session domain")
        } else if let Some(d) = find(&self.config.default_domain) {
            (d, DEFAULT_FALLBACK_CONFIDENCE, "configured default domain")
        } else {
            (&candidates[0], FIRST_FALLBACK_CONFIDENCE, "first registered domain")
        };

        Ok(RoutingDecision::new(
            domain.name(),
            RoutingStrategy::Fallback,
            confidence,
            reason,
        ))
    }

    pub fn stats(&self) -> RouterStats {
        let counters = self.counters.lock();
        let routed = counters.routed.max(1) as f64;
        RouterStats {
            routed: counters.routed,
            failed: counters.failed,
            by_strategy: counters.by_strategy.clone(),
            mean_confidence: if counters.routed == 0 {
                0.0
            } else {
                counters.confidence_sum / routed
            },
            mean_latency_us: if counters.routed == 0 {
                0.0
            } else {
                counters.latency_us_sum as f64 / routed
            },
        }
    }
}

fn normalize_name(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
}

/// Distinct owners of `verbs` among `candidates`, in registration order
fn owners_of<'a>(verbs: &[String], candidates: &'a [Arc<dyn Domain>]) -> Vec<&'a Arc<dyn Domain>> {
    candidates
        .iter()
        .filter(|d| verbs.iter().any(|v| d.vocabulary().contains(v)))
        .collect()
}

fn verb_extraction(
    request: &RoutingRequest,
    candidates: &[Arc<dyn Domain>],
) -> Result<Option<RoutingDecision>, RoutingError> {
    let calls = extract_calls(&request.message);
    let (verbs, confidence, source) = if calls.is_empty() {
        (
            extract_verbs_fallback(&request.message),
            RECOVERED_VERB_CONFIDENCE,
            "recovered from message",
        )
    } else {
        let verbs = calls
            .iter()
            .flat_map(|c| c.verbs())
            .map(str::to_string)
            .collect();
        (verbs, PARSED_VERB_CONFIDENCE, "parsed from message")
    };

    let owners = owners_of(&verbs, candidates);
    match owners.as_slice() {
        [owner] => {
            return Ok(Some(RoutingDecision::new(
                owner.name(),
                RoutingStrategy::VerbExtraction,
                confidence,
                format!("verb {} {}", verbs.join(", "), source),
            )))
        }
        [] => {}
        _ => {
            return Err(RoutingError::Ambiguous {
                candidates: owners.iter().map(|d| d.name().to_string()).collect(),
            })
        }
    }

    let Some(accumulated) = request.accumulated_dsl.as_deref() else {
        return Ok(None);
    };
    let last_verb = extract_calls(accumulated)
        .last()
        .map(|c| c.verb.clone())
        .or_else(|| extract_verbs_fallback(accumulated).pop());
    let Some(verb) = last_verb else {
        return Ok(None);
    };

    let owners = owners_of(std::slice::from_ref(&verb), candidates);
    Ok(match owners.as_slice() {
        [owner] => Some(RoutingDecision::new(
            owner.name(),
            RoutingStrategy::VerbExtraction,
            ACCUMULATED_VERB_CONFIDENCE,
            format!("last accumulated verb {}", verb),
        )),
        _ => None,
    })
}

fn context_inference(
    request: &RoutingRequest,
    candidates: &[Arc<dyn Domain>],
) -> Option<RoutingDecision> {
    if let Some((domain, key)) = candidates.iter().find_map(|d| {
        d.context_keys()
            .iter()
            .find(|k| request.context.contains_key(k.as_str()))
            .map(|k| (d, k))
    }) {
        return Some(RoutingDecision::new(
            domain.name(),
            RoutingStrategy::ContextInference,
            CONTEXT_KEY_CONFIDENCE,
            format!("context carries {}", key),
        ));
    }

    let state = request.context.get("current_state")?.as_str()?;
    let declaring: Vec<&Arc<dyn Domain>> = candidates
        .iter()
        .filter(|d| d.vocabulary().declares_state(state))
        .collect();
    let confidence = match declaring.len() {
        0 => return None,
        1 => UNIQUE_STATE_CONFIDENCE,
        _ => SHARED_STATE_CONFIDENCE,
    };
    Some(RoutingDecision::new(
        declaring[0].name(),
        RoutingStrategy::ContextInference,
        confidence,
        format!("current state {}", state),
    ))
}

/// Lowercase words separated by single spaces, padded for whole-word search
fn word_text(text: &str) -> String {
    let words: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect();
    format!(" {} ", words.join(" "))
}

/// Number of `keywords` appearing as whole words in `message`
pub fn keyword_score(message: &str, keywords: &[String]) -> usize {
    let text = word_text(message);
    keywords
        .iter()
        .filter(|k| text.contains(&word_text(k)))
        .count()
}

fn keyword_match(
    request: &RoutingRequest,
    candidates: &[Arc<dyn Domain>],
) -> Option<RoutingDecision> {
    let mut best: Option<(&Arc<dyn Domain>, usize)> = None;
    for domain in candidates {
        let score = keyword_score(&request.message, domain.keywords());
        if score > 0 && best.map_or(true, |(_, top)| score > top) {
            best = Some((domain, score));
        }
    }

    let (domain, score) = best?;
    let confidence =
        (KEYWORD_BASE_CONFIDENCE + KEYWORD_STEP * (score - 1) as f64).min(KEYWORD_MAX_CONFIDENCE);
    Some(RoutingDecision::new(
        domain.name(),
        RoutingStrategy::KeywordMatch,
        confidence,
        format!("{} keyword hit(s)", score),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::register_standard_domains;
    use crate::registry::RegistryConfig;
    use serde_json::json;

    fn router() -> Router {
        let registry = Arc::new(DomainRegistry::new(RegistryConfig::default()));
        register_standard_domains(&registry).unwrap();
        Router::new(registry, RouterConfig::default())
    }

    #[test]
    fn test_explicit_switch_beats_keywords() {
        let router = router();
        let decision = router
            .route(&RoutingRequest::new("switch to kyc, the ubo ownership structure can wait"))
            .unwrap();
        assert_eq!(decision.domain, "kyc");
        assert_eq!(decision.strategy, RoutingStrategy::ExplicitSwitch);
        assert_eq!(decision.confidence, 1.0);
    }

    #[test]
    fn test_explicit_switch_resolves_aliases() {
        let router = router();
        let decision = router
            .route(&RoutingRequest::new("Please switch to the Beneficial Ownership domain"))
            .unwrap();
        assert_eq!(decision.domain, "ubo");

        let decision = router
            .route(&RoutingRequest::new("go to domain custody"))
            .unwrap();
        assert_eq!(decision.domain, "custody");
    }

    #[test]
    fn test_unresolved_switch_falls_through() {
        let decision = router()
            .route(&RoutingRequest::new("switch to lunch and then check kyc documents"))
            .unwrap();
        assert_eq!(decision.domain, "kyc");
        assert_eq!(decision.strategy, RoutingStrategy::KeywordMatch);
    }

    #[test]
    fn test_later_switch_phrase_still_wins() {
        let decision = router()
            .route(&RoutingRequest::new("let's go to lunch, then switch to kyc"))
            .unwrap();
        assert_eq!(decision.domain, "kyc");
        assert_eq!(decision.strategy, RoutingStrategy::ExplicitSwitch);
        assert_eq!(decision.confidence, EXPLICIT_CONFIDENCE);
    }

    #[test]
    fn test_verb_extraction_confidences() {
        let router = router();
        let parsed = router
            .route(&RoutingRequest::new("run (subscribe.request :investor \"u1\")"))
            .unwrap();
        assert_eq!(parsed.domain, "investor");
        assert_eq!(parsed.confidence, PARSED_VERB_CONFIDENCE);

        let recovered = router
            .route(&RoutingRequest::new("run (custody.open-account :account-type"))
            .unwrap();
        assert_eq!(recovered.domain, "custody");
        assert_eq!(recovered.confidence, RECOVERED_VERB_CONFIDENCE);

        let accumulated = router
            .route(
                &RoutingRequest::new("and the next step please")
                    .with_accumulated_dsl("(ubo.declare-entity :name \"A\" :entity-type TRUST)"),
            )
            .unwrap();
        assert_eq!(accumulated.domain, "ubo");
        assert_eq!(accumulated.confidence, ACCUMULATED_VERB_CONFIDENCE);
    }

    #[test]
    fn test_multiple_owners_are_ambiguous() {
        let err = router()
            .route(&RoutingRequest::new("(kyc.begin) then (custody.activate)"))
            .unwrap_err();
        assert_eq!(
            err,
            RoutingError::Ambiguous {
                candidates: vec!["kyc".to_string(), "custody".to_string()]
            }
        );
    }

    #[test]
    fn test_context_inference() {
        let router = router();
        let mut context = ContextMap::new();
        context.insert("subscription_id".to_string(), json!("abc"));
        let decision = router
            .route(&RoutingRequest::new("carry on").with_context(context))
            .unwrap();
        assert_eq!(decision.domain, "investor");
        assert_eq!(decision.confidence, CONTEXT_KEY_CONFIDENCE);

        let mut context = ContextMap::new();
        context.insert("current_state".to_string(), json!("ACTIVE"));
        let decision = router
            .route(&RoutingRequest::new("carry on").with_context(context))
            .unwrap();
        assert_eq!(decision.domain, "investor");
        assert_eq!(decision.confidence, SHARED_STATE_CONFIDENCE);

        let mut context = ContextMap::new();
        context.insert("current_state".to_string(), json!("SSI_CONFIGURED"));
        let decision = router
            .route(&RoutingRequest::new("carry on").with_context(context))
            .unwrap();
        assert_eq!(decision.domain, "custody");
        assert_eq!(decision.confidence, UNIQUE_STATE_CONFIDENCE);
    }

    #[test]
    fn test_keyword_confidence_grows_with_hits() {
        let router = router();
        let one = router.route(&RoutingRequest::new("something about custody")).unwrap();
        assert_eq!(one.domain, "custody");
        assert!((one.confidence - 0.4).abs() < 1e-9);

        let many = router
            .route(&RoutingRequest::new("custody account ssi settlement instructions safekeeping"))
            .unwrap();
        assert!((many.confidence - KEYWORD_MAX_CONFIDENCE).abs() < 1e-9);
    }

    #[test]
    fn test_allowed_set_and_fallbacks() {
        let router = router();
        let decision = router
            .route(&RoutingRequest::new("(kyc.begin)").allowed(["custody", "ubo"]))
            .unwrap();
        assert_eq!(decision.strategy, RoutingStrategy::Fallback);
        assert_eq!(decision.domain, "ubo");
        assert_eq!(decision.confidence, FIRST_FALLBACK_CONFIDENCE);

        let decision = router
            .route(&RoutingRequest::new("hello").with_session_domain("compliance"))
            .unwrap();
        assert_eq!(decision.domain, "compliance");
        assert_eq!(decision.confidence, SESSION_FALLBACK_CONFIDENCE);

        let err = router
            .route(&RoutingRequest::new("hello").allowed(Vec::<String>::new()))
            .unwrap_err();
        assert_eq!(err, RoutingError::NoDomains);
    }

    #[test]
    fn test_disabled_fallback_and_stats() {
        let registry = Arc::new(DomainRegistry::new(RegistryConfig::default()));
        register_standard_domains(&registry).unwrap();
        let router = Router::new(
            registry,
            RouterConfig {
                fallback_enabled: false,
                ..Default::default()
            },
        );

        assert_eq!(router.route(&RoutingRequest::new("hello")).unwrap_err(), RoutingError::NoMatch);
        router.route(&RoutingRequest::new("switch to kyc")).unwrap();

        let stats = router.stats();
        assert_eq!(stats.routed, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.by_strategy.get(&RoutingStrategy::ExplicitSwitch), Some(&1));
        assert_eq!(stats.mean_confidence, 1.0);
    }
}
