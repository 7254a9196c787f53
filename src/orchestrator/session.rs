//! Orchestration session state
//!
//! A session tracks one multi-domain onboarding: the staged plan, the entity
//! created for every planned domain, the shared context that domains feed
//! each other, and the session-wide DSL log used for routing.

use chrono::{DateTime, Duration, Utc};
use dsl_types::ContextMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

use super::planner::ExecutionPlan;

/// One fragment accepted through the session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionFragment {
    pub domain: String,
    pub entity_id: Uuid,
    pub version: u64,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationSession {
    pub session_id: Uuid,
    pub primary_domain: String,
    pub entity_type: String,
    pub actor: String,
    pub plan: ExecutionPlan,
    pub current_stage: usize,
    /// domain → lifecycle entity
    pub entities: BTreeMap<String, Uuid>,
    pub completed: BTreeSet<String>,
    pub shared_context: ContextMap,
    pub fragments: Vec<SessionFragment>,
    /// Domain that handled the last instruction
    pub last_domain: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
}

impl OrchestrationSession {
    pub fn new(
        primary_domain: &str,
        entity_type: &str,
        actor: &str,
        plan: ExecutionPlan,
        entities: BTreeMap<String, Uuid>,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id: Uuid::new_v4(),
            primary_domain: primary_domain.to_string(),
            entity_type: entity_type.to_string(),
            actor: actor.to_string(),
            plan,
            current_stage: 0,
            entities,
            completed: BTreeSet::new(),
            shared_context: ContextMap::new(),
            fragments: Vec::new(),
            last_domain: None,
            created_at: now,
            last_active_at: now,
        }
    }

    /// Every planned domain, stage by stage
    pub fn active_domains(&self) -> BTreeSet<String> {
        self.plan.domains().cloned().collect()
    }

    pub fn is_complete(&self) -> bool {
        self.current_stage >= self.plan.len()
    }

    /// Domains of the current stage that have not finished
    pub fn pending_in_stage(&self) -> BTreeSet<String> {
        self.plan
            .stages
            .get(self.current_stage)
            .map(|stage| stage.difference(&self.completed).cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_completed(&self, domain: &str) -> bool {
        self.completed.contains(domain)
    }

    /// Mark `domain` finished and advance past every fully finished stage.
    ///
    /// Returns true when the current stage moved.
    pub fn complete(&mut self, domain: &str) -> bool {
        self.completed.insert(domain.to_string());
        let start = self.current_stage;
        while let Some(stage) = self.plan.stages.get(self.current_stage) {
            if !stage.is_subset(&self.completed) {
                break;
            }
            self.current_stage += 1;
        }
        self.current_stage != start
    }

    pub fn merge_context(&mut self, updates: &ContextMap) {
        for (key, value) in updates {
            self.shared_context.insert(key.clone(), value.clone());
        }
    }

    pub fn record_fragment(&mut self, fragment: SessionFragment) {
        self.last_domain = Some(fragment.domain.clone());
        self.fragments.push(fragment);
    }

    /// The session's DSL, one fragment per line
    pub fn accumulated_dsl(&self) -> String {
        self.fragments
            .iter()
            .map(|f| f.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn touch(&mut self) {
        self.last_active_at = Utc::now();
    }

    pub fn is_idle(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        now - self.last_active_at >= timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> OrchestrationSession {
        let stage = |names: &[&str]| names.iter().map(|n| n.to_string()).collect::<BTreeSet<_>>();
        let plan = ExecutionPlan {
            stages: vec![stage(&["kyc", "onboarding"]), stage(&["ubo"])],
        };
        OrchestrationSession::new("onboarding", "CORPORATE", "analyst", plan, BTreeMap::new())
    }

    #[test]
    fn test_stage_advances_when_all_complete() {
        let mut session = session();
        assert!(!session.complete("kyc"));
        assert_eq!(session.pending_in_stage().len(), 1);

        assert!(session.complete("onboarding"));
        assert_eq!(session.current_stage, 1);
        assert!(session.pending_in_stage().contains("ubo"));

        assert!(session.complete("ubo"));
        assert!(session.is_complete());
        assert!(session.pending_in_stage().is_empty());
    }

    #[test]
    fn test_early_completion_skips_finished_stages() {
        let mut session = session();
        session.complete("ubo");
        session.complete("kyc");
        assert!(session.complete("onboarding"));
        assert!(session.is_complete());
    }

    #[test]
    fn test_idle_detection() {
        let mut session = session();
        session.last_active_at = Utc::now() - Duration::seconds(120);
        assert!(session.is_idle(Utc::now(), Duration::seconds(60)));
        session.touch();
        assert!(!session.is_idle(Utc::now(), Duration::seconds(60)));
    }
}
