//! Multi-domain Orchestrator
//!
//! Runs an onboarding that spans several domains. A session is planned from
//! the entity type, products and jurisdiction, gets one lifecycle entity per
//! planned domain, and then takes natural-language instructions:
//!
//! 1. route the instruction among the current stage's unfinished domains
//! 2. ask the domain's generator for a candidate verb
//! 3. submit it through the [`DslPipeline`] (full re-validation)
//! 4. merge produced identifiers and facts into the shared context
//!
//! A domain completes when its entity reaches a terminal state or on an
//! explicit [`Orchestrator::complete_domain`]; the stage advances when all of
//! its domains are complete.
//!
//! Sessions are capped and evicted after an idle timeout by a background
//! sweep. Eviction drops only the session record: entity lifecycles and DSL
//! history stay in the store.

pub mod planner;
pub mod session;

pub use planner::{ContextAnalysis, DomainPlanner, ExecutionPlan};
pub use session::{OrchestrationSession, SessionFragment};

use chrono::Utc;
use dsl_types::{ContextMap, RoutingDecision};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{DSLError, DSLResult, OrchestrationError};
use crate::generation::DslGenerator;
use crate::pipeline::{DslPipeline, SubmitOutcome};
use crate::registry::DomainRegistry;
use crate::router::{Router, RouterConfig, RoutingRequest};

type SessionSlot = Arc<tokio::sync::Mutex<OrchestrationSession>>;

/// Counts a session being created against the cap until it is inserted
struct Reservation<'a>(&'a AtomicUsize);

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub max_sessions: usize,
    pub session_idle_timeout_secs: u64,
    pub eviction_interval_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_sessions: 256,
            session_idle_timeout_secs: 1800,
            eviction_interval_secs: 60,
        }
    }
}

impl OrchestratorConfig {
    pub fn idle_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.session_idle_timeout_secs.min(i64::MAX as u64) as i64)
    }

    pub fn eviction_interval(&self) -> Duration {
        Duration::from_secs(self.eviction_interval_secs.max(1))
    }
}

/// What a new session should cover
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRequest {
    pub entity_type: String,
    pub products: Vec<String>,
    pub jurisdiction: Option<String>,
    pub actor: String,
}

impl SessionRequest {
    pub fn new(entity_type: &str, actor: &str) -> Self {
        Self {
            entity_type: entity_type.to_string(),
            actor: actor.to_string(),
            ..Default::default()
        }
    }

    pub fn products(mut self, products: &[&str]) -> Self {
        self.products = products.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn jurisdiction(mut self, jurisdiction: &str) -> Self {
        self.jurisdiction = Some(jurisdiction.to_string());
        self
    }
}

/// Result of one orchestrated instruction
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub session_id: Uuid,
    pub domain: String,
    /// Absent when the caller picked the domain
    pub routing: Option<RoutingDecision>,
    pub submission: SubmitOutcome,
    pub domain_completed: bool,
    pub stage_advanced: bool,
    pub session_complete: bool,
}

pub struct Orchestrator {
    registry: Arc<DomainRegistry>,
    pipeline: Arc<DslPipeline>,
    router: Router,
    generator: Arc<dyn DslGenerator>,
    planner: DomainPlanner,
    config: OrchestratorConfig,
    sessions: RwLock<HashMap<Uuid, SessionSlot>>,
    reserved: AtomicUsize,
    shutdown: CancellationToken,
    evictor: Mutex<Option<JoinHandle<()>>>,
}

impl Orchestrator {
    /// Build an orchestrator over the standard planning tables
    pub fn new(
        pipeline: Arc<DslPipeline>,
        generator: Arc<dyn DslGenerator>,
        router_config: RouterConfig,
        config: OrchestratorConfig,
    ) -> Result<Self, OrchestrationError> {
        Self::with_planner(pipeline, generator, router_config, config, DomainPlanner::standard())
    }

    /// Fails when the planner's dependency table has a cycle
    pub fn with_planner(
        pipeline: Arc<DslPipeline>,
        generator: Arc<dyn DslGenerator>,
        router_config: RouterConfig,
        config: OrchestratorConfig,
        planner: DomainPlanner,
    ) -> Result<Self, OrchestrationError> {
        planner.validate()?;
        let registry = pipeline.registry().clone();
        Ok(Self {
            router: Router::new(registry.clone(), router_config),
            registry,
            pipeline,
            generator,
            planner,
            config,
            sessions: RwLock::new(HashMap::new()),
            reserved: AtomicUsize::new(0),
            shutdown: CancellationToken::new(),
            evictor: Mutex::new(None),
        })
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn planner(&self) -> &DomainPlanner {
        &self.planner
    }

    pub fn pipeline(&self) -> &Arc<DslPipeline> {
        &self.pipeline
    }

    pub fn analyze_context(
        &self,
        entity_type: &str,
        products: &[String],
        jurisdiction: Option<&str>,
    ) -> ContextAnalysis {
        self.planner
            .analyze_context(entity_type, products, jurisdiction)
    }

    /// Plan a session and create one entity per planned domain
    pub fn create_session(
        &self,
        request: &SessionRequest,
        cancel: &CancellationToken,
    ) -> DSLResult<OrchestrationSession> {
        let analysis = self.planner.analyze_context(
            &request.entity_type,
            &request.products,
            request.jurisdiction.as_deref(),
        );
        let plan = self.planner.build_execution_plan(&analysis.required)?;
        if let Some(missing) = plan.domains().find(|d| !self.registry.contains(d)) {
            return Err(OrchestrationError::DomainNotRegistered {
                domain: missing.clone(),
            }
            .into());
        }

        let reservation = self.reserve_slot()?;
        if cancel.is_cancelled() {
            return Err(DSLError::cancelled("create_session"));
        }

        let mut entities = BTreeMap::new();
        for domain in plan.domains() {
            match self
                .pipeline
                .create_entity(domain, &request.entity_type, &request.actor)
            {
                Ok(entity) => {
                    entities.insert(domain.clone(), entity.entity_id);
                }
                Err(e) => {
                    for entity_id in entities.values() {
                        self.pipeline.discard_entity(*entity_id);
                    }
                    warn!(
                        domain = %domain,
                        discarded = entities.len(),
                        reason = %e.reason_code(),
                        "Session creation failed"
                    );
                    return Err(e);
                }
            }
        }

        let mut session = OrchestrationSession::new(
            &analysis.primary_domain,
            &request.entity_type,
            &request.actor,
            plan,
            entities,
        );
        if let Some(jurisdiction) = &request.jurisdiction {
            session.shared_context.insert(
                "jurisdiction".to_string(),
                serde_json::Value::String(jurisdiction.to_uppercase()),
            );
        }

        info!(
            session_id = %session.session_id,
            primary = %session.primary_domain,
            domains = session.entities.len(),
            stages = session.plan.len(),
            "Session created"
        );
        debug!(session_id = %session.session_id, plan = %session.plan.describe(), "Session plan");

        self.sessions.write().insert(
            session.session_id,
            Arc::new(tokio::sync::Mutex::new(session.clone())),
        );
        drop(reservation);
        Ok(session)
    }

    /// Claim room for one more session; entities are created outside the map lock
    fn reserve_slot(&self) -> Result<Reservation<'_>, OrchestrationError> {
        let sessions = self.sessions.write();
        if sessions.len() + self.reserved.load(Ordering::SeqCst) >= self.config.max_sessions {
            return Err(OrchestrationError::SessionLimitExceeded {
                limit: self.config.max_sessions,
            });
        }
        self.reserved.fetch_add(1, Ordering::SeqCst);
        Ok(Reservation(&self.reserved))
    }

    fn slot(&self, session_id: Uuid) -> Result<SessionSlot, OrchestrationError> {
        self.sessions
            .read()
            .get(&session_id)
            .cloned()
            .ok_or(OrchestrationError::SessionNotFound { session_id })
    }

    /// Route `instruction` within the current stage and run it
    pub async fn execute(
        &self,
        session_id: Uuid,
        instruction: &str,
        cancel: &CancellationToken,
    ) -> DSLResult<ExecutionOutcome> {
        let slot = self.slot(session_id)?;
        let mut session = slot.lock().await;
        session.touch();
        if session.is_complete() {
            return Err(OrchestrationError::SessionComplete { session_id }.into());
        }

        let mut request = RoutingRequest::new(instruction)
            .with_context(session.shared_context.clone())
            .with_accumulated_dsl(session.accumulated_dsl())
            .allowed(session.pending_in_stage());
        if let Some(domain) = &session.last_domain {
            request = request.with_session_domain(domain.clone());
        }
        let decision = self.router.route(&request)?;
        let domain = decision.domain.clone();

        self.run_in_domain(&mut session, &domain, instruction, Some(decision), cancel)
            .await
    }

    /// Run `instruction` in `domain` without routing
    pub async fn execute_in_domain(
        &self,
        session_id: Uuid,
        domain: &str,
        instruction: &str,
        cancel: &CancellationToken,
    ) -> DSLResult<ExecutionOutcome> {
        let slot = self.slot(session_id)?;
        let mut session = slot.lock().await;
        session.touch();
        self.check_runnable(&session, domain)?;
        self.run_in_domain(&mut session, domain, instruction, None, cancel)
            .await
    }

    fn check_runnable(
        &self,
        session: &OrchestrationSession,
        domain: &str,
    ) -> Result<(), OrchestrationError> {
        if !session.plan.contains(domain) || session.is_completed(domain) {
            return Err(OrchestrationError::DomainNotActive {
                domain: domain.to_string(),
            });
        }
        if let Some(dependency) = self
            .planner
            .dependencies_of(domain)
            .find(|d| !session.is_completed(d))
        {
            return Err(OrchestrationError::UnmetDependency {
                domain: domain.to_string(),
                dependency: dependency.clone(),
            });
        }
        Ok(())
    }

    async fn run_in_domain(
        &self,
        session: &mut OrchestrationSession,
        domain_name: &str,
        instruction: &str,
        routing: Option<RoutingDecision>,
        cancel: &CancellationToken,
    ) -> DSLResult<ExecutionOutcome> {
        let domain = self.registry.require(domain_name)?;
        let entity_id = *session.entities.get(domain_name).ok_or_else(|| {
            OrchestrationError::DomainNotActive {
                domain: domain_name.to_string(),
            }
        })?;
        let entity = self.pipeline.entity(entity_id)?;

        let request = domain.generation_request(instruction, &entity, &session.shared_context);
        let call = domain.generate_dsl(&request, self.generator.as_ref()).await?;

        let submission = self.pipeline.submit_call(
            entity_id,
            domain_name,
            &call,
            &session.shared_context,
            &session.actor,
            cancel,
        )?;

        session.merge_context(&submission.context_updates);
        session.record_fragment(SessionFragment {
            domain: domain_name.to_string(),
            entity_id,
            version: submission.version.version,
            text: submission.version.fragment.clone(),
        });

        let domain_completed = domain
            .state_machine()
            .is_terminal_state(&submission.entity.current_state);
        let stage_advanced = domain_completed && session.complete(domain_name);

        info!(
            session_id = %session.session_id,
            domain = domain_name,
            state = %submission.entity.current_state,
            version = submission.version.version,
            stage = session.current_stage,
            "Instruction executed"
        );

        Ok(ExecutionOutcome {
            session_id: session.session_id,
            domain: domain_name.to_string(),
            routing,
            submission,
            domain_completed,
            stage_advanced,
            session_complete: session.is_complete(),
        })
    }

    /// Mark `domain` finished regardless of its entity's state
    pub async fn complete_domain(
        &self,
        session_id: Uuid,
        domain: &str,
    ) -> DSLResult<OrchestrationSession> {
        let slot = self.slot(session_id)?;
        let mut session = slot.lock().await;
        self.check_runnable(&session, domain)?;
        session.complete(domain);
        session.touch();
        info!(session_id = %session_id, domain, stage = session.current_stage, "Domain completed");
        Ok(session.clone())
    }

    pub async fn update_context(
        &self,
        session_id: Uuid,
        updates: ContextMap,
    ) -> DSLResult<OrchestrationSession> {
        let slot = self.slot(session_id)?;
        let mut session = slot.lock().await;
        session.merge_context(&updates);
        session.touch();
        Ok(session.clone())
    }

    /// Snapshot of the session
    pub async fn session(&self, session_id: Uuid) -> DSLResult<OrchestrationSession> {
        let slot = self.slot(session_id)?;
        let session = slot.lock().await;
        Ok(session.clone())
    }

    pub fn close_session(&self, session_id: Uuid) -> bool {
        let removed = self.sessions.write().remove(&session_id).is_some();
        if removed {
            info!(session_id = %session_id, "Session closed");
        }
        removed
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Drop sessions idle for longer than the configured timeout.
    ///
    /// A session busy executing is never evicted.
    pub fn evict_idle(&self) -> usize {
        let now = Utc::now();
        let timeout = self.config.idle_timeout();

        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|session_id, slot| match slot.try_lock() {
            Ok(session) => {
                let idle = session.is_idle(now, timeout);
                if idle {
                    info!(session_id = %session_id, "Session evicted");
                }
                !idle
            }
            Err(_) => true,
        });
        before - sessions.len()
    }

    /// Spawn the idle-session sweep; must be called inside a tokio runtime.
    ///
    /// Returns false when a sweep is already running or after shutdown.
    pub fn start_eviction(self: &Arc<Self>) -> bool {
        let mut evictor = self.evictor.lock();
        if evictor.is_some() || self.shutdown.is_cancelled() {
            return false;
        }

        let orchestrator = Arc::downgrade(self);
        let token = self.shutdown.clone();
        let period = self.config.eviction_interval();

        *evictor = Some(tokio::spawn(async move {
            info!(interval_secs = period.as_secs(), "Session eviction started");
            let mut tick = interval(period);
            tick.tick().await;
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        let Some(orchestrator) = orchestrator.upgrade() else { break };
                        let evicted = orchestrator.evict_idle();
                        if evicted > 0 {
                            debug!(evicted, "Eviction sweep finished");
                        }
                    }
                    _ = token.cancelled() => break,
                }
            }
            info!("Session eviction stopped");
        }));
        true
    }

    /// Stop the eviction sweep. Safe to call any number of times.
    pub fn shutdown(&self) {
        if !self.shutdown.is_cancelled() {
            self.shutdown.cancel();
            let open = self.session_count();
            if open > 0 {
                warn!(open, "Orchestrator shut down with open sessions");
            } else {
                info!("Orchestrator shut down");
            }
        }
        self.evictor.lock().take();
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
