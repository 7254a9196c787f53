//! Domain Registry
//!
//! Thread-safe directory of [`Domain`]s, remembering registration order.
//!
//! ## Registration checks
//! A domain is rejected when its name is taken, a verb name is malformed or
//! duplicated, a category lists an undefined verb, a verb transition names an
//! undeclared state or an edge absent from the state machine, or a verb names
//! a guard the machine does not know.
//!
//! ## Health monitoring
//! A background sweep polls every domain's `health_check` on a fixed interval
//! and maintains the aggregate "registry healthy" flag. The sweep holds the
//! domain map lock only while snapshotting handles, and each status lock only
//! while updating that one domain.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domains::Domain;
use crate::error::{RegistryError, RegistryResult};
use crate::vocabulary::is_valid_verb_name;

/// Configuration for the domain registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Health sweep period in milliseconds
    pub health_interval_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            health_interval_ms: 30_000,
        }
    }
}

impl RegistryConfig {
    pub fn health_interval(&self) -> Duration {
        Duration::from_millis(self.health_interval_ms.max(1))
    }
}

/// Last observed health of one domain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainHealth {
    pub domain: String,
    pub healthy: bool,
    pub checked_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
}

impl DomainHealth {
    fn unchecked(domain: &str) -> Self {
        Self {
            domain: domain.to_string(),
            healthy: true,
            checked_at: None,
            consecutive_failures: 0,
        }
    }
}

#[derive(Default)]
struct Directory {
    ordered: Vec<Arc<dyn Domain>>,
    index: HashMap<String, usize>,
}

pub struct DomainRegistry {
    config: RegistryConfig,
    directory: RwLock<Directory>,
    health: RwLock<HashMap<String, Arc<Mutex<DomainHealth>>>>,
    healthy: AtomicBool,
    shutdown: CancellationToken,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl DomainRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            directory: RwLock::new(Directory::default()),
            health: RwLock::new(HashMap::new()),
            healthy: AtomicBool::new(true),
            shutdown: CancellationToken::new(),
            monitor: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Validate and add a domain
    pub fn register(&self, domain: Arc<dyn Domain>) -> RegistryResult<()> {
        validate_domain(domain.as_ref())?;

        let name = domain.name().to_string();
        {
            let mut directory = self.directory.write();
            if directory.index.contains_key(&name) {
                return Err(RegistryError::DuplicateDomain { domain: name });
            }
            let position = directory.ordered.len();
            directory.ordered.push(domain.clone());
            directory.index.insert(name.clone(), position);
        }
        self.health
            .write()
            .insert(name.clone(), Arc::new(Mutex::new(DomainHealth::unchecked(&name))));

        info!(
            domain = %name,
            version = domain.version(),
            verbs = domain.vocabulary().verbs().len(),
            "Domain registered"
        );
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Domain>> {
        let directory = self.directory.read();
        directory
            .index
            .get(name)
            .map(|&i| directory.ordered[i].clone())
    }

    /// Like [`get`](Self::get) but with a typed error
    pub fn require(&self, name: &str) -> RegistryResult<Arc<dyn Domain>> {
        self.get(name).ok_or_else(|| RegistryError::DomainNotFound {
            domain: name.to_string(),
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.directory.read().index.contains_key(name)
    }

    /// Every domain in registration order
    pub fn list(&self) -> Vec<Arc<dyn Domain>> {
        self.directory.read().ordered.clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.directory
            .read()
            .ordered
            .iter()
            .map(|d| d.name().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.directory.read().ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registration position of `name`
    pub fn position(&self, name: &str) -> Option<usize> {
        self.directory.read().index.get(name).copied()
    }

    /// Domains whose vocabulary defines `verb`, in registration order
    pub fn find_domains_by_verb(&self, verb: &str) -> Vec<Arc<dyn Domain>> {
        self.directory
            .read()
            .ordered
            .iter()
            .filter(|d| d.vocabulary().contains(verb))
            .cloned()
            .collect()
    }

    /// Domains declaring a category named `category`
    pub fn find_domains_by_category(&self, category: &str) -> Vec<Arc<dyn Domain>> {
        self.directory
            .read()
            .ordered
            .iter()
            .filter(|d| d.vocabulary().category(category).is_some())
            .cloned()
            .collect()
    }

    // ------------------------------------------------------------------------
    // Health
    // ------------------------------------------------------------------------

    fn health_slot(&self, name: &str) -> Arc<Mutex<DomainHealth>> {
        if let Some(slot) = self.health.read().get(name) {
            return slot.clone();
        }
        self.health
            .write()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(DomainHealth::unchecked(name))))
            .clone()
    }

    /// Poll every domain once and refresh the aggregate flag
    pub async fn sweep_health(&self) -> bool {
        let domains = self.list();
        let mut all_healthy = true;

        for domain in domains {
            let healthy = domain.health_check().await;
            let slot = self.health_slot(domain.name());
            {
                let mut status = slot.lock();
                status.healthy = healthy;
                status.checked_at = Some(Utc::now());
                status.consecutive_failures = if healthy {
                    0
                } else {
                    status.consecutive_failures.saturating_add(1)
                };
            }
            if !healthy {
                warn!(domain = domain.name(), "Domain reported unhealthy");
            }
            all_healthy &= healthy;
        }

        self.healthy.store(all_healthy, Ordering::Release);
        debug!(healthy = all_healthy, "Registry health sweep finished");
        all_healthy
    }

    /// Aggregate result of the last sweep (true before the first one)
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    pub fn health_status(&self, name: &str) -> Option<DomainHealth> {
        self.health.read().get(name).map(|slot| slot.lock().clone())
    }

    /// Health of every domain in registration order
    pub fn health_report(&self) -> Vec<DomainHealth> {
        self.names()
            .iter()
            .filter_map(|name| self.health_status(name))
            .collect()
    }

    /// Spawn the periodic health sweep; must be called inside a tokio runtime.
    ///
    /// Returns false when a monitor is already running or the registry was
    /// shut down. The task holds only a weak reference to the registry.
    pub fn start_health_monitor(self: &Arc<Self>) -> bool {
        let mut monitor = self.monitor.lock();
        if monitor.is_some() || self.shutdown.is_cancelled() {
            return false;
        }

        let registry = Arc::downgrade(self);
        let token = self.shutdown.clone();
        let period = self.config.health_interval();

        *monitor = Some(tokio::spawn(async move {
            info!(interval_ms = period.as_millis() as u64, "Registry health monitor started");
            let mut tick = interval(period);
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        let Some(registry) = registry.upgrade() else { break };
                        registry.sweep_health().await;
                    }
                    _ = token.cancelled() => break,
                }
            }
            info!("Registry health monitor stopped");
        }));
        true
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitor
            .lock()
            .as_ref()
            .map_or(false, |handle| !handle.is_finished())
    }

    /// Stop the health sweep. Safe to call any number of times.
    pub fn shutdown(&self) {
        if !self.shutdown.is_cancelled() {
            self.shutdown.cancel();
            info!("Domain registry shut down");
        }
        self.monitor.lock().take();
    }
}

impl Drop for DomainRegistry {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Structural checks run before a domain enters the registry
fn validate_domain(domain: &dyn Domain) -> RegistryResult<()> {
    let name = domain.name();
    let vocabulary = domain.vocabulary();
    let machine = domain.state_machine();

    if let Some(verb) = vocabulary.duplicate_verbs().into_iter().next() {
        return Err(RegistryError::DuplicateVerb {
            domain: name.to_string(),
            verb,
        });
    }

    for verb in vocabulary.verbs() {
        if !is_valid_verb_name(&verb.name) {
            return Err(RegistryError::InvalidVerbName {
                domain: name.to_string(),
                verb: verb.name.clone(),
            });
        }

        if let Some(transition) = &verb.transition {
            let states = transition
                .from_states
                .iter()
                .chain(std::iter::once(&transition.to_state));
            for state in states {
                if !vocabulary.declares_state(state) || !machine.knows_state(state) {
                    return Err(RegistryError::UndeclaredState {
                        domain: name.to_string(),
                        verb: verb.name.clone(),
                        state: state.clone(),
                    });
                }
            }
            for from in &transition.from_states {
                if !machine.can_transition(from, &transition.to_state) {
                    return Err(RegistryError::InvalidTransition {
                        domain: name.to_string(),
                        verb: verb.name.clone(),
                        from: from.clone(),
                        to: transition.to_state.clone(),
                    });
                }
            }
        }

        if let Some(guard) = verb.guards.iter().find(|g| !machine.has_guard(g)) {
            return Err(RegistryError::UnknownGuard {
                domain: name.to_string(),
                guard: guard.clone(),
            });
        }
    }

    for (category, members) in vocabulary.categories() {
        if let Some(verb) = members.iter().find(|m| !vocabulary.contains(m)) {
            return Err(RegistryError::UndefinedCategoryVerb {
                domain: name.to_string(),
                category: category.clone(),
                verb: verb.clone(),
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::{DomainCore, KycDomain, UboDomain};
    use crate::state_machine::{FlagGuard, StateMachine};
    use crate::vocabulary::{VerbDefinition, Vocabulary};
    use async_trait::async_trait;

    struct TestDomain {
        core: DomainCore,
    }

    #[async_trait]
    impl Domain for TestDomain {
        domain_accessors!();
    }

    fn machine() -> StateMachine {
        StateMachine::builder("test", "OPEN")
            .transition("OPEN", &["CLOSED"])
            .terminal("CLOSED")
            .guard(FlagGuard::new("ready", "Must be ready"))
            .build()
            .unwrap()
    }

    fn domain_with(vocabulary: Vocabulary) -> Arc<dyn Domain> {
        Arc::new(TestDomain {
            core: DomainCore::new("test domain", vocabulary, machine()),
        })
    }

    fn vocabulary() -> crate::vocabulary::VocabularyBuilder {
        Vocabulary::builder("test", "1.0.0").states(&["OPEN", "CLOSED"])
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = DomainRegistry::new(RegistryConfig::default());
        registry.register(Arc::new(KycDomain::new().unwrap())).unwrap();
        registry.register(Arc::new(UboDomain::new().unwrap())).unwrap();

        assert_eq!(registry.names(), vec!["kyc", "ubo"]);
        assert_eq!(registry.find_domains_by_verb("kyc.approve").len(), 1);
        assert!(registry.find_domains_by_verb("nothing.here").is_empty());
        assert_eq!(registry.find_domains_by_category("structure")[0].name(), "ubo");

        let err = registry
            .register(Arc::new(KycDomain::new().unwrap()))
            .unwrap_err();
        assert_eq!(err, RegistryError::DuplicateDomain { domain: "kyc".to_string() });
    }

    #[test]
    fn test_rejects_duplicate_verbs() {
        let vocabulary = vocabulary()
            .verb(VerbDefinition::new("test.close", "a"))
            .verb(VerbDefinition::new("test.close", "b"))
            .build()
            .unwrap();
        let err = DomainRegistry::new(RegistryConfig::default())
            .register(domain_with(vocabulary))
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateVerb { ref verb, .. } if verb == "test.close"));
    }

    #[test]
    fn test_rejects_bad_structure() {
        let registry = DomainRegistry::new(RegistryConfig::default());

        let bad_name = vocabulary().verb(VerbDefinition::new("close", "a")).build().unwrap();
        assert!(matches!(
            registry.register(domain_with(bad_name)),
            Err(RegistryError::InvalidVerbName { .. })
        ));

        let undeclared = vocabulary()
            .verb(VerbDefinition::new("test.close", "a").transition(&["OPEN"], "GONE"))
            .build()
            .unwrap();
        assert!(matches!(
            registry.register(domain_with(undeclared)),
            Err(RegistryError::UndeclaredState { .. })
        ));

        let missing_edge = vocabulary()
            .verb(VerbDefinition::new("test.reopen", "a").transition(&["CLOSED"], "OPEN"))
            .build()
            .unwrap();
        assert!(matches!(
            registry.register(domain_with(missing_edge)),
            Err(RegistryError::InvalidTransition { .. })
        ));

        let category = vocabulary()
            .verb(VerbDefinition::new("test.close", "a"))
            .category("ops", &["test.missing"])
            .build()
            .unwrap();
        assert!(matches!(
            registry.register(domain_with(category)),
            Err(RegistryError::UndefinedCategoryVerb { .. })
        ));

        let guard = vocabulary()
            .verb(VerbDefinition::new("test.close", "a").guard("unknown"))
            .build()
            .unwrap();
        assert!(matches!(
            registry.register(domain_with(guard)),
            Err(RegistryError::UnknownGuard { .. })
        ));

        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_health_sweep_tracks_domains() {
        let registry = DomainRegistry::new(RegistryConfig::default());
        let kyc: Arc<dyn Domain> = Arc::new(KycDomain::new().unwrap());
        registry.register(kyc.clone()).unwrap();

        assert!(registry.sweep_health().await);
        kyc.metrics().set_healthy(false);
        assert!(!registry.sweep_health().await);
        assert!(!registry.is_healthy());

        let status = registry.health_status("kyc").unwrap();
        assert_eq!(status.consecutive_failures, 1);
        assert!(status.checked_at.is_some());
    }

    #[tokio::test]
    async fn test_monitor_shutdown_is_idempotent() {
        let registry = Arc::new(DomainRegistry::new(RegistryConfig {
            health_interval_ms: 10,
        }));
        registry.register(Arc::new(KycDomain::new().unwrap())).unwrap();

        assert!(registry.start_health_monitor());
        assert!(!registry.start_health_monitor());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(registry.health_status("kyc").unwrap().checked_at.is_some());

        registry.shutdown();
        registry.shutdown();
        assert!(!registry.is_monitoring());
        assert!(!registry.start_health_monitor());
    }
}
