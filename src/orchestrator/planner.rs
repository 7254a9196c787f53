//! Domain planning: which domains an onboarding needs and in what order.
//!
//! Static tables map an entity type to its base domains, a product to the
//! domain that services it and a jurisdiction to the compliance domain. The
//! required set is closed over the dependency table and staged with Kahn's
//! algorithm: stage N holds every domain whose dependencies all sit in
//! earlier stages.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::OrchestrationError;

const ENTITY_DOMAINS: &[(&str, &[&str])] = &[
    ("CORPORATE", &["onboarding", "kyc", "ubo"]),
    ("TRUST", &["onboarding", "kyc", "ubo"]),
    ("PARTNERSHIP", &["onboarding", "kyc", "ubo"]),
    ("FUND", &["onboarding", "kyc", "ubo"]),
    ("INDIVIDUAL", &["onboarding", "kyc"]),
    ("INVESTOR", &["investor", "kyc"]),
];

/// Base domain for entity types missing from the table
const DEFAULT_ENTITY_DOMAIN: &str = "onboarding";

const PRODUCT_DOMAINS: &[(&str, &str)] = &[
    ("CUSTODY", "custody"),
    ("FUND_ACCOUNTING", "custody"),
    ("TRANSFER_AGENCY", "investor"),
];

const COMPLIANCE_DOMAIN: &str = "compliance";

const REGULATED_JURISDICTIONS: &[&str] = &["US", "GB", "LU", "IE", "KY", "DE", "FR", "CH", "SG", "HK"];

/// domain → domains that must finish first
const DEPENDENCIES: &[(&str, &[&str])] = &[
    ("ubo", &["kyc"]),
    ("compliance", &["kyc"]),
    ("investor", &["kyc"]),
    ("custody", &["onboarding"]),
];

/// Required domains for one onboarding context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextAnalysis {
    /// Domain that owns the client relationship
    pub primary_domain: String,
    pub required: BTreeSet<String>,
    /// (domain, depends_on) pairs within `required`
    pub edges: Vec<(String, String)>,
}

/// Domains grouped into stages that can run side by side
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub stages: Vec<BTreeSet<String>>,
}

impl ExecutionPlan {
    pub fn stage_of(&self, domain: &str) -> Option<usize> {
        self.stages.iter().position(|stage| stage.contains(domain))
    }

    pub fn contains(&self, domain: &str) -> bool {
        self.stage_of(domain).is_some()
    }

    /// Every planned domain, stage by stage
    pub fn domains(&self) -> impl Iterator<Item = &String> {
        self.stages.iter().flatten()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Plan description for logs and dry runs
    pub fn describe(&self) -> String {
        let mut output = String::from("Execution Plan\n");
        for (i, stage) in self.stages.iter().enumerate() {
            let names: Vec<&str> = stage.iter().map(String::as_str).collect();
            output.push_str(&format!("  stage {}: {}\n", i, names.join(", ")));
        }
        output
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainPlanner {
    entity_domains: BTreeMap<String, Vec<String>>,
    product_domains: BTreeMap<String, String>,
    regulated_jurisdictions: BTreeSet<String>,
    dependencies: BTreeMap<String, BTreeSet<String>>,
}

impl Default for DomainPlanner {
    fn default() -> Self {
        Self::standard()
    }
}

impl DomainPlanner {
    /// Planner with no tables
    pub fn empty() -> Self {
        Self {
            entity_domains: BTreeMap::new(),
            product_domains: BTreeMap::new(),
            regulated_jurisdictions: BTreeSet::new(),
            dependencies: BTreeMap::new(),
        }
    }

    /// The shipped routing and dependency tables
    pub fn standard() -> Self {
        let mut planner = Self::empty();
        for (entity_type, domains) in ENTITY_DOMAINS {
            planner = planner.entity_type(entity_type, domains);
        }
        for (product, domain) in PRODUCT_DOMAINS {
            planner = planner.product(product, domain);
        }
        for jurisdiction in REGULATED_JURISDICTIONS {
            planner = planner.regulated_jurisdiction(jurisdiction);
        }
        for (domain, depends_on) in DEPENDENCIES {
            for dependency in *depends_on {
                planner = planner.dependency(domain, dependency);
            }
        }
        planner
    }

    pub fn entity_type(mut self, entity_type: &str, domains: &[&str]) -> Self {
        self.entity_domains.insert(
            entity_type.to_uppercase(),
            domains.iter().map(|d| d.to_string()).collect(),
        );
        self
    }

    pub fn product(mut self, product: &str, domain: &str) -> Self {
        self.product_domains
            .insert(product.to_uppercase(), domain.to_string());
        self
    }

    pub fn regulated_jurisdiction(mut self, jurisdiction: &str) -> Self {
        self.regulated_jurisdictions.insert(jurisdiction.to_uppercase());
        self
    }

    /// `domain` cannot start before `depends_on` has finished
    pub fn dependency(mut self, domain: &str, depends_on: &str) -> Self {
        self.dependencies
            .entry(domain.to_string())
            .or_default()
            .insert(depends_on.to_string());
        self
    }

    pub fn dependencies_of(&self, domain: &str) -> impl Iterator<Item = &String> {
        self.dependencies.get(domain).into_iter().flatten()
    }

    /// Check the dependency table itself for cycles
    pub fn validate(&self) -> Result<(), OrchestrationError> {
        let all: BTreeSet<String> = self
            .dependencies
            .iter()
            .flat_map(|(domain, deps)| std::iter::once(domain).chain(deps))
            .cloned()
            .collect();
        self.build_execution_plan(&all).map(|_| ())
    }

    /// Required domains for an entity type, its products and its jurisdiction
    pub fn analyze_context(
        &self,
        entity_type: &str,
        products: &[String],
        jurisdiction: Option<&str>,
    ) -> ContextAnalysis {
        let base = self
            .entity_domains
            .get(&entity_type.to_uppercase())
            .cloned()
            .unwrap_or_else(|| vec![DEFAULT_ENTITY_DOMAIN.to_string()]);
        let primary_domain = base
            .first()
            .cloned()
            .unwrap_or_else(|| DEFAULT_ENTITY_DOMAIN.to_string());

        let mut required: BTreeSet<String> = base.into_iter().collect();
        for product in products {
            if let Some(domain) = self.product_domains.get(&product.to_uppercase()) {
                required.insert(domain.clone());
            }
        }
        if let Some(jurisdiction) = jurisdiction {
            if self.regulated_jurisdictions.contains(&jurisdiction.to_uppercase()) {
                required.insert(COMPLIANCE_DOMAIN.to_string());
            }
        }

        let required = self.close_over_dependencies(required);
        let edges = required
            .iter()
            .flat_map(|domain| {
                self.dependencies_of(domain)
                    .map(move |dep| (domain.clone(), dep.clone()))
            })
            .collect();

        ContextAnalysis {
            primary_domain,
            required,
            edges,
        }
    }

    fn close_over_dependencies(&self, mut required: BTreeSet<String>) -> BTreeSet<String> {
        let mut pending: Vec<String> = required.iter().cloned().collect();
        while let Some(domain) = pending.pop() {
            for dependency in self.dependencies_of(&domain) {
                if required.insert(dependency.clone()) {
                    pending.push(dependency.clone());
                }
            }
        }
        required
    }

    /// Stage `required` (plus its dependencies) by dependency depth
    pub fn build_execution_plan(
        &self,
        required: &BTreeSet<String>,
    ) -> Result<ExecutionPlan, OrchestrationError> {
        let domains = self.close_over_dependencies(required.clone());

        let mut in_degree: BTreeMap<&str, usize> = domains
            .iter()
            .map(|d| (d.as_str(), self.dependencies_of(d).count()))
            .collect();
        // dependents[a] = domains waiting on a
        let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for domain in &domains {
            for dependency in self.dependencies_of(domain) {
                dependents
                    .entry(dependency.as_str())
                    .or_default()
                    .push(domain.as_str());
            }
        }

        let mut stages = Vec::new();
        let mut ready: BTreeSet<&str> = in_degree
            .iter()
            .filter(|(_, &degree)| degree == 0)
            .map(|(&d, _)| d)
            .collect();
        let mut placed = 0;

        while !ready.is_empty() {
            let mut next = BTreeSet::new();
            for &domain in &ready {
                for &dependent in dependents.get(domain).into_iter().flatten() {
                    if let Some(degree) = in_degree.get_mut(dependent) {
                        *degree -= 1;
                        if *degree == 0 {
                            next.insert(dependent);
                        }
                    }
                }
            }
            placed += ready.len();
            stages.push(ready.iter().map(|d| d.to_string()).collect());
            ready = next;
        }

        if placed != domains.len() {
            let domains = in_degree
                .into_iter()
                .filter(|(_, degree)| *degree > 0)
                .map(|(d, _)| d.to_string())
                .collect();
            return Err(OrchestrationError::DependencyCycle { domains });
        }

        Ok(ExecutionPlan { stages })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn set(domains: &[&str]) -> BTreeSet<String> {
        domains.iter().map(|d| d.to_string()).collect()
    }

    #[test]
    fn test_standard_table_is_acyclic() {
        DomainPlanner::standard().validate().unwrap();
    }

    #[test]
    fn test_ubo_waits_for_kyc() {
        let plan = DomainPlanner::standard()
            .build_execution_plan(&set(&["onboarding", "kyc", "ubo"]))
            .unwrap();
        assert_eq!(plan.stages, vec![set(&["kyc", "onboarding"]), set(&["ubo"])]);
    }

    #[test]
    fn test_analyze_corporate_with_products() {
        let analysis = DomainPlanner::standard().analyze_context(
            "corporate",
            &["CUSTODY".to_string(), "unknown".to_string()],
            Some("lu"),
        );
        assert_eq!(analysis.primary_domain, "onboarding");
        assert_eq!(
            analysis.required,
            set(&["compliance", "custody", "kyc", "onboarding", "ubo"])
        );
        assert!(analysis
            .edges
            .contains(&("custody".to_string(), "onboarding".to_string())));
    }

    #[test]
    fn test_investor_closes_over_kyc() {
        let planner = DomainPlanner::standard();
        let analysis = planner.analyze_context("INVESTOR", &[], Some("ZZ"));
        assert_eq!(analysis.primary_domain, "investor");
        assert_eq!(analysis.required, set(&["investor", "kyc"]));

        let plan = planner.build_execution_plan(&set(&["investor"])).unwrap();
        assert_eq!(plan.stage_of("kyc"), Some(0));
        assert_eq!(plan.stage_of("investor"), Some(1));
    }

    #[test]
    fn test_unknown_entity_type_defaults_to_onboarding() {
        let analysis = DomainPlanner::standard().analyze_context("SPV", &[], None);
        assert_eq!(analysis.required, set(&["onboarding"]));
    }

    #[test]
    fn test_cycle_is_reported() {
        let planner = DomainPlanner::empty()
            .dependency("a", "b")
            .dependency("b", "a")
            .dependency("c", "a");
        let err = planner.validate().unwrap_err();
        assert_eq!(
            err,
            OrchestrationError::DependencyCycle {
                domains: vec!["a".to_string(), "b".to_string(), "c".to_string()]
            }
        );
    }

    proptest! {
        #[test]
        fn prop_dependents_run_in_later_stages(
            edges in proptest::collection::vec((1usize..8, 0usize..8), 0..20)
        ) {
            let mut planner = DomainPlanner::empty();
            let mut all = BTreeSet::new();
            for (a, b) in edges {
                // only point at lower indices so the graph stays acyclic
                let (hi, lo) = (a.max(b), a.min(b));
                all.insert(format!("d{}", hi));
                all.insert(format!("d{}", lo));
                if hi != lo {
                    planner = planner.dependency(&format!("d{}", hi), &format!("d{}", lo));
                }
            }

            let plan = planner.build_execution_plan(&all).unwrap();
            prop_assert_eq!(plan.domains().count(), all.len());
            for domain in &all {
                let stage = plan.stage_of(domain).unwrap();
                for dependency in planner.dependencies_of(domain) {
                    prop_assert!(plan.stage_of(dependency).unwrap() < stage);
                }
            }
        }
    }
}
