//! Multi-domain orchestration scenarios
//!
//! Plans sessions for the standard entity types and drives a corporate client
//! from the first stage to session completion, both with DSL forms routed by
//! verb and with a scripted generator behind free-text instructions.

mod helpers;

#[cfg(test)]
mod multi_domain_orchestration {
    use super::helpers;
    use ob_lifecycle::error::{DSLError, OrchestrationError};
    use ob_lifecycle::generation::CandidateVerb;
    use ob_lifecycle::orchestrator::DomainPlanner;
    use ob_lifecycle::{
        DirectDslGenerator, DslPipeline, InMemoryStore, Orchestrator, OrchestratorConfig,
        RouterConfig, RoutingStrategy, SessionRequest,
    };
    use serde_json::json;
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    // =========================================================================
    // PLANNING
    // =========================================================================

    #[test]
    fn test_corporate_plan_stages_kyc_before_ubo() {
        let planner = DomainPlanner::standard();
        let analysis = planner.analyze_context("CORPORATE", &[], None);
        assert_eq!(analysis.primary_domain, "onboarding");
        assert_eq!(analysis.required, set(&["onboarding", "kyc", "ubo"]));

        let plan = planner.build_execution_plan(&analysis.required).unwrap();
        assert_eq!(plan.stages, vec![set(&["onboarding", "kyc"]), set(&["ubo"])]);
    }

    #[test]
    fn test_products_and_jurisdiction_extend_the_plan() {
        let planner = DomainPlanner::standard();
        let products = vec!["custody".to_string(), "TRANSFER_AGENCY".to_string()];
        let analysis = planner.analyze_context("individual", &products, Some("us"));
        assert_eq!(
            analysis.required,
            set(&["onboarding", "kyc", "custody", "investor", "compliance"])
        );

        let plan = planner.build_execution_plan(&analysis.required).unwrap();
        assert_eq!(plan.stage_of("kyc"), Some(0));
        assert_eq!(plan.stage_of("onboarding"), Some(0));
        for dependent in ["custody", "investor", "compliance"] {
            assert_eq!(plan.stage_of(dependent), Some(1), "{}", dependent);
        }
    }

    #[test]
    fn test_cycle_is_reported() {
        let planner = DomainPlanner::empty()
            .dependency("a", "b")
            .dependency("b", "a");
        let err = planner.build_execution_plan(&set(&["a"])).unwrap_err();
        assert!(matches!(err, OrchestrationError::DependencyCycle { ref domains } if domains == &["a", "b"]));
    }

    // =========================================================================
    // EXECUTION
    // =========================================================================

    #[tokio::test]
    async fn test_corporate_session_runs_to_completion_from_dsl_forms() {
        let pipeline = Arc::new(helpers::pipeline());
        let orchestrator = Orchestrator::new(
            pipeline,
            Arc::new(DirectDslGenerator),
            RouterConfig::default(),
            OrchestratorConfig::default(),
        )
        .unwrap();
        let cancel = CancellationToken::new();

        let session = orchestrator
            .create_session(&SessionRequest::new("CORPORATE", "analyst"), &cancel)
            .unwrap();
        assert_eq!(session.pending_in_stage(), set(&["onboarding", "kyc"]));

        let script = [
            ("(kyc.begin :level ENHANCED)", "kyc"),
            (r#"(kyc.collect-document :document-type "REGISTRY_EXTRACT")"#, "kyc"),
            ("(kyc.verify-documents)", "kyc"),
            ("(kyc.approve)", "kyc"),
            ("(products.add :product CUSTODY)", "onboarding"),
            ("(onboarding.start-kyc)", "onboarding"),
            ("(services.discover)", "onboarding"),
            ("(resources.plan)", "onboarding"),
            ("(onboarding.complete)", "onboarding"),
            (r#"(ubo.declare-entity :name "HoldCo" :entity-type CORPORATE)"#, "ubo"),
            (r#"(ubo.link-ownership :owner "Ada" :owned "HoldCo" :percentage 60)"#, "ubo"),
            ("(ubo.mark-complete)", "ubo"),
            ("(ubo.identify)", "ubo"),
        ];

        for (instruction, domain) in script {
            let outcome = orchestrator
                .execute(session.session_id, instruction, &cancel)
                .await
                .unwrap_or_else(|e| panic!("{}: {}", instruction, e));
            assert_eq!(outcome.domain, domain, "{}", instruction);
            let routing = outcome.routing.unwrap();
            assert_eq!(routing.strategy, RoutingStrategy::VerbExtraction);
            assert!(!outcome.session_complete);
        }

        let last = orchestrator
            .execute(session.session_id, "(ubo.verify)", &cancel)
            .await
            .unwrap();
        assert!(last.domain_completed);
        assert!(last.stage_advanced);
        assert!(last.session_complete);

        let snapshot = orchestrator.session(session.session_id).await.unwrap();
        assert_eq!(snapshot.completed, set(&["onboarding", "kyc", "ubo"]));
        assert_eq!(snapshot.fragments.len(), 14);
        assert_eq!(snapshot.shared_context.get("kyc_approved"), Some(&json!(true)));
        assert!(snapshot.shared_context.contains_key("ubo_case_id"));

        let err = orchestrator
            .execute(session.session_id, "(kyc.begin)", &cancel)
            .await
            .unwrap_err();
        assert_eq!(
            err.reason_code(),
            format!("orchestration.session_complete:{}", session.session_id)
        );
    }

    #[tokio::test]
    async fn test_instruction_outside_current_stage_is_not_routed_there() {
        let (orchestrator, generator) = helpers::orchestrator(OrchestratorConfig::default());
        let cancel = CancellationToken::new();
        let session = orchestrator
            .create_session(&SessionRequest::new("CORPORATE", "analyst"), &cancel)
            .unwrap();

        let err = orchestrator
            .execute_in_domain(session.session_id, "ubo", "declare the holding company", &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.reason_code(), "orchestration.unmet_dependency:ubo->kyc");

        generator.push(CandidateVerb::new("kyc.begin").with_argument("level", json!("SIMPLIFIED")));
        let outcome = orchestrator
            .execute(session.session_id, "please start know your customer checks", &cancel)
            .await
            .unwrap();
        assert_eq!(outcome.domain, "kyc");
        assert_eq!(outcome.submission.version.fragment, "(kyc.begin :level SIMPLIFIED)");

        let requests = generator.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].domain, "kyc");
        assert_eq!(requests[0].current_state, "KYC_NOT_STARTED");
    }

    #[tokio::test]
    async fn test_rejected_candidate_leaves_session_untouched() {
        let (orchestrator, generator) = helpers::orchestrator(OrchestratorConfig::default());
        let cancel = CancellationToken::new();
        let session = orchestrator
            .create_session(&SessionRequest::new("INDIVIDUAL", "analyst"), &cancel)
            .unwrap();

        generator.push(CandidateVerb::new("kyc.approve"));
        let err = orchestrator
            .execute_in_domain(session.session_id, "kyc", "approve it", &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, DSLError::State(_)));

        generator.push_failure("model unavailable");
        let err = orchestrator
            .execute_in_domain(session.session_id, "kyc", "start", &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.reason_code(), "generation.failed:kyc");

        let snapshot = orchestrator.session(session.session_id).await.unwrap();
        assert!(snapshot.fragments.is_empty());
        assert!(snapshot.last_domain.is_none());
        let kyc = orchestrator.pipeline().entity(snapshot.entities["kyc"]).unwrap();
        assert_eq!(kyc.current_state, "KYC_NOT_STARTED");
    }

    #[tokio::test]
    async fn test_session_cap_and_close() {
        let config = OrchestratorConfig {
            max_sessions: 2,
            ..OrchestratorConfig::default()
        };
        let pipeline = Arc::new(DslPipeline::new(helpers::registry(), Arc::new(InMemoryStore::new())));
        let orchestrator = Orchestrator::new(
            pipeline,
            Arc::new(DirectDslGenerator),
            RouterConfig::default(),
            config,
        )
        .unwrap();
        let cancel = CancellationToken::new();
        let request = SessionRequest::new("FUND", "ops");

        let first = orchestrator.create_session(&request, &cancel).unwrap();
        orchestrator.create_session(&request, &cancel).unwrap();
        let err = orchestrator.create_session(&request, &cancel).unwrap_err();
        assert_eq!(err.reason_code(), "orchestration.session_limit");

        assert!(orchestrator.close_session(first.session_id));
        assert!(!orchestrator.close_session(first.session_id));
        assert_eq!(orchestrator.session_count(), 1);
        orchestrator.create_session(&request, &cancel).unwrap();
    }

    #[tokio::test]
    async fn test_failed_entity_create_discards_partial_session() {
        let config = OrchestratorConfig {
            max_sessions: 1,
            ..OrchestratorConfig::default()
        };
        let (orchestrator, store) = helpers::faulty_orchestrator(config);
        let cancel = CancellationToken::new();
        let request = SessionRequest::new("CORPORATE", "analyst");

        store.fail_creates_after(2);
        let err = orchestrator.create_session(&request, &cancel).unwrap_err();
        assert_eq!(err.reason_code(), "store.backend:create_entity");
        assert_eq!(store.inner().entity_count(), 0);
        assert_eq!(orchestrator.session_count(), 0);

        // the failed attempt gave its place under the cap back
        store.fail_creates_after(3);
        let session = orchestrator.create_session(&request, &cancel).unwrap();
        assert_eq!(session.entities.len(), 3);
        assert_eq!(store.inner().entity_count(), 3);
    }
}
