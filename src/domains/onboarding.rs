//! Onboarding Domain
//!
//! Client onboarding case: product selection, KYC hand-off, service discovery
//! and resource planning.
//!
//! ## State Machine:
//! CREATED → PRODUCTS_ADDED → KYC_STARTED → SERVICES_DISCOVERED →
//! RESOURCES_PLANNED → COMPLETE
//!
//! Any non-terminal state may move to ARCHIVED. Completion needs the
//! `kyc_approved` flag established by the KYC domain.

use async_trait::async_trait;

use super::common;
use super::{Domain, DomainCore};
use crate::ast::Value;
use crate::error::RegistryError;
use crate::state_machine::StateMachine;
use crate::vocabulary::{ArgType, ArgumentSpec, VerbDefinition, Vocabulary};

pub const NAME: &str = "onboarding";

const ACTIVE_STATES: [&str; 5] = [
    "CREATED",
    "PRODUCTS_ADDED",
    "KYC_STARTED",
    "SERVICES_DISCOVERED",
    "RESOURCES_PLANNED",
];

pub struct OnboardingDomain {
    core: DomainCore,
}

impl OnboardingDomain {
    pub fn new() -> Result<Self, RegistryError> {
        let core = DomainCore::new(
            "Client onboarding workflow from case creation to completion",
            vocabulary()?,
            state_machine()?,
        )
        .keywords(&[
            "onboarding",
            "onboard",
            "case",
            "products",
            "product",
            "services",
            "resources",
            "cbu",
            "client",
        ])
        .context_keys(&["onboarding_case_id", "cbu_id"]);
        Ok(Self { core })
    }
}

#[async_trait]
impl Domain for OnboardingDomain {
    domain_accessors!();
}

fn state_machine() -> Result<StateMachine, RegistryError> {
    StateMachine::builder(NAME, "CREATED")
        .transition("CREATED", &["PRODUCTS_ADDED"])
        .transition("PRODUCTS_ADDED", &["KYC_STARTED"])
        .transition("KYC_STARTED", &["SERVICES_DISCOVERED"])
        .transition("SERVICES_DISCOVERED", &["RESOURCES_PLANNED"])
        .transition("RESOURCES_PLANNED", &["COMPLETE"])
        .from_each(&ACTIVE_STATES, "ARCHIVED")
        .terminal("COMPLETE")
        .terminal("ARCHIVED")
        .guard(common::kyc_approved_guard())
        .guarded("RESOURCES_PLANNED", "COMPLETE", &["kyc_approved"])
        .build()
}

fn vocabulary() -> Result<Vocabulary, RegistryError> {
    let mut states = ACTIVE_STATES.to_vec();
    states.extend(["COMPLETE", "ARCHIVED"]);

    Vocabulary::builder(NAME, "1.0.0")
        .states(&states)
        .verb(
            VerbDefinition::new("case.update", "case")
                .describe("Update descriptive fields of the onboarding case")
                .arg(common::text("name", false))
                .arg(common::text("notes", false))
                .at_least_one_of(&["name", "notes"]),
        )
        .verb(
            VerbDefinition::new("cbu.associate", "case")
                .describe("Associate the case with a client business unit")
                .arg(ArgumentSpec::required("cbu-id", ArgType::Uuid))
                .arg(common::country("jurisdiction", false)),
        )
        .verb(
            VerbDefinition::new("products.add", "products")
                .describe("Add products to the onboarding case")
                .arg(
                    ArgumentSpec::required(
                        "product",
                        ArgType::one_of(&["CUSTODY", "FUND_ACCOUNTING", "TRANSFER_AGENCY"]),
                    )
                    .describe("Product code"),
                )
                .transition(&["CREATED"], "PRODUCTS_ADDED")
                .idempotent(),
        )
        .verb(
            VerbDefinition::new("onboarding.start-kyc", "workflow")
                .describe("Hand the case over to KYC")
                .transition(&["PRODUCTS_ADDED"], "KYC_STARTED"),
        )
        .verb(
            VerbDefinition::new("services.discover", "workflow")
                .describe("Record the services required by the selected products")
                .arg(common::text("service", false))
                .arg(
                    ArgumentSpec::optional("sla", ArgType::one_of(&["STANDARD", "PREMIUM"]))
                        .default_value(Value::Identifier("STANDARD".to_string())),
                )
                .transition(&["KYC_STARTED"], "SERVICES_DISCOVERED"),
        )
        .verb(
            VerbDefinition::new("resources.plan", "workflow")
                .describe("Plan resources for the discovered services")
                .arg(common::text("resource", false))
                .transition(&["SERVICES_DISCOVERED"], "RESOURCES_PLANNED"),
        )
        .verb(
            VerbDefinition::new("onboarding.complete", "workflow")
                .describe("Complete onboarding")
                .transition(&["RESOURCES_PLANNED"], "COMPLETE"),
        )
        .verb(
            VerbDefinition::new("onboarding.archive", "workflow")
                .describe("Archive the case")
                .arg(common::text("reason", true))
                .transition(&ACTIVE_STATES, "ARCHIVED"),
        )
        .build()
}
