//! Compliance Domain
//!
//! Jurisdictional tax and regulatory clearance (FATCA / CRS forms, escalation
//! of unusual cases).
//!
//! ## State Machine:
//! NOT_ASSESSED → ASSESSED → CLEARED
//! ASSESSED → ESCALATED → CLEARED

use async_trait::async_trait;
use serde_json::json;

use super::common;
use super::{Domain, DomainCore};
use crate::ast::Value;
use crate::error::RegistryError;
use crate::state_machine::{FlagGuard, StateMachine};
use crate::vocabulary::{ArgType, ArgumentSpec, VerbDefinition, Vocabulary};

pub const NAME: &str = "compliance";

pub struct ComplianceDomain {
    core: DomainCore,
}

impl ComplianceDomain {
    pub fn new() -> Result<Self, RegistryError> {
        let core = DomainCore::new(
            "Jurisdictional tax and regulatory clearance",
            vocabulary()?,
            state_machine()?,
        )
        .keywords(&[
            "compliance",
            "regulatory",
            "fatca",
            "crs",
            "tax",
            "sanctions",
            "jurisdiction",
            "escalate",
        ])
        .context_keys(&["compliance_case_id"]);
        Ok(Self { core })
    }
}

#[async_trait]
impl Domain for ComplianceDomain {
    domain_accessors!();
}

fn state_machine() -> Result<StateMachine, RegistryError> {
    StateMachine::builder(NAME, "NOT_ASSESSED")
        .transition("NOT_ASSESSED", &["ASSESSED"])
        .transition("ASSESSED", &["CLEARED", "ESCALATED"])
        .transition("ESCALATED", &["CLEARED"])
        .terminal("CLEARED")
        .guard(FlagGuard::new(
            "tax_forms_received",
            "Tax self-certification forms must be received",
        ))
        .guard(FlagGuard::new(
            "escalation_resolved",
            "The escalation must be resolved",
        ))
        .guarded("ASSESSED", "CLEARED", &["tax_forms_received"])
        .guarded("ESCALATED", "CLEARED", &["escalation_resolved", "tax_forms_received"])
        .build()
}

fn vocabulary() -> Result<Vocabulary, RegistryError> {
    Vocabulary::builder(NAME, "1.0.0")
        .states(&["NOT_ASSESSED", "ASSESSED", "ESCALATED", "CLEARED"])
        .verb(
            VerbDefinition::new("compliance.assess", "assessment")
                .describe("Assess regulatory obligations for a jurisdiction")
                .arg(common::country("jurisdiction", true).from_context("jurisdiction"))
                .arg(
                    ArgumentSpec::optional("risk-rating", ArgType::one_of(&["LOW", "MEDIUM", "HIGH"]))
                        .default_value(Value::Identifier("MEDIUM".to_string())),
                )
                .transition(&["NOT_ASSESSED"], "ASSESSED")
                .produces("compliance_case_id"),
        )
        .verb(
            VerbDefinition::new("compliance.receive-tax-forms", "documents")
                .describe("Record receipt of tax self-certification forms")
                .arg(ArgumentSpec::required(
                    "form-type",
                    ArgType::one_of(&["W8BEN", "W8BENE", "W9", "CRS"]),
                ))
                .arg(ArgumentSpec::optional("received-on", ArgType::Date))
                .sets("tax_forms_received", json!(true)),
        )
        .verb(
            VerbDefinition::new("compliance.escalate", "assessment")
                .describe("Escalate the case for manual review")
                .arg(common::text("reason", true))
                .transition(&["ASSESSED"], "ESCALATED"),
        )
        .verb(
            VerbDefinition::new("compliance.resolve-escalation", "assessment")
                .describe("Record the outcome of a manual review")
                .arg(common::text("resolution", true))
                .sets("escalation_resolved", json!(true)),
        )
        .verb(
            VerbDefinition::new("compliance.clear", "assessment")
                .describe("Clear the entity for the jurisdiction")
                .transition(&["ASSESSED", "ESCALATED"], "CLEARED"),
        )
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::VerbCall;
    use crate::vocabulary::ValidationContext;
    use dsl_types::ContextMap;

    #[test]
    fn test_assess_takes_jurisdiction_from_context() {
        let domain = ComplianceDomain::new().unwrap();

        let err = domain
            .validate(&VerbCall::new("compliance.assess"), &ValidationContext::empty())
            .unwrap_err();
        assert_eq!(err.reason_code(), "validation.missing_argument:jurisdiction");

        let mut context = ContextMap::new();
        context.insert("jurisdiction".to_string(), json!("LU"));
        let validated = domain
            .validate(&VerbCall::new("compliance.assess"), &ValidationContext::new(&context))
            .unwrap();
        assert_eq!(validated.render(), "(compliance.assess :jurisdiction \"LU\" :risk-rating MEDIUM)");
    }
}
