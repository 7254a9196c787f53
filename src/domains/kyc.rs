//! KYC Domain
//!
//! Know Your Customer verification of one client entity.
//!
//! ## State Machine:
//! KYC_NOT_STARTED → KYC_PENDING → (KYC_IN_REVIEW) → KYC_APPROVED | KYC_REJECTED
//!
//! Approval needs `documents_verified`; approval out of review additionally
//! needs `screening_clear`.

use async_trait::async_trait;
use serde_json::json;

use super::common;
use super::{Domain, DomainCore};
use crate::ast::Value;
use crate::error::RegistryError;
use crate::state_machine::{FlagGuard, StateMachine};
use crate::vocabulary::{ArgType, ArgumentSpec, VerbDefinition, Vocabulary};

pub const NAME: &str = "kyc";

pub struct KycDomain {
    core: DomainCore,
}

impl KycDomain {
    pub fn new() -> Result<Self, RegistryError> {
        let core = DomainCore::new(
            "Know Your Customer verification: documents, screening and approval",
            vocabulary()?,
            state_machine()?,
        )
        .keywords(&[
            "kyc",
            "know your customer",
            "identity",
            "verification",
            "verify",
            "documents",
            "passport",
            "screening",
            "due diligence",
        ])
        .context_keys(&["kyc_case_id"]);
        Ok(Self { core })
    }
}

#[async_trait]
impl Domain for KycDomain {
    domain_accessors!();
}

fn state_machine() -> Result<StateMachine, RegistryError> {
    StateMachine::builder(NAME, "KYC_NOT_STARTED")
        .transition("KYC_NOT_STARTED", &["KYC_PENDING"])
        .transition("KYC_PENDING", &["KYC_IN_REVIEW", "KYC_APPROVED", "KYC_REJECTED"])
        .transition("KYC_IN_REVIEW", &["KYC_APPROVED", "KYC_REJECTED"])
        .terminal("KYC_APPROVED")
        .terminal("KYC_REJECTED")
        .guard(FlagGuard::new(
            "documents_verified",
            "All KYC documents must be verified",
        ))
        .guard(FlagGuard::new(
            "screening_clear",
            "Sanctions and PEP screening must be clear",
        ))
        .guarded("KYC_PENDING", "KYC_APPROVED", &["documents_verified"])
        .guarded(
            "KYC_IN_REVIEW",
            "KYC_APPROVED",
            &["documents_verified", "screening_clear"],
        )
        .build()
}

fn vocabulary() -> Result<Vocabulary, RegistryError> {
    Vocabulary::builder(NAME, "1.0.0")
        .states(&[
            "KYC_NOT_STARTED",
            "KYC_PENDING",
            "KYC_IN_REVIEW",
            "KYC_APPROVED",
            "KYC_REJECTED",
        ])
        .verb(
            VerbDefinition::new("kyc.begin", "case")
                .describe("Open a KYC case for the entity")
                .arg(
                    ArgumentSpec::optional("level", ArgType::one_of(&["SIMPLIFIED", "STANDARD", "ENHANCED"]))
                        .default_value(Value::Identifier("STANDARD".to_string()))
                        .describe("Due diligence level"),
                )
                .arg(common::country("jurisdiction", false).from_context("jurisdiction"))
                .transition(&["KYC_NOT_STARTED"], "KYC_PENDING")
                .produces("kyc_case_id"),
        )
        .verb(
            VerbDefinition::new("kyc.collect-document", "documents")
                .describe("Record a document received from the client")
                .arg(common::text("document-type", true))
                .arg(common::text("reference", false)),
        )
        .verb(
            VerbDefinition::new("kyc.verify-documents", "documents")
                .describe("Confirm every collected document has been verified")
                .arg(common::text("verified-by", false))
                .sets("documents_verified", json!(true)),
        )
        .verb(
            VerbDefinition::new("kyc.screen", "screening")
                .describe("Send the entity to sanctions and PEP screening")
                .arg(common::text("provider", false))
                .transition(&["KYC_PENDING"], "KYC_IN_REVIEW"),
        )
        .verb(
            VerbDefinition::new("kyc.clear-screening", "screening")
                .describe("Record a clear screening result")
                .sets("screening_clear", json!(true)),
        )
        .verb(
            VerbDefinition::new("kyc.approve", "decision")
                .describe("Approve the KYC case")
                .arg(common::text("approver", false))
                .transition(&["KYC_PENDING", "KYC_IN_REVIEW"], "KYC_APPROVED")
                .sets("kyc_approved", json!(true)),
        )
        .verb(
            VerbDefinition::new("kyc.reject", "decision")
                .describe("Reject the KYC case")
                .arg(common::text("reason", true))
                .transition(&["KYC_PENDING", "KYC_IN_REVIEW"], "KYC_REJECTED")
                .sets("kyc_approved", json!(false)),
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
    fn test_begin_defaults() {
        let domain = KycDomain::new().unwrap();
        let mut context = ContextMap::new();
        context.insert("jurisdiction".to_string(), json!("GB"));

        let validated = domain
            .validate(&VerbCall::new("kyc.begin"), &ValidationContext::new(&context))
            .unwrap();
        assert_eq!(validated.render(), "(kyc.begin :level STANDARD :jurisdiction \"GB\")");
        assert_eq!(validated.context_injected(), ["jurisdiction".to_string()]);
        assert_eq!(validated.defaulted(), ["level".to_string()]);
    }

    #[test]
    fn test_misspelled_verb_suggests() {
        let domain = KycDomain::new().unwrap();
        let err = domain
            .validate(&VerbCall::new("kyc.aprove"), &ValidationContext::empty())
            .unwrap_err();
        assert!(err.to_string().contains("did you mean kyc.approve"));
    }
}
