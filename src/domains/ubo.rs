//! UBO Domain
//!
//! Ultimate Beneficial Ownership discovery: declare the entities in the
//! structure, map ownership links, identify the beneficial owners above the
//! threshold and verify them once KYC is approved.
//!
//! ## State Machine:
//! UBO_NOT_STARTED → ENTITIES_DECLARED → OWNERSHIP_MAPPED → UBO_IDENTIFIED →
//! UBO_VERIFIED

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::json;

use super::common;
use super::{Domain, DomainCore};
use crate::ast::Value;
use crate::error::RegistryError;
use crate::state_machine::{FlagGuard, StateMachine};
use crate::vocabulary::{ArgType, ArgumentSpec, VerbDefinition, Vocabulary};

pub const NAME: &str = "ubo";

/// Default ownership threshold for beneficial owners, in percent
const DEFAULT_THRESHOLD: i64 = 25;

pub struct UboDomain {
    core: DomainCore,
}

impl UboDomain {
    pub fn new() -> Result<Self, RegistryError> {
        let core = DomainCore::new(
            "Ultimate beneficial ownership discovery and verification",
            vocabulary()?,
            state_machine()?,
        )
        .keywords(&[
            "ubo",
            "beneficial",
            "ownership",
            "owner",
            "owners",
            "shareholder",
            "control",
            "structure",
        ])
        .context_keys(&["ubo_case_id"]);
        Ok(Self { core })
    }
}

#[async_trait]
impl Domain for UboDomain {
    domain_accessors!();
}

fn state_machine() -> Result<StateMachine, RegistryError> {
    StateMachine::builder(NAME, "UBO_NOT_STARTED")
        .transition("UBO_NOT_STARTED", &["ENTITIES_DECLARED"])
        .transition("ENTITIES_DECLARED", &["OWNERSHIP_MAPPED"])
        .transition("OWNERSHIP_MAPPED", &["UBO_IDENTIFIED"])
        .transition("UBO_IDENTIFIED", &["UBO_VERIFIED"])
        .terminal("UBO_VERIFIED")
        .guard(FlagGuard::new(
            "ownership_complete",
            "The ownership structure must be fully mapped",
        ))
        .guard(common::kyc_approved_guard())
        .guarded("OWNERSHIP_MAPPED", "UBO_IDENTIFIED", &["ownership_complete"])
        .guarded("UBO_IDENTIFIED", "UBO_VERIFIED", &["kyc_approved"])
        .build()
}

fn vocabulary() -> Result<Vocabulary, RegistryError> {
    Vocabulary::builder(NAME, "1.0.0")
        .states(&[
            "UBO_NOT_STARTED",
            "ENTITIES_DECLARED",
            "OWNERSHIP_MAPPED",
            "UBO_IDENTIFIED",
            "UBO_VERIFIED",
        ])
        .verb(
            VerbDefinition::new("ubo.declare-entity", "structure")
                .describe("Declare an entity in the ownership structure")
                .arg(common::text("name", true))
                .arg(ArgumentSpec::required(
                    "entity-type",
                    ArgType::one_of(&["CORPORATE", "INDIVIDUAL", "TRUST", "PARTNERSHIP", "FUND"]),
                ))
                .arg(common::country("jurisdiction", false))
                .transition(&["UBO_NOT_STARTED"], "ENTITIES_DECLARED")
                .idempotent(),
        )
        .verb(
            VerbDefinition::new("ubo.link-ownership", "structure")
                .describe("Record that one entity owns a share of another")
                .arg(common::text("owner", true))
                .arg(common::text("owned", true))
                .arg(common::percentage("percentage", true))
                .transition(&["ENTITIES_DECLARED"], "OWNERSHIP_MAPPED")
                .idempotent()
                .produces("ubo_case_id"),
        )
        .verb(
            VerbDefinition::new("ubo.mark-complete", "structure")
                .describe("Confirm the ownership structure is complete")
                .sets("ownership_complete", json!(true)),
        )
        .verb(
            VerbDefinition::new("ubo.identify", "analysis")
                .describe("Identify beneficial owners above the threshold")
                .arg(
                    common::percentage("threshold", false)
                        .default_value(Value::Number(Decimal::from(DEFAULT_THRESHOLD))),
                )
                .transition(&["OWNERSHIP_MAPPED"], "UBO_IDENTIFIED"),
        )
        .verb(
            VerbDefinition::new("ubo.verify", "analysis")
                .describe("Verify the identified beneficial owners")
                .transition(&["UBO_IDENTIFIED"], "UBO_VERIFIED"),
        )
        .build()
}
