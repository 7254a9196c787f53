//! Custody Domain
//!
//! Custody account opening, standing settlement instructions and activation.
//!
//! ## State Machine:
//! NOT_OPENED → ACCOUNT_OPEN → SSI_CONFIGURED → ACTIVE → CLOSED

use async_trait::async_trait;

use super::common;
use super::{Domain, DomainCore};
use crate::error::RegistryError;
use crate::state_machine::StateMachine;
use crate::vocabulary::{ArgType, ArgumentSpec, VerbDefinition, Vocabulary};

pub const NAME: &str = "custody";

pub struct CustodyDomain {
    core: DomainCore,
}

impl CustodyDomain {
    pub fn new() -> Result<Self, RegistryError> {
        let core = DomainCore::new(
            "Custody accounts and standing settlement instructions",
            vocabulary()?,
            state_machine()?,
        )
        .keywords(&[
            "custody",
            "custodian",
            "safekeeping",
            "account",
            "ssi",
            "settlement",
            "instructions",
        ])
        .context_keys(&["custody_account_id"]);
        Ok(Self { core })
    }
}

#[async_trait]
impl Domain for CustodyDomain {
    domain_accessors!();
}

fn state_machine() -> Result<StateMachine, RegistryError> {
    StateMachine::builder(NAME, "NOT_OPENED")
        .transition("NOT_OPENED", &["ACCOUNT_OPEN"])
        .transition("ACCOUNT_OPEN", &["SSI_CONFIGURED"])
        .transition("SSI_CONFIGURED", &["ACTIVE"])
        .transition("ACTIVE", &["CLOSED"])
        .terminal("CLOSED")
        .guard(common::kyc_approved_guard())
        .guarded("SSI_CONFIGURED", "ACTIVE", &["kyc_approved"])
        .build()
}

fn vocabulary() -> Result<Vocabulary, RegistryError> {
    Vocabulary::builder(NAME, "1.0.0")
        .states(&["NOT_OPENED", "ACCOUNT_OPEN", "SSI_CONFIGURED", "ACTIVE", "CLOSED"])
        .verb(
            VerbDefinition::new("custody.open-account", "account")
                .describe("Open a custody account")
                .arg(ArgumentSpec::required(
                    "account-type",
                    ArgType::one_of(&["SEGREGATED", "OMNIBUS"]),
                ))
                .arg(common::currency("base-currency", true))
                .transition(&["NOT_OPENED"], "ACCOUNT_OPEN")
                .produces("custody_account_id"),
        )
        .verb(
            VerbDefinition::new("custody.configure-ssi", "settlement")
                .describe("Configure a standing settlement instruction for a market")
                .arg(common::text("market", true))
                .arg(common::currency("currency", true))
                .arg(
                    ArgumentSpec::required("bic", ArgType::String)
                        .pattern("^[A-Z0-9]{8}([A-Z0-9]{3})?$", "must be an 8 or 11 character BIC"),
                )
                .transition(&["ACCOUNT_OPEN"], "SSI_CONFIGURED")
                .idempotent(),
        )
        .verb(
            VerbDefinition::new("custody.activate", "account")
                .describe("Activate the account for trading")
                .transition(&["SSI_CONFIGURED"], "ACTIVE"),
        )
        .verb(
            VerbDefinition::new("custody.close", "account")
                .describe("Close the custody account")
                .arg(common::text("reason", false))
                .transition(&["ACTIVE"], "CLOSED"),
        )
        .build()
}
