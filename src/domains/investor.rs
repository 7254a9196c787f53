//! Investor Domain
//!
//! Fund investor lifecycle: subscription, holding, redemption and closure.
//!
//! ## State Machine:
//! PROSPECT → SUBSCRIPTION_PENDING → ACTIVE ⇄ REDEMPTION_PENDING
//! ACTIVE → CLOSED
//!
//! Activation needs `funds_received` and `kyc_approved`; closing needs the
//! investor to hold nothing.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::json;

use super::common;
use super::{Domain, DomainCore};
use crate::ast::Value;
use crate::error::RegistryError;
use crate::state_machine::{Comparison, FlagGuard, StateMachine, ThresholdGuard};
use crate::vocabulary::{ArgType, ArgumentSpec, VerbDefinition, Vocabulary};

pub const NAME: &str = "investor";

pub struct InvestorDomain {
    core: DomainCore,
}

impl InvestorDomain {
    pub fn new() -> Result<Self, RegistryError> {
        let core = DomainCore::new(
            "Fund investor subscriptions, holdings and redemptions",
            vocabulary()?,
            state_machine()?,
        )
        .keywords(&[
            "investor",
            "subscription",
            "subscribe",
            "redeem",
            "redemption",
            "units",
            "holdings",
            "shares",
            "fund",
        ])
        .context_keys(&["investor_id", "subscription_id"]);
        Ok(Self { core })
    }
}

#[async_trait]
impl Domain for InvestorDomain {
    domain_accessors!();
}

fn state_machine() -> Result<StateMachine, RegistryError> {
    StateMachine::builder(NAME, "PROSPECT")
        .transition("PROSPECT", &["SUBSCRIPTION_PENDING"])
        .transition("SUBSCRIPTION_PENDING", &["ACTIVE"])
        .transition("ACTIVE", &["REDEMPTION_PENDING", "CLOSED"])
        .transition("REDEMPTION_PENDING", &["ACTIVE"])
        .terminal("CLOSED")
        .guard(FlagGuard::new(
            "funds_received",
            "Subscription funds must be received",
        ))
        .guard(common::kyc_approved_guard())
        .guard(ThresholdGuard::new(
            "zero_holdings",
            "holdings",
            Comparison::Equal,
            Decimal::ZERO,
            "Investor must hold no units",
        ))
        .guarded("SUBSCRIPTION_PENDING", "ACTIVE", &["funds_received", "kyc_approved"])
        .guarded("ACTIVE", "CLOSED", &["zero_holdings"])
        .build()
}

fn vocabulary() -> Result<Vocabulary, RegistryError> {
    Vocabulary::builder(NAME, "1.0.0")
        .states(&[
            "PROSPECT",
            "SUBSCRIPTION_PENDING",
            "ACTIVE",
            "REDEMPTION_PENDING",
            "CLOSED",
        ])
        .verb(
            VerbDefinition::new("subscribe.request", "subscription")
                .describe("Request a subscription into the fund")
                .arg(ArgumentSpec::required("investor", ArgType::String).length(1, 256))
                .arg(common::positive_amount("amount", true))
                .arg(common::currency("currency", true))
                .arg(ArgumentSpec::optional("trade-date", ArgType::Date))
                .transition(&["PROSPECT"], "SUBSCRIPTION_PENDING")
                .produces("subscription_id"),
        )
        .verb(
            VerbDefinition::new("subscribe.confirm-funds", "subscription")
                .describe("Confirm subscription funds were received")
                .arg(common::positive_amount("amount", false))
                .sets("funds_received", json!(true)),
        )
        .verb(
            VerbDefinition::new("subscribe.settle", "subscription")
                .describe("Settle the subscription and activate the holding")
                .arg(ArgumentSpec::optional("subscription-id", ArgType::Uuid).from_context("subscription_id"))
                .transition(&["SUBSCRIPTION_PENDING"], "ACTIVE"),
        )
        .verb(
            VerbDefinition::new("redeem.request", "redemption")
                .describe("Request a redemption by units or by percentage of holdings")
                .arg(common::positive_amount("units", false))
                .arg(common::percentage("percentage", false))
                .arg(
                    ArgumentSpec::optional("channel", ArgType::one_of(&["DIRECT", "PLATFORM"]))
                        .default_value(Value::Identifier("DIRECT".to_string())),
                )
                .exactly_one_of(&["units", "percentage"])
                .transition(&["ACTIVE"], "REDEMPTION_PENDING"),
        )
        .verb(
            VerbDefinition::new("redeem.settle", "redemption")
                .describe("Settle a pending redemption")
                .transition(&["REDEMPTION_PENDING"], "ACTIVE"),
        )
        .verb(
            VerbDefinition::new("investor.close", "lifecycle")
                .describe("Close the investor account")
                .arg(common::text("reason", false))
                .transition(&["ACTIVE"], "CLOSED"),
        )
        .build()
}
