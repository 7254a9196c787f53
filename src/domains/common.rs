//! Common domain utilities: argument specs and guards reused across domains.

use rust_decimal::Decimal;

use crate::state_machine::FlagGuard;
use crate::vocabulary::{ArgType, ArgumentSpec};

pub const CURRENCY_PATTERN: &str = "^[A-Z]{3}$";
pub const COUNTRY_PATTERN: &str = "^[A-Z]{2}$";

/// ISO 4217 style currency code
pub fn currency(name: &str, required: bool) -> ArgumentSpec {
    base(name, ArgType::String, required).pattern(CURRENCY_PATTERN, "must be 3 letters")
}

/// ISO 3166 alpha-2 country code
pub fn country(name: &str, required: bool) -> ArgumentSpec {
    base(name, ArgType::String, required).pattern(COUNTRY_PATTERN, "must be 2 letters")
}

/// Strictly positive decimal amount
pub fn positive_amount(name: &str, required: bool) -> ArgumentSpec {
    base(name, ArgType::Decimal, required).greater_than(Decimal::ZERO)
}

/// Percentage in 0..=100
pub fn percentage(name: &str, required: bool) -> ArgumentSpec {
    base(name, ArgType::Decimal, required).range(Decimal::ZERO, Decimal::ONE_HUNDRED)
}

/// Non-empty free text
pub fn text(name: &str, required: bool) -> ArgumentSpec {
    base(name, ArgType::String, required).length(1, 512)
}

fn base(name: &str, arg_type: ArgType, required: bool) -> ArgumentSpec {
    if required {
        ArgumentSpec::required(name, arg_type)
    } else {
        ArgumentSpec::optional(name, arg_type)
    }
}

/// Guard on the shared `kyc_approved` flag, used by every downstream domain
pub fn kyc_approved_guard() -> FlagGuard {
    FlagGuard::new("kyc_approved", "KYC must be approved for this entity")
}
