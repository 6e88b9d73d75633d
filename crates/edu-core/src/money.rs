//! # Money and Points Arithmetic
//!
//! Currency amounts and engagement points are `Decimal`. Both are reported
//! to two decimal places, rounded half away from zero. Intermediate values
//! (prorated contributions, the point value exchange rate) keep full
//! precision; only totals are rounded, exactly once.

use rust_decimal::prelude::*;

use crate::error::CoreError;

/// Decimal places carried by currency amounts and point totals.
pub const MONEY_SCALE: u32 = 2;

/// Round a currency amount to the cent.
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Round a point total to two decimal places.
pub fn round_points(points: Decimal) -> Decimal {
    points.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Parse a user-supplied currency amount.
///
/// Accepts plain decimal notation (`"600"`, `"600.5"`, `"600.50"`). Rejects
/// negatives, zero, and anything finer than a cent: a request is never
/// silently rounded.
pub fn parse_amount(s: &str) -> Result<Decimal, CoreError> {
    let reject = |reason: &str| CoreError::InvalidAmount {
        amount: s.to_string(),
        reason: reason.to_string(),
    };
    let value = Decimal::from_str(s.trim()).map_err(|_| reject("not a decimal number"))?;
    check_payable(value).map_err(|reason| reject(&reason))
}

/// Validate an amount already in `Decimal` form; see [`parse_amount`].
pub fn check_payable(value: Decimal) -> Result<Decimal, String> {
    if value <= Decimal::ZERO {
        return Err("amount must be positive".to_string());
    }
    let normalized = value.normalize();
    if normalized.scale() > MONEY_SCALE {
        return Err(format!("amount has more than {MONEY_SCALE} decimal places"));
    }
    Ok(normalized)
}
