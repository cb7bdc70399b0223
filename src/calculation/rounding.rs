//! Monetary rounding.

use rust_decimal::{Decimal, RoundingStrategy};

/// Rounds an amount half-up to the cent and fixes its scale at two places.
///
/// # Example
///
/// ```
/// use payrun_engine::calculation::round_cents;
/// use rust_decimal::Decimal;
/// use std::str::FromStr;
///
/// assert_eq!(round_cents(Decimal::from_str("10.005").unwrap()).to_string(), "10.01");
/// assert_eq!(round_cents(Decimal::from_str("-10.005").unwrap()).to_string(), "-10.01");
/// assert_eq!(round_cents(Decimal::from(7)).to_string(), "7.00");
/// ```
pub fn round_cents(amount: Decimal) -> Decimal {
    let mut rounded = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(2);
    rounded
}
