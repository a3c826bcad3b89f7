//! Monetary helpers.
//!
//! Amounts are `Decimal` in memory and integer cents at rest. Every derived
//! amount (fees, refund reversals) is rounded to the cent, half away from
//! zero, before anything else is computed from it.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use std::str::FromStr;

/// Round to two decimal places, half away from zero.
pub fn round_cents(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// `percent` of `amount`, rounded to the cent.
pub fn percent_of(amount: Decimal, percent: Decimal) -> Decimal {
    round_cents(amount * percent / Decimal::ONE_HUNDRED)
}

/// Convert to integer cents. `None` if the value does not fit in an `i64`.
pub fn to_cents(value: Decimal) -> Option<i64> {
    (round_cents(value) * Decimal::ONE_HUNDRED).to_i64()
}

pub fn from_cents(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}

/// Percent expressed in basis points (1.99% -> 199). `None` if the rate
/// has a fraction of a basis point, since storing it would change it.
pub fn to_basis_points(percent: Decimal) -> Option<i32> {
    let bps = percent * Decimal::ONE_HUNDRED;
    if !bps.fract().is_zero() {
        return None;
    }
    bps.to_i32()
}

pub fn from_basis_points(bps: i32) -> Decimal {
    Decimal::new(i64::from(bps), 2)
}

/// Parse a JSON amount in major units (`100.5`, `"100.50"`).
///
/// Numbers go through their textual form so `0.1` stays exactly `0.1`.
pub fn parse_major_units(value: &serde_json::Value) -> Option<Decimal> {
    match value {
        serde_json::Value::Number(n) => Decimal::from_str(&n.to_string())
            .or_else(|_| Decimal::from_scientific(&n.to_string()))
            .ok(),
        serde_json::Value::String(s) => Decimal::from_str(s.trim()).ok(),
        _ => None,
    }
}

/// Parse a JSON amount in minor units (`10050` -> `100.50`).
pub fn parse_minor_units(value: &serde_json::Value) -> Option<Decimal> {
    match value {
        serde_json::Value::Number(n) => n.as_i64().map(from_cents),
        serde_json::Value::String(s) => s.trim().parse::<i64>().ok().map(from_cents),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_round_half_away_from_zero() {
        assert_eq!(round_cents(dec("1.005")), dec("1.01"));
        assert_eq!(round_cents(dec("1.004")), dec("1.00"));
        assert_eq!(round_cents(dec("-1.005")), dec("-1.01"));
    }

    #[test]
    fn test_percent_of() {
        assert_eq!(percent_of(dec("100.00"), dec("1.99")), dec("1.99"));
        assert_eq!(percent_of(dec("33.33"), dec("1.49")), dec("0.50"));
        assert_eq!(percent_of(dec("10.05"), dec("0.69")), dec("0.07"));
    }

    #[test]
    fn test_cents_conversion() {
        assert_eq!(to_cents(dec("98.01")), Some(9801));
        assert_eq!(to_cents(dec("-12.345")), Some(-1235));
        assert_eq!(from_cents(9801), dec("98.01"));
        assert_eq!(to_basis_points(dec("1.99")), Some(199));
        assert_eq!(from_basis_points(69), dec("0.69"));
        assert_eq!(to_basis_points(dec("2.345")), None);
        assert_eq!(to_basis_points(dec("2.3400")), Some(234));
    }

    #[test]
    fn test_parse_amounts() {
        assert_eq!(parse_major_units(&json!(100.5)), Some(dec("100.5")));
        assert_eq!(parse_major_units(&json!("49.90")), Some(dec("49.90")));
        assert_eq!(parse_major_units(&json!(null)), None);
        assert_eq!(parse_minor_units(&json!(10050)), Some(dec("100.50")));
        assert_eq!(parse_minor_units(&json!("abc")), None);
    }
}
