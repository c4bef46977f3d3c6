//! Money Module
//!
//! Fixed-point handling for every amount, fee and rate in the settlement path.
//! All conversions MUST go through this module.
//! Amounts are `rust_decimal::Decimal` at 8 fractional digits, rounded
//! half-up (midpoint away from zero). Client input is never truncated.
//!
//! ## Usage
//! ```rust
//! use coinswap::money::{parse_amount, quantize, format_amount};
//! use rust_decimal::Decimal;
//!
//! let amount = parse_amount("1.5").unwrap();
//! assert_eq!(format_amount(amount), "1.50000000");
//!
//! let q = quantize(Decimal::new(123_456_789_5, 10)); // 0.1234567895
//! assert_eq!(q, Decimal::new(12_345_679, 8));
//! ```

use rust_decimal::prelude::*;
use thiserror::Error;

/// Fractional digits kept for amounts, fees and rates
pub const SCALE: u32 = 8;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MoneyError {
    #[error("amount is empty")]
    Empty,

    #[error("amount must be greater than zero")]
    NotPositive,

    #[error("amount {0} exceeds the largest accepted amount")]
    TooLarge(Decimal),

    #[error("amount has {digits} fractional digits, at most 8 allowed")]
    TooPrecise { digits: u32 },

    #[error("malformed amount {0:?}: expected digits with an optional fractional part")]
    Malformed(String),
}

/// Round to [`SCALE`] fractional digits, half-up
#[inline]
pub fn quantize(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// 0.00000001
#[inline]
pub fn unit() -> Decimal {
    Decimal::new(1, SCALE)
}

/// Upper bound for any amount entering the system (10^15 units)
///
/// Keeps `rate * amount` well inside `Decimal`'s 96-bit mantissa.
#[inline]
pub fn max_amount() -> Decimal {
    Decimal::new(1_000_000_000_000_000, 0)
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// Parse a client amount of the form `digits[.digits]`
///
/// Signs, exponents, a bare leading or trailing dot and anything over
/// [`SCALE`] significant fractional digits are refused.
pub fn parse_amount(raw: &str) -> Result<Decimal, MoneyError> {
    let text = raw.trim();
    if text.is_empty() {
        return Err(MoneyError::Empty);
    }
    if text.starts_with(['-', '+']) {
        return Err(MoneyError::NotPositive);
    }

    let well_formed = match text.split_once('.') {
        None => is_digits(text),
        Some((whole, frac)) => is_digits(whole) && is_digits(frac),
    };
    if !well_formed {
        return Err(MoneyError::Malformed(text.to_string()));
    }

    let value = Decimal::from_str(text).map_err(|_| MoneyError::Malformed(text.to_string()))?;
    validate_amount(value)
}

/// Check an already-decoded decimal; trailing zeros do not count as precision
pub fn validate_amount(value: Decimal) -> Result<Decimal, MoneyError> {
    if value <= Decimal::ZERO {
        return Err(MoneyError::NotPositive);
    }
    if value > max_amount() {
        return Err(MoneyError::TooLarge(value));
    }
    let value = value.normalize();
    match value.scale() {
        digits if digits > SCALE => Err(MoneyError::TooPrecise { digits }),
        _ => Ok(value),
    }
}

/// Full-precision string, always [`SCALE`] fractional digits
pub fn format_amount(value: Decimal) -> String {
    format!("{:.prec$}", quantize(value), prec = SCALE as usize)
}
