//! Fee and rate calculation
//!
//! USD-denominated two-tier flat fee schedule plus the conversion used to
//! turn a received deposit into the amount forwarded to the user.
//!
//! All arithmetic is `Decimal` with half-up rounding at [`SCALE`] digits.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::money::{SCALE, quantize};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RateError {
    #[error("No rate for currency: {0}")]
    UnknownCurrency(String),

    #[error("Rate for {slug} must be positive, got {rate}")]
    InvalidRate { slug: String, rate: Decimal },

    #[error("Nothing left after fee: value {usd_value} USD, fee {fee} USD")]
    BelowFee { usd_value: Decimal, fee: Decimal },

    #[error("Pricing {amount} at rate {rate} is out of range")]
    Overflow { amount: Decimal, rate: Decimal },
}

/// Flat fee schedule keyed by a USD threshold
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSchedule {
    /// Fee (USD) below the threshold
    pub default_fee: Decimal,
    /// Fee (USD) at or above the threshold
    pub extended_fee: Decimal,
    /// USD value at which the extended fee kicks in
    pub extended_threshold: Decimal,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            default_fee: Decimal::new(5, 0),
            extended_fee: Decimal::new(10, 0),
            extended_threshold: Decimal::new(1000, 0),
        }
    }
}

impl FeeSchedule {
    /// Fee in USD for a USD-denominated value
    ///
    /// # Example
    /// ```
    /// use coinswap::fee::FeeSchedule;
    /// use rust_decimal::Decimal;
    ///
    /// let schedule = FeeSchedule::default();
    /// assert_eq!(schedule.fee_for(Decimal::new(999, 0)), Decimal::new(5, 0));
    /// assert_eq!(schedule.fee_for(Decimal::new(1000, 0)), Decimal::new(10, 0));
    /// ```
    #[inline]
    pub fn fee_for(&self, usd_value: Decimal) -> Decimal {
        if usd_value < self.extended_threshold {
            quantize(self.default_fee)
        } else {
            quantize(self.extended_fee)
        }
    }

    /// A deposit is worth forwarding when its USD value exceeds its own fee
    #[inline]
    pub fn covers_fee(&self, usd_value: Decimal) -> bool {
        usd_value > self.fee_for(usd_value)
    }
}

/// Live USD rates keyed by currency slug
#[derive(Debug, Clone, Default)]
pub struct RateTable {
    rates: HashMap<String, Decimal>,
}

impl RateTable {
    pub fn new<I>(rates: I) -> Self
    where
        I: IntoIterator<Item = (String, Decimal)>,
    {
        Self {
            rates: rates
                .into_iter()
                .map(|(slug, rate)| (slug.to_lowercase(), rate))
                .collect(),
        }
    }

    /// USD rate for one unit of `slug`
    pub fn rate(&self, slug: &str) -> Result<Decimal, RateError> {
        let rate = *self
            .rates
            .get(&slug.to_lowercase())
            .ok_or_else(|| RateError::UnknownCurrency(slug.to_string()))?;
        if rate <= Decimal::ZERO {
            return Err(RateError::InvalidRate {
                slug: slug.to_string(),
                rate,
            });
        }
        Ok(rate)
    }

    pub fn contains(&self, slug: &str) -> bool {
        self.rates.contains_key(&slug.to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }
}

/// Result of pricing an exchange against live rates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quote {
    pub rate_from: Decimal,
    pub rate_to: Decimal,
    pub usd_value: Decimal,
    pub fee: Decimal,
    pub outgoing_amount: Decimal,
}

/// `q(rate * amount)` without panicking on overflow
pub fn usd_at(rate: Decimal, amount: Decimal) -> Result<Decimal, RateError> {
    rate.checked_mul(amount)
        .map(quantize)
        .ok_or(RateError::Overflow { amount, rate })
}

/// USD value of `amount` units of `slug`
pub fn usd_value(rates: &RateTable, slug: &str, amount: Decimal) -> Result<Decimal, RateError> {
    usd_at(rates.rate(slug)?, amount)
}

/// Price `ingoing_amount` of `from` into `to` at live rates
pub fn quote(
    schedule: &FeeSchedule,
    rates: &RateTable,
    from: &str,
    to: &str,
    ingoing_amount: Decimal,
) -> Result<Quote, RateError> {
    quote_at(schedule, rates.rate(from)?, rates.rate(to)?, ingoing_amount)
}

/// Price `ingoing_amount` at fixed rates
///
/// `usd = q(rate_from * amount)`, `fee = schedule(usd)`,
/// `outgoing = q((usd - fee) / rate_to)`.
pub fn quote_at(
    schedule: &FeeSchedule,
    rate_from: Decimal,
    rate_to: Decimal,
    ingoing_amount: Decimal,
) -> Result<Quote, RateError> {
    let usd_value = usd_at(rate_from, ingoing_amount)?;
    let fee = schedule.fee_for(usd_value);

    if usd_value <= fee {
        return Err(RateError::BelowFee { usd_value, fee });
    }

    let net = usd_value - fee;
    let outgoing_amount = net
        .checked_div(rate_to)
        .map(quantize)
        .ok_or(RateError::Overflow {
            amount: net,
            rate: rate_to,
        })?;
    debug_assert!(outgoing_amount.scale() <= SCALE);

    Ok(Quote {
        rate_from,
        rate_to,
        usd_value,
        fee,
        outgoing_amount,
    })
}
