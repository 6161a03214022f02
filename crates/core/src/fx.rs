//! Exchange-rate lookup
//!
//! Rate sourcing is outside Settle; callers inject an `ExchangeRates`
//! implementation. `FixedRates` covers configuration-driven and test use.

use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::HashMap;
use thiserror::Error;

use crate::{Currency, MinorUnits};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FxError {
    #[error("No exchange rate for {from}/{to}")]
    RateNotFound { from: String, to: String },

    #[error("Conversion overflow")]
    Overflow,
}

/// Injected FX lookup
pub trait ExchangeRates: Send + Sync {
    /// Major units of `to` per one major unit of `from` (e.g. USD per EUR)
    fn rate(&self, from: &Currency, to: &Currency) -> Result<Decimal, FxError>;

    /// Convert an amount, rounding half-to-even into whole minor units.
    ///
    /// The rate is rescaled by the difference in minor-unit exponents, so
    /// 1000 JPY minor units at 0.0067 USD/JPY give 670 cents.
    fn convert(
        &self,
        amount: MinorUnits,
        from: &Currency,
        to: &Currency,
    ) -> Result<MinorUnits, FxError> {
        if from == to {
            return Ok(amount);
        }
        let rate = self.rate(from, to)?;
        let (from_exp, to_exp) = (from.minor_exponent(), to.minor_exponent());
        let scaled = if to_exp >= from_exp {
            amount
                .to_decimal()
                .checked_mul(rate)
                .and_then(|v| v.checked_mul(Decimal::from(10i64.pow(to_exp - from_exp))))
        } else {
            amount
                .to_decimal()
                .checked_mul(rate)
                .and_then(|v| v.checked_div(Decimal::from(10i64.pow(from_exp - to_exp))))
        };
        let converted = scaled
            .ok_or(FxError::Overflow)?
            .round_dp_with_strategy(0, RoundingStrategy::MidpointNearestEven);
        MinorUnits::from_decimal(converted).map_err(|_| FxError::Overflow)
    }
}

/// Static rate table
#[derive(Debug, Clone, Default)]
pub struct FixedRates {
    rates: HashMap<(Currency, Currency), Decimal>,
}

impl FixedRates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rate; the inverse is derived automatically when non-zero
    pub fn with_rate(mut self, from: Currency, to: Currency, rate: Decimal) -> Self {
        if !rate.is_zero() {
            self.rates
                .insert((to.clone(), from.clone()), Decimal::ONE / rate);
        }
        self.rates.insert((from, to), rate);
        self
    }
}

impl ExchangeRates for FixedRates {
    fn rate(&self, from: &Currency, to: &Currency) -> Result<Decimal, FxError> {
        if from == to {
            return Ok(Decimal::ONE);
        }
        self.rates
            .get(&(from.clone(), to.clone()))
            .copied()
            .ok_or_else(|| FxError::RateNotFound {
                from: from.to_string(),
                to: to.to_string(),
            })
    }
}
