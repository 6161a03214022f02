//! MinorUnits - Non-negative integer wrapper for monetary amounts
//!
//! All money in Settle is held in minor currency units (cents, pence, ...).
//! Fractional arithmetic happens in `Decimal` and is rounded back into
//! `MinorUnits` at a single, explicit point.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors that can occur when working with amounts
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmountError {
    #[error("Amount cannot be negative: {0}")]
    NegativeAmount(i64),

    #[error("Amount is not a whole number of minor units: {0}")]
    Fractional(Decimal),

    #[error("Amount overflow")]
    Overflow,
}

/// A non-negative amount in minor currency units.
///
/// # Invariant
/// The inner value is always >= 0. This is enforced by the constructor.
///
/// # Example
/// ```
/// use settle_core::MinorUnits;
///
/// let amount = MinorUnits::new(9900).unwrap();
/// assert_eq!(amount.value(), 9900);
///
/// // Negative amounts are rejected
/// assert!(MinorUnits::new(-1).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct MinorUnits(i64);

impl MinorUnits {
    /// Zero amount constant
    pub const ZERO: Self = Self(0);

    /// Create a new amount, rejecting negative values.
    pub fn new(value: i64) -> Result<Self, AmountError> {
        if value < 0 {
            Err(AmountError::NegativeAmount(value))
        } else {
            Ok(Self(value))
        }
    }

    /// Convert a whole, non-negative `Decimal` into minor units.
    pub fn from_decimal(value: Decimal) -> Result<Self, AmountError> {
        if value.fract() != Decimal::ZERO {
            return Err(AmountError::Fractional(value));
        }
        let units: i64 = value.try_into().map_err(|_| AmountError::Overflow)?;
        Self::new(units)
    }

    /// Get the inner value
    #[inline]
    pub const fn value(&self) -> i64 {
        self.0
    }

    /// The amount as a `Decimal`, for rate arithmetic
    #[inline]
    pub fn to_decimal(&self) -> Decimal {
        Decimal::from(self.0)
    }

    /// Check if the amount is zero
    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Checked addition - returns None on overflow
    pub fn checked_add(&self, other: MinorUnits) -> Option<MinorUnits> {
        self.0.checked_add(other.0).map(MinorUnits)
    }

    /// Checked subtraction - returns None if the result would be negative
    pub fn checked_sub(&self, other: MinorUnits) -> Option<MinorUnits> {
        match self.0.checked_sub(other.0) {
            Some(v) if v >= 0 => Some(MinorUnits(v)),
            _ => None,
        }
    }

    /// Total of a sequence of amounts - returns None on overflow
    pub fn checked_sum<I: IntoIterator<Item = MinorUnits>>(amounts: I) -> Option<MinorUnits> {
        amounts
            .into_iter()
            .try_fold(MinorUnits::ZERO, |total, amount| total.checked_add(amount))
    }

    /// Subtraction floored at zero
    pub fn saturating_sub(&self, other: MinorUnits) -> MinorUnits {
        self.checked_sub(other).unwrap_or(MinorUnits::ZERO)
    }
}

impl fmt::Display for MinorUnits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<i64> for MinorUnits {
    type Error = AmountError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<MinorUnits> for i64 {
    fn from(amount: MinorUnits) -> Self {
        amount.0
    }
}

impl Default for MinorUnits {
    fn default() -> Self {
        Self::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_amount_positive() {
        let amount = MinorUnits::new(100).unwrap();
        assert_eq!(amount.value(), 100);
    }

    #[test]
    fn test_amount_negative_rejected() {
        let result = MinorUnits::new(-100);
        assert!(matches!(result, Err(AmountError::NegativeAmount(-100))));
    }

    #[test]
    fn test_from_decimal_requires_whole_units() {
        assert_eq!(MinorUnits::from_decimal(dec!(7227)).unwrap().value(), 7227);
        assert!(matches!(
            MinorUnits::from_decimal(dec!(72.5)),
            Err(AmountError::Fractional(_))
        ));
    }

    #[test]
    fn test_checked_sub_prevents_negative() {
        let a = MinorUnits::new(50).unwrap();
        let b = MinorUnits::new(100).unwrap();
        assert!(a.checked_sub(b).is_none());
        assert_eq!(a.saturating_sub(b), MinorUnits::ZERO);
    }

    #[test]
    fn test_checked_sum() {
        let total = MinorUnits::checked_sum([1, 2, 3].iter().map(|v| MinorUnits::new(*v).unwrap()));
        assert_eq!(total, Some(MinorUnits::new(6).unwrap()));
        assert_eq!(MinorUnits::checked_sum(std::iter::empty()), Some(MinorUnits::ZERO));
    }

    #[test]
    fn test_checked_sum_overflow() {
        let max = MinorUnits::new(i64::MAX).unwrap();
        let one = MinorUnits::new(1).unwrap();
        assert_eq!(MinorUnits::checked_sum([max, one]), None);
        assert_eq!(MinorUnits::checked_sum([max]), Some(max));
    }

    #[test]
    fn test_serde_as_integer() {
        let amount = MinorUnits::new(12345).unwrap();
        let json = serde_json::to_string(&amount).unwrap();
        assert_eq!(json, "12345");
        assert!(serde_json::from_str::<MinorUnits>("-5").is_err());
    }
}
