//! Currency - Type-safe currency codes
//!
//! Marketplace sales settle in fiat. Common codes are enum variants and
//! anything else falls back to `Other`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur when parsing currencies
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CurrencyError {
    #[error("Empty currency code")]
    EmptyCode,

    #[error("Currency code must be 3 letters: {0}")]
    InvalidLength(String),

    #[error("Invalid currency code format: {0}")]
    InvalidFormat(String),
}

/// ISO 4217 style currency codes
///
/// # Examples
/// ```
/// use settle_core::Currency;
///
/// let usd: Currency = "usd".parse().unwrap();
/// assert_eq!(usd, Currency::Usd);
/// assert_eq!(Currency::Eur.to_string(), "EUR");
///
/// let other: Currency = "CHF".parse().unwrap();
/// assert!(matches!(other, Currency::Other(_)));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Currency {
    /// US Dollar
    Usd,
    /// Euro
    Eur,
    /// British Pound
    Gbp,
    /// Canadian Dollar
    Cad,
    /// Australian Dollar
    Aud,
    /// Japanese Yen
    Jpy,
    /// Any other ISO code
    Other(String),
}

impl Currency {
    /// Returns the currency code as a string slice
    pub fn code(&self) -> &str {
        match self {
            Currency::Usd => "USD",
            Currency::Eur => "EUR",
            Currency::Gbp => "GBP",
            Currency::Cad => "CAD",
            Currency::Aud => "AUD",
            Currency::Jpy => "JPY",
            Currency::Other(s) => s.as_str(),
        }
    }

    /// Decimal places of the minor unit (cents = 2, yen = 0).
    ///
    /// Codes without a known exponent are treated as two-decimal.
    pub fn minor_exponent(&self) -> u32 {
        match self {
            Currency::Jpy => 0,
            _ => 2,
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl FromStr for Currency {
    type Err = CurrencyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_uppercase();

        if s.is_empty() {
            return Err(CurrencyError::EmptyCode);
        }

        if s.len() != 3 {
            return Err(CurrencyError::InvalidLength(s));
        }

        if !s.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(CurrencyError::InvalidFormat(s));
        }

        Ok(match s.as_str() {
            "USD" => Currency::Usd,
            "EUR" => Currency::Eur,
            "GBP" => Currency::Gbp,
            "CAD" => Currency::Cad,
            "AUD" => Currency::Aud,
            "JPY" => Currency::Jpy,
            _ => Currency::Other(s),
        })
    }
}

impl TryFrom<String> for Currency {
    type Error = CurrencyError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Currency> for String {
    fn from(c: Currency) -> Self {
        c.code().to_string()
    }
}
