//! Commission errors

use rust_decimal::Decimal;
use thiserror::Error;

/// Errors raised while loading or validating a rate table.
///
/// `compute` itself has no error path.
#[derive(Debug, Error)]
pub enum CommissionError {
    #[error("Base rate for {tier} must be within [0, 1], got {rate}")]
    InvalidBaseRate { tier: String, rate: Decimal },

    #[error("Multiplier for {category} must be non-negative, got {multiplier}")]
    InvalidMultiplier { category: String, multiplier: Decimal },

    #[error("Rate cap must be within [0, 1], got {0}")]
    InvalidRateCap(Decimal),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
