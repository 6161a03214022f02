//! Rate table configuration
//!
//! Base rates and multipliers are data, not constants, so that a table
//! version can be loaded from file and passed to `compute`.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use settle_core::{Category, CreatorTier};
use std::collections::HashMap;
use std::path::Path;

use crate::error::CommissionError;

/// Tiered base rates, category multipliers and the hard rate ceiling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateTable {
    /// Creator share by tier
    #[serde(default = "default_base_rates")]
    pub base_rates: HashMap<CreatorTier, Decimal>,

    /// Multiplier by category name; unknown categories use 1.0
    #[serde(default = "default_category_multipliers")]
    pub category_multipliers: HashMap<String, Decimal>,

    /// Ceiling on the effective rate regardless of tier/category
    #[serde(default = "default_rate_cap")]
    pub rate_cap: Decimal,
}

fn default_base_rates() -> HashMap<CreatorTier, Decimal> {
    HashMap::from([
        (CreatorTier::Basic, Decimal::new(50, 2)),
        (CreatorTier::Verified, Decimal::new(55, 2)),
        (CreatorTier::Elite, Decimal::new(65, 2)),
        (CreatorTier::Pro, Decimal::new(73, 2)),
    ])
}

fn default_category_multipliers() -> HashMap<String, Decimal> {
    HashMap::from([
        ("healthcare".to_string(), Decimal::ONE),
        ("financial".to_string(), Decimal::ONE),
        ("general".to_string(), Decimal::ONE),
        ("premium".to_string(), Decimal::new(105, 2)),
    ])
}

fn default_rate_cap() -> Decimal {
    Decimal::new(85, 2)
}

impl Default for RateTable {
    fn default() -> Self {
        Self {
            base_rates: default_base_rates(),
            category_multipliers: default_category_multipliers(),
            rate_cap: default_rate_cap(),
        }
    }
}

impl RateTable {
    /// Load a rate table from a JSON file, then validate it
    pub fn from_file(path: &Path) -> Result<Self, CommissionError> {
        let content = std::fs::read_to_string(path)?;
        let table: RateTable = serde_json::from_str(&content)?;
        table.validate()?;
        Ok(table)
    }

    /// Reject rates and caps outside `[0, 1]` and negative multipliers
    pub fn validate(&self) -> Result<(), CommissionError> {
        for (tier, rate) in &self.base_rates {
            if *rate < Decimal::ZERO || *rate > Decimal::ONE {
                return Err(CommissionError::InvalidBaseRate {
                    tier: tier.to_string(),
                    rate: *rate,
                });
            }
        }
        for (category, multiplier) in &self.category_multipliers {
            if *multiplier < Decimal::ZERO {
                return Err(CommissionError::InvalidMultiplier {
                    category: category.clone(),
                    multiplier: *multiplier,
                });
            }
        }
        if self.rate_cap < Decimal::ZERO || self.rate_cap > Decimal::ONE {
            return Err(CommissionError::InvalidRateCap(self.rate_cap));
        }
        Ok(())
    }

    /// Base rate for a tier. A table missing the tier falls back to the
    /// built-in default so `compute` stays total.
    pub fn base_rate(&self, tier: CreatorTier) -> Decimal {
        self.base_rates
            .get(&tier)
            .copied()
            .or_else(|| default_base_rates().get(&tier).copied())
            .unwrap_or(Decimal::ZERO)
    }

    /// Multiplier for a category, 1.0 when unknown
    pub fn multiplier(&self, category: &Category) -> Decimal {
        self.category_multipliers
            .get(category.as_str())
            .copied()
            .unwrap_or(Decimal::ONE)
    }

    /// Override a tier's base rate (builder style, mainly for tests and
    /// table migrations)
    pub fn with_base_rate(mut self, tier: CreatorTier, rate: Decimal) -> Self {
        self.base_rates.insert(tier, rate);
        self
    }

    /// Override a category multiplier
    pub fn with_multiplier(mut self, category: impl Into<String>, multiplier: Decimal) -> Self {
        self.category_multipliers
            .insert(category.into().to_lowercase(), multiplier);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_table() {
        let table = RateTable::default();
        assert_eq!(table.base_rate(CreatorTier::Basic), dec!(0.50));
        assert_eq!(table.base_rate(CreatorTier::Verified), dec!(0.55));
        assert_eq!(table.base_rate(CreatorTier::Elite), dec!(0.65));
        assert_eq!(table.base_rate(CreatorTier::Pro), dec!(0.73));
        assert_eq!(table.multiplier(&Category::Premium), dec!(1.05));
        assert_eq!(table.multiplier(&Category::Healthcare), dec!(1));
        assert_eq!(table.rate_cap, dec!(0.85));
        assert!(table.validate().is_ok());
    }

    #[test]
    fn test_unknown_category_defaults_to_one() {
        let table = RateTable::default();
        let other = Category::Other("education".to_string());
        assert_eq!(table.multiplier(&other), Decimal::ONE);
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let table = RateTable::default().with_base_rate(CreatorTier::Pro, dec!(1.2));
        assert!(matches!(
            table.validate(),
            Err(CommissionError::InvalidBaseRate { .. })
        ));

        let table = RateTable::default().with_multiplier("premium", dec!(-1));
        assert!(matches!(
            table.validate(),
            Err(CommissionError::InvalidMultiplier { .. })
        ));

        let table = RateTable {
            rate_cap: dec!(1.5),
            ..RateTable::default()
        };
        assert!(matches!(
            table.validate(),
            Err(CommissionError::InvalidRateCap(_))
        ));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{ "rate_cap": "0.80" }"#;
        let table: RateTable = serde_json::from_str(json).unwrap();
        assert_eq!(table.rate_cap, dec!(0.80));
        assert_eq!(table.base_rate(CreatorTier::Pro), dec!(0.73));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rates.json");
        std::fs::write(&path, r#"{ "base_rates": { "basic": "0.40" } }"#).unwrap();

        let table = RateTable::from_file(&path).unwrap();
        assert_eq!(table.base_rate(CreatorTier::Basic), dec!(0.40));
        // Tiers missing from the file fall back to defaults
        assert_eq!(table.base_rate(CreatorTier::Elite), dec!(0.65));
    }
}
