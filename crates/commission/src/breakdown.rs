//! Commission breakdown value object

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use settle_core::MinorUnits;

/// Revenue split for one sale.
///
/// # Invariants
/// - `creator_earnings + platform_fee == gross`
/// - `net_to_creator == max(creator_earnings - processor_fee, 0)`
/// - `0 <= effective_rate <= rate_cap`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionBreakdown {
    pub creator_earnings: MinorUnits,
    pub platform_fee: MinorUnits,
    pub processor_fee: MinorUnits,
    pub net_to_creator: MinorUnits,
    pub effective_rate: Decimal,
    /// Set when the processor fee exceeded creator earnings and the net
    /// was floored at zero
    #[serde(default)]
    pub processor_fee_floored: bool,
}

impl CommissionBreakdown {
    /// Gross amount reconstructed from the split
    pub fn gross(&self) -> MinorUnits {
        MinorUnits::new(self.creator_earnings.value() + self.platform_fee.value())
            .unwrap_or(MinorUnits::ZERO)
    }
}
