//! Commission calculator

use rust_decimal::{Decimal, RoundingStrategy};
use settle_core::{Category, CreatorTier, MinorUnits};
use tracing::warn;

use crate::breakdown::CommissionBreakdown;
use crate::rates::RateTable;

/// Split a sale between creator and platform.
///
/// - `effective_rate = min(base_rate(tier) * multiplier(category), rate_cap)`
/// - `creator_earnings = round_half_even(gross * effective_rate)`
/// - `platform_fee = gross - creator_earnings` (never rounded on its own)
/// - `net_to_creator = creator_earnings - processor_fee`, floored at zero
pub fn compute(
    gross: MinorUnits,
    tier: CreatorTier,
    category: &Category,
    processor_fee: MinorUnits,
    table: &RateTable,
) -> CommissionBreakdown {
    let effective_rate = effective_rate(tier, category, table);

    let earnings = (gross.to_decimal() * effective_rate)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointNearestEven);
    // effective_rate <= 1, so earnings fits in [0, gross]
    let creator_earnings = MinorUnits::from_decimal(earnings).unwrap_or(MinorUnits::ZERO);
    let platform_fee = gross.saturating_sub(creator_earnings);

    let (net_to_creator, processor_fee_floored) = match creator_earnings.checked_sub(processor_fee)
    {
        Some(net) => (net, false),
        None => {
            warn!(
                gross = %gross,
                creator_earnings = %creator_earnings,
                processor_fee = %processor_fee,
                "Processor fee exceeds creator earnings; net floored at zero"
            );
            (MinorUnits::ZERO, true)
        }
    };

    CommissionBreakdown {
        creator_earnings,
        platform_fee,
        processor_fee,
        net_to_creator,
        effective_rate,
        processor_fee_floored,
    }
}

fn effective_rate(tier: CreatorTier, category: &Category, table: &RateTable) -> Decimal {
    let raw = table.base_rate(tier) * table.multiplier(category);
    raw.min(table.rate_cap).max(Decimal::ZERO).normalize()
}

/// Typical processor quote: `gross * percent + fixed`, rounded half-even.
pub fn quote_processor_fee(gross: MinorUnits, percent: Decimal, fixed: MinorUnits) -> MinorUnits {
    let variable = (gross.to_decimal() * percent)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointNearestEven);
    let variable = MinorUnits::from_decimal(variable.max(Decimal::ZERO)).unwrap_or(MinorUnits::ZERO);
    variable.checked_add(fixed).unwrap_or(variable)
}
