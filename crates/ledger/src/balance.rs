//! Creator balance aggregated across shards

use serde::{Deserialize, Serialize};
use settle_core::{Currency, ExchangeRates, MinorUnits};
use std::collections::BTreeMap;
use tracing::warn;

use crate::partition::PartitionTotals;

/// Best-effort creator balance.
///
/// `partial` is set when at least one shard did not answer in time (or a
/// currency could not be converted); the totals then cover only what was
/// reachable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatorBalance {
    pub creator_id: String,
    pub currency: Currency,
    /// Sum of creator earnings over all recorded sales
    pub total_earned: MinorUnits,
    /// Sum of creator earnings over sales in paid batches
    pub total_paid_out: MinorUnits,
    /// `total_earned - total_paid_out`
    pub pending_balance: MinorUnits,
    pub partial: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unavailable_partitions: Vec<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unconverted_currencies: Vec<Currency>,
}

/// Fold per-shard, per-currency totals into the reporting currency
pub(crate) fn aggregate(
    creator_id: &str,
    reporting: &Currency,
    shard_totals: Vec<BTreeMap<Currency, PartitionTotals>>,
    unavailable_partitions: Vec<usize>,
    fx: &dyn ExchangeRates,
) -> CreatorBalance {
    let mut by_currency: BTreeMap<Currency, PartitionTotals> = BTreeMap::new();
    for totals in shard_totals {
        for (currency, t) in totals {
            let acc = by_currency.entry(currency).or_default();
            acc.earned = acc.earned.checked_add(t.earned).unwrap_or(acc.earned);
            acc.paid_out = acc.paid_out.checked_add(t.paid_out).unwrap_or(acc.paid_out);
        }
    }

    let mut total_earned = MinorUnits::ZERO;
    let mut total_paid_out = MinorUnits::ZERO;
    let mut unconverted_currencies = Vec::new();

    for (currency, t) in by_currency {
        let converted = fx
            .convert(t.earned, &currency, reporting)
            .and_then(|earned| Ok((earned, fx.convert(t.paid_out, &currency, reporting)?)));
        match converted {
            Ok((earned, paid_out)) => {
                total_earned = total_earned.checked_add(earned).unwrap_or(total_earned);
                total_paid_out = total_paid_out.checked_add(paid_out).unwrap_or(total_paid_out);
            }
            Err(e) => {
                warn!(creator_id = %creator_id, currency = %currency, error = %e, "Balance currency not convertible");
                unconverted_currencies.push(currency);
            }
        }
    }

    let partial = !unavailable_partitions.is_empty() || !unconverted_currencies.is_empty();
    if partial {
        warn!(
            creator_id = %creator_id,
            unavailable = ?unavailable_partitions,
            "Returning partial creator balance"
        );
    }

    CreatorBalance {
        creator_id: creator_id.to_string(),
        currency: reporting.clone(),
        total_earned,
        total_paid_out,
        pending_balance: total_earned.saturating_sub(total_paid_out),
        partial,
        unavailable_partitions,
        unconverted_currencies,
    }
}
