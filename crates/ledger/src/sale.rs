//! Sale events and immutable sale records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use settle_commission::CommissionBreakdown;
use settle_core::{Category, CreatorTier, Currency, MinorUnits};

use crate::error::{LedgerError, LedgerResult};

/// Purchase notification posted once per completed purchase.
///
/// Delivery is at-least-once; the ledger dedupes by `sale_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleEvent {
    pub sale_id: String,
    pub template_id: String,
    pub buyer_id: String,
    pub creator_id: String,
    pub gross_amount: MinorUnits,
    pub currency: Currency,
    pub creator_tier: CreatorTier,
    pub category: Category,
    /// When the purchase completed; ingestion time when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occurred_at: Option<DateTime<Utc>>,
}

impl SaleEvent {
    pub(crate) fn validate(&self) -> LedgerResult<()> {
        for (field, value) in [
            ("sale_id", &self.sale_id),
            ("template_id", &self.template_id),
            ("buyer_id", &self.buyer_id),
            ("creator_id", &self.creator_id),
        ] {
            if value.trim().is_empty() {
                return Err(LedgerError::InvalidSale(format!("{} cannot be empty", field)));
            }
        }
        if self.gross_amount.is_zero() {
            return Err(LedgerError::InvalidSale(format!(
                "sale {} has zero gross amount",
                self.sale_id
            )));
        }
        Ok(())
    }
}

/// Immutable record of one sale.
///
/// Once appended it is never mutated or removed. `sequence` is the
/// append position within the owning shard and is the cursor for
/// restartable listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleRecord {
    pub sale_id: String,
    pub sequence: u64,
    pub template_id: String,
    pub buyer_id: String,
    pub creator_id: String,
    pub gross_amount: MinorUnits,
    pub currency: Currency,
    pub creator_tier: CreatorTier,
    pub category: Category,
    pub commission: CommissionBreakdown,
    pub occurred_at: DateTime<Utc>,
    pub recorded_at: DateTime<Utc>,
}

/// Result of `record_sale`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    /// First ingestion of this sale id
    Recorded(SaleRecord),
    /// Sale id already present; the existing record, unchanged
    Duplicate(SaleRecord),
}

impl RecordOutcome {
    pub fn record(&self) -> &SaleRecord {
        match self {
            RecordOutcome::Recorded(r) | RecordOutcome::Duplicate(r) => r,
        }
    }

    pub fn into_record(self) -> SaleRecord {
        match self {
            RecordOutcome::Recorded(r) | RecordOutcome::Duplicate(r) => r,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, RecordOutcome::Duplicate(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event() -> SaleEvent {
        SaleEvent {
            sale_id: "sale-1".to_string(),
            template_id: "tpl-1".to_string(),
            buyer_id: "buyer-1".to_string(),
            creator_id: "creator-1".to_string(),
            gross_amount: MinorUnits::new(9900).unwrap(),
            currency: Currency::Usd,
            creator_tier: CreatorTier::Pro,
            category: Category::Healthcare,
            occurred_at: None,
        }
    }

    #[test]
    fn test_valid_event() {
        assert!(event().validate().is_ok());
    }

    #[test]
    fn test_empty_ids_rejected() {
        let mut e = event();
        e.creator_id = "  ".to_string();
        assert!(matches!(e.validate(), Err(LedgerError::InvalidSale(_))));
    }

    #[test]
    fn test_zero_gross_rejected() {
        let mut e = event();
        e.gross_amount = MinorUnits::ZERO;
        assert!(matches!(e.validate(), Err(LedgerError::InvalidSale(_))));
    }

    #[test]
    fn test_event_json_shape() {
        let json = r#"{
            "sale_id": "s-1", "template_id": "t-1", "buyer_id": "b-1",
            "creator_id": "c-1", "gross_amount": 9900, "currency": "usd",
            "creator_tier": "pro", "category": "healthcare"
        }"#;
        let parsed: SaleEvent = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.gross_amount.value(), 9900);
        assert_eq!(parsed.creator_tier, CreatorTier::Pro);
        assert!(parsed.occurred_at.is_none());
    }
}
