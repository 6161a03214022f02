//! Payout batch data structures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use settle_core::{Currency, MinorUnits};

/// Status of a payout batch
///
/// ```text
/// formed ──► submitted ──► paid
///   │            │
///   │            └──► failed ──► (retry: new formed batch)
///   └──► cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// Sales claimed, not yet sent to the processor
    Formed,
    /// Sent to the processor, outcome not yet known
    Submitted,
    /// Processor confirmed the transfer
    Paid,
    /// Processor rejected the transfer; sales are released
    Failed,
    /// Withdrawn by an operator before submission; sales are released
    Cancelled,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Formed => "formed",
            BatchStatus::Submitted => "submitted",
            BatchStatus::Paid => "paid",
            BatchStatus::Failed => "failed",
            BatchStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "formed" => Some(BatchStatus::Formed),
            "submitted" => Some(BatchStatus::Submitted),
            "paid" => Some(BatchStatus::Paid),
            "failed" => Some(BatchStatus::Failed),
            "cancelled" => Some(BatchStatus::Cancelled),
            _ => None,
        }
    }

    /// Whether membership in a batch of this status is exclusive
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            BatchStatus::Formed | BatchStatus::Submitted | BatchStatus::Paid
        )
    }

    pub fn can_transition_to(&self, next: BatchStatus) -> bool {
        matches!(
            (self, next),
            (BatchStatus::Formed, BatchStatus::Submitted)
                | (BatchStatus::Formed, BatchStatus::Cancelled)
                | (BatchStatus::Submitted, BatchStatus::Paid)
                | (BatchStatus::Submitted, BatchStatus::Failed)
        )
    }

    pub const ALL: [BatchStatus; 5] = [
        BatchStatus::Formed,
        BatchStatus::Submitted,
        BatchStatus::Paid,
        BatchStatus::Failed,
        BatchStatus::Cancelled,
    ];
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A batch of one creator's sales paid out in one currency
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutBatch {
    pub batch_id: String,
    pub creator_id: String,
    /// Member sales, sorted
    pub sale_ids: Vec<String>,
    /// Sum of `net_to_creator` over the member sales
    pub amount: MinorUnits,
    pub currency: Currency,
    pub status: BatchStatus,
    /// Processor-assigned transfer id once paid
    pub external_reference: Option<String>,
    pub created_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub settled_at: Option<DateTime<Utc>>,
    /// Processor rejection or cancellation reason
    pub failure_reason: Option<String>,
    /// Stuck in `submitted` past the maximum wait
    pub needs_reconciliation: bool,
    /// Paid outcome has been written back to the sales ledger
    pub ledger_synced: bool,
    /// Failed batch this one retries
    pub retry_of: Option<String>,
}

impl PayoutBatch {
    /// Create a new formed batch
    pub fn new(
        creator_id: impl Into<String>,
        mut sale_ids: Vec<String>,
        amount: MinorUnits,
        currency: Currency,
        created_at: DateTime<Utc>,
    ) -> Self {
        sale_ids.sort();
        sale_ids.dedup();
        let batch_id = format!("PB-{}", uuid::Uuid::new_v4().to_string()[..8].to_uppercase());

        Self {
            batch_id,
            creator_id: creator_id.into(),
            sale_ids,
            amount,
            currency,
            status: BatchStatus::Formed,
            external_reference: None,
            created_at,
            submitted_at: None,
            settled_at: None,
            failure_reason: None,
            needs_reconciliation: false,
            ledger_synced: false,
            retry_of: None,
        }
    }

    /// Key sent with every processor call for this batch.
    ///
    /// Stable across retries of the same batch, so a resubmission after a
    /// timeout cannot produce a second transfer.
    pub fn idempotency_key(&self) -> String {
        idempotency_key_for(&self.batch_id)
    }
}

pub fn idempotency_key_for(batch_id: &str) -> String {
    format!("payout-{}", batch_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip_strings() {
        for status in BatchStatus::ALL {
            assert_eq!(BatchStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(BatchStatus::from_str("settled"), None);
    }

    #[test]
    fn test_active_statuses() {
        assert!(BatchStatus::Formed.is_active());
        assert!(BatchStatus::Submitted.is_active());
        assert!(BatchStatus::Paid.is_active());
        assert!(!BatchStatus::Failed.is_active());
        assert!(!BatchStatus::Cancelled.is_active());
    }

    #[test]
    fn test_transitions() {
        assert!(BatchStatus::Formed.can_transition_to(BatchStatus::Submitted));
        assert!(BatchStatus::Formed.can_transition_to(BatchStatus::Cancelled));
        assert!(BatchStatus::Submitted.can_transition_to(BatchStatus::Paid));
        assert!(BatchStatus::Submitted.can_transition_to(BatchStatus::Failed));
        assert!(!BatchStatus::Submitted.can_transition_to(BatchStatus::Cancelled));
        assert!(!BatchStatus::Paid.can_transition_to(BatchStatus::Failed));
        assert!(!BatchStatus::Failed.can_transition_to(BatchStatus::Formed));
    }

    #[test]
    fn test_new_batch() {
        let batch = PayoutBatch::new(
            "c-1",
            vec!["s-2".into(), "s-1".into(), "s-2".into()],
            MinorUnits::new(6000).unwrap(),
            Currency::Usd,
            Utc::now(),
        );
        assert!(batch.batch_id.starts_with("PB-"));
        assert_eq!(batch.sale_ids, vec!["s-1".to_string(), "s-2".to_string()]);
        assert_eq!(batch.status, BatchStatus::Formed);
        assert_eq!(batch.idempotency_key(), format!("payout-{}", batch.batch_id));
    }
}
