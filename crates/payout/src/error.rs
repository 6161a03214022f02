//! Payout errors

use settle_audit::AuditError;
use settle_core::Currency;
use settle_ledger::LedgerError;
use thiserror::Error;

use crate::batch::BatchStatus;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum PayoutError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Audit error: {0}")]
    Audit(#[from] AuditError),

    #[error("Batch not found: {0}")]
    NotFound(String),

    #[error("Batch {batch_id} cannot move from {from} to {to}")]
    InvalidTransition {
        batch_id: String,
        from: BatchStatus,
        to: BatchStatus,
    },

    #[error("Sale {sale_id} is already a member of active batch {batch_id}")]
    DoublePayout { sale_id: String, batch_id: String },

    #[error("Net total for creator {creator_id} in {currency} exceeds the representable amount")]
    AmountOverflow { creator_id: String, currency: Currency },

    #[error("Failed batch {0} has no unclaimed sales left to retry")]
    NothingToRetry(String),
}

pub type PayoutResult<T> = Result<T, PayoutError>;
