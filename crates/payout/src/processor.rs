//! Payment processor seam

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use settle_core::{Currency, MinorUnits};
use thiserror::Error;

/// Transfer instruction sent to the processor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutRequest {
    pub idempotency_key: String,
    pub batch_id: String,
    pub creator_id: String,
    pub amount: MinorUnits,
    pub currency: Currency,
}

/// Processor acknowledgement of a completed transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorReceipt {
    pub external_reference: String,
}

/// What the processor knows about an idempotency key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProcessorStatus {
    Paid { external_reference: String },
    Rejected { reason: String },
    /// Accepted but not yet settled on the processor side
    Pending,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProcessorError {
    /// Hard failure, e.g. invalid destination account
    #[error("Processor rejected transfer: {0}")]
    Rejected(String),

    /// Outcome unknown (timeout after the request left); reconcile by lookup
    #[error("Processor outcome ambiguous: {0}")]
    Ambiguous(String),

    /// Request was not accepted; safe to retry
    #[error("Processor unavailable: {0}")]
    Unavailable(String),
}

impl ProcessorError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ProcessorError::Unavailable(_))
    }
}

/// External payment processor
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    /// Request a transfer. Repeating a key must not create a second transfer.
    async fn submit(&self, request: &PayoutRequest) -> Result<ProcessorReceipt, ProcessorError>;

    /// Query the state of a previously submitted key
    async fn lookup(&self, idempotency_key: &str) -> Result<Option<ProcessorStatus>, ProcessorError>;

    /// Processor name (for logging)
    fn name(&self) -> &str;
}
