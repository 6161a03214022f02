//! Settle Payout - creator payout settlement
//!
//! Batches eligible creator earnings and settles them through an external
//! payment processor with idempotency and bounded retry.
//!
//! # Key Types
//! - `PayoutBatch`: One creator's sales paid out in one currency
//! - `PayoutStore`: SQLite batch table with exclusive sale membership
//! - `PaymentProcessor`: The external processor seam (`SandboxProcessor` for tests)
//! - `PayoutEngine`: Scheduled cycle driving batches to `paid` or `failed`
//!
//! ```text
//! SalesLedger ──► form_batches ──► formed ──► submit ──► paid ──► mark_settled
//!                                    │           │
//!                                 cancelled      ├──► failed ──► retry_failed
//!                                                └──► (ambiguous) lookup by key
//! ```

pub mod batch;
pub mod config;
pub mod engine;
pub mod error;
pub mod processor;
pub mod sandbox;
pub mod store;

pub use batch::{idempotency_key_for, BatchStatus, PayoutBatch};
pub use config::PayoutConfig;
pub use engine::{CycleReport, PayoutEngine};
pub use error::{PayoutError, PayoutResult};
pub use processor::{
    PaymentProcessor, PayoutRequest, ProcessorError, ProcessorReceipt, ProcessorStatus,
};
pub use sandbox::{SandboxOutcome, SandboxProcessor};
pub use store::{PayoutStore, StoreError};
