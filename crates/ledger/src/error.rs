//! Ledger errors

use thiserror::Error;

/// Errors that can occur in ledger operations
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Invalid sale: {0}")]
    InvalidSale(String),

    #[error("Partition {shard} unavailable")]
    PartitionUnavailable { shard: usize },

    #[error("Sale {sale_id} already settled by batch {batch_id}")]
    AlreadySettled { sale_id: String, batch_id: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type LedgerResult<T> = Result<T, LedgerError>;
