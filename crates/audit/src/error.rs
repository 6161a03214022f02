//! Audit log errors

use thiserror::Error;

use crate::hash::ChainError;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Audit chain broken: {0}")]
    BrokenChain(#[from] ChainError),

    #[error("Audit log lock poisoned")]
    Poisoned,
}

pub type AuditResult<T> = Result<T, AuditError>;
