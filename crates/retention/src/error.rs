//! Retention errors

use chrono::{DateTime, Utc};
use settle_audit::AuditError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RetentionError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Audit error: {0}")]
    Audit(#[from] AuditError),

    #[error("Corrupt retention row {id}: {reason}")]
    Corrupt { id: String, reason: String },

    #[error("Invalid submission: {0}")]
    InvalidSubmission(String),

    #[error("Submission not found: {0}")]
    NotFound(String),

    #[error("Legal hold not found: {0}")]
    HoldNotFound(String),

    #[error("Invalid hold target: {0}")]
    InvalidHoldTarget(String),

    /// Deletion or erasure blocked by active legal holds
    #[error("Submission {submission_id} is under legal hold: {}", hold_ids.join(", "))]
    LegalHoldConflict {
        submission_id: String,
        hold_ids: Vec<String>,
    },

    #[error("Submission {0} was already deleted")]
    AlreadyExecuted(String),

    #[error("Deletion deadline for {submission_id} passed at {delete_at}")]
    DeadlinePassed {
        submission_id: String,
        delete_at: DateTime<Utc>,
    },

    #[error("Purge failed for {submission_id}: {reason}")]
    PurgeFailed { submission_id: String, reason: String },
}

pub type RetentionResult<T> = Result<T, RetentionError>;
