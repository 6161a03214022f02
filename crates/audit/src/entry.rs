//! Audit entries
//!
//! These form the compliance truth: what was deleted, held, erased or paid,
//! and when.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// What kind of subject an entry is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AuditSubject {
    /// Scheduled or executed deletion of a submission
    Deletion,
    /// Legal hold applied or released
    Hold,
    /// User-initiated right-to-erasure request
    ErasureRequest,
    /// Payout batch transition
    Payout,
    /// Retention policy decisions (defaults applied, cancellations)
    RetentionPolicy,
}

/// Outcome recorded for the subject
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AuditOutcome {
    // === Retention ===
    Scheduled,
    NeverExpires,
    Notified,
    NotificationFailed,
    Executed,
    Held,
    Cancelled,
    Rescheduled,
    PolicyMissing,
    PurgeFailed,

    // === Holds ===
    Applied,
    AlreadyApplied,
    Released,

    // === Erasure ===
    Accepted,
    BlockedByHold,

    // === Payouts ===
    Formed,
    Submitted,
    Paid,
    Failed,
    Ambiguous,
    NeedsReconciliation,
}

/// Entry as supplied by a component, before sequencing and hashing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAuditEntry {
    pub subject_type: AuditSubject,
    pub subject_id: String,
    pub outcome: AuditOutcome,
    pub detail: String,
    pub timestamp: DateTime<Utc>,
}

impl NewAuditEntry {
    /// Entry stamped with the current time
    pub fn new(
        subject_type: AuditSubject,
        subject_id: impl Into<String>,
        outcome: AuditOutcome,
        detail: impl Into<String>,
    ) -> Self {
        Self::at(subject_type, subject_id, outcome, detail, Utc::now())
    }

    /// Entry stamped with an explicit time (scheduler ticks pass their own clock)
    pub fn at(
        subject_type: AuditSubject,
        subject_id: impl Into<String>,
        outcome: AuditOutcome,
        detail: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            subject_type,
            subject_id: subject_id.into(),
            outcome,
            detail: detail.into(),
            timestamp,
        }
    }
}

/// An appended, immutable audit entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub entry_id: String,
    pub sequence: u64,
    pub subject_type: AuditSubject,
    pub subject_id: String,
    pub outcome: AuditOutcome,
    pub timestamp: DateTime<Utc>,
    pub detail: String,
    pub prev_hash: String,
    pub hash: String,
}

/// Entry id derived from the sequence number
pub(crate) fn entry_id_for(sequence: u64) -> String {
    format!("AUD-{:010}", sequence)
}
