//! Events consumed from collaborators and their results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::policy::{RetentionPolicy, SubmissionKind};

/// Posted once per accepted form submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionStored {
    pub submission_id: String,
    pub form_id: String,
    /// Absent policies fall back to the conservative default
    #[serde(default)]
    pub retention_policy: Option<RetentionPolicy>,
    pub stored_at: DateTime<Utc>,
    #[serde(default)]
    pub kind: SubmissionKind,
    #[serde(default)]
    pub event_date: Option<DateTime<Utc>>,
    /// Data subject, used to resolve erasure requests
    #[serde(default)]
    pub subject_user_id: Option<String>,
}

/// Right-to-erasure request from the user-rights workflow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErasureRequest {
    pub user_id: String,
    /// Explicit targets; every submission of the user when absent
    #[serde(default)]
    pub submission_ids: Option<Vec<String>>,
}

/// Answer to an erasure request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErasureOutcome {
    pub accepted: bool,
    pub erased: Vec<String>,
    pub blocked_by_hold_ids: Vec<String>,
}

/// What one retention sweep did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub notified: Vec<String>,
    pub notification_failed: Vec<String>,
    pub executed: Vec<String>,
    pub held: Vec<String>,
    pub purge_failed: Vec<String>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.notified.is_empty()
            && self.notification_failed.is_empty()
            && self.executed.is_empty()
            && self.held.is_empty()
            && self.purge_failed.is_empty()
    }
}
