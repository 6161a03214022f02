//! Scheduled deletion records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::policy::{RetentionPolicy, Schedule, SubmissionKind};

/// Lifecycle of a scheduled deletion
///
/// ```text
/// pending ──► notified ──► executed
///    │            │
///    └────────────┴──► held ──► executed (after release)
///    └──► cancelled (policy changed before the deadline)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletionState {
    Pending,
    Notified,
    Executed,
    Held,
    Cancelled,
}

impl DeletionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeletionState::Pending => "pending",
            DeletionState::Notified => "notified",
            DeletionState::Executed => "executed",
            DeletionState::Held => "held",
            DeletionState::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(DeletionState::Pending),
            "notified" => Some(DeletionState::Notified),
            "executed" => Some(DeletionState::Executed),
            "held" => Some(DeletionState::Held),
            "cancelled" => Some(DeletionState::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DeletionState::Executed | DeletionState::Cancelled)
    }
}

impl std::fmt::Display for DeletionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derived deletion schedule, one per submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledDeletion {
    pub submission_id: String,
    pub form_id: String,
    pub subject_user_id: Option<String>,
    pub kind: SubmissionKind,
    pub stored_at: DateTime<Utc>,
    pub event_date: Option<DateTime<Utc>>,
    /// Policy in force (the conservative default when none was supplied)
    pub policy: RetentionPolicy,
    /// `None` means never auto-delete
    pub delete_at: Option<DateTime<Utc>>,
    pub notify_at: Option<DateTime<Utc>>,
    pub notified_at: Option<DateTime<Utc>>,
    /// Set once when the notifier fails; the notice is not retried
    pub notification_failed_at: Option<DateTime<Utc>>,
    pub state: DeletionState,
    pub executed_at: Option<DateTime<Utc>>,
    pub cancel_reason: Option<String>,
    /// Arrived without a policy; an operator should confirm the default
    pub needs_review: bool,
}

impl ScheduledDeletion {
    pub fn apply_schedule(&mut self, schedule: Schedule) {
        self.delete_at = schedule.delete_at;
        self.notify_at = schedule.notify_at;
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.delete_at.is_some_and(|at| at <= now)
    }

    pub fn notification_due(&self, now: DateTime<Utc>) -> bool {
        self.state == DeletionState::Pending
            && self.notified_at.is_none()
            && self.notification_failed_at.is_none()
            && self.notify_at.is_some_and(|at| at <= now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_strings() {
        for state in [
            DeletionState::Pending,
            DeletionState::Notified,
            DeletionState::Executed,
            DeletionState::Held,
            DeletionState::Cancelled,
        ] {
            assert_eq!(DeletionState::from_str(state.as_str()), Some(state));
        }
        assert!(DeletionState::Executed.is_terminal());
        assert!(!DeletionState::Held.is_terminal());
    }
}
