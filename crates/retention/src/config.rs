//! Retention configuration
//!
//! Compliance defaults applied when a policy omits `retention_days`.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::RetentionResult;
use crate::policy::SubmissionKind;

/// Configuration for the retention scheduler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Fallback for submissions of kind `other`
    #[serde(default = "default_retention_days")]
    pub default_retention_days: i64,

    #[serde(default = "default_contact_days")]
    pub contact_days: i64,

    #[serde(default = "default_lead_days")]
    pub lead_days: i64,

    /// Days kept after the event date for event registrations
    #[serde(default = "default_event_grace_days")]
    pub event_grace_days: i64,

    #[serde(default = "default_job_application_days")]
    pub job_application_days: i64,

    #[serde(default = "default_failed_submission_days")]
    pub failed_submission_days: i64,

    /// How long before `delete_at` the owner is notified
    #[serde(default = "default_notice_lead_days")]
    pub notice_lead_days: i64,

    /// Auto-delete period for submissions that arrive with no policy
    #[serde(default = "default_policy_missing_days")]
    pub policy_missing_days: i64,
}

fn default_retention_days() -> i64 {
    90
}

fn default_contact_days() -> i64 {
    30
}

fn default_lead_days() -> i64 {
    365
}

fn default_event_grace_days() -> i64 {
    30
}

fn default_job_application_days() -> i64 {
    180
}

fn default_failed_submission_days() -> i64 {
    7
}

fn default_notice_lead_days() -> i64 {
    7
}

fn default_policy_missing_days() -> i64 {
    30
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            default_retention_days: default_retention_days(),
            contact_days: default_contact_days(),
            lead_days: default_lead_days(),
            event_grace_days: default_event_grace_days(),
            job_application_days: default_job_application_days(),
            failed_submission_days: default_failed_submission_days(),
            notice_lead_days: default_notice_lead_days(),
            policy_missing_days: default_policy_missing_days(),
        }
    }
}

impl RetentionConfig {
    /// Load configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> RetentionResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: RetentionConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Category default retention for a kind of submission
    pub fn days_for(&self, kind: SubmissionKind) -> i64 {
        match kind {
            SubmissionKind::Contact => self.contact_days,
            SubmissionKind::Lead => self.lead_days,
            SubmissionKind::Event => self.event_grace_days,
            SubmissionKind::JobApplication => self.job_application_days,
            SubmissionKind::FailedSubmission => self.failed_submission_days,
            SubmissionKind::Other => self.default_retention_days,
        }
    }

    /// `None` when the configured lead is out of range
    pub fn notice_lead(&self) -> Option<Duration> {
        Duration::try_days(self.notice_lead_days)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_compliance_defaults() {
        let config = RetentionConfig::default();
        assert_eq!(config.days_for(SubmissionKind::Contact), 30);
        assert_eq!(config.days_for(SubmissionKind::Lead), 365);
        assert_eq!(config.days_for(SubmissionKind::JobApplication), 180);
        assert_eq!(config.days_for(SubmissionKind::FailedSubmission), 7);
        assert_eq!(config.days_for(SubmissionKind::Other), 90);
        assert_eq!(config.notice_lead(), Some(Duration::days(7)));
    }

    #[test]
    fn test_from_file_fills_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"{{ "contact_days": 14 }}"#).unwrap();

        let config = RetentionConfig::from_file(file.path()).unwrap();
        assert_eq!(config.contact_days, 14);
        assert_eq!(config.lead_days, 365);
    }
}
