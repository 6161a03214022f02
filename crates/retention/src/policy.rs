//! Retention policies and deletion-date computation

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::config::RetentionConfig;
use crate::error::{RetentionError, RetentionResult};

/// Legal basis the form owner declares for collecting the data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LegalBasis {
    Consent,
    Contract,
    LegalObligation,
    VitalInterests,
    PublicTask,
    LegitimateInterests,
}

/// Industry of the form owner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[serde(rename_all = "snake_case")]
pub enum Industry {
    Healthcare,
    Financial,
    Education,
    General,
}

impl Industry {
    /// Regulated records are never auto-deleted
    pub fn is_regulated(&self) -> bool {
        matches!(self, Industry::Healthcare | Industry::Financial)
    }
}

/// What the submitted form collects; selects the default retention
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionKind {
    Contact,
    Lead,
    Event,
    JobApplication,
    FailedSubmission,
    #[default]
    Other,
}

/// Retention policy supplied by the form owner at submission time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub legal_basis: LegalBasis,
    /// Days to keep the record; the kind's compliance default when absent
    #[serde(default)]
    pub retention_days: Option<i64>,
    pub auto_delete: bool,
    pub industry: Industry,
    #[serde(default)]
    pub notify_before_delete: bool,
}

impl RetentionPolicy {
    /// Conservative stand-in for a submission that arrived without a policy
    pub fn conservative_default(config: &RetentionConfig) -> Self {
        Self {
            legal_basis: LegalBasis::LegitimateInterests,
            retention_days: Some(config.policy_missing_days),
            auto_delete: true,
            industry: Industry::General,
            notify_before_delete: false,
        }
    }
}

/// Deletion and notification times derived from a policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    /// `None` means the record never auto-deletes
    pub delete_at: Option<DateTime<Utc>>,
    pub notify_at: Option<DateTime<Utc>>,
}

impl Schedule {
    pub const NEVER: Schedule = Schedule {
        delete_at: None,
        notify_at: None,
    };
}

/// Compute when a submission is deleted and when its owner is warned.
///
/// Regulated industries and `auto_delete = false` never expire. Otherwise
/// the record lives `retention_days` past `stored_at`, or the kind's
/// default; events count from the event date when one is known. A
/// retention reaching past the last representable instant also never
/// expires. Negative retention is rejected.
pub fn compute_schedule(
    policy: &RetentionPolicy,
    kind: SubmissionKind,
    stored_at: DateTime<Utc>,
    event_date: Option<DateTime<Utc>>,
    config: &RetentionConfig,
) -> RetentionResult<Schedule> {
    if let Some(days) = policy.retention_days.filter(|d| *d < 0) {
        return Err(RetentionError::InvalidSubmission(format!(
            "retention_days cannot be negative: {}",
            days
        )));
    }
    if !policy.auto_delete || policy.industry.is_regulated() {
        return Ok(Schedule::NEVER);
    }

    let (from, days) = match (policy.retention_days, kind) {
        (Some(days), _) => (stored_at, days),
        (None, SubmissionKind::Event) => (event_date.unwrap_or(stored_at), config.event_grace_days),
        (None, kind) => (stored_at, config.days_for(kind)),
    };
    let Some(delete_at) = Duration::try_days(days).and_then(|d| from.checked_add_signed(d)) else {
        return Ok(Schedule::NEVER);
    };

    let notify_at = if policy.notify_before_delete {
        config
            .notice_lead()
            .and_then(|lead| delete_at.checked_sub_signed(lead))
    } else {
        None
    };

    Ok(Schedule {
        delete_at: Some(delete_at),
        notify_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(industry: Industry, auto_delete: bool) -> RetentionPolicy {
        RetentionPolicy {
            legal_basis: LegalBasis::Consent,
            retention_days: None,
            auto_delete,
            industry,
            notify_before_delete: true,
        }
    }

    #[test]
    fn test_contact_form_default() {
        let config = RetentionConfig::default();
        let t = Utc::now();
        let schedule = compute_schedule(
            &policy(Industry::General, true),
            SubmissionKind::Contact,
            t,
            None,
            &config,
        ).unwrap();
        assert_eq!(schedule.delete_at, Some(t + Duration::days(30)));
        assert_eq!(schedule.notify_at, Some(t + Duration::days(23)));
    }

    #[test]
    fn test_regulated_industries_never_expire() {
        let config = RetentionConfig::default();
        for industry in [Industry::Healthcare, Industry::Financial] {
            for auto_delete in [true, false] {
                let mut p = policy(industry, auto_delete);
                p.retention_days = Some(1);
                let schedule =
                    compute_schedule(&p, SubmissionKind::Contact, Utc::now(), None, &config).unwrap();
                assert_eq!(schedule.delete_at, None);
                assert_eq!(schedule.notify_at, None);
            }
        }
    }

    #[test]
    fn test_auto_delete_off_never_expires() {
        let schedule = compute_schedule(
            &policy(Industry::General, false),
            SubmissionKind::Lead,
            Utc::now(),
            None,
            &RetentionConfig::default(),
        ).unwrap();
        assert_eq!(schedule.delete_at, None);
    }

    #[test]
    fn test_explicit_days_override_kind() {
        let t = Utc::now();
        let mut p = policy(Industry::General, true);
        p.retention_days = Some(10);
        p.notify_before_delete = false;
        let schedule =
            compute_schedule(&p, SubmissionKind::Lead, t, None, &RetentionConfig::default()).unwrap();
        assert_eq!(schedule.delete_at, Some(t + Duration::days(10)));
        assert_eq!(schedule.notify_at, None);
    }

    #[test]
    fn test_event_counts_from_event_date() {
        let config = RetentionConfig::default();
        let stored = Utc::now();
        let event = stored + Duration::days(60);
        let p = policy(Industry::Education, true);

        let with_date = compute_schedule(&p, SubmissionKind::Event, stored, Some(event), &config).unwrap();
        assert_eq!(with_date.delete_at, Some(event + Duration::days(30)));

        let without = compute_schedule(&p, SubmissionKind::Event, stored, None, &config).unwrap();
        assert_eq!(without.delete_at, Some(stored + Duration::days(30)));
    }

    #[test]
    fn test_kind_defaults() {
        let config = RetentionConfig::default();
        let t = Utc::now();
        let p = policy(Industry::General, true);
        for (kind, days) in [
            (SubmissionKind::Lead, 365),
            (SubmissionKind::JobApplication, 180),
            (SubmissionKind::FailedSubmission, 7),
            (SubmissionKind::Other, 90),
        ] {
            let schedule = compute_schedule(&p, kind, t, None, &config).unwrap();
            assert_eq!(schedule.delete_at, Some(t + Duration::days(days)), "{}", kind);
        }
    }

    #[test]
    fn test_policy_json() {
        let json = r#"{"legal_basis":"consent","auto_delete":true,"industry":"general"}"#;
        let p: RetentionPolicy = serde_json::from_str(json).unwrap();
        assert_eq!(p.retention_days, None);
        assert!(!p.notify_before_delete);
        assert_eq!("job_application".parse::<SubmissionKind>().unwrap(), SubmissionKind::JobApplication);
    }

    #[test]
    fn test_negative_retention_rejected() {
        let mut p = policy(Industry::General, true);
        p.retention_days = Some(-5);
        let result = compute_schedule(
            &p,
            SubmissionKind::Contact,
            Utc::now(),
            None,
            &RetentionConfig::default(),
        );
        assert!(matches!(result, Err(RetentionError::InvalidSubmission(_))));

        // Rejected even where the record would never expire anyway
        p.industry = Industry::Healthcare;
        let regulated = compute_schedule(
            &p,
            SubmissionKind::Contact,
            Utc::now(),
            None,
            &RetentionConfig::default(),
        );
        assert!(regulated.is_err());
    }

    #[test]
    fn test_unrepresentable_retention_never_expires() {
        let config = RetentionConfig::default();
        for days in [1_000_000_000, i64::MAX] {
            let mut p = policy(Industry::General, true);
            p.retention_days = Some(days);
            let schedule =
                compute_schedule(&p, SubmissionKind::Contact, Utc::now(), None, &config).unwrap();
            assert_eq!(schedule, Schedule::NEVER, "{}", days);
        }
    }
}
