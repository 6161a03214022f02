//! Retention scheduler
//!
//! Persists one `ScheduledDeletion` per submission and drives it from
//! periodic sweeps. Every deadline goes through a legal-hold check before
//! anything is removed.

use chrono::{DateTime, Utc};
use settle_audit::{AuditLog, AuditOutcome, AuditSubject, NewAuditEntry};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::RetentionConfig;
use crate::error::{RetentionError, RetentionResult};
use crate::event::{ErasureOutcome, ErasureRequest, SubmissionStored, SweepReport};
use crate::holds::{HoldApplied, LegalHold, LegalHoldRegistry};
use crate::policy::{compute_schedule, RetentionPolicy};
use crate::purger::{DeletionNotifier, RecordPurger};
use crate::schedule::{DeletionState, ScheduledDeletion};
use crate::store::DeletionStore;

/// What a deadline check did with one record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Executed,
    Held,
    StillHeld,
    PurgeFailed,
}

pub struct RetentionScheduler {
    store: Mutex<DeletionStore>,
    holds: Arc<LegalHoldRegistry>,
    purger: Arc<dyn RecordPurger>,
    notifier: Arc<dyn DeletionNotifier>,
    audit: Arc<AuditLog>,
    config: RetentionConfig,
}

impl RetentionScheduler {
    pub fn new(
        store: DeletionStore,
        holds: Arc<LegalHoldRegistry>,
        purger: Arc<dyn RecordPurger>,
        notifier: Arc<dyn DeletionNotifier>,
        audit: Arc<AuditLog>,
        config: RetentionConfig,
    ) -> Self {
        Self {
            store: Mutex::new(store),
            holds,
            purger,
            notifier,
            audit,
            config,
        }
    }

    pub fn holds(&self) -> &LegalHoldRegistry {
        &self.holds
    }

    pub fn config(&self) -> &RetentionConfig {
        &self.config
    }

    /// Compute and persist the deletion schedule of a new submission.
    ///
    /// Redelivery of the same submission returns the existing schedule. A
    /// submission without a policy gets the conservative default and is
    /// flagged for review instead of being refused.
    pub async fn on_submission_stored(
        &self,
        event: SubmissionStored,
    ) -> RetentionResult<ScheduledDeletion> {
        if event.submission_id.trim().is_empty() || event.form_id.trim().is_empty() {
            return Err(RetentionError::InvalidSubmission(
                "submission_id and form_id are required".to_string(),
            ));
        }

        let store = self.store.lock().await;
        if let Some(existing) = store.get(&event.submission_id)? {
            debug!(submission_id = %event.submission_id, "Submission already scheduled");
            return Ok(existing);
        }

        let (policy, needs_review) = match event.retention_policy {
            Some(policy) => (policy, false),
            None => {
                warn!(
                    submission_id = %event.submission_id,
                    form_id = %event.form_id,
                    days = self.config.policy_missing_days,
                    "Submission arrived without a retention policy, applying conservative default"
                );
                (RetentionPolicy::conservative_default(&self.config), true)
            }
        };

        let schedule = compute_schedule(
            &policy,
            event.kind,
            event.stored_at,
            event.event_date,
            &self.config,
        )?;
        let mut record = ScheduledDeletion {
            submission_id: event.submission_id,
            form_id: event.form_id,
            subject_user_id: event.subject_user_id,
            kind: event.kind,
            stored_at: event.stored_at,
            event_date: event.event_date,
            policy,
            delete_at: None,
            notify_at: None,
            notified_at: None,
            notification_failed_at: None,
            state: DeletionState::Pending,
            executed_at: None,
            cancel_reason: None,
            needs_review,
        };
        record.apply_schedule(schedule);
        store.save(&record)?;
        drop(store);

        let now = record.stored_at;
        if needs_review {
            self.audit(
                AuditSubject::RetentionPolicy,
                &record.submission_id,
                AuditOutcome::PolicyMissing,
                format!("form={} default_days={}", record.form_id, self.config.policy_missing_days),
                now,
            )?;
        }
        match record.delete_at {
            Some(delete_at) => self.audit(
                AuditSubject::Deletion,
                &record.submission_id,
                AuditOutcome::Scheduled,
                format!("delete_at={}", delete_at.to_rfc3339()),
                now,
            )?,
            None => self.audit(
                AuditSubject::Deletion,
                &record.submission_id,
                AuditOutcome::NeverExpires,
                format!("industry={} auto_delete={}", record.policy.industry, record.policy.auto_delete),
                now,
            )?,
        }

        info!(
            submission_id = %record.submission_id,
            delete_at = ?record.delete_at,
            notify_at = ?record.notify_at,
            "Deletion scheduled"
        );
        Ok(record)
    }

    /// One sweep: send due notices, then execute or hold due deletions and
    /// re-check held records.
    pub async fn tick(&self, now: DateTime<Utc>) -> RetentionResult<SweepReport> {
        let mut report = SweepReport::default();

        let notices = self.store.lock().await.due_notifications(now)?;
        for record in notices {
            let id = record.submission_id.clone();
            if self.send_notice(record, now).await? {
                report.notified.push(id);
            } else {
                report.notification_failed.push(id);
            }
        }

        let (due, held) = {
            let store = self.store.lock().await;
            (store.due_deletions(now)?, store.list_by_state(DeletionState::Held)?)
        };
        for record in due.into_iter().chain(held) {
            let id = record.submission_id.clone();
            match self.execute_if_clear(record, now).await? {
                Disposition::Executed => report.executed.push(id),
                Disposition::Held => report.held.push(id),
                Disposition::PurgeFailed => report.purge_failed.push(id),
                Disposition::StillHeld => {}
            }
        }

        if !report.is_empty() {
            info!(
                notified = report.notified.len(),
                notification_failed = report.notification_failed.len(),
                executed = report.executed.len(),
                held = report.held.len(),
                purge_failed = report.purge_failed.len(),
                "Retention sweep complete"
            );
        }
        Ok(report)
    }

    /// Re-check one submission now, e.g. after a hold release
    pub async fn recheck(&self, submission_id: &str, now: DateTime<Utc>) -> RetentionResult<ScheduledDeletion> {
        let record = self.require(submission_id).await?;
        let eligible = record.state == DeletionState::Held
            || (!record.state.is_terminal() && record.is_due(now));
        if eligible {
            self.execute_if_clear(record, now).await?;
            return self.require(submission_id).await;
        }
        Ok(record)
    }

    /// Replace the policy of a submission before its deadline.
    ///
    /// A policy that no longer expires cancels the deletion.
    pub async fn update_policy(
        &self,
        submission_id: &str,
        policy: RetentionPolicy,
        now: DateTime<Utc>,
    ) -> RetentionResult<ScheduledDeletion> {
        let store = self.store.lock().await;
        let mut record = store
            .get(submission_id)?
            .ok_or_else(|| RetentionError::NotFound(submission_id.to_string()))?;
        Self::check_before_deadline(&record, now)?;

        let schedule = compute_schedule(
            &policy,
            record.kind,
            record.stored_at,
            record.event_date,
            &self.config,
        )?;
        record.policy = policy;
        record.needs_review = false;

        let outcome = match schedule.delete_at {
            None => {
                record.apply_schedule(schedule);
                record.state = DeletionState::Cancelled;
                record.cancel_reason = Some("policy no longer expires".to_string());
                AuditOutcome::Cancelled
            }
            Some(_) => {
                if schedule.notify_at != record.notify_at {
                    record.notified_at = None;
                    record.notification_failed_at = None;
                    record.state = DeletionState::Pending;
                } else if record.state == DeletionState::Cancelled {
                    record.state = DeletionState::Pending;
                }
                record.apply_schedule(schedule);
                record.cancel_reason = None;
                AuditOutcome::Rescheduled
            }
        };
        store.save(&record)?;
        drop(store);

        self.audit(
            AuditSubject::Deletion,
            submission_id,
            outcome,
            format!(
                "policy changed: delete_at={}",
                record
                    .delete_at
                    .map(|d| d.to_rfc3339())
                    .unwrap_or_else(|| "never".to_string())
            ),
            now,
        )?;
        info!(submission_id = %submission_id, state = %record.state, "Retention policy updated");
        Ok(record)
    }

    /// Cancel a scheduled deletion before its deadline
    pub async fn cancel(
        &self,
        submission_id: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> RetentionResult<ScheduledDeletion> {
        let store = self.store.lock().await;
        let mut record = store
            .get(submission_id)?
            .ok_or_else(|| RetentionError::NotFound(submission_id.to_string()))?;
        if record.state == DeletionState::Cancelled {
            return Ok(record);
        }
        Self::check_before_deadline(&record, now)?;

        record.state = DeletionState::Cancelled;
        record.cancel_reason = Some(reason.to_string());
        store.save(&record)?;
        drop(store);

        self.audit(
            AuditSubject::Deletion,
            submission_id,
            AuditOutcome::Cancelled,
            reason.to_string(),
            now,
        )?;
        info!(submission_id = %submission_id, reason = %reason, "Scheduled deletion cancelled");
        Ok(record)
    }

    /// Place a legal hold on a submission or a pattern of submissions
    pub async fn apply_legal_hold(
        &self,
        target: &str,
        case_reference: &str,
        now: DateTime<Utc>,
    ) -> RetentionResult<HoldApplied> {
        self.holds.apply(target, case_reference, now).await
    }

    /// Release a hold and re-check the held submissions it covered.
    ///
    /// Returns the hold and the re-checked records.
    pub async fn release_legal_hold(
        &self,
        hold_id: &str,
        now: DateTime<Utc>,
    ) -> RetentionResult<(LegalHold, Vec<ScheduledDeletion>)> {
        let hold = self.holds.release(hold_id, now).await?;

        let held = self.store.lock().await.list_by_state(DeletionState::Held)?;
        let mut rechecked = Vec::new();
        for record in held {
            if hold.target.matches(&record.submission_id) {
                rechecked.push(self.recheck(&record.submission_id, now).await?);
            }
        }
        Ok((hold, rechecked))
    }

    /// Right-to-erasure: delete now, unless a legal hold covers any target.
    ///
    /// A hold on any requested submission blocks the whole request and the
    /// blocking hold ids are returned. A hold that lands while the request
    /// is running stops it at the held submission; `erased` then lists what
    /// was already removed. Every outcome is audited.
    pub async fn request_erasure(
        &self,
        request: ErasureRequest,
        now: DateTime<Utc>,
    ) -> RetentionResult<ErasureOutcome> {
        let targets: Vec<String> = match request.submission_ids {
            Some(ids) => ids.into_iter().collect::<BTreeSet<_>>().into_iter().collect(),
            None => self
                .store
                .lock()
                .await
                .by_subject_user(&request.user_id)?
                .into_iter()
                .map(|r| r.submission_id)
                .collect(),
        };

        let mut blocking = BTreeSet::new();
        for id in &targets {
            for hold in self.holds.active_holds_for(id).await? {
                blocking.insert(hold.hold_id);
            }
        }

        if !blocking.is_empty() {
            let hold_ids: Vec<String> = blocking.into_iter().collect();
            self.audit(
                AuditSubject::ErasureRequest,
                &request.user_id,
                AuditOutcome::BlockedByHold,
                format!("submissions={} holds={}", targets.join(","), hold_ids.join(",")),
                now,
            )?;
            warn!(
                user_id = %request.user_id,
                holds = ?hold_ids,
                "Erasure request blocked by legal hold"
            );
            return Ok(ErasureOutcome {
                accepted: false,
                erased: Vec::new(),
                blocked_by_hold_ids: hold_ids,
            });
        }

        let mut erased = Vec::new();
        for id in &targets {
            match self.erase_now(id, now).await {
                Ok(true) => erased.push(id.clone()),
                Ok(false) => {}
                // A hold placed after the check above stops the request here
                Err(RetentionError::LegalHoldConflict { hold_ids, .. }) => {
                    self.audit(
                        AuditSubject::ErasureRequest,
                        &request.user_id,
                        AuditOutcome::BlockedByHold,
                        format!("erased={} holds={}", erased.join(","), hold_ids.join(",")),
                        now,
                    )?;
                    warn!(
                        user_id = %request.user_id,
                        submission_id = %id,
                        erased = ?erased,
                        holds = ?hold_ids,
                        "Erasure request stopped by a legal hold placed mid-request"
                    );
                    return Ok(ErasureOutcome {
                        accepted: false,
                        erased,
                        blocked_by_hold_ids: hold_ids,
                    });
                }
                Err(e) => {
                    self.audit(
                        AuditSubject::ErasureRequest,
                        &request.user_id,
                        AuditOutcome::PurgeFailed,
                        format!("erased={} failed={}: {}", erased.join(","), id, e),
                        now,
                    )?;
                    return Err(e);
                }
            }
        }

        self.audit(
            AuditSubject::ErasureRequest,
            &request.user_id,
            AuditOutcome::Accepted,
            format!("erased={}", erased.join(",")),
            now,
        )?;
        info!(user_id = %request.user_id, erased = erased.len(), "Erasure request completed");
        Ok(ErasureOutcome {
            accepted: true,
            erased,
            blocked_by_hold_ids: Vec::new(),
        })
    }

    /// Delete one submission immediately, regardless of its `delete_at`.
    ///
    /// Returns `false` if it was already deleted.
    pub async fn erase_now(&self, submission_id: &str, now: DateTime<Utc>) -> RetentionResult<bool> {
        let holds = self.holds.active_holds_for(submission_id).await?;
        if !holds.is_empty() {
            return Err(RetentionError::LegalHoldConflict {
                submission_id: submission_id.to_string(),
                hold_ids: holds.into_iter().map(|h| h.hold_id).collect(),
            });
        }

        let record = self.store.lock().await.get(submission_id)?;
        if record.as_ref().is_some_and(|r| r.state == DeletionState::Executed) {
            return Ok(false);
        }

        self.purger
            .purge(submission_id)
            .await
            .map_err(|e| RetentionError::PurgeFailed {
                submission_id: submission_id.to_string(),
                reason: e.to_string(),
            })?;

        if record.is_some() {
            self.update(submission_id, |r| {
                r.state = DeletionState::Executed;
                r.executed_at = Some(now);
            })
            .await?;
        }
        self.audit(
            AuditSubject::Deletion,
            submission_id,
            AuditOutcome::Executed,
            "erasure request".to_string(),
            now,
        )?;
        Ok(true)
    }

    /// Deletion schedule of a form
    pub async fn deletion_schedule(
        &self,
        form_id: &str,
        state: Option<DeletionState>,
    ) -> RetentionResult<Vec<ScheduledDeletion>> {
        self.store.lock().await.list_by_form(form_id, state)
    }

    pub async fn get(&self, submission_id: &str) -> RetentionResult<Option<ScheduledDeletion>> {
        self.store.lock().await.get(submission_id)
    }

    async fn require(&self, submission_id: &str) -> RetentionResult<ScheduledDeletion> {
        self.get(submission_id)
            .await?
            .ok_or_else(|| RetentionError::NotFound(submission_id.to_string()))
    }

    /// Notify the owner; a failure is recorded once and never blocks deletion
    async fn send_notice(&self, record: ScheduledDeletion, now: DateTime<Utc>) -> RetentionResult<bool> {
        let id = record.submission_id.as_str();
        match self.notifier.notify(&record).await {
            Ok(()) => {
                self.update(id, |r| {
                    if r.state == DeletionState::Pending {
                        r.state = DeletionState::Notified;
                    }
                    r.notified_at = Some(now);
                })
                .await?;
                self.audit(
                    AuditSubject::Deletion,
                    id,
                    AuditOutcome::Notified,
                    format!("delete_at={}", record.delete_at.map(|d| d.to_rfc3339()).unwrap_or_default()),
                    now,
                )?;
                Ok(true)
            }
            Err(e) => {
                self.update(id, |r| r.notification_failed_at = Some(now)).await?;
                self.audit(
                    AuditSubject::Deletion,
                    id,
                    AuditOutcome::NotificationFailed,
                    e.to_string(),
                    now,
                )?;
                warn!(submission_id = %id, error = %e, "Deletion notice failed; deletion proceeds as scheduled");
                Ok(false)
            }
        }
    }

    async fn execute_if_clear(&self, record: ScheduledDeletion, now: DateTime<Utc>) -> RetentionResult<Disposition> {
        let id = record.submission_id.as_str();
        let holds = self.holds.active_holds_for(id).await?;

        if !holds.is_empty() {
            if record.state == DeletionState::Held {
                return Ok(Disposition::StillHeld);
            }
            let hold_ids: Vec<String> = holds.into_iter().map(|h| h.hold_id).collect();
            self.update(id, |r| r.state = DeletionState::Held).await?;
            self.audit(
                AuditSubject::Deletion,
                id,
                AuditOutcome::Held,
                format!("holds={}", hold_ids.join(",")),
                now,
            )?;
            warn!(submission_id = %id, holds = ?hold_ids, "Deletion suspended by legal hold");
            return Ok(Disposition::Held);
        }

        match self.purger.purge(id).await {
            Ok(()) => {
                self.update(id, |r| {
                    r.state = DeletionState::Executed;
                    r.executed_at = Some(now);
                })
                .await?;
                self.audit(
                    AuditSubject::Deletion,
                    id,
                    AuditOutcome::Executed,
                    format!("delete_at={}", record.delete_at.map(|d| d.to_rfc3339()).unwrap_or_default()),
                    now,
                )?;
                info!(submission_id = %id, "Submission deleted");
                Ok(Disposition::Executed)
            }
            Err(e) => {
                self.audit(
                    AuditSubject::Deletion,
                    id,
                    AuditOutcome::PurgeFailed,
                    e.to_string(),
                    now,
                )?;
                error!(submission_id = %id, error = %e, "Purge failed, will retry next sweep");
                Ok(Disposition::PurgeFailed)
            }
        }
    }

    /// Apply a change to the stored copy of a record
    async fn update<F>(&self, submission_id: &str, change: F) -> RetentionResult<ScheduledDeletion>
    where
        F: FnOnce(&mut ScheduledDeletion),
    {
        let store = self.store.lock().await;
        let mut record = store
            .get(submission_id)?
            .ok_or_else(|| RetentionError::NotFound(submission_id.to_string()))?;
        change(&mut record);
        store.save(&record)?;
        Ok(record)
    }

    fn check_before_deadline(record: &ScheduledDeletion, now: DateTime<Utc>) -> RetentionResult<()> {
        if record.state == DeletionState::Executed {
            return Err(RetentionError::AlreadyExecuted(record.submission_id.clone()));
        }
        match record.delete_at {
            Some(delete_at) if delete_at <= now => Err(RetentionError::DeadlinePassed {
                submission_id: record.submission_id.clone(),
                delete_at,
            }),
            _ => Ok(()),
        }
    }

    fn audit(
        &self,
        subject: AuditSubject,
        subject_id: &str,
        outcome: AuditOutcome,
        detail: String,
        now: DateTime<Utc>,
    ) -> RetentionResult<()> {
        self.audit
            .append(NewAuditEntry::at(subject, subject_id, outcome, detail, now))?;
        Ok(())
    }
}
