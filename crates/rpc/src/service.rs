//! Collaborator-facing API
//!
//! Thin facade over `AppContext`. Each call maps to one operation of the
//! ledger, payout engine, retention scheduler or audit log.

use chrono::{DateTime, Utc};
use settle_audit::{AuditEntry, AuditError};
use settle_commission::quote_processor_fee;
use settle_core::MinorUnits;
use settle_ledger::{CreatorBalance, LedgerError, RecordOutcome, SaleEvent};
use settle_payout::{BatchStatus, CycleReport, PayoutBatch, PayoutError};
use settle_retention::{
    DeletionState, ErasureOutcome, ErasureRequest, HoldApplied, LegalHold, RetentionError,
    ScheduledDeletion, SubmissionStored, SweepReport,
};
use thiserror::Error;
use tracing::{info, warn};

use crate::context::AppContext;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Payout error: {0}")]
    Payout(#[from] PayoutError),

    #[error("Retention error: {0}")]
    Retention(#[from] RetentionError),

    #[error("Audit error: {0}")]
    Audit(#[from] AuditError),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

pub struct SettlementService {
    ctx: AppContext,
}

impl SettlementService {
    pub fn new(ctx: AppContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &AppContext {
        &self.ctx
    }

    /// Record a sale. Without the processor's quote the configured
    /// percentage-plus-fixed fee is used.
    pub async fn ingest_sale(
        &self,
        event: SaleEvent,
        processor_fee: Option<MinorUnits>,
    ) -> ServiceResult<RecordOutcome> {
        let fee = processor_fee.unwrap_or_else(|| {
            let quote = &self.ctx.config.processor_fee;
            quote_processor_fee(event.gross_amount, quote.percent, quote.fixed)
        });
        Ok(self.ctx.ledger.record_sale(event, fee).await?)
    }

    pub async fn balance(&self, creator_id: &str) -> ServiceResult<CreatorBalance> {
        let balance = self.ctx.ledger.get_balance(creator_id).await?;
        if balance.partial {
            warn!(
                creator_id = %creator_id,
                unavailable = ?balance.unavailable_partitions,
                "Serving partial balance"
            );
        }
        Ok(balance)
    }

    pub async fn payouts(
        &self,
        creator_id: &str,
        status: Option<BatchStatus>,
    ) -> ServiceResult<Vec<PayoutBatch>> {
        Ok(self.ctx.payouts.payouts(creator_id, status).await?)
    }

    pub async fn run_payout_cycle(&self, now: DateTime<Utc>) -> ServiceResult<CycleReport> {
        Ok(self.ctx.payouts.run_cycle(now).await?)
    }

    pub async fn store_submission(&self, event: SubmissionStored) -> ServiceResult<ScheduledDeletion> {
        Ok(self.ctx.retention.on_submission_stored(event).await?)
    }

    pub async fn retention_tick(&self, now: DateTime<Utc>) -> ServiceResult<SweepReport> {
        Ok(self.ctx.retention.tick(now).await?)
    }

    pub async fn deletion_schedule(
        &self,
        form_id: &str,
        state: Option<DeletionState>,
    ) -> ServiceResult<Vec<ScheduledDeletion>> {
        Ok(self.ctx.retention.deletion_schedule(form_id, state).await?)
    }

    pub async fn apply_legal_hold(
        &self,
        target: &str,
        case_reference: &str,
        now: DateTime<Utc>,
    ) -> ServiceResult<HoldApplied> {
        Ok(self.ctx.retention.apply_legal_hold(target, case_reference, now).await?)
    }

    pub async fn release_legal_hold(
        &self,
        hold_id: &str,
        now: DateTime<Utc>,
    ) -> ServiceResult<(LegalHold, Vec<ScheduledDeletion>)> {
        Ok(self.ctx.retention.release_legal_hold(hold_id, now).await?)
    }

    pub async fn request_erasure(
        &self,
        request: ErasureRequest,
        now: DateTime<Utc>,
    ) -> ServiceResult<ErasureOutcome> {
        let user_id = request.user_id.clone();
        let outcome = self.ctx.retention.request_erasure(request, now).await?;
        info!(user_id = %user_id, accepted = outcome.accepted, "Erasure request handled");
        Ok(outcome)
    }

    /// Audit entries of one subject, or the whole log when `None`
    pub fn audit_trail(&self, subject_id: Option<&str>) -> ServiceResult<Vec<AuditEntry>> {
        let entries = match subject_id {
            Some(id) => self.ctx.audit.entries_for(id)?,
            None => self.ctx.audit.read_all()?,
        };
        Ok(entries)
    }

    /// Verify the audit hash chain; returns the number of entries checked
    pub fn verify_audit(&self) -> ServiceResult<usize> {
        Ok(self.ctx.audit.verify()?)
    }
}
