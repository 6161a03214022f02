//! Payout settlement engine
//!
//! Drives each batch through its state machine. Store access is serialized
//! by a mutex that is never held across a processor call.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use settle_audit::{AuditLog, AuditOutcome, AuditSubject, NewAuditEntry};
use settle_core::{Currency, MinorUnits};
use settle_ledger::{SaleRecord, SalesLedger};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::batch::{BatchStatus, PayoutBatch};
use crate::config::PayoutConfig;
use crate::error::{PayoutError, PayoutResult};
use crate::processor::{PaymentProcessor, PayoutRequest, ProcessorError, ProcessorStatus};
use crate::store::PayoutStore;

/// What one scheduled cycle did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    pub formed: Vec<String>,
    pub paid: Vec<String>,
    pub failed: Vec<String>,
    /// Still `submitted` after the cycle
    pub pending: Vec<String>,
    /// Newly flagged for manual reconciliation
    pub needs_reconciliation: Vec<String>,
    /// Paid batches written back to the ledger late
    pub resynced: Vec<String>,
    pub errors: Vec<String>,
}

impl CycleReport {
    fn record(&mut self, batch: PayoutBatch) {
        match batch.status {
            BatchStatus::Paid => self.paid.push(batch.batch_id),
            BatchStatus::Failed => self.failed.push(batch.batch_id),
            BatchStatus::Submitted => self.pending.push(batch.batch_id),
            BatchStatus::Formed | BatchStatus::Cancelled => {}
        }
    }
}

pub struct PayoutEngine {
    store: Mutex<PayoutStore>,
    ledger: Arc<SalesLedger>,
    processor: Arc<dyn PaymentProcessor>,
    audit: Arc<AuditLog>,
    config: PayoutConfig,
}

impl PayoutEngine {
    pub fn new(
        store: PayoutStore,
        ledger: Arc<SalesLedger>,
        processor: Arc<dyn PaymentProcessor>,
        audit: Arc<AuditLog>,
        config: PayoutConfig,
    ) -> Self {
        Self {
            store: Mutex::new(store),
            ledger,
            processor,
            audit,
            config,
        }
    }

    pub fn config(&self) -> &PayoutConfig {
        &self.config
    }

    /// Run one scheduled cycle: write back late ledger syncs, form batches
    /// for every creator, submit formed batches and reconcile submitted ones.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> PayoutResult<CycleReport> {
        let mut report = CycleReport::default();

        let unsynced = self.store.lock().await.list_unsynced_paid()?;
        for batch in unsynced {
            let batch_id = batch.batch_id.clone();
            if self.sync_ledger(batch, now).await?.ledger_synced {
                report.resynced.push(batch_id);
            }
        }

        for creator_id in self.ledger.creators().await? {
            match self.form_batches(&creator_id, now).await {
                Ok(batches) => report.formed.extend(batches.into_iter().map(|b| b.batch_id)),
                Err(e) => {
                    error!(creator_id = %creator_id, error = %e, "Batch formation failed");
                    report.errors.push(format!("{}: {}", creator_id, e));
                }
            }
        }

        let formed = self.store.lock().await.list_by_status(BatchStatus::Formed)?;
        for batch in formed {
            match self.submit_batch(&batch.batch_id, now).await {
                Ok(b) => report.record(b),
                Err(e) => {
                    error!(batch_id = %batch.batch_id, error = %e, "Batch submission failed");
                    report.errors.push(format!("{}: {}", batch.batch_id, e));
                }
            }
        }

        // Includes batches left ambiguous by the submissions above
        let submitted = self.store.lock().await.list_by_status(BatchStatus::Submitted)?;
        for batch in submitted {
            let was_flagged = batch.needs_reconciliation;
            match self.reconcile_batch(&batch.batch_id, now).await {
                Ok(b) => {
                    if b.needs_reconciliation && !was_flagged {
                        report.needs_reconciliation.push(b.batch_id.clone());
                    }
                    report.pending.retain(|id| id != &b.batch_id);
                    report.record(b);
                }
                Err(e) => {
                    error!(batch_id = %batch.batch_id, error = %e, "Batch reconciliation failed");
                    report.errors.push(format!("{}: {}", batch.batch_id, e));
                }
            }
        }

        info!(
            formed = report.formed.len(),
            paid = report.paid.len(),
            failed = report.failed.len(),
            pending = report.pending.len(),
            errors = report.errors.len(),
            "Payout cycle complete"
        );
        Ok(report)
    }

    /// Form batches for one creator, one per currency.
    ///
    /// Eligible sales are older than the holding window, not yet paid and
    /// not claimed by an active batch. A currency whose eligible net total
    /// is below the minimum payout carries forward to the next cycle.
    pub async fn form_batches(
        &self,
        creator_id: &str,
        now: DateTime<Utc>,
    ) -> PayoutResult<Vec<PayoutBatch>> {
        let snapshot = self.ledger.creator_sales(creator_id).await?;
        if snapshot.is_partial() {
            warn!(
                creator_id = %creator_id,
                unavailable = ?snapshot.unavailable_partitions,
                "Forming batches from a partial sales snapshot"
            );
        }

        let cutoff = now - self.config.holding_window();
        let store = self.store.lock().await;
        let claimed = store.claimed_sale_ids(creator_id)?;

        let mut by_currency: BTreeMap<Currency, Vec<&SaleRecord>> = BTreeMap::new();
        for sale in &snapshot.sales {
            if sale.occurred_at < cutoff
                && !snapshot.settled.contains(&sale.sale_id)
                && !claimed.contains(&sale.sale_id)
            {
                by_currency.entry(sale.currency.clone()).or_default().push(sale);
            }
        }

        let mut formed = Vec::new();
        for (currency, sales) in by_currency {
            let amount = Self::net_total(&sales, creator_id, &currency)?;
            if amount < self.config.minimum_payout {
                debug!(
                    creator_id = %creator_id,
                    currency = %currency,
                    amount = %amount,
                    "Below minimum payout, carrying forward"
                );
                continue;
            }

            let batch = PayoutBatch::new(
                creator_id,
                sales.iter().map(|s| s.sale_id.clone()).collect(),
                amount,
                currency,
                now,
            );
            Self::insert_exclusive(&store, &batch)?;

            self.audit(
                &batch.batch_id,
                AuditOutcome::Formed,
                format!(
                    "creator={} sales={} amount={} {}",
                    batch.creator_id,
                    batch.sale_ids.len(),
                    batch.amount,
                    batch.currency
                ),
                now,
            )?;
            info!(
                batch_id = %batch.batch_id,
                creator_id = %creator_id,
                amount = %batch.amount,
                currency = %batch.currency,
                sales = batch.sale_ids.len(),
                "Payout batch formed"
            );
            formed.push(batch);
        }

        Ok(formed)
    }

    /// Send a formed batch to the processor
    pub async fn submit_batch(&self, batch_id: &str, now: DateTime<Utc>) -> PayoutResult<PayoutBatch> {
        let batch = {
            let store = self.store.lock().await;
            let mut batch = store.get(batch_id)?;
            Self::check_transition(&batch, BatchStatus::Submitted)?;
            batch.status = BatchStatus::Submitted;
            batch.submitted_at = Some(now);
            store.update(&batch)?;
            batch
        };
        self.audit(
            batch_id,
            AuditOutcome::Submitted,
            format!("idempotency_key={}", batch.idempotency_key()),
            now,
        )?;

        self.drive_submission(batch, now).await
    }

    /// Settle a submitted batch from the processor's view of its key.
    ///
    /// Never resubmits blindly: only a key the processor has no record of
    /// is sent again, under the same idempotency key.
    pub async fn reconcile_batch(&self, batch_id: &str, now: DateTime<Utc>) -> PayoutResult<PayoutBatch> {
        let batch = self.store.lock().await.get(batch_id)?;
        if batch.status != BatchStatus::Submitted {
            return Ok(batch);
        }

        let key = batch.idempotency_key();
        let processor = Arc::clone(&self.processor);
        let looked_up = self
            .with_retry("lookup", batch_id, || {
                let processor = Arc::clone(&processor);
                let key = key.clone();
                async move { processor.lookup(&key).await }
            })
            .await;

        match looked_up {
            Ok(Some(ProcessorStatus::Paid { external_reference })) => {
                self.mark_paid(batch, external_reference, now).await
            }
            Ok(Some(ProcessorStatus::Rejected { reason })) => self.mark_failed(batch, reason, now).await,
            Ok(None) if !batch.needs_reconciliation => {
                debug!(batch_id = %batch_id, "Processor has no record of batch, resubmitting");
                self.drive_submission(batch, now).await
            }
            Ok(_) => self.flag_if_stuck(batch, now).await,
            Err(e) => {
                warn!(batch_id = %batch_id, error = %e, "Processor lookup failed");
                self.flag_if_stuck(batch, now).await
            }
        }
    }

    /// Withdraw a formed batch, releasing its sales
    pub async fn cancel_batch(
        &self,
        batch_id: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> PayoutResult<PayoutBatch> {
        let batch = {
            let store = self.store.lock().await;
            let mut batch = store.get(batch_id)?;
            Self::check_transition(&batch, BatchStatus::Cancelled)?;
            batch.status = BatchStatus::Cancelled;
            batch.failure_reason = Some(reason.to_string());
            store.update(&batch)?;
            batch
        };

        self.audit(batch_id, AuditOutcome::Cancelled, reason.to_string(), now)?;
        info!(batch_id = %batch_id, reason = %reason, "Payout batch cancelled");
        Ok(batch)
    }

    /// Re-form a failed batch under a new batch id.
    ///
    /// Only member sales that no other active batch has reclaimed are carried
    /// over. The minimum payout does not apply to retries.
    pub async fn retry_failed(&self, batch_id: &str, now: DateTime<Utc>) -> PayoutResult<PayoutBatch> {
        let failed = self.store.lock().await.get(batch_id)?;
        if failed.status != BatchStatus::Failed {
            return Err(PayoutError::InvalidTransition {
                batch_id: batch_id.to_string(),
                from: failed.status,
                to: BatchStatus::Formed,
            });
        }

        let snapshot = self.ledger.creator_sales(&failed.creator_id).await?;
        let store = self.store.lock().await;
        let claimed = store.claimed_sale_ids(&failed.creator_id)?;

        let sales: Vec<&SaleRecord> = snapshot
            .sales
            .iter()
            .filter(|s| failed.sale_ids.contains(&s.sale_id))
            .filter(|s| !claimed.contains(&s.sale_id) && !snapshot.settled.contains(&s.sale_id))
            .collect();
        if sales.is_empty() {
            return Err(PayoutError::NothingToRetry(batch_id.to_string()));
        }

        let amount = Self::net_total(&sales, &failed.creator_id, &failed.currency)?;
        let mut batch = PayoutBatch::new(
            failed.creator_id.clone(),
            sales.iter().map(|s| s.sale_id.clone()).collect(),
            amount,
            failed.currency.clone(),
            now,
        );
        batch.retry_of = Some(failed.batch_id.clone());
        Self::insert_exclusive(&store, &batch)?;
        drop(store);

        self.audit(
            &batch.batch_id,
            AuditOutcome::Formed,
            format!("retry of {} sales={} amount={}", failed.batch_id, batch.sale_ids.len(), batch.amount),
            now,
        )?;
        info!(batch_id = %batch.batch_id, retry_of = %failed.batch_id, "Failed batch re-formed");
        Ok(batch)
    }

    /// Batches of a creator, newest first
    pub async fn payouts(
        &self,
        creator_id: &str,
        status: Option<BatchStatus>,
    ) -> PayoutResult<Vec<PayoutBatch>> {
        Ok(self.store.lock().await.list_by_creator(creator_id, status)?)
    }

    pub async fn get_batch(&self, batch_id: &str) -> PayoutResult<PayoutBatch> {
        Ok(self.store.lock().await.get(batch_id)?)
    }

    /// Call the processor for a submitted batch and apply a definite outcome
    async fn drive_submission(&self, batch: PayoutBatch, now: DateTime<Utc>) -> PayoutResult<PayoutBatch> {
        let request = PayoutRequest {
            idempotency_key: batch.idempotency_key(),
            batch_id: batch.batch_id.clone(),
            creator_id: batch.creator_id.clone(),
            amount: batch.amount,
            currency: batch.currency.clone(),
        };
        let processor = Arc::clone(&self.processor);
        let outcome = self
            .with_retry("submit", &batch.batch_id, || {
                let processor = Arc::clone(&processor);
                let request = request.clone();
                async move { processor.submit(&request).await }
            })
            .await;

        match outcome {
            Ok(receipt) => self.mark_paid(batch, receipt.external_reference, now).await,
            Err(ProcessorError::Rejected(reason)) => self.mark_failed(batch, reason, now).await,
            Err(e) => {
                warn!(batch_id = %batch.batch_id, error = %e, "Processor outcome unknown, batch left submitted");
                self.audit(&batch.batch_id, AuditOutcome::Ambiguous, e.to_string(), now)?;
                self.flag_if_stuck(batch, now).await
            }
        }
    }

    async fn mark_paid(
        &self,
        mut batch: PayoutBatch,
        external_reference: String,
        now: DateTime<Utc>,
    ) -> PayoutResult<PayoutBatch> {
        batch.status = BatchStatus::Paid;
        batch.external_reference = Some(external_reference);
        batch.settled_at = Some(now);
        batch.needs_reconciliation = false;
        self.store.lock().await.update(&batch)?;

        self.audit(
            &batch.batch_id,
            AuditOutcome::Paid,
            format!(
                "external_reference={} amount={} {}",
                batch.external_reference.as_deref().unwrap_or_default(),
                batch.amount,
                batch.currency
            ),
            now,
        )?;
        info!(
            batch_id = %batch.batch_id,
            creator_id = %batch.creator_id,
            amount = %batch.amount,
            "Payout batch paid"
        );

        self.sync_ledger(batch, now).await
    }

    async fn mark_failed(
        &self,
        mut batch: PayoutBatch,
        reason: String,
        now: DateTime<Utc>,
    ) -> PayoutResult<PayoutBatch> {
        batch.status = BatchStatus::Failed;
        batch.failure_reason = Some(reason.clone());
        batch.needs_reconciliation = false;
        self.store.lock().await.update(&batch)?;

        self.audit(&batch.batch_id, AuditOutcome::Failed, reason.clone(), now)?;
        warn!(
            batch_id = %batch.batch_id,
            creator_id = %batch.creator_id,
            reason = %reason,
            "Payout batch rejected by processor; sales released"
        );
        Ok(batch)
    }

    /// Write a paid batch back to the ledger; retried by later cycles on failure
    async fn sync_ledger(&self, mut batch: PayoutBatch, now: DateTime<Utc>) -> PayoutResult<PayoutBatch> {
        let settled_at = batch.settled_at.unwrap_or(now);
        match self
            .ledger
            .mark_settled(&batch.sale_ids, &batch.batch_id, settled_at)
            .await
        {
            Ok(_) => {
                batch.ledger_synced = true;
                self.store.lock().await.update(&batch)?;
            }
            Err(e) => {
                error!(
                    batch_id = %batch.batch_id,
                    error = %e,
                    "Paid batch not yet written back to the sales ledger"
                );
            }
        }
        Ok(batch)
    }

    async fn flag_if_stuck(&self, mut batch: PayoutBatch, now: DateTime<Utc>) -> PayoutResult<PayoutBatch> {
        let submitted_at = batch.submitted_at.unwrap_or(batch.created_at);
        if batch.needs_reconciliation || now - submitted_at <= self.config.max_submitted_wait() {
            return Ok(batch);
        }

        batch.needs_reconciliation = true;
        self.store.lock().await.update(&batch)?;
        self.audit(
            &batch.batch_id,
            AuditOutcome::NeedsReconciliation,
            format!("submitted at {}", submitted_at.to_rfc3339()),
            now,
        )?;
        warn!(
            batch_id = %batch.batch_id,
            submitted_at = %submitted_at,
            "Payout batch stuck in submitted, flagged for manual reconciliation"
        );
        Ok(batch)
    }

    async fn with_retry<T, F, Fut>(&self, op: &str, batch_id: &str, mut call: F) -> Result<T, ProcessorError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProcessorError>>,
    {
        let policy = self.config.processor_retry;
        let mut attempt = 1;
        loop {
            match call().await {
                Err(e) if e.is_transient() && policy.should_retry(attempt) => {
                    debug!(
                        op = %op,
                        batch_id = %batch_id,
                        attempt,
                        processor = %self.processor.name(),
                        error = %e,
                        "Transient processor error, retrying"
                    );
                    tokio::time::sleep(policy.backoff_for(attempt)).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    fn check_transition(batch: &PayoutBatch, to: BatchStatus) -> PayoutResult<()> {
        if batch.status.can_transition_to(to) {
            Ok(())
        } else {
            Err(PayoutError::InvalidTransition {
                batch_id: batch.batch_id.clone(),
                from: batch.status,
                to,
            })
        }
    }

    fn net_total(sales: &[&SaleRecord], creator_id: &str, currency: &Currency) -> PayoutResult<MinorUnits> {
        MinorUnits::checked_sum(sales.iter().map(|s| s.commission.net_to_creator)).ok_or_else(|| {
            PayoutError::AmountOverflow {
                creator_id: creator_id.to_string(),
                currency: currency.clone(),
            }
        })
    }

    fn insert_exclusive(store: &PayoutStore, batch: &PayoutBatch) -> PayoutResult<()> {
        if let Some((sale_id, existing)) = store.insert(batch)? {
            error!(
                sale_id = %sale_id,
                existing_batch = %existing,
                batch_id = %batch.batch_id,
                "Refusing double payout"
            );
            return Err(PayoutError::DoublePayout {
                sale_id,
                batch_id: existing,
            });
        }
        Ok(())
    }

    fn audit(
        &self,
        batch_id: &str,
        outcome: AuditOutcome,
        detail: String,
        now: DateTime<Utc>,
    ) -> PayoutResult<()> {
        self.audit
            .append(NewAuditEntry::at(AuditSubject::Payout, batch_id, outcome, detail, now))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::{SandboxOutcome, SandboxProcessor};
    use chrono::{Duration, SubsecRound};
    use settle_commission::RateTable;
    use settle_core::{Category, CreatorTier, RetryPolicy};
    use settle_ledger::{LedgerConfig, SaleEvent};

    struct Fixture {
        engine: PayoutEngine,
        ledger: Arc<SalesLedger>,
        processor: Arc<SandboxProcessor>,
        audit: Arc<AuditLog>,
        now: DateTime<Utc>,
    }

    fn fixture() -> Fixture {
        let ledger = Arc::new(SalesLedger::in_memory(
            LedgerConfig::default(),
            RateTable::default(),
        ));
        let processor = Arc::new(SandboxProcessor::new());
        let audit = Arc::new(AuditLog::in_memory());
        let config = PayoutConfig {
            processor_retry: RetryPolicy {
                max_attempts: 3,
                initial_backoff_ms: 1,
                max_backoff_ms: 1,
            },
            ..PayoutConfig::default()
        };
        let engine = PayoutEngine::new(
            PayoutStore::in_memory().unwrap(),
            Arc::clone(&ledger),
            processor.clone(),
            Arc::clone(&audit),
            config,
        );
        Fixture {
            engine,
            ledger,
            processor,
            audit,
            // Stored timestamps keep microseconds
            now: Utc::now().trunc_subsecs(6),
        }
    }

    impl Fixture {
        /// Record a 9900 pro/healthcare sale (net 6937) that happened `age_days` ago
        async fn sale(&self, sale_id: &str, creator_id: &str, age_days: i64) {
            self.sale_of(sale_id, creator_id, 9900, age_days).await;
        }

        async fn sale_of(&self, sale_id: &str, creator_id: &str, gross: i64, age_days: i64) {
            let event = SaleEvent {
                sale_id: sale_id.to_string(),
                template_id: format!("tpl-{}", sale_id),
                buyer_id: "buyer-1".to_string(),
                creator_id: creator_id.to_string(),
                gross_amount: MinorUnits::new(gross).unwrap(),
                currency: Currency::Usd,
                creator_tier: CreatorTier::Pro,
                category: Category::Healthcare,
                occurred_at: Some(self.now - Duration::days(age_days)),
            };
            self.ledger
                .record_sale(event, MinorUnits::new(290).unwrap())
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_cycle_pays_eligible_sales() {
        let f = fixture();
        f.sale("s-1", "c-1", 40).await;
        f.sale("s-2", "c-1", 35).await;

        let report = f.engine.run_cycle(f.now).await.unwrap();
        assert_eq!(report.formed.len(), 1);
        assert_eq!(report.paid, report.formed);
        assert!(report.errors.is_empty());

        let batch = f.engine.get_batch(&report.paid[0]).await.unwrap();
        assert_eq!(batch.status, BatchStatus::Paid);
        assert_eq!(batch.amount.value(), 6937 * 2);
        assert_eq!(batch.sale_ids, vec!["s-1".to_string(), "s-2".to_string()]);
        assert!(batch.external_reference.is_some());
        assert_eq!(batch.settled_at, Some(f.now));
        assert!(batch.ledger_synced);
        assert_eq!(f.processor.transfer_count(), 1);

        let balance = f.ledger.get_balance("c-1").await.unwrap();
        assert_eq!(balance.total_paid_out.value(), 7227 * 2);
        assert_eq!(balance.pending_balance, MinorUnits::ZERO);

        // Nothing left to pay
        let again = f.engine.run_cycle(f.now + Duration::days(1)).await.unwrap();
        assert!(again.formed.is_empty());
        assert_eq!(f.processor.transfer_count(), 1);
    }

    #[tokio::test]
    async fn test_overflowing_net_total_forms_nothing() {
        let f = fixture();
        f.sale_of("s-1", "c-1", i64::MAX, 40).await;
        f.sale_of("s-2", "c-1", i64::MAX, 40).await;

        let result = f.engine.form_batches("c-1", f.now).await;
        assert!(matches!(
            result,
            Err(PayoutError::AmountOverflow { ref creator_id, currency: Currency::Usd }) if creator_id == "c-1"
        ));

        let report = f.engine.run_cycle(f.now).await.unwrap();
        assert!(report.formed.is_empty());
        assert_eq!(report.errors.len(), 1);
        assert_eq!(f.processor.transfer_count(), 0);
    }

    #[tokio::test]
    async fn test_holding_window_and_minimum() {
        let f = fixture();
        f.sale("s-recent", "c-1", 5).await;
        f.sale_of("s-small", "c-1", 1000, 40).await;

        // Recent sale is inside the refund window; the old one is below minimum
        let report = f.engine.run_cycle(f.now).await.unwrap();
        assert!(report.formed.is_empty());

        // Once the recent sale ages out the carried-forward balance qualifies
        let later = f.now + Duration::days(30);
        let report = f.engine.run_cycle(later).await.unwrap();
        assert_eq!(report.formed.len(), 1);
        let batch = f.engine.get_batch(&report.formed[0]).await.unwrap();
        assert_eq!(batch.sale_ids.len(), 2);
    }

    #[tokio::test]
    async fn test_rejection_releases_sales_for_retry() {
        let f = fixture();
        f.sale("s-1", "c-1", 40).await;
        f.processor
            .script(SandboxOutcome::Reject("invalid destination account".into()));

        let report = f.engine.run_cycle(f.now).await.unwrap();
        assert_eq!(report.failed.len(), 1);
        let failed = f.engine.get_batch(&report.failed[0]).await.unwrap();
        assert_eq!(failed.status, BatchStatus::Failed);
        assert_eq!(failed.failure_reason.as_deref(), Some("invalid destination account"));

        let retry = f.engine.retry_failed(&failed.batch_id, f.now).await.unwrap();
        assert_ne!(retry.batch_id, failed.batch_id);
        assert_eq!(retry.retry_of.as_deref(), Some(failed.batch_id.as_str()));
        assert_eq!(retry.sale_ids, failed.sale_ids);
        assert_eq!(retry.status, BatchStatus::Formed);

        // The released sales are claimed again; a second retry has nothing left
        assert!(matches!(
            f.engine.retry_failed(&failed.batch_id, f.now).await,
            Err(PayoutError::NothingToRetry(_))
        ));

        let paid = f.engine.submit_batch(&retry.batch_id, f.now).await.unwrap();
        assert_eq!(paid.status, BatchStatus::Paid);
        assert_eq!(f.processor.transfer_count(), 1);
    }

    #[tokio::test]
    async fn test_ambiguous_outcome_reconciled_by_lookup() {
        let f = fixture();
        f.sale("s-1", "c-1", 40).await;
        f.processor.script(SandboxOutcome::Ambiguous { completed: true });

        let batch = f.engine.form_batches("c-1", f.now).await.unwrap().remove(0);
        let submitted = f.engine.submit_batch(&batch.batch_id, f.now).await.unwrap();
        assert_eq!(submitted.status, BatchStatus::Submitted);

        let reconciled = f.engine.reconcile_batch(&batch.batch_id, f.now).await.unwrap();
        assert_eq!(reconciled.status, BatchStatus::Paid);
        // Resolved from the lookup, not by resubmitting
        assert_eq!(f.processor.submissions().len(), 1);
        assert_eq!(f.processor.transfer_count(), 1);
    }

    #[tokio::test]
    async fn test_unknown_key_is_resubmitted_with_same_key() {
        let f = fixture();
        f.sale("s-1", "c-1", 40).await;
        // Every submit attempt fails before reaching the processor
        for _ in 0..3 {
            f.processor.script(SandboxOutcome::Unavailable);
        }

        let batch = f.engine.form_batches("c-1", f.now).await.unwrap().remove(0);
        let submitted = f.engine.submit_batch(&batch.batch_id, f.now).await.unwrap();
        assert_eq!(submitted.status, BatchStatus::Submitted);
        assert_eq!(f.processor.submissions().len(), 3);

        let reconciled = f.engine.reconcile_batch(&batch.batch_id, f.now).await.unwrap();
        assert_eq!(reconciled.status, BatchStatus::Paid);

        let keys: Vec<String> = f
            .processor
            .submissions()
            .into_iter()
            .map(|r| r.idempotency_key)
            .collect();
        assert!(keys.iter().all(|k| k == &batch.idempotency_key()));
        assert_eq!(f.processor.transfer_count(), 1);
    }

    #[tokio::test]
    async fn test_transient_errors_retried_within_budget() {
        let f = fixture();
        f.sale("s-1", "c-1", 40).await;
        f.processor.script(SandboxOutcome::Unavailable);

        let report = f.engine.run_cycle(f.now).await.unwrap();
        assert_eq!(report.paid.len(), 1);
        assert_eq!(f.processor.submissions().len(), 2);
    }

    #[tokio::test]
    async fn test_stuck_batch_flagged_for_reconciliation() {
        let f = fixture();
        f.sale("s-1", "c-1", 40).await;
        f.processor.script(SandboxOutcome::Ambiguous { completed: false });

        let report = f.engine.run_cycle(f.now).await.unwrap();
        assert_eq!(report.pending.len(), 1);
        assert!(report.needs_reconciliation.is_empty());
        let batch_id = report.pending[0].clone();

        let later = f.now + Duration::hours(73);
        let report = f.engine.run_cycle(later).await.unwrap();
        assert_eq!(report.needs_reconciliation, vec![batch_id.clone()]);

        let batch = f.engine.get_batch(&batch_id).await.unwrap();
        assert_eq!(batch.status, BatchStatus::Submitted);
        assert!(batch.needs_reconciliation);

        let trail = f.audit.entries_for(&batch_id).unwrap();
        assert!(trail
            .iter()
            .any(|e| e.outcome == AuditOutcome::NeedsReconciliation));

        // Settles once the processor completes the transfer
        f.processor.complete_transfer(&batch.idempotency_key());
        let settled = f.engine.reconcile_batch(&batch_id, later).await.unwrap();
        assert_eq!(settled.status, BatchStatus::Paid);
        assert!(!settled.needs_reconciliation);
    }

    #[tokio::test]
    async fn test_cancel_releases_formed_batch() {
        let f = fixture();
        f.sale("s-1", "c-1", 40).await;

        let batch = f.engine.form_batches("c-1", f.now).await.unwrap().remove(0);
        let cancelled = f
            .engine
            .cancel_batch(&batch.batch_id, "fraud review", f.now)
            .await
            .unwrap();
        assert_eq!(cancelled.status, BatchStatus::Cancelled);

        let reformed = f.engine.form_batches("c-1", f.now).await.unwrap();
        assert_eq!(reformed.len(), 1);
        assert_eq!(reformed[0].sale_ids, batch.sale_ids);

        let paid = f.engine.submit_batch(&reformed[0].batch_id, f.now).await.unwrap();
        assert!(matches!(
            f.engine.cancel_batch(&paid.batch_id, "too late", f.now).await,
            Err(PayoutError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_claimed_sale_cannot_join_second_batch() {
        let f = fixture();
        f.sale("s-1", "c-1", 40).await;
        let first = f.engine.form_batches("c-1", f.now).await.unwrap().remove(0);
        assert!(f.engine.form_batches("c-1", f.now).await.unwrap().is_empty());

        let intruder = PayoutBatch::new(
            "c-1",
            vec!["s-1".to_string()],
            MinorUnits::new(6937).unwrap(),
            Currency::Usd,
            f.now,
        );
        let store = f.engine.store.lock().await;
        let result = PayoutEngine::insert_exclusive(&store, &intruder);
        assert!(matches!(
            result,
            Err(PayoutError::DoublePayout { ref batch_id, .. }) if batch_id == &first.batch_id
        ));
    }

    #[tokio::test]
    async fn test_transitions_are_audited_and_listed() {
        let f = fixture();
        f.sale("s-1", "c-1", 40).await;
        let report = f.engine.run_cycle(f.now).await.unwrap();
        let batch_id = &report.paid[0];

        let outcomes: Vec<AuditOutcome> = f
            .audit
            .entries_for(batch_id)
            .unwrap()
            .into_iter()
            .map(|e| e.outcome)
            .collect();
        assert_eq!(
            outcomes,
            vec![AuditOutcome::Formed, AuditOutcome::Submitted, AuditOutcome::Paid]
        );

        f.sale("s-2", "c-1", 40).await;
        f.engine.form_batches("c-1", f.now + Duration::days(1)).await.unwrap();

        let all = f.engine.payouts("c-1", None).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].status, BatchStatus::Formed);
        let paid = f.engine.payouts("c-1", Some(BatchStatus::Paid)).await.unwrap();
        assert_eq!(paid.len(), 1);
        assert!(f.engine.payouts("c-2", None).await.unwrap().is_empty());
    }
}
