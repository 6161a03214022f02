//! Integration tests for Settle
//!
//! These tests drive the complete flow through `SettlementService`: sale
//! ingestion, balances, payout cycles, retention sweeps, legal holds and the
//! audit trail, all over a temporary data directory.

use chrono::{DateTime, Duration, SubsecRound, Utc};
use settle_audit::AuditOutcome;
use settle_core::{Category, CreatorTier, Currency, MinorUnits};
use settle_ledger::SaleEvent;
use settle_payout::{BatchStatus, SandboxOutcome, SandboxProcessor};
use settle_retention::{
    DeletionState, ErasureRequest, Industry, LegalBasis, RecordingNotifier, RecordingPurger,
    RetentionPolicy, SubmissionKind, SubmissionStored,
};
use settle_rpc::{AppConfig, AppContext, SettlementService};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

struct Harness {
    service: SettlementService,
    processor: Arc<SandboxProcessor>,
    purger: Arc<RecordingPurger>,
}

async fn open(data_path: &Path, config: Option<AppConfig>) -> Harness {
    let mut config = config.unwrap_or_default();
    config.data_dir = data_path.to_path_buf();
    let processor = Arc::new(SandboxProcessor::new());
    let purger = Arc::new(RecordingPurger::new());
    let ctx = AppContext::with_collaborators(
        config,
        processor.clone(),
        purger.clone(),
        Arc::new(RecordingNotifier::new()),
    )
    .await
    .unwrap();
    Harness {
        service: SettlementService::new(ctx),
        processor,
        purger,
    }
}

fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

fn sale(id: &str, gross: i64, occurred_at: DateTime<Utc>) -> SaleEvent {
    SaleEvent {
        sale_id: id.to_string(),
        template_id: "tpl-clinic-intake".to_string(),
        buyer_id: "buyer-1".to_string(),
        creator_id: "creator-1".to_string(),
        gross_amount: MinorUnits::new(gross).unwrap(),
        currency: Currency::Usd,
        creator_tier: CreatorTier::Pro,
        category: Category::Healthcare,
        occurred_at: Some(occurred_at),
    }
}

fn fee(v: i64) -> Option<MinorUnits> {
    Some(MinorUnits::new(v).unwrap())
}

fn submission(id: &str, industry: Industry, stored_at: DateTime<Utc>) -> SubmissionStored {
    SubmissionStored {
        submission_id: id.to_string(),
        form_id: "contact-form".to_string(),
        retention_policy: Some(RetentionPolicy {
            legal_basis: LegalBasis::Consent,
            retention_days: None,
            auto_delete: true,
            industry,
            notify_before_delete: true,
        }),
        stored_at,
        kind: SubmissionKind::Contact,
        event_date: None,
        subject_user_id: Some("user-42".to_string()),
    }
}

/// Test: Sale → Duplicate → Balance → Payout cycle → Balance
#[tokio::test]
async fn test_sale_to_payout_workflow() {
    let temp_dir = TempDir::new().unwrap();
    let h = open(temp_dir.path(), None).await;
    let now = now();

    // 1. First ingestion splits the sale
    let outcome = h
        .service
        .ingest_sale(sale("sale-1", 9900, now - Duration::days(40)), fee(290))
        .await
        .unwrap();
    assert!(!outcome.is_duplicate());
    let commission = &outcome.record().commission;
    assert_eq!(commission.creator_earnings.value(), 7227);
    assert_eq!(commission.platform_fee.value(), 2673);
    assert_eq!(commission.net_to_creator.value(), 6937);

    // 2. Redelivery with a different fee is a no-op
    let again = h
        .service
        .ingest_sale(sale("sale-1", 9900, now - Duration::days(40)), fee(500))
        .await
        .unwrap();
    assert!(again.is_duplicate());
    assert_eq!(again.record().commission.net_to_creator.value(), 6937);

    // 3. Balance before payout
    let balance = h.service.balance("creator-1").await.unwrap();
    assert_eq!(balance.total_earned.value(), 7227);
    assert_eq!(balance.total_paid_out, MinorUnits::ZERO);
    assert_eq!(balance.pending_balance.value(), 7227);
    assert!(!balance.partial);

    // 4. Cycle forms, submits and pays one batch
    let report = h.service.run_payout_cycle(now).await.unwrap();
    assert_eq!(report.formed.len(), 1);
    assert_eq!(report.paid, report.formed);
    assert_eq!(h.processor.transfer_count(), 1);

    let batches = h.service.payouts("creator-1", None).await.unwrap();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].status, BatchStatus::Paid);
    assert_eq!(batches[0].amount.value(), 6937);
    assert_eq!(batches[0].sale_ids, vec!["sale-1".to_string()]);

    // 5. Settled earnings move to paid out
    let balance = h.service.balance("creator-1").await.unwrap();
    assert_eq!(balance.total_paid_out.value(), 7227);
    assert_eq!(balance.pending_balance, MinorUnits::ZERO);

    // 6. Every transition is audited under the batch id
    let trail: Vec<AuditOutcome> = h
        .service
        .audit_trail(Some(&batches[0].batch_id))
        .unwrap()
        .into_iter()
        .map(|e| e.outcome)
        .collect();
    assert_eq!(
        trail,
        vec![AuditOutcome::Formed, AuditOutcome::Submitted, AuditOutcome::Paid]
    );
}

/// Test: sales inside the holding window are not batched
#[tokio::test]
async fn test_recent_sales_wait_for_holding_window() {
    let temp_dir = TempDir::new().unwrap();
    let h = open(temp_dir.path(), None).await;
    let now = now();

    h.service
        .ingest_sale(sale("sale-1", 9900, now - Duration::days(5)), fee(290))
        .await
        .unwrap();

    let report = h.service.run_payout_cycle(now).await.unwrap();
    assert!(report.formed.is_empty());
    assert_eq!(h.processor.transfer_count(), 0);

    let later = h
        .service
        .run_payout_cycle(now + Duration::days(26))
        .await
        .unwrap();
    assert_eq!(later.formed.len(), 1);
}

/// Test: a sale without the processor quote gets the configured fee
#[tokio::test]
async fn test_configured_fee_quote() {
    let temp_dir = TempDir::new().unwrap();
    let h = open(temp_dir.path(), None).await;

    let outcome = h
        .service
        .ingest_sale(sale("sale-1", 9900, now()), None)
        .await
        .unwrap();
    // 9900 * 0.029 = 287.1 -> 287, plus 30 fixed
    let commission = &outcome.record().commission;
    assert_eq!(commission.processor_fee.value(), 317);
    assert_eq!(commission.net_to_creator.value(), 7227 - 317);
}

/// Test: a rejected payout fails the batch and frees its sales
#[tokio::test]
async fn test_rejected_payout() {
    let temp_dir = TempDir::new().unwrap();
    let h = open(temp_dir.path(), None).await;
    let now = now();

    h.service
        .ingest_sale(sale("sale-1", 9900, now - Duration::days(40)), fee(290))
        .await
        .unwrap();
    h.processor
        .script(SandboxOutcome::Reject("account closed".to_string()));

    let report = h.service.run_payout_cycle(now).await.unwrap();
    assert_eq!(report.failed.len(), 1);

    let failed = h
        .service
        .payouts("creator-1", Some(BatchStatus::Failed))
        .await
        .unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].failure_reason.as_deref(), Some("account closed"));

    let balance = h.service.balance("creator-1").await.unwrap();
    assert_eq!(balance.total_paid_out, MinorUnits::ZERO);
}

/// Test: restart replays sales, keeps batches and the audit chain
#[tokio::test]
async fn test_reopen_preserves_state() {
    let temp_dir = TempDir::new().unwrap();
    let now = now();

    {
        let h = open(temp_dir.path(), None).await;
        h.service
            .ingest_sale(sale("sale-1", 9900, now - Duration::days(40)), fee(290))
            .await
            .unwrap();
        h.service.run_payout_cycle(now).await.unwrap();
        h.service
            .store_submission(submission("sub-1", Industry::General, now))
            .await
            .unwrap();
    }

    let h = open(temp_dir.path(), None).await;
    assert_eq!(h.service.context().ledger.len().await, 1);

    // Sale still deduped after restart
    let again = h
        .service
        .ingest_sale(sale("sale-1", 9900, now - Duration::days(40)), fee(290))
        .await
        .unwrap();
    assert!(again.is_duplicate());

    let balance = h.service.balance("creator-1").await.unwrap();
    assert_eq!(balance.total_paid_out.value(), 7227);

    // Already settled: nothing to pay twice
    let report = h.service.run_payout_cycle(now).await.unwrap();
    assert!(report.formed.is_empty());
    assert_eq!(h.processor.transfer_count(), 0);

    let schedule = h
        .service
        .deletion_schedule("contact-form", None)
        .await
        .unwrap();
    assert_eq!(schedule.len(), 1);

    let verified = h.service.verify_audit().unwrap();
    assert_eq!(verified, h.service.audit_trail(None).unwrap().len());
    assert!(verified >= 4);
}

/// Test: Submission → Hold → Sweep → Erasure blocked → Release → Deleted
#[tokio::test]
async fn test_retention_with_legal_hold() {
    let temp_dir = TempDir::new().unwrap();
    let h = open(temp_dir.path(), None).await;
    let stored_at = now();

    let scheduled = h
        .service
        .store_submission(submission("sub-1", Industry::General, stored_at))
        .await
        .unwrap();
    assert_eq!(scheduled.delete_at, Some(stored_at + Duration::days(30)));
    assert_eq!(scheduled.notify_at, Some(stored_at + Duration::days(23)));

    let hold = h
        .service
        .apply_legal_hold("sub-1", "CASE-2024-17", stored_at + Duration::days(1))
        .await
        .unwrap()
        .hold;

    let deadline = stored_at + Duration::days(30);
    let sweep = h.service.retention_tick(deadline).await.unwrap();
    assert_eq!(sweep.notified, vec!["sub-1".to_string()]);
    assert_eq!(sweep.held, vec!["sub-1".to_string()]);
    assert!(h.purger.purged().is_empty());

    let held = h
        .service
        .deletion_schedule("contact-form", Some(DeletionState::Held))
        .await
        .unwrap();
    assert_eq!(held.len(), 1);

    let erasure = h
        .service
        .request_erasure(
            ErasureRequest {
                user_id: "user-42".to_string(),
                submission_ids: None,
            },
            deadline,
        )
        .await
        .unwrap();
    assert!(!erasure.accepted);
    assert_eq!(erasure.blocked_by_hold_ids, vec![hold.hold_id.clone()]);

    let (released, rechecked) = h
        .service
        .release_legal_hold(&hold.hold_id, deadline + Duration::days(2))
        .await
        .unwrap();
    assert!(released.released_at.is_some());
    assert_eq!(rechecked[0].state, DeletionState::Executed);
    assert_eq!(h.purger.purged(), vec!["sub-1".to_string()]);

    let trail: Vec<AuditOutcome> = h
        .service
        .audit_trail(Some("sub-1"))
        .unwrap()
        .into_iter()
        .map(|e| e.outcome)
        .collect();
    assert_eq!(
        trail,
        vec![
            AuditOutcome::Scheduled,
            AuditOutcome::Notified,
            AuditOutcome::Held,
            AuditOutcome::Executed
        ]
    );
    h.service.verify_audit().unwrap();
}

/// Test: regulated industries keep records until erased explicitly
#[tokio::test]
async fn test_healthcare_submission_erased_on_request() {
    let temp_dir = TempDir::new().unwrap();
    let h = open(temp_dir.path(), None).await;
    let stored_at = now();

    let scheduled = h
        .service
        .store_submission(submission("sub-1", Industry::Healthcare, stored_at))
        .await
        .unwrap();
    assert_eq!(scheduled.delete_at, None);

    let sweep = h
        .service
        .retention_tick(stored_at + Duration::days(3650))
        .await
        .unwrap();
    assert!(sweep.is_empty());

    let erasure = h
        .service
        .request_erasure(
            ErasureRequest {
                user_id: "user-42".to_string(),
                submission_ids: Some(vec!["sub-1".to_string()]),
            },
            stored_at + Duration::days(10),
        )
        .await
        .unwrap();
    assert!(erasure.accepted);
    assert_eq!(erasure.erased, vec!["sub-1".to_string()]);
    assert_eq!(h.purger.purged(), vec!["sub-1".to_string()]);
}

/// Test: config file values flow into the engines
#[tokio::test]
async fn test_config_minimum_payout() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = AppConfig::default();
    config.payout.minimum_payout = MinorUnits::new(10_000).unwrap();
    let h = open(temp_dir.path(), Some(config)).await;
    let now = now();

    h.service
        .ingest_sale(sale("sale-1", 9900, now - Duration::days(40)), fee(290))
        .await
        .unwrap();
    let report = h.service.run_payout_cycle(now).await.unwrap();
    assert!(report.formed.is_empty());

    h.service
        .ingest_sale(sale("sale-2", 9900, now - Duration::days(35)), fee(290))
        .await
        .unwrap();
    let report = h.service.run_payout_cycle(now).await.unwrap();
    assert_eq!(report.formed.len(), 1);

    let batch = &h.service.payouts("creator-1", None).await.unwrap()[0];
    assert_eq!(batch.amount.value(), 6937 * 2);
}
