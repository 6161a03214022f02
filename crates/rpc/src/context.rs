//! Application context - wires everything together

use async_trait::async_trait;
use settle_audit::AuditLog;
use settle_ledger::SalesLedger;
use settle_payout::{PaymentProcessor, PayoutEngine, PayoutStore, SandboxProcessor};
use settle_retention::{
    DeletionNotifier, DeletionStore, HoldStore, LegalHoldRegistry, NotifyError, PurgeError,
    RecordPurger, RetentionScheduler, ScheduledDeletion,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::config::AppConfig;

/// Purger for deployments where submission storage lives elsewhere; it
/// records the instruction and reports success
#[derive(Debug, Default)]
pub struct LoggingPurger;

#[async_trait]
impl RecordPurger for LoggingPurger {
    async fn purge(&self, submission_id: &str) -> Result<(), PurgeError> {
        info!(submission_id = %submission_id, "Purge instruction issued");
        Ok(())
    }
}

/// Notifier that logs the owner notice instead of sending mail
#[derive(Debug, Default)]
pub struct LoggingNotifier;

#[async_trait]
impl DeletionNotifier for LoggingNotifier {
    async fn notify(&self, deletion: &ScheduledDeletion) -> Result<(), NotifyError> {
        info!(
            submission_id = %deletion.submission_id,
            form_id = %deletion.form_id,
            delete_at = ?deletion.delete_at,
            "Deletion notice"
        );
        Ok(())
    }
}

/// Application context - every component over one data directory
pub struct AppContext {
    pub config: AppConfig,
    pub ledger: Arc<SalesLedger>,
    pub payouts: PayoutEngine,
    pub retention: RetentionScheduler,
    pub audit: Arc<AuditLog>,
    data_path: PathBuf,
}

impl AppContext {
    /// Default configuration rooted at `data_path`
    pub async fn new(data_path: impl AsRef<Path>) -> Result<Self, anyhow::Error> {
        Self::open(AppConfig::for_data_dir(data_path.as_ref())).await
    }

    /// Open with the sandbox processor and logging collaborators
    pub async fn open(config: AppConfig) -> Result<Self, anyhow::Error> {
        Self::with_collaborators(
            config,
            Arc::new(SandboxProcessor::new()),
            Arc::new(LoggingPurger),
            Arc::new(LoggingNotifier),
        )
        .await
    }

    pub async fn with_collaborators(
        config: AppConfig,
        processor: Arc<dyn PaymentProcessor>,
        purger: Arc<dyn RecordPurger>,
        notifier: Arc<dyn DeletionNotifier>,
    ) -> Result<Self, anyhow::Error> {
        let data_path = config.data_dir.clone();
        std::fs::create_dir_all(&data_path)?;

        let audit = Arc::new(AuditLog::open(data_path.join("audit.jsonl"))?);

        // Replays every shard log
        let ledger = Arc::new(
            SalesLedger::open(
                data_path.join("sales"),
                config.ledger.clone(),
                config.rates.clone(),
            )?
            .with_exchange_rates(Arc::new(config.exchange_rates())),
        );

        let payouts = PayoutEngine::new(
            PayoutStore::new(data_path.join("payouts.db"))?,
            Arc::clone(&ledger),
            processor,
            Arc::clone(&audit),
            config.payout.clone(),
        );

        let holds = Arc::new(LegalHoldRegistry::new(
            HoldStore::new(data_path.join("holds.db"))?,
            Arc::clone(&audit),
        ));
        let retention = RetentionScheduler::new(
            DeletionStore::new(data_path.join("retention.db"))?,
            holds,
            purger,
            notifier,
            Arc::clone(&audit),
            config.retention.clone(),
        );

        let sales = ledger.len().await;
        info!(
            data_dir = %data_path.display(),
            shards = ledger.shard_count(),
            sales,
            audit_entries = audit.len()?,
            "Settle context opened"
        );

        Ok(Self {
            config,
            ledger,
            payouts,
            retention,
            audit,
            data_path,
        })
    }

    /// Get data directory
    pub fn data_path(&self) -> &Path {
        &self.data_path
    }
}
