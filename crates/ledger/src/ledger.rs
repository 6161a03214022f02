//! Sales ledger - partition map of single-writer shards

use chrono::{DateTime, Utc};
use settle_commission::{compute, RateTable};
use settle_core::{ExchangeRates, FixedRates, MinorUnits};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::balance::{aggregate, CreatorBalance};
use crate::config::LedgerConfig;
use crate::error::{LedgerError, LedgerResult};
use crate::log::ShardLog;
use crate::partition::{Shard, ShardState};
use crate::sale::{RecordOutcome, SaleEvent, SaleRecord};

/// A creator's sales as seen by settlement, with their paid markers
#[derive(Debug, Clone, Default)]
pub struct SalesSnapshot {
    pub sales: Vec<SaleRecord>,
    /// Sale ids already paid out
    pub settled: HashSet<String>,
    /// Shards that could not be read; their sales are absent
    pub unavailable_partitions: Vec<usize>,
}

impl SalesSnapshot {
    pub fn is_partial(&self) -> bool {
        !self.unavailable_partitions.is_empty()
    }
}

/// Exactly-once sale ledger.
///
/// Templates are mapped onto `shard_count` shards by a stable SHA-256 hash
/// of the template id. Each shard serializes its own writes; different
/// shards never contend.
pub struct SalesLedger {
    shards: Vec<Arc<Shard>>,
    config: LedgerConfig,
    rates: RateTable,
    fx: Arc<dyn ExchangeRates>,
}

impl SalesLedger {
    /// Create a ledger whose shards live only in memory (for testing)
    pub fn in_memory(config: LedgerConfig, rates: RateTable) -> Self {
        let shard_count = config.shard_count.max(1);
        let shards = (0..shard_count)
            .map(|i| Arc::new(Shard::new(i, ShardState::new(None))))
            .collect();
        Self {
            shards,
            config,
            rates,
            fx: Arc::new(FixedRates::new()),
        }
    }

    /// Open a ledger backed by one JSONL log per shard in `dir`, replaying
    /// existing logs
    pub fn open(dir: impl AsRef<Path>, config: LedgerConfig, rates: RateTable) -> LedgerResult<Self> {
        let dir = dir.as_ref();
        let shard_count = config.shard_count.max(1);
        let mut shards = Vec::with_capacity(shard_count);
        let mut replayed = 0;

        for i in 0..shard_count {
            let log = ShardLog::open(dir, i)?;
            let mut state = ShardState::new(Some(log));
            replayed += state.replay()?;
            shards.push(Arc::new(Shard::new(i, state)));
        }

        info!(dir = %dir.display(), shards = shard_count, entries = replayed, "Sales ledger opened");

        Ok(Self {
            shards,
            config,
            rates,
            fx: Arc::new(FixedRates::new()),
        })
    }

    /// Use an injected exchange-rate source for balance reporting
    pub fn with_exchange_rates(mut self, fx: Arc<dyn ExchangeRates>) -> Self {
        self.fx = fx;
        self
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn rates(&self) -> &RateTable {
        &self.rates
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Shard that owns a template
    pub fn shard_for(&self, template_id: &str) -> usize {
        let digest = Sha256::digest(template_id.as_bytes());
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        (u64::from_be_bytes(prefix) % self.shards.len() as u64) as usize
    }

    /// Operator switch declaring a shard up or down
    pub fn set_partition_available(&self, shard: usize, available: bool) {
        if let Some(s) = self.shards.get(shard) {
            if !available {
                warn!(shard, "Partition marked unavailable");
            }
            s.set_available(available);
        }
    }

    /// Record a sale exactly once.
    ///
    /// A repeated `sale_id` returns the existing record unchanged, whatever
    /// `processor_fee` the retry carries. Writes to an unavailable shard are
    /// retried under the configured backoff before failing with
    /// `PartitionUnavailable`.
    pub async fn record_sale(
        &self,
        event: SaleEvent,
        processor_fee: MinorUnits,
    ) -> LedgerResult<RecordOutcome> {
        event.validate()?;
        let shard = &self.shards[self.shard_for(&event.template_id)];

        let mut attempt = 1;
        while let Err(e) = shard.ensure_available() {
            if !self.config.write_retry.should_retry(attempt) {
                warn!(sale_id = %event.sale_id, shard = shard.index(), attempts = attempt, "Sale write failed: partition unavailable");
                return Err(e);
            }
            tokio::time::sleep(self.config.write_retry.backoff_for(attempt)).await;
            attempt += 1;
        }

        let mut state = shard.state.write().await;

        if let Some(existing) = state.get(&event.sale_id) {
            debug!(sale_id = %event.sale_id, "Duplicate sale ingestion ignored");
            return Ok(RecordOutcome::Duplicate(existing.clone()));
        }

        let commission = compute(
            event.gross_amount,
            event.creator_tier,
            &event.category,
            processor_fee,
            &self.rates,
        );
        let recorded_at = Utc::now();
        let record = SaleRecord {
            sequence: state.next_sequence(),
            occurred_at: event.occurred_at.unwrap_or(recorded_at),
            recorded_at,
            sale_id: event.sale_id,
            template_id: event.template_id,
            buyer_id: event.buyer_id,
            creator_id: event.creator_id,
            gross_amount: event.gross_amount,
            currency: event.currency,
            creator_tier: event.creator_tier,
            category: event.category,
            commission,
        };

        state.append_sale(record.clone())?;

        info!(
            sale_id = %record.sale_id,
            template_id = %record.template_id,
            shard = shard.index(),
            sequence = record.sequence,
            creator_earnings = %record.commission.creator_earnings,
            "Sale recorded"
        );

        Ok(RecordOutcome::Recorded(record))
    }

    /// Look up a single sale in the shard owning its template
    pub async fn get_sale(&self, template_id: &str, sale_id: &str) -> LedgerResult<Option<SaleRecord>> {
        let shard = &self.shards[self.shard_for(template_id)];
        shard.ensure_available()?;
        let state = shard.state.read().await;
        Ok(state.get(sale_id).cloned())
    }

    /// Sales of a template after `since_sequence`, in append order.
    ///
    /// Pass the last seen `sequence` to resume.
    pub async fn list_sales(
        &self,
        template_id: &str,
        since_sequence: Option<u64>,
        limit: Option<usize>,
    ) -> LedgerResult<Vec<SaleRecord>> {
        let shard = &self.shards[self.shard_for(template_id)];
        shard.ensure_available()?;
        let state = shard.state.read().await;
        let mut records = state.template_records_since(template_id, since_sequence.unwrap_or(0));
        if let Some(limit) = limit {
            records.truncate(limit);
        }
        Ok(records)
    }

    /// Balance of a creator across every shard.
    ///
    /// Shards are read concurrently, each bounded by the read timeout. A
    /// shard that is down or too slow makes the result `partial` instead
    /// of failing the query.
    pub async fn get_balance(&self, creator_id: &str) -> LedgerResult<CreatorBalance> {
        let (shard_totals, unavailable) = self
            .scatter(creator_id, |state, creator| state.creator_totals(creator))
            .await;

        Ok(aggregate(
            creator_id,
            &self.config.reporting_currency,
            shard_totals,
            unavailable,
            self.fx.as_ref(),
        ))
    }

    /// All sales of a creator with their paid markers (scatter-gather)
    pub async fn creator_sales(&self, creator_id: &str) -> LedgerResult<SalesSnapshot> {
        let (parts, unavailable) = self
            .scatter(creator_id, |state, creator| {
                let sales: Vec<SaleRecord> = state.creator_records(creator).cloned().collect();
                let settled: Vec<String> = sales
                    .iter()
                    .filter(|r| state.settled_batch(&r.sale_id).is_some())
                    .map(|r| r.sale_id.clone())
                    .collect();
                (sales, settled)
            })
            .await;

        let mut snapshot = SalesSnapshot {
            unavailable_partitions: unavailable,
            ..SalesSnapshot::default()
        };
        for (sales, settled) in parts {
            snapshot.sales.extend(sales);
            snapshot.settled.extend(settled);
        }
        snapshot
            .sales
            .sort_by(|a, b| a.occurred_at.cmp(&b.occurred_at).then(a.sale_id.cmp(&b.sale_id)));
        Ok(snapshot)
    }

    /// Every creator with at least one sale on a reachable shard
    pub async fn creators(&self) -> LedgerResult<Vec<String>> {
        let mut creators = BTreeSet::new();
        for shard in &self.shards {
            if !shard.is_available() {
                continue;
            }
            let state = shard.state.read().await;
            creators.extend(state.creators().cloned());
        }
        Ok(creators.into_iter().collect())
    }

    /// Write a paid batch back to the ledger.
    ///
    /// Idempotent for the same batch. Fails with `AlreadySettled` if any of
    /// the sales was paid by a different batch.
    pub async fn mark_settled(
        &self,
        sale_ids: &[String],
        batch_id: &str,
        settled_at: DateTime<Utc>,
    ) -> LedgerResult<usize> {
        let mut marked = 0;
        for shard in &self.shards {
            shard.ensure_available()?;
            let mut state = shard.state.write().await;
            marked += state.settle(sale_ids, batch_id, settled_at)?;
        }
        if marked > 0 {
            info!(batch_id = %batch_id, sales = marked, "Sales marked settled");
        }
        Ok(marked)
    }

    /// Total records across all shards (diagnostics)
    pub async fn len(&self) -> usize {
        let mut total = 0;
        for shard in &self.shards {
            total += shard.state.read().await.len();
        }
        total
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Run `read` against every shard concurrently with a per-shard timeout.
    ///
    /// Returns the answers of the shards that responded and the indexes of
    /// those that did not.
    async fn scatter<T, F>(&self, creator_id: &str, read: F) -> (Vec<T>, Vec<usize>)
    where
        T: Send + 'static,
        F: Fn(&ShardState, &str) -> T + Send + Sync + Copy + 'static,
    {
        let timeout = self.config.read_timeout();
        let mut tasks = JoinSet::new();

        for shard in &self.shards {
            let shard = Arc::clone(shard);
            let creator = creator_id.to_string();
            tasks.spawn(async move {
                let index = shard.index();
                if shard.ensure_available().is_err() {
                    return (index, None);
                }
                let answer = tokio::time::timeout(timeout, async {
                    let state = shard.state.read().await;
                    read(&state, &creator)
                })
                .await
                .ok();
                (index, answer)
            });
        }

        let mut answers = Vec::with_capacity(self.shards.len());
        let mut unavailable = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Some(answer))) => answers.push(answer),
                Ok((index, None)) => unavailable.push(index),
                Err(e) => warn!(error = %e, "Partition read task failed"),
            }
        }
        unavailable.sort_unstable();
        (answers, unavailable)
    }
}
