//! Single-writer sale partition (shard)
//!
//! Writes to a shard are serialized by its `RwLock`; readers share the lock
//! and always observe whole records because a record becomes visible only
//! after it has been logged and indexed under the write guard.

use chrono::{DateTime, Utc};
use settle_core::{Currency, MinorUnits};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::error;

use crate::error::{LedgerError, LedgerResult};
use crate::log::{ShardLog, ShardLogEntry};
use crate::sale::SaleRecord;

/// Earned / paid-out totals of one creator in one currency within a shard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct PartitionTotals {
    pub earned: MinorUnits,
    pub paid_out: MinorUnits,
}

#[derive(Default)]
pub(crate) struct ShardState {
    sales: Vec<SaleRecord>,
    by_id: HashMap<String, usize>,
    by_template: HashMap<String, Vec<usize>>,
    by_creator: HashMap<String, Vec<usize>>,
    settled: HashMap<String, String>,
    log: Option<ShardLog>,
}

impl ShardState {
    pub fn new(log: Option<ShardLog>) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    /// Rebuild indexes from the shard's own log
    pub fn replay(&mut self) -> LedgerResult<usize> {
        let entries = match self.log {
            Some(ref log) => log.read_all()?,
            None => return Ok(0),
        };
        let count = entries.len();
        for entry in entries {
            match entry {
                ShardLogEntry::Sale { record } => self.apply_sale(record),
                ShardLogEntry::Settled {
                    sale_ids, batch_id, ..
                } => self.apply_settled(&sale_ids, &batch_id),
            }
        }
        Ok(count)
    }

    pub fn get(&self, sale_id: &str) -> Option<&SaleRecord> {
        self.by_id.get(sale_id).map(|i| &self.sales[*i])
    }

    pub fn next_sequence(&self) -> u64 {
        self.sales.len() as u64 + 1
    }

    /// Log then index a new record
    pub fn append_sale(&mut self, record: SaleRecord) -> LedgerResult<()> {
        if let Some(ref mut log) = self.log {
            log.append(&ShardLogEntry::Sale {
                record: record.clone(),
            })?;
        }
        self.apply_sale(record);
        Ok(())
    }

    fn apply_sale(&mut self, record: SaleRecord) {
        let idx = self.sales.len();
        self.by_id.insert(record.sale_id.clone(), idx);
        self.by_template
            .entry(record.template_id.clone())
            .or_default()
            .push(idx);
        self.by_creator
            .entry(record.creator_id.clone())
            .or_default()
            .push(idx);
        self.sales.push(record);
    }

    /// Mark the sales this shard owns as paid by `batch_id`.
    ///
    /// Returns how many sales were newly marked. Re-marking with the same
    /// batch is a no-op; a sale already paid by another batch is an
    /// integrity violation.
    pub fn settle(
        &mut self,
        sale_ids: &[String],
        batch_id: &str,
        settled_at: DateTime<Utc>,
    ) -> LedgerResult<usize> {
        let mut fresh = Vec::new();
        for sale_id in sale_ids {
            if !self.by_id.contains_key(sale_id) {
                continue;
            }
            match self.settled.get(sale_id) {
                Some(existing) if existing == batch_id => {}
                Some(existing) => {
                    error!(
                        sale_id = %sale_id,
                        existing_batch = %existing,
                        batch_id = %batch_id,
                        "Sale already settled by another batch"
                    );
                    return Err(LedgerError::AlreadySettled {
                        sale_id: sale_id.clone(),
                        batch_id: existing.clone(),
                    });
                }
                None => fresh.push(sale_id.clone()),
            }
        }

        if fresh.is_empty() {
            return Ok(0);
        }

        if let Some(ref mut log) = self.log {
            log.append(&ShardLogEntry::Settled {
                sale_ids: fresh.clone(),
                batch_id: batch_id.to_string(),
                settled_at,
            })?;
        }
        self.apply_settled(&fresh, batch_id);
        Ok(fresh.len())
    }

    fn apply_settled(&mut self, sale_ids: &[String], batch_id: &str) {
        for sale_id in sale_ids {
            self.settled.insert(sale_id.clone(), batch_id.to_string());
        }
    }

    pub fn settled_batch(&self, sale_id: &str) -> Option<&str> {
        self.settled.get(sale_id).map(String::as_str)
    }

    /// Totals for one creator, per currency
    pub fn creator_totals(&self, creator_id: &str) -> BTreeMap<Currency, PartitionTotals> {
        let mut totals: BTreeMap<Currency, PartitionTotals> = BTreeMap::new();
        for record in self.creator_records(creator_id) {
            let entry = totals.entry(record.currency.clone()).or_default();
            let earnings = record.commission.creator_earnings;
            entry.earned = entry.earned.checked_add(earnings).unwrap_or(entry.earned);
            if self.settled.contains_key(&record.sale_id) {
                entry.paid_out = entry.paid_out.checked_add(earnings).unwrap_or(entry.paid_out);
            }
        }
        totals
    }

    pub fn creator_records<'a>(
        &'a self,
        creator_id: &str,
    ) -> impl Iterator<Item = &'a SaleRecord> + 'a {
        self.by_creator
            .get(creator_id)
            .into_iter()
            .flatten()
            .map(move |i| &self.sales[*i])
    }

    /// Records of a template with sequence greater than `since`, in append order
    pub fn template_records_since(&self, template_id: &str, since: u64) -> Vec<SaleRecord> {
        self.by_template
            .get(template_id)
            .into_iter()
            .flatten()
            .map(|i| &self.sales[*i])
            .filter(|r| r.sequence > since)
            .cloned()
            .collect()
    }

    pub fn creators(&self) -> impl Iterator<Item = &String> {
        self.by_creator.keys()
    }

    pub fn len(&self) -> usize {
        self.sales.len()
    }
}

/// A shard: single-writer state plus an operator availability switch
pub struct Shard {
    index: usize,
    available: AtomicBool,
    pub(crate) state: RwLock<ShardState>,
}

impl Shard {
    pub(crate) fn new(index: usize, state: ShardState) -> Self {
        Self {
            index,
            available: AtomicBool::new(true),
            state: RwLock::new(state),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    pub(crate) fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Release);
    }

    pub(crate) fn ensure_available(&self) -> LedgerResult<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(LedgerError::PartitionUnavailable { shard: self.index })
        }
    }
}
