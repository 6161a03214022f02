//! SQLite storage for payout batches

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use settle_core::{Currency, MinorUnits};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

use crate::batch::{BatchStatus, PayoutBatch};

/// Errors from the payout store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Batch not found: {0}")]
    NotFound(String),

    #[error("Corrupt row for batch {batch_id}: {reason}")]
    Corrupt { batch_id: String, reason: String },
}

/// SQLite storage for payout batches.
///
/// `payout_batches` is keyed by `batch_id` with a secondary index on
/// `(creator_id, status)`; `batch_sales` holds batch membership.
pub struct PayoutStore {
    conn: Connection,
}

impl PayoutStore {
    /// Create a new store with the given database path
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS payout_batches (
                batch_id TEXT PRIMARY KEY,
                creator_id TEXT NOT NULL,
                amount INTEGER NOT NULL,
                currency TEXT NOT NULL,
                status TEXT NOT NULL,
                external_reference TEXT,
                created_at TEXT NOT NULL,
                submitted_at TEXT,
                settled_at TEXT,
                failure_reason TEXT,
                needs_reconciliation INTEGER NOT NULL DEFAULT 0,
                ledger_synced INTEGER NOT NULL DEFAULT 0,
                retry_of TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_payout_batches_creator_status
                ON payout_batches(creator_id, status);
            CREATE TABLE IF NOT EXISTS batch_sales (
                batch_id TEXT NOT NULL REFERENCES payout_batches(batch_id),
                sale_id TEXT NOT NULL,
                PRIMARY KEY (batch_id, sale_id)
            );
            CREATE INDEX IF NOT EXISTS idx_batch_sales_sale ON batch_sales(sale_id);",
        )?;
        Ok(())
    }

    /// Insert a new batch and its membership atomically.
    ///
    /// Returns the id of a conflicting active batch instead of inserting
    /// when any member sale is already claimed.
    pub fn insert(&self, batch: &PayoutBatch) -> Result<Option<(String, String)>, StoreError> {
        let tx = self.conn.unchecked_transaction()?;

        for sale_id in &batch.sale_ids {
            if let Some(existing) = active_batch_for_sale(&tx, sale_id)? {
                return Ok(Some((sale_id.clone(), existing)));
            }
        }

        tx.execute(
            "INSERT INTO payout_batches
             (batch_id, creator_id, amount, currency, status, external_reference, created_at,
              submitted_at, settled_at, failure_reason, needs_reconciliation, ledger_synced, retry_of)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                batch.batch_id,
                batch.creator_id,
                batch.amount.value(),
                batch.currency.code(),
                batch.status.as_str(),
                batch.external_reference,
                ts(&batch.created_at),
                batch.submitted_at.as_ref().map(ts),
                batch.settled_at.as_ref().map(ts),
                batch.failure_reason,
                batch.needs_reconciliation,
                batch.ledger_synced,
                batch.retry_of,
            ],
        )?;

        for sale_id in &batch.sale_ids {
            tx.execute(
                "INSERT INTO batch_sales (batch_id, sale_id) VALUES (?1, ?2)",
                params![batch.batch_id, sale_id],
            )?;
        }

        tx.commit()?;
        Ok(None)
    }

    /// Persist the mutable fields of an existing batch
    pub fn update(&self, batch: &PayoutBatch) -> Result<(), StoreError> {
        let rows = self.conn.execute(
            "UPDATE payout_batches SET
                status = ?1, external_reference = ?2, submitted_at = ?3, settled_at = ?4,
                failure_reason = ?5, needs_reconciliation = ?6, ledger_synced = ?7
             WHERE batch_id = ?8",
            params![
                batch.status.as_str(),
                batch.external_reference,
                batch.submitted_at.as_ref().map(ts),
                batch.settled_at.as_ref().map(ts),
                batch.failure_reason,
                batch.needs_reconciliation,
                batch.ledger_synced,
                batch.batch_id,
            ],
        )?;

        if rows == 0 {
            return Err(StoreError::NotFound(batch.batch_id.clone()));
        }
        Ok(())
    }

    /// Get a batch by ID
    pub fn get(&self, batch_id: &str) -> Result<PayoutBatch, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT batch_id, creator_id, amount, currency, status, external_reference,
                        created_at, submitted_at, settled_at, failure_reason,
                        needs_reconciliation, ledger_synced, retry_of
                 FROM payout_batches WHERE batch_id = ?1",
                params![batch_id],
                |row| {
                    Ok(BatchRow {
                        batch_id: row.get(0)?,
                        creator_id: row.get(1)?,
                        amount: row.get(2)?,
                        currency: row.get(3)?,
                        status: row.get(4)?,
                        external_reference: row.get(5)?,
                        created_at: row.get(6)?,
                        submitted_at: row.get(7)?,
                        settled_at: row.get(8)?,
                        failure_reason: row.get(9)?,
                        needs_reconciliation: row.get(10)?,
                        ledger_synced: row.get(11)?,
                        retry_of: row.get(12)?,
                    })
                },
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound(batch_id.to_string()),
                other => StoreError::Database(other),
            })?;

        let mut stmt = self
            .conn
            .prepare("SELECT sale_id FROM batch_sales WHERE batch_id = ?1 ORDER BY sale_id")?;
        let sale_ids = stmt
            .query_map(params![batch_id], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;

        row.into_batch(sale_ids)
    }

    /// Batches of a creator, newest first, optionally filtered by status
    pub fn list_by_creator(
        &self,
        creator_id: &str,
        status: Option<BatchStatus>,
    ) -> Result<Vec<PayoutBatch>, StoreError> {
        let ids: Vec<String> = match status {
            Some(status) => {
                let mut stmt = self.conn.prepare(
                    "SELECT batch_id FROM payout_batches WHERE creator_id = ?1 AND status = ?2
                     ORDER BY created_at DESC, batch_id DESC",
                )?;
                let rows = stmt.query_map(params![creator_id, status.as_str()], |row| row.get(0))?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
            None => {
                let mut stmt = self.conn.prepare(
                    "SELECT batch_id FROM payout_batches WHERE creator_id = ?1
                     ORDER BY created_at DESC, batch_id DESC",
                )?;
                let rows = stmt.query_map(params![creator_id], |row| row.get(0))?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
        };

        ids.iter().map(|id| self.get(id)).collect()
    }

    /// All batches with a specific status, oldest first
    pub fn list_by_status(&self, status: BatchStatus) -> Result<Vec<PayoutBatch>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT batch_id FROM payout_batches WHERE status = ?1 ORDER BY created_at, batch_id",
        )?;
        let ids: Vec<String> = stmt
            .query_map(params![status.as_str()], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;

        ids.iter().map(|id| self.get(id)).collect()
    }

    /// Paid batches whose outcome has not reached the sales ledger yet
    pub fn list_unsynced_paid(&self) -> Result<Vec<PayoutBatch>, StoreError> {
        Ok(self
            .list_by_status(BatchStatus::Paid)?
            .into_iter()
            .filter(|b| !b.ledger_synced)
            .collect())
    }

    /// Sale ids of a creator held by formed, submitted or paid batches
    pub fn claimed_sale_ids(&self, creator_id: &str) -> Result<HashSet<String>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT s.sale_id FROM batch_sales s
             JOIN payout_batches b ON b.batch_id = s.batch_id
             WHERE b.creator_id = ?1 AND b.status IN ('formed', 'submitted', 'paid')",
        )?;
        let ids = stmt
            .query_map(params![creator_id], |row| row.get(0))?
            .collect::<Result<HashSet<String>, _>>()?;
        Ok(ids)
    }

    /// Active batch a sale belongs to, if any
    pub fn active_batch_for(&self, sale_id: &str) -> Result<Option<String>, StoreError> {
        active_batch_for_sale(&self.conn, sale_id)
    }

    /// Count batches by status
    pub fn count_by_status(&self, status: BatchStatus) -> Result<usize, StoreError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM payout_batches WHERE status = ?1",
            params![status.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

fn active_batch_for_sale(conn: &Connection, sale_id: &str) -> Result<Option<String>, StoreError> {
    let batch_id = conn
        .query_row(
            "SELECT b.batch_id FROM batch_sales s
             JOIN payout_batches b ON b.batch_id = s.batch_id
             WHERE s.sale_id = ?1 AND b.status IN ('formed', 'submitted', 'paid')
             LIMIT 1",
            params![sale_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(batch_id)
}

/// Fixed-width RFC 3339 so that text ordering matches time ordering
fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

struct BatchRow {
    batch_id: String,
    creator_id: String,
    amount: i64,
    currency: String,
    status: String,
    external_reference: Option<String>,
    created_at: String,
    submitted_at: Option<String>,
    settled_at: Option<String>,
    failure_reason: Option<String>,
    needs_reconciliation: bool,
    ledger_synced: bool,
    retry_of: Option<String>,
}

impl BatchRow {
    fn into_batch(self, sale_ids: Vec<String>) -> Result<PayoutBatch, StoreError> {
        let corrupt = |reason: String| StoreError::Corrupt {
            batch_id: self.batch_id.clone(),
            reason,
        };
        let parse_ts = |s: &str| {
            DateTime::parse_from_rfc3339(s)
                .map(|d| d.with_timezone(&Utc))
                .map_err(|e| corrupt(format!("invalid timestamp {}: {}", s, e)))
        };

        let amount = MinorUnits::new(self.amount).map_err(|e| corrupt(e.to_string()))?;
        let currency: Currency = self.currency.parse().map_err(|e| corrupt(format!("{}", e)))?;
        let status = BatchStatus::from_str(&self.status)
            .ok_or_else(|| corrupt(format!("invalid status {}", self.status)))?;
        let created_at = parse_ts(&self.created_at)?;
        let submitted_at = self.submitted_at.as_deref().map(parse_ts).transpose()?;
        let settled_at = self.settled_at.as_deref().map(parse_ts).transpose()?;

        Ok(PayoutBatch {
            batch_id: self.batch_id.clone(),
            creator_id: self.creator_id.clone(),
            sale_ids,
            amount,
            currency,
            status,
            external_reference: self.external_reference.clone(),
            created_at,
            submitted_at,
            settled_at,
            failure_reason: self.failure_reason.clone(),
            needs_reconciliation: self.needs_reconciliation,
            ledger_synced: self.ledger_synced,
            retry_of: self.retry_of.clone(),
        })
    }
}
