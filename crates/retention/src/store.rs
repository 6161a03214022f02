//! SQLite storage for scheduled deletions

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;

use crate::error::{RetentionError, RetentionResult};
use crate::schedule::{DeletionState, ScheduledDeletion};

const COLUMNS: &str = "submission_id, form_id, subject_user_id, kind, stored_at, event_date,
    policy_json, delete_at, notify_at, notified_at, notification_failed_at, state,
    executed_at, cancel_reason, needs_review";

/// `scheduled_deletions` keyed by `submission_id`, indexed on
/// `(form_id, state)` for schedule queries and on `delete_at` for sweeps
pub struct DeletionStore {
    conn: Connection,
}

impl DeletionStore {
    pub fn new<P: AsRef<Path>>(path: P) -> RetentionResult<Self> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> RetentionResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> RetentionResult<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS scheduled_deletions (
                submission_id TEXT PRIMARY KEY,
                form_id TEXT NOT NULL,
                subject_user_id TEXT,
                kind TEXT NOT NULL,
                stored_at TEXT NOT NULL,
                event_date TEXT,
                policy_json TEXT NOT NULL,
                delete_at TEXT,
                notify_at TEXT,
                notified_at TEXT,
                notification_failed_at TEXT,
                state TEXT NOT NULL,
                executed_at TEXT,
                cancel_reason TEXT,
                needs_review INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_scheduled_deletions_form_state
                ON scheduled_deletions(form_id, state);
            CREATE INDEX IF NOT EXISTS idx_scheduled_deletions_delete_at
                ON scheduled_deletions(delete_at);
            CREATE INDEX IF NOT EXISTS idx_scheduled_deletions_subject
                ON scheduled_deletions(subject_user_id);",
        )?;
        Ok(())
    }

    /// Insert or replace a record
    pub fn save(&self, record: &ScheduledDeletion) -> RetentionResult<()> {
        let policy_json = serde_json::to_string(&record.policy)?;
        self.conn.execute(
            &format!(
                "INSERT OR REPLACE INTO scheduled_deletions ({})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                COLUMNS
            ),
            params![
                record.submission_id,
                record.form_id,
                record.subject_user_id,
                record.kind.as_ref(),
                ts(&record.stored_at),
                record.event_date.as_ref().map(ts),
                policy_json,
                record.delete_at.as_ref().map(ts),
                record.notify_at.as_ref().map(ts),
                record.notified_at.as_ref().map(ts),
                record.notification_failed_at.as_ref().map(ts),
                record.state.as_str(),
                record.executed_at.as_ref().map(ts),
                record.cancel_reason,
                record.needs_review,
            ],
        )?;
        Ok(())
    }

    pub fn get(&self, submission_id: &str) -> RetentionResult<Option<ScheduledDeletion>> {
        let raw = self
            .conn
            .query_row(
                &format!("SELECT {} FROM scheduled_deletions WHERE submission_id = ?1", COLUMNS),
                params![submission_id],
                RawDeletion::from_row,
            )
            .optional()?;
        raw.map(RawDeletion::into_record).transpose()
    }

    /// Schedule of a form, optionally filtered by state
    pub fn list_by_form(
        &self,
        form_id: &str,
        state: Option<DeletionState>,
    ) -> RetentionResult<Vec<ScheduledDeletion>> {
        match state {
            Some(state) => self.query(
                "form_id = ?1 AND state = ?2 ORDER BY stored_at, submission_id",
                params![form_id, state.as_str()],
            ),
            None => self.query(
                "form_id = ?1 ORDER BY stored_at, submission_id",
                params![form_id],
            ),
        }
    }

    /// Pending records whose notice is due and not yet attempted
    pub fn due_notifications(&self, now: DateTime<Utc>) -> RetentionResult<Vec<ScheduledDeletion>> {
        self.query(
            "state = 'pending' AND notify_at IS NOT NULL AND notify_at <= ?1
             AND notified_at IS NULL AND notification_failed_at IS NULL
             ORDER BY notify_at, submission_id",
            params![ts(&now)],
        )
    }

    /// Pending or notified records past their deadline
    pub fn due_deletions(&self, now: DateTime<Utc>) -> RetentionResult<Vec<ScheduledDeletion>> {
        self.query(
            "state IN ('pending', 'notified') AND delete_at IS NOT NULL AND delete_at <= ?1
             ORDER BY delete_at, submission_id",
            params![ts(&now)],
        )
    }

    pub fn list_by_state(&self, state: DeletionState) -> RetentionResult<Vec<ScheduledDeletion>> {
        self.query(
            "state = ?1 ORDER BY stored_at, submission_id",
            params![state.as_str()],
        )
    }

    /// Every submission of a data subject
    pub fn by_subject_user(&self, user_id: &str) -> RetentionResult<Vec<ScheduledDeletion>> {
        self.query(
            "subject_user_id = ?1 ORDER BY stored_at, submission_id",
            params![user_id],
        )
    }

    fn query(
        &self,
        clause: &str,
        params: impl rusqlite::Params,
    ) -> RetentionResult<Vec<ScheduledDeletion>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM scheduled_deletions WHERE {}",
            COLUMNS, clause
        ))?;
        let raws = stmt
            .query_map(params, RawDeletion::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        raws.into_iter().map(RawDeletion::into_record).collect()
    }
}

/// Fixed-width RFC 3339 so that text comparison matches time ordering
pub(crate) fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(id: &str, s: &str) -> RetentionResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| RetentionError::Corrupt {
            id: id.to_string(),
            reason: format!("invalid timestamp {}: {}", s, e),
        })
}

struct RawDeletion {
    submission_id: String,
    form_id: String,
    subject_user_id: Option<String>,
    kind: String,
    stored_at: String,
    event_date: Option<String>,
    policy_json: String,
    delete_at: Option<String>,
    notify_at: Option<String>,
    notified_at: Option<String>,
    notification_failed_at: Option<String>,
    state: String,
    executed_at: Option<String>,
    cancel_reason: Option<String>,
    needs_review: bool,
}

impl RawDeletion {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            submission_id: row.get(0)?,
            form_id: row.get(1)?,
            subject_user_id: row.get(2)?,
            kind: row.get(3)?,
            stored_at: row.get(4)?,
            event_date: row.get(5)?,
            policy_json: row.get(6)?,
            delete_at: row.get(7)?,
            notify_at: row.get(8)?,
            notified_at: row.get(9)?,
            notification_failed_at: row.get(10)?,
            state: row.get(11)?,
            executed_at: row.get(12)?,
            cancel_reason: row.get(13)?,
            needs_review: row.get(14)?,
        })
    }

    fn into_record(self) -> RetentionResult<ScheduledDeletion> {
        let id = self.submission_id.as_str();
        let opt = |s: &Option<String>| s.as_deref().map(|v| parse_ts(id, v)).transpose();
        let corrupt = |reason: String| RetentionError::Corrupt {
            id: id.to_string(),
            reason,
        };

        let record = ScheduledDeletion {
            kind: self
                .kind
                .parse()
                .map_err(|_| corrupt(format!("invalid kind {}", self.kind)))?,
            state: DeletionState::from_str(&self.state)
                .ok_or_else(|| corrupt(format!("invalid state {}", self.state)))?,
            policy: serde_json::from_str(&self.policy_json)?,
            stored_at: parse_ts(id, &self.stored_at)?,
            event_date: opt(&self.event_date)?,
            delete_at: opt(&self.delete_at)?,
            notify_at: opt(&self.notify_at)?,
            notified_at: opt(&self.notified_at)?,
            notification_failed_at: opt(&self.notification_failed_at)?,
            executed_at: opt(&self.executed_at)?,
            submission_id: self.submission_id.clone(),
            form_id: self.form_id.clone(),
            subject_user_id: self.subject_user_id.clone(),
            cancel_reason: self.cancel_reason.clone(),
            needs_review: self.needs_review,
        };
        Ok(record)
    }
}
