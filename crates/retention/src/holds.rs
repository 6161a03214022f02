//! Legal Hold Registry
//!
//! A hold targets one submission or a `*` glob over submission ids. While
//! any hold with `released_at == None` matches a submission, that
//! submission must not be deleted.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use settle_audit::{AuditLog, AuditOutcome, AuditSubject, NewAuditEntry};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::{RetentionError, RetentionResult};
use crate::store::{parse_ts, ts};

/// What a hold covers
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum HoldTarget {
    Submission(String),
    /// Glob over submission ids; `*` matches any run of characters
    Pattern(String),
}

impl HoldTarget {
    pub fn parse(s: &str) -> RetentionResult<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(RetentionError::InvalidHoldTarget(
                "hold target cannot be empty".to_string(),
            ));
        }
        if s.contains('*') {
            Ok(HoldTarget::Pattern(s.to_string()))
        } else {
            Ok(HoldTarget::Submission(s.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            HoldTarget::Submission(s) | HoldTarget::Pattern(s) => s,
        }
    }

    pub fn matches(&self, submission_id: &str) -> bool {
        match self {
            HoldTarget::Submission(id) => id == submission_id,
            HoldTarget::Pattern(pattern) => glob_match(pattern, submission_id),
        }
    }
}

impl fmt::Display for HoldTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<HoldTarget> for String {
    fn from(target: HoldTarget) -> Self {
        target.as_str().to_string()
    }
}

impl TryFrom<String> for HoldTarget {
    type Error = RetentionError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        HoldTarget::parse(&s)
    }
}

/// `*`-only glob match
fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if pi < p.len() && p[pi] == t[ti] {
            pi += 1;
            ti += 1;
        } else if let Some((sp, st)) = star {
            pi = sp + 1;
            ti = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    p[pi..].iter().all(|c| *c == '*')
}

/// A legal hold tied to a case reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegalHold {
    pub hold_id: String,
    pub target: HoldTarget,
    pub case_reference: String,
    pub applied_at: DateTime<Utc>,
    pub released_at: Option<DateTime<Utc>>,
}

impl LegalHold {
    pub fn is_active(&self) -> bool {
        self.released_at.is_none()
    }
}

/// SQLite storage for legal holds
pub struct HoldStore {
    conn: Connection,
}

impl HoldStore {
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
            "CREATE TABLE IF NOT EXISTS legal_holds (
                hold_id TEXT PRIMARY KEY,
                target TEXT NOT NULL,
                case_reference TEXT NOT NULL,
                applied_at TEXT NOT NULL,
                released_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_legal_holds_active
                ON legal_holds(released_at);",
        )?;
        Ok(())
    }

    pub fn save(&self, hold: &LegalHold) -> RetentionResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO legal_holds
             (hold_id, target, case_reference, applied_at, released_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                hold.hold_id,
                hold.target.as_str(),
                hold.case_reference,
                ts(&hold.applied_at),
                hold.released_at.as_ref().map(ts),
            ],
        )?;
        Ok(())
    }

    pub fn get(&self, hold_id: &str) -> RetentionResult<Option<LegalHold>> {
        let raw = self
            .conn
            .query_row(
                "SELECT hold_id, target, case_reference, applied_at, released_at
                 FROM legal_holds WHERE hold_id = ?1",
                params![hold_id],
                RawHold::from_row,
            )
            .optional()?;
        raw.map(RawHold::into_hold).transpose()
    }

    /// Open hold on exactly this target and case, if any
    pub fn find_open(&self, target: &HoldTarget, case_reference: &str) -> RetentionResult<Option<LegalHold>> {
        let raw = self
            .conn
            .query_row(
                "SELECT hold_id, target, case_reference, applied_at, released_at
                 FROM legal_holds
                 WHERE target = ?1 AND case_reference = ?2 AND released_at IS NULL
                 LIMIT 1",
                params![target.as_str(), case_reference],
                RawHold::from_row,
            )
            .optional()?;
        raw.map(RawHold::into_hold).transpose()
    }

    pub fn list(&self, active_only: bool) -> RetentionResult<Vec<LegalHold>> {
        let sql = if active_only {
            "SELECT hold_id, target, case_reference, applied_at, released_at
             FROM legal_holds WHERE released_at IS NULL ORDER BY applied_at, hold_id"
        } else {
            "SELECT hold_id, target, case_reference, applied_at, released_at
             FROM legal_holds ORDER BY applied_at, hold_id"
        };
        let mut stmt = self.conn.prepare(sql)?;
        let raws = stmt
            .query_map([], RawHold::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        raws.into_iter().map(RawHold::into_hold).collect()
    }
}

struct RawHold {
    hold_id: String,
    target: String,
    case_reference: String,
    applied_at: String,
    released_at: Option<String>,
}

impl RawHold {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            hold_id: row.get(0)?,
            target: row.get(1)?,
            case_reference: row.get(2)?,
            applied_at: row.get(3)?,
            released_at: row.get(4)?,
        })
    }

    fn into_hold(self) -> RetentionResult<LegalHold> {
        let applied_at = parse_ts(&self.hold_id, &self.applied_at)?;
        let released_at = self
            .released_at
            .as_deref()
            .map(|s| parse_ts(&self.hold_id, s))
            .transpose()?;
        Ok(LegalHold {
            target: HoldTarget::parse(&self.target)?,
            hold_id: self.hold_id,
            case_reference: self.case_reference,
            applied_at,
            released_at,
        })
    }
}

/// Result of `apply`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HoldApplied {
    pub hold: LegalHold,
    /// False when an identical open hold already existed
    pub created: bool,
}

/// Registry of legal holds; every change is audit-logged
pub struct LegalHoldRegistry {
    store: Mutex<HoldStore>,
    audit: Arc<AuditLog>,
}

impl LegalHoldRegistry {
    pub fn new(store: HoldStore, audit: Arc<AuditLog>) -> Self {
        Self {
            store: Mutex::new(store),
            audit,
        }
    }

    /// Place a hold. Re-applying an open hold on the same target and case
    /// is a no-op that returns the existing hold.
    pub async fn apply(
        &self,
        target: &str,
        case_reference: &str,
        now: DateTime<Utc>,
    ) -> RetentionResult<HoldApplied> {
        let target = HoldTarget::parse(target)?;
        let store = self.store.lock().await;

        if let Some(existing) = store.find_open(&target, case_reference)? {
            self.audit.append(NewAuditEntry::at(
                AuditSubject::Hold,
                existing.hold_id.as_str(),
                AuditOutcome::AlreadyApplied,
                format!("target={} case={}", target, case_reference),
                now,
            ))?;
            return Ok(HoldApplied {
                hold: existing,
                created: false,
            });
        }

        let hold = LegalHold {
            hold_id: format!("LH-{}", uuid::Uuid::new_v4().to_string()[..8].to_uppercase()),
            target,
            case_reference: case_reference.to_string(),
            applied_at: now,
            released_at: None,
        };
        store.save(&hold)?;
        drop(store);

        self.audit.append(NewAuditEntry::at(
            AuditSubject::Hold,
            hold.hold_id.as_str(),
            AuditOutcome::Applied,
            format!("target={} case={}", hold.target, hold.case_reference),
            now,
        ))?;
        info!(
            hold_id = %hold.hold_id,
            target = %hold.target,
            case_reference = %hold.case_reference,
            "Legal hold applied"
        );
        Ok(HoldApplied {
            hold,
            created: true,
        })
    }

    /// Release a hold; releasing twice keeps the first release time
    pub async fn release(&self, hold_id: &str, now: DateTime<Utc>) -> RetentionResult<LegalHold> {
        let store = self.store.lock().await;
        let mut hold = store
            .get(hold_id)?
            .ok_or_else(|| RetentionError::HoldNotFound(hold_id.to_string()))?;

        if !hold.is_active() {
            warn!(hold_id = %hold_id, "Legal hold already released");
            return Ok(hold);
        }

        hold.released_at = Some(now);
        store.save(&hold)?;
        drop(store);

        self.audit.append(NewAuditEntry::at(
            AuditSubject::Hold,
            hold_id,
            AuditOutcome::Released,
            format!("target={} case={}", hold.target, hold.case_reference),
            now,
        ))?;
        info!(hold_id = %hold_id, target = %hold.target, "Legal hold released");
        Ok(hold)
    }

    /// Open holds that cover a submission
    pub async fn active_holds_for(&self, submission_id: &str) -> RetentionResult<Vec<LegalHold>> {
        let holds = self.store.lock().await.list(true)?;
        Ok(holds
            .into_iter()
            .filter(|h| h.target.matches(submission_id))
            .collect())
    }

    pub async fn list_holds(&self, active_only: bool) -> RetentionResult<Vec<LegalHold>> {
        self.store.lock().await.list(active_only)
    }

    pub async fn get(&self, hold_id: &str) -> RetentionResult<Option<LegalHold>> {
        self.store.lock().await.get(hold_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, SubsecRound};

    fn registry() -> (LegalHoldRegistry, Arc<AuditLog>) {
        let audit = Arc::new(AuditLog::in_memory());
        let registry = LegalHoldRegistry::new(HoldStore::in_memory().unwrap(), Arc::clone(&audit));
        (registry, audit)
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("form-1/*", "form-1/sub-9"));
        assert!(glob_match("*", "anything"));
        assert!(glob_match("*-7", "sub-7"));
        assert!(glob_match("a*b*c", "aXXbYYc"));
        assert!(!glob_match("form-1/*", "form-2/sub-9"));
        assert!(!glob_match("a*b", "aXXc"));
    }

    #[test]
    fn test_target_parse() {
        assert_eq!(
            HoldTarget::parse("sub-1").unwrap(),
            HoldTarget::Submission("sub-1".into())
        );
        assert_eq!(
            HoldTarget::parse("form-1/*").unwrap(),
            HoldTarget::Pattern("form-1/*".into())
        );
        assert!(HoldTarget::parse("  ").is_err());
        assert!(!HoldTarget::parse("sub-1").unwrap().matches("sub-10"));
    }

    #[tokio::test]
    async fn test_apply_is_idempotent_and_audited() {
        let (registry, audit) = registry();
        let now = Utc::now();

        let first = registry.apply("sub-1", "CASE-42", now).await.unwrap();
        assert!(first.created);
        let again = registry.apply("sub-1", "CASE-42", now).await.unwrap();
        assert!(!again.created);
        assert_eq!(again.hold.hold_id, first.hold.hold_id);

        assert_eq!(registry.list_holds(false).await.unwrap().len(), 1);

        let outcomes: Vec<AuditOutcome> = audit
            .entries_for(&first.hold.hold_id)
            .unwrap()
            .into_iter()
            .map(|e| e.outcome)
            .collect();
        assert_eq!(outcomes, vec![AuditOutcome::Applied, AuditOutcome::AlreadyApplied]);
    }

    #[tokio::test]
    async fn test_release_and_active_lookup() {
        let (registry, _) = registry();
        let now = Utc::now().trunc_subsecs(6);
        let pattern = registry.apply("form-1/*", "CASE-1", now).await.unwrap().hold;
        let single = registry.apply("form-1/sub-2", "CASE-2", now).await.unwrap().hold;

        assert_eq!(registry.active_holds_for("form-1/sub-2").await.unwrap().len(), 2);
        assert!(registry.active_holds_for("form-2/sub-2").await.unwrap().is_empty());

        let released = registry
            .release(&pattern.hold_id, now + Duration::days(1))
            .await
            .unwrap();
        assert!(!released.is_active());

        let active = registry.active_holds_for("form-1/sub-2").await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].hold_id, single.hold_id);
        assert_eq!(registry.list_holds(true).await.unwrap().len(), 1);

        // Releasing again keeps the original release time
        let again = registry
            .release(&pattern.hold_id, now + Duration::days(5))
            .await
            .unwrap();
        assert_eq!(again.released_at, released.released_at);

        // A released hold can be re-applied as a new hold
        let reapplied = registry.apply("form-1/*", "CASE-1", now).await.unwrap();
        assert!(reapplied.created);
    }

    #[tokio::test]
    async fn test_release_unknown_hold() {
        let (registry, _) = registry();
        assert!(matches!(
            registry.release("LH-NOPE", Utc::now()).await,
            Err(RetentionError::HoldNotFound(_))
        ));
    }
}
