//! Settle Compliance Audit Log
//!
//! Append-only record of every deletion, legal hold, erasure request and
//! payout transition. Entries are never mutated or removed; each one is
//! chained to its predecessor by SHA-256 so retroactive edits are
//! detectable with [`verify_chain`].
//!
//! ```text
//! Retention Scheduler ──┐
//! Legal Hold Registry ──┼──► AuditLog (JSONL, hash chain) ──► index by subject_id
//! Settlement Engine  ───┘
//! ```

pub mod entry;
pub mod error;
pub mod hash;
pub mod log;

pub use entry::{AuditEntry, AuditOutcome, AuditSubject, NewAuditEntry};
pub use error::{AuditError, AuditResult};
pub use hash::{calculate_entry_hash, verify_chain, ChainError, GENESIS_HASH};
pub use log::AuditLog;
