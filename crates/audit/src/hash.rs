//! Hash chain utilities for audit log integrity

use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::entry::AuditEntry;

/// `prev_hash` of the first entry
pub const GENESIS_HASH: &str = "GENESIS";

/// SHA-256 over every field except `hash`
pub fn calculate_entry_hash(entry: &AuditEntry) -> String {
    let mut hasher = Sha256::new();

    hasher.update(entry.sequence.to_le_bytes());
    hasher.update(entry.prev_hash.as_bytes());
    hasher.update(entry.entry_id.as_bytes());
    hasher.update(entry.subject_type.as_ref().as_bytes());
    hasher.update(entry.subject_id.as_bytes());
    hasher.update(entry.outcome.as_ref().as_bytes());
    hasher.update(entry.timestamp.to_rfc3339().as_bytes());
    hasher.update(entry.detail.as_bytes());

    hex::encode(hasher.finalize())
}

/// Walk the chain from genesis, checking numbering, links and hashes
pub fn verify_chain(entries: &[AuditEntry]) -> Result<(), ChainError> {
    entries
        .iter()
        .zip(1u64..)
        .try_fold(GENESIS_HASH.to_string(), |prev_hash, (entry, expected)| {
            if entry.sequence != expected {
                return Err(ChainError::InvalidSequence {
                    expected,
                    actual: entry.sequence,
                });
            }
            if entry.prev_hash != prev_hash {
                return Err(ChainError::BrokenLink {
                    sequence: entry.sequence,
                    expected: prev_hash,
                    actual: entry.prev_hash.clone(),
                });
            }
            let calculated = calculate_entry_hash(entry);
            if entry.hash != calculated {
                return Err(ChainError::InvalidHash {
                    sequence: entry.sequence,
                    expected: calculated,
                    actual: entry.hash.clone(),
                });
            }
            Ok(entry.hash.clone())
        })
        .map(|_| ())
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    #[error("Entry {sequence} links to '{actual}', expected '{expected}'")]
    BrokenLink {
        sequence: u64,
        expected: String,
        actual: String,
    },

    #[error("Entry {sequence} hash is '{actual}', recomputed '{expected}'")]
    InvalidHash {
        sequence: u64,
        expected: String,
        actual: String,
    },

    #[error("Entry numbered {actual} where {expected} was expected")]
    InvalidSequence { expected: u64, actual: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{AuditOutcome, AuditSubject};
    use chrono::Utc;

    fn chained(n: u64) -> Vec<AuditEntry> {
        let mut entries = Vec::new();
        let mut prev = GENESIS_HASH.to_string();
        for seq in 1..=n {
            let mut entry = AuditEntry {
                entry_id: format!("AUD-{}", seq),
                sequence: seq,
                subject_type: AuditSubject::Deletion,
                subject_id: format!("sub-{}", seq),
                outcome: AuditOutcome::Executed,
                timestamp: Utc::now(),
                detail: String::new(),
                prev_hash: prev.clone(),
                hash: String::new(),
            };
            entry.hash = calculate_entry_hash(&entry);
            prev = entry.hash.clone();
            entries.push(entry);
        }
        entries
    }

    #[test]
    fn test_valid_chain() {
        assert!(verify_chain(&chained(3)).is_ok());
        assert!(verify_chain(&[]).is_ok());
    }

    #[test]
    fn test_tampered_detail_detected() {
        let mut entries = chained(3);
        entries[1].detail = "rewritten".to_string();
        assert!(matches!(
            verify_chain(&entries),
            Err(ChainError::InvalidHash { sequence: 2, .. })
        ));
    }

    #[test]
    fn test_removed_entry_detected() {
        let mut entries = chained(3);
        entries.remove(1);
        assert!(matches!(
            verify_chain(&entries),
            Err(ChainError::InvalidSequence {
                expected: 2,
                actual: 3
            })
        ));
    }

    #[test]
    fn test_relinked_entry_detected() {
        let mut entries = chained(3);
        entries[2].prev_hash = entries[0].hash.clone();
        assert!(matches!(
            verify_chain(&entries),
            Err(ChainError::BrokenLink { sequence: 3, .. })
        ));
    }
}
