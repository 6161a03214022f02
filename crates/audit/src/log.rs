//! Audit Log - Append-only JSONL storage
//!
//! All writes are append-only and immutable. The log is shared by every
//! component (`Arc<AuditLog>`), so appends are serialized internally.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, error, warn};

use crate::entry::{entry_id_for, AuditEntry, NewAuditEntry};
use crate::error::{AuditError, AuditResult};
use crate::hash::{calculate_entry_hash, verify_chain, GENESIS_HASH};

struct LogState {
    file: Option<File>,
    entries: Vec<AuditEntry>,
    by_subject: HashMap<String, Vec<usize>>,
    last_hash: String,
}

/// Append-only, hash-chained audit log
///
/// Each line of the backing file is a JSON-serialized [`AuditEntry`].
/// The file is append-only and should never be modified.
pub struct AuditLog {
    path: PathBuf,
    state: Mutex<LogState>,
}

impl AuditLog {
    /// Open (or create) a log at the given path and rebuild its index.
    ///
    /// Refuses to open a log whose hash chain does not verify. A final
    /// line cut short by a crash mid-append is dropped first.
    pub fn open(path: impl AsRef<Path>) -> AuditResult<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        let scan = scan(&path)?;

        if let Err(e) = verify_chain(&scan.entries) {
            error!(path = %path.display(), error = %e, "Audit log chain verification failed");
            return Err(AuditError::BrokenChain(e));
        }

        if scan.torn {
            warn!(
                path = %path.display(),
                kept_entries = scan.entries.len(),
                "Dropping torn final line of audit log"
            );
            file.set_len(scan.intact_len)?;
        }
        if scan.unterminated {
            writeln!(file)?;
        }
        let entries = scan.entries;

        let mut state = LogState {
            file: Some(file),
            entries: Vec::new(),
            by_subject: HashMap::new(),
            last_hash: GENESIS_HASH.to_string(),
        };
        for entry in entries {
            index_entry(&mut state, entry);
        }

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// Create an in-memory log (for testing)
    pub fn in_memory() -> Self {
        Self {
            path: PathBuf::new(),
            state: Mutex::new(LogState {
                file: None,
                entries: Vec::new(),
                by_subject: HashMap::new(),
                last_hash: GENESIS_HASH.to_string(),
            }),
        }
    }

    fn lock(&self) -> AuditResult<MutexGuard<'_, LogState>> {
        self.state.lock().map_err(|_| AuditError::Poisoned)
    }

    /// Append an entry, assigning its id, sequence and chain hash
    pub fn append(&self, new: NewAuditEntry) -> AuditResult<AuditEntry> {
        let mut state = self.lock()?;

        let sequence = state.entries.len() as u64 + 1;
        let mut entry = AuditEntry {
            entry_id: entry_id_for(sequence),
            sequence,
            subject_type: new.subject_type,
            subject_id: new.subject_id,
            outcome: new.outcome,
            timestamp: new.timestamp,
            detail: new.detail,
            prev_hash: state.last_hash.clone(),
            hash: String::new(),
        };
        entry.hash = calculate_entry_hash(&entry);

        if let Some(ref mut file) = state.file {
            let json = serde_json::to_string(&entry)?;
            writeln!(file, "{}", json)?;
            file.flush()?;
        }

        debug!(
            entry_id = %entry.entry_id,
            subject_type = %entry.subject_type,
            subject_id = %entry.subject_id,
            outcome = %entry.outcome,
            "Audit entry appended"
        );

        index_entry(&mut state, entry.clone());
        Ok(entry)
    }

    /// All entries about one subject, in append order
    pub fn entries_for(&self, subject_id: &str) -> AuditResult<Vec<AuditEntry>> {
        let state = self.lock()?;
        Ok(state
            .by_subject
            .get(subject_id)
            .map(|idx| idx.iter().map(|i| state.entries[*i].clone()).collect())
            .unwrap_or_default())
    }

    /// All entries in append order
    pub fn read_all(&self) -> AuditResult<Vec<AuditEntry>> {
        Ok(self.lock()?.entries.clone())
    }

    /// Entries with sequence greater than `after`
    pub fn read_from(&self, after: u64) -> AuditResult<Vec<AuditEntry>> {
        let state = self.lock()?;
        Ok(state
            .entries
            .iter()
            .skip(after as usize)
            .cloned()
            .collect())
    }

    /// Number of entries
    pub fn len(&self) -> AuditResult<usize> {
        Ok(self.lock()?.entries.len())
    }

    pub fn is_empty(&self) -> AuditResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Re-read the backing file (or memory) and verify the hash chain
    pub fn verify(&self) -> AuditResult<usize> {
        let entries = if self.is_in_memory() {
            self.read_all()?
        } else {
            scan(&self.path)?.entries
        };
        verify_chain(&entries)?;
        Ok(entries.len())
    }

    /// Get the path to the log file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if this is an in-memory log
    pub fn is_in_memory(&self) -> bool {
        self.path.as_os_str().is_empty()
    }
}

fn index_entry(state: &mut LogState, entry: AuditEntry) {
    let idx = state.entries.len();
    state
        .by_subject
        .entry(entry.subject_id.clone())
        .or_default()
        .push(idx);
    state.last_hash = entry.hash.clone();
    state.entries.push(entry);
}

struct LogScan {
    entries: Vec<AuditEntry>,
    /// Bytes up to the end of the last complete entry
    intact_len: u64,
    torn: bool,
    unterminated: bool,
}

/// Read the log, treating an unparseable last line with no newline as a
/// torn append. Any other bad line is an error.
fn scan(path: &Path) -> AuditResult<LogScan> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut scan = LogScan {
        entries: Vec::new(),
        intact_len: 0,
        torn: false,
        unterminated: false,
    };
    let mut line = Vec::new();

    while reader.read_until(b'\n', &mut line)? > 0 {
        let complete = line.ends_with(b"\n");
        if !line.iter().all(u8::is_ascii_whitespace) {
            match serde_json::from_slice(&line) {
                Ok(entry) => scan.entries.push(entry),
                Err(_) if !complete => {
                    scan.torn = true;
                    break;
                }
                Err(e) => return Err(e.into()),
            }
        }
        scan.intact_len += line.len() as u64;
        scan.unterminated = !complete;
        line.clear();
    }

    Ok(scan)
}
