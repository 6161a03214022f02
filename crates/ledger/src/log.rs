//! Per-shard JSONL log - append-only writer and sequential reader for replay
//!
//! JSONL is the source of truth for a shard; the in-memory indexes are
//! rebuilt from it on open.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::LedgerResult;
use crate::sale::SaleRecord;

/// One line of a shard log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ShardLogEntry {
    /// A sale was appended
    Sale { record: SaleRecord },
    /// Sales were paid out by a settled batch
    Settled {
        sale_ids: Vec<String>,
        batch_id: String,
        settled_at: DateTime<Utc>,
    },
}

/// Append-only JSONL log for one shard
pub struct ShardLog {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl ShardLog {
    /// Open (or create) the log for a shard inside `dir`.
    ///
    /// A final line cut short by a crash mid-append is dropped, so the
    /// next append starts on a fresh line.
    pub fn open(dir: impl AsRef<Path>, shard: usize) -> LedgerResult<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        let path = Self::path_for(dir, shard);
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;

        let scan = scan(&path)?;
        if scan.torn {
            warn!(
                path = %path.display(),
                kept_bytes = scan.intact_len,
                "Dropping torn final line of shard log"
            );
            file.set_len(scan.intact_len)?;
        }
        if scan.unterminated {
            writeln!(file)?;
        }

        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    /// File path for a shard
    pub fn path_for(dir: &Path, shard: usize) -> PathBuf {
        dir.join(format!("shard-{:02}.jsonl", shard))
    }

    /// Append an entry and flush it before returning
    pub fn append(&mut self, entry: &ShardLogEntry) -> LedgerResult<()> {
        let json = serde_json::to_string(entry)?;
        writeln!(self.writer, "{}", json)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Read every entry of the log in order
    pub fn read_all(&self) -> LedgerResult<Vec<ShardLogEntry>> {
        Ok(scan(&self.path)?.entries)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ShardLog {
    fn drop(&mut self) {
        let _ = self.writer.flush();
    }
}

/// Parsed entries plus where the intact part of the file ends
struct LogScan {
    entries: Vec<ShardLogEntry>,
    intact_len: u64,
    /// The last line has no newline and does not parse
    torn: bool,
    /// The last intact line parses but has no newline
    unterminated: bool,
}

/// Only the last line may be incomplete. A bad line anywhere else is an error.
fn scan(path: &Path) -> LedgerResult<LogScan> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut scan = LogScan {
        entries: Vec::new(),
        intact_len: 0,
        torn: false,
        unterminated: false,
    };
    let mut line = Vec::new();

    loop {
        line.clear();
        let read = reader.read_until(b'\n', &mut line)?;
        if read == 0 {
            break;
        }
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
        scan.intact_len += read as u64;
        scan.unterminated = !complete;
    }

    Ok(scan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_append_and_read() {
        let dir = tempdir().unwrap();
        let mut log = ShardLog::open(dir.path(), 3).unwrap();
        assert!(log.path().ends_with("shard-03.jsonl"));

        let entry = ShardLogEntry::Settled {
            sale_ids: vec!["s-1".to_string()],
            batch_id: "PB-1".to_string(),
            settled_at: Utc::now(),
        };
        log.append(&entry).unwrap();

        let reopened = ShardLog::open(dir.path(), 3).unwrap();
        let entries = reopened.read_all().unwrap();
        assert_eq!(entries, vec![entry]);
    }

    fn settled(batch_id: &str) -> ShardLogEntry {
        ShardLogEntry::Settled {
            sale_ids: vec!["s-1".to_string()],
            batch_id: batch_id.to_string(),
            settled_at: Utc::now(),
        }
    }

    #[test]
    fn test_torn_final_line_dropped_on_open() {
        let dir = tempdir().unwrap();
        let first = settled("PB-1");
        let path = {
            let mut log = ShardLog::open(dir.path(), 0).unwrap();
            log.append(&first).unwrap();
            log.path().to_path_buf()
        };
        let intact = fs::metadata(&path).unwrap().len();

        // Crash halfway through the second append
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        write!(file, r#"{{"kind":"settled","sale_ids":["s-2"],"bat"#).unwrap();
        drop(file);

        let mut log = ShardLog::open(dir.path(), 0).unwrap();
        assert_eq!(fs::metadata(&path).unwrap().len(), intact);
        assert_eq!(log.read_all().unwrap(), vec![first.clone()]);

        let second = settled("PB-2");
        log.append(&second).unwrap();
        let reopened = ShardLog::open(dir.path(), 0).unwrap();
        assert_eq!(reopened.read_all().unwrap(), vec![first, second]);
    }

    #[test]
    fn test_corrupt_line_before_the_end_is_an_error() {
        let dir = tempdir().unwrap();
        let path = ShardLog::path_for(dir.path(), 0);
        let good = serde_json::to_string(&settled("PB-1")).unwrap();
        fs::write(&path, format!("not json\n{}\n", good)).unwrap();

        assert!(ShardLog::open(dir.path(), 0).is_err());
    }

    #[test]
    fn test_unterminated_last_entry_kept() {
        let dir = tempdir().unwrap();
        let path = ShardLog::path_for(dir.path(), 0);
        let first = settled("PB-1");
        fs::write(&path, serde_json::to_string(&first).unwrap()).unwrap();

        let mut log = ShardLog::open(dir.path(), 0).unwrap();
        let second = settled("PB-2");
        log.append(&second).unwrap();
        assert_eq!(log.read_all().unwrap(), vec![first, second]);
    }
}
