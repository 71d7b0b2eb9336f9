//! Write-Ahead Log (WAL) Manager
//!
//! One JSON line per committed transaction, flushed before the commit is
//! acknowledged. Recovery replays the records in order.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::tuple::Tuple;
use super::RowId;
use crate::catalog::{Catalog, TableId};
use crate::error::Result;
use crate::transaction::{Timestamp, TxnId};

/// A storage change made by a transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Change {
    CreateTable {
        table: TableId,
    },
    DropTable {
        table: TableId,
    },
    CreateIndex {
        table: TableId,
        name: String,
        slots: Vec<usize>,
        unique: bool,
    },
    DropIndex {
        table: TableId,
        name: String,
    },
    Insert {
        table: TableId,
        row: RowId,
        data: Tuple,
    },
    Update {
        table: TableId,
        row: RowId,
        data: Tuple,
    },
    Delete {
        table: TableId,
        row: RowId,
    },
    /// Auto-increment position after the transaction
    Sequence {
        table: TableId,
        value: i64,
    },
}

/// A single log record: everything one transaction committed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    pub txn_id: TxnId,
    pub commit_ts: Timestamp,
    /// New catalog when the transaction ran DDL
    pub catalog: Option<Catalog>,
    pub changes: Vec<Change>,
}

/// Manages Write-Ahead Logs
#[derive(Debug)]
pub struct LogManager {
    path: PathBuf,
    file: Mutex<File>,
}

impl LogManager {
    /// Open (or create) the log file for appending
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a record and flush it to disk
    pub fn append(&self, record: &LogRecord) -> Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let mut file = self.file.lock();
        file.write_all(&line)?;
        file.flush()?;
        file.sync_data()?;
        debug!(txn = record.txn_id, commit_ts = record.commit_ts, "Commit logged");
        Ok(())
    }

    /// Read the log and reopen it for appending, cutting off a torn final
    /// record first so later appends start on a fresh line.
    pub fn recover(path: impl AsRef<Path>) -> Result<(Self, Vec<LogRecord>)> {
        let path = path.as_ref();
        let scan = scan_log(path)?;
        if path.exists() {
            let file = OpenOptions::new().write(true).open(path)?;
            let len = file.metadata()?.len();
            if len != scan.valid_len {
                warn!(
                    kept = scan.valid_len,
                    dropped = len - scan.valid_len,
                    "Truncating torn log tail"
                );
                file.set_len(scan.valid_len)?;
                file.sync_all()?;
            }
        }
        let log = Self::open(path)?;
        if scan.missing_newline {
            let mut file = log.file.lock();
            file.write_all(b"\n")?;
            file.sync_data()?;
        }
        Ok((log, scan.records))
    }

    /// Read all logs from disk (for Recovery).
    ///
    /// A torn final line from a crash mid-append is ignored.
    pub fn read_from_log(path: impl AsRef<Path>) -> Result<Vec<LogRecord>> {
        Ok(scan_log(path.as_ref())?.records)
    }
}

struct LogScan {
    records: Vec<LogRecord>,
    /// Bytes up to and including the last good record
    valid_len: u64,
    /// The last good record has no line terminator
    missing_newline: bool,
}

fn scan_log(path: &Path) -> Result<LogScan> {
    let mut scan = LogScan {
        records: Vec::new(),
        valid_len: 0,
        missing_newline: false,
    };
    if !path.exists() {
        return Ok(scan);
    }
    let mut reader = BufReader::new(File::open(path)?);
    let mut offset = 0u64;
    let mut line = Vec::new();
    loop {
        line.clear();
        let read = reader.read_until(b'\n', &mut line)?;
        if read == 0 {
            break;
        }
        offset += read as u64;
        let terminated = line.last() == Some(&b'\n');
        let text = String::from_utf8_lossy(&line);
        if text.trim().is_empty() {
            if terminated {
                scan.valid_len = offset;
            }
            continue;
        }
        match serde_json::from_str::<LogRecord>(text.trim_end()) {
            Ok(record) => {
                scan.records.push(record);
                scan.valid_len = offset;
                scan.missing_newline = !terminated;
            }
            Err(e) if !terminated || is_blank_after(&mut reader)? => {
                warn!(error = %e, "Ignoring incomplete trailing log record");
                break;
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(scan)
}

/// Whether nothing but whitespace remains in the reader
fn is_blank_after(reader: &mut BufReader<File>) -> Result<bool> {
    let mut rest = Vec::new();
    reader.read_to_end(&mut rest)?;
    Ok(rest.iter().all(u8::is_ascii_whitespace))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tuple::Value;

    fn record(txn_id: TxnId) -> LogRecord {
        LogRecord {
            txn_id,
            commit_ts: txn_id,
            catalog: None,
            changes: vec![Change::Insert {
                table: 1,
                row: txn_id,
                data: Tuple::new(vec![Value::Integer(txn_id as i64), Value::from("x")]),
            }],
        }
    }

    #[test]
    fn test_append_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keeldb.log");
        let log = LogManager::open(&path).unwrap();
        log.append(&record(1)).unwrap();
        log.append(&record(2)).unwrap();

        let records = LogManager::read_from_log(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].txn_id, 2);
        assert_eq!(records[0].changes, record(1).changes);
    }

    #[test]
    fn test_torn_tail_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keeldb.log");
        let log = LogManager::open(&path).unwrap();
        log.append(&record(1)).unwrap();
        drop(log);

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{\"txn_id\": 2, \"commit").unwrap();

        let records = LogManager::read_from_log(&path).unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_recover_truncates_torn_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keeldb.log");
        let log = LogManager::open(&path).unwrap();
        log.append(&record(1)).unwrap();
        drop(log);
        let good_len = std::fs::metadata(&path).unwrap().len();

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{\"txn_id\":99,\"comm").unwrap();
        drop(file);

        let (log, records) = LogManager::recover(&path).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), good_len);

        log.append(&record(2)).unwrap();
        log.append(&record(3)).unwrap();
        let records = LogManager::read_from_log(&path).unwrap();
        let ids: Vec<TxnId> = records.iter().map(|r| r.txn_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_recover_terminates_unfinished_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keeldb.log");
        std::fs::write(&path, serde_json::to_vec(&record(1)).unwrap()).unwrap();

        let (log, records) = LogManager::recover(&path).unwrap();
        assert_eq!(records.len(), 1);
        log.append(&record(2)).unwrap();
        assert_eq!(LogManager::read_from_log(&path).unwrap().len(), 2);
    }

    #[test]
    fn test_corrupt_middle_record_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keeldb.log");
        let mut bytes = b"{\"txn_id\":1,\"comm\n".to_vec();
        bytes.extend(serde_json::to_vec(&record(2)).unwrap());
        bytes.push(b'\n');
        std::fs::write(&path, bytes).unwrap();

        assert!(LogManager::read_from_log(&path).is_err());
    }

    #[test]
    fn test_missing_log_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let records = LogManager::read_from_log(dir.path().join("none.log")).unwrap();
        assert!(records.is_empty());
    }
}
