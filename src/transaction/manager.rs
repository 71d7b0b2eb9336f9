//! Transaction Manager
//!
//! Hands out transaction ids and snapshots, records outcomes and keeps the
//! short history of commits that SERIALIZABLE transactions validate against.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use tracing::debug;

use super::lock::{LockManager, LockMode, LockTarget};
use super::snapshot::{Snapshot, StatusTable, Timestamp, TxnId, TxnStatus};
use crate::catalog::TableId;
use crate::error::{Error, Result};

/// How many recent commits are kept for serializable validation
const COMMIT_HISTORY: usize = 4096;

#[derive(Debug)]
struct CommitRecord {
    commit_ts: Timestamp,
    tables: HashSet<TableId>,
}

#[derive(Debug, Default)]
struct CommitHistory {
    records: VecDeque<CommitRecord>,
    /// Highest commit timestamp evicted from `records`
    evicted_through: Timestamp,
}

/// Transaction Manager
#[derive(Debug)]
pub struct TransactionManager {
    next_txn_id: AtomicU64,
    last_commit_ts: AtomicU64,
    statuses: Arc<StatusTable>,
    history: Mutex<CommitHistory>,
    /// Serializes the commit critical section
    commit_lock: Mutex<()>,
    locks: LockManager,
    lock_timeout: Duration,
}

impl TransactionManager {
    /// Create a new transaction manager
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            next_txn_id: AtomicU64::new(1),
            last_commit_ts: AtomicU64::new(0),
            statuses: Arc::new(StatusTable::new()),
            history: Mutex::new(CommitHistory::default()),
            commit_lock: Mutex::new(()),
            locks: LockManager::new(),
            lock_timeout,
        }
    }

    /// Begin a new transaction
    pub fn begin(&self) -> TxnId {
        let txn = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        self.statuses.set(txn, TxnStatus::Active);
        // Uncontended: nobody else can know this id yet
        let _ = self
            .locks
            .acquire(txn, LockTarget::Txn(txn), LockMode::Exclusive, Duration::ZERO);
        debug!(txn, "Transaction started");
        txn
    }

    /// Snapshot of everything committed so far
    pub fn snapshot(&self, txn: TxnId, dirty: bool) -> Snapshot {
        let read_ts = self.last_commit_ts.load(Ordering::SeqCst);
        Snapshot::new(txn, read_ts, dirty, Arc::clone(&self.statuses))
    }

    pub fn status(&self, txn: TxnId) -> TxnStatus {
        self.statuses.get(txn)
    }

    pub fn last_commit_ts(&self) -> Timestamp {
        self.last_commit_ts.load(Ordering::SeqCst)
    }

    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    /// Lock a row for writing
    pub fn lock_row(&self, txn: TxnId, table: TableId, row: u64) -> Result<()> {
        self.locks.acquire(
            txn,
            LockTarget::Row(table, row),
            LockMode::Exclusive,
            self.lock_timeout,
        )
    }

    /// Lock a referenced row against deletion or key changes
    pub fn share_row(&self, txn: TxnId, table: TableId, row: u64) -> Result<()> {
        self.locks.acquire(
            txn,
            LockTarget::Row(table, row),
            LockMode::Shared,
            self.lock_timeout,
        )
    }

    /// Wait until another transaction finishes
    pub fn wait_for(&self, txn: TxnId, other: TxnId) -> Result<()> {
        debug!(txn, other, "Waiting for transaction to finish");
        self.locks.wait_for_txn(txn, other, self.lock_timeout)
    }

    /// Enter the commit critical section
    pub fn commit_guard(&self) -> MutexGuard<'_, ()> {
        self.commit_lock.lock()
    }

    /// Fail if a transaction that committed after `read_ts` wrote a table we read.
    ///
    /// Must be called inside the commit critical section.
    pub fn validate_reads(&self, read_ts: Timestamp, read_tables: &HashSet<TableId>) -> Result<()> {
        let history = self.history.lock();
        if read_ts < history.evicted_through {
            return Err(Error::SerializationFailure(
                "read/write dependencies among transactions (history exhausted)".to_string(),
            ));
        }
        let conflict = history
            .records
            .iter()
            .filter(|record| record.commit_ts > read_ts)
            .any(|record| !record.tables.is_disjoint(read_tables));
        if conflict {
            return Err(Error::SerializationFailure(
                "read/write dependencies among transactions".to_string(),
            ));
        }
        Ok(())
    }

    /// Next commit timestamp; must be called inside the commit critical section
    pub fn next_commit_ts(&self) -> Timestamp {
        self.last_commit_ts.load(Ordering::SeqCst) + 1
    }

    /// Mark committed and publish: after this, new snapshots see its writes.
    ///
    /// Must be called inside the commit critical section.
    pub fn mark_committed(&self, txn: TxnId, commit_ts: Timestamp, tables: HashSet<TableId>) {
        self.statuses.set(txn, TxnStatus::Committed(commit_ts));
        {
            let mut history = self.history.lock();
            history.records.push_back(CommitRecord { commit_ts, tables });
            while history.records.len() > COMMIT_HISTORY {
                if let Some(old) = history.records.pop_front() {
                    history.evicted_through = old.commit_ts;
                }
            }
        }
        self.last_commit_ts.store(commit_ts, Ordering::SeqCst);
        debug!(txn, commit_ts, "Transaction committed");
    }

    /// Mark aborted
    pub fn mark_aborted(&self, txn: TxnId) {
        self.statuses.set(txn, TxnStatus::Aborted);
        debug!(txn, "Transaction aborted");
    }

    /// Release every lock held by `txn`, waking its waiters
    pub fn release_locks(&self, txn: TxnId) {
        self.locks.release_all(txn);
    }

    /// Rebuild state for a transaction replayed from the commit log
    pub fn restore_committed(&self, txn: TxnId, commit_ts: Timestamp) {
        self.statuses.set(txn, TxnStatus::Committed(commit_ts));
        self.next_txn_id.fetch_max(txn + 1, Ordering::SeqCst);
        self.last_commit_ts.fetch_max(commit_ts, Ordering::SeqCst);
    }
}
