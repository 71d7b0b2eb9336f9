//! Transaction status table and snapshot visibility

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

/// Transaction identifier
pub type TxnId = u64;

/// Logical commit timestamp
pub type Timestamp = u64;

/// Outcome of a transaction as seen by readers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnStatus {
    Active,
    Committed(Timestamp),
    Aborted,
}

/// Shared map from transaction id to status
#[derive(Debug, Default)]
pub struct StatusTable {
    statuses: RwLock<HashMap<TxnId, TxnStatus>>,
}

impl StatusTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Status of a transaction; unknown ids count as aborted
    pub fn get(&self, txn: TxnId) -> TxnStatus {
        self.statuses
            .read()
            .get(&txn)
            .copied()
            .unwrap_or(TxnStatus::Aborted)
    }

    pub fn set(&self, txn: TxnId, status: TxnStatus) {
        self.statuses.write().insert(txn, status);
    }
}

/// A point-in-time view of committed data plus the reader's own writes
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Reading transaction
    pub txn_id: TxnId,
    /// Commits with a timestamp at or below this are visible
    pub read_ts: Timestamp,
    /// READ UNCOMMITTED: every non-aborted version is visible
    pub dirty: bool,
    statuses: Arc<StatusTable>,
}

impl Snapshot {
    pub fn new(txn_id: TxnId, read_ts: Timestamp, dirty: bool, statuses: Arc<StatusTable>) -> Self {
        Self {
            txn_id,
            read_ts,
            dirty,
            statuses,
        }
    }

    pub fn status(&self, txn: TxnId) -> TxnStatus {
        self.statuses.get(txn)
    }

    /// Whether `txn` committed at or before this snapshot
    pub fn committed_before(&self, txn: TxnId) -> bool {
        matches!(self.status(txn), TxnStatus::Committed(ts) if ts <= self.read_ts)
    }

    /// Visibility of a version created by `xmin` and deleted by `xmax`
    pub fn sees(&self, xmin: TxnId, xmax: Option<TxnId>) -> bool {
        if self.dirty {
            if self.status(xmin) == TxnStatus::Aborted {
                return false;
            }
            return match xmax {
                None => true,
                Some(x) => self.status(x) == TxnStatus::Aborted,
            };
        }

        let created = xmin == self.txn_id || self.committed_before(xmin);
        if !created {
            return false;
        }
        match xmax {
            None => true,
            Some(x) if x == self.txn_id => false,
            Some(x) => !self.committed_before(x),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> Arc<StatusTable> {
        let statuses = Arc::new(StatusTable::new());
        statuses.set(1, TxnStatus::Committed(1));
        statuses.set(2, TxnStatus::Committed(5));
        statuses.set(3, TxnStatus::Active);
        statuses.set(4, TxnStatus::Aborted);
        statuses
    }

    #[test]
    fn test_snapshot_visibility() {
        let snap = Snapshot::new(10, 3, false, table());

        assert!(snap.sees(1, None));
        assert!(!snap.sees(2, None), "committed after the snapshot");
        assert!(!snap.sees(3, None), "uncommitted");
        assert!(snap.sees(1, Some(2)), "deleted after the snapshot");
        assert!(snap.sees(1, Some(3)), "delete not committed");
        assert!(snap.sees(10, None), "own insert");
        assert!(!snap.sees(1, Some(10)), "own delete");
    }

    #[test]
    fn test_dirty_visibility() {
        let snap = Snapshot::new(10, 3, true, table());

        assert!(snap.sees(3, None));
        assert!(!snap.sees(4, None));
        assert!(!snap.sees(1, Some(3)));
        assert!(snap.sees(1, Some(4)));
    }
}
