//! Per-session transaction state
//!
//! A [`Transaction`] is owned by the session that began it. It carries the
//! snapshot rules of its isolation level, everything needed to undo or
//! publish its work, and a private copy of the catalog once it runs DDL.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use indexmap::IndexSet;

use super::isolation::IsolationLevel;
use super::manager::TransactionManager;
use super::snapshot::{Snapshot, TxnId};
use crate::catalog::{Catalog, TableId};
use crate::error::{Error, Result};
use crate::storage::tuple::Value;
use crate::storage::wal::Change;
use crate::storage::RowId;

/// A foreign key condition verified later than the write that raised it
#[derive(Debug, Clone, PartialEq)]
pub enum PendingCheck {
    /// A referencing row was written; its parent key must exist
    ChildKey {
        table: String,
        constraint: String,
        key: Vec<Value>,
    },
    /// A referenced key went away; no referencing row may remain
    ParentKey {
        table: String,
        constraint: String,
        key: Vec<Value>,
    },
}

/// Transaction Context
#[derive(Debug)]
pub struct Transaction {
    id: TxnId,
    isolation: IsolationLevel,
    /// Started with BEGIN rather than for a single statement
    explicit: bool,
    /// A statement failed; only ROLLBACK is accepted now
    failed: bool,
    statements: usize,
    txn_snapshot: Option<Snapshot>,
    statement_snapshot: Option<Snapshot>,
    catalog: Arc<Catalog>,
    /// Version of the published catalog the private copy was cloned from
    ddl_base_version: Option<u64>,
    writes: IndexSet<(TableId, RowId)>,
    /// Table version at first write, checked again at commit
    written_tables: HashMap<TableId, u64>,
    read_tables: HashSet<TableId>,
    changes: Vec<Change>,
    /// NO ACTION checks run at the end of the current statement
    statement_checks: Vec<PendingCheck>,
    /// Checks of deferred foreign keys run at commit
    deferred_checks: Vec<PendingCheck>,
}

impl Transaction {
    pub fn new(id: TxnId, isolation: IsolationLevel, explicit: bool, catalog: Arc<Catalog>) -> Self {
        Self {
            id,
            isolation,
            explicit,
            failed: false,
            statements: 0,
            txn_snapshot: None,
            statement_snapshot: None,
            catalog,
            ddl_base_version: None,
            writes: IndexSet::new(),
            written_tables: HashMap::new(),
            read_tables: HashSet::new(),
            changes: Vec::new(),
            statement_checks: Vec::new(),
            deferred_checks: Vec::new(),
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    pub fn is_explicit(&self) -> bool {
        self.explicit
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    pub fn mark_failed(&mut self) {
        self.failed = true;
    }

    /// Whether any statement has run yet
    pub fn has_started(&self) -> bool {
        self.statements > 0
    }

    /// Change the isolation level before the first statement
    pub fn set_isolation(&mut self, level: IsolationLevel) -> Result<()> {
        if self.has_started() {
            return Err(Error::IsolationLevelLocked);
        }
        self.isolation = level;
        Ok(())
    }

    /// Prepare for a new statement: refresh the catalog and take snapshots
    pub fn begin_statement(&mut self, manager: &TransactionManager, published: Arc<Catalog>) {
        self.statements += 1;
        if self.ddl_base_version.is_none() {
            self.catalog = published;
        }
        let dirty = self.isolation == IsolationLevel::ReadUncommitted;
        if self.isolation.uses_transaction_snapshot() {
            if self.txn_snapshot.is_none() {
                self.txn_snapshot = Some(manager.snapshot(self.id, false));
            }
            self.statement_snapshot = self.txn_snapshot.clone();
        } else {
            self.statement_snapshot = Some(manager.snapshot(self.id, dirty));
        }
        self.statement_checks.clear();
    }

    /// Snapshot of the running statement
    pub fn snapshot(&self) -> Result<&Snapshot> {
        self.statement_snapshot
            .as_ref()
            .ok_or_else(|| Error::Internal("statement has no snapshot".to_string()))
    }

    /// Timestamp the transaction-level snapshot was taken at, if any
    pub fn snapshot_ts(&self) -> Option<u64> {
        self.txn_snapshot.as_ref().map(|s| s.read_ts)
    }

    /// Catalog as seen by this transaction, including its own DDL
    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Private catalog copy for DDL
    pub fn catalog_mut(&mut self) -> &mut Catalog {
        if self.ddl_base_version.is_none() {
            self.ddl_base_version = Some(self.catalog.version());
        }
        Arc::make_mut(&mut self.catalog)
    }

    /// Base version of the catalog copy if this transaction ran DDL
    pub fn ddl_base_version(&self) -> Option<u64> {
        self.ddl_base_version
    }

    pub fn record_read(&mut self, table: TableId) {
        self.read_tables.insert(table);
    }

    pub fn read_tables(&self) -> &HashSet<TableId> {
        &self.read_tables
    }

    /// Remember a row this transaction wrote, for undo and commit checks
    pub fn record_write(&mut self, table: TableId, table_version: u64, row: RowId) {
        self.writes.insert((table, row));
        self.written_tables.entry(table).or_insert(table_version);
    }

    pub fn writes(&self) -> impl Iterator<Item = &(TableId, RowId)> {
        self.writes.iter()
    }

    pub fn written_tables(&self) -> &HashMap<TableId, u64> {
        &self.written_tables
    }

    /// Whether commit has anything to publish
    pub fn has_writes(&self) -> bool {
        !self.writes.is_empty() || !self.changes.is_empty() || self.ddl_base_version.is_some()
    }

    pub fn log_change(&mut self, change: Change) {
        self.changes.push(change);
    }

    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    pub fn take_changes(&mut self) -> Vec<Change> {
        std::mem::take(&mut self.changes)
    }

    pub fn add_check(&mut self, check: PendingCheck, deferred: bool) {
        if deferred {
            self.deferred_checks.push(check);
        } else {
            self.statement_checks.push(check);
        }
    }

    pub fn take_statement_checks(&mut self) -> Vec<PendingCheck> {
        std::mem::take(&mut self.statement_checks)
    }

    pub fn take_deferred_checks(&mut self) -> Vec<PendingCheck> {
        std::mem::take(&mut self.deferred_checks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_isolation_locked_after_first_statement() {
        let manager = TransactionManager::new(Duration::from_millis(10));
        let catalog = Arc::new(Catalog::new());
        let mut txn = Transaction::new(manager.begin(), IsolationLevel::ReadCommitted, true, catalog.clone());

        txn.set_isolation(IsolationLevel::Serializable).unwrap();
        txn.begin_statement(&manager, catalog);
        assert!(matches!(
            txn.set_isolation(IsolationLevel::ReadCommitted),
            Err(Error::IsolationLevelLocked)
        ));
    }

    #[test]
    fn test_repeatable_read_keeps_snapshot() {
        let manager = TransactionManager::new(Duration::from_millis(10));
        let catalog = Arc::new(Catalog::new());
        let mut txn = Transaction::new(manager.begin(), IsolationLevel::RepeatableRead, true, catalog.clone());
        txn.begin_statement(&manager, catalog.clone());
        let first = txn.snapshot().unwrap().read_ts;

        let other = manager.begin();
        manager.mark_committed(other, manager.next_commit_ts(), HashSet::new());

        txn.begin_statement(&manager, catalog);
        assert_eq!(txn.snapshot().unwrap().read_ts, first);
    }

    #[test]
    fn test_catalog_copy_on_write() {
        let manager = TransactionManager::new(Duration::from_millis(10));
        let published = Arc::new(Catalog::new());
        let mut txn = Transaction::new(manager.begin(), IsolationLevel::ReadCommitted, true, published.clone());

        assert!(txn.ddl_base_version().is_none());
        txn.catalog_mut();
        assert_eq!(txn.ddl_base_version(), Some(published.version()));
        assert!(txn.has_writes());
    }
}
