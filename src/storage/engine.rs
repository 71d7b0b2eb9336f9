//! Storage engine
//!
//! Owns every table's versioned rows. Each table sits behind its own
//! reader-writer lock so writers to different tables never contend.

use std::collections::HashMap;
use std::ops::Bound;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use super::index::IndexKey;
use super::table::{TableStore, WriteOutcome};
use super::tuple::Tuple;
use super::wal::Change;
use super::RowId;
use crate::catalog::TableId;
use crate::error::{Error, Result};
use crate::transaction::{Snapshot, TxnId};

/// Rows fetched per step of a lazy scan
const SCAN_BATCH: usize = 256;

/// Storage engine
#[derive(Debug, Default)]
pub struct StorageEngine {
    tables: RwLock<HashMap<TableId, Arc<RwLock<TableStore>>>>,
}

impl StorageEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self, id: TableId) -> Result<Arc<RwLock<TableStore>>> {
        self.tables
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::Internal(format!("no storage for table {}", id)))
    }

    pub fn create_table(&self, id: TableId) {
        self.tables
            .write()
            .entry(id)
            .or_insert_with(|| Arc::new(RwLock::new(TableStore::new(id))));
        debug!(table = id, "Table storage created");
    }

    pub fn drop_table(&self, id: TableId) {
        self.tables.write().remove(&id);
        debug!(table = id, "Table storage dropped");
    }

    pub fn has_table(&self, id: TableId) -> bool {
        self.tables.read().contains_key(&id)
    }

    pub fn create_index(&self, table: TableId, name: &str, slots: Vec<usize>, unique: bool) -> Result<()> {
        self.table(table)?.write().create_index(name, slots, unique);
        debug!(table, index = name, "Index built");
        Ok(())
    }

    pub fn drop_index(&self, table: TableId, name: &str) {
        if let Ok(store) = self.table(table) {
            store.write().drop_index(name);
        }
    }

    // ========== Reads ==========

    /// Lazy scan over the rows visible to `snapshot`
    pub fn scan(&self, table: TableId, snapshot: Snapshot) -> Result<TableScan> {
        Ok(TableScan {
            store: self.table(table)?,
            snapshot,
            after: None,
            buffer: Vec::new(),
            done: false,
        })
    }

    /// Every visible row, eagerly
    pub fn scan_all(&self, table: TableId, snapshot: &Snapshot) -> Result<Vec<(RowId, Tuple)>> {
        Ok(self
            .table(table)?
            .read()
            .scan_batch(snapshot, None, usize::MAX))
    }

    pub fn get(&self, table: TableId, row: RowId, snapshot: &Snapshot) -> Result<Option<Tuple>> {
        Ok(self.table(table)?.read().visible(row, snapshot).cloned())
    }

    pub fn index_lookup(
        &self,
        table: TableId,
        index: &str,
        key: &IndexKey,
        snapshot: &Snapshot,
    ) -> Result<Vec<(RowId, Tuple)>> {
        self.table(table)?.read().index_lookup(index, key, snapshot)
    }

    pub fn index_range(
        &self,
        table: TableId,
        index: &str,
        lower: Bound<&IndexKey>,
        upper: Bound<&IndexKey>,
        snapshot: &Snapshot,
    ) -> Result<Vec<(RowId, Tuple)>> {
        self.table(table)?
            .read()
            .index_range(index, lower, upper, snapshot)
    }

    // ========== Writes ==========

    pub fn insert(
        &self,
        table: TableId,
        writer: &Snapshot,
        data: Tuple,
        unique: &[String],
    ) -> Result<WriteOutcome> {
        self.table(table)?.write().insert(writer, data, unique)
    }

    pub fn update(
        &self,
        table: TableId,
        writer: &Snapshot,
        row: RowId,
        data: Tuple,
        unique: &[String],
    ) -> Result<WriteOutcome> {
        self.table(table)?.write().update(writer, row, data, unique)
    }

    pub fn delete(&self, table: TableId, writer: &Snapshot, row: RowId) -> Result<WriteOutcome> {
        self.table(table)?.write().delete(writer, row)
    }

    /// After taking the row lock: `None` when the row is still the version
    /// the writer saw, otherwise what changed it
    pub fn check_write(&self, table: TableId, row: RowId, writer: &Snapshot) -> Result<Option<WriteOutcome>> {
        Ok(self.table(table)?.read().concurrent_change(row, writer))
    }

    pub fn next_sequence(&self, table: TableId) -> Result<i64> {
        Ok(self.table(table)?.write().next_sequence())
    }

    pub fn observe_sequence(&self, table: TableId, value: i64) -> Result<()> {
        self.table(table)?.write().observe_sequence(value);
        Ok(())
    }

    pub fn sequence(&self, table: TableId) -> Result<i64> {
        Ok(self.table(table)?.read().sequence())
    }

    /// Undo the row writes of an aborted transaction
    pub fn rollback<'a>(&self, txn: TxnId, writes: impl IntoIterator<Item = &'a (TableId, RowId)>) {
        let mut by_table: HashMap<TableId, Vec<RowId>> = HashMap::new();
        for &(table, row) in writes {
            by_table.entry(table).or_default().push(row);
        }
        for (table, rows) in by_table {
            if let Ok(store) = self.table(table) {
                let mut store = store.write();
                for row in rows {
                    store.rollback_row(txn, row);
                }
            }
        }
    }

    /// Re-apply one committed change during recovery
    pub fn replay(&self, txn: TxnId, change: &Change) -> Result<()> {
        match change {
            Change::CreateTable { table } => self.create_table(*table),
            Change::DropTable { table } => self.drop_table(*table),
            Change::CreateIndex {
                table,
                name,
                slots,
                unique,
            } => self.create_index(*table, name, slots.clone(), *unique)?,
            Change::DropIndex { table, name } => self.drop_index(*table, name),
            Change::Insert { table, row, data } => {
                self.table(*table)?
                    .write()
                    .replay_insert(txn, *row, data.clone());
            }
            Change::Update { table, row, data } => {
                self.table(*table)?
                    .write()
                    .replay_replace(txn, *row, Some(data.clone()));
            }
            Change::Delete { table, row } => {
                self.table(*table)?.write().replay_replace(txn, *row, None);
            }
            Change::Sequence { table, value } => self.observe_sequence(*table, *value)?,
        }
        Ok(())
    }
}

/// Lazy scan that pulls visible rows in batches.
///
/// Each batch is read under the table lock; rows committed between batches
/// are filtered by the snapshot like any other.
pub struct TableScan {
    store: Arc<RwLock<TableStore>>,
    snapshot: Snapshot,
    after: Option<RowId>,
    buffer: Vec<(RowId, Tuple)>,
    done: bool,
}

impl Iterator for TableScan {
    type Item = (RowId, Tuple);

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() {
            if self.done {
                return None;
            }
            let mut batch = self
                .store
                .read()
                .scan_batch(&self.snapshot, self.after, SCAN_BATCH);
            if batch.len() < SCAN_BATCH {
                self.done = true;
            }
            self.after = batch.last().map(|(id, _)| *id).or(self.after);
            batch.reverse();
            self.buffer = batch;
        }
        self.buffer.pop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tuple::Value;
    use crate::transaction::{StatusTable, TxnStatus};

    fn snapshot(statuses: &Arc<StatusTable>, txn: TxnId, read_ts: u64) -> Snapshot {
        Snapshot::new(txn, read_ts, false, Arc::clone(statuses))
    }

    #[test]
    fn test_lazy_scan_crosses_batches() {
        let engine = StorageEngine::new();
        let statuses = Arc::new(StatusTable::new());
        engine.create_table(1);

        statuses.set(1, TxnStatus::Active);
        let writer = snapshot(&statuses, 1, 0);
        for i in 0..(SCAN_BATCH as i64 * 2 + 3) {
            engine
                .insert(1, &writer, Tuple::new(vec![Value::Integer(i)]), &[])
                .unwrap();
        }
        statuses.set(1, TxnStatus::Committed(1));

        let reader = snapshot(&statuses, 2, 1);
        let scan = engine.scan(1, reader.clone()).unwrap();
        let values: Vec<i64> = scan
            .map(|(_, t)| t.get(0).and_then(Value::as_i64).unwrap())
            .collect();
        assert_eq!(values.len(), SCAN_BATCH * 2 + 3);
        assert!(values.windows(2).all(|w| w[0] < w[1]));

        let mut scan = engine.scan(1, reader).unwrap();
        assert!(scan.next().is_some());
    }

    #[test]
    fn test_rollback_and_replay() {
        let engine = StorageEngine::new();
        let statuses = Arc::new(StatusTable::new());
        engine.create_table(1);
        statuses.set(5, TxnStatus::Active);
        let writer = snapshot(&statuses, 5, 0);

        let row = match engine
            .insert(1, &writer, Tuple::new(vec![Value::Integer(1)]), &[])
            .unwrap()
        {
            WriteOutcome::Done(row) => row,
            other => panic!("unexpected {:?}", other),
        };
        engine.rollback(5, &[(1, row)]);
        statuses.set(5, TxnStatus::Aborted);
        assert!(engine.scan_all(1, &snapshot(&statuses, 6, 0)).unwrap().is_empty());

        statuses.set(7, TxnStatus::Committed(1));
        engine
            .replay(
                7,
                &Change::Insert {
                    table: 1,
                    row: 9,
                    data: Tuple::new(vec![Value::Integer(42)]),
                },
            )
            .unwrap();
        let rows = engine.scan_all(1, &snapshot(&statuses, 8, 1)).unwrap();
        assert_eq!(rows, vec![(9, Tuple::new(vec![Value::Integer(42)]))]);
    }
}
