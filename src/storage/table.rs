//! Versioned row storage for one table
//!
//! Each row id owns a chain of versions, oldest first. A version is created
//! by `xmin` and ended by `xmax`; readers pick the newest version their
//! snapshot can see. Every index on the table covers every version.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

use serde::{Deserialize, Serialize};

use super::index::{Index, IndexKey};
use super::tuple::Tuple;
use super::RowId;
use crate::catalog::TableId;
use crate::error::{Error, Result};
use crate::transaction::{Snapshot, TxnId, TxnStatus};

/// One version of a row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowVersion {
    pub xmin: TxnId,
    pub xmax: Option<TxnId>,
    pub data: Tuple,
}

/// State of a unique key among existing versions, from a writer's view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyState {
    /// Nobody holds the key
    Free,
    /// A live version holds it
    Taken,
    /// An unfinished transaction may end up holding it
    Pending(TxnId),
}

/// Result of a write attempt on an existing row
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
    /// Applied; carries the row id
    Done(RowId),
    /// The row changed after the writer's snapshot: the latest data, or
    /// `None` when the row is gone
    Concurrent(Option<Tuple>),
    /// A unique key depends on this unfinished transaction; wait and retry
    Blocked(TxnId),
}

/// Table storage
#[derive(Debug, Clone)]
pub struct TableStore {
    pub id: TableId,
    rows: BTreeMap<RowId, Vec<RowVersion>>,
    next_row_id: RowId,
    indexes: HashMap<String, Index>,
    /// Last value handed out for auto-increment columns
    sequence: i64,
}

impl TableStore {
    pub fn new(id: TableId) -> Self {
        Self {
            id,
            rows: BTreeMap::new(),
            next_row_id: 1,
            indexes: HashMap::new(),
            sequence: 0,
        }
    }

    /// Newest version visible to the snapshot
    pub fn visible(&self, row: RowId, snapshot: &Snapshot) -> Option<&Tuple> {
        self.rows
            .get(&row)?
            .iter()
            .rev()
            .find(|v| snapshot.sees(v.xmin, v.xmax))
            .map(|v| &v.data)
    }

    /// Up to `limit` visible rows with id greater than `after`
    pub fn scan_batch(
        &self,
        snapshot: &Snapshot,
        after: Option<RowId>,
        limit: usize,
    ) -> Vec<(RowId, Tuple)> {
        let lower = match after {
            Some(id) => Bound::Excluded(id),
            None => Bound::Unbounded,
        };
        self.rows
            .range((lower, Bound::Unbounded))
            .filter_map(|(&id, versions)| {
                versions
                    .iter()
                    .rev()
                    .find(|v| snapshot.sees(v.xmin, v.xmax))
                    .map(|v| (id, v.data.clone()))
            })
            .take(limit)
            .collect()
    }

    /// Visible rows whose index key equals `key`
    pub fn index_lookup(
        &self,
        index: &str,
        key: &IndexKey,
        snapshot: &Snapshot,
    ) -> Result<Vec<(RowId, Tuple)>> {
        let index = self.index(index)?;
        Ok(index
            .lookup(key)
            .into_iter()
            .filter_map(|row| {
                let data = self.visible(row, snapshot)?;
                (index.key_of(data) == *key).then(|| (row, data.clone()))
            })
            .collect())
    }

    /// Visible rows whose index key falls in the bounds, in key order
    pub fn index_range(
        &self,
        index: &str,
        lower: Bound<&IndexKey>,
        upper: Bound<&IndexKey>,
        snapshot: &Snapshot,
    ) -> Result<Vec<(RowId, Tuple)>> {
        let idx = self.index(index)?;
        Ok(idx
            .range(lower, upper)
            .into_iter()
            .filter_map(|row| {
                let data = self.visible(row, snapshot)?;
                let key = idx.key_of(data);
                let in_lower = match lower {
                    Bound::Included(k) => key >= *k,
                    Bound::Excluded(k) => key > *k,
                    Bound::Unbounded => true,
                };
                let in_upper = match upper {
                    Bound::Included(k) => key <= *k,
                    Bound::Excluded(k) => key < *k,
                    Bound::Unbounded => true,
                };
                (in_lower && in_upper).then(|| (row, data.clone()))
            })
            .collect())
    }

    fn index(&self, name: &str) -> Result<&Index> {
        self.indexes
            .get(name)
            .ok_or_else(|| Error::IndexNotFound(name.to_string()))
    }

    /// Build an index over every existing version
    pub fn create_index(&mut self, name: &str, slots: Vec<usize>, unique: bool) {
        let mut index = Index::new(name, slots, unique);
        for (&row, versions) in &self.rows {
            for version in versions {
                index.insert(&version.data, row);
            }
        }
        self.indexes.insert(name.to_string(), index);
    }

    pub fn drop_index(&mut self, name: &str) {
        self.indexes.remove(name);
    }

    pub fn has_index(&self, name: &str) -> bool {
        self.indexes.contains_key(name)
    }

    /// Whether `data` may be stored under the unique index `index`.
    ///
    /// `writer` is the writing transaction; `except` is the row being
    /// updated, whose own versions never conflict.
    pub fn key_state(
        &self,
        index: &str,
        data: &Tuple,
        writer: &Snapshot,
        except: Option<RowId>,
    ) -> Result<KeyState> {
        let index = self.index(index)?;
        let key = index.key_of(data);
        if key.has_null() {
            return Ok(KeyState::Free);
        }

        let mut state = KeyState::Free;
        for row in index.lookup(&key) {
            if Some(row) == except {
                continue;
            }
            let Some(versions) = self.rows.get(&row) else {
                continue;
            };
            for version in versions.iter().filter(|v| index.key_of(&v.data) == key) {
                let creator = if version.xmin == writer.txn_id {
                    TxnStatus::Committed(0)
                } else {
                    writer.status(version.xmin)
                };
                match creator {
                    TxnStatus::Aborted => continue,
                    TxnStatus::Active => {
                        state = KeyState::Pending(version.xmin);
                        continue;
                    }
                    TxnStatus::Committed(_) => {}
                }
                match version.xmax {
                    None => return Ok(KeyState::Taken),
                    Some(x) if x == writer.txn_id => {}
                    Some(x) => match writer.status(x) {
                        TxnStatus::Aborted => return Ok(KeyState::Taken),
                        TxnStatus::Active => state = KeyState::Pending(x),
                        TxnStatus::Committed(_) => {}
                    },
                }
            }
        }
        Ok(state)
    }

    fn check_unique(
        &self,
        unique: &[String],
        data: &Tuple,
        writer: &Snapshot,
        except: Option<RowId>,
    ) -> Result<Option<TxnId>> {
        for name in unique {
            match self.key_state(name, data, writer, except)? {
                KeyState::Free => {}
                KeyState::Taken => return Err(Error::UniqueViolation(name.clone())),
                KeyState::Pending(txn) => return Ok(Some(txn)),
            }
        }
        Ok(None)
    }

    fn index_version(&mut self, row: RowId, data: &Tuple) {
        for index in self.indexes.values_mut() {
            index.insert(data, row);
        }
    }

    /// Insert a new row created by the writer
    pub fn insert(&mut self, writer: &Snapshot, data: Tuple, unique: &[String]) -> Result<WriteOutcome> {
        if let Some(txn) = self.check_unique(unique, &data, writer, None)? {
            return Ok(WriteOutcome::Blocked(txn));
        }
        let row = self.next_row_id;
        self.next_row_id += 1;
        self.index_version(row, &data);
        self.rows.insert(
            row,
            vec![RowVersion {
                xmin: writer.txn_id,
                xmax: None,
                data,
            }],
        );
        Ok(WriteOutcome::Done(row))
    }

    /// Latest version not created by an aborted transaction
    fn latest(&self, row: RowId, writer: &Snapshot) -> Option<&RowVersion> {
        self.rows.get(&row)?.iter().rev().find(|v| {
            v.xmin == writer.txn_id || writer.status(v.xmin) != TxnStatus::Aborted
        })
    }

    /// Whether the latest version was changed after the writer's snapshot
    pub fn concurrent_change(&self, row: RowId, writer: &Snapshot) -> Option<WriteOutcome> {
        let Some(latest) = self.latest(row, writer) else {
            return Some(WriteOutcome::Concurrent(None));
        };
        if let Some(x) = latest.xmax {
            if x == writer.txn_id {
                // Already deleted or replaced by this transaction
                return Some(WriteOutcome::Concurrent(None));
            }
            if matches!(writer.status(x), TxnStatus::Committed(_)) {
                return Some(WriteOutcome::Concurrent(None));
            }
        }
        let own = latest.xmin == writer.txn_id;
        let in_snapshot = matches!(
            writer.status(latest.xmin),
            TxnStatus::Committed(ts) if ts <= writer.read_ts
        );
        if own || in_snapshot {
            None
        } else {
            Some(WriteOutcome::Concurrent(Some(latest.data.clone())))
        }
    }

    /// Replace the row with a new version. The writer must hold the row lock.
    pub fn update(
        &mut self,
        writer: &Snapshot,
        row: RowId,
        data: Tuple,
        unique: &[String],
    ) -> Result<WriteOutcome> {
        if let Some(outcome) = self.concurrent_change(row, writer) {
            return Ok(outcome);
        }
        if let Some(txn) = self.check_unique(unique, &data, writer, Some(row))? {
            return Ok(WriteOutcome::Blocked(txn));
        }
        self.index_version(row, &data);
        let me = writer.txn_id;
        let versions = self
            .rows
            .get_mut(&row)
            .ok_or_else(|| Error::Internal(format!("row {} vanished", row)))?;
        if let Some(latest) = versions
            .iter_mut()
            .rev()
            .find(|v| v.xmax.is_none())
        {
            latest.xmax = Some(me);
        }
        versions.push(RowVersion {
            xmin: me,
            xmax: None,
            data,
        });
        Ok(WriteOutcome::Done(row))
    }

    /// End the row's latest version. The writer must hold the row lock.
    pub fn delete(&mut self, writer: &Snapshot, row: RowId) -> Result<WriteOutcome> {
        if let Some(outcome) = self.concurrent_change(row, writer) {
            return Ok(outcome);
        }
        let me = writer.txn_id;
        let versions = self
            .rows
            .get_mut(&row)
            .ok_or_else(|| Error::Internal(format!("row {} vanished", row)))?;
        if let Some(latest) = versions.iter_mut().rev().find(|v| v.xmax.is_none()) {
            latest.xmax = Some(me);
        }
        Ok(WriteOutcome::Done(row))
    }

    /// Undo every version `txn` created or ended on `row`
    pub fn rollback_row(&mut self, txn: TxnId, row: RowId) {
        let Some(versions) = self.rows.get_mut(&row) else {
            return;
        };
        let (removed, kept): (Vec<RowVersion>, Vec<RowVersion>) =
            versions.drain(..).partition(|v| v.xmin == txn);
        *versions = kept;
        for version in versions.iter_mut() {
            if version.xmax == Some(txn) {
                version.xmax = None;
            }
        }
        let remaining: Vec<Tuple> = versions.iter().map(|v| v.data.clone()).collect();
        if versions.is_empty() {
            self.rows.remove(&row);
        }

        for index in self.indexes.values_mut() {
            for version in &removed {
                let key = index.key_of(&version.data);
                if !remaining.iter().any(|d| index.key_of(d) == key) {
                    index.remove(&key, row);
                }
            }
        }
    }

    // ========== Replay ==========

    /// Re-apply a committed insert from the log
    pub fn replay_insert(&mut self, txn: TxnId, row: RowId, data: Tuple) {
        self.index_version(row, &data);
        self.rows.entry(row).or_default().push(RowVersion {
            xmin: txn,
            xmax: None,
            data,
        });
        self.next_row_id = self.next_row_id.max(row + 1);
    }

    /// Re-apply a committed update (or delete, with `data` absent)
    pub fn replay_replace(&mut self, txn: TxnId, row: RowId, data: Option<Tuple>) {
        if let Some(versions) = self.rows.get_mut(&row) {
            if let Some(latest) = versions.iter_mut().rev().find(|v| v.xmax.is_none()) {
                latest.xmax = Some(txn);
            }
        }
        if let Some(data) = data {
            self.replay_insert(txn, row, data);
        }
    }

    // ========== Sequence ==========

    /// Next auto-increment value
    pub fn next_sequence(&mut self) -> i64 {
        self.sequence += 1;
        self.sequence
    }

    /// Make sure later values exceed an explicitly supplied one
    pub fn observe_sequence(&mut self, value: i64) {
        self.sequence = self.sequence.max(value);
    }

    pub fn sequence(&self) -> i64 {
        self.sequence
    }

    /// Number of row ids with at least one version
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tuple::Value;
    use crate::transaction::StatusTable;
    use std::sync::Arc;

    struct Fixture {
        statuses: Arc<StatusTable>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                statuses: Arc::new(StatusTable::new()),
            }
        }

        fn snap(&self, txn: TxnId, read_ts: u64) -> Snapshot {
            self.statuses.set(txn, TxnStatus::Active);
            Snapshot::new(txn, read_ts, false, Arc::clone(&self.statuses))
        }

        fn commit(&self, txn: TxnId, ts: u64) {
            self.statuses.set(txn, TxnStatus::Committed(ts));
        }
    }

    fn row(id: i64, name: &str) -> Tuple {
        Tuple::new(vec![Value::Integer(id), Value::from(name)])
    }

    fn with_pkey() -> TableStore {
        let mut table = TableStore::new(1);
        table.create_index("t_pkey", vec![0], true);
        table
    }

    fn unique() -> Vec<String> {
        vec!["t_pkey".to_string()]
    }

    #[test]
    fn test_insert_visibility() {
        let fx = Fixture::new();
        let mut table = with_pkey();
        let w = fx.snap(1, 0);
        let outcome = table.insert(&w, row(1, "a"), &unique()).unwrap();
        assert_eq!(outcome, WriteOutcome::Done(1));

        let reader = fx.snap(2, 0);
        assert!(table.visible(1, &reader).is_none());
        assert!(table.visible(1, &w).is_some());

        fx.commit(1, 1);
        let reader = fx.snap(3, 1);
        assert_eq!(table.scan_batch(&reader, None, 10).len(), 1);
    }

    #[test]
    fn test_unique_conflicts() {
        let fx = Fixture::new();
        let mut table = with_pkey();
        let w1 = fx.snap(1, 0);
        table.insert(&w1, row(1, "a"), &unique()).unwrap();

        let w2 = fx.snap(2, 0);
        assert_eq!(
            table.insert(&w2, row(1, "b"), &unique()).unwrap(),
            WriteOutcome::Blocked(1)
        );

        fx.commit(1, 1);
        assert!(matches!(
            table.insert(&w2, row(1, "b"), &unique()),
            Err(Error::UniqueViolation(_))
        ));

        let nulls = Tuple::new(vec![Value::Null, Value::from("n")]);
        assert!(matches!(
            table.insert(&w2, nulls.clone(), &unique()).unwrap(),
            WriteOutcome::Done(_)
        ));
        assert!(matches!(
            table.insert(&w2, nulls, &unique()).unwrap(),
            WriteOutcome::Done(_)
        ));
    }

    #[test]
    fn test_update_creates_version_and_rollback_restores() {
        let fx = Fixture::new();
        let mut table = with_pkey();
        let w1 = fx.snap(1, 0);
        table.insert(&w1, row(1, "a"), &unique()).unwrap();
        fx.commit(1, 1);

        let w2 = fx.snap(2, 1);
        table.update(&w2, 1, row(1, "b"), &unique()).unwrap();
        assert_eq!(table.visible(1, &w2), Some(&row(1, "b")));

        let reader = fx.snap(3, 1);
        assert_eq!(table.visible(1, &reader), Some(&row(1, "a")));

        table.rollback_row(2, 1);
        fx.statuses.set(2, TxnStatus::Aborted);
        let reader = fx.snap(4, 1);
        assert_eq!(table.visible(1, &reader), Some(&row(1, "a")));
    }

    #[test]
    fn test_concurrent_update_detected() {
        let fx = Fixture::new();
        let mut table = with_pkey();
        let w1 = fx.snap(1, 0);
        table.insert(&w1, row(1, "a"), &unique()).unwrap();
        fx.commit(1, 1);

        let old_snapshot = fx.snap(2, 1);
        let w3 = fx.snap(3, 1);
        table.update(&w3, 1, row(1, "c"), &unique()).unwrap();
        fx.commit(3, 2);

        assert_eq!(
            table.update(&old_snapshot, 1, row(1, "b"), &unique()).unwrap(),
            WriteOutcome::Concurrent(Some(row(1, "c")))
        );

        let w4 = fx.snap(4, 2);
        table.delete(&w4, 1).unwrap();
        fx.commit(4, 3);
        assert_eq!(
            table.delete(&old_snapshot, 1).unwrap(),
            WriteOutcome::Concurrent(None)
        );
    }

    #[test]
    fn test_index_lookup_rechecks_key() {
        let fx = Fixture::new();
        let mut table = with_pkey();
        let w1 = fx.snap(1, 0);
        table.insert(&w1, row(1, "a"), &unique()).unwrap();
        table.update(&w1, 1, row(2, "a"), &unique()).unwrap();
        fx.commit(1, 1);

        let reader = fx.snap(2, 1);
        let old = IndexKey::new(Value::Integer(1));
        let new = IndexKey::new(Value::Integer(2));
        assert!(table.index_lookup("t_pkey", &old, &reader).unwrap().is_empty());
        assert_eq!(table.index_lookup("t_pkey", &new, &reader).unwrap().len(), 1);
    }
}
