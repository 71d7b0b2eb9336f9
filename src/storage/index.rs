//! Ordered secondary indexes
//!
//! An index maps a key (the values of its slots) to every row whose versions
//! ever carried that key. Entries are not versioned: lookups must recheck the
//! visible version of each row against the key.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

use serde::{Deserialize, Serialize};

use super::tuple::{Tuple, Value};
use super::RowId;

/// A key in an index (wraps Value for comparison)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexKey(pub Vec<Value>);

impl IndexKey {
    /// Create a new index key from a single value
    pub fn new(value: Value) -> Self {
        Self(vec![value])
    }

    /// Create a new composite index key
    pub fn composite(values: Vec<Value>) -> Self {
        Self(values)
    }

    /// Any NULL part; such keys never collide under UNIQUE
    pub fn has_null(&self) -> bool {
        self.0.iter().any(Value::is_null)
    }

    /// Compare two index keys
    pub fn compare(&self, other: &IndexKey) -> Ordering {
        for (a, b) in self.0.iter().zip(other.0.iter()) {
            match a.total_cmp(b) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        self.0.len().cmp(&other.0.len())
    }
}

impl PartialEq for IndexKey {
    fn eq(&self, other: &Self) -> bool {
        self.compare(other) == Ordering::Equal
    }
}

impl Eq for IndexKey {}

impl PartialOrd for IndexKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.compare(other))
    }
}

impl Ord for IndexKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
    }
}

/// Index over physical slots of a table
#[derive(Debug, Clone)]
pub struct Index {
    pub name: String,
    pub slots: Vec<usize>,
    pub unique: bool,
    entries: BTreeMap<IndexKey, BTreeSet<RowId>>,
}

impl Index {
    pub fn new(name: impl Into<String>, slots: Vec<usize>, unique: bool) -> Self {
        Self {
            name: name.into(),
            slots,
            unique,
            entries: BTreeMap::new(),
        }
    }

    /// Key of a stored tuple
    pub fn key_of(&self, data: &Tuple) -> IndexKey {
        IndexKey(
            self.slots
                .iter()
                .map(|&slot| data.get(slot).cloned().unwrap_or(Value::Null))
                .collect(),
        )
    }

    pub fn insert(&mut self, data: &Tuple, row: RowId) {
        let key = self.key_of(data);
        self.entries.entry(key).or_default().insert(row);
    }

    /// Drop the entry for `row` under `key`
    pub fn remove(&mut self, key: &IndexKey, row: RowId) {
        if let Some(rows) = self.entries.get_mut(key) {
            rows.remove(&row);
            if rows.is_empty() {
                self.entries.remove(key);
            }
        }
    }

    /// Rows that may carry `key`
    pub fn lookup(&self, key: &IndexKey) -> Vec<RowId> {
        self.entries
            .get(key)
            .map(|rows| rows.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Rows that may carry a key within the bounds, in key order
    pub fn range(&self, lower: Bound<&IndexKey>, upper: Bound<&IndexKey>) -> Vec<RowId> {
        let mut seen = BTreeSet::new();
        let mut rows = Vec::new();
        for ids in self.entries.range::<IndexKey, _>((lower, upper)).map(|(_, ids)| ids) {
            for &id in ids {
                if seen.insert(id) {
                    rows.push(id);
                }
            }
        }
        rows
    }

    /// Number of distinct keys
    pub fn key_count(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: i64, name: &str) -> Tuple {
        Tuple::new(vec![Value::Integer(id), Value::from(name)])
    }

    #[test]
    fn test_index_key_ordering() {
        let k1 = IndexKey::new(Value::Integer(10));
        let k2 = IndexKey::new(Value::Integer(20));
        let k3 = IndexKey::new(Value::Float(10.0));

        assert!(k1 < k2);
        assert_eq!(k1, k3);
        assert!(IndexKey::new(Value::Null) < k1);
        assert!(IndexKey::composite(vec![Value::Integer(1), Value::Null]).has_null());
    }

    #[test]
    fn test_insert_lookup_remove() {
        let mut index = Index::new("by_name", vec![1], false);
        index.insert(&row(1, "alice"), 1);
        index.insert(&row(2, "bob"), 2);
        index.insert(&row(3, "alice"), 3);

        let alice = index.key_of(&row(0, "alice"));
        assert_eq!(index.lookup(&alice), vec![1, 3]);

        index.remove(&alice, 1);
        assert_eq!(index.lookup(&alice), vec![3]);
        index.remove(&alice, 3);
        assert_eq!(index.key_count(), 1);
    }

    #[test]
    fn test_range_scan() {
        let mut index = Index::new("by_id", vec![0], true);
        for id in 1..=10 {
            index.insert(&row(id, "x"), id as RowId);
        }
        let lo = IndexKey::new(Value::Integer(3));
        let hi = IndexKey::new(Value::Integer(6));

        let rows = index.range(Bound::Included(&lo), Bound::Excluded(&hi));
        assert_eq!(rows, vec![3, 4, 5]);
    }
}
