//! Row triggers
//!
//! Callbacks are registered per (table, event, timing) and run synchronously
//! inside the transaction of the statement that fired them. A BEFORE
//! callback on INSERT or UPDATE may rewrite the new row. Any callback may
//! issue further statements through its [`TriggerContext`]; those run in the
//! same transaction and may fire triggers of their own, up to the configured
//! nesting depth.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::catalog::{DataType, TableDef};
use crate::database::Shared;
use crate::error::{Error, Result};
use crate::executor::{ExecutionEngine, QueryResult};
use crate::sql::parse_sql;
use crate::storage::{Tuple, Value};
use crate::transaction::Transaction;

/// Write that fires a trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerEvent {
    Insert,
    Update,
    Delete,
}

/// When the callback runs relative to the write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerTiming {
    Before,
    After,
}

impl fmt::Display for TriggerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TriggerEvent::Insert => "INSERT",
            TriggerEvent::Update => "UPDATE",
            TriggerEvent::Delete => "DELETE",
        })
    }
}

impl fmt::Display for TriggerTiming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TriggerTiming::Before => "BEFORE",
            TriggerTiming::After => "AFTER",
        })
    }
}

/// A trigger callback
pub type TriggerFn = Arc<dyn Fn(&mut TriggerContext<'_>) -> Result<()> + Send + Sync>;

type TriggerKey = (String, TriggerEvent, TriggerTiming);

/// Registered triggers, in registration order per key
#[derive(Default)]
pub struct TriggerRegistry {
    triggers: RwLock<HashMap<TriggerKey, Vec<TriggerFn>>>,
}

impl TriggerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, table: &str, event: TriggerEvent, timing: TriggerTiming, callback: TriggerFn) {
        self.triggers
            .write()
            .entry((table.to_string(), event, timing))
            .or_default()
            .push(callback);
    }

    /// Remove every trigger on a table; returns how many were removed
    pub fn clear(&self, table: &str) -> usize {
        let mut triggers = self.triggers.write();
        let before: usize = triggers.values().map(Vec::len).sum();
        triggers.retain(|(name, _, _), _| name != table);
        before - triggers.values().map(Vec::len).sum::<usize>()
    }

    /// Callbacks for one key; cloned so none are held across their execution
    pub fn callbacks(&self, table: &str, event: TriggerEvent, timing: TriggerTiming) -> Vec<TriggerFn> {
        self.triggers
            .read()
            .get(&(table.to_string(), event, timing))
            .cloned()
            .unwrap_or_default()
    }
}

impl fmt::Debug for TriggerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let triggers = self.triggers.read();
        f.debug_struct("TriggerRegistry")
            .field("keys", &triggers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// What a trigger callback sees: the rows involved, and a way to run SQL
/// in the firing transaction
pub struct TriggerContext<'a> {
    db: &'a Shared,
    txn: &'a mut Transaction,
    depth: usize,
    table: String,
    event: TriggerEvent,
    timing: TriggerTiming,
    columns: Vec<(String, DataType)>,
    old: Option<Tuple>,
    new: Option<Tuple>,
}

impl<'a> TriggerContext<'a> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        db: &'a Shared,
        txn: &'a mut Transaction,
        depth: usize,
        table: &TableDef,
        event: TriggerEvent,
        timing: TriggerTiming,
        old: Option<Tuple>,
        new: Option<Tuple>,
    ) -> Self {
        Self {
            db,
            txn,
            depth,
            table: table.name.clone(),
            event,
            timing,
            columns: table
                .schema
                .columns()
                .map(|c| (c.name.clone(), c.data_type.clone()))
                .collect(),
            old,
            new,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn event(&self) -> TriggerEvent {
        self.event
    }

    pub fn timing(&self) -> TriggerTiming {
        self.timing
    }

    /// Row before the write (UPDATE, DELETE)
    pub fn old_row(&self) -> Option<&Tuple> {
        self.old.as_ref()
    }

    /// Row after the write (INSERT, UPDATE)
    pub fn new_row(&self) -> Option<&Tuple> {
        self.new.as_ref()
    }

    fn position(&self, column: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|(name, _)| name == column)
            .ok_or_else(|| Error::ColumnNotFound(column.to_string(), self.table.clone()))
    }

    pub fn old_value(&self, column: &str) -> Result<Option<&Value>> {
        let i = self.position(column)?;
        Ok(self.old.as_ref().and_then(|row| row.get(i)))
    }

    pub fn new_value(&self, column: &str) -> Result<Option<&Value>> {
        let i = self.position(column)?;
        Ok(self.new.as_ref().and_then(|row| row.get(i)))
    }

    /// Rewrite a column of the new row; only BEFORE INSERT/UPDATE callbacks may
    pub fn set_new_value(&mut self, column: &str, value: impl Into<Value>) -> Result<()> {
        if self.timing != TriggerTiming::Before || self.event == TriggerEvent::Delete {
            return Err(Error::ExecutionError(format!(
                "{} {} trigger cannot modify the new row",
                self.timing, self.event
            )));
        }
        let i = self.position(column)?;
        let value = value.into().cast(&self.columns[i].1, false)?;
        match self.new.as_mut() {
            Some(row) => {
                row.set(i, value);
                Ok(())
            }
            None => Err(Error::Internal("trigger has no new row".to_string())),
        }
    }

    /// Run SQL inside the firing transaction
    pub fn execute(&mut self, sql: &str) -> Result<QueryResult> {
        self.execute_with_params(sql, &[])
    }

    pub fn execute_with_params(&mut self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let depth = self.depth + 1;
        if depth > self.db.config.max_trigger_depth {
            return Err(Error::TriggerDepthExceeded(self.db.config.max_trigger_depth));
        }
        let mut result = QueryResult::empty();
        for statement in parse_sql(sql)? {
            let mut engine = ExecutionEngine::new(self.db, &mut *self.txn, params, depth);
            result = engine.execute(&statement)?;
        }
        Ok(result)
    }

    pub(crate) fn into_new_row(self) -> Option<Tuple> {
        self.new
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_keys() {
        let registry = TriggerRegistry::new();
        let noop: TriggerFn = Arc::new(|_| Ok(()));
        registry.register("books", TriggerEvent::Insert, TriggerTiming::After, noop.clone());
        registry.register("books", TriggerEvent::Insert, TriggerTiming::After, noop.clone());
        registry.register("authors", TriggerEvent::Delete, TriggerTiming::Before, noop);

        assert_eq!(
            registry
                .callbacks("books", TriggerEvent::Insert, TriggerTiming::After)
                .len(),
            2
        );
        assert!(registry
            .callbacks("books", TriggerEvent::Insert, TriggerTiming::Before)
            .is_empty());
        assert_eq!(registry.clear("books"), 2);
        assert!(registry
            .callbacks("books", TriggerEvent::Insert, TriggerTiming::After)
            .is_empty());
    }
}
