//! INSERT, UPDATE and DELETE
//!
//! A write to an existing row takes the row lock first and then asks storage
//! whether the row changed after the statement's snapshot. Under READ
//! COMMITTED the newest version is re-qualified and used instead; the
//! snapshot levels fail with `SerializationFailure`.
//!
//! Foreign keys are enforced as part of the write. RESTRICT is checked before
//! the referenced row changes, CASCADE and SET NULL act on the referencing
//! rows right after it, and NO ACTION (like every referencing-side check) is
//! queued on the transaction and verified when the statement ends, or at
//! commit for deferred keys.

use std::cmp::Ordering;

use tracing::debug;

use super::executor::{probe_value, ExecutionEngine, QueryResult};
use super::expr::truth;
use super::planner::{LogicalPlan, Planner, RowSchema, ScalarExpr};
use crate::catalog::{Catalog, ForeignKey, ReferentialAction, TableDef};
use crate::error::{Error, Result};
use crate::sql::ast::{DeleteStatement, InsertSource, InsertStatement, UpdateStatement};
use crate::storage::{Change, IndexKey, RowId, Tuple, Value, WriteOutcome};
use crate::transaction::{PendingCheck, Snapshot};
use crate::trigger::{TriggerContext, TriggerEvent, TriggerTiming};

/// What every row write to one table needs
struct WriteTarget {
    table: TableDef,
    /// Unique indexes the storage layer must check
    unique: Vec<String>,
    checks: Vec<(String, ScalarExpr)>,
    sequenced: bool,
}

impl WriteTarget {
    fn new(catalog: &Catalog, table: &TableDef) -> Result<Self> {
        let unique = catalog
            .table_indexes(&table.name)
            .into_iter()
            .filter(|index| index.unique)
            .map(|index| index.name.clone())
            .collect();
        let schema = RowSchema::for_table(&table.name, table);
        let mut planner = Planner::new(catalog);
        let checks = table
            .checks
            .iter()
            .map(|check| Ok((check.name.clone(), planner.bind_row_expr(&check.expr, &schema)?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            table: table.clone(),
            unique,
            checks,
            sequenced: table.schema.columns().any(|c| c.auto_increment),
        })
    }
}

/// How a row read under the statement snapshot is re-qualified when a
/// newer committed version turns up
enum Recheck<'p> {
    Predicate(Option<&'p ScalarExpr>),
    Key { columns: &'p [usize], key: &'p [Value] },
}

/// New column values for an updated row
enum Patch<'p> {
    /// Expressions over the current row
    Assign(&'p [(usize, ScalarExpr)]),
    Set(Vec<(usize, Value)>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    BeforeWrite,
    AfterWrite,
}

/// Values of `columns` in a logical row
fn key_of(table: &TableDef, row: &Tuple, columns: &[String]) -> Result<Vec<Value>> {
    columns
        .iter()
        .map(|c| Ok(row.get(table.column_index(c)?).cloned().unwrap_or(Value::Null)))
        .collect()
}

fn matches_key(row: &Tuple, positions: &[usize], key: &[Value]) -> bool {
    positions.iter().zip(key).all(|(&i, k)| {
        row.get(i)
            .map_or(false, |v| !v.is_null() && v.compare(k) == Some(Ordering::Equal))
    })
}

fn render_key(key: &[Value]) -> String {
    key.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(", ")
}

fn lookup_foreign_key<'c>(
    catalog: &'c Catalog,
    table: &str,
    constraint: &str,
) -> Option<(&'c TableDef, &'c ForeignKey)> {
    let owner = catalog.get_table(table).ok()?;
    let fk = owner.foreign_keys.iter().find(|fk| fk.name == constraint)?;
    Some((owner, fk))
}

fn parent_violation(owner: &TableDef, fk: &ForeignKey, key: &[Value]) -> Error {
    Error::ForeignKeyViolation(format!(
        "update or delete on table '{}' violates foreign key constraint '{}' on table '{}': key ({})=({}) is still referenced",
        fk.ref_table,
        fk.name,
        owner.name,
        fk.ref_columns.join(", "),
        render_key(key)
    ))
}

/// The WHERE predicate of a DML target plan
fn target_predicate(plan: &LogicalPlan) -> Option<&ScalarExpr> {
    match plan {
        LogicalPlan::Filter { predicate, .. } => Some(predicate),
        _ => None,
    }
}

impl<'a> ExecutionEngine<'a> {
    fn target_table<'c>(&self, catalog: &'c Catalog, name: &str, verb: &str) -> Result<&'c TableDef> {
        if catalog.get_view(name).is_some() {
            return Err(Error::ExecutionError(format!(
                "cannot {} view '{}'",
                verb, name
            )));
        }
        catalog.get_table(name)
    }

    /// Snapshot of everything committed now, plus this transaction's writes.
    /// Constraint checks and the writes themselves use it.
    pub(super) fn check_snapshot(&self) -> Snapshot {
        self.db.txns.snapshot(self.txn.id(), false)
    }

    pub(super) fn execute_insert(&mut self, stmt: &InsertStatement) -> Result<QueryResult> {
        let catalog = self.catalog();
        let table = self.target_table(&catalog, &stmt.table_name, "insert into")?;

        let positions: Vec<usize> = match &stmt.columns {
            Some(columns) => {
                let mut positions = Vec::with_capacity(columns.len());
                for name in columns {
                    let i = table.column_index(name)?;
                    if positions.contains(&i) {
                        return Err(Error::ExecutionError(format!(
                            "column '{}' specified more than once",
                            name
                        )));
                    }
                    positions.push(i);
                }
                positions
            }
            None => (0..table.schema.column_count()).collect(),
        };

        let mut planner = Planner::new(&catalog);
        let sources: Vec<Vec<Value>> = match &stmt.source {
            InsertSource::Values(rows) => {
                let empty = RowSchema::new(Vec::new());
                let mut sources = Vec::with_capacity(rows.len());
                for row in rows {
                    if row.len() != positions.len() {
                        return Err(Error::ExecutionError(format!(
                            "INSERT has {} expressions but {} target columns",
                            row.len(),
                            positions.len()
                        )));
                    }
                    let mut values = Vec::with_capacity(row.len());
                    for expr in row {
                        let bound = planner.bind_row_expr(expr, &empty)?;
                        values.push(self.eval(&bound, &[], None)?);
                    }
                    sources.push(values);
                }
                sources
            }
            InsertSource::Query(query) => {
                let plan = planner.plan_query(query, &[])?;
                if plan.schema().len() != positions.len() {
                    return Err(Error::ExecutionError(format!(
                        "INSERT query returns {} columns but {} target columns",
                        plan.schema().len(),
                        positions.len()
                    )));
                }
                self.execute_plan(&plan, None, None)?
                    .into_iter()
                    .map(Tuple::into_values)
                    .collect()
            }
        };

        let target = WriteTarget::new(&catalog, table)?;
        let mut inserted = 0;
        for values in sources {
            let row = self.complete_row(&mut planner, table, &positions, values)?;
            self.insert_row(&target, row)?;
            inserted += 1;
        }
        debug!(table = %table.name, rows = inserted, "Rows inserted");
        Ok(QueryResult::with_affected_rows(
            inserted,
            format!("{} row(s) inserted", inserted),
        ))
    }

    /// Full logical row from the supplied values, defaults and sequences
    fn complete_row(
        &mut self,
        planner: &mut Planner<'_>,
        table: &TableDef,
        positions: &[usize],
        values: Vec<Value>,
    ) -> Result<Tuple> {
        let mut supplied: Vec<Option<Value>> = vec![None; table.schema.column_count()];
        for (&i, value) in positions.iter().zip(values) {
            supplied[i] = Some(value);
        }

        let empty = RowSchema::new(Vec::new());
        let mut row = Vec::with_capacity(supplied.len());
        for (column, value) in table.schema.columns().zip(supplied) {
            let value = match value {
                Some(value) if !(column.auto_increment && value.is_null()) => {
                    let value = value.cast(&column.data_type, false)?;
                    if column.auto_increment {
                        if let Some(n) = value.as_i64() {
                            self.db.storage.observe_sequence(table.id, n)?;
                        }
                    }
                    value
                }
                _ if column.auto_increment => {
                    Value::Integer(self.db.storage.next_sequence(table.id)?).cast(&column.data_type, false)?
                }
                _ => match &column.default {
                    Some(expr) => {
                        let bound = planner.bind_row_expr(expr, &empty)?;
                        self.eval(&bound, &[], None)?.cast(&column.data_type, false)?
                    }
                    None => Value::Null,
                },
            };
            row.push(value);
        }
        Ok(Tuple::new(row))
    }

    pub(super) fn execute_update(&mut self, stmt: &UpdateStatement) -> Result<QueryResult> {
        let catalog = self.catalog();
        let table = self.target_table(&catalog, &stmt.table_name, "update")?;
        let binding = stmt.alias.as_deref().unwrap_or(&table.name);
        let schema = RowSchema::for_table(binding, table);

        let mut planner = Planner::new(&catalog);
        let plan = planner.plan_target(table, binding, stmt.where_clause.as_ref())?;
        let mut assignments: Vec<(usize, ScalarExpr)> = Vec::with_capacity(stmt.assignments.len());
        for assignment in &stmt.assignments {
            let i = table.column_index(&assignment.column)?;
            if assignments.iter().any(|(j, _)| *j == i) {
                return Err(Error::ExecutionError(format!(
                    "column '{}' assigned more than once",
                    assignment.column
                )));
            }
            assignments.push((i, planner.bind_row_expr(&assignment.value, &schema)?));
        }

        let target = WriteTarget::new(&catalog, table)?;
        let predicate = target_predicate(&plan);
        let mut updated = 0;
        for (row, seen) in self.table_rows(&plan, None)? {
            if self.update_row(
                &target,
                row,
                seen,
                Recheck::Predicate(predicate),
                Patch::Assign(&assignments),
            )? {
                updated += 1;
            }
        }
        debug!(table = %table.name, rows = updated, "Rows updated");
        Ok(QueryResult::with_affected_rows(
            updated,
            format!("{} row(s) updated", updated),
        ))
    }

    pub(super) fn execute_delete(&mut self, stmt: &DeleteStatement) -> Result<QueryResult> {
        let catalog = self.catalog();
        let table = self.target_table(&catalog, &stmt.table_name, "delete from")?;
        let binding = stmt.alias.as_deref().unwrap_or(&table.name);

        let plan = Planner::new(&catalog).plan_target(table, binding, stmt.where_clause.as_ref())?;
        let target = WriteTarget::new(&catalog, table)?;
        let predicate = target_predicate(&plan);
        let mut deleted = 0;
        for (row, seen) in self.table_rows(&plan, None)? {
            if self.delete_row(&target, row, seen, Recheck::Predicate(predicate))? {
                deleted += 1;
            }
        }
        debug!(table = %table.name, rows = deleted, "Rows deleted");
        Ok(QueryResult::with_affected_rows(
            deleted,
            format!("{} row(s) deleted", deleted),
        ))
    }

    fn insert_row(&mut self, target: &WriteTarget, row: Tuple) -> Result<()> {
        let table = &target.table;
        let row = self
            .fire_triggers(table, TriggerEvent::Insert, TriggerTiming::Before, None, Some(row))?
            .ok_or_else(|| Error::Internal("BEFORE INSERT trigger lost the row".to_string()))?;
        self.validate_row(target, &row)?;

        let stored = table.schema.to_stored(&row);
        let id = self.store(table, None, stored.clone(), &target.unique)?;
        // New rows are locked so no other writer touches them before commit
        self.db.txns.lock_row(self.txn.id(), table.id, id)?;
        self.txn.record_write(table.id, table.version, id);
        self.txn.log_change(Change::Insert {
            table: table.id,
            row: id,
            data: stored,
        });
        if target.sequenced {
            self.txn.log_change(Change::Sequence {
                table: table.id,
                value: self.db.storage.sequence(table.id)?,
            });
        }

        self.queue_child_checks(table, None, &row);
        self.fire_triggers(table, TriggerEvent::Insert, TriggerTiming::After, None, Some(row))?;
        Ok(())
    }

    /// Returns false when the row no longer qualifies
    fn update_row(
        &mut self,
        target: &WriteTarget,
        id: RowId,
        seen: Tuple,
        recheck: Recheck<'_>,
        patch: Patch<'_>,
    ) -> Result<bool> {
        let table = &target.table;
        let Some(old) = self.lock_for_write(table, id, seen, &recheck)? else {
            return Ok(false);
        };
        let new = self.apply_patch(table, &patch, &old)?;
        let new = self
            .fire_triggers(table, TriggerEvent::Update, TriggerTiming::Before, Some(&old), Some(new))?
            .ok_or_else(|| Error::Internal("BEFORE UPDATE trigger lost the row".to_string()))?;
        self.validate_row(target, &new)?;
        self.enforce_referencing(table, &old, Some(&new), Phase::BeforeWrite)?;

        let stored = table.schema.to_stored(&new);
        self.store(table, Some(id), stored.clone(), &target.unique)?;
        self.txn.record_write(table.id, table.version, id);
        self.txn.log_change(Change::Update {
            table: table.id,
            row: id,
            data: stored,
        });

        self.queue_child_checks(table, Some(&old), &new);
        self.enforce_referencing(table, &old, Some(&new), Phase::AfterWrite)?;
        self.fire_triggers(table, TriggerEvent::Update, TriggerTiming::After, Some(&old), Some(new))?;
        Ok(true)
    }

    /// Returns false when the row is already gone or no longer qualifies
    fn delete_row(
        &mut self,
        target: &WriteTarget,
        id: RowId,
        seen: Tuple,
        recheck: Recheck<'_>,
    ) -> Result<bool> {
        let table = &target.table;
        let Some(old) = self.lock_for_write(table, id, seen, &recheck)? else {
            return Ok(false);
        };
        self.fire_triggers(table, TriggerEvent::Delete, TriggerTiming::Before, Some(&old), None)?;
        self.enforce_referencing(table, &old, None, Phase::BeforeWrite)?;

        let writer = self.check_snapshot();
        match self.db.storage.delete(table.id, &writer, id)? {
            WriteOutcome::Done(_) => {}
            other => {
                return Err(Error::Internal(format!(
                    "row {} of '{}' changed while locked: {:?}",
                    id, table.name, other
                )))
            }
        }
        self.txn.record_write(table.id, table.version, id);
        self.txn.log_change(Change::Delete {
            table: table.id,
            row: id,
        });

        self.enforce_referencing(table, &old, None, Phase::AfterWrite)?;
        self.fire_triggers(table, TriggerEvent::Delete, TriggerTiming::After, Some(&old), None)?;
        Ok(true)
    }

    /// Lock a row for writing and return the version to write over, or
    /// `None` when it should be skipped
    fn lock_for_write(
        &mut self,
        table: &TableDef,
        id: RowId,
        seen: Tuple,
        recheck: &Recheck<'_>,
    ) -> Result<Option<Tuple>> {
        self.db.txns.lock_row(self.txn.id(), table.id, id)?;
        let snapshot = self.txn.snapshot()?.clone();
        let latest = match self.db.storage.check_write(table.id, id, &snapshot)? {
            None => {
                // Unchanged, or last written by this transaction (maybe by a
                // trigger or cascade during this statement)
                let current = self.db.storage.get(table.id, id, &self.check_snapshot())?;
                return Ok(Some(current.map_or(seen, |data| table.schema.to_logical(&data))));
            }
            Some(WriteOutcome::Concurrent(latest)) => latest,
            Some(other) => {
                return Err(Error::Internal(format!(
                    "unexpected state of row {} in '{}': {:?}",
                    id, table.name, other
                )))
            }
        };

        let own = self.txn.writes().any(|w| *w == (table.id, id));
        if latest.is_none() && own {
            return Ok(None);
        }
        if self.txn.isolation().uses_transaction_snapshot() {
            return Err(Error::SerializationFailure(format!(
                "concurrent {} of a row in '{}'",
                if latest.is_some() { "update" } else { "delete" },
                table.name
            )));
        }
        let Some(data) = latest else {
            return Ok(None);
        };
        let row = table.schema.to_logical(&data);
        debug!(table = %table.name, row = id, "Re-checking concurrently updated row");
        Ok(self.still_matches(recheck, &row)?.then_some(row))
    }

    fn still_matches(&mut self, recheck: &Recheck<'_>, row: &Tuple) -> Result<bool> {
        match recheck {
            Recheck::Predicate(None) => Ok(true),
            Recheck::Predicate(Some(predicate)) => self.eval_predicate(predicate, row.values(), None),
            Recheck::Key { columns, key } => Ok(matches_key(row, columns, key)),
        }
    }

    fn apply_patch(&mut self, table: &TableDef, patch: &Patch<'_>, old: &Tuple) -> Result<Tuple> {
        let mut new = old.clone();
        let assign = |new: &mut Tuple, i: usize, value: Value| -> Result<()> {
            let column = table
                .schema
                .get_column_by_index(i)
                .ok_or_else(|| Error::Internal(format!("column {} of '{}'", i, table.name)))?;
            new.set(i, value.cast(&column.data_type, false)?);
            Ok(())
        };
        match patch {
            Patch::Assign(assignments) => {
                for (i, expr) in assignments.iter() {
                    let value = self.eval(expr, old.values(), None)?;
                    assign(&mut new, *i, value)?;
                }
            }
            Patch::Set(values) => {
                for (i, value) in values {
                    assign(&mut new, *i, value.clone())?;
                }
            }
        }
        Ok(new)
    }

    /// NOT NULL and CHECK
    fn validate_row(&mut self, target: &WriteTarget, row: &Tuple) -> Result<()> {
        let table = &target.table;
        for (column, value) in table.schema.columns().zip(row.values()) {
            if !column.nullable && value.is_null() {
                return Err(Error::NullNotAllowed {
                    table: table.name.clone(),
                    column: column.name.clone(),
                });
            }
        }
        for (name, check) in &target.checks {
            let value = self.eval(check, row.values(), None)?;
            if truth(&value)? == Some(false) {
                return Err(Error::CheckViolation(name.clone()));
            }
        }
        Ok(())
    }

    /// Write a stored tuple, waiting out transactions that may still claim
    /// one of its unique keys
    pub(super) fn store(&mut self, table: &TableDef, row: Option<RowId>, data: Tuple, unique: &[String]) -> Result<RowId> {
        loop {
            let writer = self.check_snapshot();
            let outcome = match row {
                None => self.db.storage.insert(table.id, &writer, data.clone(), unique)?,
                Some(id) => self
                    .db
                    .storage
                    .update(table.id, &writer, id, data.clone(), unique)?,
            };
            match outcome {
                WriteOutcome::Done(id) => return Ok(id),
                WriteOutcome::Blocked(other) => self.db.txns.wait_for(self.txn.id(), other)?,
                WriteOutcome::Concurrent(_) => {
                    return Err(Error::Internal(format!(
                        "row of '{}' changed while locked",
                        table.name
                    )))
                }
            }
        }
    }

    fn fire_triggers(
        &mut self,
        table: &TableDef,
        event: TriggerEvent,
        timing: TriggerTiming,
        old: Option<&Tuple>,
        new: Option<Tuple>,
    ) -> Result<Option<Tuple>> {
        let callbacks = self.db.triggers.callbacks(&table.name, event, timing);
        if callbacks.is_empty() {
            return Ok(new);
        }
        debug!(table = %table.name, %event, %timing, count = callbacks.len(), "Firing triggers");
        let mut context = TriggerContext::new(
            self.db,
            &mut *self.txn,
            self.depth,
            table,
            event,
            timing,
            old.cloned(),
            new,
        );
        for callback in &callbacks {
            callback(&mut context).map_err(|e| match e {
                Error::TriggerFailed { .. } | Error::TriggerDepthExceeded(_) => e,
                other => Error::TriggerFailed {
                    table: table.name.clone(),
                    message: other.to_string(),
                },
            })?;
        }
        Ok(context.into_new_row())
    }

    // ========== Foreign keys ==========

    /// Queue a parent-existence check for every foreign key whose value changed
    fn queue_child_checks(&mut self, table: &TableDef, old: Option<&Tuple>, new: &Tuple) {
        for fk in &table.foreign_keys {
            let Ok(key) = key_of(table, new, &fk.columns) else {
                continue;
            };
            // A key with a NULL part references nothing
            if key.iter().any(Value::is_null) {
                continue;
            }
            if let Some(old) = old {
                if key_of(table, old, &fk.columns).map_or(false, |k| k == key) {
                    continue;
                }
            }
            self.txn.add_check(
                PendingCheck::ChildKey {
                    table: table.name.clone(),
                    constraint: fk.name.clone(),
                    key,
                },
                fk.deferred,
            );
        }
    }

    /// Apply the referential actions of every foreign key pointing at `table`
    /// for a row that is updated (`new` present) or deleted
    fn enforce_referencing(
        &mut self,
        table: &TableDef,
        old: &Tuple,
        new: Option<&Tuple>,
        phase: Phase,
    ) -> Result<()> {
        let catalog = self.catalog();
        for (owner, fk) in catalog.referencing_keys(&table.name) {
            let old_key = key_of(table, old, &fk.ref_columns)?;
            if old_key.iter().any(Value::is_null) {
                continue;
            }
            let new_key = match new {
                Some(new) => {
                    let key = key_of(table, new, &fk.ref_columns)?;
                    if key == old_key {
                        continue;
                    }
                    Some(key)
                }
                None => None,
            };
            let action = if new.is_some() { fk.on_update } else { fk.on_delete };

            match (phase, action) {
                (Phase::BeforeWrite, ReferentialAction::Restrict) => {
                    if !self.referencing_rows(owner, fk, &old_key)?.is_empty() {
                        return Err(parent_violation(owner, fk, &old_key));
                    }
                }
                (Phase::AfterWrite, ReferentialAction::NoAction) => {
                    self.txn.add_check(
                        PendingCheck::ParentKey {
                            table: owner.name.clone(),
                            constraint: fk.name.clone(),
                            key: old_key,
                        },
                        fk.deferred,
                    );
                }
                (Phase::AfterWrite, ReferentialAction::Cascade | ReferentialAction::SetNull) => {
                    let child = WriteTarget::new(&catalog, owner)?;
                    let positions = fk
                        .columns
                        .iter()
                        .map(|c| owner.column_index(c))
                        .collect::<Result<Vec<_>>>()?;
                    let children = self.referencing_rows(owner, fk, &old_key)?;
                    debug!(
                        table = %owner.name,
                        constraint = %fk.name,
                        ?action,
                        rows = children.len(),
                        "Applying referential action"
                    );
                    for (id, row) in children {
                        let recheck = Recheck::Key {
                            columns: &positions,
                            key: &old_key,
                        };
                        match (action, &new_key) {
                            (ReferentialAction::Cascade, None) => {
                                self.delete_row(&child, id, row, recheck)?;
                            }
                            (ReferentialAction::Cascade, Some(key)) => {
                                let set = positions.iter().copied().zip(key.iter().cloned()).collect();
                                self.update_row(&child, id, row, recheck, Patch::Set(set))?;
                            }
                            _ => {
                                let set = positions.iter().map(|&i| (i, Value::Null)).collect();
                                self.update_row(&child, id, row, recheck, Patch::Set(set))?;
                            }
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Row of the referenced table holding `key`. With `lock`, the row is
    /// share-locked so it cannot go away before this transaction ends.
    fn find_parent(&mut self, catalog: &Catalog, fk: &ForeignKey, key: &[Value], lock: bool) -> Result<Option<RowId>> {
        let parent = catalog.get_table(&fk.ref_table)?;
        let unique = parent.find_unique_key(&fk.ref_columns).ok_or_else(|| {
            Error::Internal(format!(
                "foreign key '{}' has no referenced key on '{}'",
                fk.name, parent.name
            ))
        })?;

        // Probe in the key's own column order
        let mut probe = Vec::with_capacity(unique.columns.len());
        for column in &unique.columns {
            let pos = fk
                .ref_columns
                .iter()
                .position(|c| c == column)
                .ok_or_else(|| Error::Internal(format!("column '{}' not in foreign key", column)))?;
            match probe_value(key[pos].clone(), &parent.column(column)?.data_type) {
                Some(value) => probe.push(value),
                None => return Ok(None),
            }
        }
        let probe = IndexKey::composite(probe);

        let found = self
            .db
            .storage
            .index_lookup(parent.id, &unique.name, &probe, &self.check_snapshot())?;
        let Some(&(row, _)) = found.first() else {
            return Ok(None);
        };
        if !lock {
            return Ok(Some(row));
        }
        self.db.txns.share_row(self.txn.id(), parent.id, row)?;
        // The row may have been deleted while we waited for the lock
        let found = self
            .db
            .storage
            .index_lookup(parent.id, &unique.name, &probe, &self.check_snapshot())?;
        Ok(found.first().map(|(row, _)| *row))
    }

    /// Rows of `owner` whose foreign key `fk` holds `key`
    fn referencing_rows(&mut self, owner: &TableDef, fk: &ForeignKey, key: &[Value]) -> Result<Vec<(RowId, Tuple)>> {
        let positions = fk
            .columns
            .iter()
            .map(|c| owner.column_index(c))
            .collect::<Result<Vec<_>>>()?;
        self.txn.record_read(owner.id);
        let snapshot = self.check_snapshot();
        Ok(self
            .db
            .storage
            .scan_all(owner.id, &snapshot)?
            .into_iter()
            .map(|(id, stored)| (id, owner.schema.to_logical(&stored)))
            .filter(|(_, row)| matches_key(row, &positions, key))
            .collect())
    }

    fn verify(&mut self, check: PendingCheck) -> Result<()> {
        let catalog = self.catalog();
        match check {
            PendingCheck::ChildKey {
                table,
                constraint,
                key,
            } => {
                // Dropped since the write: nothing to enforce
                let Some((owner, fk)) = lookup_foreign_key(&catalog, &table, &constraint) else {
                    return Ok(());
                };
                if self.find_parent(&catalog, fk, &key, true)?.is_some() {
                    return Ok(());
                }
                // The referencing row may be gone again
                if self.referencing_rows(owner, fk, &key)?.is_empty() {
                    return Ok(());
                }
                Err(Error::ForeignKeyViolation(format!(
                    "insert or update on table '{}' violates foreign key constraint '{}': key ({})=({}) is not present in table '{}'",
                    owner.name,
                    fk.name,
                    fk.columns.join(", "),
                    render_key(&key),
                    fk.ref_table
                )))
            }
            PendingCheck::ParentKey {
                table,
                constraint,
                key,
            } => {
                let Some((owner, fk)) = lookup_foreign_key(&catalog, &table, &constraint) else {
                    return Ok(());
                };
                // The key may have been re-created
                if self.find_parent(&catalog, fk, &key, false)?.is_some() {
                    return Ok(());
                }
                if self.referencing_rows(owner, fk, &key)?.is_empty() {
                    return Ok(());
                }
                Err(parent_violation(owner, fk, &key))
            }
        }
    }

    /// Verify the foreign key checks queued by the statement that just ran
    pub(crate) fn check_statement_constraints(&mut self) -> Result<()> {
        for check in self.txn.take_statement_checks() {
            self.verify(check)?;
        }
        Ok(())
    }

    /// Verify deferred foreign keys; called once at commit
    pub(crate) fn check_deferred_constraints(&mut self) -> Result<()> {
        for check in self.txn.take_deferred_checks() {
            self.verify(check)?;
        }
        Ok(())
    }
}
