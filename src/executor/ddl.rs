//! CREATE / ALTER / DROP
//!
//! DDL edits the transaction's private catalog copy, which is published at
//! commit. Storage for new tables and indexes is created right away (nothing
//! else can see it yet) and torn down again on rollback; storage for dropped
//! tables and indexes is released only after commit.

use std::collections::HashSet;
use std::sync::atomic::Ordering;

use tracing::debug;

use super::executor::{ExecutionEngine, QueryResult};
use super::expr::truth;
use super::planner::{Planner, RowSchema};
use crate::catalog::{Column, IndexDef, MaterializedRows, TableDef, ViewDef};
use crate::error::{Error, Result};
use crate::sql::ast::{
    AlterTableAction, AlterTableStatement, CreateIndexStatement, CreateTableStatement,
    CreateViewStatement, DropTableStatement,
};
use crate::storage::{Change, Tuple, Value};
use crate::transaction::PendingCheck;

impl<'a> ExecutionEngine<'a> {
    pub(super) fn execute_create_table(&mut self, stmt: &CreateTableStatement) -> Result<QueryResult> {
        let catalog = self.catalog();
        if stmt.if_not_exists
            && (catalog.table_exists(&stmt.table_name) || catalog.get_view(&stmt.table_name).is_some())
        {
            return Ok(QueryResult::with_message(format!(
                "Table '{}' already exists",
                stmt.table_name
            )));
        }

        let id = self.db.next_table_id.fetch_add(1, Ordering::SeqCst);
        self.txn.catalog_mut().define_table(id, stmt)?;

        let catalog = self.catalog();
        let table = catalog.get_table(&stmt.table_name)?;
        self.db.storage.create_table(id);
        self.txn.log_change(Change::CreateTable { table: id });
        for index in catalog.table_indexes(&table.name) {
            self.build_index(table, index)?;
        }

        debug!(table = %stmt.table_name, id, "Table created");
        Ok(QueryResult::with_message(format!(
            "Table '{}' created",
            stmt.table_name
        )))
    }

    pub(super) fn execute_drop_table(&mut self, stmt: &DropTableStatement) -> Result<QueryResult> {
        if stmt.if_exists && !self.catalog().table_exists(&stmt.table_name) {
            return Ok(QueryResult::with_message(format!(
                "Table '{}' does not exist",
                stmt.table_name
            )));
        }
        let (table, indexes) = self
            .txn
            .catalog_mut()
            .drop_table(&stmt.table_name, stmt.cascade)?;
        self.txn.log_change(Change::DropTable { table: table.id });
        debug!(table = %table.name, indexes = indexes.len(), "Table dropped");
        Ok(QueryResult::with_message(format!(
            "Table '{}' dropped",
            table.name
        )))
    }

    pub(super) fn execute_alter_table(&mut self, stmt: &AlterTableStatement) -> Result<QueryResult> {
        let before = self.catalog().get_table(&stmt.table_name)?.clone();
        if let AlterTableAction::DropColumn {
            name,
            if_exists: true,
        } = &stmt.action
        {
            if before.get_column(name).is_none() {
                return Ok(QueryResult::with_message(format!(
                    "Column '{}' does not exist",
                    name
                )));
            }
        }
        let outcome = self
            .txn
            .catalog_mut()
            .alter_table(&stmt.table_name, &stmt.action)?;

        let name = match &stmt.action {
            AlterTableAction::RenameTable(new_name) => new_name.as_str(),
            _ => stmt.table_name.as_str(),
        };
        let catalog = self.catalog();
        let table = catalog.get_table(name)?;

        for index in &outcome.dropped_indexes {
            self.txn.log_change(Change::DropIndex {
                table: table.id,
                name: index.name.clone(),
            });
        }

        match &stmt.action {
            AlterTableAction::AddColumn(_) => {
                if let Some(column) = &outcome.added_column {
                    self.fill_column(table, column)?;
                }
            }
            AlterTableAction::AlterColumnType { name: column, .. } => {
                self.convert_column(&before, table, column)?;
            }
            _ => {}
        }
        if let Some(index) = &outcome.created_index {
            self.build_index(table, index)?;
        }
        if matches!(
            stmt.action,
            AlterTableAction::AddColumn(_)
                | AlterTableAction::SetNotNull(_)
                | AlterTableAction::AddConstraint(_)
        ) {
            self.validate_rows(table)?;
        }

        // New foreign keys must hold for the rows already there
        let new_keys: Vec<_> = table
            .foreign_keys
            .iter()
            .filter(|fk| !before.foreign_keys.iter().any(|old| old.name == fk.name))
            .collect();
        if !new_keys.is_empty() {
            let rows = self.visible_rows(table)?;
            for fk in new_keys {
                let positions = fk
                    .columns
                    .iter()
                    .map(|c| table.column_index(c))
                    .collect::<Result<Vec<_>>>()?;
                let mut keys = HashSet::new();
                for row in &rows {
                    let key: Vec<Value> = positions
                        .iter()
                        .map(|&i| row.get(i).cloned().unwrap_or(Value::Null))
                        .collect();
                    if !key.iter().any(Value::is_null) {
                        keys.insert(key);
                    }
                }
                for key in keys {
                    self.txn.add_check(
                        PendingCheck::ChildKey {
                            table: table.name.clone(),
                            constraint: fk.name.clone(),
                            key,
                        },
                        false,
                    );
                }
            }
        }

        debug!(table = %table.name, "Table altered");
        Ok(QueryResult::with_message(format!(
            "Table '{}' altered",
            stmt.table_name
        )))
    }

    pub(super) fn execute_create_index(&mut self, stmt: &CreateIndexStatement) -> Result<QueryResult> {
        if stmt.if_not_exists && self.catalog().get_index(&stmt.index_name).is_ok() {
            return Ok(QueryResult::with_message(format!(
                "Index '{}' already exists",
                stmt.index_name
            )));
        }
        let index = self.txn.catalog_mut().create_index(
            &stmt.index_name,
            &stmt.table_name,
            stmt.columns.clone(),
            stmt.unique,
        )?;
        let catalog = self.catalog();
        let table = catalog.get_table(&stmt.table_name)?;
        self.build_index(table, &index)?;
        Ok(QueryResult::with_message(format!(
            "Index '{}' created",
            stmt.index_name
        )))
    }

    pub(super) fn execute_drop_index(&mut self, name: &str, if_exists: bool) -> Result<QueryResult> {
        if if_exists && self.catalog().get_index(name).is_err() {
            return Ok(QueryResult::with_message(format!(
                "Index '{}' does not exist",
                name
            )));
        }
        let index = self.txn.catalog_mut().drop_index(name)?;
        self.txn.log_change(Change::DropIndex {
            table: index.table_id,
            name: index.name,
        });
        Ok(QueryResult::with_message(format!("Index '{}' dropped", name)))
    }

    pub(super) fn execute_create_view(&mut self, stmt: &CreateViewStatement) -> Result<QueryResult> {
        let catalog = self.catalog();
        let plan = Planner::new(&catalog).plan_query(&stmt.query, &[])?;
        let width = plan.schema().len();
        if !stmt.columns.is_empty() && stmt.columns.len() != width {
            return Err(Error::ExecutionError(format!(
                "view '{}' names {} columns but its query returns {}",
                stmt.name,
                stmt.columns.len(),
                width
            )));
        }
        let materialized = if stmt.materialized {
            Some(MaterializedRows {
                rows: self.execute_plan(&plan, None, None)?,
            })
        } else {
            None
        };
        // Stored rows carry no schema of their own, so pin the output names now
        let columns = if stmt.columns.is_empty() && stmt.materialized {
            plan.schema().names()
        } else {
            stmt.columns.clone()
        };

        self.txn.catalog_mut().create_view(
            ViewDef {
                name: stmt.name.clone(),
                columns,
                query: (*stmt.query).clone(),
                materialized,
            },
            stmt.or_replace,
        )?;
        let kind = if stmt.materialized { "Materialized view" } else { "View" };
        Ok(QueryResult::with_message(format!("{} '{}' created", kind, stmt.name)))
    }

    pub(super) fn execute_drop_view(
        &mut self,
        name: &str,
        if_exists: bool,
        materialized: bool,
    ) -> Result<QueryResult> {
        let exists = self
            .catalog()
            .get_view(name)
            .map_or(false, |view| view.is_materialized() == materialized);
        if if_exists && !exists {
            return Ok(QueryResult::with_message(format!(
                "View '{}' does not exist",
                name
            )));
        }
        self.txn.catalog_mut().drop_view(name, materialized)?;
        Ok(QueryResult::with_message(format!("View '{}' dropped", name)))
    }

    pub(super) fn execute_refresh_view(&mut self, name: &str) -> Result<QueryResult> {
        let catalog = self.catalog();
        let view = catalog
            .get_view(name)
            .filter(|view| view.is_materialized())
            .ok_or_else(|| Error::ViewNotFound(name.to_string()))?;
        let plan = Planner::new(&catalog).plan_query(&view.query, &[])?;
        let rows = self.execute_plan(&plan, None, None)?;
        let count = rows.len();
        self.txn.catalog_mut().set_materialized_rows(name, rows)?;
        debug!(view = name, rows = count, "Materialized view refreshed");
        Ok(QueryResult::with_affected_rows(
            count,
            format!("Materialized view '{}' refreshed", name),
        ))
    }

    // ========== Helpers ==========

    /// Create an index in storage, log it, and check uniqueness over the
    /// rows already present
    fn build_index(&mut self, table: &TableDef, index: &IndexDef) -> Result<()> {
        let slots = table.slots(&index.columns)?;
        self.db
            .storage
            .create_index(table.id, &index.name, slots.clone(), index.unique)?;
        self.txn.log_change(Change::CreateIndex {
            table: table.id,
            name: index.name.clone(),
            slots,
            unique: index.unique,
        });
        if !index.unique {
            return Ok(());
        }

        let positions = index
            .columns
            .iter()
            .map(|c| table.column_index(c))
            .collect::<Result<Vec<_>>>()?;
        let mut seen = HashSet::new();
        for row in self.visible_rows(table)? {
            let key: Vec<Value> = positions
                .iter()
                .map(|&i| row.get(i).cloned().unwrap_or(Value::Null))
                .collect();
            if key.iter().any(Value::is_null) {
                continue;
            }
            if !seen.insert(key) {
                return Err(Error::UniqueViolation(index.name.clone()));
            }
        }
        Ok(())
    }

    /// Logical rows of a table as this transaction's writes see them
    fn visible_rows(&mut self, table: &TableDef) -> Result<Vec<Tuple>> {
        let snapshot = self.check_snapshot();
        Ok(self
            .db
            .storage
            .scan_all(table.id, &snapshot)?
            .into_iter()
            .map(|(_, stored)| table.schema.to_logical(&stored))
            .collect())
    }

    /// NOT NULL and CHECK over every existing row
    fn validate_rows(&mut self, table: &TableDef) -> Result<()> {
        let catalog = self.catalog();
        let schema = RowSchema::for_table(&table.name, table);
        let mut planner = Planner::new(&catalog);
        let checks = table
            .checks
            .iter()
            .map(|check| Ok((check.name.clone(), planner.bind_row_expr(&check.expr, &schema)?)))
            .collect::<Result<Vec<_>>>()?;

        for row in self.visible_rows(table)? {
            for (column, value) in table.schema.columns().zip(row.values()) {
                if !column.nullable && value.is_null() {
                    return Err(Error::NullNotAllowed {
                        table: table.name.clone(),
                        column: column.name.clone(),
                    });
                }
            }
            for (name, check) in &checks {
                if truth(&self.eval(check, row.values(), None)?)? == Some(false) {
                    return Err(Error::CheckViolation(name.clone()));
                }
            }
        }
        Ok(())
    }

    /// Give existing rows the default or next sequence value of a new column
    fn fill_column(&mut self, table: &TableDef, column: &Column) -> Result<()> {
        if !column.auto_increment && column.default.is_none() {
            return Ok(());
        }
        let position = table.column_index(&column.name)?;
        let default = match &column.default {
            Some(expr) => {
                let catalog = self.catalog();
                let bound = Planner::new(&catalog).bind_row_expr(expr, &RowSchema::new(Vec::new()))?;
                Some(self.eval(&bound, &[], None)?.cast(&column.data_type, false)?)
            }
            None => None,
        };
        let filled = self.rewrite_rows(table, |engine, row| {
            let value = match &default {
                Some(value) => value.clone(),
                None => Value::Integer(engine.db.storage.next_sequence(table.id)?).cast(&column.data_type, false)?,
            };
            row.set(position, value);
            Ok(true)
        })?;
        if column.auto_increment {
            self.txn.log_change(Change::Sequence {
                table: table.id,
                value: self.db.storage.sequence(table.id)?,
            });
        }
        debug!(table = %table.name, column = %column.name, rows = filled, "Column filled");
        Ok(())
    }

    /// Rewrite a column's values in its new type; any value that would not
    /// survive the conversion fails the statement
    fn convert_column(&mut self, before: &TableDef, table: &TableDef, name: &str) -> Result<()> {
        let from = before.column(name)?.data_type.clone();
        let to = table.column(name)?.data_type.clone();
        if from == to {
            return Ok(());
        }
        let position = table.column_index(name)?;
        self.rewrite_rows(table, |_, row| {
            let Some(value) = row.get(position).cloned() else {
                return Ok(false);
            };
            if value.is_null() {
                return Ok(false);
            }
            if !value.converts_losslessly(&from, &to) {
                return Err(Error::TypeNarrowing {
                    column: name.to_string(),
                    to: to.to_string(),
                    value: value.to_string(),
                });
            }
            row.set(position, value.cast(&to, false)?);
            Ok(true)
        })?;
        Ok(())
    }

    /// Lock and rewrite every visible row `change` modifies; returns the
    /// number of rows written
    fn rewrite_rows(
        &mut self,
        table: &TableDef,
        mut change: impl FnMut(&mut Self, &mut Tuple) -> Result<bool>,
    ) -> Result<usize> {
        let catalog = self.catalog();
        let unique: Vec<String> = catalog
            .table_indexes(&table.name)
            .into_iter()
            .filter(|index| index.unique)
            .map(|index| index.name.clone())
            .collect();

        let ids: Vec<_> = self
            .db
            .storage
            .scan_all(table.id, &self.check_snapshot())?
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        let mut written = 0;
        for id in ids {
            self.db.txns.lock_row(self.txn.id(), table.id, id)?;
            // Re-read under the lock; the row may have moved on or gone
            let Some(stored) = self.db.storage.get(table.id, id, &self.check_snapshot())? else {
                continue;
            };
            let mut row = table.schema.to_logical(&stored);
            if !change(self, &mut row)? {
                continue;
            }
            let data = table.schema.to_stored(&row);
            self.store(table, Some(id), data.clone(), &unique)?;
            self.txn.record_write(table.id, table.version, id);
            self.txn.log_change(Change::Update {
                table: table.id,
                row: id,
                data,
            });
            written += 1;
        }
        Ok(written)
    }
}
