//! System Catalog for KeelDB
//!
//! The catalog is a plain value: transactions read an `Arc<Catalog>`
//! snapshot and DDL works on a private clone that is published at commit.
//! Every mutation bumps the catalog `version`, and the touched tables'
//! own `version`, so commit can detect concurrent schema changes.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::schema::{
    CheckConstraint, Column, ForeignKey, IndexDef, MaterializedRows, ReferentialAction, Schema,
    TableDef, TableId, UniqueConstraint, ViewDef,
};
use super::types::DataType;
use crate::error::{Error, Result};
use crate::sql::ast::{
    AlterTableAction, ColumnDef, CreateTableStatement, Expr, ForeignKeyClause, TableConstraint,
};
use crate::storage::tuple::Tuple;

/// System Catalog - all database metadata at one version
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    version: u64,
    /// Table definitions by name
    tables: IndexMap<String, TableDef>,
    /// Index definitions by name
    indexes: IndexMap<String, IndexDef>,
    /// View definitions by name
    views: IndexMap<String, ViewDef>,
}

/// Metadata side effects of an ALTER TABLE the executor must mirror in storage
#[derive(Debug, Default)]
pub struct AlterOutcome {
    /// Column added by ADD COLUMN
    pub added_column: Option<Column>,
    /// Index created for a new PRIMARY KEY / UNIQUE constraint
    pub created_index: Option<IndexDef>,
    /// Indexes removed with a dropped constraint
    pub dropped_indexes: Vec<IndexDef>,
}

impl Catalog {
    /// Create a new empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Monotonic version, bumped by every mutation
    pub fn version(&self) -> u64 {
        self.version
    }

    fn touch(&mut self) {
        self.version += 1;
    }

    fn touch_table(&mut self, name: &str) {
        self.version += 1;
        if let Some(table) = self.tables.get_mut(name) {
            table.version += 1;
        }
    }

    fn relation_exists(&self, name: &str) -> bool {
        self.tables.contains_key(name) || self.views.contains_key(name)
    }

    // ========== Tables ==========

    /// Define a new table from its CREATE TABLE statement
    pub fn define_table(&mut self, id: TableId, stmt: &CreateTableStatement) -> Result<TableId> {
        if self.relation_exists(&stmt.table_name) {
            return Err(Error::DuplicateName(stmt.table_name.clone()));
        }
        if stmt.columns.is_empty() {
            return Err(Error::InvalidConstraint(format!(
                "table '{}' must have at least one column",
                stmt.table_name
            )));
        }

        let mut schema = Schema::new();
        for def in &stmt.columns {
            schema
                .add_column(column_from_def(def)?)
                .map_err(|_| Error::ColumnExists(def.name.clone(), stmt.table_name.clone()))?;
        }
        let mut table = TableDef::new(id, stmt.table_name.clone(), schema);

        // Column-level constraints are table constraints on one column
        let mut constraints = Vec::new();
        for def in &stmt.columns {
            constraints.extend(inline_constraints(def));
        }
        constraints.extend(stmt.constraints.iter().cloned());

        for constraint in &constraints {
            self.attach_constraint(&mut table, constraint)?;
        }

        let key_indexes: Vec<IndexDef> = table
            .unique_keys()
            .map(|key| {
                IndexDef::new(key.name.clone(), &table, key.columns.clone())
                    .unique(true)
                    .backing(key.name.clone())
            })
            .collect();
        for index in key_indexes {
            if self.indexes.contains_key(&index.name) {
                return Err(Error::IndexAlreadyExists(index.name));
            }
            self.indexes.insert(index.name.clone(), index);
        }

        self.tables.insert(table.name.clone(), table);
        self.touch();
        Ok(id)
    }

    /// Get a table by name
    pub fn get_table(&self, name: &str) -> Result<&TableDef> {
        self.tables
            .get(name)
            .ok_or_else(|| Error::TableNotFound(name.to_string()))
    }

    /// Get a table by id
    pub fn get_table_by_id(&self, id: TableId) -> Option<&TableDef> {
        self.tables.values().find(|t| t.id == id)
    }

    /// Check if a table exists
    pub fn table_exists(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    /// All tables in definition order
    pub fn tables(&self) -> impl Iterator<Item = &TableDef> {
        self.tables.values()
    }

    /// List all table names, sorted
    pub fn list_tables(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.keys().cloned().collect();
        names.sort();
        names
    }

    /// Drop a table.
    ///
    /// Fails with `ForeignKeyReferenced` while another table references it,
    /// unless `cascade` is set, in which case those foreign keys are dropped.
    pub fn drop_table(&mut self, name: &str, cascade: bool) -> Result<(TableDef, Vec<IndexDef>)> {
        if !self.tables.contains_key(name) {
            return Err(Error::TableNotFound(name.to_string()));
        }

        let referencing: Vec<(String, String)> = self
            .referencing_keys(name)
            .into_iter()
            .filter(|(owner, _)| owner.name != name)
            .map(|(owner, fk)| (owner.name.clone(), fk.name.clone()))
            .collect();

        if let Some((owner, constraint)) = referencing.first() {
            if !cascade {
                return Err(Error::ForeignKeyReferenced {
                    table: name.to_string(),
                    constraint: constraint.clone(),
                    referencing: owner.clone(),
                });
            }
        }

        for (owner, constraint) in &referencing {
            if let Some(table) = self.tables.get_mut(owner) {
                table.foreign_keys.retain(|fk| &fk.name != constraint);
            }
            self.touch_table(owner);
        }

        let table = self
            .tables
            .shift_remove(name)
            .ok_or_else(|| Error::TableNotFound(name.to_string()))?;

        let dropped: Vec<String> = self
            .indexes
            .values()
            .filter(|idx| idx.table_id == table.id)
            .map(|idx| idx.name.clone())
            .collect();
        let dropped = dropped
            .into_iter()
            .filter_map(|n| self.indexes.shift_remove(&n))
            .collect();

        self.touch();
        Ok((table, dropped))
    }

    /// Foreign keys (with their owning table) that reference `table`
    pub fn referencing_keys(&self, table: &str) -> Vec<(&TableDef, &ForeignKey)> {
        self.tables
            .values()
            .flat_map(|owner| {
                owner
                    .foreign_keys
                    .iter()
                    .filter(move |fk| fk.ref_table == table)
                    .map(move |fk| (owner, fk))
            })
            .collect()
    }

    // ========== ALTER TABLE ==========

    /// Apply one ALTER TABLE action to the table metadata.
    ///
    /// Data-dependent checks (lossless type change, NOT NULL or new
    /// constraints over existing rows) are left to the caller, which runs
    /// them against the altered definition; a failure abandons the copy.
    pub fn alter_table(&mut self, name: &str, action: &AlterTableAction) -> Result<AlterOutcome> {
        let mut outcome = AlterOutcome::default();
        let mut table = self.get_table(name)?.clone();

        match action {
            AlterTableAction::AddColumn(def) => {
                if def.primary_key && table.primary_key.is_some() {
                    return Err(Error::InvalidConstraint(format!(
                        "table '{}' already has a primary key",
                        name
                    )));
                }
                let column = column_from_def(def)?;
                table
                    .schema
                    .add_column(column)
                    .map_err(|_| Error::ColumnExists(def.name.clone(), name.to_string()))?;
                for constraint in inline_constraints(def) {
                    self.attach_constraint(&mut table, &constraint)?;
                }
                outcome.added_column = table.schema.get_column(&def.name).cloned();
                outcome.created_index = self.key_index_for_new_constraints(&table)?;
            }
            AlterTableAction::DropColumn { name: column, .. } => {
                if table.get_column(column).is_none() {
                    return Err(Error::ColumnNotFound(column.clone(), name.to_string()));
                }
                if table.schema.column_count() == 1 {
                    return Err(Error::ConstraintViolation(format!(
                        "cannot drop '{}', the only column of '{}'",
                        column, name
                    )));
                }
                if let Some(constraint) = table.constraint_using_column(column) {
                    return Err(Error::ConstraintViolation(format!(
                        "column '{}' is used by constraint '{}'",
                        column, constraint
                    )));
                }
                if let Some((owner, fk)) = self
                    .referencing_keys(name)
                    .into_iter()
                    .find(|(_, fk)| fk.ref_columns.contains(column))
                {
                    return Err(Error::ConstraintViolation(format!(
                        "column '{}' is referenced by foreign key '{}' on '{}'",
                        column, fk.name, owner.name
                    )));
                }
                if let Some(index) = self
                    .table_indexes(name)
                    .into_iter()
                    .find(|idx| idx.columns.contains(column))
                {
                    return Err(Error::ConstraintViolation(format!(
                        "column '{}' is used by index '{}'",
                        column, index.name
                    )));
                }
                table.schema.remove_column(column);
            }
            AlterTableAction::AlterColumnType {
                name: column,
                data_type,
            } => {
                let col = table
                    .schema
                    .get_column_mut(column)
                    .ok_or_else(|| Error::ColumnNotFound(column.clone(), name.to_string()))?;
                if col.auto_increment && !data_type.is_integer() {
                    return Err(Error::InvalidConstraint(format!(
                        "auto-increment column '{}' must stay an integer",
                        column
                    )));
                }
                col.data_type = data_type.clone();
            }
            AlterTableAction::SetNotNull(column) | AlterTableAction::DropNotNull(column) => {
                let in_key = table
                    .primary_key
                    .as_ref()
                    .map_or(false, |pk| pk.columns.contains(column));
                let nullable = matches!(action, AlterTableAction::DropNotNull(_));
                if nullable && in_key {
                    return Err(Error::ConstraintViolation(format!(
                        "column '{}' is in the primary key",
                        column
                    )));
                }
                table
                    .schema
                    .get_column_mut(column)
                    .ok_or_else(|| Error::ColumnNotFound(column.clone(), name.to_string()))?
                    .nullable = nullable;
            }
            AlterTableAction::SetDefault {
                name: column,
                default,
            } => {
                if let Some(expr) = default {
                    validate_default(column, expr)?;
                }
                table
                    .schema
                    .get_column_mut(column)
                    .ok_or_else(|| Error::ColumnNotFound(column.clone(), name.to_string()))?
                    .default = default.clone();
            }
            AlterTableAction::AddConstraint(constraint) => {
                self.attach_constraint(&mut table, constraint)?;
                outcome.created_index = self.key_index_for_new_constraints(&table)?;
            }
            AlterTableAction::DropConstraint(constraint) => {
                outcome.dropped_indexes = self.detach_constraint(&mut table, constraint)?;
            }
            AlterTableAction::RenameTable(new_name) => {
                return self.rename_table(name, new_name).map(|_| outcome);
            }
        }

        if let Some(index) = &outcome.created_index {
            self.indexes.insert(index.name.clone(), index.clone());
        }
        self.tables.insert(name.to_string(), table);
        self.touch_table(name);
        Ok(outcome)
    }

    fn rename_table(&mut self, old: &str, new: &str) -> Result<()> {
        if self.relation_exists(new) {
            return Err(Error::DuplicateName(new.to_string()));
        }
        let mut table = self
            .tables
            .shift_remove(old)
            .ok_or_else(|| Error::TableNotFound(old.to_string()))?;
        table.name = new.to_string();
        table.version += 1;
        for fk in table.foreign_keys.iter_mut().filter(|fk| fk.ref_table == old) {
            fk.ref_table = new.to_string();
        }
        self.tables.insert(new.to_string(), table);

        for other in self.tables.values_mut() {
            for fk in other.foreign_keys.iter_mut() {
                if fk.ref_table == old {
                    fk.ref_table = new.to_string();
                }
            }
        }
        for index in self.indexes.values_mut() {
            if index.table_name == old {
                index.table_name = new.to_string();
            }
        }
        self.touch();
        Ok(())
    }

    /// Unique index for a key constraint that has no index yet
    fn key_index_for_new_constraints(&self, table: &TableDef) -> Result<Option<IndexDef>> {
        let Some(key) = table
            .unique_keys()
            .find(|k| !self.indexes.contains_key(&k.name))
        else {
            return Ok(None);
        };
        Ok(Some(
            IndexDef::new(key.name.clone(), table, key.columns.clone())
                .unique(true)
                .backing(key.name.clone()),
        ))
    }

    fn detach_constraint(&mut self, table: &mut TableDef, name: &str) -> Result<Vec<IndexDef>> {
        let is_key = table.unique_keys().any(|k| k.name == name);
        if is_key {
            let key_columns = table
                .unique_keys()
                .find(|k| k.name == name)
                .map(|k| k.columns.clone())
                .unwrap_or_default();
            if let Some((owner, fk)) = self
                .referencing_keys(&table.name)
                .into_iter()
                .find(|(owner, fk)| {
                    owner.name != table.name
                        && fk.ref_columns.len() == key_columns.len()
                        && fk.ref_columns.iter().all(|c| key_columns.contains(c))
                })
            {
                return Err(Error::ForeignKeyReferenced {
                    table: table.name.clone(),
                    constraint: fk.name.clone(),
                    referencing: owner.name.clone(),
                });
            }
            if table.primary_key.as_ref().map_or(false, |pk| pk.name == name) {
                table.primary_key = None;
            }
            table.uniques.retain(|u| u.name != name);
            let dropped: Vec<String> = self
                .indexes
                .values()
                .filter(|idx| idx.constraint.as_deref() == Some(name))
                .map(|idx| idx.name.clone())
                .collect();
            return Ok(dropped
                .into_iter()
                .filter_map(|n| self.indexes.shift_remove(&n))
                .collect());
        }

        let before = table.checks.len() + table.foreign_keys.len();
        table.checks.retain(|c| c.name != name);
        table.foreign_keys.retain(|f| f.name != name);
        if table.checks.len() + table.foreign_keys.len() == before {
            return Err(Error::ConstraintNotFound(
                name.to_string(),
                table.name.clone(),
            ));
        }
        Ok(Vec::new())
    }

    /// Validate a constraint against the table (and the catalog) and attach it
    fn attach_constraint(&self, table: &mut TableDef, constraint: &TableConstraint) -> Result<()> {
        if let Some(name) = constraint_name(constraint) {
            if table.has_constraint(name) {
                return Err(Error::InvalidConstraint(format!(
                    "constraint '{}' already exists on '{}'",
                    name, table.name
                )));
            }
        }

        match constraint {
            TableConstraint::PrimaryKey { name, columns } => {
                if table.primary_key.is_some() {
                    return Err(Error::InvalidConstraint(format!(
                        "multiple primary keys for table '{}'",
                        table.name
                    )));
                }
                require_columns(table, columns, "primary key")?;
                for column in columns {
                    if let Some(col) = table.schema.get_column_mut(column) {
                        col.nullable = false;
                    }
                }
                let name = name
                    .clone()
                    .unwrap_or_else(|| format!("{}_pkey", table.name));
                table.primary_key = Some(UniqueConstraint {
                    name,
                    columns: columns.clone(),
                });
            }
            TableConstraint::Unique { name, columns } => {
                require_columns(table, columns, "unique constraint")?;
                let name = match name {
                    Some(name) => name.clone(),
                    None => unique_name(table, &format!("{}_{}_key", table.name, columns.join("_"))),
                };
                table.uniques.push(UniqueConstraint {
                    name,
                    columns: columns.clone(),
                });
            }
            TableConstraint::Check { name, expr } => {
                validate_check(table, expr)?;
                let name = match name {
                    Some(name) => name.clone(),
                    None => {
                        let base = match expr.referenced_columns().first() {
                            Some(col) => format!("{}_{}_check", table.name, col.column),
                            None => format!("{}_check", table.name),
                        };
                        unique_name(table, &base)
                    }
                };
                table.checks.push(CheckConstraint {
                    name,
                    expr: expr.clone(),
                });
            }
            TableConstraint::ForeignKey {
                name,
                columns,
                clause,
            } => {
                let fk = self.resolve_foreign_key(table, name.as_deref(), columns, clause)?;
                table.foreign_keys.push(fk);
            }
        }
        Ok(())
    }

    fn resolve_foreign_key(
        &self,
        table: &TableDef,
        name: Option<&str>,
        columns: &[String],
        clause: &ForeignKeyClause,
    ) -> Result<ForeignKey> {
        require_columns(table, columns, "foreign key")?;

        let target = if clause.ref_table == table.name {
            table
        } else {
            self.tables.get(&clause.ref_table).ok_or_else(|| {
                Error::InvalidConstraint(format!(
                    "foreign key references unknown table '{}'",
                    clause.ref_table
                ))
            })?
        };

        let ref_columns = if clause.ref_columns.is_empty() {
            target
                .primary_key
                .as_ref()
                .map(|pk| pk.columns.clone())
                .ok_or_else(|| {
                    Error::InvalidConstraint(format!(
                        "table '{}' has no primary key to reference",
                        target.name
                    ))
                })?
        } else {
            clause.ref_columns.clone()
        };

        if ref_columns.len() != columns.len() {
            return Err(Error::InvalidConstraint(
                "foreign key column count does not match referenced key".to_string(),
            ));
        }
        for (local, remote) in columns.iter().zip(&ref_columns) {
            let remote_col = target.get_column(remote).ok_or_else(|| {
                Error::InvalidConstraint(format!(
                    "foreign key references unknown column '{}.{}'",
                    target.name, remote
                ))
            })?;
            let local_col = table.get_column(local).ok_or_else(|| {
                Error::InvalidConstraint(format!("unknown column '{}'", local))
            })?;
            if !local_col.data_type.is_comparable_with(&remote_col.data_type) {
                return Err(Error::InvalidConstraint(format!(
                    "foreign key column '{}' ({}) is incompatible with '{}.{}' ({})",
                    local, local_col.data_type, target.name, remote, remote_col.data_type
                )));
            }
        }
        if target.find_unique_key(&ref_columns).is_none() {
            return Err(Error::InvalidConstraint(format!(
                "referenced columns ({}) of '{}' are not a primary key or unique constraint",
                ref_columns.join(", "),
                target.name
            )));
        }
        if clause.on_delete == ReferentialAction::SetNull
            || clause.on_update == ReferentialAction::SetNull
        {
            if let Some(col) = columns
                .iter()
                .filter_map(|c| table.get_column(c))
                .find(|c| !c.nullable)
            {
                return Err(Error::InvalidConstraint(format!(
                    "SET NULL action on non-nullable column '{}'",
                    col.name
                )));
            }
        }

        let name = match name {
            Some(name) => name.to_string(),
            None => unique_name(table, &format!("{}_{}_fkey", table.name, columns.join("_"))),
        };

        Ok(ForeignKey {
            name,
            columns: columns.to_vec(),
            ref_table: target.name.clone(),
            ref_columns,
            on_delete: clause.on_delete,
            on_update: clause.on_update,
            deferred: clause.deferred,
        })
    }

    // ========== Indexes ==========

    /// Create a secondary index
    pub fn create_index(
        &mut self,
        name: &str,
        table_name: &str,
        columns: Vec<String>,
        unique: bool,
    ) -> Result<IndexDef> {
        let table = self.get_table(table_name)?;

        // Verify all columns exist
        for col_name in &columns {
            if table.get_column(col_name).is_none() {
                return Err(Error::ColumnNotFound(
                    col_name.clone(),
                    table_name.to_string(),
                ));
            }
        }

        if self.indexes.contains_key(name) {
            return Err(Error::IndexAlreadyExists(name.to_string()));
        }

        let index = IndexDef::new(name, table, columns).unique(unique);
        self.indexes.insert(name.to_string(), index.clone());
        self.touch_table(table_name);
        Ok(index)
    }

    /// Get an index by name
    pub fn get_index(&self, name: &str) -> Result<&IndexDef> {
        self.indexes
            .get(name)
            .ok_or_else(|| Error::IndexNotFound(name.to_string()))
    }

    /// Drop an index; constraint-backed indexes go with DROP CONSTRAINT
    pub fn drop_index(&mut self, name: &str) -> Result<IndexDef> {
        let index = self.get_index(name)?;
        if let Some(constraint) = &index.constraint {
            return Err(Error::ConstraintViolation(format!(
                "index '{}' enforces constraint '{}'; drop the constraint instead",
                name, constraint
            )));
        }
        let table = index.table_name.clone();
        let index = self
            .indexes
            .shift_remove(name)
            .ok_or_else(|| Error::IndexNotFound(name.to_string()))?;
        self.touch_table(&table);
        Ok(index)
    }

    /// Get all indexes for a table
    pub fn table_indexes(&self, table_name: &str) -> Vec<&IndexDef> {
        self.indexes
            .values()
            .filter(|idx| idx.table_name == table_name)
            .collect()
    }

    /// List all index names
    pub fn list_indexes(&self) -> Vec<String> {
        self.indexes.keys().cloned().collect()
    }

    // ========== Views ==========

    /// Create or replace a view
    pub fn create_view(&mut self, view: ViewDef, or_replace: bool) -> Result<()> {
        if self.tables.contains_key(&view.name) {
            return Err(Error::DuplicateName(view.name));
        }
        if let Some(existing) = self.views.get(&view.name) {
            if !or_replace || existing.is_materialized() != view.is_materialized() {
                return Err(Error::DuplicateName(view.name));
            }
        }
        self.views.insert(view.name.clone(), view);
        self.touch();
        Ok(())
    }

    /// Get a view by name
    pub fn get_view(&self, name: &str) -> Option<&ViewDef> {
        self.views.get(name)
    }

    /// List all view names, sorted
    pub fn list_views(&self) -> Vec<String> {
        let mut names: Vec<String> = self.views.keys().cloned().collect();
        names.sort();
        names
    }

    /// Drop a view
    pub fn drop_view(&mut self, name: &str, materialized: bool) -> Result<ViewDef> {
        match self.views.get(name) {
            Some(view) if view.is_materialized() == materialized => {}
            _ => return Err(Error::ViewNotFound(name.to_string())),
        }
        let view = self
            .views
            .shift_remove(name)
            .ok_or_else(|| Error::ViewNotFound(name.to_string()))?;
        self.touch();
        Ok(view)
    }

    /// Replace the stored rows of a materialized view
    pub fn set_materialized_rows(&mut self, name: &str, rows: Vec<Tuple>) -> Result<()> {
        let view = self
            .views
            .get_mut(name)
            .filter(|v| v.is_materialized())
            .ok_or_else(|| Error::ViewNotFound(name.to_string()))?;
        view.materialized = Some(MaterializedRows { rows });
        self.touch();
        Ok(())
    }

    // ========== Introspection ==========

    /// Get table schema info as a formatted string (for .schema command)
    pub fn describe_table(&self, name: &str) -> Result<String> {
        let table = self.get_table(name)?;
        let mut info = format!("Table: {}\n", table.name());
        info.push_str("Columns:\n");

        let pk_columns: &[String] = table
            .primary_key
            .as_ref()
            .map(|pk| pk.columns.as_slice())
            .unwrap_or(&[]);

        for col in table.schema().columns() {
            let mut flags = Vec::new();
            if pk_columns.contains(&col.name) {
                flags.push("PRIMARY KEY".to_string());
            }
            if !col.nullable {
                flags.push("NOT NULL".to_string());
            }
            if col.auto_increment {
                flags.push("AUTO_INCREMENT".to_string());
            }
            if let Some(default) = &col.default {
                flags.push(format!("DEFAULT {}", default));
            }

            let flags_str = if flags.is_empty() {
                String::new()
            } else {
                format!(" [{}]", flags.join(", "))
            };

            info.push_str(&format!("  {} {}{}\n", col.name, col.data_type, flags_str));
        }

        let has_constraints = !table.uniques.is_empty()
            || !table.checks.is_empty()
            || !table.foreign_keys.is_empty();
        if has_constraints {
            info.push_str("Constraints:\n");
            for unique in &table.uniques {
                info.push_str(&format!(
                    "  {} UNIQUE ({})\n",
                    unique.name,
                    unique.columns.join(", ")
                ));
            }
            for check in &table.checks {
                info.push_str(&format!("  {} CHECK ({})\n", check.name, check.expr));
            }
            for fk in &table.foreign_keys {
                info.push_str(&format!(
                    "  {} FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE {} ON UPDATE {}{}\n",
                    fk.name,
                    fk.columns.join(", "),
                    fk.ref_table,
                    fk.ref_columns.join(", "),
                    fk.on_delete,
                    fk.on_update,
                    if fk.deferred { " DEFERRED" } else { "" }
                ));
            }
        }

        // Add index info
        let indexes = self.table_indexes(name);
        if !indexes.is_empty() {
            info.push_str("Indexes:\n");
            for idx in indexes {
                info.push_str(&format!(
                    "  {} ({}){}\n",
                    idx.name,
                    idx.columns.join(", "),
                    if idx.unique { " UNIQUE" } else { "" }
                ));
            }
        }

        Ok(info)
    }
}

fn column_from_def(def: &ColumnDef) -> Result<Column> {
    if let Some(default) = &def.default {
        validate_default(&def.name, default)?;
    }
    let mut column = Column::new(def.name.clone(), def.data_type.clone())
        .nullable(!def.not_null && !def.primary_key)
        .auto_increment(def.auto_increment);
    column.default = def.default.clone();
    Ok(column)
}

/// Column-level PRIMARY KEY / UNIQUE / CHECK / REFERENCES as table constraints
fn inline_constraints(def: &ColumnDef) -> Vec<TableConstraint> {
    let mut constraints = Vec::new();
    let columns = vec![def.name.clone()];
    if def.primary_key {
        constraints.push(TableConstraint::PrimaryKey {
            name: None,
            columns: columns.clone(),
        });
    }
    if def.unique {
        constraints.push(TableConstraint::Unique {
            name: None,
            columns: columns.clone(),
        });
    }
    if let Some(expr) = &def.check {
        constraints.push(TableConstraint::Check {
            name: None,
            expr: expr.clone(),
        });
    }
    if let Some(clause) = &def.references {
        constraints.push(TableConstraint::ForeignKey {
            name: None,
            columns,
            clause: clause.clone(),
        });
    }
    constraints
}

fn constraint_name(constraint: &TableConstraint) -> Option<&str> {
    match constraint {
        TableConstraint::PrimaryKey { name, .. }
        | TableConstraint::Unique { name, .. }
        | TableConstraint::ForeignKey { name, .. }
        | TableConstraint::Check { name, .. } => name.as_deref(),
    }
}

fn require_columns(table: &TableDef, columns: &[String], what: &str) -> Result<()> {
    if columns.is_empty() {
        return Err(Error::InvalidConstraint(format!("{} needs columns", what)));
    }
    for column in columns {
        if table.get_column(column).is_none() {
            return Err(Error::InvalidConstraint(format!(
                "{} references unknown column '{}' of '{}'",
                what, column, table.name
            )));
        }
    }
    Ok(())
}

/// A generated constraint name not yet used on the table
fn unique_name(table: &TableDef, base: &str) -> String {
    if !table.has_constraint(base) {
        return base.to_string();
    }
    (1..)
        .map(|n| format!("{}{}", base, n))
        .find(|candidate| !table.has_constraint(candidate))
        .unwrap_or_else(|| base.to_string())
}

/// Whether an expression contains constructs that cannot live in constraints
fn has_non_row_construct(expr: &Expr) -> bool {
    let mut found = false;
    expr.walk(&mut |e| {
        if matches!(
            e,
            Expr::Subquery(_)
                | Expr::Exists(_)
                | Expr::InSubquery { .. }
                | Expr::Quantified { .. }
                | Expr::WindowFunction { .. }
                | Expr::Parameter(_)
        ) {
            found = true;
        }
        if let Expr::Function { name, .. } = e {
            if matches!(name.as_str(), "COUNT" | "SUM" | "AVG" | "MIN" | "MAX") {
                found = true;
            }
        }
    });
    found
}

fn validate_check(table: &TableDef, expr: &Expr) -> Result<()> {
    if has_non_row_construct(expr) {
        return Err(Error::InvalidConstraint(
            "CHECK may only reference columns of the row".to_string(),
        ));
    }
    for col in expr.referenced_columns() {
        if let Some(qualifier) = &col.table {
            if qualifier != &table.name {
                return Err(Error::InvalidConstraint(format!(
                    "CHECK references another table '{}'",
                    qualifier
                )));
            }
        }
        if table.get_column(&col.column).is_none() {
            return Err(Error::InvalidConstraint(format!(
                "CHECK references undefined column '{}'",
                col.column
            )));
        }
    }
    Ok(())
}

fn validate_default(column: &str, expr: &Expr) -> Result<()> {
    if has_non_row_construct(expr) || !expr.referenced_columns().is_empty() {
        return Err(Error::InvalidConstraint(format!(
            "DEFAULT for '{}' must not reference columns or subqueries",
            column
        )));
    }
    Ok(())
}

/// Widening is always allowed; anything else needs a data check
pub fn is_widening(from: &DataType, to: &DataType) -> bool {
    use DataType::*;
    match (from, to) {
        (a, b) if a == b => true,
        (SmallInt, Integer | BigInt) | (Integer, BigInt) => true,
        (Float, Double) => true,
        (Varchar(a), Varchar(b)) | (Char(a), Char(b)) | (Char(a), Varchar(b)) => a <= b,
        (Char(_) | Varchar(_), Text) => true,
        (Decimal(p1, s1), Decimal(p2, s2)) => s2 >= s1 && (p2 - s2) >= (p1 - s1),
        (Date, Timestamp) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::ast::Statement;
    use crate::sql::parse_sql;

    fn create(catalog: &mut Catalog, id: TableId, sql: &str) -> Result<TableId> {
        match parse_sql(sql).unwrap().remove(0) {
            Statement::CreateTable(stmt) => catalog.define_table(id, &stmt),
            other => panic!("Expected CREATE TABLE, got {:?}", other),
        }
    }

    fn alter(catalog: &mut Catalog, sql: &str) -> Result<AlterOutcome> {
        match parse_sql(sql).unwrap().remove(0) {
            Statement::AlterTable(stmt) => catalog.alter_table(&stmt.table_name, &stmt.action),
            other => panic!("Expected ALTER TABLE, got {:?}", other),
        }
    }

    fn authors_and_books() -> Catalog {
        let mut catalog = Catalog::new();
        create(
            &mut catalog,
            1,
            "CREATE TABLE authors (author_id INT PRIMARY KEY, name VARCHAR(50))",
        )
        .unwrap();
        create(
            &mut catalog,
            2,
            "CREATE TABLE books (book_id INT PRIMARY KEY,
                author_id INT REFERENCES authors ON DELETE CASCADE,
                price DECIMAL(10, 2) CHECK (price >= 0))",
        )
        .unwrap();
        catalog
    }

    #[test]
    fn test_define_table_with_constraints() {
        let catalog = authors_and_books();
        let books = catalog.get_table("books").unwrap();

        assert_eq!(books.schema().column_count(), 3);
        assert_eq!(books.primary_key.as_ref().unwrap().name, "books_pkey");
        assert_eq!(books.checks[0].name, "books_price_check");
        let fk = &books.foreign_keys[0];
        assert_eq!(fk.ref_table, "authors");
        assert_eq!(fk.ref_columns, vec!["author_id".to_string()]);
        assert_eq!(fk.on_delete, ReferentialAction::Cascade);
        assert!(!books.get_column("book_id").unwrap().nullable);

        let indexes = catalog.table_indexes("books");
        assert_eq!(indexes.len(), 1);
        assert!(indexes[0].unique);
    }

    #[test]
    fn test_duplicate_name() {
        let mut catalog = authors_and_books();
        let result = create(&mut catalog, 3, "CREATE TABLE books (id INT)");
        assert!(matches!(result, Err(Error::DuplicateName(_))));
    }

    #[test]
    fn test_invalid_constraints() {
        let mut catalog = authors_and_books();
        assert!(matches!(
            create(&mut catalog, 3, "CREATE TABLE x (a INT REFERENCES nowhere (id))"),
            Err(Error::InvalidConstraint(_))
        ));
        assert!(matches!(
            create(&mut catalog, 3, "CREATE TABLE x (a INT REFERENCES authors (name))"),
            Err(Error::InvalidConstraint(_))
        ));
        assert!(matches!(
            create(&mut catalog, 3, "CREATE TABLE x (a INT, CHECK (b > 0))"),
            Err(Error::InvalidConstraint(_))
        ));
        assert!(!catalog.table_exists("x"));
    }

    #[test]
    fn test_drop_referenced_table() {
        let mut catalog = authors_and_books();
        let result = catalog.drop_table("authors", false);
        assert!(matches!(result, Err(Error::ForeignKeyReferenced { .. })));

        let (dropped, indexes) = catalog.drop_table("authors", true).unwrap();
        assert_eq!(dropped.name, "authors");
        assert_eq!(indexes.len(), 1);
        assert!(catalog.get_table("books").unwrap().foreign_keys.is_empty());
    }

    #[test]
    fn test_alter_add_and_drop_column() {
        let mut catalog = authors_and_books();
        let version = catalog.get_table("authors").unwrap().version;

        let outcome = alter(&mut catalog, "ALTER TABLE authors ADD COLUMN born DATE").unwrap();
        assert_eq!(outcome.added_column.unwrap().slot, 2);
        assert!(catalog.get_table("authors").unwrap().version > version);

        assert!(matches!(
            alter(&mut catalog, "ALTER TABLE authors ADD COLUMN born DATE"),
            Err(Error::ColumnExists(..))
        ));
        assert!(matches!(
            alter(&mut catalog, "ALTER TABLE authors DROP COLUMN missing"),
            Err(Error::ColumnNotFound(..))
        ));
        assert!(matches!(
            alter(&mut catalog, "ALTER TABLE books DROP COLUMN price"),
            Err(Error::ConstraintViolation(_))
        ));
        assert!(matches!(
            alter(&mut catalog, "ALTER TABLE authors DROP COLUMN author_id"),
            Err(Error::ConstraintViolation(_))
        ));

        alter(&mut catalog, "ALTER TABLE authors DROP COLUMN born").unwrap();
        assert!(!catalog.get_table("authors").unwrap().schema.has_column("born"));
    }

    #[test]
    fn test_constraint_round_trip() {
        let mut catalog = authors_and_books();
        let outcome = alter(
            &mut catalog,
            "ALTER TABLE authors ADD CONSTRAINT authors_name_key UNIQUE (name)",
        )
        .unwrap();
        assert_eq!(outcome.created_index.unwrap().name, "authors_name_key");

        let outcome = alter(&mut catalog, "ALTER TABLE authors DROP CONSTRAINT authors_name_key")
            .unwrap();
        assert_eq!(outcome.dropped_indexes.len(), 1);
        assert!(matches!(
            alter(&mut catalog, "ALTER TABLE authors DROP CONSTRAINT authors_name_key"),
            Err(Error::ConstraintNotFound(..))
        ));
    }

    #[test]
    fn test_rename_table_updates_references() {
        let mut catalog = authors_and_books();
        alter(&mut catalog, "ALTER TABLE authors RENAME TO writers").unwrap();

        assert!(catalog.get_table("writers").is_ok());
        assert_eq!(
            catalog.get_table("books").unwrap().foreign_keys[0].ref_table,
            "writers"
        );
        assert_eq!(catalog.table_indexes("writers").len(), 1);
    }

    #[test]
    fn test_describe_table() {
        let catalog = authors_and_books();
        let info = catalog.describe_table("books").unwrap();
        assert!(info.contains("book_id INTEGER [PRIMARY KEY, NOT NULL]"));
        assert!(info.contains("REFERENCES authors (author_id) ON DELETE CASCADE"));
        assert!(info.contains("books_pkey (book_id) UNIQUE"));
    }

    #[test]
    fn test_widening() {
        assert!(is_widening(&DataType::SmallInt, &DataType::BigInt));
        assert!(is_widening(&DataType::Decimal(5, 2), &DataType::Decimal(10, 2)));
        assert!(!is_widening(&DataType::Decimal(10, 2), &DataType::Decimal(10, 0)));
        assert!(!is_widening(&DataType::Integer, &DataType::SmallInt));
    }
}
