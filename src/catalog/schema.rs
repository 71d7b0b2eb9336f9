//! Schema definitions for KeelDB
//!
//! This module defines table schemas, column metadata and constraints.
//!
//! Every column owns a physical *slot* in the stored tuple. Slots are never
//! reused or shifted: adding a column takes the next slot and dropping one
//! only hides its slot, so stored row versions and index keys stay valid
//! across schema changes.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::types::DataType;
use crate::error::{Error, Result};
use crate::sql::ast::{Expr, Query};
use crate::storage::tuple::Tuple;

/// Table identifier, never reused within a database
pub type TableId = u64;

/// Column definition in a table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    /// Column name
    pub name: String,
    /// Data type
    pub data_type: DataType,
    /// Physical position in stored tuples
    pub slot: usize,
    /// Is this column nullable?
    pub nullable: bool,
    /// Default value expression
    pub default: Option<Expr>,
    /// Values come from the table's sequence when omitted
    pub auto_increment: bool,
}

impl Column {
    /// Create a new column with minimal required fields
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            slot: 0,
            nullable: true,
            default: None,
            auto_increment: false,
        }
    }

    /// Set nullable flag
    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    /// Set default value
    pub fn default(mut self, default: Expr) -> Self {
        self.default = Some(default);
        self
    }

    /// Set auto-increment flag
    pub fn auto_increment(mut self, auto_increment: bool) -> Self {
        self.auto_increment = auto_increment;
        self
    }
}

/// Table schema - the ordered, visible columns of a table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    /// Columns keyed by name, in declaration order
    columns: IndexMap<String, Column>,
    /// Next free physical slot
    next_slot: usize,
}

impl Schema {
    /// Create a new empty schema
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a schema from a list of columns
    pub fn from_columns(columns: Vec<Column>) -> Result<Self> {
        let mut schema = Self::new();
        for col in columns {
            schema.add_column(col)?;
        }
        Ok(schema)
    }

    /// Add a column to the schema, assigning it a fresh slot
    pub fn add_column(&mut self, mut column: Column) -> Result<()> {
        if self.columns.contains_key(&column.name) {
            return Err(Error::ColumnExists(column.name, String::new()));
        }
        column.slot = self.next_slot;
        self.next_slot += 1;
        self.columns.insert(column.name.clone(), column);
        Ok(())
    }

    /// Remove a column; its slot is retired, not reused
    pub fn remove_column(&mut self, name: &str) -> Option<Column> {
        self.columns.shift_remove(name)
    }

    /// Get column by name
    pub fn get_column(&self, name: &str) -> Option<&Column> {
        self.columns.get(name)
    }

    /// Get a mutable column by name
    pub fn get_column_mut(&mut self, name: &str) -> Option<&mut Column> {
        self.columns.get_mut(name)
    }

    /// Get column by logical index
    pub fn get_column_by_index(&self, index: usize) -> Option<&Column> {
        self.columns.get_index(index).map(|(_, c)| c)
    }

    /// Get logical column index by name
    pub fn get_column_index(&self, name: &str) -> Option<usize> {
        self.columns.get_index_of(name)
    }

    /// Iterate over columns in order
    pub fn columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.values()
    }

    /// Get number of columns
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Check if column exists
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    /// Get column names
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.keys().map(|k| k.as_str()).collect()
    }

    /// Width of stored tuples
    pub fn slot_count(&self) -> usize {
        self.next_slot
    }

    /// Stored tuple -> logical row in column order
    pub fn to_logical(&self, stored: &Tuple) -> Tuple {
        let slots: Vec<usize> = self.columns.values().map(|c| c.slot).collect();
        stored.project(&slots)
    }

    /// Logical row in column order -> stored tuple
    pub fn to_stored(&self, logical: &Tuple) -> Tuple {
        let mut stored = Tuple::empty().resized(self.next_slot);
        for (column, value) in self.columns.values().zip(logical.values()) {
            stored.set(column.slot, value.clone());
        }
        stored
    }
}

/// What happens to referencing rows when a referenced key changes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReferentialAction {
    /// Fail at end of statement if referencing rows remain
    NoAction,
    /// Fail immediately if referencing rows exist
    Restrict,
    /// Delete or update the referencing rows as well
    Cascade,
    /// Set the referencing columns to NULL
    SetNull,
}

impl fmt::Display for ReferentialAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReferentialAction::NoAction => "NO ACTION",
            ReferentialAction::Restrict => "RESTRICT",
            ReferentialAction::Cascade => "CASCADE",
            ReferentialAction::SetNull => "SET NULL",
        };
        f.write_str(s)
    }
}

/// PRIMARY KEY or UNIQUE constraint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniqueConstraint {
    pub name: String,
    pub columns: Vec<String>,
}

/// CHECK constraint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckConstraint {
    pub name: String,
    pub expr: Expr,
}

/// FOREIGN KEY constraint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub name: String,
    /// Referencing columns of the owning table
    pub columns: Vec<String>,
    /// Referenced table name
    pub ref_table: String,
    /// Referenced columns (a primary key or unique constraint)
    pub ref_columns: Vec<String>,
    pub on_delete: ReferentialAction,
    pub on_update: ReferentialAction,
    /// Checked only at commit
    pub deferred: bool,
}

/// Table definition - full table metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDef {
    /// Table ID
    pub id: TableId,
    /// Table name
    pub name: String,
    /// Table schema
    pub schema: Schema,
    /// Primary key, if declared
    pub primary_key: Option<UniqueConstraint>,
    /// UNIQUE constraints
    pub uniques: Vec<UniqueConstraint>,
    /// CHECK constraints
    pub checks: Vec<CheckConstraint>,
    /// Outgoing foreign keys
    pub foreign_keys: Vec<ForeignKey>,
    /// Bumped on every schema change
    pub version: u64,
}

impl TableDef {
    /// Create a new table definition
    pub fn new(id: TableId, name: impl Into<String>, schema: Schema) -> Self {
        Self {
            id,
            name: name.into(),
            schema,
            primary_key: None,
            uniques: Vec::new(),
            checks: Vec::new(),
            foreign_keys: Vec::new(),
            version: 1,
        }
    }

    /// Get the table name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the table schema
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Get column by name
    pub fn get_column(&self, name: &str) -> Option<&Column> {
        self.schema.get_column(name)
    }

    /// Get column or fail with `ColumnNotFound`
    pub fn column(&self, name: &str) -> Result<&Column> {
        self.schema
            .get_column(name)
            .ok_or_else(|| Error::ColumnNotFound(name.to_string(), self.name.clone()))
    }

    /// Logical index of a column
    pub fn column_index(&self, name: &str) -> Result<usize> {
        self.schema
            .get_column_index(name)
            .ok_or_else(|| Error::ColumnNotFound(name.to_string(), self.name.clone()))
    }

    /// Physical slots of the named columns
    pub fn slots(&self, columns: &[String]) -> Result<Vec<usize>> {
        columns.iter().map(|c| self.column(c).map(|c| c.slot)).collect()
    }

    /// Primary key followed by UNIQUE constraints
    pub fn unique_keys(&self) -> impl Iterator<Item = &UniqueConstraint> {
        self.primary_key.iter().chain(self.uniques.iter())
    }

    /// The key whose columns are exactly `columns` (order-insensitive)
    pub fn find_unique_key(&self, columns: &[String]) -> Option<&UniqueConstraint> {
        self.unique_keys().find(|key| {
            key.columns.len() == columns.len() && columns.iter().all(|c| key.columns.contains(c))
        })
    }

    /// Name of a constraint on this table that depends on `column`
    pub fn constraint_using_column(&self, column: &str) -> Option<&str> {
        let named = column.to_string();
        if let Some(key) = self.unique_keys().find(|k| k.columns.contains(&named)) {
            return Some(&key.name);
        }
        if let Some(fk) = self.foreign_keys.iter().find(|fk| fk.columns.contains(&named)) {
            return Some(&fk.name);
        }
        self.checks
            .iter()
            .find(|check| {
                check
                    .expr
                    .referenced_columns()
                    .iter()
                    .any(|c| c.column == column)
            })
            .map(|check| check.name.as_str())
    }

    /// Whether any constraint on this table carries `name`
    pub fn has_constraint(&self, name: &str) -> bool {
        self.unique_keys().any(|k| k.name == name)
            || self.checks.iter().any(|c| c.name == name)
            || self.foreign_keys.iter().any(|f| f.name == name)
    }
}

/// Index definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDef {
    /// Index name
    pub name: String,
    /// Table this index belongs to
    pub table_name: String,
    /// Owning table id
    pub table_id: TableId,
    /// Columns included in the index
    pub columns: Vec<String>,
    /// Is this a unique index?
    pub unique: bool,
    /// Constraint this index enforces, if any
    pub constraint: Option<String>,
}

impl IndexDef {
    /// Create a new index definition
    pub fn new(
        name: impl Into<String>,
        table: &TableDef,
        columns: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            table_name: table.name.clone(),
            table_id: table.id,
            columns,
            unique: false,
            constraint: None,
        }
    }

    /// Set unique flag
    pub fn unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

    /// Mark the index as backing a constraint
    pub fn backing(mut self, constraint: impl Into<String>) -> Self {
        self.constraint = Some(constraint.into());
        self
    }
}

/// Stored result of a materialized view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterializedRows {
    pub rows: Vec<Tuple>,
}

/// View definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewDef {
    pub name: String,
    /// Output column names; empty means the query's own names
    pub columns: Vec<String>,
    /// Stored query, re-planned at every reference
    pub query: Query,
    /// Present for materialized views
    pub materialized: Option<MaterializedRows>,
}

impl ViewDef {
    pub fn is_materialized(&self) -> bool {
        self.materialized.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tuple::Value;

    fn users() -> Schema {
        Schema::from_columns(vec![
            Column::new("id", DataType::Integer).nullable(false),
            Column::new("name", DataType::Varchar(100)).nullable(false),
            Column::new("email", DataType::Varchar(255)),
        ])
        .unwrap()
    }

    #[test]
    fn test_schema_creation() {
        let schema = users();

        assert_eq!(schema.column_count(), 3);
        assert!(schema.has_column("id"));
        assert!(!schema.has_column("unknown"));

        let id_col = schema.get_column("id").unwrap();
        assert!(!id_col.nullable);
        assert_eq!(schema.get_column("email").unwrap().slot, 2);
    }

    #[test]
    fn test_duplicate_column_rejected() {
        let mut schema = users();
        assert!(matches!(
            schema.add_column(Column::new("id", DataType::Text)),
            Err(Error::ColumnExists(..))
        ));
    }

    #[test]
    fn test_dropped_slot_is_not_reused() {
        let mut schema = users();
        schema.remove_column("name");
        schema.add_column(Column::new("age", DataType::Integer)).unwrap();

        assert_eq!(schema.column_names(), vec!["id", "email", "age"]);
        assert_eq!(schema.get_column("age").unwrap().slot, 3);
        assert_eq!(schema.slot_count(), 4);

        let stored = Tuple::new(vec![
            Value::Integer(1),
            Value::from("gone"),
            Value::from("a@b.c"),
        ]);
        let logical = schema.to_logical(&stored);
        assert_eq!(
            logical.values(),
            &[Value::Integer(1), Value::from("a@b.c"), Value::Null]
        );

        let back = schema.to_stored(&logical);
        assert_eq!(back.len(), 4);
        assert_eq!(back.get(1), Some(&Value::Null));
        assert_eq!(back.get(2), Some(&Value::from("a@b.c")));
    }

    #[test]
    fn test_constraint_lookup() {
        let mut table = TableDef::new(1, "users", users());
        table.primary_key = Some(UniqueConstraint {
            name: "users_pkey".into(),
            columns: vec!["id".into()],
        });

        assert_eq!(table.constraint_using_column("id"), Some("users_pkey"));
        assert_eq!(table.constraint_using_column("email"), None);
        assert!(table.find_unique_key(&["id".to_string()]).is_some());
        assert!(matches!(
            table.column("missing"),
            Err(Error::ColumnNotFound(..))
        ));
    }
}
