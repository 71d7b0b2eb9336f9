//! Catalog module
//!
//! This module contains the system catalog, schema definitions, and data types.

pub mod catalog;
pub mod schema;
pub mod types;

pub use catalog::{AlterOutcome, Catalog};
pub use schema::{
    CheckConstraint, Column, ForeignKey, IndexDef, MaterializedRows, ReferentialAction, Schema,
    TableDef, TableId, UniqueConstraint, ViewDef,
};
pub use types::DataType;
