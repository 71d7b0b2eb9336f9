//! Storage engine module
//!
//! This module contains the storage engine components:
//! - Values and tuples
//! - Versioned table storage
//! - Ordered indexes
//! - Commit log

pub mod engine;
pub mod index;
pub mod table;
pub mod tuple;
pub mod wal;

/// Stable identifier of a row across its versions
pub type RowId = u64;

pub use engine::{StorageEngine, TableScan};
pub use index::{Index, IndexKey};
pub use table::{KeyState, RowVersion, TableStore, WriteOutcome};
pub use tuple::{Tuple, Value};
pub use wal::{Change, LogManager, LogRecord};
