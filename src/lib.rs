//! KeelDB - an embeddable relational query engine written in Rust
//!
//! This library provides the core components for a SQL database:
//! - SQL parsing (lexer, parser, AST)
//! - Versioned row storage with ordered indexes and a commit log
//! - Transactions under four isolation levels, with row locks and deadlock detection
//! - Query planning and execution (joins, aggregates, windows, subqueries, CTEs)
//! - System catalog with constraints, foreign keys and views
//! - Row triggers
//! - TCP server
//!
//! ```no_run
//! use keeldb::Database;
//!
//! let db = Database::new();
//! let mut session = db.session();
//! session.execute("CREATE TABLE t (id INTEGER PRIMARY KEY, name VARCHAR(20))")?;
//! session.execute("INSERT INTO t VALUES (1, 'one')")?;
//! let result = session.execute("SELECT name FROM t WHERE id = 1")?;
//! assert_eq!(result.rows.len(), 1);
//! # Ok::<(), keeldb::Error>(())
//! ```

pub mod catalog;
pub mod config;
pub mod database;
pub mod error;
pub mod executor;
pub mod server;
pub mod session;
pub mod sql;
pub mod storage;
pub mod transaction;
pub mod trigger;

pub use config::EngineConfig;
pub use database::Database;
pub use error::{Error, ErrorKind, Result};
pub use executor::QueryResult;
pub use session::Session;
pub use storage::Value;
pub use transaction::IsolationLevel;
pub use trigger::{TriggerContext, TriggerEvent, TriggerTiming};
