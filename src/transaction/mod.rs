//! Transaction module
//!
//! Isolation levels, snapshots, row locks and the transaction manager.

pub mod isolation;
pub mod lock;
pub mod manager;
pub mod snapshot;
pub mod transaction;

pub use isolation::IsolationLevel;
pub use lock::{LockManager, LockMode, LockTarget};
pub use manager::TransactionManager;
pub use snapshot::{Snapshot, StatusTable, Timestamp, TxnId, TxnStatus};
pub use transaction::{PendingCheck, Transaction};
