//! Database handle
//!
//! A [`Database`] owns the published catalog, the row store, the transaction
//! manager and the trigger registry. It is cheap to clone and every clone
//! refers to the same engine; each caller talks to it through its own
//! [`Session`].

use std::collections::HashSet;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::catalog::{Catalog, TableId};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::executor::ExecutionEngine;
use crate::session::Session;
use crate::storage::{Change, LogManager, LogRecord, StorageEngine};
use crate::transaction::{IsolationLevel, Transaction, TransactionManager};
use crate::trigger::{TriggerContext, TriggerEvent, TriggerRegistry, TriggerTiming};

/// Engine state shared by every session
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) config: EngineConfig,
    pub(crate) storage: StorageEngine,
    pub(crate) txns: TransactionManager,
    /// Catalog as of the last commit
    pub(crate) catalog: RwLock<Arc<Catalog>>,
    pub(crate) triggers: TriggerRegistry,
    pub(crate) log: Option<LogManager>,
    pub(crate) next_table_id: AtomicU64,
}

/// Handle to a database
#[derive(Debug, Clone)]
pub struct Database {
    shared: Arc<Shared>,
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}

impl Database {
    /// Create an empty in-memory database with default settings
    pub fn new() -> Self {
        let config = EngineConfig::default();
        Self {
            shared: Arc::new(Shared::new(config, Catalog::new(), None)),
        }
    }

    /// Open a database. With a data directory, the commit log found there
    /// is replayed and later commits are appended to it.
    pub fn open(config: EngineConfig) -> Result<Self> {
        let Some(path) = config.log_path() else {
            return Ok(Self {
                shared: Arc::new(Shared::new(config, Catalog::new(), None)),
            });
        };

        let (log, records) = LogManager::recover(&path)?;
        let shared = Shared::new(config, Catalog::new(), Some(log));
        shared.recover(records)?;
        Ok(Self {
            shared: Arc::new(shared),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// Start a session with the configured default isolation level
    pub fn session(&self) -> Session {
        Session::new(self.clone())
    }

    /// Catalog as of the last commit
    pub fn catalog(&self) -> Arc<Catalog> {
        self.shared.published()
    }

    /// Register a row trigger on `table`.
    ///
    /// The callback runs inside the transaction of the triggering write;
    /// an error from it aborts that transaction.
    pub fn register_trigger<F>(&self, table: &str, event: TriggerEvent, timing: TriggerTiming, callback: F)
    where
        F: Fn(&mut TriggerContext<'_>) -> Result<()> + Send + Sync + 'static,
    {
        self.shared
            .triggers
            .register(table, event, timing, Arc::new(callback));
        debug!(table, %event, %timing, "Trigger registered");
    }

    /// Remove every trigger on `table`; returns how many were removed
    pub fn clear_triggers(&self, table: &str) -> usize {
        self.shared.triggers.clear(table)
    }

    pub(crate) fn shared(&self) -> &Shared {
        &self.shared
    }
}

impl Shared {
    fn new(config: EngineConfig, catalog: Catalog, log: Option<LogManager>) -> Self {
        let txns = TransactionManager::new(config.lock_timeout);
        Self {
            config,
            storage: StorageEngine::new(),
            txns,
            catalog: RwLock::new(Arc::new(catalog)),
            triggers: TriggerRegistry::new(),
            log,
            next_table_id: AtomicU64::new(1),
        }
    }

    pub(crate) fn published(&self) -> Arc<Catalog> {
        Arc::clone(&self.catalog.read())
    }

    /// Start a transaction
    pub(crate) fn begin(&self, isolation: IsolationLevel, explicit: bool) -> Transaction {
        let id = self.txns.begin();
        debug!(txn = id, %isolation, explicit, "Transaction begun");
        Transaction::new(id, isolation, explicit, self.published())
    }

    /// Rebuild state from the commit log
    fn recover(&self, records: Vec<LogRecord>) -> Result<()> {
        let mut max_table: TableId = 0;
        let count = records.len();
        for record in records {
            if let Some(catalog) = record.catalog {
                max_table = max_table.max(catalog.tables().map(|t| t.id).max().unwrap_or(0));
                *self.catalog.write() = Arc::new(catalog);
            }
            for change in &record.changes {
                if let Change::CreateTable { table } = change {
                    max_table = max_table.max(*table);
                }
                self.storage.replay(record.txn_id, change)?;
            }
            self.txns.restore_committed(record.txn_id, record.commit_ts);
        }
        self.next_table_id
            .fetch_max(max_table + 1, std::sync::atomic::Ordering::SeqCst);
        info!(records = count, tables = self.published().tables().count(), "Recovered from commit log");
        Ok(())
    }

    /// Commit a transaction. On error nothing is published and the caller
    /// must roll back.
    pub(crate) fn commit(&self, txn: &mut Transaction) -> Result<()> {
        {
            let mut engine = ExecutionEngine::new(self, txn, &[], 0);
            engine.check_deferred_constraints()?;
        }

        let guard = self.txns.commit_guard();
        let published = self.published();
        match txn.ddl_base_version() {
            Some(base) if base != published.version() => {
                return Err(Error::SerializationFailure(
                    "concurrent schema change".to_string(),
                ));
            }
            Some(_) => {}
            None => {
                for (&table, &version) in txn.written_tables() {
                    match published.get_table_by_id(table) {
                        Some(def) if def.version == version => {}
                        Some(def) => {
                            return Err(Error::SerializationFailure(format!(
                                "table '{}' was altered concurrently",
                                def.name
                            )))
                        }
                        None => {
                            return Err(Error::SerializationFailure(
                                "written table was dropped concurrently".to_string(),
                            ))
                        }
                    }
                }
            }
        }
        if txn.isolation() == IsolationLevel::Serializable {
            if let Some(read_ts) = txn.snapshot_ts() {
                self.txns.validate_reads(read_ts, txn.read_tables())?;
            }
        }

        let commit_ts = self.txns.next_commit_ts();
        let ddl = txn.ddl_base_version().is_some();
        if let Some(log) = &self.log {
            if ddl || !txn.changes().is_empty() {
                log.append(&LogRecord {
                    txn_id: txn.id(),
                    commit_ts,
                    catalog: ddl.then(|| (**txn.catalog()).clone()),
                    changes: txn.changes().to_vec(),
                })?;
            }
        }

        // Durable from here on
        if ddl {
            *self.catalog.write() = Arc::clone(txn.catalog());
        }
        let catalog = Arc::clone(txn.catalog());
        for change in txn.take_changes() {
            match change {
                Change::DropTable { table } if catalog.get_table_by_id(table).is_none() => {
                    self.storage.drop_table(table);
                }
                Change::DropIndex { table, name }
                    if catalog.get_index(&name).map_or(true, |index| index.table_id != table) =>
                {
                    self.storage.drop_index(table, &name);
                }
                _ => {}
            }
        }
        let tables: HashSet<TableId> = txn.written_tables().keys().copied().collect();
        self.txns.mark_committed(txn.id(), commit_ts, tables);
        drop(guard);
        self.txns.release_locks(txn.id());
        Ok(())
    }

    /// Undo everything a transaction wrote; never fails
    pub(crate) fn rollback(&self, txn: &mut Transaction) {
        self.storage.rollback(txn.id(), txn.writes());

        // Storage created by the transaction's own DDL goes as well, unless
        // the published catalog still owns an object of that identity
        let published = self.published();
        for change in txn.take_changes().iter().rev() {
            match change {
                Change::CreateTable { table } if published.get_table_by_id(*table).is_none() => {
                    self.storage.drop_table(*table);
                }
                Change::CreateIndex { table, name, .. } => match published.get_index(name) {
                    Ok(index) if index.table_id == *table => {
                        // Dropped and re-created under the same name: rebuild the original
                        let rebuilt = published
                            .get_table_by_id(*table)
                            .map(|def| def.slots(&index.columns))
                            .transpose()
                            .and_then(|slots| match slots {
                                Some(slots) => self.storage.create_index(*table, name, slots, index.unique),
                                None => Ok(()),
                            });
                        if let Err(e) = rebuilt {
                            warn!(table, index = %name, error = %e, "Failed to restore index");
                        }
                    }
                    _ => self.storage.drop_index(*table, name),
                },
                _ => {}
            }
        }
        self.txns.mark_aborted(txn.id());
        self.txns.release_locks(txn.id());
    }
}
