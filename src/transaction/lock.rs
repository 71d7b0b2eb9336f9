//! Lock Manager
//!
//! Shared/exclusive locks on rows, plus one lock per transaction that is
//! held until it finishes so others can wait for its outcome. Waiters record
//! wait-for edges; a request that would close a cycle fails immediately with
//! `DeadlockDetected` and the requester is the victim.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use super::snapshot::TxnId;
use crate::catalog::TableId;
use crate::error::{Error, Result};
use crate::storage::RowId;

/// Something a transaction can lock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockTarget {
    Row(TableId, RowId),
    /// Held by the transaction itself until commit or rollback
    Txn(TxnId),
}

/// Lock Mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Key share, taken on referenced rows by foreign key checks
    Shared,
    /// Taken by writers
    Exclusive,
}

#[derive(Debug, Default)]
struct LockEntry {
    exclusive: Option<TxnId>,
    shared: Vec<TxnId>,
}

impl LockEntry {
    /// Other transactions that block `txn` from taking `mode`
    fn blockers(&self, txn: TxnId, mode: LockMode) -> Vec<TxnId> {
        let mut blockers: Vec<TxnId> = self.exclusive.iter().copied().filter(|&h| h != txn).collect();
        if mode == LockMode::Exclusive {
            blockers.extend(self.shared.iter().copied().filter(|&h| h != txn));
        }
        blockers
    }

    fn is_free(&self) -> bool {
        self.exclusive.is_none() && self.shared.is_empty()
    }
}

#[derive(Debug, Default)]
struct LockTable {
    entries: HashMap<LockTarget, LockEntry>,
    held: HashMap<TxnId, HashSet<LockTarget>>,
    /// Waiter -> holders it waits on
    waits_for: HashMap<TxnId, Vec<TxnId>>,
}

impl LockTable {
    fn grant(&mut self, txn: TxnId, target: LockTarget, mode: LockMode) {
        let entry = self.entries.entry(target).or_default();
        match mode {
            LockMode::Shared => {
                if entry.exclusive != Some(txn) && !entry.shared.contains(&txn) {
                    entry.shared.push(txn);
                }
            }
            LockMode::Exclusive => {
                // Upgrade
                entry.shared.retain(|&h| h != txn);
                entry.exclusive = Some(txn);
            }
        }
        self.held.entry(txn).or_default().insert(target);
        self.waits_for.remove(&txn);
    }

    /// Whether following wait-for edges from `start` leads back to it
    fn closes_cycle(&self, start: TxnId) -> bool {
        let mut stack: Vec<TxnId> = self.waits_for.get(&start).cloned().unwrap_or_default();
        let mut visited = HashSet::new();
        while let Some(txn) = stack.pop() {
            if txn == start {
                return true;
            }
            if visited.insert(txn) {
                if let Some(next) = self.waits_for.get(&txn) {
                    stack.extend(next.iter().copied());
                }
            }
        }
        false
    }

    fn release(&mut self, txn: TxnId, target: LockTarget) {
        if let Some(entry) = self.entries.get_mut(&target) {
            if entry.exclusive == Some(txn) {
                entry.exclusive = None;
            }
            entry.shared.retain(|&h| h != txn);
            if entry.is_free() {
                self.entries.remove(&target);
            }
        }
    }
}

/// Lock Manager
#[derive(Debug, Default)]
pub struct LockManager {
    table: Mutex<LockTable>,
    released: Condvar,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire lock, waiting up to `timeout`
    pub fn acquire(
        &self,
        txn: TxnId,
        target: LockTarget,
        mode: LockMode,
        timeout: Duration,
    ) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut table = self.table.lock();
        let mut timed_out = false;

        loop {
            let blockers = table
                .entries
                .get(&target)
                .map(|entry| entry.blockers(txn, mode))
                .unwrap_or_default();
            if blockers.is_empty() {
                table.grant(txn, target, mode);
                return Ok(());
            }

            if timed_out {
                table.waits_for.remove(&txn);
                debug!(txn, ?target, ?blockers, "Lock wait timed out");
                return Err(Error::LockTimeout(timeout.as_millis()));
            }

            table.waits_for.insert(txn, blockers.clone());
            if table.closes_cycle(txn) {
                table.waits_for.remove(&txn);
                warn!(txn, ?target, ?blockers, "Deadlock detected");
                return Err(Error::DeadlockDetected(txn));
            }

            timed_out = self.released.wait_until(&mut table, deadline).timed_out();
        }
    }

    /// Block until `other` finishes (commits or rolls back)
    pub fn wait_for_txn(&self, txn: TxnId, other: TxnId, timeout: Duration) -> Result<()> {
        let target = LockTarget::Txn(other);
        self.acquire(txn, target, LockMode::Shared, timeout)?;
        self.release(txn, target);
        Ok(())
    }

    /// Whether `txn` currently holds `target` in at least `mode`
    pub fn holds(&self, txn: TxnId, target: LockTarget, mode: LockMode) -> bool {
        let table = self.table.lock();
        match table.entries.get(&target) {
            Some(entry) if entry.exclusive == Some(txn) => true,
            Some(entry) => mode == LockMode::Shared && entry.shared.contains(&txn),
            None => false,
        }
    }

    /// Release a single lock
    pub fn release(&self, txn: TxnId, target: LockTarget) {
        let mut table = self.table.lock();
        table.release(txn, target);
        if let Some(held) = table.held.get_mut(&txn) {
            held.remove(&target);
        }
        drop(table);
        self.released.notify_all();
    }

    /// Release locks for a transaction
    pub fn release_all(&self, txn: TxnId) {
        let mut table = self.table.lock();
        if let Some(held) = table.held.remove(&txn) {
            for target in held {
                table.release(txn, target);
            }
        }
        table.waits_for.remove(&txn);
        drop(table);
        self.released.notify_all();
    }
}
