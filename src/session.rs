//! Sessions
//!
//! A session runs statements for one caller and owns at most one
//! transaction. Outside BEGIN ... COMMIT every statement runs in its own
//! transaction that commits when the statement succeeds.

use tracing::{debug, warn};

use crate::database::{Database, Shared};
use crate::error::{Error, Result};
use crate::executor::{ExecutionEngine, QueryResult};
use crate::sql::{parse_sql, Statement};
use crate::storage::Value;
use crate::transaction::{IsolationLevel, Transaction};

/// A connection to a [`Database`]
#[derive(Debug)]
pub struct Session {
    db: Database,
    txn: Option<Transaction>,
    /// Level for transactions that do not choose one
    default_isolation: IsolationLevel,
    /// SET TRANSACTION issued while no fresh transaction could take it
    next_isolation: Option<IsolationLevel>,
}

impl Session {
    pub fn new(db: Database) -> Self {
        let default_isolation = db.config().default_isolation;
        Self {
            db,
            txn: None,
            default_isolation,
            next_isolation: None,
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Whether an explicit transaction is open
    pub fn in_transaction(&self) -> bool {
        self.txn.is_some()
    }

    /// Whether the open transaction has failed and awaits ROLLBACK
    pub fn transaction_failed(&self) -> bool {
        self.txn.as_ref().map_or(false, Transaction::is_failed)
    }

    pub fn default_isolation(&self) -> IsolationLevel {
        self.default_isolation
    }

    /// Execute one or more `;`-separated statements; returns the result of
    /// the last one
    pub fn execute(&mut self, sql: &str) -> Result<QueryResult> {
        self.execute_with_params(sql, &[])
    }

    /// Execute with `$n` / `?` parameters bound to `params`
    pub fn execute_with_params(&mut self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let statements = parse_sql(sql)?;
        let mut result = QueryResult::empty();
        for statement in &statements {
            result = self.execute_statement(statement, params)?;
        }
        Ok(result)
    }

    /// Execute an already parsed statement
    pub fn execute_statement(&mut self, statement: &Statement, params: &[Value]) -> Result<QueryResult> {
        match statement {
            Statement::BeginTransaction(level) => self.begin(*level),
            Statement::Commit => self.commit(),
            Statement::Rollback => Ok(self.rollback()),
            Statement::SetIsolationLevel { level, session } => self.set_isolation(*level, *session),
            _ => match self.txn.take() {
                Some(txn) => self.run_in_transaction(txn, statement, params),
                None => self.run_autocommit(statement, params),
            },
        }
    }

    fn begin(&mut self, level: Option<IsolationLevel>) -> Result<QueryResult> {
        if self.txn.is_some() {
            return Err(Error::NestedTransaction);
        }
        let isolation = level
            .or(self.next_isolation.take())
            .unwrap_or(self.default_isolation);
        let txn = self.db.shared().begin(isolation, true);
        let id = txn.id();
        self.txn = Some(txn);
        Ok(QueryResult::with_message(format!("Transaction {} started", id)))
    }

    fn commit(&mut self) -> Result<QueryResult> {
        let mut txn = self.txn.take().ok_or(Error::NoActiveTransaction)?;
        let shared = self.db.shared();
        if txn.is_failed() {
            shared.rollback(&mut txn);
            return Err(Error::TransactionAborted);
        }
        if let Err(e) = shared.commit(&mut txn) {
            warn!(txn = txn.id(), error = %e, "Commit failed; rolling back");
            shared.rollback(&mut txn);
            return Err(e);
        }
        Ok(QueryResult::with_message(format!(
            "Transaction {} committed",
            txn.id()
        )))
    }

    /// ROLLBACK outside a transaction does nothing
    fn rollback(&mut self) -> QueryResult {
        match self.txn.take() {
            Some(mut txn) => {
                self.db.shared().rollback(&mut txn);
                QueryResult::with_message(format!("Transaction {} rolled back", txn.id()))
            }
            None => QueryResult::with_message("No transaction in progress"),
        }
    }

    fn set_isolation(&mut self, level: IsolationLevel, session: bool) -> Result<QueryResult> {
        if session {
            self.default_isolation = level;
            return Ok(QueryResult::with_message(format!(
                "Session isolation level set to {}",
                level
            )));
        }
        match self.txn.as_mut() {
            Some(txn) if txn.is_failed() => Err(Error::TransactionAborted),
            Some(txn) if !txn.has_started() => {
                txn.set_isolation(level)?;
                Ok(QueryResult::with_message(format!(
                    "Transaction isolation level set to {}",
                    level
                )))
            }
            _ => {
                self.next_isolation = Some(level);
                Ok(QueryResult::with_message(format!(
                    "Next transaction isolation level set to {}",
                    level
                )))
            }
        }
    }

    fn run_in_transaction(
        &mut self,
        mut txn: Transaction,
        statement: &Statement,
        params: &[Value],
    ) -> Result<QueryResult> {
        if txn.is_failed() {
            self.txn = Some(txn);
            return Err(Error::TransactionAborted);
        }
        let shared = self.db.shared();
        match run_statement(shared, &mut txn, statement, params) {
            Ok(result) => {
                self.txn = Some(txn);
                Ok(result)
            }
            Err(e @ (Error::TriggerFailed { .. } | Error::TriggerDepthExceeded(_))) => {
                warn!(txn = txn.id(), error = %e, "Trigger failed; transaction rolled back");
                shared.rollback(&mut txn);
                Err(e)
            }
            Err(e) => {
                debug!(txn = txn.id(), error = %e, "Statement failed; transaction must be rolled back");
                txn.mark_failed();
                self.txn = Some(txn);
                Err(e)
            }
        }
    }

    fn run_autocommit(&mut self, statement: &Statement, params: &[Value]) -> Result<QueryResult> {
        let isolation = self.next_isolation.take().unwrap_or(self.default_isolation);
        let shared = self.db.shared();
        let mut txn = shared.begin(isolation, false);
        let outcome = run_statement(shared, &mut txn, statement, params)
            .and_then(|result| shared.commit(&mut txn).map(|_| result));
        if outcome.is_err() {
            shared.rollback(&mut txn);
        }
        outcome
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(mut txn) = self.txn.take() {
            debug!(txn = txn.id(), "Session closed with an open transaction");
            self.db.shared().rollback(&mut txn);
        }
    }
}

fn run_statement(
    shared: &Shared,
    txn: &mut Transaction,
    statement: &Statement,
    params: &[Value],
) -> Result<QueryResult> {
    txn.begin_statement(&shared.txns, shared.published());
    let mut engine = ExecutionEngine::new(shared, txn, params, 0);
    let result = engine.execute(statement)?;
    engine.check_statement_constraints()?;
    Ok(result)
}
