//! Query Executor for KeelDB
//!
//! This module executes logical plans and returns results. An
//! [`ExecutionEngine`] runs one statement inside one transaction; it reads
//! through the transaction's snapshot and records which tables it read.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::ops::Bound;
use std::rc::Rc;
use std::sync::Arc;

use chrono::NaiveDateTime;
use serde::Serialize;

use super::expr::RowScope;
use super::planner::{
    CtePlan, IndexLookup, JoinStrategy, LogicalPlan, Planner, ScalarExpr, SortKey,
};
use crate::catalog::{Catalog, DataType, TableDef};
use crate::database::Shared;
use crate::error::{Error, Result};
use crate::sql::ast::{JoinType, Query, SetOperator, Statement};
use crate::storage::{IndexKey, RowId, Tuple, Value};
use crate::transaction::Transaction;

/// Query result
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    /// Column names
    pub columns: Vec<String>,
    /// Result rows
    pub rows: Vec<Tuple>,
    /// Number of affected rows (for INSERT/UPDATE/DELETE)
    pub affected_rows: usize,
    /// Message
    pub message: Option<String>,
}

impl QueryResult {
    /// Create a new empty result
    pub fn empty() -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
            affected_rows: 0,
            message: None,
        }
    }

    /// Create a result holding rows
    pub fn with_rows(columns: Vec<String>, rows: Vec<Tuple>) -> Self {
        Self {
            columns,
            rows,
            affected_rows: 0,
            message: None,
        }
    }

    /// Create a result with a message
    pub fn with_message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::empty()
        }
    }

    /// Create a result with affected rows count
    pub fn with_affected_rows(count: usize, message: impl Into<String>) -> Self {
        Self {
            affected_rows: count,
            message: Some(message.into()),
            ..Self::empty()
        }
    }

    /// Index of a column by name
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Value at `row`, `column`
    pub fn value(&self, row: usize, column: &str) -> Option<&Value> {
        self.rows.get(row)?.get(self.column_index(column)?)
    }
}

/// Execution Engine
pub struct ExecutionEngine<'a> {
    pub(super) db: &'a Shared,
    pub(super) txn: &'a mut Transaction,
    /// Bound `$n` / `?` values
    pub(super) params: &'a [Value],
    /// Trigger nesting level; 0 for a statement issued by a client
    pub(super) depth: usize,
    /// CURRENT_DATE / CURRENT_TIMESTAMP for the whole statement
    pub(super) now: NaiveDateTime,
    /// Results of uncorrelated subqueries, by subquery id
    pub(super) subquery_cache: HashMap<usize, Rc<Vec<Tuple>>>,
    /// Materialized WITH entries, by id
    pub(super) cte_rows: HashMap<usize, Rc<Vec<Tuple>>>,
}

impl<'a> ExecutionEngine<'a> {
    /// Create an engine for one statement
    pub(crate) fn new(
        db: &'a Shared,
        txn: &'a mut Transaction,
        params: &'a [Value],
        depth: usize,
    ) -> Self {
        Self {
            db,
            txn,
            params,
            depth,
            now: chrono::Local::now().naive_local(),
            subquery_cache: HashMap::new(),
            cte_rows: HashMap::new(),
        }
    }

    /// Catalog as this transaction sees it
    pub(super) fn catalog(&self) -> Arc<Catalog> {
        Arc::clone(self.txn.catalog())
    }

    /// Execute a statement; transaction control belongs to the session
    pub fn execute(&mut self, statement: &Statement) -> Result<QueryResult> {
        match statement {
            Statement::Query(query) => self.execute_query(query),
            Statement::Insert(stmt) => self.execute_insert(stmt),
            Statement::Update(stmt) => self.execute_update(stmt),
            Statement::Delete(stmt) => self.execute_delete(stmt),
            Statement::CreateTable(stmt) => self.execute_create_table(stmt),
            Statement::AlterTable(stmt) => self.execute_alter_table(stmt),
            Statement::DropTable(stmt) => self.execute_drop_table(stmt),
            Statement::CreateIndex(stmt) => self.execute_create_index(stmt),
            Statement::DropIndex { name, if_exists } => self.execute_drop_index(name, *if_exists),
            Statement::CreateView(stmt) => self.execute_create_view(stmt),
            Statement::DropView {
                name,
                if_exists,
                materialized,
            } => self.execute_drop_view(name, *if_exists, *materialized),
            Statement::RefreshMaterializedView(name) => self.execute_refresh_view(name),
            Statement::BeginTransaction(_)
            | Statement::Commit
            | Statement::Rollback
            | Statement::SetIsolationLevel { .. } => Err(Error::ExecutionError(
                "transaction control is not allowed here".to_string(),
            )),
        }
    }

    /// Plan and run a query
    pub fn execute_query(&mut self, query: &Query) -> Result<QueryResult> {
        let catalog = self.catalog();
        let plan = Planner::new(&catalog).plan_query(query, &[])?;
        let rows = self.execute_plan(&plan, None, None)?;
        Ok(QueryResult::with_rows(plan.schema().names(), rows))
    }

    /// Execute a plan node. `hint` is the most rows the caller will look at.
    pub(crate) fn execute_plan(
        &mut self,
        plan: &LogicalPlan,
        outer: Option<&RowScope<'_>>,
        hint: Option<usize>,
    ) -> Result<Vec<Tuple>> {
        match plan {
            LogicalPlan::Unit => Ok(vec![Tuple::empty()]),
            LogicalPlan::Scan { table, .. } => self.scan_table(table, None, outer, hint),
            LogicalPlan::Filter { input, predicate } => match input.as_ref() {
                LogicalPlan::Scan { table, .. } => self.scan_table(table, Some(predicate), outer, hint),
                input => {
                    let rows = self.execute_plan(input, outer, None)?;
                    let mut kept = Vec::new();
                    for row in rows {
                        if hint.map_or(false, |h| kept.len() >= h) {
                            break;
                        }
                        if self.eval_predicate(predicate, row.values(), outer)? {
                            kept.push(row);
                        }
                    }
                    Ok(kept)
                }
            },
            LogicalPlan::IndexScan { .. } => Ok(self
                .table_rows(plan, outer)?
                .into_iter()
                .map(|(_, row)| row)
                .collect()),
            LogicalPlan::Materialized { rows, .. } => Ok(rows.clone()),
            LogicalPlan::Derived { input, .. } => self.execute_plan(input, outer, hint),
            LogicalPlan::CteScan { id, .. } => self
                .cte_rows
                .get(id)
                .map(|rows| rows.as_ref().clone())
                .ok_or_else(|| Error::Internal(format!("WITH entry {} not materialized", id))),
            LogicalPlan::Join {
                left,
                right,
                join_type,
                condition,
                strategy,
                ..
            } => self.execute_join(left, right, *join_type, condition.as_ref(), strategy, outer),
            LogicalPlan::Aggregate {
                input,
                group_by,
                aggregates,
                ..
            } => self.execute_aggregate(input, group_by, aggregates, outer),
            LogicalPlan::Window {
                input, functions, ..
            } => self.execute_window(input, functions, outer),
            LogicalPlan::Project { input, exprs, .. } => {
                let rows = self.execute_plan(input, outer, hint)?;
                let mut projected = Vec::with_capacity(rows.len());
                for row in &rows {
                    let mut values = Vec::with_capacity(exprs.len());
                    for expr in exprs {
                        values.push(self.eval(expr, row.values(), outer)?);
                    }
                    projected.push(Tuple::new(values));
                }
                Ok(projected)
            }
            LogicalPlan::Distinct { input } => {
                let rows = self.execute_plan(input, outer, None)?;
                let mut seen = HashSet::new();
                Ok(rows
                    .into_iter()
                    .filter(|row| seen.insert(row.values().to_vec()))
                    .collect())
            }
            LogicalPlan::Sort { input, keys } => {
                let mut rows = self.execute_plan(input, outer, None)?;
                sort_rows(&mut rows, keys);
                Ok(rows)
            }
            LogicalPlan::Limit {
                input,
                limit,
                offset,
            } => {
                let limit = self.eval_count(limit.as_ref(), "LIMIT", outer)?;
                let offset = self.eval_count(offset.as_ref(), "OFFSET", outer)?.unwrap_or(0);
                let wanted = match (limit, hint) {
                    (Some(l), Some(h)) => Some(l.min(h)),
                    (l, h) => l.or(h),
                };
                let input_hint = wanted.map(|w| w.saturating_add(offset));
                let rows = self.execute_plan(input, outer, input_hint)?;
                Ok(rows
                    .into_iter()
                    .skip(offset)
                    .take(wanted.unwrap_or(usize::MAX))
                    .collect())
            }
            LogicalPlan::Truncate { input, width } => {
                let rows = self.execute_plan(input, outer, hint)?;
                Ok(rows
                    .into_iter()
                    .map(|row| row.into_values().into_iter().take(*width).collect())
                    .collect())
            }
            LogicalPlan::SetOperation {
                op,
                all,
                left,
                right,
            } => {
                let left = self.execute_plan(left, outer, None)?;
                let right = self.execute_plan(right, outer, None)?;
                Ok(set_operation(*op, *all, left, right))
            }
            LogicalPlan::With { ctes, input } => {
                for cte in ctes {
                    self.materialize_cte(cte, outer)?;
                }
                self.execute_plan(input, outer, hint)
            }
        }
    }

    /// LIMIT / OFFSET value; NULL means no bound
    fn eval_count(
        &mut self,
        expr: Option<&ScalarExpr>,
        clause: &str,
        outer: Option<&RowScope<'_>>,
    ) -> Result<Option<usize>> {
        let Some(expr) = expr else {
            return Ok(None);
        };
        match self.eval(expr, &[], outer)? {
            Value::Null => Ok(None),
            Value::Integer(n) if n >= 0 => Ok(Some(n as usize)),
            other => Err(Error::ExecutionError(format!(
                "{} must be a non-negative integer, got {}",
                clause, other
            ))),
        }
    }

    fn materialize_cte(&mut self, cte: &CtePlan, outer: Option<&RowScope<'_>>) -> Result<()> {
        let anchor = self.execute_plan(&cte.plan, outer, None)?;
        let Some(step) = &cte.recursive else {
            self.cte_rows.insert(cte.id, Rc::new(anchor));
            return Ok(());
        };

        let limit = self.db.config.max_recursion_depth;
        let mut seen: HashSet<Vec<Value>> = HashSet::new();
        let fresh = |rows: Vec<Tuple>, seen: &mut HashSet<Vec<Value>>| -> Vec<Tuple> {
            if step.union_all {
                rows
            } else {
                rows.into_iter()
                    .filter(|row| seen.insert(row.values().to_vec()))
                    .collect()
            }
        };

        let mut working = fresh(anchor, &mut seen);
        let mut all = working.clone();
        let mut iterations = 0;
        while !working.is_empty() {
            self.cte_rows.insert(cte.id, Rc::new(working));
            // Subqueries may read the working table
            self.subquery_cache.clear();
            let produced = self.execute_plan(&step.plan, outer, None)?;
            let new_rows = fresh(produced, &mut seen);
            if new_rows.is_empty() {
                break;
            }
            iterations += 1;
            if iterations > limit {
                return Err(Error::RecursionLimitExceeded(limit));
            }
            all.extend(new_rows.iter().cloned());
            working = new_rows;
        }
        self.subquery_cache.clear();
        self.cte_rows.insert(cte.id, Rc::new(all));
        Ok(())
    }

    /// Visible rows of a table, as logical rows
    fn scan_table(
        &mut self,
        table: &TableDef,
        predicate: Option<&ScalarExpr>,
        outer: Option<&RowScope<'_>>,
        hint: Option<usize>,
    ) -> Result<Vec<Tuple>> {
        self.txn.record_read(table.id);
        let snapshot = self.txn.snapshot()?.clone();
        let mut rows = Vec::new();
        for (_, stored) in self.db.storage.scan(table.id, snapshot)? {
            if hint.map_or(false, |h| rows.len() >= h) {
                break;
            }
            let row = table.schema.to_logical(&stored);
            if let Some(predicate) = predicate {
                if !self.eval_predicate(predicate, row.values(), outer)? {
                    continue;
                }
            }
            rows.push(row);
        }
        Ok(rows)
    }

    /// Rows with their ids for a Scan, IndexScan or a Filter over either
    pub(super) fn table_rows(
        &mut self,
        plan: &LogicalPlan,
        outer: Option<&RowScope<'_>>,
    ) -> Result<Vec<(RowId, Tuple)>> {
        match plan {
            LogicalPlan::Scan { table, .. } => self.all_rows(table),
            LogicalPlan::IndexScan {
                table,
                index,
                lookup,
                ..
            } => match self.index_rows(table, index, lookup, outer)? {
                Some(rows) => Ok(rows),
                None => self.all_rows(table),
            },
            LogicalPlan::Filter { input, predicate } => {
                let mut kept = Vec::new();
                for (id, row) in self.table_rows(input, outer)? {
                    if self.eval_predicate(predicate, row.values(), outer)? {
                        kept.push((id, row));
                    }
                }
                Ok(kept)
            }
            other => Err(Error::Internal(format!(
                "expected a table access plan, got {:?}",
                other
            ))),
        }
    }

    fn all_rows(&mut self, table: &TableDef) -> Result<Vec<(RowId, Tuple)>> {
        self.txn.record_read(table.id);
        let snapshot = self.txn.snapshot()?.clone();
        Ok(self
            .db
            .storage
            .scan_all(table.id, &snapshot)?
            .into_iter()
            .map(|(id, stored)| (id, table.schema.to_logical(&stored)))
            .collect())
    }

    /// Rows an index lookup finds, in row id order. `None` when the probe
    /// values cannot be matched against the index exactly.
    fn index_rows(
        &mut self,
        table: &TableDef,
        index: &str,
        lookup: &IndexLookup,
        outer: Option<&RowScope<'_>>,
    ) -> Result<Option<Vec<(RowId, Tuple)>>> {
        let catalog = self.catalog();
        let index_def = catalog.get_index(index)?;
        let types = index_def
            .columns
            .iter()
            .map(|c| table.column(c).map(|c| c.data_type.clone()))
            .collect::<Result<Vec<_>>>()?;

        self.txn.record_read(table.id);
        let snapshot = self.txn.snapshot()?.clone();
        let mut rows = match lookup {
            IndexLookup::Eq(exprs) => {
                let mut key = Vec::with_capacity(exprs.len());
                for (expr, data_type) in exprs.iter().zip(&types) {
                    let value = self.eval(expr, &[], outer)?;
                    if value.is_null() {
                        return Ok(Some(Vec::new()));
                    }
                    match probe_value(value, data_type) {
                        Some(v) => key.push(v),
                        None => return Ok(None),
                    }
                }
                self.db
                    .storage
                    .index_lookup(table.id, index, &IndexKey::composite(key), &snapshot)?
            }
            IndexLookup::Range { lower, upper } => {
                let mut bounds = Vec::with_capacity(2);
                for bound in [lower, upper] {
                    bounds.push(match bound {
                        None => Bound::Unbounded,
                        Some((expr, inclusive)) => {
                            let value = self.eval(expr, &[], outer)?;
                            // Comparison with NULL matches nothing
                            if value.is_null() {
                                return Ok(Some(Vec::new()));
                            }
                            let Some(value) = probe_value(value, &types[0]) else {
                                return Ok(None);
                            };
                            if *inclusive {
                                Bound::Included(IndexKey::new(value))
                            } else {
                                Bound::Excluded(IndexKey::new(value))
                            }
                        }
                    });
                }
                self.db.storage.index_range(
                    table.id,
                    index,
                    bounds[0].as_ref(),
                    bounds[1].as_ref(),
                    &snapshot,
                )?
            }
        };
        rows.sort_by_key(|(id, _)| *id);
        Ok(Some(
            rows.into_iter()
                .map(|(id, stored)| (id, table.schema.to_logical(&stored)))
                .collect(),
        ))
    }

    fn execute_join(
        &mut self,
        left: &LogicalPlan,
        right: &LogicalPlan,
        join_type: JoinType,
        condition: Option<&ScalarExpr>,
        strategy: &JoinStrategy,
        outer: Option<&RowScope<'_>>,
    ) -> Result<Vec<Tuple>> {
        let left_rows = self.execute_plan(left, outer, None)?;
        let left_width = left.schema().len();
        let right_width = right.schema().len();
        let keeps_left = matches!(join_type, JoinType::Left | JoinType::Full);
        let keeps_right = matches!(join_type, JoinType::Right | JoinType::Full);

        if let JoinStrategy::IndexLookup { index, keys } = strategy {
            return self.index_join(left_rows, right, index, keys, condition, keeps_left, right_width, outer);
        }

        let right_rows = self.execute_plan(right, outer, None)?;
        let mut right_matched = vec![false; right_rows.len()];
        let mut result = Vec::new();

        // Candidate right rows per left row
        let buckets = match strategy {
            JoinStrategy::Hash { right_keys, .. } => {
                let mut table: HashMap<Vec<Value>, Vec<usize>> = HashMap::new();
                for (j, row) in right_rows.iter().enumerate() {
                    let mut key = Vec::with_capacity(right_keys.len());
                    for expr in right_keys {
                        key.push(self.eval(expr, row.values(), outer)?);
                    }
                    if !key.iter().any(Value::is_null) {
                        table.entry(key).or_default().push(j);
                    }
                }
                Some(table)
            }
            _ => None,
        };
        let all_right: Vec<usize> = (0..right_rows.len()).collect();

        for left_row in &left_rows {
            let candidates: &[usize] = match (&buckets, strategy) {
                (Some(table), JoinStrategy::Hash { left_keys, .. }) => {
                    let mut key = Vec::with_capacity(left_keys.len());
                    for expr in left_keys {
                        key.push(self.eval(expr, left_row.values(), outer)?);
                    }
                    table.get(&key).map(Vec::as_slice).unwrap_or(&[])
                }
                _ => &all_right,
            };

            let mut matched = false;
            for &j in candidates {
                let combined = left_row.concat(&right_rows[j]);
                let hit = match condition {
                    Some(c) => self.eval_predicate(c, combined.values(), outer)?,
                    None => true,
                };
                if hit {
                    matched = true;
                    right_matched[j] = true;
                    result.push(combined);
                }
            }
            if !matched && keeps_left {
                result.push(left_row.concat(&null_row(right_width)));
            }
        }

        if keeps_right {
            for (j, row) in right_rows.iter().enumerate() {
                if !right_matched[j] {
                    result.push(null_row(left_width).concat(row));
                }
            }
        }
        Ok(result)
    }

    /// Probe the right table's index once per left row
    #[allow(clippy::too_many_arguments)]
    fn index_join(
        &mut self,
        left_rows: Vec<Tuple>,
        right: &LogicalPlan,
        index: &str,
        keys: &[ScalarExpr],
        condition: Option<&ScalarExpr>,
        keeps_left: bool,
        right_width: usize,
        outer: Option<&RowScope<'_>>,
    ) -> Result<Vec<Tuple>> {
        let (table, right_filter) = match right {
            LogicalPlan::Scan { table, .. } => (table, None),
            LogicalPlan::Filter { input, predicate } => match input.as_ref() {
                LogicalPlan::Scan { table, .. } => (table, Some(predicate)),
                other => return Err(Error::Internal(format!("index join over {:?}", other))),
            },
            other => return Err(Error::Internal(format!("index join over {:?}", other))),
        };

        let mut fallback: Option<Vec<Tuple>> = None;
        let mut result = Vec::new();
        for left_row in &left_rows {
            // Keys are bound over the left row: evaluate them as constants in its scope
            let lookup = IndexLookup::Eq(
                keys.iter()
                    .map(|k| self.eval(k, left_row.values(), outer).map(ScalarExpr::Literal))
                    .collect::<Result<Vec<_>>>()?,
            );
            let candidates: Vec<Tuple> = match self.index_rows(table, index, &lookup, outer)? {
                Some(rows) => rows.into_iter().map(|(_, row)| row).collect(),
                None => {
                    if fallback.is_none() {
                        fallback = Some(self.scan_table(table, None, outer, None)?);
                    }
                    fallback.clone().unwrap_or_default()
                }
            };

            let mut matched = false;
            for right_row in candidates {
                if let Some(filter) = right_filter {
                    if !self.eval_predicate(filter, right_row.values(), outer)? {
                        continue;
                    }
                }
                let combined = left_row.concat(&right_row);
                let hit = match condition {
                    Some(c) => self.eval_predicate(c, combined.values(), outer)?,
                    None => true,
                };
                if hit {
                    matched = true;
                    result.push(combined);
                }
            }
            if !matched && keeps_left {
                result.push(left_row.concat(&null_row(right_width)));
            }
        }
        Ok(result)
    }
}

/// Convert a probe value to the column's type; `None` when that would
/// change the value, in which case the index cannot answer exactly
pub(super) fn probe_value(value: Value, data_type: &DataType) -> Option<Value> {
    let converted = value.cast(data_type, false).ok()?;
    (converted.compare(&value) == Some(Ordering::Equal)).then_some(converted)
}

fn null_row(width: usize) -> Tuple {
    Tuple::new(vec![Value::Null; width])
}

/// Order two key lists; each direction is (ascending, nulls_first)
pub(crate) fn compare_keys(a: &[Value], b: &[Value], directions: &[(bool, bool)]) -> Ordering {
    for ((x, y), &(ascending, nulls_first)) in a.iter().zip(b).zip(directions) {
        let ordering = match (x.is_null(), y.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) if nulls_first => Ordering::Less,
            (true, false) => Ordering::Greater,
            (false, true) if nulls_first => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => {
                let o = x.compare(y).unwrap_or_else(|| x.total_cmp(y));
                if ascending {
                    o
                } else {
                    o.reverse()
                }
            }
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// Stable sort by output columns
fn sort_rows(rows: &mut [Tuple], keys: &[SortKey]) {
    let directions: Vec<(bool, bool)> = keys.iter().map(|k| (k.ascending, k.nulls_first)).collect();
    let indices: Vec<usize> = keys.iter().map(|k| k.index).collect();
    rows.sort_by(|a, b| {
        let ka: Vec<Value> = indices.iter().map(|&i| a.get(i).cloned().unwrap_or(Value::Null)).collect();
        let kb: Vec<Value> = indices.iter().map(|&i| b.get(i).cloned().unwrap_or(Value::Null)).collect();
        compare_keys(&ka, &kb, &directions)
    });
}

fn set_operation(op: SetOperator, all: bool, left: Vec<Tuple>, right: Vec<Tuple>) -> Vec<Tuple> {
    let key = |row: &Tuple| row.values().to_vec();
    match (op, all) {
        (SetOperator::Union, true) => left.into_iter().chain(right).collect(),
        (SetOperator::Union, false) => {
            let mut seen = HashSet::new();
            left.into_iter()
                .chain(right)
                .filter(|row| seen.insert(key(row)))
                .collect()
        }
        (SetOperator::Intersect, false) | (SetOperator::Except, false) => {
            let others: HashSet<Vec<Value>> = right.iter().map(key).collect();
            let keep_present = op == SetOperator::Intersect;
            let mut seen = HashSet::new();
            left.into_iter()
                .filter(|row| {
                    let k = key(row);
                    others.contains(&k) == keep_present && seen.insert(k)
                })
                .collect()
        }
        (SetOperator::Intersect, true) | (SetOperator::Except, true) => {
            let mut counts: HashMap<Vec<Value>, usize> = HashMap::new();
            for row in &right {
                *counts.entry(key(row)).or_default() += 1;
            }
            left.into_iter()
                .filter(|row| {
                    let present = match counts.get_mut(&key(row)) {
                        Some(n) if *n > 0 => {
                            *n -= 1;
                            true
                        }
                        _ => false,
                    };
                    present == (op == SetOperator::Intersect)
                })
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(values: &[i64]) -> Vec<Tuple> {
        values.iter().map(|&v| Tuple::new(vec![Value::Integer(v)])).collect()
    }

    fn ints(rows: &[Tuple]) -> Vec<i64> {
        rows.iter().map(|r| r.get(0).and_then(Value::as_i64).unwrap()).collect()
    }

    #[test]
    fn test_set_operations() {
        let (l, r) = (rows(&[1, 2, 2, 3]), rows(&[2, 3, 3, 4]));
        assert_eq!(ints(&set_operation(SetOperator::Union, false, l.clone(), r.clone())), vec![1, 2, 3, 4]);
        assert_eq!(ints(&set_operation(SetOperator::Union, true, l.clone(), r.clone())).len(), 8);
        assert_eq!(ints(&set_operation(SetOperator::Intersect, false, l.clone(), r.clone())), vec![2, 3]);
        assert_eq!(ints(&set_operation(SetOperator::Except, false, l.clone(), r.clone())), vec![1]);
        assert_eq!(ints(&set_operation(SetOperator::Except, true, l, r)), vec![1, 2]);
    }

    #[test]
    fn test_sort_is_stable_and_nulls_lowest() {
        let mut data = vec![
            Tuple::new(vec![Value::Integer(2), Value::from("a")]),
            Tuple::new(vec![Value::Null, Value::from("b")]),
            Tuple::new(vec![Value::Integer(1), Value::from("c")]),
            Tuple::new(vec![Value::Integer(2), Value::from("d")]),
        ];
        let asc = [SortKey {
            index: 0,
            ascending: true,
            nulls_first: true,
        }];
        sort_rows(&mut data, &asc);
        let labels: Vec<&str> = data.iter().map(|r| r.get(1).and_then(Value::as_string).unwrap()).collect();
        assert_eq!(labels, vec!["b", "c", "a", "d"]);

        let desc = [SortKey {
            index: 0,
            ascending: false,
            nulls_first: false,
        }];
        sort_rows(&mut data, &desc);
        let labels: Vec<&str> = data.iter().map(|r| r.get(1).and_then(Value::as_string).unwrap()).collect();
        assert_eq!(labels, vec!["a", "d", "c", "b"]);
    }

    #[test]
    fn test_probe_value_must_be_exact() {
        assert_eq!(probe_value(Value::Integer(5), &DataType::BigInt), Some(Value::Integer(5)));
        assert!(probe_value(Value::Float(5.5), &DataType::Integer).is_none());
        assert!(probe_value(Value::from("2024-01-31"), &DataType::Date).is_some());
    }
}
