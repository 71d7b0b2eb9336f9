//! Heuristic query optimizer
//!
//! Rewrites applied after binding:
//! - Filter(Scan) becomes Filter(IndexScan) when an index matches constant
//!   equality or range conjuncts
//! - WHERE conjuncts are pushed below joins when only one side is referenced
//! - equi-joins pick a hash or index-lookup strategy
//!
//! Rewrites never drop a predicate; the index only narrows the rows read.

use crate::catalog::{Catalog, IndexDef, TableDef};
use crate::executor::planner::{IndexLookup, JoinStrategy, LogicalPlan, RowSchema, ScalarExpr};
use crate::sql::ast::{BinaryOperator, JoinType};

/// Heuristic-based query optimizer
pub struct HeuristicOptimizer<'a> {
    /// Index definitions come from here
    catalog: &'a Catalog,
}

impl<'a> HeuristicOptimizer<'a> {
    /// Create a new optimizer
    pub fn new(catalog: &'a Catalog) -> Self {
        Self { catalog }
    }

    /// Optimize a logical plan
    pub fn optimize(&self, plan: LogicalPlan) -> LogicalPlan {
        match plan {
            LogicalPlan::Filter { input, predicate } => match *input {
                LogicalPlan::Join {
                    left,
                    right,
                    join_type,
                    condition,
                    schema,
                    ..
                } => self.push_into_join(*left, *right, join_type, condition, schema, predicate),
                input => {
                    let optimized_input = self.optimize(input);

                    // Try to optimize Filter(Scan) into Filter(IndexScan)
                    let optimized_input = match optimized_input {
                        LogicalPlan::Scan { table, binding } => {
                            match self.try_optimize_index_scan(&table, &predicate) {
                                Some((index, lookup)) => LogicalPlan::IndexScan {
                                    table,
                                    binding,
                                    index,
                                    lookup,
                                },
                                None => LogicalPlan::Scan { table, binding },
                            }
                        }
                        other => other,
                    };
                    LogicalPlan::Filter {
                        input: Box::new(optimized_input),
                        predicate,
                    }
                }
            },
            LogicalPlan::Join {
                left,
                right,
                join_type,
                condition,
                schema,
                ..
            } => self.plan_join(
                self.optimize(*left),
                self.optimize(*right),
                join_type,
                condition,
                schema,
            ),
            // Other plans are returned as-is; the planner optimizes each
            // SELECT once its FROM and WHERE are bound
            other => other,
        }
    }

    /// Move conjuncts that reference one side of a join into that side
    fn push_into_join(
        &self,
        left: LogicalPlan,
        right: LogicalPlan,
        join_type: JoinType,
        condition: Option<ScalarExpr>,
        schema: RowSchema,
        predicate: ScalarExpr,
    ) -> LogicalPlan {
        let left_width = left.schema().len();
        let inner = matches!(join_type, JoinType::Inner | JoinType::Cross);
        let mut left_parts = Vec::new();
        let mut right_parts = Vec::new();
        let mut join_parts: Vec<ScalarExpr> = condition.into_iter().collect();
        let mut kept = Vec::new();

        for part in predicate.conjuncts() {
            let columns = part.columns();
            if part.contains_subquery() || columns.is_empty() {
                kept.push(part.clone());
            } else if columns.iter().all(|&c| c < left_width)
                && matches!(join_type, JoinType::Inner | JoinType::Cross | JoinType::Left)
            {
                left_parts.push(part.clone());
            } else if columns.iter().all(|&c| c >= left_width) && inner {
                right_parts.push(part.remap(&|c| c - left_width));
            } else if inner {
                join_parts.push(part.clone());
            } else {
                kept.push(part.clone());
            }
        }

        let wrap = |plan: LogicalPlan, parts: Vec<ScalarExpr>| match ScalarExpr::and_all(parts) {
            Some(predicate) => LogicalPlan::Filter {
                input: Box::new(plan),
                predicate,
            },
            None => plan,
        };
        let left = self.optimize(wrap(left, left_parts));
        let right = self.optimize(wrap(right, right_parts));
        let join_type = match join_type {
            JoinType::Cross if !join_parts.is_empty() => JoinType::Inner,
            other => other,
        };
        let join = self.plan_join(left, right, join_type, ScalarExpr::and_all(join_parts), schema);
        wrap(join, kept)
    }

    fn plan_join(
        &self,
        left: LogicalPlan,
        right: LogicalPlan,
        join_type: JoinType,
        condition: Option<ScalarExpr>,
        schema: RowSchema,
    ) -> LogicalPlan {
        let left_width = left.schema().len();
        let strategy = match &condition {
            Some(condition) if join_type != JoinType::Cross => {
                let (left_keys, right_keys) = equi_keys(condition, left_width);
                if left_keys.is_empty() {
                    JoinStrategy::NestedLoop
                } else {
                    self.index_lookup(&right, join_type, &left_keys, &right_keys)
                        .unwrap_or(JoinStrategy::Hash {
                            left_keys,
                            right_keys,
                        })
                }
            }
            _ => JoinStrategy::NestedLoop,
        };
        LogicalPlan::Join {
            left: Box::new(left),
            right: Box::new(right),
            join_type,
            condition,
            strategy,
            schema,
        }
    }

    /// Probe an index of the right table when the equi-keys cover one
    fn index_lookup(
        &self,
        right: &LogicalPlan,
        join_type: JoinType,
        left_keys: &[ScalarExpr],
        right_keys: &[ScalarExpr],
    ) -> Option<JoinStrategy> {
        if !matches!(join_type, JoinType::Inner | JoinType::Left) {
            return None;
        }
        let table = match right {
            LogicalPlan::Scan { table, .. } => table,
            LogicalPlan::Filter { input, .. } => match input.as_ref() {
                LogicalPlan::Scan { table, .. } => table,
                _ => return None,
            },
            _ => return None,
        };

        let key_for = |column: usize| {
            right_keys
                .iter()
                .position(|k| *k == ScalarExpr::Column(column))
                .map(|i| left_keys[i].clone())
        };
        self.ranked_indexes(table).into_iter().find_map(|index| {
            let keys = index
                .columns
                .iter()
                .map(|c| table.schema.get_column_index(c).and_then(key_for))
                .collect::<Option<Vec<_>>>()?;
            Some(JoinStrategy::IndexLookup {
                index: index.name.clone(),
                keys,
            })
        })
    }

    /// Unique indexes first, then wider ones
    fn ranked_indexes(&self, table: &TableDef) -> Vec<&IndexDef> {
        let mut indexes = self.catalog.table_indexes(&table.name);
        indexes.sort_by_key(|i| (!i.unique, std::cmp::Reverse(i.columns.len())));
        indexes
    }

    /// Try to narrow a scan with an index
    fn try_optimize_index_scan(
        &self,
        table: &TableDef,
        predicate: &ScalarExpr,
    ) -> Option<(String, IndexLookup)> {
        let conjuncts = predicate.conjuncts();
        let indexes = self.ranked_indexes(table);

        // Pattern: every index column = constant
        for index in &indexes {
            let keys = index
                .columns
                .iter()
                .map(|c| {
                    let column = table.schema.get_column_index(c)?;
                    conjuncts.iter().find_map(|part| equality_with(part, column))
                })
                .collect::<Option<Vec<_>>>();
            if let Some(keys) = keys {
                return Some((index.name.clone(), IndexLookup::Eq(keys)));
            }
        }

        // Pattern: column op constant on a single-column index
        for index in indexes.iter().filter(|i| i.columns.len() == 1) {
            let Some(column) = table.schema.get_column_index(&index.columns[0]) else {
                continue;
            };
            let mut lower = None;
            let mut upper = None;
            for part in &conjuncts {
                for (op, value) in range_bounds(part, column) {
                    match op {
                        BinaryOperator::Gt => lower = Some((value, false)),
                        BinaryOperator::Gte => lower = Some((value, true)),
                        BinaryOperator::Lt => upper = Some((value, false)),
                        BinaryOperator::Lte => upper = Some((value, true)),
                        _ => {}
                    }
                }
            }
            if lower.is_some() || upper.is_some() {
                return Some((index.name.clone(), IndexLookup::Range { lower, upper }));
            }
        }
        None
    }
}

fn is_constant(expr: &ScalarExpr) -> bool {
    expr.is_row_independent() && !expr.contains_subquery()
}

/// `column = constant` in either order
fn equality_with(part: &ScalarExpr, column: usize) -> Option<ScalarExpr> {
    match part {
        ScalarExpr::Binary {
            left,
            op: BinaryOperator::Eq,
            right,
        } => match (left.as_ref(), right.as_ref()) {
            (ScalarExpr::Column(c), value) | (value, ScalarExpr::Column(c))
                if *c == column && is_constant(value) =>
            {
                Some(value.clone())
            }
            _ => None,
        },
        _ => None,
    }
}

/// Range comparisons against `column`, normalized to `column op value`
fn range_bounds(part: &ScalarExpr, column: usize) -> Vec<(BinaryOperator, ScalarExpr)> {
    match part {
        ScalarExpr::Binary { left, op, right } if op.is_comparison() => {
            match (left.as_ref(), right.as_ref()) {
                (ScalarExpr::Column(c), value) if *c == column && is_constant(value) => {
                    vec![(*op, value.clone())]
                }
                (value, ScalarExpr::Column(c)) if *c == column && is_constant(value) => {
                    let flipped = match op {
                        BinaryOperator::Gt => BinaryOperator::Lt,
                        BinaryOperator::Gte => BinaryOperator::Lte,
                        BinaryOperator::Lt => BinaryOperator::Gt,
                        BinaryOperator::Lte => BinaryOperator::Gte,
                        other => *other,
                    };
                    vec![(flipped, value.clone())]
                }
                _ => Vec::new(),
            }
        }
        ScalarExpr::Between {
            expr,
            low,
            high,
            negated: false,
        } if **expr == ScalarExpr::Column(column) && is_constant(low) && is_constant(high) => vec![
            (BinaryOperator::Gte, low.as_ref().clone()),
            (BinaryOperator::Lte, high.as_ref().clone()),
        ],
        _ => Vec::new(),
    }
}

/// Conjuncts of the form `left_expr = right_expr` where each side reads
/// only its own input; right keys are rebased onto the right input
fn equi_keys(condition: &ScalarExpr, left_width: usize) -> (Vec<ScalarExpr>, Vec<ScalarExpr>) {
    let mut left_keys = Vec::new();
    let mut right_keys = Vec::new();
    for part in condition.conjuncts() {
        let ScalarExpr::Binary {
            left,
            op: BinaryOperator::Eq,
            right,
        } = part
        else {
            continue;
        };
        if part.contains_subquery() {
            continue;
        }
        let side = |e: &ScalarExpr| {
            let columns = e.columns();
            if columns.is_empty() {
                None
            } else if columns.iter().all(|&c| c < left_width) {
                Some(true)
            } else if columns.iter().all(|&c| c >= left_width) {
                Some(false)
            } else {
                None
            }
        };
        let (l, r) = match (side(left), side(right)) {
            (Some(true), Some(false)) => (left, right),
            (Some(false), Some(true)) => (right, left),
            _ => continue,
        };
        left_keys.push(l.as_ref().clone());
        right_keys.push(r.remap(&|c| c - left_width));
    }
    (left_keys, right_keys)
}
