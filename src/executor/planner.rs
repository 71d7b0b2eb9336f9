//! Query Planner for KeelDB
//!
//! This module binds a parsed query against the catalog and converts it into
//! a tree of plan stages:
//! scan -> filter -> join -> group -> window -> project -> sort -> limit.
//!
//! Column references are resolved to positions here, so unknown or
//! ambiguous names fail before any row is read and execution never looks
//! names up. References to enclosing queries become [`ScalarExpr::Outer`].

use std::str::FromStr;

use rust_decimal::Decimal;

use super::optimizer::HeuristicOptimizer;
use crate::catalog::{Catalog, DataType, TableDef};
use crate::error::{Error, Result};
use crate::sql::ast::*;
use crate::storage::tuple::{Tuple, Value};

/// Views may reference views, but not without bound
const MAX_VIEW_DEPTH: usize = 32;

const AGGREGATES: [&str; 5] = ["COUNT", "SUM", "AVG", "MIN", "MAX"];

const SCALAR_FUNCTIONS: [&str; 13] = [
    "UPPER",
    "LOWER",
    "LENGTH",
    "SUBSTR",
    "SUBSTRING",
    "TRIM",
    "ABS",
    "ROUND",
    "COALESCE",
    "NULLIF",
    "CURRENT_DATE",
    "CURRENT_TIMESTAMP",
    "NOW",
];

/// One column of an intermediate row
#[derive(Debug, Clone, PartialEq)]
pub struct OutputColumn {
    /// Name the column can be qualified with
    pub table: Option<String>,
    pub name: String,
}

impl OutputColumn {
    pub fn new(table: Option<String>, name: impl Into<String>) -> Self {
        Self {
            table,
            name: name.into(),
        }
    }

    /// Internal column that name resolution never matches
    fn hidden(name: String) -> Self {
        Self { table: None, name }
    }

    fn is_hidden(&self) -> bool {
        self.name.starts_with('#')
    }
}

/// Shape of the rows flowing out of a plan stage
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowSchema {
    pub columns: Vec<OutputColumn>,
}

impl RowSchema {
    pub fn new(columns: Vec<OutputColumn>) -> Self {
        Self { columns }
    }

    /// Columns of a table, qualified by `binding`
    pub fn for_table(binding: &str, table: &TableDef) -> Self {
        Self::named(binding, table.schema().column_names())
    }

    /// Columns with the given names, qualified by `binding`
    pub fn named<S: AsRef<str>>(binding: &str, names: impl IntoIterator<Item = S>) -> Self {
        Self::new(
            names
                .into_iter()
                .map(|n| OutputColumn::new(Some(binding.to_string()), n.as_ref()))
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Column names, for result headers
    pub fn names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Position of a column reference, `None` when absent
    pub fn resolve(&self, column: &ColumnRef) -> Result<Option<usize>> {
        let mut found = None;
        for (i, c) in self.columns.iter().enumerate() {
            if c.is_hidden() || c.name != column.column {
                continue;
            }
            if let Some(table) = &column.table {
                if c.table.as_ref() != Some(table) {
                    continue;
                }
            }
            if found.is_some() {
                return Err(Error::AmbiguousColumn(column.to_string()));
            }
            found = Some(i);
        }
        Ok(found)
    }

    /// Left columns followed by right columns
    pub fn join(&self, other: &RowSchema) -> RowSchema {
        let mut columns = self.columns.clone();
        columns.extend(other.columns.iter().cloned());
        RowSchema::new(columns)
    }

    fn prefix(&self, width: usize) -> RowSchema {
        RowSchema::new(self.columns.iter().take(width).cloned().collect())
    }
}

/// A bound expression; columns are positions in the current row
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarExpr {
    Column(usize),
    /// Column of an enclosing query's row, `depth` levels out
    Outer {
        depth: usize,
        index: usize,
    },
    Literal(Value),
    /// 1-based bound parameter
    Parameter(usize),
    Binary {
        left: Box<ScalarExpr>,
        op: BinaryOperator,
        right: Box<ScalarExpr>,
    },
    Unary {
        op: UnaryOperator,
        expr: Box<ScalarExpr>,
    },
    Function {
        name: String,
        args: Vec<ScalarExpr>,
    },
    Cast {
        expr: Box<ScalarExpr>,
        data_type: DataType,
    },
    IsNull {
        expr: Box<ScalarExpr>,
        negated: bool,
    },
    Between {
        expr: Box<ScalarExpr>,
        low: Box<ScalarExpr>,
        high: Box<ScalarExpr>,
        negated: bool,
    },
    InList {
        expr: Box<ScalarExpr>,
        list: Vec<ScalarExpr>,
        negated: bool,
    },
    InSubquery {
        expr: Box<ScalarExpr>,
        subquery: Box<Subquery>,
        negated: bool,
    },
    Quantified {
        expr: Box<ScalarExpr>,
        op: BinaryOperator,
        quantifier: Quantifier,
        subquery: Box<Subquery>,
    },
    Like {
        expr: Box<ScalarExpr>,
        pattern: Box<ScalarExpr>,
        negated: bool,
    },
    Case {
        operand: Option<Box<ScalarExpr>>,
        when_clauses: Vec<(ScalarExpr, ScalarExpr)>,
        else_clause: Option<Box<ScalarExpr>>,
    },
    ScalarSubquery(Box<Subquery>),
    Exists(Box<Subquery>),
}

impl ScalarExpr {
    /// Whether the value does not depend on the current row
    pub fn is_row_independent(&self) -> bool {
        match self {
            ScalarExpr::Column(_) => false,
            ScalarExpr::Outer { .. } | ScalarExpr::Literal(_) | ScalarExpr::Parameter(_) => true,
            ScalarExpr::Binary { left, right, .. } => {
                left.is_row_independent() && right.is_row_independent()
            }
            ScalarExpr::Unary { expr, .. } | ScalarExpr::Cast { expr, .. } => {
                expr.is_row_independent()
            }
            ScalarExpr::Function { name, args } => {
                !name.starts_with("CURRENT") && args.iter().all(ScalarExpr::is_row_independent)
            }
            _ => false,
        }
    }

    /// Whether a subquery appears anywhere inside
    pub fn contains_subquery(&self) -> bool {
        let mut found = false;
        self.visit(&mut |e| {
            found |= matches!(
                e,
                ScalarExpr::InSubquery { .. }
                    | ScalarExpr::Quantified { .. }
                    | ScalarExpr::ScalarSubquery(_)
                    | ScalarExpr::Exists(_)
            )
        });
        found
    }

    /// Current-row columns referenced, not counting subqueries
    pub fn columns(&self) -> Vec<usize> {
        let mut columns = Vec::new();
        self.visit(&mut |e| {
            if let ScalarExpr::Column(i) = e {
                columns.push(*i);
            }
        });
        columns
    }

    /// Rewrite current-row column positions
    pub fn remap(&self, map: &dyn Fn(usize) -> usize) -> ScalarExpr {
        let remap = |e: &ScalarExpr| Box::new(e.remap(map));
        match self {
            ScalarExpr::Column(i) => ScalarExpr::Column(map(*i)),
            ScalarExpr::Binary { left, op, right } => ScalarExpr::Binary {
                left: remap(left),
                op: *op,
                right: remap(right),
            },
            ScalarExpr::Unary { op, expr } => ScalarExpr::Unary {
                op: *op,
                expr: remap(expr),
            },
            ScalarExpr::Function { name, args } => ScalarExpr::Function {
                name: name.clone(),
                args: args.iter().map(|a| a.remap(map)).collect(),
            },
            ScalarExpr::Cast { expr, data_type } => ScalarExpr::Cast {
                expr: remap(expr),
                data_type: data_type.clone(),
            },
            ScalarExpr::IsNull { expr, negated } => ScalarExpr::IsNull {
                expr: remap(expr),
                negated: *negated,
            },
            ScalarExpr::Between {
                expr,
                low,
                high,
                negated,
            } => ScalarExpr::Between {
                expr: remap(expr),
                low: remap(low),
                high: remap(high),
                negated: *negated,
            },
            ScalarExpr::InList {
                expr,
                list,
                negated,
            } => ScalarExpr::InList {
                expr: remap(expr),
                list: list.iter().map(|e| e.remap(map)).collect(),
                negated: *negated,
            },
            ScalarExpr::Like {
                expr,
                pattern,
                negated,
            } => ScalarExpr::Like {
                expr: remap(expr),
                pattern: remap(pattern),
                negated: *negated,
            },
            ScalarExpr::Case {
                operand,
                when_clauses,
                else_clause,
            } => ScalarExpr::Case {
                operand: operand.as_ref().map(|o| remap(o)),
                when_clauses: when_clauses
                    .iter()
                    .map(|(w, t)| (w.remap(map), t.remap(map)))
                    .collect(),
                else_clause: else_clause.as_ref().map(|e| remap(e)),
            },
            // Callers never remap expressions holding subqueries
            other => other.clone(),
        }
    }

    fn visit(&self, f: &mut dyn FnMut(&ScalarExpr)) {
        f(self);
        match self {
            ScalarExpr::Binary { left, right, .. } => {
                left.visit(f);
                right.visit(f);
            }
            ScalarExpr::Unary { expr, .. }
            | ScalarExpr::Cast { expr, .. }
            | ScalarExpr::IsNull { expr, .. }
            | ScalarExpr::InSubquery { expr, .. }
            | ScalarExpr::Quantified { expr, .. } => expr.visit(f),
            ScalarExpr::Function { args, .. } => args.iter().for_each(|a| a.visit(f)),
            ScalarExpr::Between {
                expr, low, high, ..
            } => {
                expr.visit(f);
                low.visit(f);
                high.visit(f);
            }
            ScalarExpr::InList { expr, list, .. } => {
                expr.visit(f);
                list.iter().for_each(|e| e.visit(f));
            }
            ScalarExpr::Like { expr, pattern, .. } => {
                expr.visit(f);
                pattern.visit(f);
            }
            ScalarExpr::Case {
                operand,
                when_clauses,
                else_clause,
            } => {
                if let Some(o) = operand {
                    o.visit(f);
                }
                for (w, t) in when_clauses {
                    w.visit(f);
                    t.visit(f);
                }
                if let Some(e) = else_clause {
                    e.visit(f);
                }
            }
            _ => {}
        }
    }

    /// Split a predicate into its AND-ed conjuncts
    pub fn conjuncts(&self) -> Vec<&ScalarExpr> {
        match self {
            ScalarExpr::Binary {
                left,
                op: BinaryOperator::And,
                right,
            } => {
                let mut parts = left.conjuncts();
                parts.extend(right.conjuncts());
                parts
            }
            other => vec![other],
        }
    }

    /// AND together conjuncts
    pub fn and_all(parts: Vec<ScalarExpr>) -> Option<ScalarExpr> {
        parts.into_iter().reduce(|left, right| ScalarExpr::Binary {
            left: Box::new(left),
            op: BinaryOperator::And,
            right: Box::new(right),
        })
    }
}

/// A planned subquery
#[derive(Debug, Clone, PartialEq)]
pub struct Subquery {
    /// Unique within one statement; keys the result cache
    pub id: usize,
    pub plan: LogicalPlan,
    /// References columns of an enclosing query
    pub correlated: bool,
}

/// Aggregate function
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunction {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateFunction {
    fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "COUNT" => Some(Self::Count),
            "SUM" => Some(Self::Sum),
            "AVG" => Some(Self::Avg),
            "MIN" => Some(Self::Min),
            "MAX" => Some(Self::Max),
            _ => None,
        }
    }
}

/// One aggregate computed per group
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateCall {
    pub func: AggregateFunction,
    /// `None` for COUNT(*)
    pub arg: Option<ScalarExpr>,
    pub distinct: bool,
}

/// Window function
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowFunction {
    RowNumber,
    Rank,
    DenseRank,
    Lead,
    Lag,
    FirstValue,
    LastValue,
    Aggregate(AggregateFunction),
}

/// Sort key over already computed values
#[derive(Debug, Clone, PartialEq)]
pub struct SortSpec {
    pub expr: ScalarExpr,
    pub ascending: bool,
    pub nulls_first: bool,
}

/// One window function evaluated over its partition
#[derive(Debug, Clone, PartialEq)]
pub struct WindowCall {
    pub func: WindowFunction,
    pub args: Vec<ScalarExpr>,
    pub partition_by: Vec<ScalarExpr>,
    pub order_by: Vec<SortSpec>,
    pub frame: Option<WindowFrame>,
}

/// Sort by a column of the input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortKey {
    pub index: usize,
    pub ascending: bool,
    pub nulls_first: bool,
}

/// How an index scan finds rows
#[derive(Debug, Clone, PartialEq)]
pub enum IndexLookup {
    /// Every index column equals a value
    Eq(Vec<ScalarExpr>),
    /// Single-column range; the flag marks an inclusive bound
    Range {
        lower: Option<(ScalarExpr, bool)>,
        upper: Option<(ScalarExpr, bool)>,
    },
}

/// How a join pairs rows
#[derive(Debug, Clone, PartialEq)]
pub enum JoinStrategy {
    NestedLoop,
    /// Build a hash table on the right input's keys
    Hash {
        left_keys: Vec<ScalarExpr>,
        right_keys: Vec<ScalarExpr>,
    },
    /// Probe an index of the right table once per left row; `keys` are
    /// evaluated over the left row in index column order
    IndexLookup { index: String, keys: Vec<ScalarExpr> },
}

/// Second half of `anchor UNION [ALL] step`
#[derive(Debug, Clone, PartialEq)]
pub struct RecursiveStep {
    pub plan: LogicalPlan,
    pub union_all: bool,
}

/// A WITH entry, materialized before the main query runs
#[derive(Debug, Clone, PartialEq)]
pub struct CtePlan {
    pub id: usize,
    pub name: String,
    pub plan: LogicalPlan,
    pub recursive: Option<RecursiveStep>,
}

/// Logical plan node
#[derive(Debug, Clone, PartialEq)]
pub enum LogicalPlan {
    /// A single empty row (SELECT without FROM)
    Unit,
    /// Scan a table
    Scan { table: TableDef, binding: String },
    /// Index Scan
    IndexScan {
        table: TableDef,
        binding: String,
        index: String,
        lookup: IndexLookup,
    },
    /// Stored rows of a materialized view
    Materialized { rows: Vec<Tuple>, schema: RowSchema },
    /// View or derived table, renamed
    Derived {
        input: Box<LogicalPlan>,
        schema: RowSchema,
    },
    /// Rows of a WITH entry (or the working table of a recursive one)
    CteScan { id: usize, schema: RowSchema },
    /// Filter rows
    Filter {
        input: Box<LogicalPlan>,
        predicate: ScalarExpr,
    },
    /// Join two inputs
    Join {
        left: Box<LogicalPlan>,
        right: Box<LogicalPlan>,
        join_type: JoinType,
        condition: Option<ScalarExpr>,
        strategy: JoinStrategy,
        schema: RowSchema,
    },
    /// Group keys followed by aggregate values
    Aggregate {
        input: Box<LogicalPlan>,
        group_by: Vec<ScalarExpr>,
        aggregates: Vec<AggregateCall>,
        schema: RowSchema,
    },
    /// Input columns followed by one column per window function
    Window {
        input: Box<LogicalPlan>,
        functions: Vec<WindowCall>,
        schema: RowSchema,
    },
    /// Project columns
    Project {
        input: Box<LogicalPlan>,
        exprs: Vec<ScalarExpr>,
        schema: RowSchema,
    },
    Distinct { input: Box<LogicalPlan> },
    /// Stable sort
    Sort {
        input: Box<LogicalPlan>,
        keys: Vec<SortKey>,
    },
    /// Limit rows
    Limit {
        input: Box<LogicalPlan>,
        limit: Option<ScalarExpr>,
        offset: Option<ScalarExpr>,
    },
    /// Drop trailing sort-only columns
    Truncate { input: Box<LogicalPlan>, width: usize },
    SetOperation {
        op: SetOperator,
        all: bool,
        left: Box<LogicalPlan>,
        right: Box<LogicalPlan>,
    },
    /// Materialize WITH entries, then run the input
    With {
        ctes: Vec<CtePlan>,
        input: Box<LogicalPlan>,
    },
}

impl LogicalPlan {
    /// Shape of the rows this node produces
    pub fn schema(&self) -> RowSchema {
        match self {
            LogicalPlan::Unit => RowSchema::default(),
            LogicalPlan::Scan { table, binding } | LogicalPlan::IndexScan { table, binding, .. } => {
                RowSchema::for_table(binding, table)
            }
            LogicalPlan::Materialized { schema, .. }
            | LogicalPlan::Derived { schema, .. }
            | LogicalPlan::CteScan { schema, .. }
            | LogicalPlan::Join { schema, .. }
            | LogicalPlan::Aggregate { schema, .. }
            | LogicalPlan::Window { schema, .. }
            | LogicalPlan::Project { schema, .. } => schema.clone(),
            LogicalPlan::Filter { input, .. }
            | LogicalPlan::Distinct { input }
            | LogicalPlan::Sort { input, .. }
            | LogicalPlan::Limit { input, .. }
            | LogicalPlan::With { input, .. } => input.schema(),
            LogicalPlan::Truncate { input, width } => input.schema().prefix(*width),
            LogicalPlan::SetOperation { left, .. } => RowSchema::new(
                left.schema()
                    .columns
                    .into_iter()
                    .map(|c| OutputColumn::new(None, c.name))
                    .collect(),
            ),
        }
    }
}

/// GROUP BY context for binding expressions after aggregation
struct Grouping {
    input: RowSchema,
    keys: Vec<Expr>,
    aggregates: Vec<Expr>,
}

/// Window functions already computed into trailing columns
struct WindowBinding {
    exprs: Vec<Expr>,
    offset: usize,
}

/// What a name can bind to at one point of a query
#[derive(Clone, Copy)]
struct Scope<'s> {
    schema: &'s RowSchema,
    /// Enclosing queries' rows, outermost first
    outer: &'s [RowSchema],
    grouping: Option<&'s Grouping>,
    windows: Option<&'s WindowBinding>,
}

impl<'s> Scope<'s> {
    fn new(schema: &'s RowSchema, outer: &'s [RowSchema]) -> Self {
        Self {
            schema,
            outer,
            grouping: None,
            windows: None,
        }
    }
}

struct CteBinding {
    name: String,
    id: usize,
    names: Vec<String>,
}

/// A SELECT planned up to its projection
struct Projected {
    plan: LogicalPlan,
    width: usize,
}

/// Query planner
pub struct Planner<'a> {
    catalog: &'a Catalog,
    optimizer: HeuristicOptimizer<'a>,
    next_id: usize,
    ctes: Vec<CteBinding>,
    /// Per subquery being planned: first outer scope it owns, and whether
    /// anything inside referenced a scope below that
    subqueries: Vec<(usize, bool)>,
    view_depth: usize,
}

impl<'a> Planner<'a> {
    /// Create a new planner
    pub fn new(catalog: &'a Catalog) -> Self {
        Self {
            catalog,
            optimizer: HeuristicOptimizer::new(catalog),
            next_id: 0,
            ctes: Vec::new(),
            subqueries: Vec::new(),
            view_depth: 0,
        }
    }

    fn next_id(&mut self) -> usize {
        self.next_id += 1;
        self.next_id
    }

    /// Plan a query whose rows may reference the `outer` scopes
    pub fn plan_query(&mut self, query: &Query, outer: &[RowSchema]) -> Result<LogicalPlan> {
        let saved = self.ctes.len();
        let result = self.plan_query_inner(query, outer);
        self.ctes.truncate(saved);
        result
    }

    /// Plan the rows an UPDATE or DELETE targets
    pub fn plan_target(
        &mut self,
        table: &TableDef,
        binding: &str,
        predicate: Option<&Expr>,
    ) -> Result<LogicalPlan> {
        let scan = LogicalPlan::Scan {
            table: table.clone(),
            binding: binding.to_string(),
        };
        let plan = match predicate {
            Some(expr) => {
                let schema = scan.schema();
                let predicate = self.bind_expr(expr, Scope::new(&schema, &[]))?;
                LogicalPlan::Filter {
                    input: Box::new(scan),
                    predicate,
                }
            }
            None => scan,
        };
        Ok(self.optimizer.optimize(plan))
    }

    /// Bind an expression over a single row (assignments, CHECK, defaults)
    pub fn bind_row_expr(&mut self, expr: &Expr, schema: &RowSchema) -> Result<ScalarExpr> {
        self.bind_expr(expr, Scope::new(schema, &[]))
    }

    fn plan_query_inner(&mut self, query: &Query, outer: &[RowSchema]) -> Result<LogicalPlan> {
        let mut ctes = Vec::new();
        if let Some(with) = &query.with {
            for cte in &with.ctes {
                ctes.push(self.plan_cte(cte, with.recursive, outer)?);
            }
        }

        let (mut plan, width) = match &query.body {
            SetExpr::Select(select) => {
                let projected = self.plan_select(select, &query.order_by, outer)?;
                (projected.plan, Some(projected.width))
            }
            body => {
                let plan = self.plan_set_expr(body, outer)?;
                (self.plan_output_order(plan, &query.order_by)?, None)
            }
        };

        if query.limit.is_some() || query.offset.is_some() {
            let empty = RowSchema::default();
            let scope = Scope::new(&empty, outer);
            let limit = match &query.limit {
                Some(e) => Some(self.bind_expr(e, scope)?),
                None => None,
            };
            let offset = match &query.offset {
                Some(e) => Some(self.bind_expr(e, scope)?),
                None => None,
            };
            plan = LogicalPlan::Limit {
                input: Box::new(plan),
                limit,
                offset,
            };
        }

        if let Some(width) = width {
            if plan.schema().len() > width {
                plan = LogicalPlan::Truncate {
                    input: Box::new(plan),
                    width,
                };
            }
        }

        if !ctes.is_empty() {
            plan = LogicalPlan::With {
                ctes,
                input: Box::new(plan),
            };
        }
        Ok(plan)
    }

    fn plan_cte(&mut self, cte: &Cte, recursive: bool, outer: &[RowSchema]) -> Result<CtePlan> {
        let id = self.next_id();
        if recursive && query_references(&cte.query, &cte.name) {
            let (all, left, right) = match &cte.query.body {
                SetExpr::SetOperation {
                    op: SetOperator::Union,
                    all,
                    left,
                    right,
                } if cte.query.order_by.is_empty() && cte.query.limit.is_none() => {
                    (*all, left, right)
                }
                _ => {
                    return Err(Error::ExecutionError(format!(
                        "recursive query '{}' must have the form anchor UNION [ALL] recursive term",
                        cte.name
                    )))
                }
            };
            let anchor = self.plan_set_expr(left, outer)?;
            let names = cte_names(cte, &anchor.schema())?;
            self.ctes.push(CteBinding {
                name: cte.name.clone(),
                id,
                names: names.clone(),
            });
            let step = self.plan_set_expr(right, outer)?;
            if step.schema().len() != names.len() {
                return Err(Error::ExecutionError(format!(
                    "recursive query '{}' has {} columns in its anchor and {} in its recursive term",
                    cte.name,
                    names.len(),
                    step.schema().len()
                )));
            }
            return Ok(CtePlan {
                id,
                name: cte.name.clone(),
                plan: anchor,
                recursive: Some(RecursiveStep {
                    plan: step,
                    union_all: all,
                }),
            });
        }

        let plan = self.plan_query(&cte.query, outer)?;
        let names = cte_names(cte, &plan.schema())?;
        self.ctes.push(CteBinding {
            name: cte.name.clone(),
            id,
            names,
        });
        Ok(CtePlan {
            id,
            name: cte.name.clone(),
            plan,
            recursive: None,
        })
    }

    fn plan_set_expr(&mut self, body: &SetExpr, outer: &[RowSchema]) -> Result<LogicalPlan> {
        match body {
            SetExpr::Select(select) => {
                let projected = self.plan_select(select, &[], outer)?;
                Ok(projected.plan)
            }
            SetExpr::Query(query) => self.plan_query(query, outer),
            SetExpr::SetOperation {
                op,
                all,
                left,
                right,
            } => {
                let left = self.plan_set_expr(left, outer)?;
                let right = self.plan_set_expr(right, outer)?;
                let (lw, rw) = (left.schema().len(), right.schema().len());
                if lw != rw {
                    return Err(Error::ExecutionError(format!(
                        "each side of a set operation must have the same number of columns ({} vs {})",
                        lw, rw
                    )));
                }
                Ok(LogicalPlan::SetOperation {
                    op: *op,
                    all: *all,
                    left: Box::new(left),
                    right: Box::new(right),
                })
            }
        }
    }

    /// ORDER BY over a set operation: output names or positions only
    fn plan_output_order(&mut self, plan: LogicalPlan, order_by: &[OrderByItem]) -> Result<LogicalPlan> {
        if order_by.is_empty() {
            return Ok(plan);
        }
        let schema = plan.schema();
        let mut keys = Vec::new();
        for item in order_by {
            let index = match &item.expr {
                Expr::Literal(Literal::Integer(k)) => position(*k, schema.len())?,
                Expr::Column(c) => schema
                    .resolve(&ColumnRef::from(c.column.clone()))?
                    .ok_or_else(|| Error::ColumnNotFound(c.column.clone(), "query result".to_string()))?,
                other => {
                    return Err(Error::ExecutionError(format!(
                        "ORDER BY over a set operation must name an output column, found {}",
                        other
                    )))
                }
            };
            keys.push(sort_key(index, item));
        }
        Ok(LogicalPlan::Sort {
            input: Box::new(plan),
            keys,
        })
    }

    fn plan_select(
        &mut self,
        select: &SelectStatement,
        order_by: &[OrderByItem],
        outer: &[RowSchema],
    ) -> Result<Projected> {
        let mut plan = match &select.from {
            Some(from) => self.plan_from(from, outer)?,
            None => LogicalPlan::Unit,
        };
        let input_schema = plan.schema();

        if let Some(predicate) = &select.where_clause {
            let predicate = self.bind_expr(predicate, Scope::new(&input_schema, outer))?;
            plan = LogicalPlan::Filter {
                input: Box::new(plan),
                predicate,
            };
        }
        plan = self.optimizer.optimize(plan);

        let items = expand_items(&select.columns, &input_schema)?;

        // Aggregation
        let mut aggregates = Vec::new();
        for (expr, _) in &items {
            collect_aggregates(expr, &mut aggregates);
        }
        if let Some(having) = &select.having {
            collect_aggregates(having, &mut aggregates);
        }
        for item in order_by {
            collect_aggregates(&item.expr, &mut aggregates);
        }

        let mut schema = input_schema.clone();
        let mut grouping = None;
        if !aggregates.is_empty() || !select.group_by.is_empty() || select.having.is_some() {
            let keys = resolve_group_keys(&select.group_by, &items, &input_schema)?;
            let scope = Scope::new(&input_schema, outer);
            let group_by = keys
                .iter()
                .map(|k| self.bind_expr(k, scope))
                .collect::<Result<Vec<_>>>()?;
            let calls = aggregates
                .iter()
                .map(|a| self.bind_aggregate(a, scope))
                .collect::<Result<Vec<_>>>()?;

            let mut columns = Vec::new();
            for (i, key) in keys.iter().enumerate() {
                let named = match key {
                    Expr::Column(c) => input_schema.resolve(c)?,
                    _ => None,
                };
                match named {
                    Some(idx) => columns.push(input_schema.columns[idx].clone()),
                    None => columns.push(OutputColumn::hidden(format!("#grp{}", i))),
                }
            }
            for j in 0..calls.len() {
                columns.push(OutputColumn::hidden(format!("#agg{}", j)));
            }
            schema = RowSchema::new(columns);
            plan = LogicalPlan::Aggregate {
                input: Box::new(plan),
                group_by,
                aggregates: calls,
                schema: schema.clone(),
            };
            grouping = Some(Grouping {
                input: input_schema.clone(),
                keys,
                aggregates,
            });

            if let Some(having) = &select.having {
                let scope = Scope {
                    schema: &schema,
                    outer,
                    grouping: grouping.as_ref(),
                    windows: None,
                };
                let predicate = self.bind_expr(having, scope)?;
                plan = LogicalPlan::Filter {
                    input: Box::new(plan),
                    predicate,
                };
            }
        }

        // Window functions
        let mut windows = Vec::new();
        for (expr, _) in &items {
            collect_windows(expr, &mut windows);
        }
        for item in order_by {
            collect_windows(&item.expr, &mut windows);
        }
        let mut window_binding = None;
        if !windows.is_empty() {
            let scope = Scope {
                schema: &schema,
                outer,
                grouping: grouping.as_ref(),
                windows: None,
            };
            let functions = windows
                .iter()
                .map(|w| self.bind_window(w, scope))
                .collect::<Result<Vec<_>>>()?;
            let offset = schema.len();
            let mut columns = schema.columns.clone();
            for i in 0..functions.len() {
                columns.push(OutputColumn::hidden(format!("#win{}", i)));
            }
            let extended = RowSchema::new(columns);
            plan = LogicalPlan::Window {
                input: Box::new(plan),
                functions,
                schema: extended.clone(),
            };
            schema = extended;
            window_binding = Some(WindowBinding {
                exprs: windows,
                offset,
            });
        }

        // Projection, plus hidden columns for ORDER BY expressions
        let scope = Scope {
            schema: &schema,
            outer,
            grouping: grouping.as_ref(),
            windows: window_binding.as_ref(),
        };
        let mut exprs = Vec::with_capacity(items.len());
        let mut columns = Vec::with_capacity(items.len());
        for (expr, name) in &items {
            exprs.push(self.bind_expr(expr, scope)?);
            let table = match expr {
                Expr::Column(c) => c.table.clone(),
                _ => None,
            };
            columns.push(OutputColumn::new(table, name.clone()));
        }
        let width = exprs.len();

        let mut keys = Vec::with_capacity(order_by.len());
        for item in order_by {
            let index = match output_position(&item.expr, &columns[..width])? {
                Some(index) => index,
                None => match items.iter().position(|(e, _)| e == &item.expr) {
                    Some(index) => index,
                    None => {
                        exprs.push(self.bind_expr(&item.expr, scope)?);
                        columns.push(OutputColumn::hidden(format!("#sort{}", exprs.len())));
                        exprs.len() - 1
                    }
                },
            };
            keys.push(sort_key(index, item));
        }
        if select.distinct && exprs.len() > width {
            return Err(Error::ExecutionError(
                "for SELECT DISTINCT, ORDER BY expressions must appear in the select list".to_string(),
            ));
        }

        plan = LogicalPlan::Project {
            input: Box::new(plan),
            exprs,
            schema: RowSchema::new(columns),
        };
        if select.distinct {
            plan = LogicalPlan::Distinct {
                input: Box::new(plan),
            };
        }
        if !keys.is_empty() {
            plan = LogicalPlan::Sort {
                input: Box::new(plan),
                keys,
            };
        }
        Ok(Projected { plan, width })
    }

    fn plan_from(&mut self, from: &FromClause, outer: &[RowSchema]) -> Result<LogicalPlan> {
        let mut plan = self.plan_table_ref(&from.table, outer)?;
        for join in &from.joins {
            let right = self.plan_table_ref(&join.table, outer)?;
            let (left_schema, right_schema) = (plan.schema(), right.schema());
            let schema = left_schema.join(&right_schema);
            let condition = match &join.constraint {
                JoinConstraint::On(expr) => Some(self.bind_expr(expr, Scope::new(&schema, outer))?),
                JoinConstraint::Using(columns) => {
                    Some(using_condition(columns, &left_schema, &right_schema)?)
                }
                JoinConstraint::None => None,
            };
            plan = LogicalPlan::Join {
                left: Box::new(plan),
                right: Box::new(right),
                join_type: join.join_type,
                condition,
                strategy: JoinStrategy::NestedLoop,
                schema,
            };
        }
        Ok(plan)
    }

    fn plan_table_ref(&mut self, table_ref: &TableRef, outer: &[RowSchema]) -> Result<LogicalPlan> {
        let binding = table_ref.binding_name().to_string();
        match table_ref {
            TableRef::Named { name, .. } => {
                if let Some(cte) = self.ctes.iter().rev().find(|c| &c.name == name) {
                    return Ok(LogicalPlan::CteScan {
                        id: cte.id,
                        schema: RowSchema::named(&binding, &cte.names),
                    });
                }
                if let Some(view) = self.catalog.get_view(name) {
                    let mut schema = RowSchema::named(&binding, &view.columns);
                    if let Some(materialized) = &view.materialized {
                        return Ok(LogicalPlan::Materialized {
                            rows: materialized.rows.clone(),
                            schema,
                        });
                    }
                    if self.view_depth >= MAX_VIEW_DEPTH {
                        return Err(Error::ExecutionError(format!(
                            "view '{}' nests more than {} levels deep",
                            name, MAX_VIEW_DEPTH
                        )));
                    }
                    // Views see neither the caller's CTEs nor its rows
                    let ctes = std::mem::take(&mut self.ctes);
                    self.view_depth += 1;
                    let input = self.plan_query(&view.query, &[]);
                    self.view_depth -= 1;
                    self.ctes = ctes;
                    let input = input?;
                    if view.columns.is_empty() {
                        schema = RowSchema::named(&binding, input.schema().names());
                    }
                    if input.schema().len() != schema.len() {
                        return Err(Error::ExecutionError(format!(
                            "view '{}' no longer matches its column list",
                            name
                        )));
                    }
                    return Ok(LogicalPlan::Derived {
                        input: Box::new(input),
                        schema,
                    });
                }
                let table = self.catalog.get_table(name)?;
                Ok(LogicalPlan::Scan {
                    table: table.clone(),
                    binding,
                })
            }
            TableRef::Subquery { query, .. } => {
                let input = self.plan_query(query, outer)?;
                let schema = RowSchema::named(&binding, input.schema().names());
                Ok(LogicalPlan::Derived {
                    input: Box::new(input),
                    schema,
                })
            }
        }
    }

    fn plan_subquery(&mut self, query: &Query, scope: Scope<'_>) -> Result<Subquery> {
        let mut outer = scope.outer.to_vec();
        outer.push(scope.schema.clone());
        self.subqueries.push((outer.len(), false));
        let plan = self.plan_query(query, &outer);
        let correlated = self.subqueries.pop().map(|(_, c)| c).unwrap_or(false);
        let plan = plan?;
        Ok(Subquery {
            id: self.next_id(),
            plan,
            correlated,
        })
    }

    fn note_outer_reference(&mut self, scope_index: usize) {
        for (base, correlated) in &mut self.subqueries {
            if scope_index < *base {
                *correlated = true;
            }
        }
    }

    fn bind_column(&mut self, column: &ColumnRef, scope: Scope<'_>) -> Result<ScalarExpr> {
        if let Some(index) = scope.schema.resolve(column)? {
            return Ok(ScalarExpr::Column(index));
        }
        if let Some(grouping) = scope.grouping {
            if grouping.input.resolve(column)?.is_some() {
                return Err(Error::InvalidGrouping(column.to_string()));
            }
        }
        for (k, schema) in scope.outer.iter().enumerate().rev() {
            if let Some(index) = schema.resolve(column)? {
                self.note_outer_reference(k);
                return Ok(ScalarExpr::Outer {
                    depth: scope.outer.len() - k,
                    index,
                });
            }
        }
        Err(Error::ColumnNotFound(
            column.column.clone(),
            column.table.clone().unwrap_or_else(|| "FROM clause".to_string()),
        ))
    }

    fn bind_expr(&mut self, expr: &Expr, scope: Scope<'_>) -> Result<ScalarExpr> {
        if let Some(windows) = scope.windows {
            if let Some(i) = windows.exprs.iter().position(|w| w == expr) {
                return Ok(ScalarExpr::Column(windows.offset + i));
            }
        }
        if let Some(grouping) = scope.grouping {
            if let Some(i) = grouping.keys.iter().position(|k| k == expr) {
                return Ok(ScalarExpr::Column(i));
            }
            if is_aggregate(expr) {
                if let Some(j) = grouping.aggregates.iter().position(|a| a == expr) {
                    return Ok(ScalarExpr::Column(grouping.keys.len() + j));
                }
            }
        }

        let boxed = |planner: &mut Self, e: &Expr| planner.bind_expr(e, scope).map(Box::new);
        match expr {
            Expr::Column(c) => self.bind_column(c, scope),
            Expr::Literal(l) => Ok(ScalarExpr::Literal(literal_value(l)?)),
            Expr::Parameter(n) => Ok(ScalarExpr::Parameter(*n)),
            Expr::Wildcard => Err(Error::ParseError(
                "* is only allowed in a select list or COUNT(*)".to_string(),
            )),
            Expr::BinaryOp { left, op, right } => Ok(ScalarExpr::Binary {
                left: boxed(self, left)?,
                op: *op,
                right: boxed(self, right)?,
            }),
            Expr::UnaryOp { op, expr } => Ok(ScalarExpr::Unary {
                op: *op,
                expr: boxed(self, expr)?,
            }),
            Expr::Function {
                name,
                args,
                distinct,
            } => {
                let upper = name.to_ascii_uppercase();
                if AGGREGATES.contains(&upper.as_str()) {
                    return Err(Error::InvalidGrouping(format!(
                        "aggregate {} is not allowed here",
                        expr
                    )));
                }
                if !SCALAR_FUNCTIONS.contains(&upper.as_str()) {
                    return Err(Error::UnknownFunction(name.clone()));
                }
                if *distinct {
                    return Err(Error::ParseError(format!(
                        "DISTINCT is not allowed in {}",
                        upper
                    )));
                }
                let args = args
                    .iter()
                    .map(|a| self.bind_expr(a, scope))
                    .collect::<Result<Vec<_>>>()?;
                Ok(ScalarExpr::Function { name: upper, args })
            }
            Expr::WindowFunction { name, .. } => Err(Error::ExecutionError(format!(
                "window function {} is not allowed here",
                name
            ))),
            Expr::Cast { expr, data_type } => Ok(ScalarExpr::Cast {
                expr: boxed(self, expr)?,
                data_type: data_type.clone(),
            }),
            Expr::IsNull(e) => Ok(ScalarExpr::IsNull {
                expr: boxed(self, e)?,
                negated: false,
            }),
            Expr::IsNotNull(e) => Ok(ScalarExpr::IsNull {
                expr: boxed(self, e)?,
                negated: true,
            }),
            Expr::Between {
                expr,
                low,
                high,
                negated,
            } => Ok(ScalarExpr::Between {
                expr: boxed(self, expr)?,
                low: boxed(self, low)?,
                high: boxed(self, high)?,
                negated: *negated,
            }),
            Expr::InList {
                expr,
                list,
                negated,
            } => Ok(ScalarExpr::InList {
                expr: boxed(self, expr)?,
                list: list
                    .iter()
                    .map(|e| self.bind_expr(e, scope))
                    .collect::<Result<Vec<_>>>()?,
                negated: *negated,
            }),
            Expr::InSubquery {
                expr,
                subquery,
                negated,
            } => {
                let expr = boxed(self, expr)?;
                let subquery = self.plan_single_column(subquery, scope)?;
                Ok(ScalarExpr::InSubquery {
                    expr,
                    subquery: Box::new(subquery),
                    negated: *negated,
                })
            }
            Expr::Quantified {
                expr,
                op,
                quantifier,
                subquery,
            } => {
                let expr = boxed(self, expr)?;
                let subquery = self.plan_single_column(subquery, scope)?;
                Ok(ScalarExpr::Quantified {
                    expr,
                    op: *op,
                    quantifier: *quantifier,
                    subquery: Box::new(subquery),
                })
            }
            Expr::Like {
                expr,
                pattern,
                negated,
            } => Ok(ScalarExpr::Like {
                expr: boxed(self, expr)?,
                pattern: boxed(self, pattern)?,
                negated: *negated,
            }),
            Expr::Case {
                operand,
                when_clauses,
                else_clause,
            } => {
                let operand = match operand {
                    Some(o) => Some(boxed(self, o)?),
                    None => None,
                };
                let when_clauses = when_clauses
                    .iter()
                    .map(|(w, t)| Ok((self.bind_expr(w, scope)?, self.bind_expr(t, scope)?)))
                    .collect::<Result<Vec<_>>>()?;
                let else_clause = match else_clause {
                    Some(e) => Some(boxed(self, e)?),
                    None => None,
                };
                Ok(ScalarExpr::Case {
                    operand,
                    when_clauses,
                    else_clause,
                })
            }
            Expr::Subquery(query) => {
                let subquery = self.plan_single_column(query, scope)?;
                Ok(ScalarExpr::ScalarSubquery(Box::new(subquery)))
            }
            Expr::Exists(query) => {
                let subquery = self.plan_subquery(query, scope)?;
                Ok(ScalarExpr::Exists(Box::new(subquery)))
            }
            Expr::Nested(e) => self.bind_expr(e, scope),
        }
    }

    fn plan_single_column(&mut self, query: &Query, scope: Scope<'_>) -> Result<Subquery> {
        let subquery = self.plan_subquery(query, scope)?;
        let width = subquery.plan.schema().len();
        if width != 1 {
            return Err(Error::CardinalityViolation(format!(
                "subquery must return exactly one column, got {}",
                width
            )));
        }
        Ok(subquery)
    }

    fn bind_aggregate(&mut self, expr: &Expr, scope: Scope<'_>) -> Result<AggregateCall> {
        let (name, args, distinct) = match expr {
            Expr::Function {
                name,
                args,
                distinct,
            } => (name, args, *distinct),
            other => return Err(Error::Internal(format!("{} is not an aggregate", other))),
        };
        let func = AggregateFunction::from_name(name)
            .ok_or_else(|| Error::UnknownFunction(name.clone()))?;
        let arg = match args.as_slice() {
            [] | [Expr::Wildcard] if func == AggregateFunction::Count && !distinct => None,
            [arg] if *arg != Expr::Wildcard => Some(self.bind_expr(arg, scope)?),
            _ => {
                return Err(Error::ParseError(format!(
                    "{} takes exactly one argument",
                    name.to_ascii_uppercase()
                )))
            }
        };
        Ok(AggregateCall {
            func,
            arg,
            distinct,
        })
    }

    fn bind_window(&mut self, expr: &Expr, scope: Scope<'_>) -> Result<WindowCall> {
        let (name, args, spec) = match expr {
            Expr::WindowFunction { name, args, spec } => (name, args, spec),
            other => return Err(Error::Internal(format!("{} is not a window function", other))),
        };
        let upper = name.to_ascii_uppercase();
        let func = match upper.as_str() {
            "ROW_NUMBER" => WindowFunction::RowNumber,
            "RANK" => WindowFunction::Rank,
            "DENSE_RANK" => WindowFunction::DenseRank,
            "LEAD" => WindowFunction::Lead,
            "LAG" => WindowFunction::Lag,
            "FIRST_VALUE" => WindowFunction::FirstValue,
            "LAST_VALUE" => WindowFunction::LastValue,
            other => match AggregateFunction::from_name(other) {
                Some(agg) => WindowFunction::Aggregate(agg),
                None => return Err(Error::UnknownFunction(name.clone())),
            },
        };

        let arg_exprs: Vec<&Expr> = args.iter().filter(|a| **a != Expr::Wildcard).collect();
        let arity_ok = match func {
            WindowFunction::RowNumber | WindowFunction::Rank | WindowFunction::DenseRank => {
                arg_exprs.is_empty()
            }
            WindowFunction::Lead | WindowFunction::Lag => (1..=3).contains(&arg_exprs.len()),
            WindowFunction::FirstValue | WindowFunction::LastValue => arg_exprs.len() == 1,
            WindowFunction::Aggregate(AggregateFunction::Count) => arg_exprs.len() <= 1,
            WindowFunction::Aggregate(_) => arg_exprs.len() == 1,
        };
        if !arity_ok {
            return Err(Error::ParseError(format!(
                "wrong number of arguments to {}",
                upper
            )));
        }

        let args = arg_exprs
            .into_iter()
            .map(|a| self.bind_expr(a, scope))
            .collect::<Result<Vec<_>>>()?;
        let partition_by = spec
            .partition_by
            .iter()
            .map(|e| self.bind_expr(e, scope))
            .collect::<Result<Vec<_>>>()?;
        let order_by = spec
            .order_by
            .iter()
            .map(|item| {
                Ok(SortSpec {
                    expr: self.bind_expr(&item.expr, scope)?,
                    ascending: item.ascending,
                    nulls_first: item.nulls_first.unwrap_or(item.ascending),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(WindowCall {
            func,
            args,
            partition_by,
            order_by,
            frame: spec.frame,
        })
    }
}

fn literal_value(literal: &Literal) -> Result<Value> {
    Ok(match literal {
        Literal::Null => Value::Null,
        Literal::Boolean(b) => Value::Boolean(*b),
        Literal::Integer(i) => Value::Integer(*i),
        Literal::Float(f) => Value::Float(*f),
        Literal::String(s) => Value::String(s.clone()),
        Literal::Decimal(s) => Value::Decimal(
            Decimal::from_str(s)
                .or_else(|_| Decimal::from_scientific(s))
                .map_err(|_| Error::NumericOverflow)?,
        ),
    })
}

fn is_aggregate(expr: &Expr) -> bool {
    matches!(expr, Expr::Function { name, .. } if AGGREGATES.contains(&name.to_ascii_uppercase().as_str()))
}

fn collect_aggregates(expr: &Expr, out: &mut Vec<Expr>) {
    expr.walk(&mut |e| {
        if is_aggregate(e) && !out.contains(e) {
            out.push(e.clone());
        }
    });
}

fn collect_windows(expr: &Expr, out: &mut Vec<Expr>) {
    expr.walk(&mut |e| {
        if matches!(e, Expr::WindowFunction { .. }) && !out.contains(e) {
            out.push(e.clone());
        }
    });
}

/// Select list with wildcards expanded, paired with output names
fn expand_items(items: &[SelectItem], input: &RowSchema) -> Result<Vec<(Expr, String)>> {
    let mut expanded = Vec::new();
    let column_expr = |c: &OutputColumn| {
        Expr::Column(ColumnRef {
            table: c.table.clone(),
            column: c.name.clone(),
        })
    };
    for item in items {
        match item {
            SelectItem::Wildcard => {
                for c in input.columns.iter().filter(|c| !c.is_hidden()) {
                    expanded.push((column_expr(c), c.name.clone()));
                }
            }
            SelectItem::QualifiedWildcard(table) => {
                let before = expanded.len();
                for c in input
                    .columns
                    .iter()
                    .filter(|c| !c.is_hidden() && c.table.as_ref() == Some(table))
                {
                    expanded.push((column_expr(c), c.name.clone()));
                }
                if expanded.len() == before {
                    return Err(Error::TableNotFound(table.clone()));
                }
            }
            SelectItem::Expr { expr, alias } => {
                let name = match (alias, expr) {
                    (Some(alias), _) => alias.clone(),
                    (None, Expr::Column(c)) => c.column.clone(),
                    (None, other) => other.to_string(),
                };
                expanded.push((expr.clone(), name));
            }
        }
    }
    Ok(expanded)
}

/// GROUP BY items, with positions and output aliases replaced by select expressions
fn resolve_group_keys(
    group_by: &[Expr],
    items: &[(Expr, String)],
    input: &RowSchema,
) -> Result<Vec<Expr>> {
    let mut keys = Vec::with_capacity(group_by.len());
    for key in group_by {
        let resolved = match key {
            Expr::Literal(Literal::Integer(k)) => items[position(*k, items.len())?].0.clone(),
            Expr::Column(c) if c.table.is_none() && input.resolve(c)?.is_none() => {
                match items.iter().find(|(_, name)| name == &c.column) {
                    Some((expr, _)) => expr.clone(),
                    None => key.clone(),
                }
            }
            _ => key.clone(),
        };
        keys.push(resolved);
    }
    Ok(keys)
}

/// ORDER BY item that names an output column directly
fn output_position(expr: &Expr, outputs: &[OutputColumn]) -> Result<Option<usize>> {
    match expr {
        Expr::Literal(Literal::Integer(k)) => position(*k, outputs.len()).map(Some),
        Expr::Column(ColumnRef { table: None, column }) => {
            let mut matches = outputs.iter().enumerate().filter(|(_, c)| &c.name == column);
            match (matches.next(), matches.next()) {
                (Some((i, _)), None) => Ok(Some(i)),
                _ => Ok(None),
            }
        }
        _ => Ok(None),
    }
}

/// 1-based select list position
fn position(k: i64, len: usize) -> Result<usize> {
    if k >= 1 && (k as usize) <= len {
        Ok(k as usize - 1)
    } else {
        Err(Error::ExecutionError(format!(
            "position {} is not in the select list",
            k
        )))
    }
}

fn sort_key(index: usize, item: &OrderByItem) -> SortKey {
    SortKey {
        index,
        ascending: item.ascending,
        nulls_first: item.nulls_first.unwrap_or(item.ascending),
    }
}

fn using_condition(columns: &[String], left: &RowSchema, right: &RowSchema) -> Result<ScalarExpr> {
    let mut parts = Vec::with_capacity(columns.len());
    for name in columns {
        let column = ColumnRef::from(name.clone());
        let l = left
            .resolve(&column)?
            .ok_or_else(|| Error::ColumnNotFound(name.clone(), "left side of join".to_string()))?;
        let r = right
            .resolve(&column)?
            .ok_or_else(|| Error::ColumnNotFound(name.clone(), "right side of join".to_string()))?;
        parts.push(ScalarExpr::Binary {
            left: Box::new(ScalarExpr::Column(l)),
            op: BinaryOperator::Eq,
            right: Box::new(ScalarExpr::Column(left.len() + r)),
        });
    }
    ScalarExpr::and_all(parts).ok_or_else(|| Error::ParseError("USING needs at least one column".to_string()))
}

fn cte_names(cte: &Cte, schema: &RowSchema) -> Result<Vec<String>> {
    if cte.columns.is_empty() {
        return Ok(schema.names());
    }
    if cte.columns.len() != schema.len() {
        return Err(Error::ExecutionError(format!(
            "WITH query '{}' has {} columns but {} names were given",
            cte.name,
            schema.len(),
            cte.columns.len()
        )));
    }
    Ok(cte.columns.clone())
}

/// Whether `name` is read anywhere in the query
fn query_references(query: &Query, name: &str) -> bool {
    if let Some(with) = &query.with {
        if with.ctes.iter().any(|c| query_references(&c.query, name)) {
            return true;
        }
    }
    set_expr_references(&query.body, name)
}

fn set_expr_references(body: &SetExpr, name: &str) -> bool {
    match body {
        SetExpr::Select(select) => select_references(select, name),
        SetExpr::Query(query) => query_references(query, name),
        SetExpr::SetOperation { left, right, .. } => {
            set_expr_references(left, name) || set_expr_references(right, name)
        }
    }
}

fn select_references(select: &SelectStatement, name: &str) -> bool {
    let table_ref_hits = |t: &TableRef| match t {
        TableRef::Named { name: n, .. } => n == name,
        TableRef::Subquery { query, .. } => query_references(query, name),
    };
    if let Some(from) = &select.from {
        if table_ref_hits(&from.table) || from.joins.iter().any(|j| table_ref_hits(&j.table)) {
            return true;
        }
    }
    let mut exprs: Vec<&Expr> = Vec::new();
    for item in &select.columns {
        if let SelectItem::Expr { expr, .. } = item {
            exprs.push(expr);
        }
    }
    exprs.extend(select.where_clause.iter());
    exprs.extend(select.having.iter());
    let mut found = false;
    for expr in exprs {
        expr.walk(&mut |e| match e {
            Expr::Subquery(q) | Expr::Exists(q) => found |= query_references(q, name),
            Expr::InSubquery { subquery, .. } | Expr::Quantified { subquery, .. } => {
                found |= query_references(subquery, name)
            }
            _ => {}
        });
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::parse_sql;
    use crate::sql::ast::Statement;

    fn catalog() -> Catalog {
        let mut catalog = Catalog::new();
        let mut id = 0;
        for sql in [
            "CREATE TABLE authors (id INT PRIMARY KEY, name VARCHAR(50) NOT NULL)",
            "CREATE TABLE books (id INT PRIMARY KEY, title TEXT, price DECIMAL(10,2), \
             author_id INT REFERENCES authors(id))",
        ] {
            id += 1;
            match parse_sql(sql).unwrap().remove(0) {
                Statement::CreateTable(stmt) => {
                    catalog.define_table(id, &stmt).unwrap();
                }
                other => panic!("unexpected {:?}", other),
            }
        }
        catalog
    }

    fn plan(catalog: &Catalog, sql: &str) -> Result<LogicalPlan> {
        match parse_sql(sql)?.remove(0) {
            Statement::Query(query) => Planner::new(catalog).plan_query(&query, &[]),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_output_names() {
        let catalog = catalog();
        let plan = plan(
            &catalog,
            "SELECT a.name, COUNT(*) AS books FROM authors a LEFT JOIN books b ON b.author_id = a.id \
             GROUP BY a.name ORDER BY books DESC",
        )
        .unwrap();
        assert_eq!(plan.schema().names(), vec!["name", "books"]);
    }

    #[test]
    fn test_unknown_and_ambiguous_columns() {
        let catalog = catalog();
        assert!(matches!(
            plan(&catalog, "SELECT nope FROM authors"),
            Err(Error::ColumnNotFound(..))
        ));
        assert!(matches!(
            plan(&catalog, "SELECT id FROM authors, books"),
            Err(Error::AmbiguousColumn(_))
        ));
        assert!(matches!(
            plan(&catalog, "SELECT * FROM missing"),
            Err(Error::TableNotFound(_))
        ));
    }

    #[test]
    fn test_invalid_grouping() {
        let catalog = catalog();
        assert!(matches!(
            plan(&catalog, "SELECT title, COUNT(*) FROM books"),
            Err(Error::InvalidGrouping(_))
        ));
        assert!(matches!(
            plan(&catalog, "SELECT title FROM books GROUP BY author_id"),
            Err(Error::InvalidGrouping(_))
        ));
        assert!(plan(&catalog, "SELECT author_id, AVG(price) FROM books GROUP BY 1").is_ok());
        assert!(matches!(
            plan(&catalog, "SELECT * FROM books WHERE COUNT(*) > 1"),
            Err(Error::InvalidGrouping(_))
        ));
    }

    #[test]
    fn test_correlation_detected() {
        let catalog = catalog();
        let plan = plan(
            &catalog,
            "SELECT name FROM authors a WHERE EXISTS (SELECT 1 FROM books b WHERE b.author_id = a.id) \
             AND id IN (SELECT author_id FROM books)",
        )
        .unwrap();

        let mut flags = Vec::new();
        fn walk(plan: &LogicalPlan, flags: &mut Vec<bool>) {
            match plan {
                LogicalPlan::Filter { input, predicate } => {
                    predicate.visit(&mut |e| match e {
                        ScalarExpr::Exists(s) | ScalarExpr::InSubquery { subquery: s, .. } => {
                            flags.push(s.correlated)
                        }
                        _ => {}
                    });
                    walk(input, flags);
                }
                LogicalPlan::Project { input, .. } => walk(input, flags),
                _ => {}
            }
        }
        walk(&plan, &mut flags);
        assert_eq!(flags, vec![true, false]);
    }

    #[test]
    fn test_hidden_sort_columns_truncated() {
        let catalog = catalog();
        let plan = plan(&catalog, "SELECT title FROM books ORDER BY price DESC LIMIT 3").unwrap();
        assert!(matches!(plan, LogicalPlan::Truncate { width: 1, .. }));
        assert_eq!(plan.schema().names(), vec!["title"]);
    }

    #[test]
    fn test_subquery_width_checked() {
        let catalog = catalog();
        assert!(matches!(
            plan(&catalog, "SELECT (SELECT id, name FROM authors) FROM books"),
            Err(Error::CardinalityViolation(_))
        ));
    }
}
