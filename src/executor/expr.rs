//! Expression evaluation
//!
//! Expressions are evaluated against the current row plus a chain of
//! enclosing rows for correlated subqueries. Logic is three-valued: NULL
//! stands for unknown and propagates through comparisons and arithmetic.

use std::cmp::Ordering;
use std::rc::Rc;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

use super::executor::ExecutionEngine;
use super::planner::{ScalarExpr, Subquery};
use crate::error::{Error, Result};
use crate::sql::ast::{BinaryOperator, Quantifier, UnaryOperator};
use crate::storage::tuple::{Tuple, Value};

/// An enclosing query's current row
#[derive(Clone, Copy)]
pub struct RowScope<'r> {
    pub row: &'r [Value],
    pub parent: Option<&'r RowScope<'r>>,
}

impl<'r> RowScope<'r> {
    /// Row `depth` levels out; 1 is this scope
    fn at(&self, depth: usize) -> Option<&'r [Value]> {
        let mut scope = self;
        for _ in 1..depth {
            scope = scope.parent?;
        }
        Some(scope.row)
    }
}

/// SQL truth value of a boolean expression result
pub fn truth(value: &Value) -> Result<Option<bool>> {
    match value {
        Value::Null => Ok(None),
        Value::Boolean(b) => Ok(Some(*b)),
        other => Err(Error::TypeMismatch {
            from: other.type_name().to_string(),
            to: "BOOLEAN".to_string(),
        }),
    }
}

fn from_truth(value: Option<bool>) -> Value {
    value.map(Value::Boolean).unwrap_or(Value::Null)
}

/// Compare two values with a comparison operator
pub fn compare_values(left: &Value, op: BinaryOperator, right: &Value) -> Result<Value> {
    if left.is_null() || right.is_null() {
        return Ok(Value::Null);
    }
    let ordering = left.compare(right).ok_or_else(|| Error::TypeMismatch {
        from: left.type_name().to_string(),
        to: right.type_name().to_string(),
    })?;
    let result = match op {
        BinaryOperator::Eq => ordering == Ordering::Equal,
        BinaryOperator::Neq => ordering != Ordering::Equal,
        BinaryOperator::Lt => ordering == Ordering::Less,
        BinaryOperator::Gt => ordering == Ordering::Greater,
        BinaryOperator::Lte => ordering != Ordering::Greater,
        BinaryOperator::Gte => ordering != Ordering::Less,
        other => {
            return Err(Error::Internal(format!("{:?} is not a comparison", other)));
        }
    };
    Ok(Value::Boolean(result))
}

/// `%` matches any run of characters, `_` exactly one
pub fn like_match(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();
    let (mut t, mut p) = (0, 0);
    // Backtrack point: pattern position after the last %, text position it matched up to
    let mut star: Option<(usize, usize)> = None;
    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '_' || pattern[p] == text[t]) {
            t += 1;
            p += 1;
        } else if p < pattern.len() && pattern[p] == '%' {
            p += 1;
            star = Some((p, t));
        } else if let Some((sp, st)) = star {
            p = sp;
            t = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    pattern[p..].iter().all(|&c| c == '%')
}

fn string_arg<'v>(name: &str, value: &'v Value) -> Result<&'v str> {
    value.as_string().ok_or_else(|| Error::TypeMismatch {
        from: value.type_name().to_string(),
        to: format!("text argument of {}", name),
    })
}

fn integer_arg(name: &str, value: &Value) -> Result<i64> {
    value.as_i64().ok_or_else(|| Error::TypeMismatch {
        from: value.type_name().to_string(),
        to: format!("integer argument of {}", name),
    })
}

fn arity(name: &str, args: &[ScalarExpr], min: usize, max: usize) -> Result<()> {
    if args.len() < min || args.len() > max {
        return Err(Error::ExecutionError(format!(
            "wrong number of arguments to {}: {}",
            name,
            args.len()
        )));
    }
    Ok(())
}

impl<'a> ExecutionEngine<'a> {
    /// Evaluate an expression over `row`
    pub(crate) fn eval(
        &mut self,
        expr: &ScalarExpr,
        row: &[Value],
        outer: Option<&RowScope<'_>>,
    ) -> Result<Value> {
        match expr {
            ScalarExpr::Column(i) => row
                .get(*i)
                .cloned()
                .ok_or_else(|| Error::Internal(format!("column {} out of bounds", i))),
            ScalarExpr::Outer { depth, index } => outer
                .and_then(|scope| scope.at(*depth))
                .and_then(|row| row.get(*index))
                .cloned()
                .ok_or_else(|| Error::Internal(format!("outer column {}:{} unbound", depth, index))),
            ScalarExpr::Literal(value) => Ok(value.clone()),
            ScalarExpr::Parameter(n) => self
                .params
                .get(n.wrapping_sub(1))
                .cloned()
                .ok_or(Error::MissingParameter(*n)),
            ScalarExpr::Binary { left, op, right } => self.eval_binary(left, *op, right, row, outer),
            ScalarExpr::Unary { op, expr } => {
                let value = self.eval(expr, row, outer)?;
                match op {
                    UnaryOperator::Not => Ok(from_truth(truth(&value)?.map(|b| !b))),
                    UnaryOperator::Minus => value.neg(),
                    UnaryOperator::Plus => Ok(value),
                }
            }
            ScalarExpr::Function { name, args } => self.eval_function(name, args, row, outer),
            ScalarExpr::Cast { expr, data_type } => self.eval(expr, row, outer)?.cast(data_type, true),
            ScalarExpr::IsNull { expr, negated } => {
                let value = self.eval(expr, row, outer)?;
                Ok(Value::Boolean(value.is_null() != *negated))
            }
            ScalarExpr::Between {
                expr,
                low,
                high,
                negated,
            } => {
                let value = self.eval(expr, row, outer)?;
                let low = self.eval(low, row, outer)?;
                let high = self.eval(high, row, outer)?;
                let above = truth(&compare_values(&value, BinaryOperator::Gte, &low)?)?;
                let below = truth(&compare_values(&value, BinaryOperator::Lte, &high)?)?;
                let within = and3(above, below);
                Ok(from_truth(if *negated { within.map(|b| !b) } else { within }))
            }
            ScalarExpr::InList {
                expr,
                list,
                negated,
            } => {
                let value = self.eval(expr, row, outer)?;
                let mut candidates = Vec::with_capacity(list.len());
                for item in list {
                    candidates.push(self.eval(item, row, outer)?);
                }
                let found = membership(&value, candidates.iter())?;
                Ok(from_truth(if *negated { found.map(|b| !b) } else { found }))
            }
            ScalarExpr::InSubquery {
                expr,
                subquery,
                negated,
            } => {
                let value = self.eval(expr, row, outer)?;
                let rows = self.subquery_rows(subquery, row, outer, None)?;
                let found = membership(&value, rows.iter().filter_map(|r| r.get(0)))?;
                Ok(from_truth(if *negated { found.map(|b| !b) } else { found }))
            }
            ScalarExpr::Quantified {
                expr,
                op,
                quantifier,
                subquery,
            } => {
                let value = self.eval(expr, row, outer)?;
                let rows = self.subquery_rows(subquery, row, outer, None)?;
                let mut saw_null = false;
                for candidate in rows.iter().filter_map(|r| r.get(0)) {
                    match (truth(&compare_values(&value, *op, candidate)?)?, quantifier) {
                        (Some(true), Quantifier::Any) => return Ok(Value::Boolean(true)),
                        (Some(false), Quantifier::All) => return Ok(Value::Boolean(false)),
                        (None, _) => saw_null = true,
                        _ => {}
                    }
                }
                if saw_null {
                    Ok(Value::Null)
                } else {
                    Ok(Value::Boolean(*quantifier == Quantifier::All))
                }
            }
            ScalarExpr::Like {
                expr,
                pattern,
                negated,
            } => {
                let value = self.eval(expr, row, outer)?;
                let pattern = self.eval(pattern, row, outer)?;
                if value.is_null() || pattern.is_null() {
                    return Ok(Value::Null);
                }
                let matched = like_match(string_arg("LIKE", &value)?, string_arg("LIKE", &pattern)?);
                Ok(Value::Boolean(matched != *negated))
            }
            ScalarExpr::Case {
                operand,
                when_clauses,
                else_clause,
            } => {
                let operand = match operand {
                    Some(o) => Some(self.eval(o, row, outer)?),
                    None => None,
                };
                for (when, then) in when_clauses {
                    let condition = self.eval(when, row, outer)?;
                    let hit = match &operand {
                        Some(o) => o.sql_eq(&condition)? == Some(true),
                        None => truth(&condition)? == Some(true),
                    };
                    if hit {
                        return self.eval(then, row, outer);
                    }
                }
                match else_clause {
                    Some(e) => self.eval(e, row, outer),
                    None => Ok(Value::Null),
                }
            }
            ScalarExpr::ScalarSubquery(subquery) => {
                let rows = self.subquery_rows(subquery, row, outer, Some(2))?;
                match rows.len() {
                    0 => Ok(Value::Null),
                    1 => Ok(rows[0].get(0).cloned().unwrap_or(Value::Null)),
                    _ => Err(Error::CardinalityViolation(
                        "more than one row returned by a subquery used as an expression".to_string(),
                    )),
                }
            }
            ScalarExpr::Exists(subquery) => {
                let rows = self.subquery_rows(subquery, row, outer, Some(1))?;
                Ok(Value::Boolean(!rows.is_empty()))
            }
        }
    }

    /// Evaluate a predicate; NULL counts as false
    pub(crate) fn eval_predicate(
        &mut self,
        expr: &ScalarExpr,
        row: &[Value],
        outer: Option<&RowScope<'_>>,
    ) -> Result<bool> {
        Ok(truth(&self.eval(expr, row, outer)?)? == Some(true))
    }

    fn eval_binary(
        &mut self,
        left: &ScalarExpr,
        op: BinaryOperator,
        right: &ScalarExpr,
        row: &[Value],
        outer: Option<&RowScope<'_>>,
    ) -> Result<Value> {
        match op {
            BinaryOperator::And => {
                let l = truth(&self.eval(left, row, outer)?)?;
                if l == Some(false) {
                    return Ok(Value::Boolean(false));
                }
                let r = truth(&self.eval(right, row, outer)?)?;
                Ok(from_truth(and3(l, r)))
            }
            BinaryOperator::Or => {
                let l = truth(&self.eval(left, row, outer)?)?;
                if l == Some(true) {
                    return Ok(Value::Boolean(true));
                }
                let r = truth(&self.eval(right, row, outer)?)?;
                Ok(from_truth(match (l, r) {
                    (_, Some(true)) => Some(true),
                    (Some(false), Some(false)) => Some(false),
                    _ => None,
                }))
            }
            _ => {
                let l = self.eval(left, row, outer)?;
                let r = self.eval(right, row, outer)?;
                match op {
                    BinaryOperator::Add => l.add(&r),
                    BinaryOperator::Sub => l.sub(&r),
                    BinaryOperator::Mul => l.mul(&r),
                    BinaryOperator::Div => l.div(&r),
                    BinaryOperator::Mod => l.rem(&r),
                    BinaryOperator::Concat => {
                        if l.is_null() || r.is_null() {
                            return Ok(Value::Null);
                        }
                        let text = |v: &Value| match v {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        };
                        Ok(Value::String(text(&l) + &text(&r)))
                    }
                    comparison => compare_values(&l, comparison, &r),
                }
            }
        }
    }

    fn eval_function(
        &mut self,
        name: &str,
        args: &[ScalarExpr],
        row: &[Value],
        outer: Option<&RowScope<'_>>,
    ) -> Result<Value> {
        // COALESCE evaluates lazily
        if name == "COALESCE" {
            arity(name, args, 1, usize::MAX)?;
            for arg in args {
                let value = self.eval(arg, row, outer)?;
                if !value.is_null() {
                    return Ok(value);
                }
            }
            return Ok(Value::Null);
        }

        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval(arg, row, outer)?);
        }
        let propagates_null = !matches!(name, "NULLIF" | "CURRENT_DATE" | "CURRENT_TIMESTAMP" | "NOW");
        if propagates_null && values.iter().any(Value::is_null) {
            return Ok(Value::Null);
        }

        match name {
            "UPPER" | "LOWER" => {
                arity(name, args, 1, 1)?;
                let s = string_arg(name, &values[0])?;
                Ok(Value::String(if name == "UPPER" {
                    s.to_uppercase()
                } else {
                    s.to_lowercase()
                }))
            }
            "LENGTH" => {
                arity(name, args, 1, 1)?;
                Ok(Value::Integer(string_arg(name, &values[0])?.chars().count() as i64))
            }
            "TRIM" => {
                arity(name, args, 1, 1)?;
                Ok(Value::String(string_arg(name, &values[0])?.trim().to_string()))
            }
            "SUBSTR" | "SUBSTRING" => {
                arity(name, args, 2, 3)?;
                let s: Vec<char> = string_arg(name, &values[0])?.chars().collect();
                let start = integer_arg(name, &values[1])?;
                let end = match values.get(2) {
                    Some(len) => {
                        let len = integer_arg(name, len)?;
                        if len < 0 {
                            return Err(Error::ExecutionError(
                                "negative substring length not allowed".to_string(),
                            ));
                        }
                        start.saturating_add(len)
                    }
                    None => i64::MAX,
                };
                let from = start.max(1) as usize - 1;
                let to = (end.max(1) as usize - 1).min(s.len());
                Ok(Value::String(if from < to {
                    s[from..to].iter().collect()
                } else {
                    String::new()
                }))
            }
            "ABS" => {
                arity(name, args, 1, 1)?;
                match &values[0] {
                    Value::Integer(i) => i.checked_abs().map(Value::Integer).ok_or(Error::NumericOverflow),
                    Value::Decimal(d) => Ok(Value::Decimal(d.abs())),
                    Value::Float(f) => Ok(Value::Float(f.abs())),
                    other => Err(Error::TypeMismatch {
                        from: other.type_name().to_string(),
                        to: "numeric".to_string(),
                    }),
                }
            }
            "ROUND" => {
                arity(name, args, 1, 2)?;
                let places = match values.get(1) {
                    Some(p) => integer_arg(name, p)?,
                    None => 0,
                };
                let places = u32::try_from(places).map_err(|_| {
                    Error::ExecutionError("ROUND precision must not be negative".to_string())
                })?;
                match &values[0] {
                    Value::Integer(i) => Ok(Value::Integer(*i)),
                    Value::Decimal(d) => Ok(Value::Decimal(
                        d.round_dp_with_strategy(places, RoundingStrategy::MidpointAwayFromZero),
                    )),
                    Value::Float(f) => {
                        let rounded = Decimal::from_f64_retain(*f)
                            .map(|d| {
                                d.round_dp_with_strategy(places, RoundingStrategy::MidpointAwayFromZero)
                            })
                            .and_then(|d| d.to_f64())
                            .unwrap_or(*f);
                        Ok(Value::Float(rounded))
                    }
                    other => Err(Error::TypeMismatch {
                        from: other.type_name().to_string(),
                        to: "numeric".to_string(),
                    }),
                }
            }
            "NULLIF" => {
                arity(name, args, 2, 2)?;
                if values[0].sql_eq(&values[1])? == Some(true) {
                    Ok(Value::Null)
                } else {
                    Ok(values[0].clone())
                }
            }
            "CURRENT_DATE" => {
                arity(name, args, 0, 0)?;
                Ok(Value::Date(self.now.date()))
            }
            "CURRENT_TIMESTAMP" | "NOW" => {
                arity(name, args, 0, 0)?;
                Ok(Value::Timestamp(self.now))
            }
            other => Err(Error::UnknownFunction(other.to_string())),
        }
    }

    /// Rows of a subquery for the current row; uncorrelated results are
    /// computed once per statement
    fn subquery_rows(
        &mut self,
        subquery: &Subquery,
        row: &[Value],
        outer: Option<&RowScope<'_>>,
        hint: Option<usize>,
    ) -> Result<Rc<Vec<Tuple>>> {
        if !subquery.correlated {
            if let Some(rows) = self.subquery_cache.get(&subquery.id) {
                return Ok(Rc::clone(rows));
            }
        }
        let scope = RowScope { row, parent: outer };
        let rows = Rc::new(self.execute_plan(&subquery.plan, Some(&scope), hint)?);
        if !subquery.correlated {
            self.subquery_cache.insert(subquery.id, Rc::clone(&rows));
        }
        Ok(rows)
    }
}

fn and3(l: Option<bool>, r: Option<bool>) -> Option<bool> {
    match (l, r) {
        (Some(false), _) | (_, Some(false)) => Some(false),
        (Some(true), Some(true)) => Some(true),
        _ => None,
    }
}

/// `value IN candidates` under three-valued logic
fn membership<'v>(value: &Value, candidates: impl Iterator<Item = &'v Value>) -> Result<Option<bool>> {
    let mut saw_null = value.is_null();
    let mut any = false;
    for candidate in candidates {
        any = true;
        match value.sql_eq(candidate)? {
            Some(true) => return Ok(Some(true)),
            Some(false) => {}
            None => saw_null = true,
        }
    }
    if !any {
        return Ok(Some(false));
    }
    Ok(if saw_null { None } else { Some(false) })
}
