//! Aggregate accumulators
//!
//! One [`Accumulator`] per aggregate per group. NULL inputs are skipped by
//! every function except COUNT(*).

use std::cmp::Ordering;
use std::collections::HashSet;

use indexmap::IndexMap;
use rust_decimal::{Decimal, RoundingStrategy};

use super::executor::ExecutionEngine;
use super::expr::RowScope;
use super::planner::{AggregateCall, AggregateFunction, LogicalPlan, ScalarExpr};
use crate::error::{Error, Result};
use crate::storage::tuple::{Tuple, Value};

/// Digits kept when AVG does not divide evenly
const AVG_SCALE: u32 = 16;

/// Running state of one aggregate
#[derive(Debug, Clone)]
pub struct Accumulator {
    func: AggregateFunction,
    distinct: bool,
    seen: HashSet<Value>,
    count: i64,
    sum: Option<Value>,
    best: Option<Value>,
}

impl Accumulator {
    pub fn new(func: AggregateFunction, distinct: bool) -> Self {
        Self {
            func,
            distinct,
            seen: HashSet::new(),
            count: 0,
            sum: None,
            best: None,
        }
    }

    /// Feed one input; `None` is a COUNT(*) row
    pub fn update(&mut self, input: Option<&Value>) -> Result<()> {
        let Some(value) = input else {
            self.count += 1;
            return Ok(());
        };
        if value.is_null() {
            return Ok(());
        }
        if self.distinct && !self.seen.insert(value.clone()) {
            return Ok(());
        }
        self.count += 1;
        match self.func {
            AggregateFunction::Count => {}
            AggregateFunction::Sum | AggregateFunction::Avg => {
                if !matches!(value, Value::Integer(_) | Value::Decimal(_) | Value::Float(_)) {
                    return Err(Error::TypeMismatch {
                        from: value.type_name().to_string(),
                        to: "numeric".to_string(),
                    });
                }
                self.sum = Some(match self.sum.take() {
                    Some(sum) => sum.add(value)?,
                    None => value.clone(),
                });
            }
            AggregateFunction::Min | AggregateFunction::Max => {
                let replace = match &self.best {
                    None => true,
                    Some(best) => {
                        let ordering = value.compare(best).ok_or_else(|| Error::TypeMismatch {
                            from: value.type_name().to_string(),
                            to: best.type_name().to_string(),
                        })?;
                        if self.func == AggregateFunction::Min {
                            ordering == Ordering::Less
                        } else {
                            ordering == Ordering::Greater
                        }
                    }
                };
                if replace {
                    self.best = Some(value.clone());
                }
            }
        }
        Ok(())
    }

    /// Final value
    pub fn finish(&self) -> Result<Value> {
        Ok(match self.func {
            AggregateFunction::Count => Value::Integer(self.count),
            AggregateFunction::Sum => self.sum.clone().unwrap_or(Value::Null),
            AggregateFunction::Min | AggregateFunction::Max => self.best.clone().unwrap_or(Value::Null),
            AggregateFunction::Avg => match &self.sum {
                None => Value::Null,
                Some(Value::Float(f)) => Value::Float(f / self.count as f64),
                Some(Value::Integer(i)) => Value::Decimal(average(Decimal::from(*i), self.count)?),
                Some(Value::Decimal(d)) => Value::Decimal(average(*d, self.count)?),
                Some(other) => {
                    return Err(Error::TypeMismatch {
                        from: other.type_name().to_string(),
                        to: "numeric".to_string(),
                    })
                }
            },
        })
    }
}

/// Exact mean: trailing zeros dropped, but never fewer decimals than the inputs
fn average(sum: Decimal, count: i64) -> Result<Decimal> {
    let mut avg = sum
        .checked_div(Decimal::from(count))
        .ok_or(Error::NumericOverflow)?
        .round_dp_with_strategy(AVG_SCALE, RoundingStrategy::MidpointAwayFromZero)
        .normalize();
    if avg.scale() < sum.scale() {
        avg.rescale(sum.scale());
    }
    Ok(avg)
}

impl<'a> ExecutionEngine<'a> {
    /// Group rows and compute aggregates; output is keys then aggregate values
    pub(crate) fn execute_aggregate(
        &mut self,
        input: &LogicalPlan,
        group_by: &[ScalarExpr],
        aggregates: &[AggregateCall],
        outer: Option<&RowScope<'_>>,
    ) -> Result<Vec<Tuple>> {
        let rows = self.execute_plan(input, outer, None)?;
        let fresh = || {
            aggregates
                .iter()
                .map(|a| Accumulator::new(a.func, a.distinct))
                .collect::<Vec<_>>()
        };

        let mut groups: IndexMap<Vec<Value>, Vec<Accumulator>> = IndexMap::new();
        for row in &rows {
            let mut key = Vec::with_capacity(group_by.len());
            for expr in group_by {
                key.push(self.eval(expr, row.values(), outer)?);
            }
            let mut inputs = Vec::with_capacity(aggregates.len());
            for call in aggregates {
                inputs.push(match &call.arg {
                    Some(arg) => Some(self.eval(arg, row.values(), outer)?),
                    None => None,
                });
            }
            let accumulators = groups.entry(key).or_insert_with(fresh);
            for (acc, input) in accumulators.iter_mut().zip(&inputs) {
                acc.update(input.as_ref())?;
            }
        }

        // Aggregates without GROUP BY produce one row even for no input
        if groups.is_empty() && group_by.is_empty() {
            groups.insert(Vec::new(), fresh());
        }

        groups
            .into_iter()
            .map(|(key, accumulators)| {
                let mut values = key;
                for acc in &accumulators {
                    values.push(acc.finish()?);
                }
                Ok(Tuple::new(values))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Value {
        Value::Decimal(Decimal::from_str(s).unwrap())
    }

    fn run(func: AggregateFunction, distinct: bool, inputs: &[Value]) -> Value {
        let mut acc = Accumulator::new(func, distinct);
        for v in inputs {
            acc.update(Some(v)).unwrap();
        }
        acc.finish().unwrap()
    }

    #[test]
    fn test_avg_keeps_input_scale() {
        let avg = run(AggregateFunction::Avg, false, &[dec("10.00"), dec("20.00")]);
        assert_eq!(avg.to_string(), "15.00");
        let avg = run(AggregateFunction::Avg, false, &[Value::Integer(1), Value::Integer(2)]);
        assert_eq!(avg, dec("1.5"));
    }

    #[test]
    fn test_nulls_skipped() {
        let inputs = [Value::Null, Value::Integer(4), Value::Null];
        assert_eq!(run(AggregateFunction::Count, false, &inputs), Value::Integer(1));
        assert_eq!(run(AggregateFunction::Sum, false, &inputs), Value::Integer(4));
        assert!(run(AggregateFunction::Sum, false, &[Value::Null]).is_null());
        assert!(run(AggregateFunction::Max, false, &[]).is_null());

        let mut star = Accumulator::new(AggregateFunction::Count, false);
        star.update(None).unwrap();
        star.update(None).unwrap();
        assert_eq!(star.finish().unwrap(), Value::Integer(2));
    }

    #[test]
    fn test_distinct_and_extremes() {
        let inputs = [Value::Integer(3), Value::Integer(3), Value::Integer(1)];
        assert_eq!(run(AggregateFunction::Count, true, &inputs), Value::Integer(2));
        assert_eq!(run(AggregateFunction::Sum, true, &inputs), Value::Integer(4));
        assert_eq!(run(AggregateFunction::Min, false, &inputs), Value::Integer(1));
        assert_eq!(run(AggregateFunction::Max, false, &inputs), Value::Integer(3));
    }

    #[test]
    fn test_sum_rejects_text() {
        let mut acc = Accumulator::new(AggregateFunction::Sum, false);
        assert!(matches!(
            acc.update(Some(&Value::from("x"))),
            Err(Error::TypeMismatch { .. })
        ));
    }
}
