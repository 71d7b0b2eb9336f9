//! Window function evaluation
//!
//! Rows are split into partitions (kept in first-appearance order), each
//! partition is stably sorted by the window's ORDER BY, and every function
//! appends one column. Without an explicit frame, a window with ORDER BY
//! sees the partition start through the current row; one without ORDER BY
//! sees the whole partition.

use std::cmp::Ordering;

use indexmap::IndexMap;

use super::aggregate::Accumulator;
use super::executor::{compare_keys, ExecutionEngine};
use super::expr::RowScope;
use super::planner::{LogicalPlan, WindowCall, WindowFunction};
use crate::error::{Error, Result};
use crate::sql::ast::{FrameBound, WindowFrame};
use crate::storage::tuple::{Tuple, Value};

/// Inclusive frame bounds for the row at `pos` of a partition of `len` rows;
/// `None` when the frame is empty
fn frame_bounds(frame: Option<&WindowFrame>, ordered: bool, pos: usize, len: usize) -> Option<(usize, usize)> {
    let last = len.checked_sub(1)?;
    let (start, end) = match frame {
        Some(frame) => (frame.start, frame.end),
        None if ordered => (FrameBound::UnboundedPreceding, FrameBound::CurrentRow),
        None => (FrameBound::UnboundedPreceding, FrameBound::UnboundedFollowing),
    };
    // Positions as signed offsets so out-of-partition bounds clamp cleanly
    let resolve = |bound: FrameBound| -> i64 {
        match bound {
            FrameBound::UnboundedPreceding => 0,
            FrameBound::Preceding(n) => pos as i64 - n as i64,
            FrameBound::CurrentRow => pos as i64,
            FrameBound::Following(n) => pos as i64 + n as i64,
            FrameBound::UnboundedFollowing => last as i64,
        }
    };
    let (lo, hi) = (resolve(start).max(0), resolve(end).min(last as i64));
    (lo <= hi).then(|| (lo as usize, hi as usize))
}

impl<'a> ExecutionEngine<'a> {
    /// Append one column per window function to every input row
    pub(crate) fn execute_window(
        &mut self,
        input: &LogicalPlan,
        functions: &[WindowCall],
        outer: Option<&RowScope<'_>>,
    ) -> Result<Vec<Tuple>> {
        let rows = self.execute_plan(input, outer, None)?;
        let mut columns = Vec::with_capacity(functions.len());
        for call in functions {
            columns.push(self.window_column(call, &rows, outer)?);
        }
        Ok(rows
            .into_iter()
            .enumerate()
            .map(|(i, row)| {
                let mut values = row.into_values();
                values.extend(columns.iter().map(|c| c[i].clone()));
                Tuple::new(values)
            })
            .collect())
    }

    fn window_column(
        &mut self,
        call: &WindowCall,
        rows: &[Tuple],
        outer: Option<&RowScope<'_>>,
    ) -> Result<Vec<Value>> {
        let mut partitions: IndexMap<Vec<Value>, Vec<usize>> = IndexMap::new();
        let mut sort_keys = Vec::with_capacity(rows.len());
        for (i, row) in rows.iter().enumerate() {
            let mut key = Vec::with_capacity(call.partition_by.len());
            for expr in &call.partition_by {
                key.push(self.eval(expr, row.values(), outer)?);
            }
            partitions.entry(key).or_default().push(i);

            let mut order = Vec::with_capacity(call.order_by.len());
            for spec in &call.order_by {
                order.push(self.eval(&spec.expr, row.values(), outer)?);
            }
            sort_keys.push(order);
        }
        let directions: Vec<(bool, bool)> = call
            .order_by
            .iter()
            .map(|s| (s.ascending, s.nulls_first))
            .collect();

        let mut output = vec![Value::Null; rows.len()];
        for (_, mut members) in partitions {
            members.sort_by(|&a, &b| compare_keys(&sort_keys[a], &sort_keys[b], &directions));
            let peers = |x: usize, y: usize| {
                compare_keys(&sort_keys[x], &sort_keys[y], &directions) == Ordering::Equal
            };

            let mut rank = 0;
            let mut dense_rank = 0;
            for (pos, &row) in members.iter().enumerate() {
                if pos == 0 || !peers(members[pos - 1], row) {
                    rank = pos + 1;
                    dense_rank += 1;
                }
                let current = rows[row].values();
                output[row] = match call.func {
                    WindowFunction::RowNumber => Value::Integer(pos as i64 + 1),
                    WindowFunction::Rank => Value::Integer(rank as i64),
                    WindowFunction::DenseRank => Value::Integer(dense_rank as i64),
                    WindowFunction::Lead | WindowFunction::Lag => {
                        let offset = match call.args.get(1) {
                            Some(expr) => self.eval(expr, current, outer)?.as_i64().ok_or_else(|| {
                                Error::ExecutionError("LEAD/LAG offset must be an integer".to_string())
                            })?,
                            None => 1,
                        };
                        let target = if call.func == WindowFunction::Lead {
                            pos as i64 + offset
                        } else {
                            pos as i64 - offset
                        };
                        match usize::try_from(target).ok().and_then(|t| members.get(t)) {
                            Some(&other) => self.eval(&call.args[0], rows[other].values(), outer)?,
                            None => match call.args.get(2) {
                                Some(default) => self.eval(default, current, outer)?,
                                None => Value::Null,
                            },
                        }
                    }
                    WindowFunction::FirstValue | WindowFunction::LastValue => {
                        match frame_bounds(call.frame.as_ref(), !call.order_by.is_empty(), pos, members.len()) {
                            Some((lo, hi)) => {
                                let pick = if call.func == WindowFunction::FirstValue { lo } else { hi };
                                self.eval(&call.args[0], rows[members[pick]].values(), outer)?
                            }
                            None => Value::Null,
                        }
                    }
                    WindowFunction::Aggregate(func) => {
                        let mut acc = Accumulator::new(func, false);
                        if let Some((lo, hi)) =
                            frame_bounds(call.frame.as_ref(), !call.order_by.is_empty(), pos, members.len())
                        {
                            for &member in &members[lo..=hi] {
                                match call.args.first() {
                                    Some(arg) => {
                                        let value = self.eval(arg, rows[member].values(), outer)?;
                                        acc.update(Some(&value))?;
                                    }
                                    None => acc.update(None)?,
                                }
                            }
                        }
                        acc.finish()?
                    }
                };
            }
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_frames() {
        assert_eq!(frame_bounds(None, true, 2, 5), Some((0, 2)));
        assert_eq!(frame_bounds(None, false, 2, 5), Some((0, 4)));
    }

    #[test]
    fn test_explicit_rows_frame() {
        let frame = WindowFrame {
            start: FrameBound::Preceding(1),
            end: FrameBound::Following(1),
        };
        assert_eq!(frame_bounds(Some(&frame), true, 0, 3), Some((0, 1)));
        assert_eq!(frame_bounds(Some(&frame), true, 2, 3), Some((1, 2)));

        let ahead = WindowFrame {
            start: FrameBound::Following(2),
            end: FrameBound::UnboundedFollowing,
        };
        assert_eq!(frame_bounds(Some(&ahead), true, 2, 3), None);
    }
}
