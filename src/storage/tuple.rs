//! Tuple and Value types for KeelDB
//!
//! This module defines how data values are represented in memory.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use chrono::{Days, NaiveDate, NaiveDateTime};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::catalog::DataType;
use crate::error::{Error, Result};

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIMESTAMP_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// A value in the database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    /// NULL value
    Null,
    /// Boolean value
    Boolean(bool),
    /// Any integer column value (range checked against the column type on write)
    Integer(i64),
    /// Floating point value
    Float(f64),
    /// Exact decimal value
    Decimal(Decimal),
    /// String value
    String(String),
    /// Calendar date
    Date(NaiveDate),
    /// Timestamp without time zone
    Timestamp(NaiveDateTime),
}

/// Numeric view of a value used for arithmetic promotion
#[derive(Debug, Clone, Copy)]
enum Numeric {
    Int(i64),
    Dec(Decimal),
    Float(f64),
}

impl Numeric {
    fn to_decimal(self) -> Option<Decimal> {
        match self {
            Numeric::Int(i) => Some(Decimal::from(i)),
            Numeric::Dec(d) => Some(d),
            Numeric::Float(f) => Decimal::from_f64(f),
        }
    }

    fn to_f64(self) -> f64 {
        match self {
            Numeric::Int(i) => i as f64,
            Numeric::Dec(d) => d.to_f64().unwrap_or(f64::NAN),
            Numeric::Float(f) => f,
        }
    }
}

/// Promote a pair of numerics to a common representation
enum Promoted {
    Int(i64, i64),
    Dec(Decimal, Decimal),
    Float(f64, f64),
}

fn promote(a: Numeric, b: Numeric) -> Result<Promoted> {
    Ok(match (a, b) {
        (Numeric::Int(x), Numeric::Int(y)) => Promoted::Int(x, y),
        (Numeric::Float(_), _) | (_, Numeric::Float(_)) => Promoted::Float(a.to_f64(), b.to_f64()),
        _ => Promoted::Dec(
            a.to_decimal().ok_or(Error::NumericOverflow)?,
            b.to_decimal().ok_or(Error::NumericOverflow)?,
        ),
    })
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.total_cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Numerics that compare equal across representations must hash equally.
        fn hash_integral_or_bits<H: Hasher>(as_int: Option<i64>, as_float: f64, state: &mut H) {
            match as_int {
                Some(i) => {
                    0u8.hash(state);
                    i.hash(state);
                }
                None => {
                    1u8.hash(state);
                    as_float.to_bits().hash(state);
                }
            }
        }

        self.type_rank().hash(state);
        match self {
            Value::Null => {}
            Value::Boolean(v) => v.hash(state),
            Value::Integer(v) => hash_integral_or_bits(Some(*v), 0.0, state),
            Value::Float(f) => {
                let int = if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f <= i64::MAX as f64 {
                    Some(*f as i64)
                } else {
                    None
                };
                hash_integral_or_bits(int, *f, state)
            }
            Value::Decimal(d) => {
                let int = if d.fract().is_zero() { d.to_i64() } else { None };
                hash_integral_or_bits(int, d.to_f64().unwrap_or(f64::NAN), state)
            }
            Value::String(v) => v.hash(state),
            Value::Date(v) => v.hash(state),
            Value::Timestamp(v) => v.hash(state),
        }
    }
}

impl Value {
    /// Check if this value is NULL
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Try to convert to boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            Value::Integer(i) => Some(*i != 0),
            _ => None,
        }
    }

    /// Try to convert to i64
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            Value::Decimal(d) if d.fract().is_zero() => d.to_i64(),
            _ => None,
        }
    }

    /// Try to convert to f64
    pub fn as_f64(&self) -> Option<f64> {
        self.numeric().map(Numeric::to_f64)
    }

    /// Try to convert to an exact decimal
    pub fn as_decimal(&self) -> Option<Decimal> {
        self.numeric().and_then(Numeric::to_decimal)
    }

    /// Try to convert to string
    pub fn as_string(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get the type name of this value
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Boolean(_) => "BOOLEAN",
            Value::Integer(_) => "INTEGER",
            Value::Float(_) => "FLOAT",
            Value::Decimal(_) => "DECIMAL",
            Value::String(_) => "TEXT",
            Value::Date(_) => "DATE",
            Value::Timestamp(_) => "TIMESTAMP",
        }
    }

    /// The natural column type for this value, if it has one
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Value::Null => None,
            Value::Boolean(_) => Some(DataType::Boolean),
            Value::Integer(_) => Some(DataType::BigInt),
            Value::Float(_) => Some(DataType::Double),
            Value::Decimal(d) => Some(DataType::Decimal(
                crate::catalog::types::MAX_DECIMAL_PRECISION,
                d.scale() as u8,
            )),
            Value::String(_) => Some(DataType::Text),
            Value::Date(_) => Some(DataType::Date),
            Value::Timestamp(_) => Some(DataType::Timestamp),
        }
    }

    fn numeric(&self) -> Option<Numeric> {
        match self {
            Value::Integer(i) => Some(Numeric::Int(*i)),
            Value::Decimal(d) => Some(Numeric::Dec(*d)),
            Value::Float(f) => Some(Numeric::Float(*f)),
            _ => None,
        }
    }

    fn type_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Boolean(_) => 1,
            Value::Integer(_) | Value::Float(_) | Value::Decimal(_) => 2,
            Value::String(_) => 3,
            Value::Date(_) => 4,
            Value::Timestamp(_) => 5,
        }
    }

    /// Parse a date literal (`YYYY-MM-DD`)
    pub fn parse_date(s: &str) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(s.trim(), DATE_FORMAT).ok()
    }

    /// Parse a timestamp literal; a bare date means midnight
    pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
        let s = s.trim();
        TIMESTAMP_FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
            .or_else(|| Self::parse_date(s).and_then(|d| d.and_hms_opt(0, 0, 0)))
    }

    /// SQL comparison of two non-NULL values.
    ///
    /// Numerics compare across representations, dates compare with
    /// timestamps, and string literals compare with temporal values by
    /// parsing them. Returns `None` when the types are incomparable.
    /// NULL sorts lowest so ORDER BY can use this directly.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            (Value::Null, _) => Some(Ordering::Less),
            (_, Value::Null) => Some(Ordering::Greater),

            (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),

            (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
            (Value::Timestamp(a), Value::Timestamp(b)) => Some(a.cmp(b)),
            (Value::Date(a), Value::Timestamp(b)) => a.and_hms_opt(0, 0, 0).map(|a| a.cmp(b)),
            (Value::Timestamp(a), Value::Date(b)) => b.and_hms_opt(0, 0, 0).map(|b| a.cmp(&b)),
            (Value::Date(a), Value::String(s)) => Self::parse_date(s).map(|b| a.cmp(&b)),
            (Value::String(s), Value::Date(b)) => Self::parse_date(s).map(|a| a.cmp(b)),
            (Value::Timestamp(a), Value::String(s)) => Self::parse_timestamp(s).map(|b| a.cmp(&b)),
            (Value::String(s), Value::Timestamp(b)) => Self::parse_timestamp(s).map(|a| a.cmp(b)),

            _ => {
                let (a, b) = (self.numeric()?, other.numeric()?);
                match promote(a, b).ok()? {
                    Promoted::Int(x, y) => Some(x.cmp(&y)),
                    Promoted::Dec(x, y) => Some(x.cmp(&y)),
                    Promoted::Float(x, y) => x.partial_cmp(&y),
                }
            }
        }
    }

    /// Total order used by indexes, sorting and grouping.
    ///
    /// Agrees with [`Value::compare`] for numerics and same-typed values and
    /// falls back to a fixed type rank otherwise, so it never fails.
    pub fn total_cmp(&self, other: &Value) -> Ordering {
        let (ra, rb) = (self.type_rank(), other.type_rank());
        if ra != rb {
            return ra.cmp(&rb);
        }
        match (self, other) {
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            _ => self.compare(other).unwrap_or(Ordering::Equal),
        }
    }

    /// Three-valued SQL equality: `None` when either side is NULL
    pub fn sql_eq(&self, other: &Value) -> Result<Option<bool>> {
        if self.is_null() || other.is_null() {
            return Ok(None);
        }
        match self.compare(other) {
            Some(ord) => Ok(Some(ord == Ordering::Equal)),
            None => Err(self.mismatch(other)),
        }
    }

    fn mismatch(&self, other: &Value) -> Error {
        Error::TypeMismatch {
            from: self.type_name().to_string(),
            to: other.type_name().to_string(),
        }
    }

    fn arithmetic(
        &self,
        other: &Value,
        int_op: fn(i64, i64) -> Option<i64>,
        dec_op: fn(Decimal, Decimal) -> Option<Decimal>,
        float_op: fn(f64, f64) -> f64,
    ) -> Result<Value> {
        if self.is_null() || other.is_null() {
            return Ok(Value::Null);
        }
        let (a, b) = match (self.numeric(), other.numeric()) {
            (Some(a), Some(b)) => (a, b),
            _ => return Err(self.mismatch(other)),
        };
        match promote(a, b)? {
            Promoted::Int(x, y) => int_op(x, y).map(Value::Integer).ok_or(Error::NumericOverflow),
            Promoted::Dec(x, y) => dec_op(x, y).map(Value::Decimal).ok_or(Error::NumericOverflow),
            Promoted::Float(x, y) => Ok(Value::Float(float_op(x, y))),
        }
    }

    /// Add two values; `DATE + INTEGER` adds days
    pub fn add(&self, other: &Value) -> Result<Value> {
        match (self, other) {
            (Value::Date(d), Value::Integer(n)) | (Value::Integer(n), Value::Date(d)) => {
                shift_date(*d, *n)
            }
            _ => self.arithmetic(other, i64::checked_add, Decimal::checked_add, |a, b| a + b),
        }
    }

    /// Subtract two values; `DATE - INTEGER` subtracts days, `DATE - DATE` yields days
    pub fn sub(&self, other: &Value) -> Result<Value> {
        match (self, other) {
            (Value::Date(d), Value::Integer(n)) => shift_date(*d, n.checked_neg().ok_or(Error::NumericOverflow)?),
            (Value::Date(a), Value::Date(b)) => Ok(Value::Integer((*a - *b).num_days())),
            _ => self.arithmetic(other, i64::checked_sub, Decimal::checked_sub, |a, b| a - b),
        }
    }

    /// Multiply two values
    pub fn mul(&self, other: &Value) -> Result<Value> {
        self.arithmetic(other, i64::checked_mul, Decimal::checked_mul, |a, b| a * b)
    }

    /// Divide two values; integer division truncates
    pub fn div(&self, other: &Value) -> Result<Value> {
        if other.numeric().map_or(false, |n| n.to_f64() == 0.0) && !self.is_null() {
            return Err(Error::DivisionByZero);
        }
        self.arithmetic(other, i64::checked_div, Decimal::checked_div, |a, b| a / b)
    }

    /// Remainder of two values
    pub fn rem(&self, other: &Value) -> Result<Value> {
        if other.numeric().map_or(false, |n| n.to_f64() == 0.0) && !self.is_null() {
            return Err(Error::DivisionByZero);
        }
        self.arithmetic(other, i64::checked_rem, Decimal::checked_rem, |a, b| a % b)
    }

    /// Arithmetic negation
    pub fn neg(&self) -> Result<Value> {
        match self {
            Value::Null => Ok(Value::Null),
            Value::Integer(i) => i.checked_neg().map(Value::Integer).ok_or(Error::NumericOverflow),
            Value::Float(f) => Ok(Value::Float(-f)),
            Value::Decimal(d) => Ok(Value::Decimal(-*d)),
            other => Err(Error::TypeMismatch {
                from: other.type_name().to_string(),
                to: "numeric".to_string(),
            }),
        }
    }

    /// Convert to the given type.
    ///
    /// `explicit` selects CAST semantics (strings are truncated to fit);
    /// assignment semantics reject values that do not fit.
    pub fn cast(&self, target: &DataType, explicit: bool) -> Result<Value> {
        if self.is_null() {
            return Ok(Value::Null);
        }
        let mismatch = || Error::TypeMismatch {
            from: self.type_name().to_string(),
            to: target.to_string(),
        };

        match target {
            DataType::Boolean => match self {
                Value::Boolean(b) => Ok(Value::Boolean(*b)),
                Value::Integer(i) if *i == 0 || *i == 1 => Ok(Value::Boolean(*i == 1)),
                Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                    "true" | "t" | "yes" | "1" => Ok(Value::Boolean(true)),
                    "false" | "f" | "no" | "0" => Ok(Value::Boolean(false)),
                    _ => Err(mismatch()),
                },
                _ => Err(mismatch()),
            },
            DataType::SmallInt | DataType::Integer | DataType::BigInt => {
                let value = match self {
                    Value::Integer(i) => *i,
                    Value::Boolean(b) => *b as i64,
                    Value::Float(f) => {
                        let r = f.round();
                        if !r.is_finite() || r < i64::MIN as f64 || r > i64::MAX as f64 {
                            return Err(Error::NumericOverflow);
                        }
                        r as i64
                    }
                    Value::Decimal(d) => d.round().to_i64().ok_or(Error::NumericOverflow)?,
                    Value::String(s) => s.trim().parse::<i64>().map_err(|_| mismatch())?,
                    _ => return Err(mismatch()),
                };
                let (lo, hi) = target.integer_range().unwrap_or((i64::MIN, i64::MAX));
                if value < lo || value > hi {
                    return Err(Error::NumericOverflow);
                }
                Ok(Value::Integer(value))
            }
            DataType::Float | DataType::Double => match self {
                Value::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .map(Value::Float)
                    .map_err(|_| mismatch()),
                _ => self.as_f64().map(Value::Float).ok_or_else(mismatch),
            },
            DataType::Decimal(precision, scale) => {
                let mut d = match self {
                    Value::String(s) => Decimal::from_str(s.trim())
                        .or_else(|_| Decimal::from_scientific(s.trim()))
                        .map_err(|_| mismatch())?,
                    _ => self.as_decimal().ok_or_else(mismatch)?,
                };
                d = d.round_dp_with_strategy(*scale as u32, RoundingStrategy::MidpointAwayFromZero);
                d.rescale(*scale as u32);
                let int_part = d.trunc().abs();
                let int_digits = if int_part.is_zero() {
                    0
                } else {
                    int_part.to_string().len()
                };
                if int_digits + *scale as usize > *precision as usize {
                    return Err(Error::NumericOverflow);
                }
                Ok(Value::Decimal(d))
            }
            DataType::Char(_) | DataType::Varchar(_) | DataType::Text => {
                let s = match self {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                match target.max_length() {
                    Some(max) if s.chars().count() > max => {
                        if explicit {
                            Ok(Value::String(s.chars().take(max).collect()))
                        } else {
                            Err(Error::ValueTooLarge(s))
                        }
                    }
                    _ => Ok(Value::String(s)),
                }
            }
            DataType::Date => match self {
                Value::Date(d) => Ok(Value::Date(*d)),
                Value::Timestamp(ts) => Ok(Value::Date(ts.date())),
                Value::String(s) => Self::parse_date(s)
                    .or_else(|| Self::parse_timestamp(s).map(|ts| ts.date()))
                    .map(Value::Date)
                    .ok_or_else(mismatch),
                _ => Err(mismatch()),
            },
            DataType::Timestamp => match self {
                Value::Timestamp(ts) => Ok(Value::Timestamp(*ts)),
                Value::Date(d) => d
                    .and_hms_opt(0, 0, 0)
                    .map(Value::Timestamp)
                    .ok_or_else(mismatch),
                Value::String(s) => Self::parse_timestamp(s)
                    .map(Value::Timestamp)
                    .ok_or_else(mismatch),
                _ => Err(mismatch()),
            },
        }
    }

    /// Whether converting from `from` to `to` preserves this value exactly
    pub fn converts_losslessly(&self, from: &DataType, to: &DataType) -> bool {
        match self.cast(to, false) {
            Ok(converted) => match converted.cast(from, false) {
                Ok(back) => back.total_cmp(self) == Ordering::Equal,
                Err(_) => false,
            },
            Err(_) => false,
        }
    }
}

fn shift_date(date: NaiveDate, days: i64) -> Result<Value> {
    let shifted = if days >= 0 {
        date.checked_add_days(Days::new(days as u64))
    } else {
        date.checked_sub_days(Days::new(days.unsigned_abs()))
    };
    shifted.map(Value::Date).ok_or(Error::NumericOverflow)
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Boolean(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(n) => write!(f, "{}", n),
            Value::Decimal(d) => write!(f, "{}", d),
            Value::String(s) => write!(f, "{}", s),
            Value::Date(d) => write!(f, "{}", d.format(DATE_FORMAT)),
            Value::Timestamp(t) => write!(f, "{}", t.format("%Y-%m-%d %H:%M:%S")),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<Decimal> for Value {
    fn from(v: Decimal) -> Self {
        Value::Decimal(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Date(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// A tuple (row) in the database
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Tuple {
    /// Values in this tuple
    values: Vec<Value>,
}

impl Tuple {
    /// Create a new tuple from values
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    /// Create an empty tuple
    pub fn empty() -> Self {
        Self { values: Vec::new() }
    }

    /// Get a value by index
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Set a value by index
    pub fn set(&mut self, index: usize, value: Value) {
        if index < self.values.len() {
            self.values[index] = value;
        }
    }

    /// Add a value to the tuple
    pub fn push(&mut self, value: Value) {
        self.values.push(value);
    }

    /// Get all values
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Get number of values
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if tuple is empty
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Consume the tuple and return the values
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    /// Project specific columns
    pub fn project(&self, indices: &[usize]) -> Tuple {
        let values = indices
            .iter()
            .map(|&i| self.values.get(i).cloned().unwrap_or(Value::Null))
            .collect();
        Tuple::new(values)
    }

    /// Concatenate two tuples
    pub fn concat(&self, other: &Tuple) -> Tuple {
        let mut values = self.values.clone();
        values.extend(other.values.iter().cloned());
        Tuple::new(values)
    }

    /// Pad with NULLs or truncate to exactly `width` values
    pub fn resized(mut self, width: usize) -> Tuple {
        self.values.resize(width, Value::Null);
        self
    }
}

impl FromIterator<Value> for Tuple {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Tuple::new(iter.into_iter().collect())
    }
}

impl IntoIterator for Tuple {
    type Item = Value;
    type IntoIter = std::vec::IntoIter<Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.into_iter()
    }
}

impl<'a> IntoIterator for &'a Tuple {
    type Item = &'a Value;
    type IntoIter = std::slice::Iter<'a, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn dec(s: &str) -> Value {
        Value::Decimal(Decimal::from_str(s).unwrap())
    }

    #[test]
    fn test_value_comparison() {
        assert_eq!(
            Value::Integer(5).compare(&Value::Integer(3)),
            Some(Ordering::Greater)
        );
        assert_eq!(
            Value::String("abc".to_string()).compare(&Value::String("def".to_string())),
            Some(Ordering::Less)
        );
        assert_eq!(Value::Null.compare(&Value::Integer(1)), Some(Ordering::Less));
        assert_eq!(dec("10.00").compare(&Value::Integer(10)), Some(Ordering::Equal));
        assert_eq!(Value::Integer(1).compare(&Value::String("1".into())), None);
    }

    #[test]
    fn test_date_comparison_with_literal() {
        let d = Value::Date(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
        assert_eq!(d.compare(&Value::from("2024-02-29")), Some(Ordering::Greater));
    }

    #[test]
    fn test_value_arithmetic() {
        assert_eq!(
            Value::Integer(5).add(&Value::Integer(3)).unwrap(),
            Value::Integer(8)
        );
        assert_eq!(
            Value::Float(3.0).mul(&Value::Float(2.0)).unwrap(),
            Value::Float(6.0)
        );
        assert_eq!(dec("10.50").add(&Value::Integer(1)).unwrap(), dec("11.50"));
        assert_eq!(Value::Integer(7).div(&Value::Integer(2)).unwrap(), Value::Integer(3));
        assert!(matches!(
            Value::Integer(1).div(&Value::Integer(0)),
            Err(Error::DivisionByZero)
        ));
        assert!(matches!(
            Value::Integer(i64::MAX).add(&Value::Integer(1)),
            Err(Error::NumericOverflow)
        ));
        assert_eq!(Value::Null.add(&Value::Integer(1)).unwrap(), Value::Null);
    }

    #[test]
    fn test_cast_to_decimal_rounds_to_scale() {
        let v = Value::Float(10.005).cast(&DataType::Decimal(10, 2), false).unwrap();
        assert_eq!(v.to_string().len(), "10.01".len());
        assert!(matches!(
            Value::Integer(12345).cast(&DataType::Decimal(4, 1), false),
            Err(Error::NumericOverflow)
        ));
        assert_eq!(
            Value::from("20").cast(&DataType::Decimal(10, 2), false).unwrap().to_string(),
            "20.00"
        );
        // Halves round away from zero
        let money = DataType::Decimal(10, 2);
        assert_eq!(Value::from("1.005").cast(&money, false).unwrap().to_string(), "1.01");
        assert_eq!(Value::from("1.015").cast(&money, false).unwrap().to_string(), "1.02");
        assert_eq!(Value::from("-2.125").cast(&money, false).unwrap().to_string(), "-2.13");
    }

    #[test]
    fn test_cast_strings() {
        assert!(matches!(
            Value::from("toolong").cast(&DataType::Varchar(3), false),
            Err(Error::ValueTooLarge(_))
        ));
        assert_eq!(
            Value::from("toolong").cast(&DataType::Varchar(3), true).unwrap(),
            Value::from("too")
        );
        assert_eq!(
            Value::from("2024-01-02").cast(&DataType::Date, false).unwrap(),
            Value::Date(NaiveDate::from_ymd_opt(2024, 1, 2).unwrap())
        );
    }

    #[test]
    fn test_lossless_conversion() {
        assert!(Value::Integer(100).converts_losslessly(&DataType::Integer, &DataType::SmallInt));
        assert!(!Value::Integer(100_000).converts_losslessly(&DataType::Integer, &DataType::SmallInt));
        assert!(!dec("10.55").converts_losslessly(&DataType::Decimal(5, 2), &DataType::Decimal(5, 1)));
        assert!(Value::from("42").converts_losslessly(&DataType::Text, &DataType::Integer));
    }

    #[test]
    fn test_numeric_hash_consistency() {
        let mut set = HashSet::new();
        set.insert(Value::Integer(15));
        assert!(set.contains(&dec("15.00")));
        assert!(set.contains(&Value::Float(15.0)));
        assert!(!set.contains(&Value::from("15")));
    }

    #[test]
    fn test_tuple_operations() {
        let tuple = Tuple::new(vec![
            Value::Integer(1),
            Value::String("hello".to_string()),
            Value::Boolean(true),
        ]);

        assert_eq!(tuple.len(), 3);
        assert_eq!(tuple.get(0), Some(&Value::Integer(1)));

        let projected = tuple.project(&[0, 2]);
        assert_eq!(projected.len(), 2);
        assert_eq!(projected.get(1), Some(&Value::Boolean(true)));
        assert_eq!(tuple.clone().resized(4).get(3), Some(&Value::Null));
    }
}
