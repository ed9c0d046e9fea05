use crate::error::ExprError;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// A tagged value flowing through frames, templates and expressions.
///
/// Lists and maps may nest arbitrarily.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

/// The kind tag of a [`Value`], used for formatter checks and function dispatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataKind {
    Null,
    Bool,
    Int,
    Float,
    Str,
    Date,
    DateTime,
    List,
    Map,
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataKind::Null => "null",
            DataKind::Bool => "bool",
            DataKind::Int => "int",
            DataKind::Float => "float",
            DataKind::Str => "str",
            DataKind::Date => "date",
            DataKind::DateTime => "datetime",
            DataKind::List => "list",
            DataKind::Map => "map",
        };
        f.write_str(name)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        use Value::*;
        match (self, other) {
            (Null, Null) => true,
            (Bool(a), Bool(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            // NaN compares equal to itself so values can act as keys
            (Float(a), Float(b)) => (a == b) || (a.is_nan() && b.is_nan()),
            (Str(a), Str(b)) => a == b,
            (Date(a), Date(b)) => a == b,
            (DateTime(a), DateTime(b)) => a == b,
            (List(a), List(b)) => a == b,
            (Map(a), Map(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl std::hash::Hash for Value {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Bool(b) => b.hash(state),
            Value::Int(i) => i.hash(state),
            Value::Float(f) => {
                if f.is_nan() {
                    f64::NAN.to_bits().hash(state);
                } else {
                    f.to_bits().hash(state);
                }
            }
            Value::Str(s) => s.hash(state),
            Value::Date(d) => d.hash(state),
            Value::DateTime(dt) => dt.hash(state),
            Value::List(items) => items.hash(state),
            Value::Map(map) => map.hash(state),
        }
    }
}

// Total order used for sorting and group keys. Kinds are strictly ordered
// (null least), values compare within their kind only.
impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        use Value::*;
        match (self, other) {
            (Null, Null) => Ordering::Equal,
            (Bool(a), Bool(b)) => a.cmp(b),
            (Int(a), Int(b)) => a.cmp(b),
            (Float(a), Float(b)) => match (a.is_nan(), b.is_nan()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                (false, false) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
            },
            (Str(a), Str(b)) => a.cmp(b),
            (Date(a), Date(b)) => a.cmp(b),
            (DateTime(a), DateTime(b)) => a.cmp(b),
            (List(a), List(b)) => a.cmp(b),
            (Map(a), Map(b)) => a.iter().cmp(b.iter()),
            (a, b) => a.kind_rank().cmp(&b.kind_rank()),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Value {
    pub fn kind(&self) -> DataKind {
        match self {
            Value::Null => DataKind::Null,
            Value::Bool(_) => DataKind::Bool,
            Value::Int(_) => DataKind::Int,
            Value::Float(_) => DataKind::Float,
            Value::Str(_) => DataKind::Str,
            Value::Date(_) => DataKind::Date,
            Value::DateTime(_) => DataKind::DateTime,
            Value::List(_) => DataKind::List,
            Value::Map(_) => DataKind::Map,
        }
    }

    fn kind_rank(&self) -> u8 {
        match self.kind() {
            DataKind::Null => 0,
            DataKind::Bool => 1,
            DataKind::Int => 2,
            DataKind::Float => 3,
            DataKind::Str => 4,
            DataKind::Date => 5,
            DataKind::DateTime => 6,
            DataKind::List => 7,
            DataKind::Map => 8,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Builds a list value from anything convertible.
    pub fn list<I, T>(items: I) -> Value
    where
        I: IntoIterator<Item = T>,
        T: Into<Value>,
    {
        Value::List(items.into_iter().map(Into::into).collect())
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Adds two values. Numeric operands widen int to float; strings concatenate;
    /// null propagates.
    pub fn checked_add(&self, other: &Value) -> Result<Value, ExprError> {
        use Value::*;
        match (self, other) {
            (Int(a), Int(b)) => Ok(Int(a.wrapping_add(*b))),
            (Int(a), Float(b)) => Ok(Float(*a as f64 + b)),
            (Float(a), Int(b)) => Ok(Float(a + *b as f64)),
            (Float(a), Float(b)) => Ok(Float(a + b)),
            (Str(a), Str(b)) => Ok(Str(format!("{a}{b}"))),
            (Null, _) | (_, Null) => Ok(Null),
            (a, b) => Err(ExprError::Type(format!(
                "cannot add {} and {}",
                a.kind(),
                b.kind()
            ))),
        }
    }

    pub fn checked_sub(&self, other: &Value) -> Result<Value, ExprError> {
        use Value::*;
        match (self, other) {
            (Int(a), Int(b)) => Ok(Int(a.wrapping_sub(*b))),
            (Null, _) | (_, Null) => Ok(Null),
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => Ok(Float(a - b)),
                _ => Err(ExprError::Type(format!(
                    "cannot subtract {} and {}",
                    self.kind(),
                    other.kind()
                ))),
            },
        }
    }

    pub fn checked_mul(&self, other: &Value) -> Result<Value, ExprError> {
        use Value::*;
        match (self, other) {
            (Int(a), Int(b)) => Ok(Int(a.wrapping_mul(*b))),
            (Null, _) | (_, Null) => Ok(Null),
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => Ok(Float(a * b)),
                _ => Err(ExprError::Type(format!(
                    "cannot multiply {} and {}",
                    self.kind(),
                    other.kind()
                ))),
            },
        }
    }

    pub fn checked_div(&self, other: &Value) -> Result<Value, ExprError> {
        use Value::*;
        if matches!(self, Null) || matches!(other, Null) {
            return Ok(Null);
        }
        match (self.as_f64(), other.as_f64()) {
            (Some(_), Some(b)) if b == 0.0 => Err(ExprError::Type("division by zero".into())),
            (Some(a), Some(b)) => match (self, other) {
                (Int(x), Int(y)) if x % y == 0 => Ok(Int(x / y)),
                _ => Ok(Float(a / b)),
            },
            _ => Err(ExprError::Type(format!(
                "cannot divide {} and {}",
                self.kind(),
                other.kind()
            ))),
        }
    }

    pub fn checked_rem(&self, other: &Value) -> Result<Value, ExprError> {
        use Value::*;
        match (self, other) {
            (Null, _) | (_, Null) => Ok(Null),
            (Int(_), Int(0)) => Err(ExprError::Type("division by zero".into())),
            (Int(a), Int(b)) => Ok(Int(a % b)),
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => Ok(Float(a % b)),
                _ => Err(ExprError::Type(format!(
                    "cannot take remainder of {} and {}",
                    self.kind(),
                    other.kind()
                ))),
            },
        }
    }

    /// Compares two values with the widening rules for comparison operators:
    /// int/float compare numerically, other kinds must match exactly.
    /// Returns `None` when either side is null.
    pub fn compare(&self, other: &Value) -> Result<Option<Ordering>, ExprError> {
        use Value::*;
        match (self, other) {
            (Null, _) | (_, Null) => Ok(None),
            (Int(_) | Float(_), Int(_) | Float(_)) => {
                let a = self.as_f64().unwrap();
                let b = other.as_f64().unwrap();
                Ok(a.partial_cmp(&b))
            }
            (Str(a), Str(b)) => Ok(Some(a.cmp(b))),
            (Bool(a), Bool(b)) => Ok(Some(a.cmp(b))),
            (Date(a), Date(b)) => Ok(Some(a.cmp(b))),
            (DateTime(a), DateTime(b)) => Ok(Some(a.cmp(b))),
            (a, b) => Err(ExprError::Type(format!(
                "cannot compare {} with {}",
                a.kind(),
                b.kind()
            ))),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Str(s) => f.write_str(s),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Value::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S")),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Value::Map(map) => {
                f.write_str("{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                f.write_str("}")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_owned())
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Date(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::DateTime(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::Str(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::Map(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}
