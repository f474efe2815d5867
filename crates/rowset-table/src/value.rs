use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Semantic type tag tracked per column.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    /// No non-null value has been seen yet.
    #[default]
    Unknown,
    String,
    Number,
    Boolean,
    Date,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v", rename_all = "lowercase")]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    /// JSON has no NaN; non-finite numbers serialize as `null` and read back as NaN.
    #[serde(deserialize_with = "number_or_nan")]
    Number(f64),
    Text(Arc<str>),
    Date(NaiveDateTime),
}

fn number_or_nan<'de, D: serde::Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    Ok(Option::<f64>::deserialize(d)?.unwrap_or(f64::NAN))
}

impl Value {
    pub fn text(s: impl AsRef<str>) -> Self {
        Value::Text(Arc::from(s.as_ref()))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// `Null` and empty text both count as "empty" for browse sorting.
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Text(s) => s.is_empty(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// The column type this value implies, or `None` for `Null`.
    pub fn column_type(&self) -> Option<ColumnType> {
        match self {
            Value::Null => None,
            Value::Bool(_) => Some(ColumnType::Boolean),
            Value::Number(_) => Some(ColumnType::Number),
            Value::Text(_) => Some(ColumnType::String),
            Value::Date(_) => Some(ColumnType::Date),
        }
    }

    fn empty_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Text(s) if s.is_empty() => 1,
            _ => 2,
        }
    }

    fn variant_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::Text(_) => 3,
            Value::Date(_) => 4,
        }
    }

    /// Type-aware total order used for sorting distinct values.
    ///
    /// Empty values sort first (`Null` before `""`). Values of the same type use their natural
    /// order; values of different types are ordered by type (booleans, numbers, text, dates).
    pub fn compare(&self, other: &Value) -> Ordering {
        let ranks = self.empty_rank().cmp(&other.empty_rank());
        if ranks != Ordering::Equal || self.empty_rank() < 2 {
            return ranks;
        }

        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Number(a), Value::Number(b)) => a.total_cmp(b),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (Value::Date(a), Value::Date(b)) => a.cmp(b),
            _ => self.variant_rank().cmp(&other.variant_rank()),
        }
    }

    /// Total order on display strings, for sets that mix types.
    ///
    /// Empty values still sort first. Equal display strings are ordered by type, then by
    /// [`Value::compare`].
    pub fn compare_display(&self, other: &Value) -> Ordering {
        let ranks = self.empty_rank().cmp(&other.empty_rank());
        if ranks != Ordering::Equal || self.empty_rank() < 2 {
            return ranks;
        }

        self.to_string()
            .cmp(&other.to_string())
            .then_with(|| self.variant_rank().cmp(&other.variant_rank()))
            .then_with(|| self.compare(other))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::Text(s) => f.write_str(s),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d %H:%M:%S")),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::text(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(Arc::from(s))
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(d: NaiveDateTime) -> Self {
        Value::Date(d)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}
