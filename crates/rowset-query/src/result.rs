use rowset_table::Value;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::mem::discriminant;

/// Distinct values offered for a picker, optionally with parallel display labels.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BrowseResult {
    pub values: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<Value>>,
    /// The upstream result had more rows than were read.
    #[serde(default)]
    pub truncated: bool,
}

impl BrowseResult {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Deduplicate and sort plain values.
    pub fn from_values(values: impl IntoIterator<Item = Value>, truncated: bool) -> Self {
        let mut values: Vec<Value> = values.into_iter().collect();
        let cmp = comparator(&values);
        // Stable sort keeps the first occurrence first within each run of equal values.
        values.sort_by(cmp);
        values.dedup_by(|later, first| cmp(later, first).is_eq());
        Self {
            values,
            labels: None,
            truncated,
        }
    }

    /// Deduplicate and sort `(value, label)` pairs; the first label seen for a value wins.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (Value, Value)>, truncated: bool) -> Self {
        let mut pairs: Vec<(Value, Value)> = pairs.into_iter().collect();
        let cmp = comparator(pairs.iter().map(|(value, _)| value));
        pairs.sort_by(|a, b| cmp(&a.0, &b.0));
        pairs.dedup_by(|later, first| cmp(&later.0, &first.0).is_eq());
        let (values, labels) = pairs.into_iter().unzip();
        Self {
            values,
            labels: Some(labels),
            truncated,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Label for the value at `idx`, falling back to the value itself.
    pub fn label(&self, idx: usize) -> Option<&Value> {
        self.labels
            .as_ref()
            .and_then(|labels| labels.get(idx))
            .or_else(|| self.values.get(idx))
    }
}

/// Natural order when every non-empty value has the same type, display order otherwise.
fn comparator<'a>(values: impl IntoIterator<Item = &'a Value>) -> fn(&Value, &Value) -> Ordering {
    let mut kinds = values
        .into_iter()
        .filter(|v| !v.is_empty())
        .map(discriminant);
    let mixed = match kinds.next() {
        Some(first) => kinds.any(|kind| kind != first),
        None => false,
    };
    if mixed {
        Value::compare_display
    } else {
        Value::compare
    }
}
