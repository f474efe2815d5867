use crate::error::Result;
use crate::table::Row;
use crate::value::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Stop hook exposed by producers that can abort their own upstream work.
pub trait CursorCancel: Send + Sync {
    fn cancel(&self);
}

/// Row-at-a-time upstream producer.
///
/// Column metadata must be available before the first [`RowCursor::advance`], the way a result
/// set's metadata is. `value` reads the current row after `advance` returned `true`.
pub trait RowCursor: Send {
    fn advance(&mut self) -> Result<bool>;

    fn column_count(&self) -> usize;

    fn column_name(&self, index: usize) -> String;

    fn value(&self, index: usize) -> Value;

    /// Hook used by [`crate::StreamingTableView::cancel`] while the cursor is owned by the loader.
    fn cancel_hook(&self) -> Option<Arc<dyn CursorCancel>> {
        None
    }

    /// Row limit the producer enforced on its own, if any.
    fn applied_row_limit(&self) -> Option<usize> {
        None
    }
}

/// In-memory cursor over pre-built rows.
#[derive(Debug, Clone)]
pub struct VecCursor {
    columns: Vec<String>,
    rows: std::vec::IntoIter<Row>,
    current: Option<Row>,
    row_limit: Option<usize>,
}

impl VecCursor {
    pub fn new(columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self {
            columns,
            rows: rows.into_iter(),
            current: None,
            row_limit: None,
        }
    }

    /// Truncate to `limit` rows, reporting it through [`RowCursor::applied_row_limit`].
    pub fn with_row_limit(mut self, limit: usize) -> Self {
        let rows: Vec<Row> = self.rows.by_ref().take(limit).collect();
        self.rows = rows.into_iter();
        self.row_limit = Some(limit);
        self
    }
}

impl RowCursor for VecCursor {
    fn advance(&mut self) -> Result<bool> {
        self.current = self.rows.next();
        Ok(self.current.is_some())
    }

    fn column_count(&self) -> usize {
        self.columns.len()
    }

    fn column_name(&self, index: usize) -> String {
        self.columns.get(index).cloned().unwrap_or_default()
    }

    fn value(&self, index: usize) -> Value {
        self.current
            .as_ref()
            .and_then(|row| row.get(index))
            .cloned()
            .unwrap_or_default()
    }

    fn applied_row_limit(&self) -> Option<usize> {
        self.row_limit
    }
}

/// Generic hierarchical result: the root's children are rows, their children are fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TreeNode {
    pub name: String,
    pub value: Value,
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Value::Null,
            children: Vec::new(),
        }
    }

    pub fn leaf(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            children: Vec::new(),
        }
    }

    pub fn with_child(mut self, child: TreeNode) -> Self {
        self.children.push(child);
        self
    }
}

/// Cursor over a [`TreeNode`] result.
///
/// The header comes from the first row node's field names; later rows are matched by field
/// name, and fields they lack read as `Null`.
#[derive(Debug, Clone)]
pub struct TreeCursor {
    inner: VecCursor,
}

impl TreeCursor {
    pub fn new(root: &TreeNode) -> Self {
        let columns: Vec<String> = root
            .children
            .first()
            .map(|first| first.children.iter().map(|f| f.name.clone()).collect())
            .unwrap_or_default();

        let positions: HashMap<&str, usize> = columns
            .iter()
            .enumerate()
            .rev()
            .map(|(idx, name)| (name.as_str(), idx))
            .collect();

        let rows = root
            .children
            .iter()
            .map(|node| {
                let mut row = vec![Value::Null; columns.len()];
                for field in &node.children {
                    if let Some(&idx) = positions.get(field.name.as_str()) {
                        row[idx] = field.value.clone();
                    }
                }
                row
            })
            .collect();

        Self {
            inner: VecCursor::new(columns, rows),
        }
    }
}

impl RowCursor for TreeCursor {
    fn advance(&mut self) -> Result<bool> {
        self.inner.advance()
    }

    fn column_count(&self) -> usize {
        self.inner.column_count()
    }

    fn column_name(&self, index: usize) -> String {
        self.inner.column_name(index)
    }

    fn value(&self, index: usize) -> Value {
        self.inner.value(index)
    }
}
