//! Streaming row tables for query results.
//!
//! This crate focuses on:
//! - [`SwapTable`]: an append-only row table that one producer fills while any number of readers
//!   consume it. Rows beyond an in-memory budget are paged out to an anonymous temp file.
//! - [`StreamingTableView`]: adapts an upstream [`RowCursor`] (or a [`TreeNode`] result) into a
//!   `SwapTable`, optionally on a background thread, honouring row caps and cancellation.
//!
//! Row 0 of every table is the header row (column names). Data rows start at table index 1.

#![forbid(unsafe_code)]

mod cursor;
mod error;
mod spill;
mod table;
mod value;
mod view;

pub use crate::cursor::{CursorCancel, RowCursor, TreeCursor, TreeNode, VecCursor};
pub use crate::error::{Result, TableError};
pub use crate::table::{LoadState, Row, SwapTable, SwapTableConfig, SwapTableStats};
pub use crate::value::{ColumnType, Value};
pub use crate::view::{LoadOutcome, RowCountMonitor, StreamingTableView, ViewCancelHandle, ViewOptions};
