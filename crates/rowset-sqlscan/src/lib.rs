//! Grammar-free scanning of generated SQL text.
//!
//! - [`SqlTextScanner`] splits a SQL string into [`ScanToken`]s (plain text, quoted column
//!   references, comments and tagged metadata regions) and reports them to a [`ScanListener`] in
//!   source order. [`rewrite_tagged`] and [`strip_tags`] build on it to edit tagged regions without
//!   touching the surrounding SQL.
//! - [`ColumnTextScanner`] pulls bare column names out of an expression or clause fragment.

#![forbid(unsafe_code)]

mod column;
mod error;
mod scanner;

pub use crate::column::{ColumnRef, ColumnTextScanner};
pub use crate::error::{Result, ScanError};
pub use crate::scanner::{
    rewrite_tagged, scan, scan_with_spans, strip_tags, ScanListener, ScanToken, SqlTextScanner,
    TagKind,
};
