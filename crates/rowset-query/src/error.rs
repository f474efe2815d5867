use rowset_table::TableError;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct CancelError(pub String);

impl CancelError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("table error: {0}")]
    Table(#[from] TableError),
    #[error("could not resolve browse source {source_name}::{column}: {message}")]
    Resolve {
        source_name: String,
        column: String,
        message: String,
    },
    #[error("column {0} not found in browse result")]
    ColumnNotFound(String),
    #[error("query was cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, QueryError>;
