use thiserror::Error;

#[derive(Debug, Error)]
pub enum TableError {
    /// The upstream producer failed mid-stream.
    #[error("producer failed: {0}")]
    Producer(String),
    #[error("table is already complete; no further rows may be appended")]
    Completed,
    #[error("row has {actual} cells but the table has {expected} columns")]
    RowWidth { expected: usize, actual: usize },
    #[error("spill io error: {0}")]
    Spill(#[from] std::io::Error),
    #[error("spill codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl TableError {
    pub fn producer(message: impl Into<String>) -> Self {
        TableError::Producer(message.into())
    }
}

pub type Result<T> = std::result::Result<T, TableError>;
