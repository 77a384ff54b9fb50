use std::io;

use thiserror::Error;

/// Failures raised by ledger and audit stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("table not found: {0}")]
    TableNotFound(String),
    #[error("invalid table name `{0}`: use lowercase letters, digits and underscores")]
    InvalidTableName(String),
    #[error("transaction not found: {0}")]
    TransactionNotFound(u64),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Serialization error: {0}")]
    Serde(String),
}

impl StoreError {
    /// Whether retrying later could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Io(_))
    }
}
