//! Error types for SQLite storage

use cairn_core::CoreError;
use thiserror::Error;

/// SQLite storage error type
#[derive(Error, Debug)]
pub enum SqliteError {
    /// Database connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Update or delete of a model without an id
    #[error("Missing model id")]
    MissingId,

    /// Entity not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid operation
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Field path could not be resolved (unknown field, invalid relation hop, disallowed shape)
    #[error("Resolve error: {0}")]
    Resolve(String),

    /// Filter or sort expression could not be parsed or compiled
    #[error("Filter error: {0}")]
    Filter(String),

    /// Schema/migration error
    #[error("Schema error: {0}")]
    Schema(String),

    /// Statement interrupted by its deadline
    #[error("Query timed out: {0}")]
    Timeout(String),

    /// Invalid configuration
    #[error("Config error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Schema model error
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Underlying rusqlite error
    #[error("SQLite error: {0}")]
    Rusqlite(#[from] rusqlite::Error),
}

/// Result type for SQLite operations
pub type SqliteResult<T> = Result<T, SqliteError>;

impl SqliteError {
    /// Transient single-writer contention, worth retrying
    pub fn is_lock_error(&self) -> bool {
        let message = self.to_string().to_lowercase();
        message.contains("database is locked") || message.contains("table is locked")
    }
}
