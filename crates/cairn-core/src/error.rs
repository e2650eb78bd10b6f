//! Error types for the schema model

use thiserror::Error;

/// Errors raised while building or validating collections, fields and records
#[derive(Error, Debug)]
pub enum CoreError {
    /// Options payload does not decode into the options of the field type
    #[error("Invalid options for field {field:?}: {reason}")]
    InvalidFieldOptions { field: String, reason: String },

    /// Unknown field type tag
    #[error("Unknown field type: {0}")]
    UnknownFieldType(String),

    /// Unknown collection type tag
    #[error("Unknown collection type: {0}")]
    UnknownCollectionType(String),

    /// Field definition violates a schema rule
    #[error("Invalid field {field:?}: {reason}")]
    InvalidField { field: String, reason: String },

    /// Two fields share the same id or name
    #[error("Duplicate field {0:?}")]
    DuplicateField(String),

    /// Collection definition violates a schema rule
    #[error("Invalid collection: {0}")]
    InvalidCollection(String),

    /// Malformed date/time value
    #[error("Invalid datetime: {0}")]
    InvalidDateTime(String),

    /// JSON encode/decode failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for schema model operations
pub type CoreResult<T> = Result<T, CoreError>;
