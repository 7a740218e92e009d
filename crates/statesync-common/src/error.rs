//! Error types for the staged store client.

use thiserror::Error;

/// Errors from staged store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached at all (connect/startup failure).
    #[error("store unreachable: {0}")]
    Unreachable(String),

    /// A backend command failed after the connection was established.
    #[error("store backend error: {0}")]
    Backend(String),

    /// An entry or notification payload could not be decoded.
    #[error("invalid store data: {0}")]
    InvalidData(String),

    /// A write used an attribute name the table schema does not allow.
    #[error("schema violation in table {table}: unknown attribute {attribute}")]
    SchemaViolation { table: String, attribute: String },
}

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
