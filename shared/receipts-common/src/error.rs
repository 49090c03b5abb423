//! Error types for the receipts ETL

use thiserror::Error;

/// Fatal ETL errors
///
/// Per-cell coercion failures are not errors; they degrade to null and are
/// reported as [`crate::types::CoercionWarning`].
#[derive(Error, Debug)]
pub enum EtlError {
    /// A source line is not a valid JSON object
    #[error("Malformed record in {source_name} at line {line}: {message}")]
    MalformedRecord {
        source_name: String,
        line: usize,
        message: String,
    },

    /// A required top-level key is absent from every row of a non-empty source
    #[error("Required column '{column}' is absent from every row of {table}")]
    MissingColumn { table: String, column: String },

    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(String),

    /// Schema mismatch
    #[error("Schema error: {0}")]
    Schema(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// DuckDB database error
    #[error("DuckDB error: {0}")]
    DuckDB(String),

    /// Analytical query error
    #[error("Query error: {0}")]
    Query(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<std::io::Error> for EtlError {
    fn from(err: std::io::Error) -> Self {
        EtlError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for EtlError {
    fn from(err: serde_json::Error) -> Self {
        EtlError::Serialization(err.to_string())
    }
}

impl From<duckdb::Error> for EtlError {
    fn from(err: duckdb::Error) -> Self {
        EtlError::DuckDB(err.to_string())
    }
}
