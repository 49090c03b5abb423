//! Receipts Common Library
//!
//! Shared entity types, table schemas, configuration, and DuckDB utilities
//! for the receipts ETL. The pipeline crate normalizes source records into
//! the row types defined here and materializes them using the schemas and
//! DDL helpers from this crate.

pub mod config;
pub mod connection;
pub mod ddl;
pub mod error;
pub mod schemas;
pub mod types;

pub use config::{EtlConfig, MalformedLinePolicy};
pub use connection::create_duckdb_connection;
pub use error::EtlError;
pub use schemas::{
    brands_schema, get_all_table_names, get_schema_for_table, receipt_items_schema,
    receipts_schema, users_schema, BRANDS_TABLE, EXTRA_ATTRIBUTES_COLUMN, RECEIPTS_TABLE,
    RECEIPT_ITEMS_TABLE, USERS_TABLE,
};
pub use types::*;

/// Result type alias for ETL operations
pub type Result<T> = std::result::Result<T, EtlError>;
