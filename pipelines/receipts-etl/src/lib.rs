//! Receipts ETL
//!
//! Normalizes the users, brands, and receipts JSON-lines exports into four
//! relational tables and answers the analytical query set over them.
//!
//! Stages:
//! - `loader`: one record per non-blank line, malformed-line policy
//! - `normalizer`: wrapper unwrapping, type coercion, open attribute map
//! - `extractor`: receipt item lists exploded into `receiptItems`
//! - `dedup`: exact-duplicate removal, duplicate-key scan
//! - `materializer`: bulk load into DuckDB
//! - `queries`: business questions and data-quality scans
//!
//! Configuration via environment variables (`RECEIPTS_ETL_*`), see
//! [`receipts_common::EtlConfig`].

pub mod dedup;
pub mod extractor;
pub mod loader;
pub mod materializer;
pub mod normalizer;
pub mod pipeline;
pub mod queries;

pub use dedup::{dedup_rows, find_duplicate_keys, DedupOutcome};
pub use extractor::{extract_receipt_items, ItemFanOut};
pub use loader::{load_jsonl_file, load_jsonl_reader, RawRecord, RawTable};
pub use materializer::TableMaterializer;
pub use normalizer::{
    canonical_barcode, coerce_timestamp, normalize_brands, normalize_receipts, normalize_users,
    unwrap_identifier, CoercionLog, NormalizedRows,
};
pub use pipeline::{
    EtlPipeline, NormalizedTables, RunReport, SourceTables, TableReport, TransformOutput,
};
pub use queries::{
    find_query, run_all, run_query, verify_loaded_tables, AnalyticalQuery, QueryCategory,
    QueryOutcome, QueryParam, ANALYTICAL_QUERIES,
};

// Re-export common types
pub use receipts_common::{
    create_duckdb_connection, EtlConfig, EtlError, MalformedLinePolicy, Result,
};
