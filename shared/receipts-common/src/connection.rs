//! DuckDB connection management
//!
//! Opens the columnar store that receives the normalized tables, either
//! in-memory or backed by a database file, and applies the resource
//! settings from [`EtlConfig`].

use duckdb::Connection;
use tracing::{debug, info, warn};

use crate::config::EtlConfig;
use crate::error::EtlError;

/// Create a DuckDB connection configured for the ETL run
///
/// # Example
/// ```no_run
/// use receipts_common::{EtlConfig, create_duckdb_connection};
///
/// let config = EtlConfig::default();
/// let conn = create_duckdb_connection(&config).unwrap();
/// ```
pub fn create_duckdb_connection(config: &EtlConfig) -> Result<Connection, EtlError> {
    let conn = match &config.database_path {
        Some(path) => {
            info!("Opening DuckDB database file {}", path);
            Connection::open(path)
        }
        None => {
            info!("Opening DuckDB in-memory database");
            Connection::open_in_memory()
        }
    }
    .map_err(|e| {
        warn!("Failed to open DuckDB connection: {}", e);
        EtlError::DuckDB(e.to_string())
    })?;

    conn.execute_batch(&format!(
        "SET memory_limit = '{}MB';
         SET threads = {};
         SET temp_directory = '{}';
         SET autoinstall_known_extensions = false;
         SET autoload_known_extensions = false;",
        config.memory_limit_mb,
        config.threads,
        config.temp_directory.replace('\'', "''")
    ))
    .map_err(|e| EtlError::Config(format!("Failed to configure DuckDB: {}", e)))?;
    debug!(
        "DuckDB settings applied (memory={}MB, threads={}, temp_dir={})",
        config.memory_limit_mb, config.threads, config.temp_directory
    );

    // read_json lives in the json extension, which is linked in. Nothing is
    // ever downloaded at runtime.
    if let Err(e) = conn.execute_batch("LOAD json;") {
        warn!("Could not load json extension eagerly (continuing): {}", e);
    }

    Ok(conn)
}
