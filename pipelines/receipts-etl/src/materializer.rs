//! Table materializer
//!
//! Loads normalized rows into DuckDB relations named after the entities.
//!
//! ## Bulk load
//!
//! Rows are staged as one NDJSON file per table and inserted with a single
//! `INSERT ... SELECT ... FROM read_json(...)`:
//! - the staging file lives in the configured temp directory and is removed
//!   whether or not the insert succeeds
//! - `read_json` gets an explicit column map, so keys absent from a row read
//!   as null and nothing is type-sniffed
//! - timestamps are staged as epoch milliseconds and converted by `epoch_ms`

use arrow_schema::{DataType, Schema};
use duckdb::Connection;
use receipts_common::{
    ddl::{arrow_type_to_duckdb, generate_create_table_ddl},
    Entity, EtlConfig, EtlError, Result, EXTRA_ATTRIBUTES_COLUMN,
};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, error, info, instrument};

/// DuckDB type a column is staged as inside the NDJSON file
fn staged_type(column: &str, data_type: &DataType) -> String {
    match data_type {
        DataType::Timestamp(_, _) => "BIGINT".to_string(),
        _ if column == EXTRA_ATTRIBUTES_COLUMN => "JSON".to_string(),
        other => arrow_type_to_duckdb(other),
    }
}

fn select_expr_for_column(column: &str, data_type: &DataType) -> String {
    match data_type {
        DataType::Timestamp(_, _) => format!("epoch_ms(\"{}\") AS \"{}\"", column, column),
        _ if column == EXTRA_ATTRIBUTES_COLUMN => {
            format!("CAST(\"{}\" AS VARCHAR) AS \"{}\"", column, column)
        }
        _ => format!("\"{}\"", column),
    }
}

/// `columns = {...}` argument for `read_json`
fn build_columns_spec(schema: &Schema) -> String {
    let entries = schema
        .fields()
        .iter()
        .map(|f| {
            format!(
                "'{}': '{}'",
                f.name(),
                staged_type(f.name(), f.data_type())
            )
        })
        .collect::<Vec<_>>()
        .join(", ");
    format!("{{{}}}", entries)
}

fn build_select_exprs(schema: &Schema) -> String {
    schema
        .fields()
        .iter()
        .map(|f| select_expr_for_column(f.name(), f.data_type()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Full bulk-insert statement for one staged file
pub fn build_insert_sql(table: &str, schema: &Schema, staging_path: &Path) -> String {
    let columns_str = schema
        .fields()
        .iter()
        .map(|f| format!("\"{}\"", f.name()))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "INSERT INTO \"{}\" ({}) SELECT {} FROM read_json('{}', format = 'newline_delimited', columns = {})",
        table,
        columns_str,
        build_select_exprs(schema),
        staging_path.display().to_string().replace('\'', "''"),
        build_columns_spec(schema)
    )
}

/// Row count of a materialized relation
pub fn count_rows(conn: &Connection, table: &str) -> Result<usize> {
    let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM \"{}\"", table), [], |row| {
        row.get(0)
    })?;
    usize::try_from(count).map_err(|e| EtlError::DuckDB(format!("Bad row count: {}", e)))
}

/// Writes entity rows into DuckDB, one relation per entity
pub struct TableMaterializer {
    config: EtlConfig,
    run_id: String,
}

impl TableMaterializer {
    pub fn new(config: EtlConfig, run_id: impl Into<String>) -> Self {
        Self {
            config,
            run_id: run_id.into(),
        }
    }

    fn staging_path(&self, table: &str) -> PathBuf {
        Path::new(&self.config.temp_directory)
            .join(format!("receipts_etl_{}_{}.ndjson", table, self.run_id))
    }

    /// (Re)create the relation for `T` and bulk-load `rows` into it
    ///
    /// Returns the number of rows in the relation afterwards.
    #[instrument(skip(self, conn, rows), fields(table = T::TABLE, row_count = rows.len()))]
    pub fn materialize<T: Entity>(&self, conn: &Connection, rows: &[T]) -> Result<usize> {
        let start_time = Instant::now();
        let schema = T::schema();

        let create_table_ddl = generate_create_table_ddl(T::TABLE, &schema);
        debug!("Creating table with DDL: {}", create_table_ddl);
        conn.execute_batch(&create_table_ddl).map_err(|e| {
            EtlError::DuckDB(format!("Failed to create table {}: {}", T::TABLE, e))
        })?;

        if rows.is_empty() {
            info!("No rows for {}, created empty table", T::TABLE);
            return Ok(0);
        }

        let staging_path = self.staging_path(T::TABLE);
        let staged = self.stage_rows(&staging_path, rows);
        let result = staged.and_then(|()| {
            let insert_sql = build_insert_sql(T::TABLE, &schema, &staging_path);
            debug!("Executing bulk INSERT for {} rows", rows.len());
            conn.execute(&insert_sql, []).map_err(|e| {
                error!("Bulk INSERT into {} failed: {}", T::TABLE, e);
                error!(
                    "Failed SQL (truncated): {}...",
                    insert_sql.chars().take(500).collect::<String>()
                );
                EtlError::DuckDB(format!("Failed to load {}: {}", T::TABLE, e))
            })
        });

        // Staging file goes regardless of the outcome
        let _ = fs::remove_file(&staging_path);

        let inserted = result?;
        info!(
            "Loaded {} rows into {} in {:?}",
            inserted,
            T::TABLE,
            start_time.elapsed()
        );
        count_rows(conn, T::TABLE)
    }

    fn stage_rows<T: Entity>(&self, path: &Path, rows: &[T]) -> Result<()> {
        let file = fs::File::create(path).map_err(|e| {
            EtlError::Io(format!(
                "Failed to create staging file {}: {}",
                path.display(),
                e
            ))
        })?;
        let mut writer = BufWriter::new(file);

        for row in rows {
            serde_json::to_writer(&mut writer, row)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;

        debug!("Staged {} rows in {}", rows.len(), path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use receipts_common::{
        create_duckdb_connection, users_schema, ExtraAttributes, ReceiptItem, User,
    };
    use serde_json::json;

    fn test_config(dir: &Path) -> EtlConfig {
        EtlConfig {
            threads: 1,
            temp_directory: dir.display().to_string(),
            ..EtlConfig::default()
        }
    }

    fn user(id: &str) -> User {
        User {
            id: id.to_string(),
            active: Some(true),
            created_date: DateTime::from_timestamp_millis(1_614_556_800_000),
            last_login: None,
            role: Some("consumer".to_string()),
            sign_up_source: Some("Email".to_string()),
            state: Some("WI".to_string()),
            extra_attributes: ExtraAttributes::new(),
        }
    }

    #[test]
    fn test_insert_sql_casts_timestamps_and_extras() {
        let sql = build_insert_sql("users", &users_schema(), Path::new("/tmp/x.ndjson"));
        assert!(sql.starts_with("INSERT INTO \"users\" (\"id\", "));
        assert!(sql.contains("epoch_ms(\"createdDate\") AS \"createdDate\""));
        assert!(sql.contains("CAST(\"extraAttributes\" AS VARCHAR)"));
        assert!(sql.contains("'createdDate': 'BIGINT'"));
        assert!(sql.contains("'extraAttributes': 'JSON'"));
        assert!(sql.contains("'active': 'BOOLEAN'"));
    }

    #[test]
    fn test_materialize_users_round_trips_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let conn = create_duckdb_connection(&config).unwrap();
        let materializer = TableMaterializer::new(config, "test");

        let mut with_extra = user("u2");
        with_extra
            .extra_attributes
            .insert("nickname".to_string(), json!("bob"));

        let loaded = materializer
            .materialize(&conn, &[user("u1"), with_extra])
            .unwrap();
        assert_eq!(loaded, 2);

        let millis: i64 = conn
            .query_row(
                "SELECT epoch_ms(\"createdDate\") FROM users WHERE id = 'u1'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(millis, 1_614_556_800_000);

        let extra: Option<String> = conn
            .query_row(
                "SELECT \"extraAttributes\" FROM users WHERE id = 'u2'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert!(extra.unwrap().contains("nickname"));

        assert!(!dir.path().join("receipts_etl_users_test.ndjson").exists());
    }

    #[test]
    fn test_empty_rows_create_empty_table() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let conn = create_duckdb_connection(&config).unwrap();
        let materializer = TableMaterializer::new(config, "test");

        let loaded = materializer
            .materialize::<ReceiptItem>(&conn, &[])
            .unwrap();
        assert_eq!(loaded, 0);
        assert_eq!(count_rows(&conn, "receiptItems").unwrap(), 0);
    }

    #[test]
    fn test_rematerialize_replaces_previous_rows() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let conn = create_duckdb_connection(&config).unwrap();
        let materializer = TableMaterializer::new(config, "test");

        materializer
            .materialize(&conn, &[user("u1"), user("u2")])
            .unwrap();
        let loaded = materializer.materialize(&conn, &[user("u3")]).unwrap();
        assert_eq!(loaded, 1);
    }

    #[test]
    fn test_duplicate_keys_survive_load() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let conn = create_duckdb_connection(&config).unwrap();
        let materializer = TableMaterializer::new(config, "test");

        let mut other_state = user("u1");
        other_state.state = Some("AL".to_string());
        let loaded = materializer
            .materialize(&conn, &[user("u1"), other_state])
            .unwrap();
        assert_eq!(loaded, 2);
    }
}
