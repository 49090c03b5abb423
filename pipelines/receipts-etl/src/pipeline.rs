//! ETL run orchestration
//!
//! load → normalize → extract items → dedup → duplicate-key scan →
//! materialize → analytical queries. Each stage logs a one-line summary;
//! [`RunReport`] collects the counts for the JSON report.

use chrono::{DateTime, Utc};
use duckdb::Connection;
use receipts_common::{
    create_duckdb_connection, Brand, DuplicateKeyAnomaly, Entity, EtlConfig, EtlError, Receipt,
    ReceiptItem, Result, User, BRANDS_TABLE, RECEIPTS_TABLE, RECEIPT_ITEMS_TABLE, USERS_TABLE,
};
use serde::Serialize;
use std::fs;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, enabled, info, warn, Level};
use uuid::Uuid;

use crate::dedup::{dedup_rows, find_duplicate_keys, DedupOutcome};
use crate::extractor::extract_receipt_items;
use crate::loader::{load_jsonl_file, RawTable};
use crate::materializer::TableMaterializer;
use crate::normalizer::{
    normalize_brands, normalize_receipts, normalize_users, CoercionLog, NormalizedRows,
};
use crate::queries::{run_all, QueryOutcome};

/// The three raw sources of one run
#[derive(Debug, Clone)]
pub struct SourceTables {
    pub users: RawTable,
    pub brands: RawTable,
    pub receipts: RawTable,
}

/// The four normalized, deduplicated entity tables
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedTables {
    pub users: Vec<User>,
    pub brands: Vec<Brand>,
    pub receipts: Vec<Receipt>,
    pub receipt_items: Vec<ReceiptItem>,
}

/// Row accounting for one table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableReport {
    pub table: String,
    /// Non-blank source lines (items: extracted list elements)
    pub source_lines: usize,
    pub skipped_lines: usize,
    pub dropped_missing_key: usize,
    pub rows_before_dedup: usize,
    pub rows_after_dedup: usize,
    /// Rows in the DuckDB relation; `None` until materialized
    pub rows_loaded: Option<usize>,
}

impl TableReport {
    fn new<T>(
        table: &str,
        source: Option<&RawTable>,
        dropped: usize,
        dedup: &DedupOutcome<T>,
    ) -> Self {
        let rows_after_dedup = dedup.rows.len();
        Self {
            table: table.to_string(),
            source_lines: source
                .map(|s| s.source_lines)
                .unwrap_or(rows_after_dedup + dedup.removed),
            skipped_lines: source.map(|s| s.skipped_lines).unwrap_or(0),
            dropped_missing_key: dropped,
            rows_before_dedup: rows_after_dedup + dedup.removed,
            rows_after_dedup,
            rows_loaded: None,
        }
    }
}

/// Everything the transform produces before touching a database
#[derive(Debug, Clone)]
pub struct TransformOutput {
    pub tables: NormalizedTables,
    pub reports: Vec<TableReport>,
    pub coercions: CoercionLog,
    pub anomalies: Vec<DuplicateKeyAnomaly>,
}

/// Summary of a complete run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub tables: Vec<TableReport>,
    pub coercions: CoercionLog,
    pub anomalies: Vec<DuplicateKeyAnomaly>,
    pub queries: Vec<QueryOutcome>,
}

impl RunReport {
    pub fn table(&self, name: &str) -> Option<&TableReport> {
        self.tables.iter().find(|t| t.table == name)
    }

    /// Write the report as pretty-printed JSON
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).map_err(|e| {
            EtlError::Io(format!("Failed to write report {}: {}", path.display(), e))
        })?;
        info!("Wrote run report to {}", path.display());
        Ok(())
    }
}

fn finish_table<T: Entity>(
    rows: NormalizedRows<T>,
    source: Option<&RawTable>,
    reports: &mut Vec<TableReport>,
) -> Result<Vec<T>> {
    let dedup = dedup_rows(rows.rows)?;
    let report = TableReport::new(T::TABLE, source, rows.dropped_missing_key, &dedup);
    info!(
        "{}: {} rows ({} duplicates removed, {} dropped for missing key)",
        T::TABLE,
        report.rows_after_dedup,
        dedup.removed,
        report.dropped_missing_key
    );
    reports.push(report);
    Ok(dedup.rows)
}

fn log_preview<T: Serialize>(table: &str, rows: &[T], limit: usize) {
    if limit == 0 || !enabled!(Level::DEBUG) {
        return;
    }
    debug!("{} preview ({} of {} rows):", table, rows.len().min(limit), rows.len());
    for row in rows.iter().take(limit) {
        match serde_json::to_string(row) {
            Ok(json) => debug!("  {}", json),
            Err(e) => debug!("  <unprintable row: {}>", e),
        }
    }
}

/// Drives one ETL run from the sources named in an [`EtlConfig`]
pub struct EtlPipeline {
    config: EtlConfig,
}

impl EtlPipeline {
    pub fn new(config: EtlConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EtlConfig {
        &self.config
    }

    /// Read the three NDJSON sources
    pub fn load_sources(&self) -> Result<SourceTables> {
        let policy = self.config.malformed_lines;
        Ok(SourceTables {
            users: load_jsonl_file(&self.config.users_path, USERS_TABLE, policy)?,
            brands: load_jsonl_file(&self.config.brands_path, BRANDS_TABLE, policy)?,
            receipts: load_jsonl_file(&self.config.receipts_path, RECEIPTS_TABLE, policy)?,
        })
    }

    /// Load and transform without a database
    pub fn transform(&self) -> Result<TransformOutput> {
        let sources = self.load_sources()?;
        self.transform_sources(&sources)
    }

    /// Normalize, extract, dedup and scan already-loaded sources
    pub fn transform_sources(&self, sources: &SourceTables) -> Result<TransformOutput> {
        let start = Instant::now();
        let mut coercions = CoercionLog::new();
        let mut reports = Vec::with_capacity(4);

        let users = normalize_users(&sources.users, &mut coercions)?;
        let brands = normalize_brands(&sources.brands, &mut coercions)?;
        let receipts = normalize_receipts(&sources.receipts, &mut coercions)?;
        let items = NormalizedRows {
            rows: extract_receipt_items(&sources.receipts, &mut coercions),
            dropped_missing_key: 0,
        };

        let tables = NormalizedTables {
            users: finish_table(users, Some(&sources.users), &mut reports)?,
            brands: finish_table(brands, Some(&sources.brands), &mut reports)?,
            receipts: finish_table(receipts, Some(&sources.receipts), &mut reports)?,
            receipt_items: finish_table(items, None, &mut reports)?,
        };

        let mut anomalies = find_duplicate_keys(&tables.users);
        anomalies.extend(find_duplicate_keys(&tables.brands));
        anomalies.extend(find_duplicate_keys(&tables.receipts));

        if !coercions.is_empty() {
            warn!("{} cells failed type coercion", coercions.total());
            coercions.log_summary();
        }

        let preview = self.config.preview_rows;
        log_preview(USERS_TABLE, &tables.users, preview);
        log_preview(BRANDS_TABLE, &tables.brands, preview);
        log_preview(RECEIPTS_TABLE, &tables.receipts, preview);
        log_preview(RECEIPT_ITEMS_TABLE, &tables.receipt_items, preview);

        info!("Transform completed in {}ms", start.elapsed().as_millis());
        Ok(TransformOutput {
            tables,
            reports,
            coercions,
            anomalies,
        })
    }

    /// Full run against a connection opened from the config
    pub fn run(&self) -> Result<RunReport> {
        let conn = create_duckdb_connection(&self.config)?;
        self.run_with_connection(&conn)
    }

    /// Full run against an existing connection
    pub fn run_with_connection(&self, conn: &Connection) -> Result<RunReport> {
        let run_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        info!("Starting ETL run {}", run_id);

        let sources = self.load_sources()?;
        let output = self.transform_sources(&sources)?;
        let TransformOutput {
            tables,
            mut reports,
            coercions,
            anomalies,
        } = output;

        let materializer = TableMaterializer::new(self.config.clone(), run_id.as_str());
        let loaded = [
            materializer.materialize(conn, &tables.users)?,
            materializer.materialize(conn, &tables.brands)?,
            materializer.materialize(conn, &tables.receipts)?,
            materializer.materialize(conn, &tables.receipt_items)?,
        ];
        for (report, rows) in reports.iter_mut().zip(loaded) {
            report.rows_loaded = Some(rows);
        }

        let queries = if self.config.run_queries {
            run_all(conn, &self.config)?
        } else {
            info!("Analytical queries disabled");
            Vec::new()
        };

        info!(
            "ETL run {} finished: {} tables, {} coercion warnings, {} duplicate-key anomalies, {} queries",
            run_id,
            reports.len(),
            coercions.total(),
            anomalies.len(),
            queries.len()
        );

        Ok(RunReport {
            run_id,
            started_at,
            tables: reports,
            coercions,
            anomalies,
            queries,
        })
    }
}
