//! Receipts ETL binary entry point
//!
//! Loads the three sources named by `RECEIPTS_ETL_*_PATH`, materializes
//! the normalized tables and prints every analytical query result.

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use receipts_etl::{EtlConfig, EtlPipeline, QueryCategory};

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::from_default_env()
                .add_directive("receipts_etl=info".parse()?)
                .add_directive("receipts_common=info".parse()?)
                .add_directive("duckdb=warn".parse()?),
        )
        .init();

    info!("Receipts ETL - Starting");

    let config = EtlConfig::from_env().context("Failed to load configuration")?;
    info!(
        "Sources: users={}, brands={}, receipts={}",
        config.users_path, config.brands_path, config.receipts_path
    );
    info!(
        "Database: {}",
        config.database_path.as_deref().unwrap_or("in-memory")
    );

    let report_path = config.report_path.clone();
    let pipeline = EtlPipeline::new(config);
    let report = pipeline.run().context("ETL run failed")?;

    for table in &report.tables {
        info!(
            "{}: {} source lines, {} skipped, {} dropped, {} rows loaded",
            table.table,
            table.source_lines,
            table.skipped_lines,
            table.dropped_missing_key,
            table.rows_loaded.unwrap_or(0)
        );
    }
    for anomaly in &report.anomalies {
        warn!(
            "Duplicate key {} in {} ({} rows)",
            anomaly.key, anomaly.table, anomaly.row_count
        );
    }

    for category in [QueryCategory::Business, QueryCategory::DataQuality] {
        let outcomes: Vec<_> = report
            .queries
            .iter()
            .filter(|q| q.category == category)
            .collect();
        if outcomes.is_empty() {
            continue;
        }
        println!("==== {} queries ====\n", category);
        for outcome in outcomes {
            println!("results from {}", outcome.name);
            println!("{}\n", outcome.render_table());
        }
    }

    if let Some(path) = report_path {
        report
            .write_json(&path)
            .with_context(|| format!("Failed to write report to {}", path))?;
    }

    info!("Receipts ETL - Finished run {}", report.run_id);
    Ok(())
}
