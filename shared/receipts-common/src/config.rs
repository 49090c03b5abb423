//! Configuration for the receipts ETL
//!
//! Values come from `RECEIPTS_ETL_*` environment variables (a `.env` file is
//! loaded first when present) or from a lower-case properties map with the
//! same key names, e.g. `receipts_etl_users_path`.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::str::FromStr;

/// What the loader does with a line that is not a valid JSON object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MalformedLinePolicy {
    /// Fail the whole load with `EtlError::MalformedRecord`
    Abort,
    /// Log a warning, count the line, keep going
    Skip,
}

impl FromStr for MalformedLinePolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "abort" => Ok(Self::Abort),
            "skip" => Ok(Self::Skip),
            other => Err(anyhow::anyhow!(
                "Unknown malformed line policy '{}' (expected 'abort' or 'skip')",
                other
            )),
        }
    }
}

impl fmt::Display for MalformedLinePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Abort => write!(f, "abort"),
            Self::Skip => write!(f, "skip"),
        }
    }
}

/// Receipts ETL configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EtlConfig {
    // Sources
    /// Users NDJSON file
    pub users_path: String,
    /// Brands NDJSON file
    pub brands_path: String,
    /// Receipts NDJSON file
    pub receipts_path: String,
    /// Malformed line handling
    pub malformed_lines: MalformedLinePolicy,

    // DuckDB settings
    /// Database file; `None` keeps everything in memory
    pub database_path: Option<String>,
    /// Memory limit in MB
    pub memory_limit_mb: usize,
    /// Number of DuckDB threads
    pub threads: usize,
    /// Staging directory for NDJSON bulk loads
    pub temp_directory: String,

    // Analytical query parameters
    /// Anchor date for "users created within the past N months"
    pub reference_date: NaiveDate,
    /// Window length in months for the recent-user leaderboards
    pub recent_user_months: u32,
    /// Item count above which a receipt is flagged
    pub high_item_count: u32,
    /// Receipt count above which a user is flagged
    pub high_receipt_count: u32,
    /// Run the analytical query set after loading
    pub run_queries: bool,

    // Output
    /// Optional JSON run report destination
    pub report_path: Option<String>,
    /// Rows per table logged at debug level after normalization
    pub preview_rows: usize,
}

fn default_reference_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2021, 2, 28).unwrap_or_default()
}

fn default_temp_directory() -> String {
    env::temp_dir().to_string_lossy().into_owned()
}

impl EtlConfig {
    /// Load configuration from a properties map
    ///
    /// Keys are the lower-case forms of the environment variables, e.g.
    /// `receipts_etl_users_path`, `receipts_etl_malformed_lines`.
    pub fn from_properties(props: &HashMap<String, String>) -> Result<Self> {
        Self::from_lookup(|key| props.get(&key.to_ascii_lowercase()).cloned())
    }

    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - RECEIPTS_ETL_USERS_PATH, RECEIPTS_ETL_BRANDS_PATH, RECEIPTS_ETL_RECEIPTS_PATH
    /// - RECEIPTS_ETL_MALFORMED_LINES (abort | skip)
    /// - RECEIPTS_ETL_DATABASE_PATH, RECEIPTS_ETL_MEMORY_LIMIT_MB, RECEIPTS_ETL_THREADS
    /// - RECEIPTS_ETL_TEMP_DIR
    /// - RECEIPTS_ETL_REFERENCE_DATE (YYYY-MM-DD), RECEIPTS_ETL_RECENT_USER_MONTHS
    /// - RECEIPTS_ETL_HIGH_ITEM_COUNT, RECEIPTS_ETL_HIGH_RECEIPT_COUNT
    /// - RECEIPTS_ETL_RUN_QUERIES, RECEIPTS_ETL_REPORT_PATH, RECEIPTS_ETL_PREVIEW_ROWS
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let users_path = lookup("RECEIPTS_ETL_USERS_PATH").unwrap_or(defaults.users_path);
        let brands_path = lookup("RECEIPTS_ETL_BRANDS_PATH").unwrap_or(defaults.brands_path);
        let receipts_path =
            lookup("RECEIPTS_ETL_RECEIPTS_PATH").unwrap_or(defaults.receipts_path);
        let malformed_lines = match lookup("RECEIPTS_ETL_MALFORMED_LINES") {
            Some(value) => value
                .parse()
                .context("Invalid RECEIPTS_ETL_MALFORMED_LINES")?,
            None => defaults.malformed_lines,
        };

        let database_path = lookup("RECEIPTS_ETL_DATABASE_PATH").filter(|p| !p.is_empty());
        let memory_limit_mb = lookup("RECEIPTS_ETL_MEMORY_LIMIT_MB")
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.memory_limit_mb);
        let threads = lookup("RECEIPTS_ETL_THREADS")
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.threads);
        let temp_directory = lookup("RECEIPTS_ETL_TEMP_DIR").unwrap_or(defaults.temp_directory);

        let reference_date = match lookup("RECEIPTS_ETL_REFERENCE_DATE") {
            Some(value) => NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
                .with_context(|| format!("Invalid RECEIPTS_ETL_REFERENCE_DATE: {}", value))?,
            None => defaults.reference_date,
        };
        let recent_user_months = lookup("RECEIPTS_ETL_RECENT_USER_MONTHS")
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.recent_user_months);
        let high_item_count = lookup("RECEIPTS_ETL_HIGH_ITEM_COUNT")
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.high_item_count);
        let high_receipt_count = lookup("RECEIPTS_ETL_HIGH_RECEIPT_COUNT")
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.high_receipt_count);
        let run_queries = lookup("RECEIPTS_ETL_RUN_QUERIES")
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.run_queries);

        let report_path = lookup("RECEIPTS_ETL_REPORT_PATH").filter(|p| !p.is_empty());
        let preview_rows = lookup("RECEIPTS_ETL_PREVIEW_ROWS")
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.preview_rows);

        let config = Self {
            users_path,
            brands_path,
            receipts_path,
            malformed_lines,
            database_path,
            memory_limit_mb,
            threads,
            temp_directory,
            reference_date,
            recent_user_months,
            high_item_count,
            high_receipt_count,
            run_queries,
            report_path,
            preview_rows,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        for (name, path) in [
            ("users", &self.users_path),
            ("brands", &self.brands_path),
            ("receipts", &self.receipts_path),
        ] {
            if path.trim().is_empty() {
                return Err(anyhow::anyhow!("{} source path cannot be empty", name));
            }
        }

        if self.memory_limit_mb == 0 {
            return Err(anyhow::anyhow!("Memory limit must be greater than 0"));
        }
        if self.threads == 0 {
            return Err(anyhow::anyhow!("Thread count must be greater than 0"));
        }
        if self.temp_directory.is_empty() {
            return Err(anyhow::anyhow!("Temp directory cannot be empty"));
        }
        if self.recent_user_months == 0 {
            return Err(anyhow::anyhow!("Recent user window must be at least 1 month"));
        }
        if self.high_item_count == 0 || self.high_receipt_count == 0 {
            return Err(anyhow::anyhow!("Anomaly thresholds must be greater than 0"));
        }

        Ok(())
    }
}

impl Default for EtlConfig {
    fn default() -> Self {
        Self {
            users_path: "Data/users.json".to_string(),
            brands_path: "Data/brands.json".to_string(),
            receipts_path: "Data/receipts.json".to_string(),
            malformed_lines: MalformedLinePolicy::Abort,
            database_path: None,
            memory_limit_mb: 512,
            threads: 4,
            temp_directory: default_temp_directory(),
            reference_date: default_reference_date(),
            recent_user_months: 6,
            high_item_count: 100,
            high_receipt_count: 500,
            run_queries: true,
            report_path: None,
            preview_rows: 5,
        }
    }
}
