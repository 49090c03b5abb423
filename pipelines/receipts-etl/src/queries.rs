//! Analytical query set
//!
//! Fixed statements over the four normalized relations: the business
//! questions and the data-quality scans. Thresholds and the reference date
//! come from [`EtlConfig`] and are bound as positional parameters.

use chrono::{DateTime, NaiveDate, Utc};
use duckdb::types::{TimeUnit, Value};
use duckdb::{params_from_iter, Connection};
use receipts_common::{
    get_all_table_names, get_schema_for_table, EtlConfig, EtlError, Result,
};
use serde::Serialize;
use serde_json::{Number, Value as JsonValue};
use std::fmt;
use std::time::Instant;
use tracing::{debug, info, instrument};

/// What a query answers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryCategory {
    Business,
    DataQuality,
}

impl fmt::Display for QueryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryCategory::Business => write!(f, "business"),
            QueryCategory::DataQuality => write!(f, "data quality"),
        }
    }
}

/// A configuration value bound to a `?` placeholder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryParam {
    /// `YYYY-MM-DD` text, cast to TIMESTAMP in SQL
    ReferenceDate,
    RecentUserMonths,
    HighItemCount,
    HighReceiptCount,
    /// Current UTC date as `YYYY-MM-DD` text, cast to TIMESTAMP in SQL
    Today,
}

impl QueryParam {
    fn bind(&self, config: &EtlConfig) -> Value {
        match self {
            QueryParam::ReferenceDate => {
                Value::Text(config.reference_date.format("%Y-%m-%d").to_string())
            }
            QueryParam::RecentUserMonths => Value::BigInt(i64::from(config.recent_user_months)),
            QueryParam::HighItemCount => Value::BigInt(i64::from(config.high_item_count)),
            QueryParam::HighReceiptCount => Value::BigInt(i64::from(config.high_receipt_count)),
            QueryParam::Today => {
                Value::Text(Utc::now().date_naive().format("%Y-%m-%d").to_string())
            }
        }
    }
}

/// One fixed statement of the analytical set
#[derive(Debug, Clone, Copy)]
pub struct AnalyticalQuery {
    pub name: &'static str,
    pub question: &'static str,
    pub category: QueryCategory,
    pub sql: &'static str,
    /// Bound in placeholder order
    pub params: &'static [QueryParam],
}

/// Result of one analytical query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryOutcome {
    pub name: String,
    pub category: QueryCategory,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<JsonValue>>,
}

impl QueryOutcome {
    /// Values of one named column, top to bottom
    pub fn column(&self, name: &str) -> Option<Vec<&JsonValue>> {
        let index = self.columns.iter().position(|c| c == name)?;
        Some(self.rows.iter().filter_map(|row| row.get(index)).collect())
    }

    /// Plain-text table with one header line
    pub fn render_table(&self) -> String {
        let cells: Vec<Vec<String>> = self
            .rows
            .iter()
            .map(|row| row.iter().map(display_cell).collect())
            .collect();

        let mut widths: Vec<usize> = self.columns.iter().map(|c| c.chars().count()).collect();
        for row in &cells {
            for (width, cell) in widths.iter_mut().zip(row) {
                *width = (*width).max(cell.chars().count());
            }
        }

        let format_line = |values: &[String]| -> String {
            values
                .iter()
                .zip(&widths)
                .map(|(value, width)| format!("{:<width$}", value, width = *width))
                .collect::<Vec<_>>()
                .join(" | ")
                .trim_end()
                .to_string()
        };

        let mut out = Vec::with_capacity(cells.len() + 2);
        out.push(format_line(&self.columns));
        out.push(
            widths
                .iter()
                .map(|w| "-".repeat(*w))
                .collect::<Vec<_>>()
                .join("-+-"),
        );
        for row in &cells {
            out.push(format_line(row));
        }
        if cells.is_empty() {
            out.push("(no rows)".to_string());
        }
        out.join("\n")
    }
}

fn display_cell(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => "NULL".to_string(),
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ============================================================================
// Business questions
// ============================================================================

const TOP_BRANDS_RECENT_MONTH: &str = r#"
WITH RecentMonth AS (
    SELECT DATE_TRUNC('month', MAX(r.dateScanned)) AS latest_month
    FROM receipts r
        JOIN receiptItems ri ON ri.receiptId = r.id
    WHERE ri.brandCode IS NOT NULL
),
BrandReceiptCount AS (
    SELECT
        ri.brandCode AS brand_code,
        COUNT(DISTINCT r.id) AS receipt_count,
        DATE_TRUNC('month', r.dateScanned) AS scan_month
    FROM receipts r
        JOIN receiptItems ri ON ri.receiptId = r.id
    WHERE ri.brandCode IS NOT NULL
        AND DATE_TRUNC('month', r.dateScanned) >= (SELECT latest_month FROM RecentMonth)
    GROUP BY ri.brandCode, DATE_TRUNC('month', r.dateScanned)
)
SELECT brand_code, receipt_count, scan_month
FROM BrandReceiptCount
ORDER BY receipt_count DESC, brand_code
LIMIT 5
"#;

const BRAND_RANK_RECENT_VS_PREVIOUS_MONTH: &str = r#"
WITH Months AS (
    SELECT
        DATE_TRUNC('month', MAX(r.dateScanned)) AS latest_month,
        DATE_TRUNC('month', MAX(r.dateScanned)) - INTERVAL 1 MONTH AS previous_month
    FROM receipts r
        JOIN receiptItems ri ON ri.receiptId = r.id
    WHERE ri.brandCode IS NOT NULL
),
BrandReceiptCountRecent AS (
    SELECT ri.brandCode AS brand_code, COUNT(DISTINCT r.id) AS receipt_count
    FROM receipts r
        JOIN receiptItems ri ON ri.receiptId = r.id
    WHERE ri.brandCode IS NOT NULL
        AND DATE_TRUNC('month', r.dateScanned) = (SELECT latest_month FROM Months)
    GROUP BY ri.brandCode
),
BrandReceiptCountPrevious AS (
    SELECT ri.brandCode AS brand_code, COUNT(DISTINCT r.id) AS receipt_count
    FROM receipts r
        JOIN receiptItems ri ON ri.receiptId = r.id
    WHERE ri.brandCode IS NOT NULL
        AND DATE_TRUNC('month', r.dateScanned) = (SELECT previous_month FROM Months)
    GROUP BY ri.brandCode
),
RankedBrandsRecent AS (
    SELECT brand_code, receipt_count,
        RANK() OVER (ORDER BY receipt_count DESC) AS receipt_rank
    FROM BrandReceiptCountRecent
    QUALIFY receipt_rank <= 5
),
RankedBrandsPrevious AS (
    SELECT brand_code, receipt_count,
        RANK() OVER (ORDER BY receipt_count DESC) AS receipt_rank
    FROM BrandReceiptCountPrevious
)
SELECT
    r.brand_code,
    r.receipt_count AS recent_receipt_count,
    r.receipt_rank AS recent_rank,
    p.receipt_count AS previous_receipt_count,
    p.receipt_rank AS previous_rank
FROM RankedBrandsRecent r
    LEFT JOIN RankedBrandsPrevious p ON r.brand_code = p.brand_code
ORDER BY recent_rank, r.brand_code
"#;

const AVERAGE_SPEND_BY_STATUS: &str = r#"
SELECT
    CASE WHEN rewardsReceiptStatus = 'FINISHED' THEN 'ACCEPTED'
        ELSE rewardsReceiptStatus
    END AS receipt_status,
    AVG(totalSpent) AS average_spend
FROM receipts
WHERE rewardsReceiptStatus IN ('FINISHED', 'REJECTED')
GROUP BY rewardsReceiptStatus
ORDER BY receipt_status
"#;

const ITEMS_PURCHASED_BY_STATUS: &str = r#"
SELECT
    CASE WHEN r.rewardsReceiptStatus = 'FINISHED' THEN 'ACCEPTED'
        ELSE r.rewardsReceiptStatus
    END AS receipt_status,
    SUM(ri.quantityPurchased) AS total_items_purchased
FROM receipts r
    JOIN receiptItems ri ON r.id = ri.receiptId
WHERE r.rewardsReceiptStatus IN ('FINISHED', 'REJECTED')
GROUP BY r.rewardsReceiptStatus
ORDER BY receipt_status
"#;

const BRAND_WITH_MOST_SPEND_RECENT_USERS: &str = r#"
WITH RecentUsers AS (
    SELECT id
    FROM users
    WHERE createdDate >= CAST(? AS TIMESTAMP) - to_months(CAST(? AS INTEGER))
),
UserItems AS (
    SELECT r.id, ri.barcode, ri.finalPrice
    FROM receipts r
        JOIN receiptItems ri ON r.id = ri.receiptId
    WHERE r.rewardsReceiptStatus = 'FINISHED'
        AND r.userId IN (SELECT id FROM RecentUsers)
)
SELECT b.name AS brand_name, SUM(ui.finalPrice) AS total_spend
FROM UserItems ui
    JOIN brands b ON ui.barcode = b.barcode
GROUP BY b.name
ORDER BY total_spend DESC NULLS LAST, brand_name
LIMIT 1
"#;

const BRAND_WITH_MOST_TRANSACTIONS_RECENT_USERS: &str = r#"
WITH RecentUsers AS (
    SELECT id
    FROM users
    WHERE createdDate >= CAST(? AS TIMESTAMP) - to_months(CAST(? AS INTEGER))
),
UserItems AS (
    SELECT r.id, ri.barcode
    FROM receipts r
        JOIN receiptItems ri ON r.id = ri.receiptId
    WHERE r.rewardsReceiptStatus = 'FINISHED'
        AND r.userId IN (SELECT id FROM RecentUsers)
)
SELECT b.name AS brand_name, COUNT(ui.id) AS total_transactions
FROM UserItems ui
    JOIN brands b ON ui.barcode = b.barcode
GROUP BY b.name
ORDER BY total_transactions DESC, brand_name
LIMIT 1
"#;

// ============================================================================
// Data-quality scans
// ============================================================================

const TEST_BRAND_RECORDS: &str = r#"
SELECT COUNT(*) AS test_record_count
FROM brands
WHERE name ILIKE '%test%'
"#;

const MISSING_KEY_VALUES: &str = r#"
SELECT 'users' AS table_name, 'id' AS column_name, COUNT(*) AS missing_count
FROM users WHERE id IS NULL
UNION ALL
SELECT 'users', 'createdDate', COUNT(*) FROM users WHERE createdDate IS NULL
UNION ALL
SELECT 'brands', 'id', COUNT(*) FROM brands WHERE id IS NULL
UNION ALL
SELECT 'receipts', 'id', COUNT(*) FROM receipts WHERE id IS NULL
UNION ALL
SELECT 'receiptItems', 'barcode', COUNT(*) FROM receiptItems WHERE barcode IS NULL
"#;

const DUPLICATE_KEY_VALUES: &str = r#"
SELECT table_name, id, row_count
FROM (
    SELECT 'users' AS table_name, id, COUNT(*) AS row_count
    FROM users GROUP BY id HAVING COUNT(*) > 1
    UNION ALL
    SELECT 'brands', id, COUNT(*) FROM brands GROUP BY id HAVING COUNT(*) > 1
    UNION ALL
    SELECT 'receipts', id, COUNT(*) FROM receipts GROUP BY id HAVING COUNT(*) > 1
)
ORDER BY table_name, id
"#;

const RECEIPTS_WITHOUT_USER: &str = r#"
SELECT r.id, r.userId
FROM receipts r
    LEFT JOIN users u ON r.userId = u.id
WHERE u.id IS NULL
ORDER BY r.id
"#;

const ITEMS_WITHOUT_RECEIPT: &str = r#"
SELECT ri.receiptId
FROM receiptItems ri
    LEFT JOIN receipts r ON ri.receiptId = r.id
WHERE r.id IS NULL
ORDER BY ri.receiptId
"#;

const PURCHASE_AFTER_CREATE_OR_SCAN: &str = r#"
SELECT id, purchaseDate, createdDate, dateScanned
FROM receipts
WHERE purchaseDate > createdDate
    OR purchaseDate > dateScanned
ORDER BY id
"#;

const USERS_CREATED_IN_FUTURE: &str = r#"
SELECT id, createdDate
FROM users
WHERE createdDate > CAST(? AS TIMESTAMP)
ORDER BY id
"#;

const RECEIPTS_WITH_HIGH_ITEM_COUNT: &str = r#"
SELECT receiptId, COUNT(*) AS item_count
FROM receiptItems
GROUP BY receiptId
HAVING COUNT(*) > ?
ORDER BY item_count DESC, receiptId
"#;

const USERS_WITH_HIGH_RECEIPT_COUNT: &str = r#"
SELECT userId, COUNT(*) AS receipt_count
FROM receipts
GROUP BY userId
HAVING COUNT(*) > ?
ORDER BY receipt_count DESC, userId
"#;

const ITEM_BARCODES_WITHOUT_BRAND: &str = r#"
SELECT DISTINCT ri.barcode
FROM receiptItems ri
    LEFT JOIN brands b ON ri.barcode = b.barcode
WHERE b.barcode IS NULL
ORDER BY ri.barcode NULLS FIRST
"#;

const BARCODES_WITH_MULTIPLE_BRAND_NAMES: &str = r#"
SELECT barcode, COUNT(DISTINCT name) AS brand_name_count
FROM brands
GROUP BY barcode
HAVING COUNT(DISTINCT name) > 1
ORDER BY barcode
"#;

const BRAND_NAMES_WITH_MULTIPLE_BARCODES: &str = r#"
SELECT name, COUNT(DISTINCT barcode) AS barcode_count
FROM brands
GROUP BY name
HAVING COUNT(DISTINCT barcode) > 1
ORDER BY name
"#;

const ITEM_BARCODES_WITH_MULTIPLE_DESCRIPTIONS: &str = r#"
SELECT barcode, COUNT(DISTINCT description) AS description_count
FROM receiptItems
GROUP BY barcode
HAVING COUNT(DISTINCT description) > 1
ORDER BY barcode NULLS FIRST
"#;

const RECENT_USER_PARAMS: &[QueryParam] =
    &[QueryParam::ReferenceDate, QueryParam::RecentUserMonths];

/// Every analytical query, in reporting order
pub const ANALYTICAL_QUERIES: &[AnalyticalQuery] = &[
    AnalyticalQuery {
        name: "top_brands_recent_month",
        question: "What are the top 5 brands by receipts scanned for the most recent month?",
        category: QueryCategory::Business,
        sql: TOP_BRANDS_RECENT_MONTH,
        params: &[],
    },
    AnalyticalQuery {
        name: "brand_rank_recent_vs_previous_month",
        question: "How does the top 5 brand ranking for the recent month compare to the previous month?",
        category: QueryCategory::Business,
        sql: BRAND_RANK_RECENT_VS_PREVIOUS_MONTH,
        params: &[],
    },
    AnalyticalQuery {
        name: "average_spend_by_status",
        question: "Is average spend greater for accepted or rejected receipts?",
        category: QueryCategory::Business,
        sql: AVERAGE_SPEND_BY_STATUS,
        params: &[],
    },
    AnalyticalQuery {
        name: "items_purchased_by_status",
        question: "Are more items purchased on accepted or rejected receipts?",
        category: QueryCategory::Business,
        sql: ITEMS_PURCHASED_BY_STATUS,
        params: &[],
    },
    AnalyticalQuery {
        name: "brand_with_most_spend_recent_users",
        question: "Which brand has the most spend among recently created users?",
        category: QueryCategory::Business,
        sql: BRAND_WITH_MOST_SPEND_RECENT_USERS,
        params: RECENT_USER_PARAMS,
    },
    AnalyticalQuery {
        name: "brand_with_most_transactions_recent_users",
        question: "Which brand has the most transactions among recently created users?",
        category: QueryCategory::Business,
        sql: BRAND_WITH_MOST_TRANSACTIONS_RECENT_USERS,
        params: RECENT_USER_PARAMS,
    },
    AnalyticalQuery {
        name: "test_brand_records",
        question: "How many brand records look like test data?",
        category: QueryCategory::DataQuality,
        sql: TEST_BRAND_RECORDS,
        params: &[],
    },
    AnalyticalQuery {
        name: "missing_key_values",
        question: "How many key or join columns are null?",
        category: QueryCategory::DataQuality,
        sql: MISSING_KEY_VALUES,
        params: &[],
    },
    AnalyticalQuery {
        name: "duplicate_key_values",
        question: "Which primary keys are shared by rows with different payloads?",
        category: QueryCategory::DataQuality,
        sql: DUPLICATE_KEY_VALUES,
        params: &[],
    },
    AnalyticalQuery {
        name: "receipts_without_user",
        question: "Which receipts reference a user that does not exist?",
        category: QueryCategory::DataQuality,
        sql: RECEIPTS_WITHOUT_USER,
        params: &[],
    },
    AnalyticalQuery {
        name: "items_without_receipt",
        question: "Which receipt items reference a receipt that does not exist?",
        category: QueryCategory::DataQuality,
        sql: ITEMS_WITHOUT_RECEIPT,
        params: &[],
    },
    AnalyticalQuery {
        name: "purchase_after_create_or_scan",
        question: "Which receipts were purchased after they were created or scanned?",
        category: QueryCategory::DataQuality,
        sql: PURCHASE_AFTER_CREATE_OR_SCAN,
        params: &[],
    },
    AnalyticalQuery {
        name: "users_created_in_future",
        question: "Which users have a creation date in the future?",
        category: QueryCategory::DataQuality,
        sql: USERS_CREATED_IN_FUTURE,
        params: &[QueryParam::Today],
    },
    AnalyticalQuery {
        name: "receipts_with_high_item_count",
        question: "Which receipts have an unusually high number of items?",
        category: QueryCategory::DataQuality,
        sql: RECEIPTS_WITH_HIGH_ITEM_COUNT,
        params: &[QueryParam::HighItemCount],
    },
    AnalyticalQuery {
        name: "users_with_high_receipt_count",
        question: "Which users have an unusually high number of receipts?",
        category: QueryCategory::DataQuality,
        sql: USERS_WITH_HIGH_RECEIPT_COUNT,
        params: &[QueryParam::HighReceiptCount],
    },
    AnalyticalQuery {
        name: "item_barcodes_without_brand",
        question: "Which item barcodes do not match any brand?",
        category: QueryCategory::DataQuality,
        sql: ITEM_BARCODES_WITHOUT_BRAND,
        params: &[],
    },
    AnalyticalQuery {
        name: "barcodes_with_multiple_brand_names",
        question: "Which barcodes map to more than one brand name?",
        category: QueryCategory::DataQuality,
        sql: BARCODES_WITH_MULTIPLE_BRAND_NAMES,
        params: &[],
    },
    AnalyticalQuery {
        name: "brand_names_with_multiple_barcodes",
        question: "Which brand names map to more than one barcode?",
        category: QueryCategory::DataQuality,
        sql: BRAND_NAMES_WITH_MULTIPLE_BARCODES,
        params: &[],
    },
    AnalyticalQuery {
        name: "item_barcodes_with_multiple_descriptions",
        question: "Which item barcodes carry more than one description?",
        category: QueryCategory::DataQuality,
        sql: ITEM_BARCODES_WITH_MULTIPLE_DESCRIPTIONS,
        params: &[],
    },
];

/// Look up a query by name
pub fn find_query(name: &str) -> Option<&'static AnalyticalQuery> {
    ANALYTICAL_QUERIES.iter().find(|q| q.name == name)
}

/// Run one query against the materialized relations
#[instrument(skip(conn, query, config), fields(query = query.name))]
pub fn run_query(
    conn: &Connection,
    query: &AnalyticalQuery,
    config: &EtlConfig,
) -> Result<QueryOutcome> {
    let start = Instant::now();
    let failed = |e: duckdb::Error| EtlError::Query(format!("{}: {}", query.name, e));

    let mut stmt = conn.prepare(query.sql).map_err(failed)?;
    let values: Vec<Value> = query.params.iter().map(|p| p.bind(config)).collect();
    debug!("Executing {} with {} parameters", query.name, values.len());

    let mut rows = stmt.query(params_from_iter(values)).map_err(failed)?;
    let columns = rows
        .as_ref()
        .map(|s| s.column_names())
        .unwrap_or_default();

    let mut out = Vec::new();
    while let Some(row) = rows.next().map_err(failed)? {
        let mut cells = Vec::with_capacity(columns.len());
        for index in 0..columns.len() {
            let value: Value = row.get(index).map_err(failed)?;
            cells.push(value_to_json(value));
        }
        out.push(cells);
    }

    info!(
        "Query {} returned {} rows in {}ms",
        query.name,
        out.len(),
        start.elapsed().as_millis()
    );

    Ok(QueryOutcome {
        name: query.name.to_string(),
        category: query.category,
        columns,
        rows: out,
    })
}

/// Check that every relation the query set reads exists with its declared columns
pub fn verify_loaded_tables(conn: &Connection) -> Result<()> {
    let mut stmt = conn.prepare(
        "SELECT column_name FROM information_schema.columns WHERE table_name = ? ORDER BY ordinal_position",
    )?;

    for table in get_all_table_names() {
        let schema = get_schema_for_table(table)
            .ok_or_else(|| EtlError::Schema(format!("No declared schema for {}", table)))?;
        let declared: Vec<&str> = schema.fields().iter().map(|f| f.name().as_str()).collect();

        let found = stmt
            .query_map([table], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        if found.is_empty() {
            return Err(EtlError::Schema(format!("Table {} is not loaded", table)));
        }
        if found != declared {
            return Err(EtlError::Schema(format!(
                "Table {} has columns [{}], expected [{}]",
                table,
                found.join(", "),
                declared.join(", ")
            )));
        }
    }

    debug!("All query tables present with declared columns");
    Ok(())
}

/// Run the whole analytical set in order
pub fn run_all(conn: &Connection, config: &EtlConfig) -> Result<Vec<QueryOutcome>> {
    verify_loaded_tables(conn)?;
    ANALYTICAL_QUERIES
        .iter()
        .map(|query| run_query(conn, query, config))
        .collect()
}

fn timestamp_text(unit: TimeUnit, value: i64) -> JsonValue {
    let micros = match unit {
        TimeUnit::Second => value.checked_mul(1_000_000),
        TimeUnit::Millisecond => value.checked_mul(1_000),
        TimeUnit::Microsecond => Some(value),
        TimeUnit::Nanosecond => Some(value / 1_000),
    };
    match micros.and_then(DateTime::from_timestamp_micros) {
        Some(ts) => JsonValue::String(ts.format("%Y-%m-%d %H:%M:%S%.3f").to_string()),
        None => JsonValue::Number(Number::from(value)),
    }
}

fn float_json(value: f64) -> JsonValue {
    Number::from_f64(value)
        .map(JsonValue::Number)
        .unwrap_or(JsonValue::Null)
}

/// Convert a DuckDB cell into JSON for reporting
pub fn value_to_json(value: Value) -> JsonValue {
    match value {
        Value::Null => JsonValue::Null,
        Value::Boolean(b) => JsonValue::Bool(b),
        Value::TinyInt(v) => JsonValue::Number(Number::from(v)),
        Value::SmallInt(v) => JsonValue::Number(Number::from(v)),
        Value::Int(v) => JsonValue::Number(Number::from(v)),
        Value::BigInt(v) => JsonValue::Number(Number::from(v)),
        Value::HugeInt(v) => match i64::try_from(v) {
            Ok(v) => JsonValue::Number(Number::from(v)),
            Err(_) => JsonValue::String(v.to_string()),
        },
        Value::UTinyInt(v) => JsonValue::Number(Number::from(v)),
        Value::USmallInt(v) => JsonValue::Number(Number::from(v)),
        Value::UInt(v) => JsonValue::Number(Number::from(v)),
        Value::UBigInt(v) => JsonValue::Number(Number::from(v)),
        Value::Float(v) => float_json(f64::from(v)),
        Value::Double(v) => float_json(v),
        Value::Decimal(d) => match d.to_string().parse::<f64>() {
            Ok(v) => float_json(v),
            Err(_) => JsonValue::String(d.to_string()),
        },
        Value::Text(s) => JsonValue::String(s),
        Value::Timestamp(unit, v) => timestamp_text(unit, v),
        Value::Date32(days) => NaiveDate::from_ymd_opt(1970, 1, 1)
            .and_then(|epoch| epoch.checked_add_signed(chrono::Duration::days(i64::from(days))))
            .map(|d| JsonValue::String(d.format("%Y-%m-%d").to_string()))
            .unwrap_or(JsonValue::Null),
        other => JsonValue::String(format!("{:?}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use receipts_common::create_duckdb_connection;
    use receipts_common::ddl::generate_create_table_ddl;
    use serde_json::json;
    use std::collections::HashSet;

    fn conn_with(sql: &str) -> Connection {
        let config = EtlConfig {
            threads: 1,
            ..EtlConfig::default()
        };
        let conn = create_duckdb_connection(&config).unwrap();
        conn.execute_batch(sql).unwrap();
        conn
    }

    #[test]
    fn test_query_names_unique() {
        let names: HashSet<&str> = ANALYTICAL_QUERIES.iter().map(|q| q.name).collect();
        assert_eq!(names.len(), ANALYTICAL_QUERIES.len());
        assert!(find_query("barcodes_with_multiple_brand_names").is_some());
        assert!(find_query("nonexistent").is_none());
    }

    #[test]
    fn test_placeholders_match_params() {
        for query in ANALYTICAL_QUERIES {
            assert_eq!(
                query.sql.matches('?').count(),
                query.params.len(),
                "{} binds the wrong number of parameters",
                query.name
            );
        }
    }

    #[test]
    fn test_value_to_json_conversions() {
        assert_eq!(value_to_json(Value::Null), JsonValue::Null);
        assert_eq!(value_to_json(Value::BigInt(7)), json!(7));
        assert_eq!(value_to_json(Value::Double(2.5)), json!(2.5));
        assert_eq!(value_to_json(Value::Double(f64::NAN)), JsonValue::Null);
        assert_eq!(value_to_json(Value::Text("a".to_string())), json!("a"));
        assert_eq!(
            value_to_json(Value::Timestamp(TimeUnit::Millisecond, 1_614_556_800_000)),
            json!("2021-03-01 00:00:00.000")
        );
        assert_eq!(value_to_json(Value::Date32(1)), json!("1970-01-02"));
    }

    #[test]
    fn test_barcode_with_two_brand_names_reported() {
        let conn = conn_with(
            "CREATE TABLE brands (id VARCHAR, barcode VARCHAR, name VARCHAR);
             INSERT INTO brands VALUES ('b1', '511111019862', 'A'), ('b2', '511111019862', 'B'), ('b3', '1', 'C');",
        );
        let query = find_query("barcodes_with_multiple_brand_names").unwrap();
        let outcome = run_query(&conn, query, &EtlConfig::default()).unwrap();

        assert_eq!(outcome.columns, vec!["barcode", "brand_name_count"]);
        assert_eq!(outcome.rows, vec![vec![json!("511111019862"), json!(2)]]);
    }

    #[test]
    fn test_threshold_parameter_is_bound() {
        let conn = conn_with(
            "CREATE TABLE receiptItems (receiptId VARCHAR);
             INSERT INTO receiptItems VALUES ('r1'), ('r1'), ('r1'), ('r2');",
        );
        let config = EtlConfig {
            high_item_count: 2,
            ..EtlConfig::default()
        };
        let query = find_query("receipts_with_high_item_count").unwrap();
        let outcome = run_query(&conn, query, &config).unwrap();

        assert_eq!(outcome.rows, vec![vec![json!("r1"), json!(3)]]);
    }

    #[test]
    fn test_future_users_compared_against_bound_date() {
        let conn = conn_with(
            "CREATE TABLE users (id VARCHAR, createdDate TIMESTAMP);
             INSERT INTO users VALUES ('u1', TIMESTAMP '2999-01-01 00:00:00'), ('u2', TIMESTAMP '2020-06-01 12:00:00'), ('u3', NULL);",
        );
        let query = find_query("users_created_in_future").unwrap();
        assert_eq!(query.params, &[QueryParam::Today]);

        let outcome = run_query(&conn, query, &EtlConfig::default()).unwrap();
        assert_eq!(
            outcome.rows,
            vec![vec![json!("u1"), json!("2999-01-01 00:00:00.000")]]
        );
    }

    #[test]
    fn test_verify_loaded_tables() {
        let conn = conn_with("SELECT 1;");
        let err = verify_loaded_tables(&conn).unwrap_err();
        assert!(matches!(err, EtlError::Schema(ref m) if m.contains("users")));

        for table in get_all_table_names() {
            let schema = get_schema_for_table(table).unwrap();
            conn.execute_batch(&generate_create_table_ddl(table, &schema))
                .unwrap();
        }
        verify_loaded_tables(&conn).unwrap();

        conn.execute_batch("CREATE OR REPLACE TABLE brands (id VARCHAR NOT NULL);")
            .unwrap();
        let err = verify_loaded_tables(&conn).unwrap_err();
        assert!(matches!(err, EtlError::Schema(ref m) if m.contains("brands")));
    }

    #[test]
    fn test_accepted_status_mapping() {
        let conn = conn_with(
            "CREATE TABLE receipts (id VARCHAR, rewardsReceiptStatus VARCHAR, totalSpent DOUBLE);
             INSERT INTO receipts VALUES ('r1', 'FINISHED', 10.0), ('r2', 'FINISHED', 20.0), ('r3', 'REJECTED', 4.0), ('r4', 'PENDING', 99.0);",
        );
        let query = find_query("average_spend_by_status").unwrap();
        let outcome = run_query(&conn, query, &EtlConfig::default()).unwrap();

        assert_eq!(
            outcome.rows,
            vec![
                vec![json!("ACCEPTED"), json!(15.0)],
                vec![json!("REJECTED"), json!(4.0)],
            ]
        );
    }

    #[test]
    fn test_render_table() {
        let outcome = QueryOutcome {
            name: "demo".to_string(),
            category: QueryCategory::DataQuality,
            columns: vec!["barcode".to_string(), "n".to_string()],
            rows: vec![vec![json!("4011"), json!(2)], vec![JsonValue::Null, json!(10)]],
        };
        assert_eq!(
            outcome.render_table(),
            "barcode | n\n--------+---\n4011    | 2\nNULL    | 10"
        );

        let empty = QueryOutcome {
            rows: Vec::new(),
            ..outcome
        };
        assert!(empty.render_table().ends_with("(no rows)"));
    }

    #[test]
    fn test_bad_sql_is_query_error() {
        let conn = conn_with("SELECT 1;");
        let query = AnalyticalQuery {
            name: "broken",
            question: "",
            category: QueryCategory::Business,
            sql: "SELECT * FROM missing_table",
            params: &[],
        };
        let err = run_query(&conn, &query, &EtlConfig::default()).unwrap_err();
        assert!(matches!(err, EtlError::Query(_)));
    }
}
