//! Field normalizer
//!
//! Unwraps the document-store wrapper objects (`{"$oid": ..}`,
//! `{"$date": ..}`, `{"$ref": .., "$id": ..}`), coerces cells to the declared
//! column types and moves undeclared keys into the open attribute map.
//!
//! A cell that cannot be coerced becomes null and is recorded in the
//! [`CoercionLog`]; only structural problems (a required key absent from a
//! whole source) fail a table.

use chrono::{DateTime, Utc};
use receipts_common::{
    Brand, CoercionWarning, ExtraAttributes, ForeignRef, Receipt, ReceiptStatus, RefTarget,
    Result, User, BRANDS_TABLE, RECEIPTS_TABLE, USERS_TABLE,
};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::loader::{RawRecord, RawTable};

/// Source key of every entity's identifier wrapper
pub const ID_COLUMN: &str = "_id";

const DEFAULT_SAMPLE_LIMIT: usize = 50;
const MAX_VALUE_TEXT: usize = 120;

/// Per-column tally of coercion failures, with the first few kept verbatim
#[derive(Debug, Clone, Serialize)]
pub struct CoercionLog {
    total: usize,
    counts: BTreeMap<String, usize>,
    samples: Vec<CoercionWarning>,
    #[serde(skip)]
    sample_limit: usize,
}

impl Default for CoercionLog {
    fn default() -> Self {
        Self::with_sample_limit(DEFAULT_SAMPLE_LIMIT)
    }
}

impl CoercionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sample_limit(sample_limit: usize) -> Self {
        Self {
            total: 0,
            counts: BTreeMap::new(),
            samples: Vec::new(),
            sample_limit,
        }
    }

    pub fn record(&mut self, warning: CoercionWarning) {
        debug!(
            "Coercion failed for {}.{} at line {}: {} ({})",
            warning.table, warning.column, warning.line, warning.value, warning.reason
        );
        self.total += 1;
        *self
            .counts
            .entry(format!("{}.{}", warning.table, warning.column))
            .or_insert(0) += 1;
        if self.samples.len() < self.sample_limit {
            self.samples.push(warning);
        }
    }

    pub fn total(&self) -> usize {
        self.total
    }

    /// Failure count for `table.column`
    pub fn count_for(&self, table: &str, column: &str) -> usize {
        self.counts
            .get(&format!("{}.{}", table, column))
            .copied()
            .unwrap_or(0)
    }

    pub fn counts(&self) -> &BTreeMap<String, usize> {
        &self.counts
    }

    pub fn samples(&self) -> &[CoercionWarning] {
        &self.samples
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Emit one warning line per affected column
    pub fn log_summary(&self) {
        for (column, count) in &self.counts {
            warn!("{} cells in {} degraded to null", count, column);
        }
    }
}

/// Rows produced from one source, plus the records that had no usable key
#[derive(Debug, Clone)]
pub struct NormalizedRows<T> {
    pub rows: Vec<T>,
    pub dropped_missing_key: usize,
}

// ============================================================================
// Wrapper unwrapping and scalar coercion
// ============================================================================

/// Strip single-key wrapper objects: `{"$oid": "x"}` → `"x"`,
/// `{"$date": {"$numberLong": "1"}}` → `"1"`. Anything else is returned as is.
pub fn unwrap_wrapper(value: &Value) -> &Value {
    let mut current = value;
    while let Value::Object(map) = current {
        if map.len() != 1 {
            break;
        }
        match map.values().next() {
            Some(inner) => current = inner,
            None => break,
        }
    }
    current
}

/// Unwrap an embedded identifier into its string form
pub fn unwrap_identifier(value: &Value) -> std::result::Result<Option<String>, String> {
    match unwrap_wrapper(value) {
        Value::Null => Ok(None),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => Ok(Some(s.clone())),
        Value::Number(n) => Ok(Some(n.to_string())),
        Value::Bool(_) => Err("boolean is not an identifier".to_string()),
        Value::Array(_) => Err("array is not an identifier".to_string()),
        Value::Object(_) => Err("object is not a single-key identifier wrapper".to_string()),
    }
}

/// Convert an (optionally wrapped) epoch-millisecond count into a timestamp
pub fn coerce_timestamp(value: &Value) -> std::result::Result<Option<DateTime<Utc>>, String> {
    let millis = match unwrap_wrapper(value) {
        Value::Null => return Ok(None),
        Value::Number(n) => {
            if let Some(ms) = n.as_i64() {
                ms
            } else if let Some(f) = n.as_f64().filter(|f| f.is_finite() && f.fract() == 0.0) {
                if f < i64::MIN as f64 || f >= i64::MAX as f64 {
                    return Err("epoch milliseconds out of range".to_string());
                }
                f as i64
            } else {
                return Err("epoch milliseconds must be an integer".to_string());
            }
        }
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| "text is not an epoch-millisecond integer".to_string())?,
        _ => return Err("not an epoch-millisecond value".to_string()),
    };

    DateTime::from_timestamp_millis(millis)
        .map(Some)
        .ok_or_else(|| "epoch milliseconds out of range".to_string())
}

/// Canonical barcode form: cast to string, strip surrounding whitespace
///
/// Idempotent, and shared by brands and receipt items so both sides of the
/// join use identical strings.
pub fn canonical_barcode(value: &Value) -> Option<String> {
    let text = match value {
        Value::Null => return None,
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    Some(text.trim().to_string())
}

/// Text cell: strings as is, numbers and booleans in their JSON text form
pub fn coerce_string(value: &Value) -> std::result::Result<Option<String>, String> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s.clone())),
        Value::Number(n) => Ok(Some(n.to_string())),
        Value::Bool(b) => Ok(Some(b.to_string())),
        Value::Array(_) | Value::Object(_) => Err("nested value in a text column".to_string()),
    }
}

/// Numeric cell; numeric strings such as `"26.00"` are parsed
pub fn coerce_f64(value: &Value) -> std::result::Result<Option<f64>, String> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => n
            .as_f64()
            .map(Some)
            .ok_or_else(|| "number not representable as double".to_string()),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => match s.trim().parse::<f64>() {
            Ok(f) if f.is_finite() => Ok(Some(f)),
            _ => Err("text is not a finite number".to_string()),
        },
        _ => Err("not a number".to_string()),
    }
}

/// Integer cell; integral doubles and numeric strings like `"500.0"` are accepted
pub fn coerce_i64(value: &Value) -> std::result::Result<Option<i64>, String> {
    let as_integer = |f: f64| {
        if f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
            Ok(Some(f as i64))
        } else {
            Err("not an integral number".to_string())
        }
    };

    match value {
        Value::Null => Ok(None),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Ok(Some(i)),
            None => as_integer(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => {
            let s = s.trim();
            match s.parse::<i64>() {
                Ok(i) => Ok(Some(i)),
                Err(_) => as_integer(
                    s.parse::<f64>()
                        .map_err(|_| "text is not an integer".to_string())?,
                ),
            }
        }
        _ => Err("not an integer".to_string()),
    }
}

/// Boolean cell; `"true"`/`"false"` text is accepted
pub fn coerce_bool(value: &Value) -> std::result::Result<Option<bool>, String> {
    match value {
        Value::Null => Ok(None),
        Value::Bool(b) => Ok(Some(*b)),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(Some(true)),
            "false" => Ok(Some(false)),
            "" => Ok(None),
            _ => Err("text is not a boolean".to_string()),
        },
        _ => Err("not a boolean".to_string()),
    }
}

/// Parse a polymorphic reference `{"$ref": "Cogs", "$id": {"$oid": "..."}}`
pub fn parse_reference(value: &Value) -> std::result::Result<Option<ForeignRef>, String> {
    let map = match value {
        Value::Null => return Ok(None),
        Value::Object(map) => map,
        _ => return Err("reference is not an object".to_string()),
    };

    let target = match map.get("$ref") {
        Some(Value::String(name)) if !name.trim().is_empty() => RefTarget::parse(name.trim()),
        _ => return Err("reference has no '$ref' type tag".to_string()),
    };
    let id = unwrap_identifier(map.get("$id").unwrap_or(&Value::Null))?
        .ok_or_else(|| "reference has no '$id'".to_string())?;

    Ok(Some(ForeignRef { target, id }))
}

fn value_text(value: &Value) -> String {
    let text = value.to_string();
    if text.chars().count() > MAX_VALUE_TEXT {
        let truncated: String = text.chars().take(MAX_VALUE_TEXT).collect();
        format!("{}...", truncated)
    } else {
        text
    }
}

/// Copy every key not in `declared` into the open attribute map
pub fn extra_attributes(fields: &Map<String, Value>, declared: &[&str]) -> ExtraAttributes {
    fields
        .iter()
        .filter(|(key, _)| !declared.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

// ============================================================================
// Cell reader
// ============================================================================

/// Reads typed cells out of one JSON object, logging failures against its source line
pub(crate) struct CellReader<'a> {
    table: &'a str,
    line: usize,
    fields: &'a Map<String, Value>,
    log: &'a mut CoercionLog,
}

impl<'a> CellReader<'a> {
    pub(crate) fn new(
        table: &'a str,
        line: usize,
        fields: &'a Map<String, Value>,
        log: &'a mut CoercionLog,
    ) -> Self {
        Self {
            table,
            line,
            fields,
            log,
        }
    }

    fn cell(&self, column: &str) -> &'a Value {
        static NULL: Value = Value::Null;
        self.fields.get(column).unwrap_or(&NULL)
    }

    pub(crate) fn warn(&mut self, column: &str, value: &Value, reason: String) {
        self.log.record(CoercionWarning {
            table: self.table.to_string(),
            line: self.line,
            column: column.to_string(),
            value: value_text(value),
            reason,
        });
    }

    fn coerce<T, F>(&mut self, column: &str, convert: F) -> Option<T>
    where
        F: Fn(&Value) -> std::result::Result<Option<T>, String>,
    {
        let value = self.cell(column);
        match convert(value) {
            Ok(result) => result,
            Err(reason) => {
                self.warn(column, value, reason);
                None
            }
        }
    }

    pub(crate) fn identifier(&mut self, column: &str) -> Option<String> {
        self.coerce(column, unwrap_identifier)
    }

    pub(crate) fn timestamp(&mut self, column: &str) -> Option<DateTime<Utc>> {
        self.coerce(column, coerce_timestamp)
    }

    pub(crate) fn string(&mut self, column: &str) -> Option<String> {
        self.coerce(column, coerce_string)
    }

    pub(crate) fn float(&mut self, column: &str) -> Option<f64> {
        self.coerce(column, coerce_f64)
    }

    pub(crate) fn integer(&mut self, column: &str) -> Option<i64> {
        self.coerce(column, coerce_i64)
    }

    pub(crate) fn boolean(&mut self, column: &str) -> Option<bool> {
        self.coerce(column, coerce_bool)
    }

    pub(crate) fn barcode(&self, column: &str) -> Option<String> {
        canonical_barcode(self.cell(column))
    }

    pub(crate) fn reference(&mut self, column: &str) -> Option<ForeignRef> {
        self.coerce(column, parse_reference)
    }

    pub(crate) fn extras(&self, declared: &[&str]) -> ExtraAttributes {
        extra_attributes(self.fields, declared)
    }
}

/// Primary key of a raw record, or `None` (with a warning) when unusable
pub(crate) fn record_key(table: &str, record: &RawRecord, log: &mut CoercionLog) -> Option<String> {
    let key = CellReader::new(table, record.line, &record.fields, log).identifier(ID_COLUMN);
    if key.is_none() {
        warn!(
            "Dropping {} record at line {}: no usable '{}'",
            table, record.line, ID_COLUMN
        );
    }
    key
}

// ============================================================================
// Entity normalizers
// ============================================================================

const USER_SOURCE_COLUMNS: &[&str] = &[
    ID_COLUMN,
    "active",
    "createdDate",
    "lastLogin",
    "role",
    "signUpSource",
    "state",
];

/// Normalize the users source
pub fn normalize_users(table: &RawTable, log: &mut CoercionLog) -> Result<NormalizedRows<User>> {
    table.require_column(ID_COLUMN)?;

    let mut rows = Vec::with_capacity(table.len());
    let mut dropped_missing_key = 0;

    for record in table.records() {
        let Some(id) = record_key(USERS_TABLE, record, log) else {
            dropped_missing_key += 1;
            continue;
        };
        let mut cells = CellReader::new(USERS_TABLE, record.line, &record.fields, log);

        rows.push(User {
            id,
            active: cells.boolean("active"),
            created_date: cells.timestamp("createdDate"),
            last_login: cells.timestamp("lastLogin"),
            role: cells.string("role"),
            sign_up_source: cells.string("signUpSource"),
            state: cells.string("state"),
            extra_attributes: cells.extras(USER_SOURCE_COLUMNS),
        });
    }

    Ok(NormalizedRows {
        rows,
        dropped_missing_key,
    })
}

const BRAND_SOURCE_COLUMNS: &[&str] = &[
    ID_COLUMN,
    "barcode",
    "brandCode",
    "category",
    "categoryCode",
    "cpg",
    "name",
    "topBrand",
];

/// Normalize the brands source
///
/// `cpg` is split into `cpgId`/`cpgRef` and not carried further.
pub fn normalize_brands(table: &RawTable, log: &mut CoercionLog) -> Result<NormalizedRows<Brand>> {
    table.require_column(ID_COLUMN)?;

    let mut rows = Vec::with_capacity(table.len());
    let mut dropped_missing_key = 0;

    for record in table.records() {
        let Some(id) = record_key(BRANDS_TABLE, record, log) else {
            dropped_missing_key += 1;
            continue;
        };
        let mut cells = CellReader::new(BRANDS_TABLE, record.line, &record.fields, log);
        let cpg = cells.reference("cpg");

        rows.push(Brand {
            id,
            barcode: cells.barcode("barcode"),
            brand_code: cells.string("brandCode"),
            category: cells.string("category"),
            category_code: cells.string("categoryCode"),
            cpg_id: cpg.as_ref().map(|r| r.id.clone()),
            cpg_ref: cpg.as_ref().map(|r| r.target.as_str().to_string()),
            name: cells.string("name"),
            top_brand: cells.boolean("topBrand"),
            extra_attributes: cells.extras(BRAND_SOURCE_COLUMNS),
        });
    }

    Ok(NormalizedRows {
        rows,
        dropped_missing_key,
    })
}

/// Source key of the nested item list on receipts
pub const ITEM_LIST_COLUMN: &str = "rewardsReceiptItemList";

const RECEIPT_SOURCE_COLUMNS: &[&str] = &[
    ID_COLUMN,
    "bonusPointsEarned",
    "bonusPointsEarnedReason",
    "createDate",
    "createdDate",
    "dateScanned",
    "finishedDate",
    "modifyDate",
    "pointsAwardedDate",
    "pointsEarned",
    "purchaseDate",
    "purchasedItemCount",
    "rewardsReceiptStatus",
    "totalSpent",
    "userId",
    ITEM_LIST_COLUMN,
];

/// Normalize the receipts source
///
/// The item list is left for [`crate::extractor`]. `createdDate` takes the
/// first usable value of the source keys `createDate` and `createdDate`.
pub fn normalize_receipts(
    table: &RawTable,
    log: &mut CoercionLog,
) -> Result<NormalizedRows<Receipt>> {
    table.require_column(ID_COLUMN)?;

    let mut rows = Vec::with_capacity(table.len());
    let mut dropped_missing_key = 0;

    for record in table.records() {
        let Some(id) = record_key(RECEIPTS_TABLE, record, log) else {
            dropped_missing_key += 1;
            continue;
        };
        let mut cells = CellReader::new(RECEIPTS_TABLE, record.line, &record.fields, log);

        let created_date = cells
            .timestamp("createDate")
            .or_else(|| cells.timestamp("createdDate"));

        rows.push(Receipt {
            id,
            bonus_points_earned: cells.integer("bonusPointsEarned"),
            bonus_points_earned_reason: cells.string("bonusPointsEarnedReason"),
            created_date,
            date_scanned: cells.timestamp("dateScanned"),
            finished_date: cells.timestamp("finishedDate"),
            modify_date: cells.timestamp("modifyDate"),
            points_awarded_date: cells.timestamp("pointsAwardedDate"),
            points_earned: cells.float("pointsEarned"),
            purchase_date: cells.timestamp("purchaseDate"),
            purchased_item_count: cells.integer("purchasedItemCount"),
            rewards_receipt_status: cells
                .string("rewardsReceiptStatus")
                .map(|s| ReceiptStatus::parse(&s)),
            total_spent: cells.float("totalSpent"),
            user_id: cells.identifier("userId"),
            extra_attributes: cells.extras(RECEIPT_SOURCE_COLUMNS),
        });
    }

    Ok(NormalizedRows {
        rows,
        dropped_missing_key,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::load_jsonl_reader;
    use pretty_assertions::assert_eq;
    use receipts_common::{EtlError, MalformedLinePolicy};
    use serde_json::json;
    use std::io::Cursor;

    fn table(name: &str, lines: &[Value]) -> RawTable {
        let text: String = lines.iter().map(|l| format!("{}\n", l)).collect();
        load_jsonl_reader(Cursor::new(text), name, MalformedLinePolicy::Abort).unwrap()
    }

    #[test]
    fn test_unwrap_wrapper() {
        assert_eq!(unwrap_wrapper(&json!({"$oid": "abc"})), &json!("abc"));
        assert_eq!(
            unwrap_wrapper(&json!({"$date": {"$numberLong": "12"}})),
            &json!("12")
        );
        assert_eq!(unwrap_wrapper(&json!("plain")), &json!("plain"));
        let two_keys = json!({"$ref": "Cogs", "$id": "x"});
        assert_eq!(unwrap_wrapper(&two_keys), &two_keys);
    }

    #[test]
    fn test_unwrap_identifier() {
        assert_eq!(
            unwrap_identifier(&json!({"$oid": "5ff1e194b6a9d73a3a9f1052"})),
            Ok(Some("5ff1e194b6a9d73a3a9f1052".to_string()))
        );
        assert_eq!(unwrap_identifier(&json!("r1")), Ok(Some("r1".to_string())));
        assert_eq!(unwrap_identifier(&json!(null)), Ok(None));
        assert_eq!(unwrap_identifier(&json!({"$oid": "  "})), Ok(None));
        assert!(unwrap_identifier(&json!({"a": 1, "b": 2})).is_err());
    }

    #[test]
    fn test_timestamp_round_trips_epoch_millis() {
        let ts = coerce_timestamp(&json!({"$date": 1614556800000i64}))
            .unwrap()
            .unwrap();
        assert_eq!(ts.timestamp_millis(), 1_614_556_800_000);
        assert_eq!(ts.to_rfc3339(), "2021-03-01T00:00:00+00:00");
    }

    #[test]
    fn test_timestamp_accepts_numeric_text_and_integral_doubles() {
        assert_eq!(
            coerce_timestamp(&json!("1000")).unwrap().unwrap().timestamp_millis(),
            1000
        );
        assert_eq!(
            coerce_timestamp(&json!(1000.0)).unwrap().unwrap().timestamp_millis(),
            1000
        );
    }

    #[test]
    fn test_timestamp_failures_are_errors_not_panics() {
        assert_eq!(coerce_timestamp(&json!(null)), Ok(None));
        assert_eq!(coerce_timestamp(&json!({"$date": null})), Ok(None));
        assert!(coerce_timestamp(&json!("yesterday")).is_err());
        assert!(coerce_timestamp(&json!(1.5)).is_err());
        assert!(coerce_timestamp(&json!([1])).is_err());
        assert!(coerce_timestamp(&json!(i64::MAX)).is_err());
    }

    #[test]
    fn test_canonical_barcode_is_idempotent() {
        let once = canonical_barcode(&json!(" 511111019862 ")).unwrap();
        assert_eq!(once, "511111019862");
        let twice = canonical_barcode(&Value::String(once.clone())).unwrap();
        assert_eq!(twice, once);

        assert_eq!(
            canonical_barcode(&json!(511111019862i64)),
            Some("511111019862".to_string())
        );
        assert_eq!(canonical_barcode(&json!("   ")), Some(String::new()));
        assert_eq!(canonical_barcode(&json!(null)), None);
    }

    #[test]
    fn test_numeric_coercions() {
        assert_eq!(coerce_f64(&json!("26.00")), Ok(Some(26.0)));
        assert_eq!(coerce_f64(&json!(2)), Ok(Some(2.0)));
        assert_eq!(coerce_f64(&json!("")), Ok(None));
        assert!(coerce_f64(&json!("abc")).is_err());
        assert!(coerce_f64(&json!("NaN")).is_err());

        assert_eq!(coerce_i64(&json!(750)), Ok(Some(750)));
        assert_eq!(coerce_i64(&json!("500.0")), Ok(Some(500)));
        assert_eq!(coerce_i64(&json!(5.0)), Ok(Some(5)));
        assert!(coerce_i64(&json!(5.5)).is_err());
    }

    #[test]
    fn test_bool_and_string_coercions() {
        assert_eq!(coerce_bool(&json!(true)), Ok(Some(true)));
        assert_eq!(coerce_bool(&json!("False")), Ok(Some(false)));
        assert!(coerce_bool(&json!(1)).is_err());

        assert_eq!(coerce_string(&json!(12)), Ok(Some("12".to_string())));
        assert!(coerce_string(&json!({"a": 1})).is_err());
    }

    #[test]
    fn test_parse_reference_tagged_variant() {
        let parsed = parse_reference(&json!({
            "$id": {"$oid": "601ac114be37ce2ead437550"},
            "$ref": "Cogs"
        }))
        .unwrap()
        .unwrap();
        assert_eq!(parsed.target, RefTarget::Cogs);
        assert_eq!(parsed.id, "601ac114be37ce2ead437550");

        assert_eq!(parse_reference(&json!(null)), Ok(None));
        assert!(parse_reference(&json!({"$id": {"$oid": "x"}})).is_err());
        assert!(parse_reference(&json!({"$ref": "Cpg"})).is_err());
    }

    #[test]
    fn test_normalize_users() {
        let raw = table(
            "users",
            &[json!({
                "_id": {"$oid": "u1"},
                "active": true,
                "createdDate": {"$date": 1609687444800i64},
                "lastLogin": {"$date": 1609687537858i64},
                "role": "consumer",
                "signUpSource": "Email",
                "state": "WI"
            })],
        );
        let mut log = CoercionLog::new();
        let users = normalize_users(&raw, &mut log).unwrap();

        assert_eq!(users.rows.len(), 1);
        let user = &users.rows[0];
        assert_eq!(user.id, "u1");
        assert_eq!(user.active, Some(true));
        assert_eq!(
            user.created_date.map(|d| d.timestamp_millis()),
            Some(1_609_687_444_800)
        );
        assert_eq!(user.state.as_deref(), Some("WI"));
        assert!(user.extra_attributes.is_empty());
        assert!(log.is_empty());
    }

    #[test]
    fn test_bad_cells_degrade_to_null_with_warning() {
        let raw = table(
            "users",
            &[json!({
                "_id": {"$oid": "u1"},
                "createdDate": {"$date": "soon"},
                "active": "maybe"
            })],
        );
        let mut log = CoercionLog::new();
        let users = normalize_users(&raw, &mut log).unwrap();

        assert_eq!(users.rows.len(), 1);
        assert_eq!(users.rows[0].created_date, None);
        assert_eq!(users.rows[0].active, None);
        assert_eq!(log.total(), 2);
        assert_eq!(log.count_for("users", "createdDate"), 1);
        assert_eq!(log.samples()[0].line, 1);
    }

    #[test]
    fn test_rows_without_key_are_dropped() {
        let raw = table(
            "users",
            &[json!({"_id": {"$oid": "u1"}}), json!({"state": "WI"})],
        );
        let mut log = CoercionLog::new();
        let users = normalize_users(&raw, &mut log).unwrap();
        assert_eq!(users.rows.len(), 1);
        assert_eq!(users.dropped_missing_key, 1);
    }

    #[test]
    fn test_key_absent_from_whole_source_is_fatal() {
        let raw = table("users", &[json!({"state": "WI"})]);
        let err = normalize_users(&raw, &mut CoercionLog::new()).unwrap_err();
        assert!(matches!(err, EtlError::MissingColumn { .. }));
    }

    #[test]
    fn test_undeclared_keys_go_to_extra_attributes() {
        let raw = table(
            "users",
            &[json!({"_id": {"$oid": "u1"}, "nickname": "bob"})],
        );
        let users = normalize_users(&raw, &mut CoercionLog::new()).unwrap();
        assert_eq!(
            users.rows[0].extra_attributes.get("nickname"),
            Some(&json!("bob"))
        );
    }

    #[test]
    fn test_normalize_brands_splits_cpg_and_strips_barcode() {
        let raw = table(
            "brands",
            &[json!({
                "_id": {"$oid": "b1"},
                "barcode": " 511111019862 ",
                "category": "Baking",
                "categoryCode": "BAKING",
                "cpg": {"$id": {"$oid": "601ac114be37ce2ead437550"}, "$ref": "Cogs"},
                "name": "test brand @1612366101024",
                "topBrand": false
            })],
        );
        let brands = normalize_brands(&raw, &mut CoercionLog::new()).unwrap();
        let brand = &brands.rows[0];

        assert_eq!(brand.id, "b1");
        assert_eq!(brand.barcode.as_deref(), Some("511111019862"));
        assert_eq!(brand.cpg_id.as_deref(), Some("601ac114be37ce2ead437550"));
        assert_eq!(brand.cpg_ref.as_deref(), Some("Cogs"));
        assert_eq!(brand.top_brand, Some(false));
        assert!(!brand.extra_attributes.contains_key("cpg"));
    }

    #[test]
    fn test_normalize_receipts_renames_create_date_and_prunes_items() {
        let raw = table(
            "receipts",
            &[json!({
                "_id": {"$oid": "r1"},
                "createDate": {"$date": 1609687531000i64},
                "purchaseDate": {"$date": 1000},
                "rewardsReceiptStatus": "FINISHED",
                "totalSpent": "26.00",
                "pointsEarned": "500.0",
                "bonusPointsEarned": 500,
                "userId": "u1",
                "rewardsReceiptItemList": [{"barcode": "1"}]
            })],
        );
        let receipts = normalize_receipts(&raw, &mut CoercionLog::new()).unwrap();
        let receipt = &receipts.rows[0];

        assert_eq!(receipt.id, "r1");
        assert_eq!(
            receipt.created_date.map(|d| d.timestamp_millis()),
            Some(1_609_687_531_000)
        );
        assert_eq!(receipt.purchase_date.map(|d| d.timestamp_millis()), Some(1000));
        assert_eq!(receipt.rewards_receipt_status, Some(ReceiptStatus::Finished));
        assert_eq!(receipt.total_spent, Some(26.0));
        assert_eq!(receipt.points_earned, Some(500.0));
        assert_eq!(receipt.bonus_points_earned, Some(500));
        assert_eq!(receipt.user_id.as_deref(), Some("u1"));
        assert!(receipt.extra_attributes.is_empty());
    }

    #[test]
    fn test_null_create_date_falls_back_to_created_date() {
        let raw = table(
            "receipts",
            &[
                json!({
                    "_id": {"$oid": "r1"},
                    "createDate": null,
                    "createdDate": {"$date": 1609687531000i64}
                }),
                json!({"_id": {"$oid": "r2"}, "createdDate": {"$date": 5}}),
                json!({"_id": {"$oid": "r3"}, "createDate": null}),
            ],
        );
        let mut log = CoercionLog::new();
        let receipts = normalize_receipts(&raw, &mut log).unwrap();

        let millis: Vec<Option<i64>> = receipts
            .rows
            .iter()
            .map(|r| r.created_date.map(|d| d.timestamp_millis()))
            .collect();
        assert_eq!(millis, vec![Some(1_609_687_531_000), Some(5), None]);
        assert!(log.is_empty());
    }

    #[test]
    fn test_overflowing_total_spent_becomes_null() {
        let text = "{\"_id\": {\"$oid\": \"r1\"}, \"totalSpent\": 1e400}\n";
        let raw = load_jsonl_reader(Cursor::new(text), "receipts", MalformedLinePolicy::Abort)
            .unwrap();
        let mut log = CoercionLog::new();
        let receipts = normalize_receipts(&raw, &mut log).unwrap();

        assert_eq!(receipts.rows[0].total_spent, None);
        assert_eq!(log.count_for("receipts", "totalSpent"), 1);
    }
}
