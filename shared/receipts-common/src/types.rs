//! Normalized entity rows and data-quality findings
//!
//! Each row type serializes to exactly the columns of its Arrow schema in
//! [`crate::schemas`]. Timestamps serialize as epoch milliseconds, the
//! open attribute map is omitted when empty.

use arrow_schema::Schema;
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::schemas::{
    brands_schema, receipt_items_schema, receipts_schema, users_schema, BRANDS_TABLE,
    RECEIPTS_TABLE, RECEIPT_ITEMS_TABLE, USERS_TABLE,
};

/// Source keys that are not part of a table's declared column set
pub type ExtraAttributes = BTreeMap<String, Value>;

/// A normalized row bound to one relation
pub trait Entity: Serialize {
    /// Relation name in the columnar store
    const TABLE: &'static str;

    /// Declared column set
    fn schema() -> Arc<Schema>;

    /// Primary key, or the parent reference for receipt items
    fn key(&self) -> &str;
}

/// A user account
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub active: Option<bool>,
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub created_date: Option<DateTime<Utc>>,
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub last_login: Option<DateTime<Utc>>,
    pub role: Option<String>,
    pub sign_up_source: Option<String>,
    pub state: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_attributes: ExtraAttributes,
}

impl Entity for User {
    const TABLE: &'static str = USERS_TABLE;

    fn schema() -> Arc<Schema> {
        users_schema()
    }

    fn key(&self) -> &str {
        &self.id
    }
}

/// A brand, joinable to receipt items through its canonical barcode
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Brand {
    pub id: String,
    pub barcode: Option<String>,
    pub brand_code: Option<String>,
    pub category: Option<String>,
    pub category_code: Option<String>,
    pub cpg_id: Option<String>,
    pub cpg_ref: Option<String>,
    pub name: Option<String>,
    pub top_brand: Option<bool>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_attributes: ExtraAttributes,
}

impl Entity for Brand {
    const TABLE: &'static str = BRANDS_TABLE;

    fn schema() -> Arc<Schema> {
        brands_schema()
    }

    fn key(&self) -> &str {
        &self.id
    }
}

/// A scanned receipt, without its item list
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub id: String,
    pub bonus_points_earned: Option<i64>,
    pub bonus_points_earned_reason: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub created_date: Option<DateTime<Utc>>,
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub date_scanned: Option<DateTime<Utc>>,
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub finished_date: Option<DateTime<Utc>>,
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub modify_date: Option<DateTime<Utc>>,
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub points_awarded_date: Option<DateTime<Utc>>,
    pub points_earned: Option<f64>,
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub purchase_date: Option<DateTime<Utc>>,
    pub purchased_item_count: Option<i64>,
    pub rewards_receipt_status: Option<ReceiptStatus>,
    pub total_spent: Option<f64>,
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_attributes: ExtraAttributes,
}

impl Entity for Receipt {
    const TABLE: &'static str = RECEIPTS_TABLE;

    fn schema() -> Arc<Schema> {
        receipts_schema()
    }

    fn key(&self) -> &str {
        &self.id
    }
}

/// One element of a receipt's item list
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptItem {
    pub receipt_id: String,
    pub barcode: Option<String>,
    pub brand_code: Option<String>,
    pub description: Option<String>,
    pub final_price: Option<f64>,
    pub item_price: Option<f64>,
    pub needs_fetch_review: Option<bool>,
    pub partner_item_id: Option<String>,
    pub points_earned: Option<f64>,
    pub quantity_purchased: Option<f64>,
    pub rewards_group: Option<String>,
    pub user_flagged_barcode: Option<String>,
    pub user_flagged_price: Option<f64>,
    pub user_flagged_quantity: Option<f64>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_attributes: ExtraAttributes,
}

impl ReceiptItem {
    /// An item row carrying nothing but its parent reference
    pub fn for_receipt(receipt_id: impl Into<String>) -> Self {
        Self {
            receipt_id: receipt_id.into(),
            barcode: None,
            brand_code: None,
            description: None,
            final_price: None,
            item_price: None,
            needs_fetch_review: None,
            partner_item_id: None,
            points_earned: None,
            quantity_purchased: None,
            rewards_group: None,
            user_flagged_barcode: None,
            user_flagged_price: None,
            user_flagged_quantity: None,
            extra_attributes: ExtraAttributes::new(),
        }
    }
}

impl Entity for ReceiptItem {
    const TABLE: &'static str = RECEIPT_ITEMS_TABLE;

    fn schema() -> Arc<Schema> {
        receipt_items_schema()
    }

    fn key(&self) -> &str {
        &self.receipt_id
    }
}

/// Receipt processing status
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ReceiptStatus {
    /// Accepted receipt
    Finished,
    Rejected,
    Pending,
    Submitted,
    Flagged,
    /// Any status not listed above, upper-cased
    Other(String),
}

impl ReceiptStatus {
    /// Parse a source status, case-insensitively
    pub fn parse(raw: &str) -> Self {
        let upper = raw.trim().to_ascii_uppercase();
        match upper.as_str() {
            "FINISHED" => Self::Finished,
            "REJECTED" => Self::Rejected,
            "PENDING" => Self::Pending,
            "SUBMITTED" => Self::Submitted,
            "FLAGGED" => Self::Flagged,
            _ => Self::Other(upper),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Finished => "FINISHED",
            Self::Rejected => "REJECTED",
            Self::Pending => "PENDING",
            Self::Submitted => "SUBMITTED",
            Self::Flagged => "FLAGGED",
            Self::Other(status) => status,
        }
    }
}

impl fmt::Display for ReceiptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ReceiptStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Entity type named by a polymorphic reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefTarget {
    Cogs,
    Cpg,
    Other(String),
}

impl RefTarget {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "Cogs" => Self::Cogs,
            "Cpg" => Self::Cpg,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Cogs => "Cogs",
            Self::Cpg => "Cpg",
            Self::Other(name) => name,
        }
    }
}

/// A reference to a row of another entity: `{"$ref": <type>, "$id": {"$oid": <id>}}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignRef {
    pub target: RefTarget,
    pub id: String,
}

/// A cell that failed type coercion and was stored as null
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoercionWarning {
    pub table: String,
    /// 1-based source line of the owning record
    pub line: usize,
    pub column: String,
    /// Compact JSON text of the offending value
    pub value: String,
    pub reason: String,
}

/// Rows that share a key but differ in some other column
///
/// Left in place by the transform; surfaced for analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateKeyAnomaly {
    pub table: String,
    pub key: String,
    pub row_count: usize,
}
