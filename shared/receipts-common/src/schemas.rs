//! Arrow schemas for the normalized tables
//!
//! The column set of every relation is declared up front. Source keys that
//! are not declared here travel in the `extraAttributes` JSON column.

use arrow_schema::{DataType, Field, Schema, TimeUnit};
use std::sync::Arc;

pub const USERS_TABLE: &str = "users";
pub const BRANDS_TABLE: &str = "brands";
pub const RECEIPTS_TABLE: &str = "receipts";
pub const RECEIPT_ITEMS_TABLE: &str = "receiptItems";

/// Open attribute map column carried by every table
pub const EXTRA_ATTRIBUTES_COLUMN: &str = "extraAttributes";

fn timestamp(name: &str) -> Field {
    Field::new(name, DataType::Timestamp(TimeUnit::Microsecond, None), true)
}

fn extra_attributes() -> Field {
    Field::new(EXTRA_ATTRIBUTES_COLUMN, DataType::Utf8, true)
}

/// Create Arrow schema for the users table
pub fn users_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("active", DataType::Boolean, true),
        timestamp("createdDate"),
        timestamp("lastLogin"),
        Field::new("role", DataType::Utf8, true),
        Field::new("signUpSource", DataType::Utf8, true),
        Field::new("state", DataType::Utf8, true),
        extra_attributes(),
    ]))
}

/// Create Arrow schema for the brands table
///
/// `barcode` is canonical (string cast, whitespace stripped) and is not
/// unique. `cpgId`/`cpgRef` come from the polymorphic `cpg` reference.
pub fn brands_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("barcode", DataType::Utf8, true),
        Field::new("brandCode", DataType::Utf8, true),
        Field::new("category", DataType::Utf8, true),
        Field::new("categoryCode", DataType::Utf8, true),
        Field::new("cpgId", DataType::Utf8, true),
        Field::new("cpgRef", DataType::Utf8, true),
        Field::new("name", DataType::Utf8, true),
        Field::new("topBrand", DataType::Boolean, true),
        extra_attributes(),
    ]))
}

/// Create Arrow schema for the receipts table
///
/// The nested item list is not part of this relation; it becomes `receiptItems`.
pub fn receipts_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("bonusPointsEarned", DataType::Int64, true),
        Field::new("bonusPointsEarnedReason", DataType::Utf8, true),
        timestamp("createdDate"),
        timestamp("dateScanned"),
        timestamp("finishedDate"),
        timestamp("modifyDate"),
        timestamp("pointsAwardedDate"),
        Field::new("pointsEarned", DataType::Float64, true),
        timestamp("purchaseDate"),
        Field::new("purchasedItemCount", DataType::Int64, true),
        Field::new("rewardsReceiptStatus", DataType::Utf8, true),
        Field::new("totalSpent", DataType::Float64, true),
        Field::new("userId", DataType::Utf8, true),
        extra_attributes(),
    ]))
}

/// Create Arrow schema for the receiptItems table
///
/// One row per element of a receipt's item list. `receiptId` is always
/// populated from the parent receipt.
pub fn receipt_items_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("receiptId", DataType::Utf8, false),
        Field::new("barcode", DataType::Utf8, true),
        Field::new("brandCode", DataType::Utf8, true),
        Field::new("description", DataType::Utf8, true),
        Field::new("finalPrice", DataType::Float64, true),
        Field::new("itemPrice", DataType::Float64, true),
        Field::new("needsFetchReview", DataType::Boolean, true),
        Field::new("partnerItemId", DataType::Utf8, true),
        Field::new("pointsEarned", DataType::Float64, true),
        Field::new("quantityPurchased", DataType::Float64, true),
        Field::new("rewardsGroup", DataType::Utf8, true),
        Field::new("userFlaggedBarcode", DataType::Utf8, true),
        Field::new("userFlaggedPrice", DataType::Float64, true),
        Field::new("userFlaggedQuantity", DataType::Float64, true),
        extra_attributes(),
    ]))
}

/// Get Arrow schema for a table name
pub fn get_schema_for_table(table_name: &str) -> Option<Arc<Schema>> {
    match table_name {
        USERS_TABLE => Some(users_schema()),
        BRANDS_TABLE => Some(brands_schema()),
        RECEIPTS_TABLE => Some(receipts_schema()),
        RECEIPT_ITEMS_TABLE => Some(receipt_items_schema()),
        _ => None,
    }
}

/// Get all table names in load order
pub fn get_all_table_names() -> Vec<&'static str> {
    vec![
        USERS_TABLE,
        BRANDS_TABLE,
        RECEIPTS_TABLE,
        RECEIPT_ITEMS_TABLE,
    ]
}
