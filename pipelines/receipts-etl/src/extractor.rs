//! Receipt line-item extraction
//!
//! Explodes each receipt's nested item list into [`ReceiptItem`] rows that
//! carry the parent receipt's key. A receipt with an empty, null or absent
//! list contributes no items; its own row is untouched.

use receipts_common::{ReceiptItem, RECEIPTS_TABLE, RECEIPT_ITEMS_TABLE};
use serde_json::{Map, Value};
use std::slice;
use tracing::debug;

use crate::loader::{RawRecord, RawTable};
use crate::normalizer::{
    unwrap_identifier, CellReader, CoercionLog, ID_COLUMN, ITEM_LIST_COLUMN,
};

const ITEM_SOURCE_COLUMNS: &[&str] = &[
    "barcode",
    "brandCode",
    "description",
    "finalPrice",
    "itemPrice",
    "needsFetchReview",
    "partnerItemId",
    "pointsEarned",
    "quantityPurchased",
    "rewardsGroup",
    "userFlaggedBarcode",
    "userFlaggedPrice",
    "userFlaggedQuantity",
];

/// Item elements of one receipt paired with the receipt's key
struct ItemSource<'a> {
    receipt_id: String,
    line: usize,
    elements: &'a [Value],
}

/// Iterator yielding one item row per list element across a receipts table
///
/// Receipts without a usable key are passed over silently; the normalizer
/// already drops and reports them.
pub struct ItemFanOut<'a> {
    receipts: slice::Iter<'a, RawRecord>,
    current: Option<ItemSource<'a>>,
    position: usize,
    log: &'a mut CoercionLog,
}

impl<'a> ItemFanOut<'a> {
    pub fn new(table: &'a RawTable, log: &'a mut CoercionLog) -> Self {
        Self {
            receipts: table.records().iter(),
            current: None,
            position: 0,
            log,
        }
    }

    fn next_source(&mut self) -> Option<ItemSource<'a>> {
        for record in self.receipts.by_ref() {
            let receipt_id = match unwrap_identifier(record.get(ID_COLUMN)) {
                Ok(Some(id)) => id,
                _ => continue,
            };

            let list = record.get(ITEM_LIST_COLUMN);
            let elements: &'a [Value] = match list {
                Value::Null => &[],
                Value::Array(elements) => elements,
                other => {
                    let reason = "item list is not an array".to_string();
                    CellReader::new(RECEIPTS_TABLE, record.line, &record.fields, self.log)
                        .warn(ITEM_LIST_COLUMN, other, reason);
                    &[]
                }
            };
            if elements.is_empty() {
                debug!("Receipt {} has no items", receipt_id);
                continue;
            }

            return Some(ItemSource {
                receipt_id,
                line: record.line,
                elements,
            });
        }
        None
    }
}

impl<'a> Iterator for ItemFanOut<'a> {
    type Item = ReceiptItem;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(source) = &self.current {
                if let Some(element) = source.elements.get(self.position) {
                    self.position += 1;
                    let (receipt_id, line) = (source.receipt_id.clone(), source.line);
                    return Some(build_item(receipt_id, line, element, self.log));
                }
            }
            self.current = Some(self.next_source()?);
            self.position = 0;
        }
    }
}

fn build_item(
    receipt_id: String,
    line: usize,
    element: &Value,
    log: &mut CoercionLog,
) -> ReceiptItem {
    let fields = match element {
        Value::Object(fields) => fields,
        other => {
            CellReader::new(RECEIPT_ITEMS_TABLE, line, &Map::new(), log).warn(
                ITEM_LIST_COLUMN,
                other,
                "item is not an object".to_string(),
            );
            return ReceiptItem::for_receipt(receipt_id);
        }
    };

    let mut cells = CellReader::new(RECEIPT_ITEMS_TABLE, line, fields, log);
    ReceiptItem {
        receipt_id,
        barcode: cells.barcode("barcode"),
        brand_code: cells.string("brandCode"),
        description: cells.string("description"),
        final_price: cells.float("finalPrice"),
        item_price: cells.float("itemPrice"),
        needs_fetch_review: cells.boolean("needsFetchReview"),
        partner_item_id: cells.string("partnerItemId"),
        points_earned: cells.float("pointsEarned"),
        quantity_purchased: cells.float("quantityPurchased"),
        rewards_group: cells.string("rewardsGroup"),
        user_flagged_barcode: cells.barcode("userFlaggedBarcode"),
        user_flagged_price: cells.float("userFlaggedPrice"),
        user_flagged_quantity: cells.float("userFlaggedQuantity"),
        extra_attributes: cells.extras(ITEM_SOURCE_COLUMNS),
    }
}

/// Explode every receipt's item list into item rows
pub fn extract_receipt_items(table: &RawTable, log: &mut CoercionLog) -> Vec<ReceiptItem> {
    let items: Vec<ReceiptItem> = ItemFanOut::new(table, log).collect();
    debug!(
        "Extracted {} items from {} receipts",
        items.len(),
        table.len()
    );
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::load_jsonl_reader;
    use pretty_assertions::assert_eq;
    use receipts_common::MalformedLinePolicy;
    use serde_json::json;
    use std::io::Cursor;

    fn receipts(lines: &[Value]) -> RawTable {
        let text: String = lines.iter().map(|l| format!("{}\n", l)).collect();
        load_jsonl_reader(Cursor::new(text), "receipts", MalformedLinePolicy::Abort).unwrap()
    }

    #[test]
    fn test_items_carry_parent_key_and_canonical_barcode() {
        let table = receipts(&[json!({
            "_id": {"$oid": "r1"},
            "purchaseDate": {"$date": 1000},
            "rewardsReceiptItemList": [{"barcode": " 511111019862 ", "quantityPurchased": 2}]
        })]);
        let mut log = CoercionLog::new();
        let items = extract_receipt_items(&table, &mut log);

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].receipt_id, "r1");
        assert_eq!(items[0].barcode.as_deref(), Some("511111019862"));
        assert_eq!(items[0].quantity_purchased, Some(2.0));
        assert!(log.is_empty());
    }

    #[test]
    fn test_absent_null_and_empty_lists_yield_no_items() {
        let table = receipts(&[
            json!({"_id": {"$oid": "r1"}}),
            json!({"_id": {"$oid": "r2"}, "rewardsReceiptItemList": null}),
            json!({"_id": {"$oid": "r3"}, "rewardsReceiptItemList": []}),
            json!({"_id": {"$oid": "r4"}, "rewardsReceiptItemList": [{"description": "x"}, {"description": "y"}]}),
        ]);
        let items = extract_receipt_items(&table, &mut CoercionLog::new());

        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|item| item.receipt_id == "r4"));
        assert_eq!(items[1].description.as_deref(), Some("y"));
    }

    #[test]
    fn test_non_object_element_still_gets_parent_reference() {
        let table = receipts(&[json!({
            "_id": {"$oid": "r1"},
            "rewardsReceiptItemList": ["garbage", {"barcode": "4011"}]
        })]);
        let mut log = CoercionLog::new();
        let items = extract_receipt_items(&table, &mut log);

        assert_eq!(items.len(), 2);
        assert_eq!(items[0], ReceiptItem::for_receipt("r1"));
        assert_eq!(items[1].barcode.as_deref(), Some("4011"));
        assert_eq!(log.count_for("receiptItems", ITEM_LIST_COLUMN), 1);
    }

    #[test]
    fn test_item_without_barcode_is_kept_with_null_barcode() {
        let table = receipts(&[json!({
            "_id": {"$oid": "r1"},
            "rewardsReceiptItemList": [{"description": "ITEM NOT FOUND", "finalPrice": "26.00"}]
        })]);
        let items = extract_receipt_items(&table, &mut CoercionLog::new());

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].barcode, None);
        assert_eq!(items[0].final_price, Some(26.0));
    }

    #[test]
    fn test_undeclared_item_keys_go_to_extra_attributes() {
        let table = receipts(&[json!({
            "_id": {"$oid": "r1"},
            "rewardsReceiptItemList": [{"barcode": "1", "competitiveProduct": true}]
        })]);
        let items = extract_receipt_items(&table, &mut CoercionLog::new());
        assert_eq!(
            items[0].extra_attributes.get("competitiveProduct"),
            Some(&json!(true))
        );
    }

    #[test]
    fn test_receipt_without_key_contributes_no_items() {
        let table = receipts(&[
            json!({"_id": {"$oid": "r1"}}),
            json!({"rewardsReceiptItemList": [{"barcode": "1"}]}),
        ]);
        let items = extract_receipt_items(&table, &mut CoercionLog::new());
        assert!(items.is_empty());
    }
}
