//! Exact-duplicate removal and duplicate-key detection

use receipts_common::{DuplicateKeyAnomaly, Entity, EtlError, Result};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, warn};

/// Rows left after deduplication
#[derive(Debug, Clone)]
pub struct DedupOutcome<T> {
    pub rows: Vec<T>,
    pub removed: usize,
}

/// Drop rows identical in every column to an earlier row
///
/// Runs on normalized rows, so two source records that only differ in
/// wrapper shape collapse. First occurrence wins and order is kept.
pub fn dedup_rows<T: Serialize>(rows: Vec<T>) -> Result<DedupOutcome<T>> {
    let before = rows.len();
    let mut seen = HashSet::with_capacity(before);
    let mut kept = Vec::with_capacity(before);

    for row in rows {
        let fingerprint = serde_json::to_string(&row)
            .map_err(|e| EtlError::Serialization(format!("Failed to fingerprint row: {}", e)))?;
        if seen.insert(fingerprint) {
            kept.push(row);
        }
    }

    let removed = before - kept.len();
    if removed > 0 {
        debug!("Removed {} exact duplicate rows", removed);
    }
    Ok(DedupOutcome {
        rows: kept,
        removed,
    })
}

/// Keys shared by rows that differ elsewhere
///
/// Expects deduplicated input; every repeated key is then a
/// different-payload anomaly. The rows themselves are left alone.
pub fn find_duplicate_keys<T: Entity>(rows: &[T]) -> Vec<DuplicateKeyAnomaly> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for row in rows {
        *counts.entry(row.key()).or_insert(0) += 1;
    }

    let anomalies: Vec<DuplicateKeyAnomaly> = counts
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .collect::<BTreeMap<_, _>>()
        .into_iter()
        .map(|(key, row_count)| DuplicateKeyAnomaly {
            table: T::TABLE.to_string(),
            key: key.to_string(),
            row_count,
        })
        .collect();

    if !anomalies.is_empty() {
        warn!(
            "{}: {} keys shared by rows with different payloads",
            T::TABLE,
            anomalies.len()
        );
    }
    anomalies
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use receipts_common::{ExtraAttributes, User};

    fn user(id: &str, state: &str) -> User {
        User {
            id: id.to_string(),
            active: Some(true),
            created_date: None,
            last_login: None,
            role: Some("consumer".to_string()),
            sign_up_source: None,
            state: Some(state.to_string()),
            extra_attributes: ExtraAttributes::new(),
        }
    }

    #[test]
    fn test_full_row_duplicates_collapse_to_one() {
        let rows = vec![user("u1", "WI"), user("u2", "WI"), user("u1", "WI")];
        let outcome = dedup_rows(rows).unwrap();

        assert_eq!(outcome.removed, 1);
        assert_eq!(outcome.rows, vec![user("u1", "WI"), user("u2", "WI")]);
    }

    #[test]
    fn test_dedup_is_idempotent() {
        let rows = vec![user("u1", "WI"), user("u1", "WI"), user("u2", "AL")];
        let once = dedup_rows(rows).unwrap();
        let twice = dedup_rows(once.rows.clone()).unwrap();

        assert_eq!(twice.removed, 0);
        assert_eq!(twice.rows, once.rows);
    }

    #[test]
    fn test_same_key_different_payload_is_kept_and_reported() {
        let rows = vec![user("u1", "WI"), user("u1", "AL"), user("u2", "WI")];
        let outcome = dedup_rows(rows).unwrap();
        assert_eq!(outcome.rows.len(), 3);

        let anomalies = find_duplicate_keys(&outcome.rows);
        assert_eq!(
            anomalies,
            vec![DuplicateKeyAnomaly {
                table: "users".to_string(),
                key: "u1".to_string(),
                row_count: 2,
            }]
        );
    }

    #[test]
    fn test_no_anomalies_for_unique_keys() {
        let rows = vec![user("u1", "WI"), user("u2", "WI")];
        assert!(find_duplicate_keys(&rows).is_empty());
    }
}
