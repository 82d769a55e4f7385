//! Diff-based reconciliation of incoming records against stored ones

use crate::error::{IngestError, RecordSide, Result};
use secfeed_common::{FieldValue, Record};
use std::collections::BTreeMap;

/// Records to insert and records to update, both ordered by composite key
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciliationResult {
    pub new: Vec<Record>,
    pub changed: Vec<Record>,
}

impl ReconciliationResult {
    pub fn is_empty(&self) -> bool {
        self.new.is_empty() && self.changed.is_empty()
    }
}

type CompositeKey = Vec<FieldValue>;

/// Partition `incoming` into records unseen in `current` and records whose
/// non-key fields differ from their stored counterpart
///
/// Keys are compared exactly, with no normalization. A field present on the
/// incoming record but absent from the stored one counts as `Null` there.
/// Every record of both sets must carry every key field, and keys must be
/// unique within each set.
pub fn reconcile<K: AsRef<str>>(
    current: &[Record],
    incoming: &[Record],
    key_fields: &[K],
) -> Result<ReconciliationResult> {
    if key_fields.is_empty() {
        return Err(IngestError::Config("reconciliation needs at least one key field".to_string()));
    }
    let key_fields: Vec<&str> = key_fields.iter().map(AsRef::as_ref).collect();

    let stored = index_by_key(current, &key_fields, RecordSide::Current)?;
    let fresh = index_by_key(incoming, &key_fields, RecordSide::Incoming)?;

    let mut result = ReconciliationResult::default();
    for (key, record) in fresh {
        match stored.get(&key) {
            None => result.new.push(record.clone()),
            Some(existing) if differs(record, existing, &key_fields) => {
                result.changed.push(record.clone())
            },
            Some(_) => {},
        }
    }
    Ok(result)
}

fn index_by_key<'a>(
    records: &'a [Record],
    key_fields: &[&str],
    side: RecordSide,
) -> Result<BTreeMap<CompositeKey, &'a Record>> {
    let mut index = BTreeMap::new();
    for (position, record) in records.iter().enumerate() {
        let key = composite_key(record, key_fields, side, position)?;
        if index.contains_key(&key) {
            return Err(IngestError::DuplicateKey {
                side,
                key: describe_key(&key),
            });
        }
        index.insert(key, record);
    }
    Ok(index)
}

fn composite_key(
    record: &Record,
    key_fields: &[&str],
    side: RecordSide,
    position: usize,
) -> Result<CompositeKey> {
    key_fields
        .iter()
        .map(|field| {
            record
                .get(field)
                .cloned()
                .ok_or_else(|| IngestError::MissingRequiredField {
                    side,
                    position,
                    field: field.to_string(),
                })
        })
        .collect()
}

/// Compare non-key fields of both records; an absent field counts as null
fn differs(incoming: &Record, current: &Record, key_fields: &[&str]) -> bool {
    let any_mismatch = |left: &Record, right: &Record| {
        left.iter()
            .filter(|(name, _)| !key_fields.contains(name))
            .any(|(name, value)| right.get(name).unwrap_or(&FieldValue::Null) != value)
    };
    any_mismatch(incoming, current) || any_mismatch(current, incoming)
}

fn describe_key(key: &[FieldValue]) -> String {
    key.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn rec(id: &str, v: i64) -> Record {
        Record::new().with("id", id).with("v", v)
    }

    #[test]
    fn test_unseen_record_is_new() {
        let current = vec![rec("X1", 1)];
        let incoming = vec![rec("X1", 1), rec("X2", 1)];

        let result = reconcile(&current, &incoming, &["id"]).unwrap();
        assert_eq!(result.new, vec![rec("X2", 1)]);
        assert!(result.changed.is_empty());
    }

    #[test]
    fn test_differing_field_is_changed() {
        let current = vec![rec("X1", 1)];
        let incoming = vec![rec("X1", 2)];

        let result = reconcile(&current, &incoming, &["id"]).unwrap();
        assert!(result.new.is_empty());
        assert_eq!(result.changed, vec![rec("X1", 2)]);
    }

    #[test]
    fn test_missing_stored_field_counts_as_null() {
        let current = vec![Record::new().with("id", "X1")];
        let same = vec![Record::new().with("id", "X1").with("notes", FieldValue::Null)];
        let filled = vec![Record::new().with("id", "X1").with("notes", "patched")];

        assert!(reconcile(&current, &same, &["id"]).unwrap().is_empty());
        assert_eq!(reconcile(&current, &filled, &["id"]).unwrap().changed.len(), 1);
    }

    #[test]
    fn test_field_dropped_from_incoming_is_changed() {
        let current = vec![rec("X1", 1)];
        let incoming = vec![Record::new().with("id", "X1")];

        let result = reconcile(&current, &incoming, &["id"]).unwrap();
        assert_eq!(result.changed, incoming);

        let stored_null = vec![Record::new().with("id", "X1").with("v", FieldValue::Null)];
        assert!(reconcile(&stored_null, &incoming, &["id"]).unwrap().is_empty());
    }

    #[test]
    fn test_composite_key_is_order_sensitive_and_exact() {
        let key = ["ghsa_id", "package_name"];
        let current = vec![Record::new()
            .with("ghsa_id", "GHSA-aaaa")
            .with("package_name", "lodash")
            .with("severity", "HIGH")];
        let incoming = vec![
            Record::new()
                .with("ghsa_id", "GHSA-aaaa")
                .with("package_name", "Lodash")
                .with("severity", "HIGH"),
            Record::new()
                .with("ghsa_id", "GHSA-aaaa")
                .with("package_name", "lodash")
                .with("severity", "HIGH"),
        ];

        let result = reconcile(&current, &incoming, &key).unwrap();
        assert_eq!(result.new.len(), 1);
        assert_eq!(result.new[0].get("package_name"), Some(&FieldValue::from("Lodash")));
        assert!(result.changed.is_empty());
    }

    #[test]
    fn test_outputs_are_sorted_by_key() {
        let incoming = vec![rec("C", 1), rec("A", 1), rec("B", 1)];
        let result = reconcile(&[], &incoming, &["id"]).unwrap();
        let ids: Vec<&str> = result.new.iter().map(|r| r.get("id").unwrap().as_str().unwrap()).collect();
        assert_eq!(ids, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_missing_key_field_fails_fast() {
        let current = vec![rec("X1", 1), Record::new().with("v", 3i64)];
        let err = reconcile(&current, &[rec("X1", 1)], &["id"]).unwrap_err();
        assert!(matches!(
            err,
            IngestError::MissingRequiredField {
                side: RecordSide::Current,
                position: 1,
                ..
            }
        ));
    }

    #[test]
    fn test_duplicate_keys_are_rejected() {
        let incoming = vec![rec("X1", 1), rec("X1", 2)];
        let err = reconcile(&[], &incoming, &["id"]).unwrap_err();
        assert!(matches!(err, IngestError::DuplicateKey { side: RecordSide::Incoming, .. }));
    }

    #[test]
    fn test_empty_key_list_is_a_configuration_error() {
        let keys: [&str; 0] = [];
        assert!(matches!(
            reconcile(&[rec("X1", 1)], &[rec("X1", 1)], &keys),
            Err(IngestError::Config(_))
        ));
    }
}
