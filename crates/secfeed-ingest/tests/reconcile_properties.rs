//! Property tests for record reconciliation

use proptest::prelude::*;
use secfeed_common::{FieldValue, Record};
use secfeed_ingest::reconcile::reconcile;
use std::collections::BTreeMap;

const KEYS: [&str; 2] = ["cve_id", "source"];

fn key_of(record: &Record) -> (FieldValue, FieldValue) {
    (
        record.get("cve_id").cloned().unwrap_or(FieldValue::Null),
        record.get("source").cloned().unwrap_or(FieldValue::Null),
    )
}

fn record((cve_id, source): &(String, String), (score, status): &(i64, Option<String>)) -> Record {
    Record::new()
        .with("cve_id", cve_id.as_str())
        .with("source", source.as_str())
        .with("score", *score)
        .with("status", status.clone())
}

prop_compose! {
    fn table()(rows in prop::collection::btree_map(
        ("CVE-20[0-9]{2}-[0-9]{1,2}", "(nvd|cna)"),
        (0i64..4, prop::option::of("(Analyzed|Modified)")),
        0..24,
    )) -> BTreeMap<(String, String), (i64, Option<String>)> {
        rows
    }
}

fn records(rows: &BTreeMap<(String, String), (i64, Option<String>)>) -> Vec<Record> {
    rows.iter().map(|(k, v)| record(k, v)).collect()
}

proptest! {
    #[test]
    fn identical_sets_reconcile_to_nothing(rows in table()) {
        let current = records(&rows);
        let mut incoming = current.clone();
        incoming.reverse();
        prop_assert!(reconcile(&current, &incoming, &KEYS).unwrap().is_empty());
    }

    #[test]
    fn everything_is_new_against_an_empty_table(rows in table()) {
        let incoming = records(&rows);
        let result = reconcile(&[], &incoming, &KEYS).unwrap();
        prop_assert!(result.changed.is_empty());
        prop_assert_eq!(result.new, incoming);
    }

    #[test]
    fn partition_matches_stored_state(current_rows in table(), incoming_rows in table()) {
        let current = records(&current_rows);
        let incoming = records(&incoming_rows);
        let result = reconcile(&current, &incoming, &KEYS).unwrap();

        let stored: BTreeMap<_, _> = current.iter().map(|r| (key_of(r), r)).collect();
        for record in &result.new {
            prop_assert!(!stored.contains_key(&key_of(record)));
        }
        for record in &result.changed {
            let existing = stored.get(&key_of(record));
            prop_assert!(existing.is_some_and(|existing| *existing != record));
        }

        let unchanged = incoming
            .iter()
            .filter(|r| stored.get(&key_of(r)).is_some_and(|existing| *existing == *r))
            .count();
        prop_assert_eq!(result.new.len() + result.changed.len() + unchanged, incoming.len());

        // Output is ordered by composite key
        let keys: Vec<_> = result.new.iter().map(key_of).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        prop_assert_eq!(keys, sorted);
    }

    #[test]
    fn applying_the_result_converges(current_rows in table(), incoming_rows in table()) {
        let current = records(&current_rows);
        let incoming = records(&incoming_rows);
        let result = reconcile(&current, &incoming, &KEYS).unwrap();

        let mut applied: BTreeMap<_, _> = current.into_iter().map(|r| (key_of(&r), r)).collect();
        for record in result.new.into_iter().chain(result.changed) {
            applied.insert(key_of(&record), record);
        }
        let applied: Vec<Record> = applied.into_values().collect();

        prop_assert!(reconcile(&applied, &incoming, &KEYS).unwrap().is_empty());
    }
}

#[test]
fn duplicate_incoming_key_is_rejected() {
    let row = record(&("CVE-2024-0001".to_string(), "nvd".to_string()), &(1, None));
    assert!(reconcile(&[], &[row.clone(), row], &KEYS).is_err());
}
