//! Storage collaborator
//!
//! [`TableStore`] is the surface the sync jobs consume. [`CsvTableStore`]
//! keeps one CSV file per table under a directory, written with the
//! mapping's external column names and rewritten atomically on every change.

use crate::consolidate::{discard_staging, staging_path};
use crate::csv_io::{read_records_from_path, write_records_to_path};
use crate::error::{IngestError, RecordSide, Result};
use crate::mapping::{FieldMapping, Naming};
use async_trait::async_trait;
use secfeed_common::{FieldValue, Record};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// A stored table: its name, column mapping and composite key
#[derive(Debug, Clone)]
pub struct TableSpec {
    pub name: String,
    pub mapping: FieldMapping,
    /// Internal field names forming the composite key
    pub key_fields: Vec<String>,
}

impl TableSpec {
    pub fn new(name: impl Into<String>, mapping: FieldMapping, key_fields: &[&str]) -> Self {
        Self {
            name: name.into(),
            mapping,
            key_fields: key_fields.iter().map(|k| k.to_string()).collect(),
        }
    }
}

#[async_trait]
pub trait TableStore: Send + Sync {
    async fn table_exists(&self, table: &TableSpec) -> Result<bool>;

    async fn create_table(&self, table: &TableSpec) -> Result<()>;

    /// Every stored record, with internal field names
    async fn read_all(&self, table: &TableSpec) -> Result<Vec<Record>>;

    /// Insert records whose keys are not stored yet
    async fn bulk_insert(&self, table: &TableSpec, records: &[Record]) -> Result<usize>;

    /// Overwrite the fields carried by each record on the stored row with
    /// the same key
    async fn bulk_update(&self, table: &TableSpec, records: &[Record], key_fields: &[String]) -> Result<usize>;
}

/// One CSV file per table
#[derive(Debug, Clone)]
pub struct CsvTableStore {
    dir: PathBuf,
}

impl CsvTableStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn table_path(&self, table: &TableSpec) -> PathBuf {
        self.dir.join(format!("{}.csv", table.name))
    }

    async fn load(&self, table: &TableSpec) -> Result<Vec<Record>> {
        let path = self.table_path(table);
        let mapping = table.mapping.clone();
        blocking(move || read_records_from_path(&path, &mapping, Naming::External)).await
    }

    async fn store(&self, table: &TableSpec, records: Vec<Record>) -> Result<()> {
        let path = self.table_path(table);
        let mapping = table.mapping.clone();
        blocking(move || rewrite(&path, &mapping, &records)).await
    }
}

/// Stage the new contents beside the table file, then rename over it
fn rewrite(path: &Path, mapping: &FieldMapping, records: &[Record]) -> Result<()> {
    let staging = staging_path(path);

    let written = write_records_to_path(&staging, mapping, Naming::External, records)
        .and_then(|_| std::fs::rename(&staging, path).map_err(IngestError::from));
    if written.is_err() {
        discard_staging(&staging);
    }
    written
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| IngestError::Io(std::io::Error::other(e)))?
}

fn key_of(record: &Record, key_fields: &[String], side: RecordSide, position: usize) -> Result<Vec<FieldValue>> {
    key_fields
        .iter()
        .map(|field| {
            record.get(field).cloned().ok_or_else(|| IngestError::MissingRequiredField {
                side,
                position,
                field: field.clone(),
            })
        })
        .collect()
}

fn describe(key: &[FieldValue]) -> String {
    key.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(", ")
}

#[async_trait]
impl TableStore for CsvTableStore {
    async fn table_exists(&self, table: &TableSpec) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.table_path(table)).await?)
    }

    async fn create_table(&self, table: &TableSpec) -> Result<()> {
        let path = self.table_path(table);
        if tokio::fs::try_exists(&path).await? {
            return Err(IngestError::already_exists(path));
        }
        tokio::fs::create_dir_all(&self.dir).await?;
        self.store(table, Vec::new()).await?;
        info!(table = %table.name, path = %path.display(), "Created table");
        Ok(())
    }

    async fn read_all(&self, table: &TableSpec) -> Result<Vec<Record>> {
        self.load(table).await
    }

    async fn bulk_insert(&self, table: &TableSpec, records: &[Record]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        let mut rows = self.load(table).await?;
        let mut seen = HashSet::with_capacity(rows.len() + records.len());
        for (position, row) in rows.iter().enumerate() {
            seen.insert(key_of(row, &table.key_fields, RecordSide::Current, position)?);
        }
        for (position, record) in records.iter().enumerate() {
            let key = key_of(record, &table.key_fields, RecordSide::Incoming, position)?;
            if !seen.insert(key.clone()) {
                return Err(IngestError::DuplicateKey {
                    side: RecordSide::Incoming,
                    key: describe(&key),
                });
            }
        }

        rows.extend(records.iter().cloned());
        self.store(table, rows).await?;
        debug!(table = %table.name, inserted = records.len(), "Inserted rows");
        Ok(records.len())
    }

    async fn bulk_update(&self, table: &TableSpec, records: &[Record], key_fields: &[String]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        let mut rows = self.load(table).await?;
        let mut positions = HashMap::with_capacity(rows.len());
        for (position, row) in rows.iter().enumerate() {
            positions.insert(key_of(row, key_fields, RecordSide::Current, position)?, position);
        }

        for (position, record) in records.iter().enumerate() {
            let key = key_of(record, key_fields, RecordSide::Incoming, position)?;
            let Some(&row) = positions.get(&key) else {
                return Err(IngestError::UnknownKey {
                    table: table.name.clone(),
                    key: describe(&key),
                });
            };
            for (name, value) in record.iter() {
                rows[row].insert(name, value.clone());
            }
        }

        self.store(table, rows).await?;
        debug!(table = %table.name, updated = records.len(), "Updated rows");
        Ok(records.len())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use secfeed_common::FieldKind;

    fn table() -> TableSpec {
        TableSpec::new(
            "CISA_KEV",
            FieldMapping::new(&[
                ("CVE_ID", "cve_id", FieldKind::Text),
                ("DUE_DATE", "due_date", FieldKind::Date),
                ("NOTES", "notes", FieldKind::Text),
            ]),
            &["cve_id"],
        )
    }

    fn row(cve: &str, notes: &str) -> Record {
        Record::new()
            .with("cve_id", cve)
            .with("due_date", secfeed_common::types::parse_date("2024-02-01").unwrap())
            .with("notes", notes)
    }

    #[tokio::test]
    async fn test_create_insert_update_read() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvTableStore::new(dir.path());
        let table = table();

        assert!(!store.table_exists(&table).await.unwrap());
        store.create_table(&table).await.unwrap();
        assert!(store.table_exists(&table).await.unwrap());
        assert!(store.read_all(&table).await.unwrap().is_empty());

        store
            .bulk_insert(&table, &[row("CVE-2021-0001", "a"), row("CVE-2021-0002", "b")])
            .await
            .unwrap();
        store
            .bulk_update(&table, &[row("CVE-2021-0002", "patched")], &table.key_fields)
            .await
            .unwrap();

        let rows = store.read_all(&table).await.unwrap();
        assert_eq!(rows, vec![row("CVE-2021-0001", "a"), row("CVE-2021-0002", "patched")]);

        let header = std::fs::read_to_string(store.table_path(&table)).unwrap();
        assert!(header.starts_with("CVE_ID,DUE_DATE,NOTES\n"));
    }

    #[tokio::test]
    async fn test_create_twice_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvTableStore::new(dir.path());
        store.create_table(&table()).await.unwrap();
        assert!(matches!(
            store.create_table(&table()).await,
            Err(IngestError::AlreadyExists { .. })
        ));
    }

    #[tokio::test]
    async fn test_insert_of_stored_key_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvTableStore::new(dir.path());
        let table = table();
        store.create_table(&table).await.unwrap();
        store.bulk_insert(&table, &[row("CVE-2021-0001", "a")]).await.unwrap();

        let err = store.bulk_insert(&table, &[row("CVE-2021-0001", "b")]).await.unwrap_err();
        assert!(matches!(err, IngestError::DuplicateKey { .. }));
        assert_eq!(store.read_all(&table).await.unwrap(), vec![row("CVE-2021-0001", "a")]);
    }

    #[tokio::test]
    async fn test_duplicate_within_batch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvTableStore::new(dir.path());
        let table = table();
        store.create_table(&table).await.unwrap();

        let err = store
            .bulk_insert(&table, &[row("CVE-2021-0001", "a"), row("CVE-2021-0001", "b")])
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::DuplicateKey { .. }));
        assert!(store.read_all(&table).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_of_unknown_key_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvTableStore::new(dir.path());
        let table = table();
        store.create_table(&table).await.unwrap();

        let err = store
            .bulk_update(&table, &[row("CVE-2021-0009", "x")], &table.key_fields)
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::UnknownKey { .. }));
    }
}
