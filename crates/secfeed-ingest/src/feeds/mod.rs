//! Feed jobs
//!
//! Every feed follows the same run:
//!
//! 1. retrieve pages into the work directory (resuming a killed run)
//! 2. parse each page into per-table partial CSVs
//! 3. consolidate the partials of each table into one file
//! 4. reconcile the consolidated records against the table store and apply
//!    the inserts and updates
//! 5. archive (or remove) the intermediate files
//!
//! Feed modules only provide endpoints, parsers and table layouts; the steps
//! above live here.

/// Closed enumeration stored under its upstream spelling
macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = secfeed_common::SecfeedError;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(secfeed_common::SecfeedError::unknown_variant(stringify!($name), other)),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl From<$name> for secfeed_common::FieldValue {
            fn from(value: $name) -> Self {
                secfeed_common::FieldValue::Text(value.as_str().to_string())
            }
        }
    };
}

pub mod ghsa;
pub mod kev;
pub mod nvd;

use crate::archive::{check_rotate, create_archive};
use crate::config::IngestConfig;
use crate::consolidate::{consolidate, ConsolidateOptions};
use crate::csv_io::{read_records_from_path, write_records_to_path};
use crate::error::Result;
use crate::mapping::Naming;
use crate::paging::{FetchOutcome, PageStore, PaginatedFetcher};
use crate::reconcile::{reconcile, ReconciliationResult};
use crate::store::{TableSpec, TableStore};
use crate::transport::Transport;
use chrono::{NaiveDate, Utc};
use secfeed_common::{FieldValue, Record};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Shared collaborators of a feed run
pub struct FeedContext {
    pub config: IngestConfig,
    pub transport: Arc<dyn Transport>,
    pub store: Arc<dyn TableStore>,
    /// Date embedded in page prefixes and archive names
    pub run_date: NaiveDate,
    pub progress: bool,
}

impl FeedContext {
    pub fn new(config: IngestConfig, transport: Arc<dyn Transport>, store: Arc<dyn TableStore>) -> Self {
        Self {
            config,
            transport,
            store,
            run_date: Utc::now().date_naive(),
            progress: false,
        }
    }

    pub fn with_run_date(mut self, run_date: NaiveDate) -> Self {
        self.run_date = run_date;
        self
    }

    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    /// `YYYY_MM_DD`, as used in page prefixes
    pub fn date_tag(&self) -> String {
        self.run_date.format("%Y_%m_%d").to_string()
    }

    pub(crate) fn fetcher(&self, delay: Duration) -> PaginatedFetcher {
        PaginatedFetcher::new(Arc::clone(&self.transport))
            .with_delay(delay)
            .with_progress(self.progress)
    }

    pub(crate) fn page_store(&self, prefix: &str, ext: &str) -> Result<PageStore> {
        PageStore::new(&self.config.work_dir, prefix, ext)
    }

    /// Reserve the archive destination before any work starts
    pub(crate) fn prepare_archive(&self, job: &str) -> Result<Option<PathBuf>> {
        if !self.config.archive {
            return Ok(None);
        }
        let destination = self
            .config
            .archive_dir
            .join(format!("{job}_{}.tar.gz", self.date_tag()));
        check_rotate(&destination, self.config.override_existing)?;
        Ok(Some(destination))
    }

    /// Archive the run's intermediate files, or delete them when archiving
    /// is disabled
    pub(crate) fn finish(&self, archive: Option<&Path>, files: &[PathBuf]) -> Result<()> {
        match archive {
            Some(destination) => {
                create_archive(destination, files, true)?;
            },
            None => {
                for file in files {
                    std::fs::remove_file(file)?;
                }
                debug!(files = files.len(), "Removed intermediate files");
            },
        }
        Ok(())
    }
}

impl std::fmt::Debug for FeedContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedContext")
            .field("config", &self.config)
            .field("run_date", &self.run_date)
            .field("progress", &self.progress)
            .finish()
    }
}

/// What one table sync changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub table: String,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// New rows left out because they referenced unknown parents
    pub dropped: usize,
}

/// Outcome of a whole feed run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub feed: String,
    pub fetch: FetchOutcome,
    pub tables: Vec<SyncReport>,
    pub archive: Option<PathBuf>,
}

/// Create the table when missing; returns whether it was created
pub(crate) async fn ensure_table(store: &dyn TableStore, table: &TableSpec) -> Result<bool> {
    if store.table_exists(table).await? {
        return Ok(false);
    }
    info!(table = %table.name, "Table missing, creating it");
    store.create_table(table).await?;
    Ok(true)
}

/// Reconcile `incoming` against the stored rows of `table`
pub(crate) async fn reconcile_table(
    store: &dyn TableStore,
    table: &TableSpec,
    incoming: &[Record],
) -> Result<ReconciliationResult> {
    let current = store.read_all(table).await?;
    let result = reconcile(&current, incoming, &table.key_fields)?;
    debug!(
        table = %table.name,
        current = current.len(),
        incoming = incoming.len(),
        new = result.new.len(),
        changed = result.changed.len(),
        "Reconciled table"
    );
    Ok(result)
}

/// Hand a reconciliation result to the store
pub(crate) async fn apply(
    store: &dyn TableStore,
    table: &TableSpec,
    incoming: usize,
    result: ReconciliationResult,
) -> Result<SyncReport> {
    let inserted = store.bulk_insert(table, &result.new).await?;
    let updated = store.bulk_update(table, &result.changed, &table.key_fields).await?;
    let report = SyncReport {
        table: table.name.clone(),
        inserted,
        updated,
        unchanged: incoming.saturating_sub(inserted + updated),
        dropped: 0,
    };
    info!(
        table = %report.table,
        inserted = report.inserted,
        updated = report.updated,
        unchanged = report.unchanged,
        "Table synced"
    );
    Ok(report)
}

pub(crate) async fn sync_table(store: &dyn TableStore, table: &TableSpec, incoming: &[Record]) -> Result<SyncReport> {
    let result = reconcile_table(store, table, incoming).await?;
    apply(store, table, incoming.len(), result).await
}

/// Keep the last occurrence of every composite key
///
/// Offset paging over a dataset that changes during retrieval can deliver a
/// record twice; the later copy is the fresher one.
pub(crate) fn collapse_duplicates(records: Vec<Record>, table: &TableSpec) -> Vec<Record> {
    let key = |record: &Record| -> Vec<FieldValue> {
        table
            .key_fields
            .iter()
            .map(|field| record.get(field).cloned().unwrap_or(FieldValue::Null))
            .collect()
    };

    let mut seen = HashSet::with_capacity(records.len());
    let total = records.len();
    let mut kept: Vec<Record> = records
        .into_iter()
        .rev()
        .filter(|record| seen.insert(key(record)))
        .collect();
    kept.reverse();

    if kept.len() < total {
        warn!(table = %table.name, duplicates = total - kept.len(), "Collapsed duplicate records");
    }
    kept
}

/// Files produced by [`stage_pages`]
#[derive(Debug, Default)]
pub(crate) struct StagedPages {
    pub pages: Vec<PathBuf>,
    /// One consolidated CSV per table, in table order
    pub tables: Vec<PathBuf>,
}

impl StagedPages {
    pub fn files(&self) -> Vec<PathBuf> {
        self.pages.iter().chain(self.tables.iter()).cloned().collect()
    }
}

/// Parse every page of `pages` into per-table partial CSVs and merge them
///
/// `parse` returns one record list per entry of `tables`. Partials are
/// written with internal field names and removed once consolidated.
pub(crate) async fn stage_pages<F>(pages: &PageStore, tables: &[&TableSpec], parse: F) -> Result<StagedPages>
where
    F: Fn(&[u8]) -> Result<Vec<Vec<Record>>>,
{
    let mut staged = StagedPages::default();
    let mut partials: Vec<Vec<PathBuf>> = vec![Vec::new(); tables.len()];

    for (index, path) in pages.list().await? {
        let contents = pages.read(index).await?;
        let parsed = parse(&contents)?;
        for ((table, records), parts) in tables.iter().zip(parsed.iter()).zip(partials.iter_mut()) {
            let part = pages
                .dir()
                .join(format!("{}{index}_{}.csv", pages.prefix(), table.name.to_lowercase()));
            write_records_to_path(&part, &table.mapping, Naming::Internal, records)?;
            parts.push(part);
        }
        debug!(prefix = pages.prefix(), index, "Parsed page");
        staged.pages.push(path);
    }

    for (table, parts) in tables.iter().zip(partials) {
        let destination = pages
            .dir()
            .join(format!("{}{}.csv", pages.prefix(), table.name.to_lowercase()));
        if destination.exists() {
            warn!(path = %destination.display(), "Replacing consolidated file from an earlier run");
            std::fs::remove_file(&destination)?;
        }
        if parts.is_empty() {
            write_records_to_path(&destination, &table.mapping, Naming::Internal, &[])?;
        } else {
            consolidate(&destination, &parts, &ConsolidateOptions { remove_parts: true })?;
        }
        staged.tables.push(destination);
    }
    Ok(staged)
}

/// Load a consolidated table file written by [`stage_pages`]
pub(crate) fn load_staged(path: &Path, table: &TableSpec) -> Result<Vec<Record>> {
    read_records_from_path(path, &table.mapping, Naming::Internal)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::mapping::FieldMapping;
    use secfeed_common::FieldKind;

    fn table() -> TableSpec {
        TableSpec::new(
            "T",
            FieldMapping::identity(&[("id", FieldKind::Text), ("v", FieldKind::Integer)]),
            &["id"],
        )
    }

    #[test]
    fn test_collapse_keeps_last_occurrence_in_order() {
        let records = vec![
            Record::new().with("id", "A").with("v", 1i64),
            Record::new().with("id", "B").with("v", 1i64),
            Record::new().with("id", "A").with("v", 2i64),
        ];
        let kept = collapse_duplicates(records, &table());
        assert_eq!(
            kept,
            vec![
                Record::new().with("id", "B").with("v", 1i64),
                Record::new().with("id", "A").with("v", 2i64),
            ]
        );
    }

    #[tokio::test]
    async fn test_stage_pages_merges_partials_per_table() {
        let dir = tempfile::tempdir().unwrap();
        let pages = PageStore::new(dir.path(), "feed_", "json").unwrap();
        pages.write_page(0, br#"[["A",1],["B",2]]"#).await.unwrap();
        pages.write_page(1, br#"[["C",3]]"#).await.unwrap();
        let table = table();

        let staged = stage_pages(&pages, &[&table], |page| {
            let rows: Vec<(String, i64)> = serde_json::from_slice(page)?;
            Ok(vec![rows
                .into_iter()
                .map(|(id, v)| Record::new().with("id", id).with("v", v))
                .collect()])
        })
        .await
        .unwrap();

        assert_eq!(staged.pages.len(), 2);
        assert_eq!(staged.tables, vec![dir.path().join("feed_t.csv")]);
        assert_eq!(std::fs::read_to_string(&staged.tables[0]).unwrap(), "id,v\nA,1\nB,2\nC,3\n");
        assert!(!dir.path().join("feed_0_t.csv").exists());

        let records = load_staged(&staged.tables[0], &table).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(staged.files().len(), 3);
    }
}
