//! Merge per-page CSV parts into one dataset file
//!
//! The destination only ever appears complete: rows are written to a hidden
//! staging file in the destination's directory and renamed into place once
//! every part has been copied.

use crate::error::{IngestError, Result};
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default)]
pub struct ConsolidateOptions {
    /// Delete the parts once the destination has been promoted
    pub remove_parts: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsolidateSummary {
    pub destination: PathBuf,
    pub parts: usize,
    pub rows: u64,
}

pub fn staging_path(destination: &Path) -> PathBuf {
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    destination.with_file_name(format!(".{name}.partial"))
}

/// Concatenate `parts` under the header of the first one
pub fn consolidate<P: AsRef<Path>>(
    destination: &Path,
    parts: &[P],
    options: &ConsolidateOptions,
) -> Result<ConsolidateSummary> {
    if destination.exists() {
        return Err(IngestError::already_exists(destination));
    }
    if parts.is_empty() {
        return Err(IngestError::NoParts {
            destination: destination.to_path_buf(),
        });
    }

    let staging = staging_path(destination);
    let rows = match write_staging(&staging, parts) {
        Ok(rows) => rows,
        Err(e) => {
            discard_staging(&staging);
            return Err(e);
        },
    };

    if destination.exists() {
        discard_staging(&staging);
        return Err(IngestError::already_exists(destination));
    }
    std::fs::rename(&staging, destination)?;
    info!(
        destination = %destination.display(),
        parts = parts.len(),
        rows,
        "Consolidated parts"
    );

    if options.remove_parts {
        for part in parts {
            std::fs::remove_file(part.as_ref())?;
        }
        debug!(parts = parts.len(), "Removed consolidated parts");
    }

    Ok(ConsolidateSummary {
        destination: destination.to_path_buf(),
        parts: parts.len(),
        rows,
    })
}

fn write_staging<P: AsRef<Path>>(staging: &Path, parts: &[P]) -> Result<u64> {
    let mut writer = csv::Writer::from_writer(File::create(staging)?);
    let mut header: Option<csv::StringRecord> = None;
    let mut rows = 0u64;

    for part in parts {
        let part = part.as_ref();
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(File::open(part)?);
        let part_header = reader.headers()?.clone();

        match &header {
            None => {
                writer.write_record(&part_header)?;
                header = Some(part_header);
            },
            Some(first) if *first != part_header => {
                return Err(IngestError::HeaderMismatch {
                    path: part.to_path_buf(),
                });
            },
            Some(_) => {},
        }

        let mut record = csv::StringRecord::new();
        while reader.read_record(&mut record)? {
            writer.write_record(&record)?;
            rows += 1;
        }
        debug!(part = %part.display(), rows, "Copied part");
    }

    writer.flush()?;
    Ok(rows)
}

/// Best-effort removal of a staging file on a failed write
pub(crate) fn discard_staging(staging: &Path) {
    if let Err(e) = std::fs::remove_file(staging) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %staging.display(), error = %e, "Failed to remove staging file");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::fs;

    fn part(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_single_header_and_rows_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let a = part(dir.path(), "a.csv", "id,v\nA1,1\nA2,2\n");
        let b = part(dir.path(), "b.csv", "id,v\nB1,1\nB2,2\nB3,3\n");
        let destination = dir.path().join("all.csv");

        let summary = consolidate(&destination, &[&a, &b], &ConsolidateOptions::default()).unwrap();
        assert_eq!(summary.rows, 5);
        assert_eq!(summary.parts, 2);
        assert_eq!(
            fs::read_to_string(&destination).unwrap(),
            "id,v\nA1,1\nA2,2\nB1,1\nB2,2\nB3,3\n"
        );
        assert!(a.exists() && b.exists());
    }

    #[test]
    fn test_parts_removed_on_request() {
        let dir = tempfile::tempdir().unwrap();
        let a = part(dir.path(), "a.csv", "id\nA1\n");
        let destination = dir.path().join("all.csv");

        consolidate(&destination, &[&a], &ConsolidateOptions { remove_parts: true }).unwrap();
        assert!(destination.exists());
        assert!(!a.exists());
    }

    #[test]
    fn test_failure_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let a = part(dir.path(), "a.csv", "id\nA1\n");
        let missing = dir.path().join("missing.csv");
        let destination = dir.path().join("all.csv");

        let err = consolidate(&destination, &[a, missing], &ConsolidateOptions::default()).unwrap_err();
        assert!(matches!(err, IngestError::Io(_)));
        assert!(!destination.exists());
        assert!(!staging_path(&destination).exists());
    }

    #[test]
    fn test_discard_staging_tolerates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let staging = part(dir.path(), ".all.csv.partial", "id\n");

        discard_staging(&staging);
        assert!(!staging.exists());
        discard_staging(&staging);
    }

    #[test]
    fn test_header_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let a = part(dir.path(), "a.csv", "id,v\nA1,1\n");
        let b = part(dir.path(), "b.csv", "id,w\nB1,1\n");
        let destination = dir.path().join("all.csv");

        let err = consolidate(&destination, &[&a, &b], &ConsolidateOptions::default()).unwrap_err();
        assert!(matches!(err, IngestError::HeaderMismatch { ref path } if *path == b));
        assert!(!destination.exists());
        assert!(!staging_path(&destination).exists());
    }

    #[test]
    fn test_existing_destination_and_empty_parts() {
        let dir = tempfile::tempdir().unwrap();
        let destination = part(dir.path(), "all.csv", "id\n");
        let a = part(dir.path(), "a.csv", "id\nA1\n");

        assert!(matches!(
            consolidate(&destination, &[&a], &ConsolidateOptions::default()),
            Err(IngestError::AlreadyExists { .. })
        ));

        let fresh = dir.path().join("fresh.csv");
        let none: [&Path; 0] = [];
        assert!(matches!(
            consolidate(&fresh, &none, &ConsolidateOptions::default()),
            Err(IngestError::NoParts { .. })
        ));
    }
}
