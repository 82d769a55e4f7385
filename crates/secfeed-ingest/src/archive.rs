//! Destination rotation and run archives
//!
//! Once a run has reconciled its data, the intermediate page and CSV files
//! are bundled into a `tar.gz` with a `MANIFEST.sha256` listing the digest
//! of every member.

use crate::error::{IngestError, Result};
use chrono::Utc;
use flate2::write::GzEncoder;
use flate2::Compression;
use secfeed_common::checksum::manifest_line;
use secfeed_common::types::ChecksumAlgorithm;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const MANIFEST_NAME: &str = "MANIFEST.sha256";

/// Make room for a new file at `path`
///
/// Nothing happens when `path` does not exist. An existing file is an
/// [`IngestError::AlreadyExists`] unless `override_existing` is set, in which
/// case it is renamed to `{name}.{UTC timestamp}` and the new path returned.
pub fn check_rotate(path: &Path, override_existing: bool) -> Result<Option<PathBuf>> {
    if !path.exists() {
        return Ok(None);
    }
    if !override_existing {
        return Err(IngestError::already_exists(path));
    }

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| IngestError::Config(format!("cannot rotate {}", path.display())))?;
    let rotated = path.with_file_name(format!("{name}.{}", Utc::now().format("%Y%m%dT%H%M%S%.3fZ")));
    if rotated.exists() {
        return Err(IngestError::already_exists(rotated));
    }
    std::fs::rename(path, &rotated)?;
    info!(from = %path.display(), to = %rotated.display(), "Rotated existing file");
    Ok(Some(rotated))
}

/// Bundle `files` into a gzip-compressed tar at `destination`
///
/// Members are stored under their file names. With `cleanup` the files are
/// removed once the archive is in place.
pub fn create_archive<P: AsRef<Path>>(destination: &Path, files: &[P], cleanup: bool) -> Result<PathBuf> {
    if destination.exists() {
        return Err(IngestError::already_exists(destination));
    }
    if let Some(parent) = destination.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let staging = destination.with_file_name(format!(".{name}.partial"));

    if let Err(e) = write_archive(&staging, files) {
        if let Err(cleanup) = std::fs::remove_file(&staging) {
            if cleanup.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %staging.display(), error = %cleanup, "Failed to remove staging archive");
            }
        }
        return Err(e);
    }
    std::fs::rename(&staging, destination)?;
    info!(archive = %destination.display(), files = files.len(), "Created archive");

    if cleanup {
        for file in files {
            std::fs::remove_file(file.as_ref())?;
        }
        debug!(files = files.len(), "Removed archived files");
    }
    Ok(destination.to_path_buf())
}

fn write_archive<P: AsRef<Path>>(staging: &Path, files: &[P]) -> Result<()> {
    let encoder = GzEncoder::new(File::create(staging)?, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    let mut manifest = String::new();

    for file in files {
        let file = file.as_ref();
        let member = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| IngestError::Config(format!("cannot archive {}", file.display())))?;
        builder.append_path_with_name(file, &member)?;
        manifest.push_str(&manifest_line(file, &member, ChecksumAlgorithm::Sha256)?);
    }

    let mut header = tar::Header::new_gnu();
    header.set_size(manifest.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(Utc::now().timestamp().max(0) as u64);
    header.set_cksum();
    builder.append_data(&mut header, MANIFEST_NAME, manifest.as_bytes())?;

    builder.into_inner()?.finish()?;
    Ok(())
}
