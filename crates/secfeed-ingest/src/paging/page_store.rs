//! Directory of sequentially indexed page files

use crate::error::{IngestError, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Pages of one retrieval session, named `{prefix}{index}.{ext}`
///
/// The index is base-10 without fixed width. Staging files live in the same
/// directory as `.{final name}.partial` so they never match the page pattern
/// and promotion is a same-filesystem rename.
#[derive(Debug, Clone)]
pub struct PageStore {
    dir: PathBuf,
    prefix: String,
    ext: String,
    pattern: Regex,
}

impl PageStore {
    /// Store using the default pattern `^{prefix}[0-9]+\.{ext}$`
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>, ext: impl Into<String>) -> Result<Self> {
        let prefix = prefix.into();
        let ext = ext.into();
        let pattern = format!(r"{}[0-9]+\.{}$", regex::escape(&prefix), regex::escape(&ext));
        Self::with_pattern(dir, prefix, ext, &pattern)
    }

    /// Store with a caller-supplied name pattern, matched from the start of
    /// the file name
    pub fn with_pattern(
        dir: impl Into<PathBuf>,
        prefix: impl Into<String>,
        ext: impl Into<String>,
        pattern: &str,
    ) -> Result<Self> {
        Ok(Self {
            dir: dir.into(),
            prefix: prefix.into(),
            ext: ext.into(),
            pattern: Regex::new(&format!("^(?:{pattern})"))?,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn page_name(&self, index: u64) -> String {
        format!("{}{}.{}", self.prefix, index, self.ext)
    }

    pub fn page_path(&self, index: u64) -> PathBuf {
        self.dir.join(self.page_name(index))
    }

    pub fn staging_path(&self, index: u64) -> PathBuf {
        self.dir.join(format!(".{}.partial", self.page_name(index)))
    }

    /// Parse the page index out of a file name matching the pattern
    pub fn index_of(&self, name: &str) -> Result<u64> {
        name.strip_prefix(self.prefix.as_str())
            .and_then(|rest| rest.split('.').next())
            .and_then(|digits| digits.parse::<u64>().ok())
            .ok_or_else(|| IngestError::NamingViolation {
                prefix: self.prefix.clone(),
                name: name.to_string(),
            })
    }

    pub async fn ensure_dir(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        Ok(())
    }

    pub async fn exists(&self, index: u64) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.page_path(index)).await?)
    }

    /// All pages of this prefix in ascending numeric index order
    ///
    /// A name that matches the pattern without carrying an integer index is a
    /// `NamingViolation`; it is never skipped.
    pub async fn list(&self) -> Result<Vec<(u64, PathBuf)>> {
        let mut pages = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(pages),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !self.pattern.is_match(name) {
                continue;
            }
            pages.push((self.index_of(name)?, entry.path()));
        }

        pages.sort_by_key(|(index, _)| *index);
        Ok(pages)
    }

    pub async fn read(&self, index: u64) -> Result<Vec<u8>> {
        Ok(tokio::fs::read(self.page_path(index)).await?)
    }

    /// Move a verified staging file to its final page name
    ///
    /// Pages are immutable once promoted.
    pub async fn promote(&self, staging: &Path, index: u64) -> Result<PathBuf> {
        let dest = self.page_path(index);
        if tokio::fs::try_exists(&dest).await? {
            return Err(IngestError::already_exists(dest));
        }
        tokio::fs::rename(staging, &dest).await?;
        debug!(page = %dest.display(), "Promoted page");
        Ok(dest)
    }

    /// Stage and promote a page held in memory
    pub async fn write_page(&self, index: u64, contents: &[u8]) -> Result<PathBuf> {
        self.ensure_dir().await?;
        let staging = self.staging_path(index);
        let mut file = tokio::fs::File::create(&staging).await?;
        file.write_all(contents).await?;
        file.flush().await?;
        drop(file);

        match self.promote(&staging, index).await {
            Ok(path) => Ok(path),
            Err(e) => {
                remove_if_present(&staging).await?;
                Err(e)
            },
        }
    }

    /// Remove staging files left behind by an interrupted session
    pub async fn discard_staging(&self) -> Result<usize> {
        let marker = format!(".{}", self.prefix);
        let mut removed = 0;
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with(&marker) && name.ends_with(".partial") {
                tokio::fs::remove_file(entry.path()).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Remove every page whose index is `first` or above
    pub async fn remove_from(&self, first: u64) -> Result<usize> {
        let mut removed = 0;
        for (index, path) in self.list().await? {
            if index >= first {
                tokio::fs::remove_file(&path).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub async fn remove_all(&self) -> Result<usize> {
        self.remove_from(0).await
    }
}

pub(crate) async fn remove_if_present(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
