//! Recover the resume point of an interrupted session from its pages

use super::page_store::PageStore;
use super::{PageCursor, PageInspector};
use crate::error::Result;
use tracing::{debug, warn};

/// Last trustworthy page of a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumePoint {
    pub last_index: u64,
    /// Inspection of page `last_index`
    pub inspection: PageCursor,
    /// Inspection of page 0, which froze the session's page size
    pub first_inspection: PageCursor,
}

/// Scan the store's pages in ascending index order and return the last one
/// that inspects cleanly
///
/// Scanning stops at the first page that fails inspection or at a gap in the
/// index sequence; everything after that point is untrusted. `None` means
/// page 0 is missing or unusable and the session has to start over. No file
/// is modified.
pub async fn resume(store: &PageStore, inspector: &dyn PageInspector) -> Result<Option<ResumePoint>> {
    let pages = store.list().await?;
    let mut first_inspection: Option<PageCursor> = None;
    let mut last: Option<(u64, PageCursor)> = None;

    for (expected, (index, path)) in (0u64..).zip(pages) {
        if index != expected {
            warn!(prefix = store.prefix(), expected, found = index, "Gap in page sequence");
            break;
        }

        let contents = tokio::fs::read(&path).await?;
        match inspector.inspect(&contents) {
            Ok(cursor) => {
                if first_inspection.is_none() {
                    first_inspection = Some(cursor.clone());
                }
                last = Some((index, cursor));
            },
            Err(reason) => {
                warn!(prefix = store.prefix(), index, reason = %reason, "Page failed inspection, resuming before it");
                break;
            },
        }
    }

    let point = match (last, first_inspection) {
        (Some((last_index, inspection)), Some(first_inspection)) => Some(ResumePoint {
            last_index,
            inspection,
            first_inspection,
        }),
        _ => None,
    };

    debug!(prefix = store.prefix(), resume_point = ?point.as_ref().map(|p| p.last_index), "Resume scan finished");
    Ok(point)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::paging::JsonOffsetInspector;

    fn page(total: u64, per_page: u64) -> Vec<u8> {
        format!(r#"{{"resultsPerPage": {per_page}, "totalResults": {total}, "vulnerabilities": []}}"#)
            .into_bytes()
    }

    fn inspector() -> JsonOffsetInspector {
        JsonOffsetInspector::new("totalResults", "resultsPerPage")
    }

    #[tokio::test]
    async fn test_all_pages_valid_resumes_at_last() {
        let dir = tempfile::tempdir().unwrap();
        let store = PageStore::new(dir.path(), "nist_", "json").unwrap();
        for index in 0..12 {
            store.write_page(index, &page(1200, 100)).await.unwrap();
        }

        let point = resume(&store, &inspector()).await.unwrap().unwrap();
        assert_eq!(point.last_index, 11);
        assert_eq!(
            point.inspection,
            inspector().inspect(&store.read(11).await.unwrap()).unwrap()
        );
    }

    #[tokio::test]
    async fn test_truncated_tail_resumes_before_it() {
        let dir = tempfile::tempdir().unwrap();
        let store = PageStore::new(dir.path(), "nist_", "json").unwrap();
        for index in 0..3 {
            store.write_page(index, &page(500, 100)).await.unwrap();
        }
        store.write_page(3, br#"{"resultsPerPage": 100, "tot"#).await.unwrap();

        let point = resume(&store, &inspector()).await.unwrap().unwrap();
        assert_eq!(point.last_index, 2);
        assert!(store.exists(3).await.unwrap(), "scanner must not delete pages");
    }

    #[tokio::test]
    async fn test_corrupt_first_page_has_no_resume_point() {
        let dir = tempfile::tempdir().unwrap();
        let store = PageStore::new(dir.path(), "nist_", "json").unwrap();
        store.write_page(0, b"<html>rate limited</html>").await.unwrap();
        store.write_page(1, &page(500, 100)).await.unwrap();

        assert!(resume(&store, &inspector()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_store_and_gap() {
        let dir = tempfile::tempdir().unwrap();
        let store = PageStore::new(dir.path(), "nist_", "json").unwrap();
        assert!(resume(&store, &inspector()).await.unwrap().is_none());

        store.write_page(0, &page(500, 100)).await.unwrap();
        store.write_page(1, &page(500, 100)).await.unwrap();
        store.write_page(3, &page(500, 100)).await.unwrap();
        let point = resume(&store, &inspector()).await.unwrap().unwrap();
        assert_eq!(point.last_index, 1);
    }

    #[tokio::test]
    async fn test_first_inspection_comes_from_page_zero() {
        let dir = tempfile::tempdir().unwrap();
        let store = PageStore::new(dir.path(), "nist_", "json").unwrap();
        store.write_page(0, &page(250, 100)).await.unwrap();
        store.write_page(1, &page(251, 100)).await.unwrap();

        let point = resume(&store, &inspector()).await.unwrap().unwrap();
        assert_eq!(
            point.first_inspection,
            PageCursor::Offset {
                total_results: 250,
                results_per_page: 100
            }
        );
    }
}
