//! Resumable paginated retrieval
//!
//! A paged upstream endpoint is walked page by page. Each response is
//! streamed into a staging file, verified, inspected for its continuation
//! parameters and only then promoted under its final name
//! `{prefix}{index}.{ext}`. A killed process therefore leaves fully promoted
//! pages plus at most one staging file, and the next [`PaginatedFetcher::fetch`]
//! call picks up after the last page that still inspects cleanly.
//!
//! Two continuation styles are supported:
//!
//! - **offset**: the first page declares `totalResults` and `resultsPerPage`;
//!   page `i` is requested at offset `i * resultsPerPage` (NVD)
//! - **cursor**: every page declares `hasNextPage` and `endCursor` (GitHub
//!   GraphQL)

pub mod fetcher;
pub mod page_store;
pub mod resume;

pub use fetcher::{Endpoint, FetchOutcome, PaginatedFetcher, Paging, RequestParams};
pub use page_store::PageStore;
pub use resume::{resume, ResumePoint};

use serde_json::Value;

/// Continuation parameters read from one page
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageCursor {
    Offset {
        total_results: u64,
        results_per_page: u64,
    },
    Cursor {
        has_next_page: bool,
        end_cursor: Option<String>,
    },
}

/// Extracts continuation parameters from a raw page
///
/// An `Err` means the page is unusable (truncated, malformed, or missing the
/// expected fields). The reason ends up in the `CorruptPage` error.
pub trait PageInspector: Send + Sync {
    fn inspect(&self, page: &[u8]) -> std::result::Result<PageCursor, String>;
}

/// Caller-supplied verification run on every page before promotion
pub trait IntegrityCheck: Send + Sync {
    fn verify(&self, page: &[u8]) -> std::result::Result<(), String>;
}

impl<F> IntegrityCheck for F
where
    F: Fn(&[u8]) -> std::result::Result<(), String> + Send + Sync,
{
    fn verify(&self, page: &[u8]) -> std::result::Result<(), String> {
        self(page)
    }
}

/// Offset inspector for JSON pages carrying the counts as top-level fields
#[derive(Debug, Clone)]
pub struct JsonOffsetInspector {
    total_field: String,
    per_page_field: String,
}

impl JsonOffsetInspector {
    pub fn new(total_field: impl Into<String>, per_page_field: impl Into<String>) -> Self {
        Self {
            total_field: total_field.into(),
            per_page_field: per_page_field.into(),
        }
    }
}

impl PageInspector for JsonOffsetInspector {
    fn inspect(&self, page: &[u8]) -> std::result::Result<PageCursor, String> {
        let doc: Value = serde_json::from_slice(page).map_err(|e| e.to_string())?;
        let count = |field: &str| {
            doc.get(field)
                .and_then(Value::as_u64)
                .ok_or_else(|| format!("missing or non-integer field {field:?}"))
        };
        Ok(PageCursor::Offset {
            total_results: count(&self.total_field)?,
            results_per_page: count(&self.per_page_field)?,
        })
    }
}

/// Cursor inspector reading a GraphQL `pageInfo` object at a JSON pointer
#[derive(Debug, Clone)]
pub struct JsonCursorInspector {
    page_info_pointer: String,
}

impl JsonCursorInspector {
    /// `connection` is the GraphQL field under `data`, e.g. `securityAdvisories`
    pub fn for_connection(connection: &str) -> Self {
        Self {
            page_info_pointer: format!("/data/{connection}/pageInfo"),
        }
    }
}

impl PageInspector for JsonCursorInspector {
    fn inspect(&self, page: &[u8]) -> std::result::Result<PageCursor, String> {
        let doc: Value = serde_json::from_slice(page).map_err(|e| e.to_string())?;
        let info = doc
            .pointer(&self.page_info_pointer)
            .ok_or_else(|| format!("no pageInfo at {}", self.page_info_pointer))?;
        let has_next_page = info
            .get("hasNextPage")
            .and_then(Value::as_bool)
            .ok_or_else(|| "pageInfo.hasNextPage is not a boolean".to_string())?;
        let end_cursor = info.get("endCursor").and_then(Value::as_str).map(str::to_string);
        if has_next_page && end_cursor.is_none() {
            return Err("pageInfo.hasNextPage is set without an endCursor".to_string());
        }
        Ok(PageCursor::Cursor {
            has_next_page,
            end_cursor,
        })
    }
}
