//! Page-by-page retrieval driver

use super::page_store::{remove_if_present, PageStore};
use super::resume::{resume, ResumePoint};
use super::{IntegrityCheck, PageCursor, PageInspector};
use crate::error::{IngestError, Result};
use crate::progress::create_page_progress;
use crate::transport::{PageRequest, Transport};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Filters sent with every request of a session (query parameters for
/// offset paging, GraphQL variables for cursor paging)
pub type RequestParams = BTreeMap<String, Value>;

/// How continuation is expressed in a request
#[derive(Debug, Clone)]
pub enum Paging {
    /// Offset passed as a query parameter, e.g. NVD `startIndex`
    Offset {
        offset_param: String,
        /// Optional page-size hint, e.g. `("resultsPerPage", 2000)`
        page_size: Option<(String, u64)>,
    },
    /// GraphQL query whose cursor is passed as a variable
    Cursor {
        query: String,
        cursor_variable: String,
        /// Page-size variable, e.g. `("first", 100)`
        page_size: Option<(String, u64)>,
    },
}

/// A paged upstream endpoint
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub paging: Paging,
}

enum Position {
    Offset(u64),
    Cursor(Option<String>),
}

impl Endpoint {
    fn first_position(&self) -> Position {
        match self.paging {
            Paging::Offset { .. } => Position::Offset(0),
            Paging::Cursor { .. } => Position::Cursor(None),
        }
    }

    fn request(&self, params: &RequestParams, position: &Position) -> PageRequest {
        let mut request = match &self.paging {
            Paging::Offset { offset_param, page_size } => {
                let mut request = PageRequest::get(&self.url);
                request.query = params.iter().map(|(k, v)| (k.clone(), query_value(v))).collect();
                if let Some((name, size)) = page_size {
                    request.query.push((name.clone(), size.to_string()));
                }
                if let Position::Offset(offset) = position {
                    request.query.push((offset_param.clone(), offset.to_string()));
                }
                request
            },
            Paging::Cursor { query, cursor_variable, page_size } => {
                let mut variables: Map<String, Value> =
                    params.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
                if let Some((name, size)) = page_size {
                    variables.insert(name.clone(), Value::from(*size));
                }
                if let Position::Cursor(Some(cursor)) = position {
                    variables.insert(cursor_variable.clone(), Value::String(cursor.clone()));
                }
                PageRequest::post_json(
                    &self.url,
                    serde_json::json!({ "query": query, "variables": variables }),
                )
            },
        };
        request.headers.extend(self.headers.iter().cloned());
        request
    }
}

fn query_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Frozen state of a running session
#[derive(Debug, Clone)]
enum Session {
    Offset { total_results: u64, results_per_page: u64 },
    Cursor { has_next_page: bool, end_cursor: Option<String> },
}

impl Session {
    fn start(paging: &Paging, cursor: PageCursor, prefix: &str, index: u64) -> Result<Self> {
        match (paging, cursor) {
            (
                Paging::Offset { .. },
                PageCursor::Offset {
                    total_results,
                    results_per_page,
                },
            ) => {
                if results_per_page == 0 && total_results > 0 {
                    return Err(IngestError::corrupt_page(
                        prefix,
                        index,
                        format!("resultsPerPage is 0 with {total_results} total results"),
                    ));
                }
                Ok(Session::Offset {
                    total_results,
                    results_per_page,
                })
            },
            (
                Paging::Cursor { .. },
                PageCursor::Cursor {
                    has_next_page,
                    end_cursor,
                },
            ) => Ok(Session::Cursor {
                has_next_page,
                end_cursor,
            }),
            (_, other) => Err(IngestError::corrupt_page(
                prefix,
                index,
                format!("inspection {other:?} does not fit the endpoint's paging"),
            )),
        }
    }

    /// Rebuild the session of stored pages up to `point`
    fn resume(paging: &Paging, point: &ResumePoint, prefix: &str) -> Result<Self> {
        let mut session = Session::start(paging, point.first_inspection.clone(), prefix, 0)?;
        if point.last_index > 0 {
            session.advance(paging, point.inspection.clone(), prefix, point.last_index)?;
        }
        Ok(session)
    }

    /// Offset sessions keep the values frozen by page 0; cursor sessions
    /// follow each page
    fn advance(&mut self, paging: &Paging, cursor: PageCursor, prefix: &str, index: u64) -> Result<()> {
        match *self {
            Session::Offset {
                total_results: frozen,
                ..
            } => match cursor {
                PageCursor::Offset { total_results, .. } => {
                    if total_results != frozen {
                        debug!(prefix, index, frozen, reported = total_results, "Total changed mid-session");
                    }
                    Ok(())
                },
                PageCursor::Cursor { .. } => {
                    Err(IngestError::corrupt_page(prefix, index, "expected offset counts"))
                },
            },
            Session::Cursor { .. } => {
                *self = Session::start(paging, cursor, prefix, index)?;
                Ok(())
            },
        }
    }

    /// Position of page `index`, or `None` when the session is complete
    fn position(&self, index: u64) -> Option<Position> {
        match self {
            Session::Offset { .. } => self.pending_offset(index).map(Position::Offset),
            Session::Cursor {
                has_next_page,
                end_cursor,
            } => has_next_page.then(|| Position::Cursor(end_cursor.clone())),
        }
    }

    /// Offset of page `index`, `None` once it reaches the total
    fn pending_offset(&self, index: u64) -> Option<u64> {
        let (total, offset) = self.offset_of(index)?;
        (offset < total).then_some(offset)
    }

    fn offset_of(&self, index: u64) -> Option<(u64, u64)> {
        match self {
            Session::Offset {
                total_results,
                results_per_page,
            } => Some((
                *total_results,
                index.saturating_mul(*results_per_page).min(*total_results),
            )),
            Session::Cursor { .. } => None,
        }
    }

    fn expected_pages(&self) -> Option<u64> {
        match self {
            Session::Offset {
                total_results,
                results_per_page,
            } if *results_per_page > 0 => Some(total_results.div_ceil(*results_per_page)),
            Session::Offset { .. } => Some(1),
            Session::Cursor { .. } => None,
        }
    }
}

/// Result of one fetch call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchOutcome {
    pub pages_written: u64,
    /// Pages already on disk that were kept
    pub pages_resumed: u64,
    pub last_index: Option<u64>,
    /// Final offset, offset sessions only
    pub offset: Option<u64>,
    pub total_results: Option<u64>,
}

/// Drives a paged endpoint into a [`PageStore`]
pub struct PaginatedFetcher {
    transport: Arc<dyn Transport>,
    delay: Duration,
    integrity: Option<Box<dyn IntegrityCheck>>,
    progress: bool,
}

impl PaginatedFetcher {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            delay: Duration::ZERO,
            integrity: None,
            progress: false,
        }
    }

    /// Pause between consecutive page requests
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_integrity_check(mut self, check: impl IntegrityCheck + 'static) -> Self {
        self.integrity = Some(Box::new(check));
        self
    }

    pub fn with_progress(mut self, enabled: bool) -> Self {
        self.progress = enabled;
        self
    }

    /// Fetch every remaining page of the session named by `store`'s prefix
    ///
    /// Resumes after the last page that inspects cleanly when page 0 already
    /// exists. Pages past the resume point are removed first; if there is no
    /// usable resume point all pages of the prefix are removed and the
    /// session starts over. On any error, already promoted pages stay in
    /// place.
    pub async fn fetch(
        &self,
        endpoint: &Endpoint,
        store: &PageStore,
        params: &RequestParams,
        inspector: &dyn PageInspector,
    ) -> Result<FetchOutcome> {
        let prefix = store.prefix().to_string();
        store.ensure_dir().await?;

        let stale = store.discard_staging().await?;
        if stale > 0 {
            debug!(prefix = %prefix, stale, "Removed stale staging files");
        }

        let mut outcome = FetchOutcome::default();
        let mut index = 0u64;
        let mut session: Option<Session> = None;

        if store.exists(0).await? {
            info!(prefix = %prefix, "Attempting to resume download");
            let resumed = match resume(store, inspector).await? {
                Some(point) => match Session::resume(&endpoint.paging, &point, &prefix) {
                    Ok(resumed) => Some((point.last_index, resumed)),
                    Err(e) => {
                        warn!(prefix = %prefix, error = %e, "Stored pages do not fit the endpoint");
                        None
                    },
                },
                None => None,
            };

            match resumed {
                Some((last_index, resumed)) => {
                    let dropped = store.remove_from(last_index + 1).await?;
                    if dropped > 0 {
                        warn!(prefix = %prefix, dropped, "Removed untrusted pages after resume point");
                    }
                    session = Some(resumed);
                    index = last_index + 1;
                    outcome.pages_resumed = index;
                    outcome.last_index = Some(last_index);
                },
                None => {
                    let dropped = store.remove_all().await?;
                    warn!(prefix = %prefix, dropped, "No usable resume point, restarting session");
                },
            }
        }

        let progress = create_page_progress(self.progress, &prefix);
        let mut requested = 0u64;

        loop {
            let position = match &session {
                None => endpoint.first_position(),
                Some(session) => match session.position(index) {
                    Some(position) => position,
                    None => break,
                },
            };

            if requested > 0 && !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            requested += 1;

            if let Position::Offset(offset) = &position {
                debug!(prefix = %prefix, index, offset, "Requesting page");
            }
            let next = self
                .fetch_page(endpoint, store, params, &position, index, inspector, session.as_ref())
                .await?;

            if session.is_none() {
                if let Some(pages) = next.expected_pages() {
                    progress.set_length(pages);
                    info!(prefix = %prefix, pages, "Session started");
                }
            }
            session = Some(next);

            outcome.pages_written += 1;
            outcome.last_index = Some(index);
            progress.set_position(index + 1);
            index += 1;
        }
        progress.finish_and_clear();

        if let Some(Session::Offset { total_results, .. }) = &session {
            outcome.total_results = Some(*total_results);
            outcome.offset = session
                .as_ref()
                .and_then(|s| s.offset_of(index))
                .map(|(_, offset)| offset);
            debug!(prefix = %prefix, offset = ?outcome.offset, total_results, "Offset session complete");
        }

        info!(
            prefix = %prefix,
            pages_written = outcome.pages_written,
            pages_resumed = outcome.pages_resumed,
            "Page set complete"
        );
        Ok(outcome)
    }

    /// Stage, verify, inspect and promote one page
    ///
    /// The page is promoted only once its inspection fits the session, so a
    /// page that would stop the session never reaches the resume scan.
    #[allow(clippy::too_many_arguments)]
    async fn fetch_page(
        &self,
        endpoint: &Endpoint,
        store: &PageStore,
        params: &RequestParams,
        position: &Position,
        index: u64,
        inspector: &dyn PageInspector,
        session: Option<&Session>,
    ) -> Result<Session> {
        let staging = store.staging_path(index);
        let request = endpoint.request(params, position);

        let result = async {
            self.transport.download(&request, &staging).await?;
            let contents = tokio::fs::read(&staging).await?;

            if let Some(check) = &self.integrity {
                check.verify(&contents).map_err(|reason| IngestError::IntegrityCheck {
                    prefix: store.prefix().to_string(),
                    index,
                    reason,
                })?;
            }
            let cursor = inspector
                .inspect(&contents)
                .map_err(|reason| IngestError::corrupt_page(store.prefix(), index, reason))?;
            let next = match session {
                None => Session::start(&endpoint.paging, cursor, store.prefix(), index)?,
                Some(running) => {
                    let mut next = running.clone();
                    next.advance(&endpoint.paging, cursor, store.prefix(), index)?;
                    next
                },
            };

            store.promote(&staging, index).await?;
            Ok(next)
        }
        .await;

        if let Err(e) = &result {
            warn!(prefix = store.prefix(), index, error = %e, "Discarding staged page");
            remove_if_present(&staging).await?;
        }
        result
    }
}

impl std::fmt::Debug for PaginatedFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaginatedFetcher")
            .field("delay", &self.delay)
            .field("integrity", &self.integrity.is_some())
            .field("progress", &self.progress)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::paging::JsonOffsetInspector;
    use crate::transport::Method;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// Serves a three-page offset session and records when each page was asked for
    #[derive(Default)]
    struct CannedTransport {
        requested_at: Mutex<Vec<Instant>>,
    }

    #[async_trait]
    impl Transport for CannedTransport {
        async fn download(&self, request: &PageRequest, dest: &Path) -> Result<u64> {
            self.requested_at.lock().unwrap().push(Instant::now());
            let offset = request
                .query
                .iter()
                .find(|(name, _)| name == "startIndex")
                .map(|(_, value)| value.clone())
                .unwrap_or_default();
            let body = format!(r#"{{"totalResults": 3, "resultsPerPage": 1, "startIndex": {offset}}}"#);
            tokio::fs::write(dest, &body).await?;
            Ok(body.len() as u64)
        }
    }

    fn offset_paging() -> Paging {
        Paging::Offset {
            offset_param: "startIndex".to_string(),
            page_size: None,
        }
    }

    #[test]
    fn test_offset_positions_follow_frozen_page_size() {
        let session = Session::start(
            &offset_paging(),
            PageCursor::Offset {
                total_results: 250,
                results_per_page: 100,
            },
            "p_",
            0,
        )
        .unwrap();

        let offsets: Vec<Option<u64>> = (1..4).map(|i| session.pending_offset(i)).collect();
        assert_eq!(offsets, vec![Some(100), Some(200), None]);
        assert_eq!(session.offset_of(3), Some((250, 250)));
        assert_eq!(session.expected_pages(), Some(3));
    }

    #[test]
    fn test_zero_page_size_is_corrupt() {
        let err = Session::start(
            &offset_paging(),
            PageCursor::Offset {
                total_results: 10,
                results_per_page: 0,
            },
            "p_",
            0,
        )
        .unwrap_err();
        assert!(matches!(err, IngestError::CorruptPage { index: 0, .. }));

        let empty = Session::start(
            &offset_paging(),
            PageCursor::Offset {
                total_results: 0,
                results_per_page: 0,
            },
            "p_",
            0,
        )
        .unwrap();
        assert!(empty.position(1).is_none());
    }

    #[test]
    fn test_mismatched_inspection_is_corrupt() {
        let err = Session::start(
            &offset_paging(),
            PageCursor::Cursor {
                has_next_page: false,
                end_cursor: None,
            },
            "p_",
            4,
        )
        .unwrap_err();
        assert!(matches!(err, IngestError::CorruptPage { index: 4, .. }));
    }

    #[test]
    fn test_offset_request_carries_params_and_offset() {
        let endpoint = Endpoint {
            url: "https://nvd.example/cves".to_string(),
            headers: vec![("apiKey".to_string(), "k".to_string())],
            paging: Paging::Offset {
                offset_param: "startIndex".to_string(),
                page_size: Some(("resultsPerPage".to_string(), 2000)),
            },
        };
        let mut params = RequestParams::new();
        params.insert("lastModStartDate".to_string(), Value::from("2024-01-01T00:00:00Z"));

        let request = endpoint.request(&params, &Position::Offset(4000));
        assert_eq!(request.method.as_str(), "GET");
        assert_eq!(
            request.query,
            vec![
                ("lastModStartDate".to_string(), "2024-01-01T00:00:00Z".to_string()),
                ("resultsPerPage".to_string(), "2000".to_string()),
                ("startIndex".to_string(), "4000".to_string()),
            ]
        );
        assert_eq!(request.headers, vec![("apiKey".to_string(), "k".to_string())]);
    }

    #[test]
    fn test_cursor_request_carries_variables() {
        let endpoint = Endpoint {
            url: "https://gh.example/graphql".to_string(),
            headers: Vec::new(),
            paging: Paging::Cursor {
                query: "query($first: Int, $after: String){ x }".to_string(),
                cursor_variable: "after".to_string(),
                page_size: Some(("first".to_string(), 100)),
            },
        };

        let first = endpoint.request(&RequestParams::new(), &Position::Cursor(None));
        assert_eq!(first.method, Method::Post);
        assert_eq!(first.body.as_ref().unwrap()["variables"], serde_json::json!({"first": 100}));

        let next = endpoint.request(&RequestParams::new(), &Position::Cursor(Some("abc".to_string())));
        assert_eq!(
            next.body.as_ref().unwrap()["variables"],
            serde_json::json!({"first": 100, "after": "abc"})
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_only_between_requests() {
        let transport = Arc::new(CannedTransport::default());
        let dir = tempfile::tempdir().unwrap();
        let store = PageStore::new(dir.path(), "p_", "json").unwrap();
        let endpoint = Endpoint {
            url: "https://nvd.example/cves".to_string(),
            headers: Vec::new(),
            paging: offset_paging(),
        };
        let delay = Duration::from_millis(300);

        let started = Instant::now();
        let outcome = PaginatedFetcher::new(transport.clone())
            .with_delay(delay)
            .fetch(
                &endpoint,
                &store,
                &RequestParams::new(),
                &JsonOffsetInspector::new("totalResults", "resultsPerPage"),
            )
            .await
            .unwrap();
        assert_eq!(outcome.pages_written, 3);

        let requested_at = transport.requested_at.lock().unwrap().clone();
        assert_eq!(requested_at.len(), 3);
        assert_eq!(requested_at[0], started, "first request must not wait");
        for pair in requested_at.windows(2) {
            let gap = pair[1] - pair[0];
            assert!(gap >= delay && gap < delay + Duration::from_millis(5), "gap {gap:?}");
        }
    }
}
