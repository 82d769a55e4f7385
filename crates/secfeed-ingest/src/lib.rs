//! Secfeed Ingest Library
//!
//! Resumable ingestion of public vulnerability feeds and reconciliation of
//! their records against stored tables.
//!
//! # Supported Feeds
//!
//! - **NVD**: NIST CVE records and their CVSS metrics (offset paging)
//! - **GHSA**: GitHub security advisories and affected package ranges
//!   (GraphQL cursor paging)
//! - **KEV**: CISA Known Exploited Vulnerabilities catalogue (single CSV)
//!
//! # Example
//!
//! ```no_run
//! use secfeed_ingest::config::IngestConfig;
//! use secfeed_ingest::feeds::{nvd, FeedContext};
//! use secfeed_ingest::store::CsvTableStore;
//! use secfeed_ingest::transport::HttpTransport;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = IngestConfig::from_env()?;
//!     let transport = Arc::new(HttpTransport::new(&config.http)?);
//!     let store = Arc::new(CsvTableStore::new(&config.store_dir));
//!     let ctx = FeedContext::new(config, transport, store);
//!
//!     let summary = nvd::run(&ctx).await?;
//!     println!("{} pages written", summary.fetch.pages_written);
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod archive;
pub mod config;
pub mod consolidate;
pub mod csv_io;
pub mod error;
pub mod feeds;
pub mod mapping;
pub mod paging;
pub mod progress;
pub mod reconcile;
pub mod store;
pub mod transport;

pub use config::IngestConfig;
pub use error::{IngestError, Result};
pub use feeds::{FeedContext, RunSummary, SyncReport};
pub use paging::{FetchOutcome, PageStore, PaginatedFetcher};
pub use reconcile::{reconcile, ReconciliationResult};
pub use store::{CsvTableStore, TableSpec, TableStore};
pub use transport::{HttpTransport, Transport};
