//! Secfeed Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling for the secfeed workspace.
//!
//! # Overview
//!
//! - **Error Handling**: Custom error types and result types
//! - **Checksums**: File integrity utilities used for archive manifests
//! - **Types**: Flat records and field values exchanged between feeds,
//!   the reconciler and storage
//! - **Logging**: Centralized `tracing` initialization
//!
//! # Example
//!
//! ```no_run
//! use secfeed_common::checksum::compute_file_checksum;
//! use secfeed_common::types::ChecksumAlgorithm;
//! use secfeed_common::Result;
//!
//! fn fingerprint(path: &str) -> Result<()> {
//!     let checksum = compute_file_checksum(path, ChecksumAlgorithm::Sha256)?;
//!     println!("{path}: {checksum}");
//!     Ok(())
//! }
//! ```

pub mod checksum;
pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{Result, SecfeedError};
pub use types::{FieldKind, FieldValue, Record};
