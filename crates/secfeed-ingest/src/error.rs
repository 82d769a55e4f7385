//! Error types for feed ingestion

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for ingestion operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// Which side of a reconciliation a record came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordSide {
    Current,
    Incoming,
}

impl std::fmt::Display for RecordSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordSide::Current => f.write_str("current"),
            RecordSide::Incoming => f.write_str("incoming"),
        }
    }
}

#[derive(Error, Debug)]
pub enum IngestError {
    /// Destination collision; the caller must rotate or remove it first
    #[error("Destination already exists: {}", path.display())]
    AlreadyExists { path: PathBuf },

    /// A page expected to be well formed could not be inspected
    #[error("Corrupt page {index} for prefix {prefix:?}: {reason}")]
    CorruptPage {
        prefix: String,
        index: u64,
        reason: String,
    },

    #[error("Record {position} of {side} set is missing key field {field:?}")]
    MissingRequiredField {
        side: RecordSide,
        position: usize,
        field: String,
    },

    #[error("Duplicate composite key {key} in {side} set")]
    DuplicateKey { side: RecordSide, key: String },

    #[error("Table {table} has no row with key {key}")]
    UnknownKey { table: String, key: String },

    #[error("Transport failed for {url} after {attempts} attempts: {reason}")]
    TransportFailure {
        url: String,
        attempts: u32,
        reason: String,
    },

    #[error("Upstream returned HTTP {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    /// A file matches the page pattern but carries no parseable index
    #[error("File {name:?} matches page pattern for prefix {prefix:?} but has no integer index")]
    NamingViolation { prefix: String, name: String },

    #[error("Integrity check failed for page {index} of prefix {prefix:?}: {reason}")]
    IntegrityCheck {
        prefix: String,
        index: u64,
        reason: String,
    },

    #[error("Header of {} does not match the first part", path.display())]
    HeaderMismatch { path: PathBuf },

    #[error("No parts given for {}", destination.display())]
    NoParts { destination: PathBuf },

    #[error("Unexpected payload: {0}")]
    Payload(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid page pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error(transparent)]
    Common(#[from] secfeed_common::SecfeedError),
}

impl IngestError {
    pub fn corrupt_page(prefix: &str, index: u64, reason: impl Into<String>) -> Self {
        Self::CorruptPage {
            prefix: prefix.to_string(),
            index,
            reason: reason.into(),
        }
    }

    pub fn already_exists(path: impl Into<PathBuf>) -> Self {
        Self::AlreadyExists { path: path.into() }
    }

    /// Whether a later invocation can pick the session up from disk
    pub fn is_resumable(&self) -> bool {
        matches!(
            self,
            IngestError::TransportFailure { .. }
                | IngestError::HttpStatus { .. }
                | IngestError::Http(_)
                | IngestError::IntegrityCheck { .. }
        )
    }
}
