//! Error types shared by every secfeed crate

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, SecfeedError>;

/// Main error type for the shared layer
#[derive(Error, Debug)]
pub enum SecfeedError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Cannot parse {value:?} as {kind}: {reason}")]
    InvalidValue {
        kind: String,
        value: String,
        reason: String,
    },

    #[error("Unknown {enumeration} value: {value:?}")]
    UnknownVariant { enumeration: String, value: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl SecfeedError {
    pub fn invalid_value(
        kind: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            kind: kind.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    pub fn unknown_variant(enumeration: impl Into<String>, value: impl Into<String>) -> Self {
        Self::UnknownVariant {
            enumeration: enumeration.into(),
            value: value.into(),
        }
    }
}
