//! Error types for the geo filter engine.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Errors produced by the indexer, the loader, the store and the catalog.
#[derive(Debug, Error)]
pub enum GeoFilterError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Unsupported catalog version {found} (newest supported is {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("Store error: {0}")]
    Store(String),

    #[error("Query exceeded its deadline of {0:?}")]
    QueryTimeout(Duration),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Loader is closed")]
    Closed,

    #[error("Unknown geo filter: {0}")]
    UnknownFilter(String),
}

impl GeoFilterError {
    /// Shorthand used by store implementations.
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, GeoFilterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = GeoFilterError::UnsupportedVersion {
            found: 3,
            supported: 1,
        };
        assert_eq!(
            err.to_string(),
            "Unsupported catalog version 3 (newest supported is 1)"
        );
        assert_eq!(
            GeoFilterError::store("connection refused").to_string(),
            "Store error: connection refused"
        );
    }

    #[test]
    fn test_io_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "missing");
        let err: GeoFilterError = io_err.into();
        assert!(matches!(err, GeoFilterError::Io(_)));
    }
}
