//! Error types for s3sync
//!
//! Taxonomy follows the failure classes of a sync run: local I/O, object
//! store transport, ledger persistence, and split coordination.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Primary error type for all sync operations
#[derive(Debug, Error)]
pub enum SyncError {
    // ========== I/O Errors ==========

    /// Local file stat/open/read/write failed
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ========== Transport Errors ==========

    /// Object store operation failed
    #[error("Object store operation failed: {message}")]
    StorageError { message: String },

    // ========== Ledger Errors ==========

    /// Ledger could not be read or persisted
    #[error("Ledger operation failed: {reason}")]
    Ledger { reason: String },

    /// No transfer with this id
    #[error("Unknown transfer: {transfer_id}")]
    UnknownTransfer { transfer_id: String },

    /// No part recorded under this path
    #[error("Unknown part: {part_path}")]
    UnknownPart { part_path: String },

    /// No file status recorded under this path
    #[error("Unknown file: {path}")]
    UnknownFile { path: String },

    // ========== Coordination Errors ==========

    /// Splitter reported a terminal failure
    #[error("Splitting {} failed: {reason}", .path.display())]
    SplitFailed { path: PathBuf, reason: String },

    /// Splitter stopped because cancellation was requested
    #[error("Splitting {} was cancelled", .path.display())]
    SplitCancelled { path: PathBuf },

    /// Splitter channel closed without a terminal value
    #[error("Splitter for {} exited without reporting completion", .path.display())]
    SplitterDisconnected { path: PathBuf },

    /// A part key of a split file is the key of another local file
    #[error("Part key {key} of {} collides with an existing file", .path.display())]
    KeyCollision { path: PathBuf, key: String },

    /// Batch stopped on a shutdown request
    #[error("Sync cancelled")]
    Cancelled,

    // ========== Config Errors ==========

    /// Invalid configuration
    #[error("Invalid configuration: {reason}")]
    Config { reason: String },
}

impl SyncError {
    /// Wrap an I/O error with the path it happened on
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        SyncError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Returns true if the caller may retry the operation
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::StorageError { .. })
    }

    /// Returns true if the error came from a shutdown request
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            SyncError::Cancelled | SyncError::SplitCancelled { .. }
        )
    }
}

/// Result type alias for sync operations
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_keeps_source() {
        let err = SyncError::io(
            "data/a.bin",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(err.to_string().contains("data/a.bin"));
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "gone");
    }

    #[test]
    fn test_classification() {
        assert!(SyncError::StorageError { message: "503".into() }.is_retryable());
        assert!(!SyncError::Ledger { reason: "disk".into() }.is_retryable());
        assert!(SyncError::Cancelled.is_cancelled());
        assert!(SyncError::SplitCancelled { path: "x".into() }.is_cancelled());
    }
}
