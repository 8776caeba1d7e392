//! Error types for the data-movement engine
//!
//! Defines the crate-wide error enum and small helpers for attaching path
//! context, mirroring the shape used throughout the rest of the engine.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for engine operations.
#[derive(Error, Debug)]
pub enum DmError {
    /// I/O error during file or journal operations.
    #[error("I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Destination already exists and the overwrite callback refused it.
    ///
    /// Externally this is treated as `Skipped`, not a fatal failure.
    #[error("refused to overwrite existing destination: {0}")]
    NotOverwriteExistingDestination(String),

    /// A user-supplied `validatePath` callback rejected the path.
    #[error("path validation failed for '{0}': {1}")]
    PathCustomValidationFailed(String, String),

    /// The `shouldTransfer` callback itself failed (not: returned false).
    #[error("shouldTransfer check failed for '{0}': {1}")]
    FailedCheckingShouldTransfer(String, String),

    /// Directory enumeration failed outright.
    #[error("failed to enumerate directory '{0}': {1}")]
    FailToEnumerateDirectory(String, String),

    /// Destination validation (type, existence, accessibility) failed.
    #[error("failed to validate destination '{0}': {1}")]
    FailToValidateDestination(String, String),

    /// No progress observed within the stall window during `Monitor`.
    #[error("transfer stuck: no progress for '{0}' within the stall window")]
    TransferStuck(String),

    /// A transfer with the same (source, destination) key is already active.
    #[error("transfer already exists for key {0}")]
    TransferAlreadyExists(String),

    /// Source and destination resolve to the same location.
    #[error("source and destination are the same location: {0}")]
    SourceAndDestinationLocationEqual(String),

    /// Source and destination blob types are incompatible for this transfer.
    #[error("source and destination blob types differ: {0} vs {1}")]
    SourceAndDestinationBlobTypeDifferent(String, String),

    /// The memory pool's configured ceiling was exceeded.
    #[error("out of memory: requested {requested} cells, ceiling is {ceiling}")]
    OutOfMemory { requested: usize, ceiling: usize },

    /// The stream journal's format version is incompatible with this build.
    #[error("journal version mismatch: found '{found}', expected '{expected}'")]
    JournalVersionMismatch { found: String, expected: String },

    /// The journal file is structurally corrupt (bad offsets, broken list).
    #[error("journal corrupt: {0}")]
    JournalCorrupt(String),

    /// A relative path exceeded the 1024-character enqueue limit.
    #[error("relative path exceeds 1024 characters: {0}")]
    RelativePathTooLong(String),

    /// Operation cancelled via a cancellation token.
    #[error("operation cancelled")]
    Cancelled,

    /// Hash/content verification failed.
    #[error("integrity check failed for '{path}': expected {expected}, got {actual}")]
    IntegrityMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    /// Catch-all for collaborator or system faults that don't map onto a
    /// named protocol error kind.
    #[error("{0}")]
    UncategorizedException(String),

    /// Generic error with added context.
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<DmError>,
    },
}

impl DmError {
    /// Create an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create an integrity mismatch error.
    pub fn integrity_mismatch(
        path: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::IntegrityMismatch {
            path: path.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Add context to an error.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Whether a retry policy should consider this error transient.
    ///
    /// This does not decide `Skipped` vs `Failed` classification for a
    /// transfer job — see `JobStatus` transitions in `transfer::single` for
    /// that — it only answers "is it worth trying the same chunk RPC again".
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Io { .. } | Self::UncategorizedException(_))
    }

    /// Whether external callers should classify this as a skip rather than a
    /// failure, per §4.5/§7 of the engine's transfer-state rules.
    pub fn is_skip_reason(&self) -> bool {
        matches!(
            self,
            Self::NotOverwriteExistingDestination(_) | Self::PathCustomValidationFailed(..)
        )
    }

    /// Whether this error must cancel sibling work in a directory transfer
    /// rather than merely failing the one file that raised it.
    pub fn cancels_siblings(&self) -> bool {
        matches!(
            self,
            Self::TransferStuck(_) | Self::FailedCheckingShouldTransfer(..)
        )
    }
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, DmError>;

impl From<std::io::Error> for DmError {
    fn from(err: std::io::Error) -> Self {
        DmError::Io {
            path: std::path::PathBuf::new(),
            source: err,
        }
    }
}

/// Extension trait for adding path context to `std::io::Result`.
pub trait IoResultExt<T> {
    /// Add path context to an I/O error.
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|e| DmError::io(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_carries_path() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = DmError::io("/test/path", io_err);
        match err {
            DmError::Io { path, .. } => assert_eq!(path, PathBuf::from("/test/path")),
            _ => panic!("expected Io variant"),
        }
    }

    #[test]
    fn skip_reasons_are_classified() {
        let refused = DmError::NotOverwriteExistingDestination("blob".into());
        assert!(refused.is_skip_reason());
        assert!(!refused.cancels_siblings());

        let stuck = DmError::TransferStuck("blob".into());
        assert!(stuck.cancels_siblings());
        assert!(!stuck.is_skip_reason());
    }

    #[test]
    fn with_context_wraps_source() {
        let base = DmError::UncategorizedException("boom".into());
        let wrapped = base.with_context("while uploading");
        assert_eq!(wrapped.to_string(), "while uploading: boom");
    }
}
