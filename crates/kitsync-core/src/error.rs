//! Error types for kitsync core
//!
//! Provides the error taxonomy shared by planning and execution:
//! - Validation failures (unsafe paths, corrupt manifest or registry)
//! - Conflicts awaiting a caller decision
//! - I/O failures
//! - Failed rollbacks

use kitsync_artifact::{MetadataError, PathError};

/// Top-level classification of a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad path, malformed manifest or registry, schema mismatch
    Validation,
    /// Expected planning outcome that needs a caller decision
    Conflict,
    /// Filesystem or lock failure
    Io,
    /// Restoring a backup failed; the target may be inconsistent
    RollbackFailure,
}

/// Main reconcile error type
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// Source item has an unsafe target path
    #[error("unsafe target path '{path}' for {item}: {source}")]
    InvalidPath {
        item: String,
        path: String,
        #[source]
        source: PathError,
    },

    /// Two source items share one identity
    #[error("duplicate source item: {0}")]
    DuplicateItem(String),

    /// Manifest is corrupt
    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),

    /// Registry is corrupt
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Tracking metadata is corrupt
    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),

    /// Plan still has conflicts without a resolution
    #[error("{count} conflict(s) need a resolution")]
    UnresolvedConflicts { count: usize },
}

impl ReconcileError {
    /// Classify for exit signaling
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnresolvedConflicts { .. } => ErrorKind::Conflict,
            Self::InvalidPath { .. }
            | Self::DuplicateItem(_)
            | Self::Manifest(_)
            | Self::Registry(_)
            | Self::Metadata(_) => ErrorKind::Validation,
        }
    }

    /// Planning never retries
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        false
    }
}

/// Manifest errors
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("malformed manifest: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported manifest version '{0}'")]
    UnsupportedVersion(String),
}

/// Registry errors
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("malformed registry: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported registry version '{0}'")]
    UnsupportedVersion(String),

    #[error("unsafe registry path '{path}': {source}")]
    UnsafePath {
        path: String,
        #[source]
        source: PathError,
    },

    #[error("duplicate registry entry: {0}")]
    DuplicateEntry(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kinds() {
        assert_eq!(
            ReconcileError::UnresolvedConflicts { count: 2 }.kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            ReconcileError::DuplicateItem("x".into()).kind(),
            ErrorKind::Validation
        );
        let err: ReconcileError = RegistryError::UnsupportedVersion("9".into()).into();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(!err.is_retryable());
    }

    #[test]
    fn error_display() {
        let err = ReconcileError::UnresolvedConflicts { count: 3 };
        assert!(err.to_string().contains("3 conflict"));
    }
}
