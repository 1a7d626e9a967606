//! Error types for the executor
//!
//! Provides error handling for:
//! - Lock acquisition (the only retried failure)
//! - Registry and metadata persistence
//! - Target scans
//! - Per-action writes and rollbacks

use kitsync_artifact::{HashError, MetadataError, PathError};
use kitsync_composition::{ContentError, DiffError, SettingsError};
use kitsync_core::{ErrorKind, RegistryError};
use std::path::PathBuf;

/// Errors executing a plan
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// Plan still has conflicts without a resolution
    #[error("{count} conflict(s) need a resolution before execution")]
    UnresolvedConflicts { count: usize },

    /// Registry lock unavailable
    #[error("lock error: {0}")]
    Lock(#[from] LockError),

    /// Registry or metadata could not be loaded or saved
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Target path failed validation
    #[error("unsafe path: {0}")]
    Path(#[from] PathError),

    /// I/O error at a path
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// File could not be loaded
    #[error("content error: {0}")]
    Content(#[from] ContentError),

    /// Digest failed
    #[error("hash error: {0}")]
    Hash(#[from] HashError),

    /// Settings document could not be merged
    #[error("settings merge failed: {0}")]
    Settings(#[from] SettingsError),

    /// Settings document is not JSON
    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Hunks could not be applied
    #[error("hunk merge failed: {0}")]
    Diff(#[from] DiffError),

    /// Plan action has no matching source item
    #[error("no source item for {0}")]
    MissingSource(String),

    /// Operation not possible for this item
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Restoring a backup failed
    #[error("rollback failed for {path}: {message}")]
    RollbackFailed { path: PathBuf, message: String },

    /// Blocking task panicked or was cancelled
    #[error("background task failed: {0}")]
    Join(String),
}

impl ExecutorError {
    /// Create IO error for path
    pub fn io_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Classify for exit signaling
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnresolvedConflicts { .. } => ErrorKind::Conflict,
            Self::RollbackFailed { .. } => ErrorKind::RollbackFailure,
            Self::Store(e) => e.kind(),
            Self::Path(_)
            | Self::Settings(_)
            | Self::Json { .. }
            | Self::Diff(_)
            | Self::MissingSource(_)
            | Self::Unsupported(_) => ErrorKind::Validation,
            Self::Content(ContentError::TooLarge { .. }) => ErrorKind::Validation,
            Self::Lock(_) | Self::Io { .. } | Self::Content(_) | Self::Hash(_) | Self::Join(_) => {
                ErrorKind::Io
            }
        }
    }

    /// Check if error is retryable
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Lock(LockError::Busy { .. }))
    }
}

/// Registry lock errors
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// Another process holds the lock
    #[error("registry lock busy: {path} (after {attempts} attempts)")]
    Busy { path: PathBuf, attempts: u32 },

    /// Lock file could not be created or inspected
    #[error("failed to acquire registry lock {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Persistence errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Registry document is corrupt
    #[error("registry corrupt: {0}")]
    Registry(#[from] RegistryError),

    /// Metadata document is corrupt
    #[error("metadata corrupt: {0}")]
    Metadata(#[from] MetadataError),

    /// Read or write failed
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    /// Create IO error for path
    pub fn io_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Registry(_) | Self::Metadata(_) => ErrorKind::Validation,
            Self::Io { .. } => ErrorKind::Io,
        }
    }
}

/// Target scan errors
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    /// Stopped before every path was visited
    #[error("scan cancelled")]
    Cancelled,

    #[error("unsafe path: {0}")]
    Path(#[from] PathError),

    #[error("hash error: {0}")]
    Hash(#[from] HashError),

    #[error("content error: {0}")]
    Content(#[from] ContentError),

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Path placeholders did not compile
    #[error("invalid path variables: {0}")]
    Pattern(String),

    #[error("background task failed: {0}")]
    Join(String),
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("malformed config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_lock_contention_retries() {
        let busy = ExecutorError::Lock(LockError::Busy {
            path: PathBuf::from(".kitsync.lock"),
            attempts: 3,
        });
        assert!(busy.is_retryable());
        assert_eq!(busy.kind(), ErrorKind::Io);

        let io = ExecutorError::io_error("a.md", std::io::Error::other("disk full"));
        assert!(!io.is_retryable());
    }

    #[test]
    fn rollback_failure_is_distinct() {
        let err = ExecutorError::RollbackFailed {
            path: PathBuf::from("a.md"),
            message: "permission denied".into(),
        };
        assert_eq!(err.kind(), ErrorKind::RollbackFailure);
        assert!(err.to_string().contains("rollback failed"));
    }

    #[test]
    fn corrupt_registry_is_validation() {
        let err: ExecutorError = StoreError::from(RegistryError::UnsupportedVersion("9".into())).into();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}
