//! Checksum cache using moka
//!
//! Avoids re-hashing unchanged files between scans. Entries are keyed by
//! path, modification time and length, so any write to a file produces a
//! new key and the old entry simply ages out.

use kitsync_core::TargetState;
use moka::future::Cache;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Identity of a file version
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub path: PathBuf,
    pub modified: SystemTime,
    pub len: u64,
}

impl CacheKey {
    /// Key from file metadata
    #[must_use]
    pub fn from_metadata(path: impl Into<PathBuf>, metadata: &std::fs::Metadata) -> Self {
        Self {
            path: path.into(),
            modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            len: metadata.len(),
        }
    }
}

/// Digests of files seen by earlier scans
///
/// Owned by whoever drives the scans; nothing here is process-global.
#[derive(Debug, Clone)]
pub struct ChecksumCache {
    inner: Cache<CacheKey, Arc<TargetState>>,
}

impl ChecksumCache {
    /// Create new cache with max capacity
    #[inline]
    #[must_use]
    pub fn new(max_capacity: u64) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(max_capacity)
                .support_invalidation_closures()
                .build(),
        }
    }

    /// Create cache with time-based expiration
    #[inline]
    #[must_use]
    pub fn with_ttl(max_capacity: u64, ttl: Duration) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .support_invalidation_closures()
                .build(),
        }
    }

    #[inline]
    pub async fn insert(&self, key: CacheKey, state: TargetState) {
        self.inner.insert(key, Arc::new(state)).await;
    }

    #[inline]
    pub async fn get(&self, key: &CacheKey) -> Option<TargetState> {
        self.inner.get(key).await.map(|state| (*state).clone())
    }

    /// Drop every cached version of a path
    pub fn invalidate_path(&self, path: &std::path::Path) {
        let path = path.to_path_buf();
        // both constructors enable invalidation closures, so this cannot fail
        let _ = self.inner.invalidate_entries_if(move |key, _| key.path == path);
    }

    /// Apply pending evictions so counts are exact
    pub async fn sync(&self) {
        self.inner.run_pending_tasks().await;
    }

    #[inline]
    #[must_use]
    pub fn entry_count(&self) -> u64 {
        self.inner.entry_count()
    }
}

impl Default for ChecksumCache {
    fn default() -> Self {
        Self::new(10_000)
    }
}
