//! Target scanner
//!
//! Builds the [`TargetSnapshot`] the planner reads. Paths are probed with a
//! bounded number in flight so large kits do not exhaust file descriptors.

use crate::cache::{CacheKey, ChecksumCache};
use crate::config::ExecutorConfig;
use crate::error::ScanError;
use futures::stream::{self, StreamExt};
use kitsync_artifact::{ContentHash, PathGuard};
use kitsync_composition::{
    hook_commands, load_file_content, mcp_server_names, ContentError, FileContent, PathNormalizer,
    SETTINGS_FILE,
};
use kitsync_core::{PortableRegistry, SourceItem, TargetSnapshot, TargetState};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Shared stop request, checked before each unit of work starts
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Every target path a reconcile may look at
#[must_use]
pub fn paths_of_interest(sources: &[SourceItem], registry: &PortableRegistry) -> BTreeSet<String> {
    sources
        .iter()
        .map(|s| s.target_path.clone())
        .chain(registry.entries.iter().map(|e| e.path.clone()))
        .collect()
}

/// Hashes target paths into a snapshot
#[derive(Debug, Clone)]
pub struct TargetScanner {
    guard: PathGuard,
    normalizer: PathNormalizer,
    cache: ChecksumCache,
    max_file_size: u64,
    concurrency: usize,
}

impl TargetScanner {
    /// Create scanner for a target root
    ///
    /// # Errors
    /// [`ScanError::Pattern`] if the configured path variables do not compile
    pub fn new(root: impl Into<PathBuf>, config: &ExecutorConfig) -> Result<Self, ScanError> {
        let normalizer = PathNormalizer::new(config.install_mode, &config.path_variables)
            .map_err(|e| ScanError::Pattern(e.to_string()))?;
        Ok(Self {
            guard: PathGuard::new(root),
            normalizer,
            cache: ChecksumCache::with_ttl(config.cache_capacity, config.cache_ttl()),
            max_file_size: config.max_file_size,
            concurrency: config.checksum_concurrency.max(1),
        })
    }

    /// Share a cache across scanners
    #[inline]
    #[must_use]
    pub fn with_cache(mut self, cache: ChecksumCache) -> Self {
        self.cache = cache;
        self
    }

    #[inline]
    #[must_use]
    pub fn cache(&self) -> &ChecksumCache {
        &self.cache
    }

    /// Probe every path and collect what exists
    ///
    /// # Errors
    /// - [`ScanError::Cancelled`] if `cancel` was raised before all paths were probed
    /// - [`ScanError::Path`] for a path that fails validation
    /// - I/O and digest errors from the first failing path
    pub async fn scan<I, S>(&self, paths: I, cancel: &CancelFlag) -> Result<TargetSnapshot, ScanError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let results: Vec<Result<Option<(String, TargetState)>, ScanError>> =
            stream::iter(paths.into_iter().map(Into::into))
                .map(|relative: String| async move {
                    if cancel.is_cancelled() {
                        return Err(ScanError::Cancelled);
                    }
                    self.probe(relative).await
                })
                .buffer_unordered(self.concurrency)
                .collect()
                .await;

        if cancel.is_cancelled() {
            return Err(ScanError::Cancelled);
        }

        let mut snapshot = TargetSnapshot::new();
        for result in results {
            if let Some((path, state)) = result? {
                snapshot.insert(path, state);
            }
        }
        self.collect_settings_entries(&mut snapshot);
        debug!(paths = snapshot.files.len(), "target scanned");
        Ok(snapshot)
    }

    async fn probe(&self, relative: String) -> Result<Option<(String, TargetState)>, ScanError> {
        let absolute = self.guard.validate(&relative)?;
        let metadata = match tokio::fs::metadata(&absolute).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(ScanError::Io {
                    path: absolute,
                    source,
                })
            }
        };

        if metadata.is_dir() {
            let digest = tokio::task::spawn_blocking(move || ContentHash::compute_directory(&absolute))
                .await
                .map_err(|e| ScanError::Join(e.to_string()))??;
            return Ok(Some((relative, TargetState::directory(digest))));
        }

        let key = CacheKey::from_metadata(&absolute, &metadata);
        if let Some(state) = self.cache.get(&key).await {
            return Ok(Some((relative, state)));
        }

        let max = self.max_file_size;
        let state = tokio::task::spawn_blocking(move || read_state(&absolute, max))
            .await
            .map_err(|e| ScanError::Join(e.to_string()))??;
        let Some(state) = state else {
            return Ok(None);
        };
        self.cache.insert(key, state.clone()).await;
        Ok(Some((relative, state)))
    }

    fn collect_settings_entries(&self, snapshot: &mut TargetSnapshot) {
        let documents: Vec<(String, String)> = snapshot
            .files
            .iter()
            .filter(|(path, _)| Path::new(path).file_name().and_then(|n| n.to_str()) == Some(SETTINGS_FILE))
            .filter_map(|(path, state)| state.content.clone().map(|c| (path.clone(), c)))
            .collect();

        for (path, body) in documents {
            match serde_json::from_str::<serde_json::Value>(&body) {
                Ok(document) => {
                    snapshot.hook_commands.extend(hook_commands(&document, &self.normalizer));
                    snapshot.mcp_servers.extend(mcp_server_names(&document));
                }
                Err(e) => warn!(path = %path, error = %e, "target settings are not valid JSON"),
            }
        }
    }
}

/// Digest a file, keeping its text when it is small enough to diff
fn read_state(path: &Path, max_size: u64) -> Result<Option<TargetState>, ScanError> {
    match load_file_content(path, max_size) {
        Ok(FileContent::Text(text)) => Ok(Some(TargetState::text(text))),
        Ok(binary) => Ok(Some(TargetState::file(ContentHash::compute(binary.as_bytes())))),
        Err(ContentError::TooLarge { .. }) => Ok(Some(TargetState::file(ContentHash::compute_file(path)?))),
        // removed between stat and read
        Err(ContentError::NotFound(_)) => Ok(None),
        Err(e) => Err(e.into()),
    }
}
