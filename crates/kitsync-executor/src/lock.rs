//! Advisory lock serializing registry writers
//!
//! The lock is a file created with `create_new`; it holds the owner's pid
//! and acquisition time and is removed when the guard drops. A lock older
//! than the stale threshold is assumed leaked by a crashed process and is
//! reclaimed.

use crate::config::ExecutorConfig;
use crate::error::LockError;
use chrono::Utc;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

/// Held registry lock; released on drop
#[derive(Debug)]
pub struct RegistryLock {
    path: PathBuf,
    _file: File,
}

impl RegistryLock {
    /// Acquire the lock, retrying with exponential backoff
    ///
    /// # Errors
    /// - [`LockError::Busy`] when every attempt found a live lock
    /// - [`LockError::Io`] when the lock file cannot be created or inspected
    pub async fn acquire(path: impl Into<PathBuf>, config: &ExecutorConfig) -> Result<Self, LockError> {
        let path = path.into();
        let stale_after = config.lock_stale_after();
        let mut delay = Duration::from_millis(config.lock_backoff_ms);
        let attempts = config.lock_retries + 1;

        for attempt in 1..=attempts {
            let attempt_path = path.clone();
            match blocking(&path, move || Self::try_acquire(&attempt_path)).await {
                Ok(lock) => {
                    debug!(path = %path.display(), attempt, "registry lock acquired");
                    return Ok(lock);
                }
                Err(LockError::Busy { .. }) => {
                    let stale_path = path.clone();
                    if blocking(&path, move || Self::reclaim_if_stale(&stale_path, stale_after)).await? {
                        continue;
                    }
                    if attempt < attempts {
                        debug!(path = %path.display(), attempt, ?delay, "registry lock busy, backing off");
                        tokio::time::sleep(delay).await;
                        delay = delay.saturating_mul(2);
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Err(LockError::Busy { path, attempts })
    }

    /// Single attempt without waiting
    ///
    /// # Errors
    /// [`LockError::Busy`] if the lock file already exists
    pub fn try_acquire(path: &Path) -> Result<Self, LockError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| LockError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(LockError::Busy {
                    path: path.to_path_buf(),
                    attempts: 1,
                });
            }
            Err(source) => {
                return Err(LockError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        write!(file, "pid={}\nutc={}\n", std::process::id(), Utc::now().to_rfc3339()).map_err(
            |source| LockError::Io {
                path: path.to_path_buf(),
                source,
            },
        )?;
        Ok(Self {
            path: path.to_path_buf(),
            _file: file,
        })
    }

    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the lock file if it is older than `stale_after`
    fn reclaim_if_stale(path: &Path, stale_after: Duration) -> Result<bool, LockError> {
        let metadata = match std::fs::metadata(path) {
            Ok(metadata) => metadata,
            // released between our attempt and this check
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(true),
            Err(source) => {
                return Err(LockError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        let age = metadata
            .modified()
            .ok()
            .and_then(|modified| SystemTime::now().duration_since(modified).ok())
            .unwrap_or_default();
        if age <= stale_after {
            return Ok(false);
        }
        let holder = std::fs::read_to_string(path).unwrap_or_default();
        warn!(
            path = %path.display(),
            age_secs = age.as_secs(),
            holder = %holder.trim().replace('\n', " "),
            "reclaiming stale registry lock"
        );
        match std::fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(true),
            Err(source) => Err(LockError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}

/// Run lock file I/O off the async worker threads
async fn blocking<T, F>(path: &Path, f: F) -> Result<T, LockError>
where
    F: FnOnce() -> Result<T, LockError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| LockError::Io {
        path: path.to_path_buf(),
        source: std::io::Error::other(e.to_string()),
    })?
}

impl Drop for RegistryLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "failed to release registry lock");
            }
        }
    }
}
