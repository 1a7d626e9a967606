//! Executor configuration
//!
//! Every field has a default, so an empty TOML document is a valid config.

use crate::error::ConfigError;
use kitsync_artifact::InstalledSettings;
use kitsync_composition::{InstallMode, MergeOptions, PathVariables};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// File name of the registry lock under the target root
pub const LOCK_FILE: &str = ".kitsync.lock";

/// Executor and scanner settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Largest file read into memory (bytes)
    pub max_file_size: u64,
    /// Lock age after which it is considered leaked
    pub lock_stale_after_secs: u64,
    /// Extra acquisition attempts while the lock is held
    pub lock_retries: u32,
    /// First retry delay; doubled after every attempt
    pub lock_backoff_ms: u64,
    /// Files hashed at once by the scanner
    pub checksum_concurrency: usize,
    pub cache_ttl_secs: u64,
    pub cache_capacity: u64,
    /// Backup directory, relative to the target root
    pub backup_dir: PathBuf,
    /// Keep per-run backups after a successful run
    pub keep_backups: bool,
    pub install_mode: InstallMode,
    pub path_variables: PathVariables,
    /// Kit version being applied; recorded as the applied manifest version
    pub current_version: Option<String>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_file_size: 10 * 1024 * 1024,
            lock_stale_after_secs: 300,
            lock_retries: 5,
            lock_backoff_ms: 50,
            checksum_concurrency: 16,
            cache_ttl_secs: 60,
            cache_capacity: 10_000,
            backup_dir: PathBuf::from(".kitsync-backup"),
            keep_backups: false,
            install_mode: InstallMode::Local,
            path_variables: PathVariables::default(),
            current_version: None,
        }
    }
}

impl ExecutorConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse TOML, filling missing fields with defaults
    ///
    /// # Errors
    /// Returns [`ConfigError`] for malformed TOML or invalid values
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would stall the executor
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] naming the offending field
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.checksum_concurrency == 0 {
            return Err(ConfigError::Invalid("checksum_concurrency must be at least 1".into()));
        }
        if self.max_file_size == 0 {
            return Err(ConfigError::Invalid("max_file_size must be positive".into()));
        }
        if self.backup_dir.is_absolute() {
            return Err(ConfigError::Invalid("backup_dir must be relative to the target root".into()));
        }
        Ok(())
    }

    #[inline]
    #[must_use]
    pub fn with_install_mode(mut self, mode: InstallMode) -> Self {
        self.install_mode = mode;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_current_version(mut self, version: impl Into<String>) -> Self {
        self.current_version = Some(version.into());
        self
    }

    #[inline]
    #[must_use]
    pub fn with_keep_backups(mut self, keep: bool) -> Self {
        self.keep_backups = keep;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_lock_retries(mut self, retries: u32, backoff_ms: u64) -> Self {
        self.lock_retries = retries;
        self.lock_backoff_ms = backoff_ms;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_checksum_concurrency(mut self, limit: usize) -> Self {
        self.checksum_concurrency = limit;
        self
    }

    #[inline]
    #[must_use]
    pub fn lock_stale_after(&self) -> Duration {
        Duration::from_secs(self.lock_stale_after_secs)
    }

    #[inline]
    #[must_use]
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Settings merge options for this install
    #[must_use]
    pub fn merge_options(&self, installed: Option<InstalledSettings>) -> MergeOptions {
        let options = MergeOptions::new(self.install_mode).with_variables(self.path_variables.clone());
        match installed {
            Some(baseline) => options.with_installed(baseline),
            None => options,
        }
    }
}
