//! Persistent per-kit tracking records
//!
//! [`KitMetadata`] is the on-disk `metadata.json` document: one
//! [`TrackedFile`] per installed path plus the [`InstalledSettings`]
//! baseline of hook commands and MCP servers granted by earlier runs.

use crate::hash::ContentHash;
use crate::ownership::Ownership;
use crate::path::{check_relative, PathError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// One installed file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedFile {
    /// Path relative to the target root
    pub path: String,
    /// Digest of the bytes the kit last wrote
    pub checksum: ContentHash,
    /// Ownership at the time of the last write
    pub ownership: Ownership,
    /// Kit version that wrote the file
    pub installed_version: String,
    /// Digest of the kit source the file was produced from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_checksum: Option<ContentHash>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installed_at: Option<DateTime<Utc>>,
}

impl TrackedFile {
    /// Create a kit-owned record
    #[must_use]
    pub fn new(
        path: impl Into<String>,
        checksum: ContentHash,
        installed_version: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            checksum,
            ownership: Ownership::Kit,
            installed_version: installed_version.into(),
            base_checksum: None,
            source_timestamp: None,
            installed_at: None,
        }
    }

    /// Set the source digest
    #[inline]
    #[must_use]
    pub fn with_base_checksum(mut self, checksum: ContentHash) -> Self {
        self.base_checksum = Some(checksum);
        self
    }

    /// Set the install timestamp
    #[inline]
    #[must_use]
    pub fn with_installed_at(mut self, at: DateTime<Utc>) -> Self {
        self.installed_at = Some(at);
        self
    }
}

/// Hook commands and MCP server names the kit has granted before
///
/// Used to tell "never installed" apart from "installed, then deleted by
/// the user".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstalledSettings {
    #[serde(default)]
    pub hooks: Vec<String>,
    #[serde(default)]
    pub mcp_servers: Vec<String>,
}

impl InstalledSettings {
    /// Check if a hook command was granted before
    #[must_use]
    pub fn has_hook(&self, command: &str) -> bool {
        self.hooks.iter().any(|h| h == command)
    }

    /// Check if an MCP server was granted before
    #[must_use]
    pub fn has_server(&self, name: &str) -> bool {
        self.mcp_servers.iter().any(|s| s == name)
    }

    /// Fold newly granted names into the baseline, keeping order and uniqueness
    pub fn record(&mut self, hooks: &[String], servers: &[String]) {
        let mut seen: BTreeSet<String> = self.hooks.iter().cloned().collect();
        for hook in hooks {
            if seen.insert(hook.clone()) {
                self.hooks.push(hook.clone());
            }
        }
        let mut seen: BTreeSet<String> = self.mcp_servers.iter().cloned().collect();
        for server in servers {
            if seen.insert(server.clone()) {
                self.mcp_servers.push(server.clone());
            }
        }
    }
}

/// `metadata.json` for one kit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KitMetadata {
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub files: Vec<TrackedFile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installed_settings: Option<InstalledSettings>,
    /// Fields this version does not know, written back unchanged
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl KitMetadata {
    /// Create empty metadata for a kit version
    #[must_use]
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            installed_at: None,
            files: Vec::new(),
            installed_settings: None,
            extra: Map::new(),
        }
    }

    /// Parse and validate
    ///
    /// # Errors
    /// Returns [`MetadataError`] for malformed JSON, unsafe paths or duplicates
    pub fn from_json(json: &str) -> Result<Self, MetadataError> {
        let metadata: Self = serde_json::from_str(json)?;
        metadata.validate()?;
        Ok(metadata)
    }

    /// Serialize to pretty JSON
    ///
    /// # Errors
    /// Returns error if serialization fails
    pub fn to_json(&self) -> Result<String, MetadataError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Enforce path safety and per-path uniqueness
    ///
    /// # Errors
    /// Returns the first violation found
    pub fn validate(&self) -> Result<(), MetadataError> {
        let mut seen = BTreeSet::new();
        for file in &self.files {
            check_relative(&file.path).map_err(|source| MetadataError::UnsafePath {
                path: file.path.clone(),
                source,
            })?;
            if !seen.insert(file.path.as_str()) {
                return Err(MetadataError::DuplicatePath(file.path.clone()));
            }
        }
        Ok(())
    }

    /// Find record by path
    #[must_use]
    pub fn find(&self, path: &str) -> Option<&TrackedFile> {
        self.files.iter().find(|f| f.path == path)
    }

    /// Insert or replace the record for `file.path`
    pub fn upsert(&mut self, file: TrackedFile) {
        if let Some(existing) = self.files.iter_mut().find(|f| f.path == file.path) {
            *existing = file;
        } else {
            self.files.push(file);
        }
    }

    /// Remove record by path, returning it
    pub fn remove(&mut self, path: &str) -> Option<TrackedFile> {
        let index = self.files.iter().position(|f| f.path == path)?;
        Some(self.files.remove(index))
    }

    /// Baseline of granted settings entries (empty when none recorded)
    #[must_use]
    pub fn settings_baseline(&self) -> InstalledSettings {
        self.installed_settings.clone().unwrap_or_default()
    }
}

/// Errors reading or validating tracking metadata
#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    /// Malformed JSON
    #[error("malformed metadata: {0}")]
    Json(#[from] serde_json::Error),

    /// Tracked path fails validation
    #[error("unsafe tracked path '{path}': {source}")]
    UnsafePath {
        path: String,
        #[source]
        source: PathError,
    },

    /// Same path tracked twice
    #[error("duplicate tracked path: {0}")]
    DuplicatePath(String),
}
