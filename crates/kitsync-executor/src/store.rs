//! Registry and metadata persistence
//!
//! The executor only talks to [`RegistryStore`]; [`JsonRegistryStore`] is
//! the on-disk implementation.

use crate::error::StoreError;
use crate::fsops::write_atomic;
use async_trait::async_trait;
use kitsync_artifact::KitMetadata;
use kitsync_core::PortableRegistry;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Registry file name
pub const REGISTRY_FILE: &str = "portable-registry.json";
/// Tracked-file metadata file name
pub const METADATA_FILE: &str = "metadata.json";

/// Load and save the documents that describe an install
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RegistryStore: Send + Sync {
    /// Load the registry; a missing file is an empty registry
    async fn load_registry(&self) -> Result<PortableRegistry, StoreError>;

    /// Replace the registry
    async fn save_registry(&self, registry: &PortableRegistry) -> Result<(), StoreError>;

    /// Load tracked-file metadata, if any was written
    async fn load_metadata(&self) -> Result<Option<KitMetadata>, StoreError>;

    /// Replace tracked-file metadata
    async fn save_metadata(&self, metadata: &KitMetadata) -> Result<(), StoreError>;
}

/// JSON files in a state directory
#[derive(Debug, Clone)]
pub struct JsonRegistryStore {
    dir: PathBuf,
}

impl JsonRegistryStore {
    #[inline]
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[inline]
    #[must_use]
    pub fn registry_path(&self) -> PathBuf {
        self.dir.join(REGISTRY_FILE)
    }

    #[inline]
    #[must_use]
    pub fn metadata_path(&self) -> PathBuf {
        self.dir.join(METADATA_FILE)
    }

    async fn read_optional(path: &Path) -> Result<Option<String>, StoreError> {
        match tokio::fs::read_to_string(path).await {
            Ok(body) => Ok(Some(body)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io_error(path, e)),
        }
    }

    async fn write(path: &Path, body: &str) -> Result<(), StoreError> {
        write_atomic(path, body.as_bytes()).await.map_err(|e| match e {
            crate::error::ExecutorError::Io { path, source } => StoreError::Io { path, source },
            other => StoreError::io_error(path, std::io::Error::other(other.to_string())),
        })
    }
}

#[async_trait]
impl RegistryStore for JsonRegistryStore {
    async fn load_registry(&self) -> Result<PortableRegistry, StoreError> {
        let path = self.registry_path();
        match Self::read_optional(&path).await? {
            Some(body) => Ok(PortableRegistry::from_json(&body)?),
            None => {
                debug!(path = %path.display(), "no registry yet");
                Ok(PortableRegistry::default())
            }
        }
    }

    async fn save_registry(&self, registry: &PortableRegistry) -> Result<(), StoreError> {
        let body = registry.to_json()?;
        Self::write(&self.registry_path(), &body).await
    }

    async fn load_metadata(&self) -> Result<Option<KitMetadata>, StoreError> {
        match Self::read_optional(&self.metadata_path()).await? {
            Some(body) => Ok(Some(KitMetadata::from_json(&body)?)),
            None => Ok(None),
        }
    }

    async fn save_metadata(&self, metadata: &KitMetadata) -> Result<(), StoreError> {
        let body = metadata.to_json()?;
        Self::write(&self.metadata_path(), &body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kitsync_artifact::{ContentHash, TrackedFile};
    use kitsync_core::{PortableRegistryEntry, PortableType};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[tokio::test]
    async fn missing_files_load_as_empty() {
        let dir = TempDir::new().unwrap();
        let store = JsonRegistryStore::new(dir.path());
        assert_eq!(store.load_registry().await.unwrap(), PortableRegistry::default());
        assert!(store.load_metadata().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_then_load() {
        let dir = TempDir::new().unwrap();
        let store = JsonRegistryStore::new(dir.path().join("state"));
        let digest = ContentHash::compute(b"body");

        let mut registry = PortableRegistry::default();
        registry.applied_manifest_version = Some("1.2.0".into());
        registry.upsert(PortableRegistryEntry::new(
            "planner",
            PortableType::Agent,
            "claude",
            "agents/planner.md",
            digest,
        ));
        store.save_registry(&registry).await.unwrap();

        let mut metadata = KitMetadata::new("1.2.0");
        metadata.upsert(TrackedFile::new("agents/planner.md", digest, "1.2.0"));
        store.save_metadata(&metadata).await.unwrap();

        assert_eq!(store.load_registry().await.unwrap(), registry);
        assert_eq!(store.load_metadata().await.unwrap(), Some(metadata));
    }

    #[tokio::test]
    async fn corrupt_registry_is_an_error() {
        let dir = TempDir::new().unwrap();
        let store = JsonRegistryStore::new(dir.path());
        std::fs::write(store.registry_path(), "{ not json").unwrap();
        assert!(matches!(store.load_registry().await, Err(StoreError::Registry(_))));

        std::fs::write(store.registry_path(), r#"{"version":"7.0","entries":[]}"#).unwrap();
        assert!(matches!(store.load_registry().await, Err(StoreError::Registry(_))));
    }
}
