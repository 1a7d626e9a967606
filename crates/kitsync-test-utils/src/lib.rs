//! Testing utilities for the kitsync workspace
//!
//! Shared fixtures: source items, registries recorded "as installed",
//! temp target trees and tracing setup.

#![allow(missing_docs)]

use kitsync_artifact::{KitMetadata, TrackedFile};
use kitsync_composition::MergeKind;
use kitsync_core::{
    PortableRegistry, PortableRegistryEntry, PortableType, SourceItem, TargetSnapshot, TargetState,
};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const PROVIDER: &str = "claude";

/// Install a test subscriber once; later calls are no-ops
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

pub fn agent(name: &str, body: &str) -> SourceItem {
    SourceItem::text(name, PortableType::Agent, PROVIDER, format!("agents/{name}.md"), body)
}

pub fn command(name: &str, body: &str) -> SourceItem {
    SourceItem::text(name, PortableType::Command, PROVIDER, format!("commands/{name}.md"), body)
}

/// Settings item holding one `SessionStart` hook
pub fn hook_settings(command: &str) -> SourceItem {
    SourceItem::text(
        "settings",
        PortableType::Config,
        PROVIDER,
        ".claude/settings.json",
        settings_with_hook("SessionStart", command).to_string(),
    )
    .with_merge_kind(MergeKind::Settings)
}

pub fn settings_with_hook(event: &str, command: &str) -> Value {
    json!({"hooks": {event: [{"hooks": [{"type": "command", "command": command}]}]}})
}

/// Registry as the executor leaves it after writing `items` verbatim
pub fn registry_for(items: &[SourceItem]) -> PortableRegistry {
    let mut registry = PortableRegistry::default();
    for item in items {
        registry.upsert(
            PortableRegistryEntry::new(
                item.item.clone(),
                item.item_type,
                item.provider.clone(),
                item.target_path.clone(),
                item.checksum,
            )
            .with_global(item.global)
            .with_target_checksum(item.checksum),
        );
    }
    registry
}

/// Tracking metadata matching [`registry_for`]
pub fn metadata_for(version: &str, items: &[SourceItem]) -> KitMetadata {
    let mut metadata = KitMetadata::new(version);
    for item in items {
        metadata.upsert(TrackedFile::new(item.target_path.clone(), item.checksum, version).with_base_checksum(item.checksum));
    }
    metadata
}

/// Target holding each item's own content
pub fn snapshot_for(items: &[SourceItem]) -> TargetSnapshot {
    let mut snapshot = TargetSnapshot::new();
    for item in items {
        let state = match &item.content {
            Some(body) => TargetState::text(body.clone()),
            None => TargetState::file(item.checksum),
        };
        snapshot.insert(item.target_path.clone(), state);
    }
    snapshot
}

/// Temporary target tree
#[derive(Debug)]
pub struct TempTarget {
    dir: TempDir,
}

impl TempTarget {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("create temp target"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn join(&self, relative: &str) -> PathBuf {
        self.dir.path().join(relative)
    }

    pub fn write(&self, relative: &str, body: &str) -> PathBuf {
        let path = self.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent");
        }
        std::fs::write(&path, body).expect("write fixture");
        path
    }

    pub fn read(&self, relative: &str) -> String {
        std::fs::read_to_string(self.join(relative)).expect("read fixture")
    }

    pub fn exists(&self, relative: &str) -> bool {
        self.join(relative).exists()
    }

    /// Write every item's content at its target path
    pub fn install(&self, items: &[SourceItem]) {
        for item in items {
            if let Some(body) = &item.content {
                self.write(&item.target_path, body);
            }
        }
    }
}

impl Default for TempTarget {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixtures_agree() {
        let items = vec![agent("planner", "# Planner\n"), command("review", "review\n")];
        let registry = registry_for(&items);
        let snapshot = snapshot_for(&items);
        for item in &items {
            let entry = registry.find(&item.key()).unwrap();
            assert_eq!(snapshot.get(&item.target_path).unwrap().checksum, *entry.recorded_target());
        }
        assert_eq!(metadata_for("1.0.0", &items).files.len(), 2);
    }

    #[test]
    fn temp_target_writes_nested_paths() {
        let target = TempTarget::new();
        target.install(&[agent("planner", "body")]);
        assert_eq!(target.read("agents/planner.md"), "body");
        assert!(!target.exists("agents/other.md"));
    }
}
