//! Strategy registry
//!
//! Provides [`StrategyRegistry`] for choosing the [`MergeKind`] of an item
//! from its portable type and target path.

use crate::strategy::MergeKind;
use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;

/// Settings file name recognised regardless of item type
pub const SETTINGS_FILE: &str = "settings.json";

/// Maps item types and file extensions to merge kinds
#[derive(Debug, Clone)]
pub struct StrategyRegistry {
    by_type: HashMap<String, MergeKind>,
    by_extension: HashMap<String, MergeKind>,
    fallback: MergeKind,
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl StrategyRegistry {
    /// Create empty registry falling back to whole-file replacement
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            by_type: HashMap::new(),
            by_extension: HashMap::new(),
            fallback: MergeKind::Replace,
        }
    }

    /// Create registry with built-in mappings
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register_type("config", MergeKind::Settings);
        registry.register_type("settings", MergeKind::Settings);
        for ext in ["md", "mdc", "txt", "toml", "yaml", "yml"] {
            registry.register_extension(ext, MergeKind::Text);
        }
        registry
    }

    /// Built-in registry shared by every caller
    #[must_use]
    pub fn shared() -> &'static Self {
        static SHARED: OnceLock<StrategyRegistry> = OnceLock::new();
        SHARED.get_or_init(Self::with_defaults)
    }

    /// Map an item type
    pub fn register_type(&mut self, item_type: &str, kind: MergeKind) {
        self.by_type.insert(item_type.to_string(), kind);
    }

    /// Map a file extension (without the dot, case-insensitive)
    pub fn register_extension(&mut self, ext: &str, kind: MergeKind) {
        self.by_extension.insert(ext.to_ascii_lowercase(), kind);
    }

    /// Pick the merge kind for an item
    ///
    /// Directories always replace as a tree. Settings files are recognised
    /// by name so a hook fragment shipped as `settings.json` merges
    /// structurally.
    #[must_use]
    pub fn select(&self, item_type: &str, target_path: &str, is_dir: bool) -> MergeKind {
        if is_dir {
            return MergeKind::Directory;
        }
        let path = Path::new(target_path);
        if path.file_name().and_then(|n| n.to_str()) == Some(SETTINGS_FILE) {
            return MergeKind::Settings;
        }
        if let Some(kind) = self.by_type.get(item_type) {
            return *kind;
        }
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(|e| self.by_extension.get(&e.to_ascii_lowercase()))
            .copied()
            .unwrap_or(self.fallback)
    }
}
