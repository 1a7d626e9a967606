//! Merge strategies per item kind
//!
//! Each installed item is written with one [`MergeKind`]. The kind decides
//! which engine runs when the target already exists and whether a conflict
//! can be resolved with a smart merge.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// How an item is written onto an existing target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MergeKind {
    /// Whole-file replacement
    #[default]
    Replace,
    /// Line-hunk merge of a text file
    Text,
    /// Structural JSON settings merge
    Settings,
    /// Whole-tree replacement of a directory item
    Directory,
}

impl MergeKind {
    /// Check if a conflict on this kind can take a smart-merge resolution
    #[inline]
    #[must_use]
    pub fn supports_smart_merge(self) -> bool {
        matches!(self, Self::Text | Self::Settings)
    }

    /// Stable wire name
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Replace => "replace",
            Self::Text => "text",
            Self::Settings => "settings",
            Self::Directory => "directory",
        }
    }
}

impl Display for MergeKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
