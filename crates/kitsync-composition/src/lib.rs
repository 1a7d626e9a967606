//! kitsync Composition
//!
//! Merge engines used when a kit item lands on a target that already exists.
//!
//! # Core Concepts
//!
//! - [`SettingsMerger`]: structural merge of JSON settings (hooks, MCP servers)
//! - [`PathNormalizer`]: rewrites hook command placeholders for the install mode
//! - [`generate_hunks`] / [`apply_hunks`]: line hunks with per-hunk acceptance
//! - [`select_owned_hunks`]: restricts a text merge to kit-owned sections
//! - [`StrategyRegistry`]: picks the [`MergeKind`] for an item
//!
//! # Example
//!
//! ```rust,ignore
//! use kitsync_composition::{InstallMode, MergeOptions, SettingsMerger};
//!
//! let merger = SettingsMerger::new(MergeOptions::new(InstallMode::Local))?;
//! let outcome = merger.merge(&existing, &kit_fragment)?;
//! for conflict in &outcome.report.conflicts_detected {
//!     tracing::warn!(%conflict, "hook already present");
//! }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod content;
mod diff;
mod normalize;
mod registry;
mod sections;
mod settings;
mod strategy;

pub use content::{is_binary_file, load_file_content, ContentError, FileContent, BINARY_SNIFF_LEN};
pub use diff::{apply_hunks, generate_hunks, DiffError, FileDiff, Hunk, HunkLine, LineKind};
pub use normalize::{InstallMode, PathNormalizer, PathVariables};
pub use registry::{StrategyRegistry, SETTINGS_FILE};
pub use sections::{markdown_sections, section_key, select_owned_hunks, Section};
pub use settings::{
    hook_commands, mcp_server_names, HookCommand, HookEntry, HookGroup, HookSlot, MergeOptions,
    MergeOutcome, MergeReport, ServerConfig, SettingsError, SettingsMerger, WILDCARD_MATCHER,
};
pub use strategy::MergeKind;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
