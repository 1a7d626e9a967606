//! Core types for kitsync
//!
//! Defines the planning inputs:
//! - Source items offered by the kit
//! - The portable registry persisted between runs
//! - The pre-fetched snapshot of the target tree

use crate::error::RegistryError;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use kitsync_artifact::{check_relative, ContentHash};
use kitsync_composition::{HookEntry, MergeKind, PathNormalizer, StrategyRegistry};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Display, Formatter};
use std::path::PathBuf;

/// Kind of portable item
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PortableType {
    Agent,
    Command,
    Skill,
    Rules,
    Config,
    /// One hook command inside a settings document
    Hook,
    /// One MCP server inside a settings document
    McpServer,
}

impl PortableType {
    /// Stable wire name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Agent => "agent",
            Self::Command => "command",
            Self::Skill => "skill",
            Self::Rules => "rules",
            Self::Config => "config",
            Self::Hook => "hook",
            Self::McpServer => "mcp-server",
        }
    }

    /// Check if the item lives inside a shared settings document
    #[inline]
    #[must_use]
    pub fn is_settings_entry(self) -> bool {
        matches!(self, Self::Hook | Self::McpServer)
    }

    /// Check if the item is installed as a directory tree
    #[inline]
    #[must_use]
    pub fn is_directory_based(self) -> bool {
        matches!(self, Self::Skill)
    }
}

impl Display for PortableType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of an item across runs
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ItemKey {
    pub provider: String,
    pub item_type: PortableType,
    pub item: String,
    pub global: bool,
}

impl Display for ItemKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let scope = if self.global { "global" } else { "local" };
        write!(f, "{}/{}/{} ({scope})", self.provider, self.item_type, self.item)
    }
}

/// Item the kit offers for installation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceItem {
    pub item: String,
    #[serde(rename = "type")]
    pub item_type: PortableType,
    pub provider: String,
    #[serde(default)]
    pub global: bool,
    /// Destination relative to the target root
    pub target_path: String,
    /// File or directory digest of the source
    pub checksum: ContentHash,
    #[serde(default)]
    pub merge_kind: MergeKind,
    /// Where the executor copies from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_path: Option<PathBuf>,
    /// Text body, when the item is a text file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Markdown sections the kit owns in a shared file
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owned_sections: Vec<String>,
}

impl SourceItem {
    /// Create a local item; the merge kind comes from [`StrategyRegistry::shared`]
    #[must_use]
    pub fn new(
        item: impl Into<String>,
        item_type: PortableType,
        provider: impl Into<String>,
        target_path: impl Into<String>,
        checksum: ContentHash,
    ) -> Self {
        let target_path = target_path.into();
        let merge_kind =
            StrategyRegistry::shared().select(item_type.as_str(), &target_path, item_type.is_directory_based());
        Self {
            item: item.into(),
            item_type,
            provider: provider.into(),
            global: false,
            target_path,
            checksum,
            merge_kind,
            source_path: None,
            content: None,
            owned_sections: Vec::new(),
        }
    }

    /// Create a text item, digesting its body
    #[must_use]
    pub fn text(
        item: impl Into<String>,
        item_type: PortableType,
        provider: impl Into<String>,
        target_path: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let content = content.into();
        let checksum = ContentHash::compute(content.as_bytes());
        Self::new(item, item_type, provider, target_path, checksum).with_content(content)
    }

    #[inline]
    #[must_use]
    pub fn with_global(mut self, global: bool) -> Self {
        self.global = global;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_merge_kind(mut self, kind: MergeKind) -> Self {
        self.merge_kind = kind;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    #[inline]
    #[must_use]
    pub fn with_source_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.source_path = Some(path.into());
        self
    }

    #[inline]
    #[must_use]
    pub fn with_owned_sections(mut self, sections: Vec<String>) -> Self {
        self.owned_sections = sections;
        self
    }

    /// Identity used to match registry entries
    #[must_use]
    pub fn key(&self) -> ItemKey {
        ItemKey {
            provider: self.provider.clone(),
            item_type: self.item_type,
            item: self.item.clone(),
            global: self.global,
        }
    }

    /// Expand a settings fragment into one item per hook command and MCP server
    ///
    /// Each sub-item targets this item's settings file and carries a
    /// fragment holding only its own entry, so it can be merged on its own.
    /// Commands are normalized first so their identity matches what a target
    /// scan reports. A command registered under several events yields one
    /// item whose fragment lists every event it appears in.
    #[must_use]
    pub fn settings_sub_items(&self, document: &Value, normalizer: &PathNormalizer) -> Vec<Self> {
        let mut hooks: IndexMap<String, Map<String, Value>> = IndexMap::new();
        if let Some(Value::Object(events)) = document.get("hooks") {
            for (event, entries) in events {
                let Value::Array(entries) = entries else {
                    continue;
                };
                for raw in entries {
                    let Ok(entry) = serde_json::from_value::<HookEntry>(raw.clone()) else {
                        continue;
                    };
                    for (command, value) in hook_fragments(&entry, normalizer) {
                        let slots = hooks.entry(command).or_default();
                        if let Value::Array(list) = slots
                            .entry(event.clone())
                            .or_insert_with(|| Value::Array(Vec::new()))
                        {
                            list.push(value);
                        }
                    }
                }
            }
        }

        let mut items: Vec<Self> = hooks
            .into_iter()
            .map(|(command, events)| {
                self.sub_item(PortableType::Hook, command, &json!({"hooks": Value::Object(events)}))
            })
            .collect();

        if let Some(Value::Object(servers)) = document.get("mcp").and_then(|m| m.get("servers")) {
            for (name, config) in servers {
                let fragment = json!({"mcp": {"servers": {name.clone(): config.clone()}}});
                items.push(self.sub_item(PortableType::McpServer, name.clone(), &fragment));
            }
        }
        items
    }

    fn sub_item(&self, item_type: PortableType, item: String, fragment: &Value) -> Self {
        let body = fragment.to_string();
        Self {
            item,
            item_type,
            provider: self.provider.clone(),
            global: self.global,
            target_path: self.target_path.clone(),
            checksum: ContentHash::compute(body.as_bytes()),
            merge_kind: MergeKind::Settings,
            source_path: None,
            content: Some(body),
            owned_sections: Vec::new(),
        }
    }
}

/// One `(command, entry)` pair per well-formed command in `entry`
fn hook_fragments(entry: &HookEntry, normalizer: &PathNormalizer) -> Vec<(String, Value)> {
    match entry {
        HookEntry::Group(group) => group
            .hooks
            .iter()
            .filter_map(|slot| match slot {
                kitsync_composition::HookSlot::Command(command) => {
                    let mut single = group.clone();
                    let mut command = command.clone();
                    command.command = normalizer.normalize(&command.command);
                    single.hooks = vec![kitsync_composition::HookSlot::Command(command.clone())];
                    let value = serde_json::to_value(HookEntry::Group(single)).ok()?;
                    Some((command.command, value))
                }
                kitsync_composition::HookSlot::Malformed(_) => None,
            })
            .collect(),
        HookEntry::Single(command) => {
            let mut command = command.clone();
            command.command = normalizer.normalize(&command.command);
            serde_json::to_value(HookEntry::Single(command.clone()))
                .map(|value| vec![(command.command, value)])
                .unwrap_or_default()
        }
        HookEntry::Malformed(_) => Vec::new(),
    }
}

/// Last-known state of one installed item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortableRegistryEntry {
    pub item: String,
    #[serde(rename = "type")]
    pub item_type: PortableType,
    pub provider: String,
    #[serde(default)]
    pub global: bool,
    pub path: String,
    pub source_checksum: ContentHash,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_checksum: Option<ContentHash>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installed_at: Option<DateTime<Utc>>,
    /// Owned markdown sections at the time of the last write
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sections: Vec<String>,
}

impl PortableRegistryEntry {
    /// Create entry for a freshly written item
    #[must_use]
    pub fn new(
        item: impl Into<String>,
        item_type: PortableType,
        provider: impl Into<String>,
        path: impl Into<String>,
        source_checksum: ContentHash,
    ) -> Self {
        Self {
            item: item.into(),
            item_type,
            provider: provider.into(),
            global: false,
            path: path.into(),
            source_checksum,
            target_checksum: None,
            installed_at: None,
            sections: Vec::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn with_target_checksum(mut self, checksum: ContentHash) -> Self {
        self.target_checksum = Some(checksum);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_global(mut self, global: bool) -> Self {
        self.global = global;
        self
    }

    /// Digest the target had after the last write
    ///
    /// Entries written before target digests were recorded fall back to the
    /// source digest, which is what a whole-file copy produces.
    #[inline]
    #[must_use]
    pub fn recorded_target(&self) -> &ContentHash {
        self.target_checksum.as_ref().unwrap_or(&self.source_checksum)
    }

    #[must_use]
    pub fn key(&self) -> ItemKey {
        ItemKey {
            provider: self.provider.clone(),
            item_type: self.item_type,
            item: self.item.clone(),
            global: self.global,
        }
    }
}

/// Registry format written by this version
pub const REGISTRY_VERSION: &str = "1.0";

/// `portable-registry.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortableRegistry {
    pub version: String,
    /// Last manifest version whose evolution entries were applied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_manifest_version: Option<String>,
    #[serde(default)]
    pub entries: Vec<PortableRegistryEntry>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for PortableRegistry {
    fn default() -> Self {
        Self {
            version: REGISTRY_VERSION.to_string(),
            applied_manifest_version: None,
            entries: Vec::new(),
            extra: Map::new(),
        }
    }
}

impl PortableRegistry {
    /// Parse and validate
    ///
    /// # Errors
    /// Returns [`RegistryError`] for malformed JSON, an unknown format
    /// version, unsafe paths or duplicate keys
    pub fn from_json(json: &str) -> Result<Self, RegistryError> {
        let registry: Self = serde_json::from_str(json)?;
        registry.validate()?;
        Ok(registry)
    }

    /// Serialize to pretty JSON
    ///
    /// # Errors
    /// Returns error if serialization fails
    pub fn to_json(&self) -> Result<String, RegistryError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check format version, path safety and key uniqueness
    ///
    /// # Errors
    /// Returns the first violation found
    pub fn validate(&self) -> Result<(), RegistryError> {
        if self.version != REGISTRY_VERSION {
            return Err(RegistryError::UnsupportedVersion(self.version.clone()));
        }
        let mut seen = BTreeSet::new();
        for entry in &self.entries {
            check_relative(&entry.path).map_err(|source| RegistryError::UnsafePath {
                path: entry.path.clone(),
                source,
            })?;
            let key = entry.key();
            if !seen.insert(key.clone()) {
                return Err(RegistryError::DuplicateEntry(key.to_string()));
            }
        }
        Ok(())
    }

    /// Find entry by key
    #[must_use]
    pub fn find(&self, key: &ItemKey) -> Option<&PortableRegistryEntry> {
        self.entries.iter().find(|e| e.key() == *key)
    }

    /// Insert or replace the entry with the same key
    pub fn upsert(&mut self, entry: PortableRegistryEntry) {
        let key = entry.key();
        if let Some(existing) = self.entries.iter_mut().find(|e| e.key() == key) {
            *existing = entry;
        } else {
            self.entries.push(entry);
        }
    }

    /// Remove entry by key, returning it
    pub fn remove(&mut self, key: &ItemKey) -> Option<PortableRegistryEntry> {
        let index = self.entries.iter().position(|e| e.key() == *key)?;
        Some(self.entries.remove(index))
    }
}

/// Live state of one target path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetState {
    pub checksum: ContentHash,
    /// Text body, captured when small enough to diff
    pub content: Option<String>,
    pub is_dir: bool,
}

impl TargetState {
    /// State of a file
    #[must_use]
    pub fn file(checksum: ContentHash) -> Self {
        Self {
            checksum,
            content: None,
            is_dir: false,
        }
    }

    /// State of a text file, digesting its body
    #[must_use]
    pub fn text(content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            checksum: ContentHash::compute(content.as_bytes()),
            content: Some(content),
            is_dir: false,
        }
    }

    /// State of a directory tree
    #[must_use]
    pub fn directory(checksum: ContentHash) -> Self {
        Self {
            checksum,
            content: None,
            is_dir: true,
        }
    }
}

/// Pre-fetched view of the target tree
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetSnapshot {
    /// Present paths only; absence means the path does not exist
    pub files: BTreeMap<String, TargetState>,
    /// Normalized hook commands found in target settings documents
    pub hook_commands: BTreeSet<String>,
    /// MCP server names found in target settings documents
    pub mcp_servers: BTreeSet<String>,
}

impl TargetSnapshot {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a present path
    pub fn insert(&mut self, path: impl Into<String>, state: TargetState) {
        self.files.insert(path.into(), state);
    }

    /// Builder form of [`insert`](Self::insert)
    #[must_use]
    pub fn with(mut self, path: impl Into<String>, state: TargetState) -> Self {
        self.insert(path, state);
        self
    }

    #[inline]
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&TargetState> {
        self.files.get(path)
    }

    /// Check if a settings entry is present in the target
    #[must_use]
    pub fn has_settings_entry(&self, item_type: PortableType, name: &str) -> bool {
        match item_type {
            PortableType::Hook => self.hook_commands.contains(name),
            PortableType::McpServer => self.mcp_servers.contains(name),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kitsync_composition::{InstallMode, PathVariables};
    use pretty_assertions::assert_eq;

    #[test]
    fn registry_roundtrip_keeps_unknown_fields() {
        let digest = ContentHash::compute(b"a");
        let json = format!(
            r#"{{"version":"1.0","appliedManifestVersion":"1.5.0","entries":[
                {{"item":"planner","type":"agent","provider":"claude","path":"agents/planner.md","sourceChecksum":"{digest}"}}
            ],"owner":"me"}}"#
        );
        let registry = PortableRegistry::from_json(&json).unwrap();
        assert_eq!(registry.entries.len(), 1);
        assert_eq!(registry.applied_manifest_version.as_deref(), Some("1.5.0"));
        assert_eq!(registry.entries[0].recorded_target(), &digest);
        assert!(registry.to_json().unwrap().contains("\"owner\""));
    }

    #[test]
    fn registry_rejects_unknown_version_and_traversal() {
        let err = PortableRegistry::from_json(r#"{"version":"9","entries":[]}"#).unwrap_err();
        assert!(matches!(err, RegistryError::UnsupportedVersion(_)));

        let mut registry = PortableRegistry::default();
        registry.entries.push(PortableRegistryEntry::new(
            "x",
            PortableType::Agent,
            "claude",
            "../x.md",
            ContentHash::compute(b"x"),
        ));
        assert!(matches!(registry.validate(), Err(RegistryError::UnsafePath { .. })));
    }

    #[test]
    fn registry_upsert_by_key() {
        let mut registry = PortableRegistry::default();
        let entry = |digest: &[u8]| {
            PortableRegistryEntry::new("a", PortableType::Agent, "p", "a.md", ContentHash::compute(digest))
        };
        registry.upsert(entry(b"1"));
        registry.upsert(entry(b"2"));
        assert_eq!(registry.entries.len(), 1);
        assert_eq!(registry.entries[0].source_checksum, ContentHash::compute(b"2"));

        let key = registry.entries[0].key();
        assert!(registry.remove(&key).is_some());
        assert!(registry.find(&key).is_none());
    }

    #[test]
    fn settings_fragment_expands_into_sub_items() {
        let normalizer = PathNormalizer::new(InstallMode::Local, &PathVariables::default()).unwrap();
        let settings = SourceItem::new(
            "settings",
            PortableType::Config,
            "claude",
            ".claude/settings.json",
            ContentHash::compute(b"{}"),
        );
        let document = serde_json::json!({
            "hooks": {"SessionStart": [
                {"matcher": "startup", "hooks": [
                    {"type": "command", "command": "node .claude/hooks/a.cjs"},
                    {"type": "command", "command": "node .claude/hooks/b.cjs"}
                ]},
                {"command": null}
            ]},
            "mcp": {"servers": {"fs": {"command": "fs"}}}
        });

        let items = settings.settings_sub_items(&document, &normalizer);
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].item_type, PortableType::Hook);
        assert_eq!(items[0].item, "node \"$CLAUDE_PROJECT_DIR\"/.claude/hooks/a.cjs");
        assert_eq!(items[0].merge_kind, MergeKind::Settings);
        assert!(items[0].content.as_deref().unwrap().contains("startup"));
        assert_eq!(items[2].item_type, PortableType::McpServer);
        assert_eq!(items[2].item, "fs");
        assert_eq!(items[2].target_path, ".claude/settings.json");
    }

    #[test]
    fn merge_kind_follows_type_and_path() {
        let digest = ContentHash::compute(b"x");
        let kind = |item_type, path: &str| SourceItem::new("x", item_type, "claude", path, digest).merge_kind;
        assert_eq!(kind(PortableType::Agent, "agents/x.md"), MergeKind::Text);
        assert_eq!(kind(PortableType::Skill, "skills/x"), MergeKind::Directory);
        assert_eq!(kind(PortableType::Hook, ".claude/settings.json"), MergeKind::Settings);
        assert_eq!(kind(PortableType::Command, "hooks/run.cjs"), MergeKind::Replace);
        assert_eq!(
            SourceItem::text("x", PortableType::Agent, "claude", "agents/x.md", "body").merge_kind,
            MergeKind::Text
        );
    }

    #[test]
    fn command_shared_by_events_is_one_sub_item() {
        let normalizer = PathNormalizer::new(InstallMode::Local, &PathVariables::default()).unwrap();
        let settings = SourceItem::new(
            "settings",
            PortableType::Config,
            "claude",
            ".claude/settings.json",
            ContentHash::compute(b"{}"),
        );
        let notify = serde_json::json!([{"hooks": [{"type": "command", "command": "node .claude/hooks/notify.cjs"}]}]);
        let document = serde_json::json!({"hooks": {"Stop": notify.clone(), "SubagentStop": notify}});

        let items = settings.settings_sub_items(&document, &normalizer);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].item, "node \"$CLAUDE_PROJECT_DIR\"/.claude/hooks/notify.cjs");
        let fragment: Value = serde_json::from_str(items[0].content.as_deref().unwrap()).unwrap();
        assert_eq!(fragment["hooks"]["Stop"].as_array().unwrap().len(), 1);
        assert_eq!(fragment["hooks"]["SubagentStop"].as_array().unwrap().len(), 1);
    }
}
