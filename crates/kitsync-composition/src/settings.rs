//! Structural merge of JSON settings documents
//!
//! Merges a kit-provided settings fragment into the user's settings file:
//! hook groups are merged per event and matcher with command-level
//! deduplication, MCP servers are added but never overwritten, and every key
//! the merger does not understand is carried through verbatim.
//!
//! Hook payloads are decoded into a closed set of variants at the boundary
//! ([`HookEntry`], [`HookSlot`], [`ServerConfig`]). Entries that fit none of
//! the well-formed shapes are kept as [`HookEntry::Malformed`] so array
//! length and order survive the merge.

use crate::normalize::{InstallMode, PathNormalizer, PathVariables};
use kitsync_artifact::InstalledSettings;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// Matcher that older kits used for "every tool"
pub const WILDCARD_MATCHER: &str = "*";

/// One hook command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookCommand {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Number>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl HookCommand {
    /// Create a `command`-type hook
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            kind: Some("command".to_string()),
            command: command.into(),
            timeout: None,
            extra: Map::new(),
        }
    }

    /// Copy fields that only `source` carries
    fn sync_missing_from(&mut self, source: &Self) {
        if self.timeout.is_none() {
            self.timeout.clone_from(&source.timeout);
        }
        if self.kind.is_none() {
            self.kind.clone_from(&source.kind);
        }
        for (key, value) in &source.extra {
            if !self.extra.contains_key(key) {
                self.extra.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Element of a matcher group's `hooks` array
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HookSlot {
    Command(HookCommand),
    /// Missing or non-string `command`; carried through untouched
    Malformed(Value),
}

impl HookSlot {
    fn command(&self) -> Option<&str> {
        match self {
            Self::Command(c) => Some(&c.command),
            Self::Malformed(_) => None,
        }
    }
}

/// `{ matcher?, hooks: [...] }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookGroup {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matcher: Option<String>,
    pub hooks: Vec<HookSlot>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl HookGroup {
    fn commands(&self) -> impl Iterator<Item = &str> {
        self.hooks.iter().filter_map(HookSlot::command)
    }

    fn has_command(&self, command: &str) -> bool {
        self.commands().any(|c| c == command)
    }

    fn command_mut(&mut self, command: &str) -> Option<&mut HookCommand> {
        self.hooks.iter_mut().find_map(|slot| match slot {
            HookSlot::Command(c) if c.command == command => Some(c),
            _ => None,
        })
    }

    fn is_wildcard(&self) -> bool {
        self.matcher.as_deref() == Some(WILDCARD_MATCHER)
    }
}

/// Entry in an event's hook array
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HookEntry {
    /// Matcher group
    Group(HookGroup),
    /// Flat `{ command, ... }` entry
    Single(HookCommand),
    /// Anything else; kept verbatim
    Malformed(Value),
}

impl HookEntry {
    fn commands(&self) -> Vec<&str> {
        match self {
            Self::Group(g) => g.commands().collect(),
            Self::Single(c) => vec![c.command.as_str()],
            Self::Malformed(_) => Vec::new(),
        }
    }

    fn normalize(&mut self, normalizer: &PathNormalizer) {
        match self {
            Self::Group(g) => {
                for slot in &mut g.hooks {
                    if let HookSlot::Command(c) = slot {
                        c.command = normalizer.normalize(&c.command);
                    }
                }
            }
            Self::Single(c) => c.command = normalizer.normalize(&c.command),
            Self::Malformed(_) => {}
        }
    }
}

/// MCP server definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerConfig {
    /// Local process speaking stdio
    Stdio {
        command: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<String>,
        #[serde(flatten)]
        extra: Map<String, Value>,
    },
    /// Remote endpoint
    Remote {
        url: String,
        #[serde(flatten)]
        extra: Map<String, Value>,
    },
    /// Shape this version does not know
    Opaque(Value),
}

impl ServerConfig {
    /// Transport label for reporting
    #[must_use]
    pub fn transport(&self) -> &'static str {
        match self {
            Self::Stdio { .. } => "stdio",
            Self::Remote { .. } => "remote",
            Self::Opaque(_) => "unknown",
        }
    }
}

/// Merge configuration
#[derive(Debug, Clone, Default)]
pub struct MergeOptions {
    pub mode: InstallMode,
    pub variables: PathVariables,
    /// Entries granted by earlier runs; enables respect-deletions mode
    pub installed: Option<InstalledSettings>,
}

impl MergeOptions {
    /// Options for an install mode with default placeholders
    #[inline]
    #[must_use]
    pub fn new(mode: InstallMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    /// Enable respect-deletions against a baseline
    #[inline]
    #[must_use]
    pub fn with_installed(mut self, installed: InstalledSettings) -> Self {
        self.installed = Some(installed);
        self
    }

    /// Override placeholder spellings
    #[inline]
    #[must_use]
    pub fn with_variables(mut self, variables: PathVariables) -> Self {
        self.variables = variables;
        self
    }
}

/// Machine-readable merge counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeReport {
    pub hooks_preserved: usize,
    pub hooks_added: usize,
    pub hooks_skipped: usize,
    pub mcp_servers_preserved: usize,
    pub mcp_servers_added: usize,
    pub mcp_servers_skipped: usize,
    pub conflicts_detected: Vec<String>,
    pub newly_installed_hooks: Vec<String>,
    pub newly_installed_servers: Vec<String>,
}

/// Merged document plus counts
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub merged: Value,
    pub report: MergeReport,
}

/// Structural settings merger
#[derive(Debug, Clone)]
pub struct SettingsMerger {
    options: MergeOptions,
    normalizer: PathNormalizer,
}

impl SettingsMerger {
    /// Create merger
    ///
    /// # Errors
    /// Returns error if the configured placeholders cannot be compiled
    pub fn new(options: MergeOptions) -> Result<Self, SettingsError> {
        let normalizer = PathNormalizer::new(options.mode, &options.variables)
            .map_err(|e| SettingsError::Placeholder(e.to_string()))?;
        Ok(Self {
            options,
            normalizer,
        })
    }

    /// Normalizer in use
    #[inline]
    #[must_use]
    pub fn normalizer(&self) -> &PathNormalizer {
        &self.normalizer
    }

    /// Merge `source` into `destination`
    ///
    /// `destination` may be `null` (no settings file yet).
    ///
    /// # Errors
    /// Returns [`SettingsError::InvalidShape`] when either document, its
    /// `hooks` map, an event array or the `mcp` section has the wrong JSON type
    pub fn merge(&self, destination: &Value, source: &Value) -> Result<MergeOutcome, SettingsError> {
        let mut merged = match destination {
            Value::Null => Map::new(),
            Value::Object(map) => map.clone(),
            _ => return Err(SettingsError::shape("$", "destination must be an object")),
        };
        let Value::Object(source) = source else {
            return Err(SettingsError::shape("$", "source must be an object"));
        };

        let mut report = MergeReport::default();
        let baseline = self.normalized_baseline();

        let mut dest_hooks = self.decode_hooks(merged.get("hooks"), "destination")?;
        let src_hooks = self.decode_hooks(source.get("hooks"), "source")?;
        if !src_hooks.is_empty() || merged.contains_key("hooks") {
            let existing: BTreeSet<String> = dest_hooks
                .iter()
                .flat_map(|(_, entries)| entries.iter().flat_map(HookEntry::commands))
                .map(str::to_string)
                .collect();
            report.hooks_preserved = dest_hooks
                .iter()
                .map(|(_, entries)| entries.iter().map(|e| e.commands().len()).sum::<usize>())
                .sum();

            let mut ctx = EventMerge {
                baseline: baseline.as_ref(),
                existing: &existing,
                report: &mut report,
            };
            for (event, entries) in src_hooks {
                let slot = match dest_hooks.iter().position(|(name, _)| *name == event) {
                    Some(i) => &mut dest_hooks[i].1,
                    None => {
                        dest_hooks.push((event.clone(), Vec::new()));
                        let last = dest_hooks.len() - 1;
                        &mut dest_hooks[last].1
                    }
                };
                ctx.merge_event(&event, slot, entries);
            }
            merged.insert("hooks".to_string(), encode_hooks(dest_hooks)?);
        }

        self.merge_mcp(&mut merged, source, baseline.as_ref(), &mut report)?;

        for (key, value) in source {
            if key == "hooks" || key == "mcp" {
                continue;
            }
            if !merged.contains_key(key) {
                merged.insert(key.clone(), value.clone());
            }
        }

        debug!(
            hooks_added = report.hooks_added,
            hooks_skipped = report.hooks_skipped,
            servers_added = report.mcp_servers_added,
            conflicts = report.conflicts_detected.len(),
            "settings merged"
        );
        Ok(MergeOutcome {
            merged: Value::Object(merged),
            report,
        })
    }

    fn normalized_baseline(&self) -> Option<InstalledSettings> {
        self.options.installed.as_ref().map(|b| InstalledSettings {
            hooks: b.hooks.iter().map(|h| self.normalizer.normalize(h)).collect(),
            mcp_servers: b.mcp_servers.clone(),
        })
    }

    fn decode_hooks(
        &self,
        hooks: Option<&Value>,
        side: &str,
    ) -> Result<Vec<(String, Vec<HookEntry>)>, SettingsError> {
        let map = match hooks {
            None | Some(Value::Null) => return Ok(Vec::new()),
            Some(Value::Object(map)) => map,
            Some(_) => {
                return Err(SettingsError::shape(
                    format!("{side}.hooks"),
                    "expected an object keyed by event name",
                ))
            }
        };
        let mut events = Vec::with_capacity(map.len());
        for (event, value) in map {
            let Value::Array(items) = value else {
                return Err(SettingsError::shape(
                    format!("{side}.hooks.{event}"),
                    "expected an array of hook entries",
                ));
            };
            let mut entries = Vec::with_capacity(items.len());
            for item in items {
                let mut entry: HookEntry = serde_json::from_value(item.clone())
                    .unwrap_or_else(|_| HookEntry::Malformed(item.clone()));
                if matches!(entry, HookEntry::Malformed(_)) {
                    warn!(event = %event, side, "carrying malformed hook entry through unchanged");
                }
                entry.normalize(&self.normalizer);
                entries.push(entry);
            }
            events.push((event.clone(), entries));
        }
        Ok(events)
    }

    fn merge_mcp(
        &self,
        merged: &mut Map<String, Value>,
        source: &Map<String, Value>,
        baseline: Option<&InstalledSettings>,
        report: &mut MergeReport,
    ) -> Result<(), SettingsError> {
        let src_mcp = match source.get("mcp") {
            None | Some(Value::Null) => return Ok(()),
            Some(Value::Object(map)) => map,
            Some(_) => return Err(SettingsError::shape("source.mcp", "expected an object")),
        };
        let mut dest_mcp = match merged.get("mcp") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map.clone(),
            Some(_) => {
                return Err(SettingsError::shape("destination.mcp", "expected an object"))
            }
        };

        let src_servers = servers_of(src_mcp, "source")?;
        let mut dest_servers = servers_of(&dest_mcp, "destination")?;

        for (name, value) in src_servers {
            if dest_servers.contains_key(&name) {
                report.mcp_servers_preserved += 1;
                continue;
            }
            if baseline.is_some_and(|b| b.has_server(&name)) {
                info!(server = %name, "mcp server removed by user; not re-adding");
                report.mcp_servers_skipped += 1;
                continue;
            }
            let config: ServerConfig = serde_json::from_value(value.clone())
                .unwrap_or_else(|_| ServerConfig::Opaque(value.clone()));
            debug!(server = %name, transport = config.transport(), "adding mcp server");
            report.newly_installed_servers.push(name.clone());
            report.mcp_servers_added += 1;
            dest_servers.insert(name, value);
        }
        dest_mcp.insert("servers".to_string(), Value::Object(dest_servers));

        for (key, value) in src_mcp {
            if key != "servers" && !dest_mcp.contains_key(key) {
                dest_mcp.insert(key.clone(), value.clone());
            }
        }
        merged.insert("mcp".to_string(), Value::Object(dest_mcp));
        Ok(())
    }
}

fn servers_of(
    mcp: &Map<String, Value>,
    side: &str,
) -> Result<Map<String, Value>, SettingsError> {
    match mcp.get("servers") {
        None | Some(Value::Null) => Ok(Map::new()),
        Some(Value::Object(map)) => Ok(map.clone()),
        Some(_) => Err(SettingsError::shape(
            format!("{side}.mcp.servers"),
            "expected an object keyed by server name",
        )),
    }
}

fn encode_hooks(events: Vec<(String, Vec<HookEntry>)>) -> Result<Value, SettingsError> {
    let mut map = Map::new();
    for (event, entries) in events {
        map.insert(event, serde_json::to_value(entries)?);
    }
    Ok(Value::Object(map))
}

/// Per-call merge state shared across events
struct EventMerge<'a> {
    baseline: Option<&'a InstalledSettings>,
    existing: &'a BTreeSet<String>,
    report: &'a mut MergeReport,
}

impl EventMerge<'_> {
    /// Previously granted, no longer present: the user removed it
    fn deleted_by_user(&self, command: &str) -> bool {
        self.baseline.is_some_and(|b| b.has_hook(command)) && !self.existing.contains(command)
    }

    fn record_added(&mut self, command: &str) {
        self.report.hooks_added += 1;
        let known = self.baseline.is_some_and(|b| b.has_hook(command));
        if !known && !self.report.newly_installed_hooks.iter().any(|h| h == command) {
            self.report.newly_installed_hooks.push(command.to_string());
        }
    }

    fn skip_deleted(&mut self, event: &str, command: &str) {
        info!(event, command, "hook removed by user; not re-adding");
        self.report.hooks_skipped += 1;
    }

    fn merge_event(&mut self, event: &str, dest: &mut Vec<HookEntry>, source: Vec<HookEntry>) {
        for entry in source {
            match entry {
                HookEntry::Group(group) => self.merge_group(event, dest, group),
                HookEntry::Single(command) => self.merge_single(event, dest, command),
                HookEntry::Malformed(value) => {
                    let entry = HookEntry::Malformed(value);
                    if !dest.contains(&entry) {
                        dest.push(entry);
                    }
                }
            }
        }
    }

    fn merge_single(&mut self, event: &str, dest: &mut Vec<HookEntry>, command: HookCommand) {
        let present = dest
            .iter()
            .any(|e| e.commands().iter().any(|c| *c == command.command));
        if present {
            self.report
                .conflicts_detected
                .push(format!("{event}: duplicate hook command already present: {}", command.command));
            return;
        }
        if self.deleted_by_user(&command.command) {
            self.skip_deleted(event, &command.command);
            return;
        }
        self.record_added(&command.command);
        dest.push(HookEntry::Single(command));
    }

    fn merge_group(&mut self, event: &str, dest: &mut Vec<HookEntry>, group: HookGroup) {
        let mut target = dest.iter().position(|e| match e {
            HookEntry::Group(g) => g.matcher == group.matcher,
            _ => false,
        });

        let mut migrated = false;
        let narrower = group
            .matcher
            .as_deref()
            .is_some_and(|m| !m.is_empty() && m != WILDCARD_MATCHER);
        if target.is_none() && narrower {
            target = dest.iter().position(|e| match e {
                HookEntry::Group(g) => {
                    g.is_wildcard() && group.commands().any(|c| g.has_command(c))
                }
                _ => false,
            });
            if let Some(i) = target {
                if let HookEntry::Group(g) = &mut dest[i] {
                    info!(
                        event,
                        matcher = group.matcher.as_deref().unwrap_or_default(),
                        "migrating wildcard hook matcher"
                    );
                    g.matcher.clone_from(&group.matcher);
                    migrated = true;
                }
            }
        }

        let Some(i) = target else {
            self.append_group(event, dest, group);
            return;
        };
        let HookEntry::Group(existing) = &mut dest[i] else {
            return;
        };

        let mut duplicates = 0usize;
        for slot in group.hooks {
            match slot {
                HookSlot::Command(command) => {
                    if let Some(current) = existing.command_mut(&command.command) {
                        if migrated {
                            current.sync_missing_from(&command);
                        } else {
                            duplicates += 1;
                        }
                    } else if self.deleted_by_user(&command.command) {
                        self.skip_deleted(event, &command.command);
                    } else {
                        self.record_added(&command.command);
                        existing.hooks.push(HookSlot::Command(command));
                    }
                }
                HookSlot::Malformed(value) => {
                    let slot = HookSlot::Malformed(value);
                    if !existing.hooks.contains(&slot) {
                        existing.hooks.push(slot);
                    }
                }
            }
        }

        if duplicates > 0 {
            let matcher = existing.matcher.as_deref().unwrap_or("(none)");
            self.report.conflicts_detected.push(format!(
                "{event}: {duplicates} duplicate hook command(s) already present for matcher '{matcher}'"
            ));
        }
    }

    fn append_group(&mut self, event: &str, dest: &mut Vec<HookEntry>, mut group: HookGroup) {
        let mut kept = Vec::with_capacity(group.hooks.len());
        let mut commands = Vec::new();
        for slot in group.hooks {
            if let HookSlot::Command(c) = &slot {
                if self.deleted_by_user(&c.command) {
                    self.skip_deleted(event, &c.command);
                    continue;
                }
                commands.push(c.command.clone());
            }
            kept.push(slot);
        }
        if kept.is_empty() {
            return;
        }
        group.hooks = kept;
        self.report.hooks_added += 1;
        for command in &commands {
            let known = self.baseline.is_some_and(|b| b.has_hook(command));
            if !known && !self.report.newly_installed_hooks.contains(command) {
                self.report.newly_installed_hooks.push(command.clone());
            }
        }
        dest.push(HookEntry::Group(group));
    }
}

/// Hook commands found in a settings document, normalized
///
/// Used by target scans to learn which kit hooks are still present.
#[must_use]
pub fn hook_commands(document: &Value, normalizer: &PathNormalizer) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    let Some(Value::Object(events)) = document.get("hooks") else {
        return out;
    };
    for entries in events.values() {
        let Value::Array(entries) = entries else {
            continue;
        };
        for item in entries {
            if let Ok(entry) = serde_json::from_value::<HookEntry>(item.clone()) {
                out.extend(entry.commands().into_iter().map(|c| normalizer.normalize(c)));
            }
        }
    }
    out
}

/// MCP server names found in a settings document
#[must_use]
pub fn mcp_server_names(document: &Value) -> BTreeSet<String> {
    document
        .get("mcp")
        .and_then(|m| m.get("servers"))
        .and_then(Value::as_object)
        .map(|servers| servers.keys().cloned().collect())
        .unwrap_or_default()
}

/// Errors from the settings merger
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// Document section has the wrong JSON type
    #[error("invalid settings shape at {location}: {message}")]
    InvalidShape { location: String, message: String },

    /// Placeholder could not be compiled into a pattern
    #[error("invalid path placeholder: {0}")]
    Placeholder(String),

    /// Re-encoding failed
    #[error("settings serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

impl SettingsError {
    fn shape(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidShape {
            location: location.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn merger() -> SettingsMerger {
        SettingsMerger::new(MergeOptions::new(InstallMode::Local)).unwrap()
    }

    #[test]
    fn session_start_into_empty_destination() {
        let source = json!({"hooks": {"SessionStart": [{"command": "node .claude/hooks/a.cjs"}]}});
        let outcome = merger().merge(&json!({}), &source).unwrap();

        assert_eq!(outcome.merged["hooks"]["SessionStart"].as_array().unwrap().len(), 1);
        assert_eq!(outcome.report.hooks_added, 1);
        assert!(outcome.report.conflicts_detected.is_empty());
    }

    #[test]
    fn null_destination_is_empty() {
        let source = json!({"hooks": {"Stop": [{"hooks": [{"type": "command", "command": "x"}]}]}});
        let outcome = merger().merge(&Value::Null, &source).unwrap();
        assert_eq!(outcome.report.hooks_added, 1);
    }

    #[test]
    fn duplicate_command_is_kept_once_with_one_conflict() {
        let dest = json!({"hooks": {"PreToolUse": [
            {"matcher": "Bash", "hooks": [{"type": "command", "command": "X"}]}
        ]}});
        let source = json!({"hooks": {"PreToolUse": [
            {"matcher": "Bash", "hooks": [{"type": "command", "command": "X"}]}
        ]}});
        let outcome = merger().merge(&dest, &source).unwrap();

        let merged = outcome.merged["hooks"]["PreToolUse"].to_string();
        assert_eq!(merged.matches("\"X\"").count(), 1);
        assert_eq!(outcome.report.conflicts_detected.len(), 1);
        assert_eq!(outcome.report.hooks_added, 0);
    }

    #[test]
    fn duplicates_group_into_one_message_per_matcher() {
        let dest = json!({"hooks": {"PreToolUse": [
            {"matcher": "Bash", "hooks": [
                {"type": "command", "command": "A"},
                {"type": "command", "command": "B"}
            ]}
        ]}});
        let source = dest.clone();
        let outcome = merger().merge(&dest, &source).unwrap();
        assert_eq!(outcome.report.conflicts_detected.len(), 1);
        assert!(outcome.report.conflicts_detected[0].contains("2 duplicate"));
    }

    #[test]
    fn placeholder_spellings_deduplicate() {
        let dest = json!({"hooks": {"SessionStart": [
            {"hooks": [{"type": "command", "command": "node \"$CLAUDE_PROJECT_DIR\"/.claude/hooks/a.cjs"}]}
        ]}});
        let source = json!({"hooks": {"SessionStart": [
            {"hooks": [{"type": "command", "command": "node .claude/hooks/a.cjs"}]}
        ]}});
        let outcome = merger().merge(&dest, &source).unwrap();
        let hooks = outcome.merged["hooks"]["SessionStart"][0]["hooks"].as_array().unwrap();
        assert_eq!(hooks.len(), 1);
        assert_eq!(outcome.report.conflicts_detected.len(), 1);
    }

    #[test]
    fn new_command_is_appended_after_user_commands() {
        let dest = json!({"hooks": {"PostToolUse": [
            {"matcher": "Edit", "hooks": [{"type": "command", "command": "user-fmt"}]}
        ]}});
        let source = json!({"hooks": {"PostToolUse": [
            {"matcher": "Edit", "hooks": [{"type": "command", "command": "kit-lint"}]}
        ]}});
        let outcome = merger().merge(&dest, &source).unwrap();
        let hooks = &outcome.merged["hooks"]["PostToolUse"][0]["hooks"];
        assert_eq!(hooks[0]["command"], "user-fmt");
        assert_eq!(hooks[1]["command"], "kit-lint");
        assert_eq!(outcome.report.hooks_added, 1);
        assert_eq!(outcome.report.hooks_preserved, 1);
    }

    #[test]
    fn wildcard_matcher_is_narrowed_and_timeout_synced() {
        let dest = json!({"hooks": {"PostToolUse": [
            {"matcher": "*", "hooks": [{"type": "command", "command": "C"}]}
        ]}});
        let source = json!({"hooks": {"PostToolUse": [
            {"matcher": "Bash|Edit", "hooks": [{"type": "command", "command": "C", "timeout": 10}]}
        ]}});
        let outcome = merger().merge(&dest, &source).unwrap();

        let entries = outcome.merged["hooks"]["PostToolUse"].as_array().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["matcher"], "Bash|Edit");
        assert_eq!(entries[0]["hooks"][0]["timeout"], 10);
        assert!(outcome.report.conflicts_detected.is_empty());
    }

    #[test]
    fn wildcard_without_overlap_is_untouched() {
        let dest = json!({"hooks": {"PostToolUse": [
            {"matcher": "*", "hooks": [{"type": "command", "command": "mine"}]}
        ]}});
        let source = json!({"hooks": {"PostToolUse": [
            {"matcher": "Bash", "hooks": [{"type": "command", "command": "kit"}]}
        ]}});
        let outcome = merger().merge(&dest, &source).unwrap();
        let entries = outcome.merged["hooks"]["PostToolUse"].as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["matcher"], "*");
        assert_eq!(entries[1]["matcher"], "Bash");
    }

    #[test]
    fn user_timeout_wins_during_migration() {
        let dest = json!({"hooks": {"PostToolUse": [
            {"matcher": "*", "hooks": [{"type": "command", "command": "C", "timeout": 3}]}
        ]}});
        let source = json!({"hooks": {"PostToolUse": [
            {"matcher": "Bash", "hooks": [{"type": "command", "command": "C", "timeout": 10}]}
        ]}});
        let outcome = merger().merge(&dest, &source).unwrap();
        assert_eq!(outcome.merged["hooks"]["PostToolUse"][0]["hooks"][0]["timeout"], 3);
    }

    #[test]
    fn mcp_servers_never_overwritten() {
        let dest = json!({"mcp": {"servers": {"fs": {"command": "user-fs"}, "mine": {"url": "http://x"}}}});
        let source = json!({"mcp": {"servers": {"fs": {"command": "kit-fs"}, "search": {"command": "kit-search"}}}});
        let outcome = merger().merge(&dest, &source).unwrap();

        let servers = &outcome.merged["mcp"]["servers"];
        assert_eq!(servers["fs"]["command"], "user-fs");
        assert_eq!(servers["search"]["command"], "kit-search");
        assert_eq!(servers["mine"]["url"], "http://x");
        assert_eq!(outcome.report.mcp_servers_preserved, 1);
        assert_eq!(outcome.report.newly_installed_servers, vec!["search"]);
    }

    #[test]
    fn respect_deletions_skips_removed_entries() {
        let baseline = InstalledSettings {
            hooks: vec!["node .claude/hooks/old.cjs".into()],
            mcp_servers: vec!["gone".into()],
        };
        let merger = SettingsMerger::new(
            MergeOptions::new(InstallMode::Local).with_installed(baseline),
        )
        .unwrap();
        let source = json!({
            "hooks": {"SessionStart": [
                {"hooks": [{"type": "command", "command": "node .claude/hooks/old.cjs"}]},
                {"matcher": "x", "hooks": [{"type": "command", "command": "node .claude/hooks/new.cjs"}]}
            ]},
            "mcp": {"servers": {"gone": {"command": "g"}, "fresh": {"command": "f"}}}
        });
        let outcome = merger.merge(&json!({}), &source).unwrap();

        assert_eq!(outcome.report.hooks_skipped, 1);
        assert_eq!(outcome.report.hooks_added, 1);
        assert_eq!(outcome.report.mcp_servers_skipped, 1);
        assert_eq!(
            outcome.report.newly_installed_hooks,
            vec!["node \"$CLAUDE_PROJECT_DIR\"/.claude/hooks/new.cjs"]
        );
        assert_eq!(outcome.report.newly_installed_servers, vec!["fresh"]);
        assert!(outcome.merged["mcp"]["servers"].get("gone").is_none());
    }

    #[test]
    fn malformed_entries_are_carried_through() {
        let dest = json!({"hooks": {"Stop": [
            {"matcher": "a", "hooks": [{"type": "command", "command": null}, {"type": "command", "command": "ok"}]},
            {"weird": true}
        ]}});
        let source = json!({"hooks": {"Stop": [{"hooks": [{"type": "command"}]}]}});
        let outcome = merger().merge(&dest, &source).unwrap();

        let entries = outcome.merged["hooks"]["Stop"].as_array().unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0]["hooks"].as_array().unwrap().len(), 2);
        assert_eq!(entries[0]["hooks"][0]["command"], Value::Null);
        assert_eq!(entries[1], json!({"weird": true}));
    }

    #[test]
    fn unknown_top_level_keys_are_preserved() {
        let dest = json!({"theme": "dark", "permissions": {"allow": ["Read"]}});
        let source = json!({"theme": "light", "statusLine": {"type": "command"}});
        let outcome = merger().merge(&dest, &source).unwrap();
        assert_eq!(outcome.merged["theme"], "dark");
        assert_eq!(outcome.merged["permissions"]["allow"][0], "Read");
        assert_eq!(outcome.merged["statusLine"]["type"], "command");
    }

    #[test]
    fn wrong_shapes_are_rejected() {
        let err = merger().merge(&json!({"hooks": []}), &json!({})).unwrap_err();
        assert!(matches!(err, SettingsError::InvalidShape { .. }));
        let err = merger().merge(&json!([]), &json!({})).unwrap_err();
        assert!(matches!(err, SettingsError::InvalidShape { .. }));
    }

    #[test]
    fn hook_commands_are_collected_normalized() {
        let doc = json!({"hooks": {"Stop": [{"hooks": [{"type": "command", "command": "node .claude/hooks/s.cjs"}]}]}});
        let commands = hook_commands(&doc, merger().normalizer());
        assert!(commands.contains("node \"$CLAUDE_PROJECT_DIR\"/.claude/hooks/s.cjs"));
    }
}
