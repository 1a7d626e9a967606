//! Portable manifest and version-gated evolution
//!
//! The manifest records renames and path migrations across kit releases. An
//! entry applies to an install when its `since` version lies in
//! `(applied, current]`: released after the last applied manifest and no
//! later than the kit being installed.
//!
//! Version strings are parsed leniently (`v2`, `2.1`) and anything that
//! still fails to parse is dropped with a diagnostic, never applied.

use crate::error::ManifestError;
use crate::types::PortableType;
use semver::Version;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

/// Manifest format understood by this version
pub const MANIFEST_VERSION: &str = "1.0";

/// Item rename
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameEntry {
    /// Old item name or target path
    pub from: String,
    /// New item name or target path
    pub to: String,
    pub since: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub item_type: Option<PortableType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

/// Move of a provider's directory layout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathMigration {
    pub provider: String,
    #[serde(rename = "type")]
    pub item_type: PortableType,
    /// Old path prefix
    pub from: String,
    /// New path prefix
    pub to: String,
    pub since: String,
}

/// Rename of a kit-owned markdown section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionRename {
    #[serde(rename = "type")]
    pub item_type: PortableType,
    pub from: String,
    pub to: String,
    pub since: String,
}

/// Entry gated on a release version
pub trait Versioned {
    fn since(&self) -> &str;
}

impl Versioned for RenameEntry {
    fn since(&self) -> &str {
        &self.since
    }
}

impl Versioned for PathMigration {
    fn since(&self) -> &str {
        &self.since
    }
}

impl Versioned for SectionRename {
    fn since(&self) -> &str {
        &self.since
    }
}

/// `portable-manifest.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortableManifest {
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cli_version: Option<String>,
    #[serde(default)]
    pub renames: Vec<RenameEntry>,
    #[serde(default)]
    pub provider_path_migrations: Vec<PathMigration>,
    #[serde(default)]
    pub section_renames: Vec<SectionRename>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for PortableManifest {
    fn default() -> Self {
        Self {
            version: MANIFEST_VERSION.to_string(),
            cli_version: None,
            renames: Vec::new(),
            provider_path_migrations: Vec::new(),
            section_renames: Vec::new(),
            extra: Map::new(),
        }
    }
}

impl PortableManifest {
    /// Parse and check the format version
    ///
    /// # Errors
    /// Returns [`ManifestError`] for malformed JSON or an unsupported version
    pub fn from_json(json: &str) -> Result<Self, ManifestError> {
        let manifest: Self = serde_json::from_str(json)?;
        if manifest.version != MANIFEST_VERSION {
            return Err(ManifestError::UnsupportedVersion(manifest.version));
        }
        Ok(manifest)
    }

    /// Serialize to pretty JSON
    ///
    /// # Errors
    /// Returns error if serialization fails
    pub fn to_json(&self) -> Result<String, ManifestError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Parse a version, accepting a leading `v` and missing minor/patch parts
#[must_use]
pub fn parse_version(raw: &str) -> Option<Version> {
    let trimmed = raw.trim();
    let trimmed = trimmed
        .strip_prefix('v')
        .or_else(|| trimmed.strip_prefix('V'))
        .unwrap_or(trimmed);
    if let Ok(version) = Version::parse(trimmed) {
        return Some(version);
    }
    // pad `2` and `2.1`, keeping any pre-release or build suffix
    let split = trimmed.find(['-', '+']).unwrap_or(trimmed.len());
    let (core, suffix) = trimmed.split_at(split);
    let parts: Vec<&str> = core.split('.').collect();
    if parts.is_empty() || parts.len() > 2 || parts.iter().any(|p| p.is_empty()) {
        return None;
    }
    let padded = match parts.len() {
        1 => format!("{core}.0.0{suffix}"),
        _ => format!("{core}.0{suffix}"),
    };
    Version::parse(&padded).ok()
}

/// Entry excluded because a version could not be parsed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedEntry {
    pub since: String,
    pub reason: String,
}

/// Result of version filtering
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applicable<T> {
    pub entries: Vec<T>,
    pub dropped: Vec<DroppedEntry>,
}

impl<T> Default for Applicable<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            dropped: Vec::new(),
        }
    }
}

/// Keep entries with `applied < since <= current`
///
/// Without an applied version every entry up to `current` applies. If
/// `applied` is newer than `current` nothing applies. Unparsable versions
/// fail closed: an unparsable `since` drops that entry, an unparsable
/// `applied` or `current` drops everything.
#[must_use]
pub fn applicable_entries<T: Versioned + Clone>(
    entries: &[T],
    applied: Option<&str>,
    current: &str,
) -> Applicable<T> {
    let mut out = Applicable::default();
    let drop_all = |reason: String| Applicable {
        entries: Vec::new(),
        dropped: entries
            .iter()
            .map(|e| DroppedEntry {
                since: e.since().to_string(),
                reason: reason.clone(),
            })
            .collect(),
    };

    let Some(current_v) = parse_version(current) else {
        warn!(version = current, "unparsable current version; no manifest entries apply");
        return drop_all(format!("unparsable current version '{current}'"));
    };
    let applied_v = match applied {
        None => None,
        Some(raw) => match parse_version(raw) {
            Some(v) => Some(v),
            None => {
                warn!(version = raw, "unparsable applied version; no manifest entries apply");
                return drop_all(format!("unparsable applied version '{raw}'"));
            }
        },
    };
    if applied_v.as_ref().is_some_and(|a| *a > current_v) {
        warn!(
            applied = applied.unwrap_or_default(),
            current, "applied manifest version is newer than current; skipping evolution"
        );
        return out;
    }

    for entry in entries {
        let Some(since) = parse_version(entry.since()) else {
            warn!(since = entry.since(), "dropping manifest entry with unparsable version");
            out.dropped.push(DroppedEntry {
                since: entry.since().to_string(),
                reason: format!("unparsable since '{}'", entry.since()),
            });
            continue;
        };
        let after_applied = applied_v.as_ref().map_or(true, |a| since > *a);
        if after_applied && since <= current_v {
            out.entries.push(entry.clone());
        }
    }
    out
}

/// Evolution entries that apply to one reconcile call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestEvolution {
    pub renames: Vec<RenameEntry>,
    pub path_migrations: Vec<PathMigration>,
    pub section_renames: Vec<SectionRename>,
    pub dropped: Vec<DroppedEntry>,
}

impl ManifestEvolution {
    /// Filter a manifest for the `(applied, current]` window
    #[must_use]
    pub fn resolve(manifest: &PortableManifest, applied: Option<&str>, current: &str) -> Self {
        let renames = applicable_entries(&manifest.renames, applied, current);
        let migrations = applicable_entries(&manifest.provider_path_migrations, applied, current);
        let sections = applicable_entries(&manifest.section_renames, applied, current);

        let mut dropped = renames.dropped;
        dropped.extend(migrations.dropped);
        dropped.extend(sections.dropped);
        Self {
            renames: renames.entries,
            path_migrations: migrations.entries,
            section_renames: sections.entries,
            dropped,
        }
    }

    /// Rename whose `to` names this item or path
    #[must_use]
    pub fn rename_to(
        &self,
        provider: &str,
        item_type: PortableType,
        item: &str,
        path: &str,
    ) -> Option<&RenameEntry> {
        self.renames.iter().find(|r| {
            r.provider.as_deref().map_or(true, |p| p == provider)
                && r.item_type.map_or(true, |t| t == item_type)
                && (r.to == item || r.to == path)
        })
    }

    /// New location of `path` under an applicable path migration
    #[must_use]
    pub fn migrate_path(&self, provider: &str, item_type: PortableType, path: &str) -> Option<String> {
        self.path_migrations
            .iter()
            .filter(|m| m.provider == provider && m.item_type == item_type)
            .find_map(|m| {
                let from = m.from.trim_end_matches('/');
                let rest = path.strip_prefix(from)?;
                if rest.is_empty() {
                    return Some(m.to.trim_end_matches('/').to_string());
                }
                let rest = rest.strip_prefix('/')?;
                Some(format!("{}/{rest}", m.to.trim_end_matches('/')))
            })
    }

    /// Apply section renames for `item_type`
    ///
    /// Returns the rewritten section list and the new names that changed.
    #[must_use]
    pub fn rename_sections(&self, item_type: PortableType, sections: &[String]) -> (Vec<String>, Vec<String>) {
        let mut affected = Vec::new();
        let renamed = sections
            .iter()
            .map(|section| {
                let hit = self
                    .section_renames
                    .iter()
                    .find(|r| r.item_type == item_type && r.from == *section);
                match hit {
                    Some(rename) => {
                        affected.push(rename.to.clone());
                        rename.to.clone()
                    }
                    None => section.clone(),
                }
            })
            .collect();
        (renamed, affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn rename(since: &str) -> RenameEntry {
        RenameEntry {
            from: "a.md".into(),
            to: "b.md".into(),
            since: since.into(),
            item_type: None,
            provider: None,
        }
    }

    #[test]
    fn lenient_parsing() {
        assert_eq!(parse_version("v2.1.0"), Some(Version::new(2, 1, 0)));
        assert_eq!(parse_version("2"), Some(Version::new(2, 0, 0)));
        assert_eq!(parse_version("2.1"), Some(Version::new(2, 1, 0)));
        assert!(parse_version("2.1-beta.1").is_some_and(|v| !v.pre.is_empty()));
        assert_eq!(parse_version("latest"), None);
        assert_eq!(parse_version("1..2"), None);
    }

    #[test]
    fn window_is_exclusive_inclusive() {
        let entries = vec![rename("1.5.0"), rename("2.0.0"), rename("2.1.0"), rename("2.2.0")];
        let applicable = applicable_entries(&entries, Some("1.5.0"), "2.1.0");
        let since: Vec<_> = applicable.entries.iter().map(|e| e.since.as_str()).collect();
        assert_eq!(since, vec!["2.0.0", "2.1.0"]);
        assert!(applicable.dropped.is_empty());
    }

    #[test]
    fn no_applied_version_takes_everything_up_to_current() {
        let entries = vec![rename("0.1.0"), rename("3.0.0")];
        let applicable = applicable_entries(&entries, None, "2.0.0");
        assert_eq!(applicable.entries.len(), 1);
    }

    #[test]
    fn version_skew_applies_nothing() {
        let entries = vec![rename("2.0.0")];
        assert!(applicable_entries(&entries, Some("3.0.0"), "2.1.0").entries.is_empty());
    }

    #[test]
    fn unparsable_since_fails_closed() {
        let entries = vec![rename("soon"), rename("2.0.0")];
        let applicable = applicable_entries(&entries, Some("1.0.0"), "2.0.0");
        assert_eq!(applicable.entries.len(), 1);
        assert_eq!(applicable.dropped.len(), 1);
        assert_eq!(applicable.dropped[0].since, "soon");
    }

    #[test]
    fn unparsable_applied_drops_all() {
        let entries = vec![rename("2.0.0")];
        let applicable = applicable_entries(&entries, Some("garbage"), "2.0.0");
        assert!(applicable.entries.is_empty());
        assert_eq!(applicable.dropped.len(), 1);
    }

    #[test]
    fn manifest_version_is_checked_and_extras_survive() {
        let manifest = PortableManifest::from_json(
            r#"{"version":"1.0","cliVersion":"2.1.0","renames":[{"from":"a","to":"b","since":"2.0.0"}],"channel":"beta"}"#,
        )
        .unwrap();
        assert_eq!(manifest.renames.len(), 1);
        assert!(manifest.to_json().unwrap().contains("\"channel\""));

        let err = PortableManifest::from_json(r#"{"version":"2.0"}"#).unwrap_err();
        assert!(matches!(err, ManifestError::UnsupportedVersion(_)));
    }

    #[test]
    fn path_migration_rewrites_prefix() {
        let evolution = ManifestEvolution {
            path_migrations: vec![PathMigration {
                provider: "cursor".into(),
                item_type: PortableType::Rules,
                from: ".cursor/rules/".into(),
                to: ".cursor/rules-v2".into(),
                since: "2.0.0".into(),
            }],
            ..ManifestEvolution::default()
        };
        assert_eq!(
            evolution.migrate_path("cursor", PortableType::Rules, ".cursor/rules/style.mdc"),
            Some(".cursor/rules-v2/style.mdc".to_string())
        );
        assert_eq!(
            evolution.migrate_path("cursor", PortableType::Rules, ".cursor/rulesx/style.mdc"),
            None
        );
        assert_eq!(
            evolution.migrate_path("claude", PortableType::Rules, ".cursor/rules/style.mdc"),
            None
        );
    }

    #[test]
    fn section_renames_report_affected() {
        let evolution = ManifestEvolution {
            section_renames: vec![SectionRename {
                item_type: PortableType::Rules,
                from: "Rules".into(),
                to: "Guidelines".into(),
                since: "2.0.0".into(),
            }],
            ..ManifestEvolution::default()
        };
        let (sections, affected) =
            evolution.rename_sections(PortableType::Rules, &["Rules".into(), "Notes".into()]);
        assert_eq!(sections, vec!["Guidelines", "Notes"]);
        assert_eq!(affected, vec!["Guidelines"]);
    }
}
