//! Reconcile decision engine
//!
//! [`reconcile`] maps source items, the registry and a pre-fetched target
//! snapshot to a [`ReconcilePlan`]. It performs no I/O, so the same inputs
//! always yield the same plan.
//!
//! Decision table for an item with a registry entry, evaluated in order:
//!
//! | source vs registry | target vs registry | action |
//! |--------------------|--------------------|--------|
//! | unchanged | unchanged | skip |
//! | changed | unchanged | update |
//! | unchanged | changed | skip (user edit kept) |
//! | changed | changed | conflict |
//! | changed | missing | install |
//! | unchanged | missing | skip |
//!
//! Items without an entry install, unless the target already exists.
//! Registry entries without a source item are deleted, except skill
//! directories and targets the user edited.

use crate::error::ReconcileError;
use crate::manifest::{ManifestEvolution, PortableManifest};
use crate::plan::{ActionKind, ReasonCode, ReconcileAction, ReconcilePlan};
use crate::types::{
    ItemKey, PortableRegistry, PortableRegistryEntry, PortableType, SourceItem, TargetSnapshot,
    TargetState,
};
use indexmap::{IndexMap, IndexSet};
use kitsync_artifact::{check_relative, classify, InstalledSettings, KitMetadata};
use kitsync_composition::{generate_hunks, MergeKind};
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// Everything [`reconcile`] looks at
#[derive(Debug, Clone, Copy)]
pub struct ReconcileInput<'a> {
    pub source_items: &'a [SourceItem],
    pub registry: &'a PortableRegistry,
    pub target: &'a TargetSnapshot,
    pub manifest: Option<&'a PortableManifest>,
    /// Kit version being installed; defaults to the manifest's `cliVersion`
    pub current_version: Option<&'a str>,
    /// Per-file tracking records for targets without a registry entry
    pub tracked: Option<&'a KitMetadata>,
    /// Hook/MCP baseline; defaults to the one in `tracked`
    pub installed_settings: Option<&'a InstalledSettings>,
    /// Providers in scope for orphan cleanup; empty means those of the source items
    pub providers: &'a [String],
}

impl<'a> ReconcileInput<'a> {
    /// Create input with no manifest, tracking or explicit scope
    #[must_use]
    pub fn new(
        source_items: &'a [SourceItem],
        registry: &'a PortableRegistry,
        target: &'a TargetSnapshot,
    ) -> Self {
        Self {
            source_items,
            registry,
            target,
            manifest: None,
            current_version: None,
            tracked: None,
            installed_settings: None,
            providers: &[],
        }
    }

    #[inline]
    #[must_use]
    pub fn with_manifest(mut self, manifest: &'a PortableManifest) -> Self {
        self.manifest = Some(manifest);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_current_version(mut self, version: &'a str) -> Self {
        self.current_version = Some(version);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_tracked(mut self, tracked: &'a KitMetadata) -> Self {
        self.tracked = Some(tracked);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_installed_settings(mut self, installed: &'a InstalledSettings) -> Self {
        self.installed_settings = Some(installed);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_providers(mut self, providers: &'a [String]) -> Self {
        self.providers = providers;
        self
    }

    fn baseline(&self) -> Option<&'a InstalledSettings> {
        self.installed_settings
            .or_else(|| self.tracked.and_then(|m| m.installed_settings.as_ref()))
    }
}

/// Plan the actions that bring the target in line with the source
///
/// # Errors
/// Returns [`ReconcileError`] when a source item has an unsafe target path or
/// two source items share one identity
pub fn reconcile(input: &ReconcileInput<'_>) -> Result<ReconcilePlan, ReconcileError> {
    validate_sources(input.source_items)?;

    let evolution = resolve_evolution(input);
    let mut planner = Planner {
        input,
        evolution,
        registry: input.registry.entries.iter().map(|e| (e.key(), e)).collect(),
        consumed: IndexSet::new(),
    };

    let source_keys: BTreeSet<ItemKey> = input.source_items.iter().map(SourceItem::key).collect();
    let mut actions = Vec::with_capacity(input.source_items.len());
    for source in input.source_items {
        let action = planner.plan_item(source, &source_keys);
        debug!(
            item = %source.item,
            path = %action.target_path,
            action = %action.action,
            reason = ?action.reason_code,
            "planned"
        );
        actions.push(action);
    }
    actions.extend(planner.plan_orphans());

    let plan = ReconcilePlan::new(actions);
    debug!(
        install = plan.summary.install,
        update = plan.summary.update,
        skip = plan.summary.skip,
        conflict = plan.summary.conflict,
        delete = plan.summary.delete,
        "reconcile complete"
    );
    Ok(plan)
}

fn validate_sources(items: &[SourceItem]) -> Result<(), ReconcileError> {
    let mut seen = BTreeSet::new();
    for item in items {
        check_relative(&item.target_path).map_err(|source| ReconcileError::InvalidPath {
            item: item.item.clone(),
            path: item.target_path.clone(),
            source,
        })?;
        let key = item.key();
        if !seen.insert(key.clone()) {
            return Err(ReconcileError::DuplicateItem(key.to_string()));
        }
    }
    Ok(())
}

fn resolve_evolution(input: &ReconcileInput<'_>) -> ManifestEvolution {
    let Some(manifest) = input.manifest else {
        return ManifestEvolution::default();
    };
    let Some(current) = input.current_version.or(manifest.cli_version.as_deref()) else {
        warn!("manifest supplied without a current version; evolution skipped");
        return ManifestEvolution::default();
    };
    let applied = input.registry.applied_manifest_version.as_deref();
    let evolution = ManifestEvolution::resolve(manifest, applied, current);
    for dropped in &evolution.dropped {
        warn!(since = %dropped.since, reason = %dropped.reason, "manifest entry not applied");
    }
    evolution
}

struct Planner<'a, 'i> {
    input: &'i ReconcileInput<'a>,
    evolution: ManifestEvolution,
    registry: IndexMap<ItemKey, &'a PortableRegistryEntry>,
    consumed: IndexSet<ItemKey>,
}

/// Where a tracked item used to live
struct Relocation<'e> {
    previous_item: Option<&'e str>,
    previous_path: &'e str,
}

impl<'a> Planner<'a, '_> {
    fn plan_item(&mut self, source: &SourceItem, source_keys: &BTreeSet<ItemKey>) -> ReconcileAction {
        if source.item_type.is_settings_entry() {
            return self.plan_settings_entry(source);
        }

        let key = source.key();
        if let Some(entry) = self.registry.get(&key).copied() {
            self.consumed.insert(key);
            if entry.path == source.target_path {
                return self.plan_tracked(source, entry, None);
            }
            let migrated = self
                .evolution
                .migrate_path(&entry.provider, entry.item_type, &entry.path);
            if migrated.as_deref() == Some(source.target_path.as_str()) {
                let relocation = Relocation {
                    previous_item: None,
                    previous_path: &entry.path,
                };
                return self.plan_tracked(source, entry, Some(relocation));
            }
            debug!(item = %source.item, from = %entry.path, to = %source.target_path, "target path changed without a migration");
            let action = self.decide_path_change(source, entry);
            return self.with_sections(action, source, entry);
        }

        if let Some(entry) = self.renamed_from(source, source_keys) {
            self.consumed.insert(entry.key());
            let relocation = Relocation {
                previous_item: (entry.item != source.item).then_some(entry.item.as_str()),
                previous_path: &entry.path,
            };
            return self.plan_tracked(source, entry, Some(relocation));
        }

        self.plan_unmanaged(source)
    }

    /// Registry entry an applicable rename maps onto `source`
    fn renamed_from(
        &self,
        source: &SourceItem,
        source_keys: &BTreeSet<ItemKey>,
    ) -> Option<&'a PortableRegistryEntry> {
        let rename = self.evolution.rename_to(
            &source.provider,
            source.item_type,
            &source.item,
            &source.target_path,
        )?;
        self.registry.values().copied().find(|entry| {
            entry.provider == source.provider
                && entry.item_type == source.item_type
                && entry.global == source.global
                && (entry.item == rename.from || entry.path == rename.from)
                && !self.consumed.contains(&entry.key())
                && !source_keys.contains(&entry.key())
        })
    }

    fn plan_settings_entry(&self, source: &SourceItem) -> ReconcileAction {
        let target = self.input.target;
        if target.has_settings_entry(source.item_type, &source.item) {
            return build(source, ActionKind::Skip, ReasonCode::SettingsEntryPresent, "already present in target settings");
        }
        let granted = self.input.baseline().is_some_and(|b| match source.item_type {
            PortableType::Hook => b.has_hook(&source.item),
            _ => b.has_server(&source.item),
        });
        if granted {
            return build(source, ActionKind::Skip, ReasonCode::UserDeleted, "removed by the user after a previous install");
        }
        build(source, ActionKind::Install, ReasonCode::NewItem, "new settings entry")
    }

    fn plan_unmanaged(&self, source: &SourceItem) -> ReconcileAction {
        let Some(state) = self.input.target.get(&source.target_path) else {
            return build(source, ActionKind::Install, ReasonCode::NewItem, "new item");
        };
        let mut action = if state.checksum == source.checksum {
            build(source, ActionKind::Skip, ReasonCode::UnmanagedIdentical, "target already matches source")
        } else {
            let record = self.input.tracked.and_then(|m| m.find(&source.target_path));
            match classify(record, Some(&state.checksum)) {
                Some(ownership) if ownership.is_pristine() => build(
                    source,
                    ActionKind::Update,
                    ReasonCode::UnmanagedPristine,
                    "tracked kit file is unmodified",
                ),
                _ => {
                    let mut action = build(
                        source,
                        ActionKind::Conflict,
                        ReasonCode::UnmanagedExisting,
                        "target exists and was not installed by this kit",
                    );
                    action.diff = diff_for(state, source);
                    action
                }
            }
        };
        action.current_target_checksum = Some(state.checksum);
        action
    }

    fn plan_tracked(
        &self,
        source: &SourceItem,
        entry: &PortableRegistryEntry,
        relocation: Option<Relocation<'_>>,
    ) -> ReconcileAction {
        let target = self.input.target;
        let new_state = target.get(&source.target_path);

        let mut action = match (&relocation, new_state) {
            (Some(moved), None) => match target.get(moved.previous_path) {
                Some(old) => self.decide_move(source, entry, old, moved.previous_path),
                None => decide(source, entry, None),
            },
            (Some(moved), Some(state)) => {
                let mut action = decide(source, entry, Some(state));
                let old_pristine = target
                    .get(moved.previous_path)
                    .is_some_and(|old| old.checksum == *entry.recorded_target());
                if old_pristine {
                    action.cleanup_paths.push(moved.previous_path.to_string());
                }
                action
            }
            (None, state) => decide(source, entry, state),
        };

        if let Some(moved) = relocation {
            action.previous_path = Some(moved.previous_path.to_string());
            action.previous_item = moved.previous_item.map(str::to_string);
        }
        self.with_sections(action, source, entry)
    }

    fn with_sections(
        &self,
        mut action: ReconcileAction,
        source: &SourceItem,
        entry: &PortableRegistryEntry,
    ) -> ReconcileAction {
        let (owned, affected) = if source.owned_sections.is_empty() {
            self.evolution.rename_sections(entry.item_type, &entry.sections)
        } else {
            let (_, affected) = self.evolution.rename_sections(entry.item_type, &entry.sections);
            (source.owned_sections.clone(), affected)
        };
        action.owned_sections = owned;
        action.affected_sections = affected;
        action
    }

    /// Tracked item whose target path changed with no manifest entry
    ///
    /// The new path is planned like a fresh target. The old file is removed
    /// only while it still holds what was installed; an edited copy stays.
    fn decide_path_change(&self, source: &SourceItem, entry: &PortableRegistryEntry) -> ReconcileAction {
        let target = self.input.target;
        let state = target.get(&source.target_path);
        let mut action = match state {
            None => build(source, ActionKind::Install, ReasonCode::PathChanged, "target path changed"),
            Some(state) if state.checksum == source.checksum => build(
                source,
                ActionKind::Update,
                ReasonCode::PathChanged,
                "target path changed; new path already matches source",
            ),
            Some(state) => {
                let mut action = build(
                    source,
                    ActionKind::Conflict,
                    ReasonCode::UnmanagedExisting,
                    "target path changed and the new path holds other content",
                );
                action.diff = diff_for(state, source);
                action
            }
        };
        action.registered_source_checksum = Some(entry.source_checksum);
        action.registered_target_checksum = Some(*entry.recorded_target());
        action.current_target_checksum = state.map(|s| s.checksum);
        action.previous_path = Some(entry.path.clone());
        let old_pristine = target
            .get(&entry.path)
            .is_some_and(|old| old.checksum == *entry.recorded_target());
        if old_pristine {
            action.cleanup_paths.push(entry.path.clone());
        }
        action
    }

    /// Renamed or migrated item whose new path does not exist yet
    fn decide_move(
        &self,
        source: &SourceItem,
        entry: &PortableRegistryEntry,
        old: &TargetState,
        old_path: &str,
    ) -> ReconcileAction {
        let mut action = if old.checksum == *entry.recorded_target() {
            build(source, ActionKind::Install, ReasonCode::Renamed, "moved to a new name or path")
        } else {
            let mut action = build(
                source,
                ActionKind::Conflict,
                ReasonCode::BothChanged,
                "item moved and the old copy was edited by the user",
            );
            action.diff = diff_for(old, source);
            action
        };
        action.registered_source_checksum = Some(entry.source_checksum);
        action.registered_target_checksum = Some(*entry.recorded_target());
        action.current_target_checksum = Some(old.checksum);
        action.cleanup_paths.push(old_path.to_string());
        action
    }

    fn plan_orphans(&self) -> Vec<ReconcileAction> {
        let scope: BTreeSet<&str> = if self.input.providers.is_empty() {
            self.input.source_items.iter().map(|s| s.provider.as_str()).collect()
        } else {
            self.input.providers.iter().map(String::as_str).collect()
        };

        let mut actions = Vec::new();
        for (key, entry) in &self.registry {
            if self.consumed.contains(key) || !scope.contains(entry.provider.as_str()) {
                continue;
            }
            let state = self.input.target.get(&entry.path);
            let (kind, code, reason) = if entry.item_type.is_directory_based() {
                (ActionKind::Skip, ReasonCode::OrphanedSkill, "skill directories are never removed automatically")
            } else if state.is_some_and(|s| s.checksum != *entry.recorded_target()) {
                (ActionKind::Skip, ReasonCode::OrphanEdited, "no longer offered but edited by the user")
            } else {
                (ActionKind::Delete, ReasonCode::Orphaned, "no longer offered by the kit")
            };
            debug!(item = %entry.item, path = %entry.path, action = %kind, "orphan");
            actions.push(orphan_action(entry, state, kind, code, reason));
        }
        actions
    }
}

/// Decision table for an item at its registered location
fn decide(
    source: &SourceItem,
    entry: &PortableRegistryEntry,
    state: Option<&TargetState>,
) -> ReconcileAction {
    let source_changed = source.checksum != entry.source_checksum;
    let mut action = match state {
        None if source_changed => build(source, ActionKind::Install, ReasonCode::TargetMissing, "target missing and source changed"),
        None => build(source, ActionKind::Skip, ReasonCode::TargetDeleted, "target deleted by the user"),
        Some(state) => {
            let target_changed = state.checksum != *entry.recorded_target();
            match (source_changed, target_changed) {
                (false, false) => build(source, ActionKind::Skip, ReasonCode::Unchanged, "up to date"),
                (true, false) => build(source, ActionKind::Update, ReasonCode::SourceChanged, "source changed"),
                (false, true) => build(source, ActionKind::Skip, ReasonCode::UserEdited, "target edited by the user; keeping edits"),
                (true, true) if state.checksum == source.checksum => build(
                    source,
                    ActionKind::Skip,
                    ReasonCode::AlreadyCurrent,
                    "target already matches the new source",
                ),
                (true, true) => {
                    let mut action = build(
                        source,
                        ActionKind::Conflict,
                        ReasonCode::BothChanged,
                        "source and target both changed",
                    );
                    action.diff = diff_for(state, source);
                    action
                }
            }
        }
    };
    action.registered_source_checksum = Some(entry.source_checksum);
    action.registered_target_checksum = Some(*entry.recorded_target());
    action.current_target_checksum = state.map(|s| s.checksum);
    action
}

fn build(source: &SourceItem, action: ActionKind, code: ReasonCode, reason: &str) -> ReconcileAction {
    ReconcileAction {
        action,
        item: source.item.clone(),
        item_type: source.item_type,
        provider: source.provider.clone(),
        global: source.global,
        target_path: source.target_path.clone(),
        merge_kind: source.merge_kind,
        reason: reason.to_string(),
        reason_code: code,
        source_checksum: Some(source.checksum),
        registered_source_checksum: None,
        current_target_checksum: None,
        registered_target_checksum: None,
        previous_item: None,
        previous_path: None,
        cleanup_paths: Vec::new(),
        owned_sections: source.owned_sections.clone(),
        affected_sections: Vec::new(),
        diff: None,
        resolution: None,
    }
}

fn orphan_action(
    entry: &PortableRegistryEntry,
    state: Option<&TargetState>,
    action: ActionKind,
    code: ReasonCode,
    reason: &str,
) -> ReconcileAction {
    ReconcileAction {
        action,
        item: entry.item.clone(),
        item_type: entry.item_type,
        provider: entry.provider.clone(),
        global: entry.global,
        target_path: entry.path.clone(),
        merge_kind: if entry.item_type.is_directory_based() || state.is_some_and(|s| s.is_dir) {
            MergeKind::Directory
        } else {
            MergeKind::Replace
        },
        reason: reason.to_string(),
        reason_code: code,
        source_checksum: None,
        registered_source_checksum: Some(entry.source_checksum),
        current_target_checksum: state.map(|s| s.checksum),
        registered_target_checksum: Some(*entry.recorded_target()),
        previous_item: None,
        previous_path: None,
        cleanup_paths: Vec::new(),
        owned_sections: entry.sections.clone(),
        affected_sections: Vec::new(),
        diff: None,
        resolution: None,
    }
}

/// Unified diff from the target to the source, when both are text
fn diff_for(state: &TargetState, source: &SourceItem) -> Option<String> {
    let current = state.content.as_deref()?;
    let updated = source.content.as_deref()?;
    let diff = generate_hunks(current, updated, &source.target_path);
    (!diff.is_empty()).then(|| diff.render())
}
