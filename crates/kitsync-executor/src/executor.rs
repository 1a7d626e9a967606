//! Plan executor
//!
//! Applies a resolved [`ReconcilePlan`] to the target tree. Actions run in
//! plan order under the registry lock. Each action backs up every path it
//! touches, writes, then commits the registry; a registry failure restores
//! the backup. A failed action is recorded and the run moves on, except for
//! a failed restore, which stops the run.

use crate::cache::ChecksumCache;
use crate::config::{ExecutorConfig, LOCK_FILE};
use crate::error::ExecutorError;
use crate::fsops::{copy_tree, remove_path, write_atomic, ActionBackup};
use crate::lock::RegistryLock;
use crate::store::RegistryStore;
use chrono::Utc;
use kitsync_artifact::{ContentHash, KitMetadata, PathGuard, TrackedFile};
use kitsync_composition::{
    apply_hunks, generate_hunks, load_file_content, select_owned_hunks, ContentError, FileContent,
    MergeKind, MergeReport, SettingsMerger,
};
use kitsync_core::{
    ActionKind, ConflictResolution, ErrorKind, ItemKey, Outcome, PortableRegistry,
    PortableRegistryEntry, ReasonCode, ReconcileAction, ReconcilePlan, SourceItem,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Result of one action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResultStatus {
    /// Target changed as planned
    Applied,
    /// Nothing written
    Skipped,
    Failed,
}

/// One line of the execution report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResultEntry {
    pub item: String,
    #[serde(rename = "type")]
    pub item_type: kitsync_core::PortableType,
    pub provider: String,
    pub action: ActionKind,
    pub target_path: String,
    pub status: ResultStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionResultEntry {
    fn new(action: &ReconcileAction, status: ResultStatus) -> Self {
        Self {
            item: action.item.clone(),
            item_type: action.item_type,
            provider: action.provider.clone(),
            action: action.action,
            target_path: action.target_path.clone(),
            status,
            error: None,
        }
    }

    fn failed(action: &ReconcileAction, error: &ExecutorError) -> Self {
        let mut entry = Self::new(action, ResultStatus::Failed);
        entry.error = Some(error.to_string());
        entry
    }
}

/// Per-status totals
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionCounts {
    pub installed: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// What a run did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReport {
    pub results: Vec<ExecutionResultEntry>,
    pub counts: ExecutionCounts,
    pub warnings: Vec<String>,
}

impl ExecutionReport {
    fn record(&mut self, entry: ExecutionResultEntry) {
        match entry.status {
            ResultStatus::Applied => self.counts.installed += 1,
            ResultStatus::Skipped => self.counts.skipped += 1,
            ResultStatus::Failed => self.counts.failed += 1,
        }
        self.results.push(entry);
    }

    #[inline]
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.counts.failed > 0
    }

    #[must_use]
    pub fn outcome(&self) -> Outcome {
        if self.has_failures() {
            Outcome::ExecutionFailed
        } else {
            Outcome::Completed
        }
    }

    /// Find the entry for an item
    #[must_use]
    pub fn find(&self, item: &str) -> Option<&ExecutionResultEntry> {
        self.results.iter().find(|r| r.item == item)
    }
}

/// What to put at the target
#[derive(Debug, Clone, Copy)]
enum WriteMode<'a> {
    /// Strategy of the item's merge kind
    Planned,
    /// Source bytes, whole
    Overwrite,
    /// Owned sections or settings entries only
    SmartMerge,
    /// Caller-supplied body
    Verbatim(&'a str),
}

/// What a write produced
#[derive(Debug)]
struct Written {
    checksum: ContentHash,
    settings: Option<MergeReport>,
}

/// Mutable state of one run
struct RunState {
    registry: PortableRegistry,
    metadata: KitMetadata,
    report: ExecutionReport,
    run_dir: PathBuf,
}

/// Applies plans to one target root
pub struct Executor {
    guard: PathGuard,
    store: Arc<dyn RegistryStore>,
    config: ExecutorConfig,
    cache: Option<ChecksumCache>,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("root", &self.guard.base())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Executor {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, store: Arc<dyn RegistryStore>, config: ExecutorConfig) -> Self {
        Self {
            guard: PathGuard::new(root),
            store,
            config,
            cache: None,
        }
    }

    /// Invalidate written paths in a scanner's cache
    #[inline]
    #[must_use]
    pub fn with_cache(mut self, cache: ChecksumCache) -> Self {
        self.cache = Some(cache);
        self
    }

    #[inline]
    #[must_use]
    pub fn root(&self) -> &Path {
        self.guard.base()
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    #[inline]
    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        self.root().join(LOCK_FILE)
    }

    /// Apply every action of a resolved plan
    ///
    /// # Errors
    /// - [`ExecutorError::UnresolvedConflicts`] if a conflict has no resolution; nothing is touched
    /// - [`ExecutorError::Lock`] if the registry lock cannot be taken
    /// - [`ExecutorError::Store`] if the registry or metadata cannot be loaded
    /// - [`ExecutorError::RollbackFailed`] if restoring a backup failed; the
    ///   run stops and backups are kept
    ///
    /// Other per-action failures are reported in the returned report.
    pub async fn execute(
        &self,
        plan: &ReconcilePlan,
        sources: &[SourceItem],
    ) -> Result<ExecutionReport, ExecutorError> {
        let pending = plan.unresolved_conflicts().len();
        if pending > 0 {
            return Err(ExecutorError::UnresolvedConflicts { count: pending });
        }

        let _lock = RegistryLock::acquire(self.lock_path(), &self.config).await?;
        let registry = self.store.load_registry().await?;
        let metadata = self.store.load_metadata().await?.unwrap_or_else(|| {
            KitMetadata::new(self.config.current_version.clone().unwrap_or_else(|| "0.0.0".into()))
        });
        let run_id = format!("{}-{}", Utc::now().format("%Y%m%dT%H%M%S"), Uuid::new_v4().simple());
        let mut state = RunState {
            registry,
            metadata,
            report: ExecutionReport::default(),
            run_dir: self.root().join(&self.config.backup_dir).join(run_id),
        };

        let by_key: HashMap<ItemKey, &SourceItem> = sources.iter().map(|s| (s.key(), s)).collect();

        for action in &plan.actions {
            let source = by_key.get(&action.key()).copied();
            match self.run_action(action, source, &mut state).await {
                Ok(status) => {
                    info!(item = %action.item, path = %action.target_path, action = %action.action, ?status, "action done");
                    state.report.record(ExecutionResultEntry::new(action, status));
                }
                Err(e) if e.kind() == ErrorKind::RollbackFailure => {
                    error!(item = %action.item, path = %action.target_path, error = %e, "rollback failed, stopping");
                    return Err(e);
                }
                Err(e) => {
                    warn!(item = %action.item, path = %action.target_path, error = %e, "action failed");
                    state.report.record(ExecutionResultEntry::failed(action, &e));
                }
            }
        }

        self.finish(&mut state).await;
        Ok(state.report)
    }

    async fn run_action(
        &self,
        action: &ReconcileAction,
        source: Option<&SourceItem>,
        state: &mut RunState,
    ) -> Result<ResultStatus, ExecutorError> {
        let require = || source.ok_or_else(|| ExecutorError::MissingSource(action.key().to_string()));
        match (action.action, &action.resolution) {
            (ActionKind::Skip, _) if action.reason_code == ReasonCode::AlreadyCurrent => {
                self.apply_refresh(action, require()?, state).await
            }
            (ActionKind::Skip, _) => Ok(ResultStatus::Skipped),
            (ActionKind::Delete, _) => self.apply_delete(action, state).await,
            (ActionKind::Install | ActionKind::Update, _) => {
                self.apply_write(action, require()?, WriteMode::Planned, state).await
            }
            (ActionKind::Conflict, Some(ConflictResolution::Overwrite)) => {
                self.apply_write(action, require()?, WriteMode::Overwrite, state).await
            }
            (ActionKind::Conflict, Some(ConflictResolution::SmartMerge)) => {
                self.apply_write(action, require()?, WriteMode::SmartMerge, state).await
            }
            (ActionKind::Conflict, Some(ConflictResolution::Resolved { content })) => {
                self.apply_write(action, require()?, WriteMode::Verbatim(content), state).await
            }
            (ActionKind::Conflict, Some(ConflictResolution::Keep)) => {
                self.apply_keep(action, require()?, state).await
            }
            (ActionKind::Conflict, None) => Err(ExecutorError::UnresolvedConflicts { count: 1 }),
        }
    }

    async fn apply_write(
        &self,
        action: &ReconcileAction,
        source: &SourceItem,
        mode: WriteMode<'_>,
        state: &mut RunState,
    ) -> Result<ResultStatus, ExecutorError> {
        let target = self.guard.validate(&action.target_path)?;
        let cleanup = action
            .cleanup_paths
            .iter()
            .map(|p| self.guard.validate(p))
            .collect::<Result<Vec<_>, _>>()?;

        let mut backup = ActionBackup::new(&state.run_dir);
        backup.save(&target).await?;
        for path in &cleanup {
            backup.save(path).await?;
        }

        let written = match self.write_target(action, source, mode, &target, &state.metadata).await {
            Ok(written) => written,
            Err(e) => {
                backup.restore().await?;
                return Err(e);
            }
        };
        for path in &cleanup {
            if let Err(e) = remove_path(path).await {
                backup.restore().await?;
                return Err(e);
            }
            debug!(path = %path.display(), "removed relocated file");
        }

        let previous = state.registry.clone();
        if !action.item_type.is_settings_entry() {
            if let Some(old) = &action.previous_item {
                let mut old_key = action.key();
                old_key.item.clone_from(old);
                state.registry.remove(&old_key);
            }
            let mut entry = PortableRegistryEntry::new(
                action.item.clone(),
                action.item_type,
                action.provider.clone(),
                action.target_path.clone(),
                source.checksum,
            )
            .with_global(action.global)
            .with_target_checksum(written.checksum);
            entry.installed_at = Some(Utc::now());
            entry.sections.clone_from(&action.owned_sections);
            state.registry.upsert(entry);
        }
        self.commit_registry(&previous, &backup, state).await?;

        if let Some(report) = &written.settings {
            let mut baseline = state.metadata.settings_baseline();
            baseline.record(&report.newly_installed_hooks, &report.newly_installed_servers);
            state.metadata.installed_settings = Some(baseline);
            state.report.warnings.extend(
                report
                    .conflicts_detected
                    .iter()
                    .map(|c| format!("{}: {c}", action.target_path)),
            );
        }
        if !action.item_type.is_settings_entry() && !target.is_dir() {
            let record = TrackedFile::new(action.target_path.clone(), written.checksum, self.version_of(&state.metadata))
                .with_base_checksum(source.checksum)
                .with_installed_at(Utc::now());
            state.metadata.upsert(record);
        }
        for old in &action.cleanup_paths {
            state.metadata.remove(old);
        }
        self.invalidate(&target);
        Ok(ResultStatus::Applied)
    }

    /// Persist the registry, undoing the action's file changes on failure
    async fn commit_registry(
        &self,
        previous: &PortableRegistry,
        backup: &ActionBackup,
        state: &mut RunState,
    ) -> Result<(), ExecutorError> {
        if state.registry == *previous {
            return Ok(());
        }
        if let Err(e) = self.store.save_registry(&state.registry).await {
            warn!(error = %e, "registry update failed, rolling back");
            state.registry = previous.clone();
            backup.restore().await?;
            return Err(e.into());
        }
        Ok(())
    }

    async fn write_target(
        &self,
        action: &ReconcileAction,
        source: &SourceItem,
        mode: WriteMode<'_>,
        target: &Path,
        metadata: &KitMetadata,
    ) -> Result<Written, ExecutorError> {
        if let WriteMode::Verbatim(body) = mode {
            return self.write_bytes(target, body.as_bytes().to_vec()).await;
        }
        if matches!(mode, WriteMode::SmartMerge) && !action.merge_kind.supports_smart_merge() {
            return Err(ExecutorError::Unsupported(format!(
                "{} item {} cannot be smart-merged",
                action.merge_kind, action.target_path
            )));
        }
        match (action.merge_kind, mode) {
            (MergeKind::Directory, _) => self.write_directory(source, target).await,
            (MergeKind::Settings, WriteMode::Planned | WriteMode::SmartMerge) => {
                self.write_settings(source, target, metadata).await
            }
            (MergeKind::Text, WriteMode::Planned) => self.write_text(source, target).await,
            (MergeKind::Text, WriteMode::SmartMerge) => self.write_smart_text(action, source, target).await,
            _ => {
                let bytes = self.source_bytes(source).await?;
                self.write_bytes(target, bytes).await
            }
        }
    }

    async fn write_bytes(&self, target: &Path, bytes: Vec<u8>) -> Result<Written, ExecutorError> {
        write_atomic(target, &bytes).await?;
        Ok(Written {
            checksum: ContentHash::compute(&bytes),
            settings: None,
        })
    }

    /// Replace a directory tree; the caller's backup restores it on failure
    async fn write_directory(&self, source: &SourceItem, target: &Path) -> Result<Written, ExecutorError> {
        let from = source
            .source_path
            .as_deref()
            .ok_or_else(|| ExecutorError::MissingSource(format!("{} has no source directory", source.item)))?;
        remove_path(target).await?;
        copy_tree(from, target).await?;
        let checksum = digest_path(target).await?;
        Ok(Written {
            checksum,
            settings: None,
        })
    }

    /// Whole-file text update through the hunk engine
    async fn write_text(&self, source: &SourceItem, target: &Path) -> Result<Written, ExecutorError> {
        let incoming = FileContent::from_bytes(self.source_bytes(source).await?);
        let current = self.read_existing(target).await?;
        let body = match (current.as_ref().and_then(FileContent::as_text), incoming.as_text()) {
            (Some(current), Some(updated)) => {
                let diff = generate_hunks(current, updated, &source.target_path);
                let accept = vec![true; diff.hunks.len()];
                apply_hunks(current, &diff.hunks, &accept)?.into_bytes()
            }
            _ => incoming.as_bytes().to_vec(),
        };
        self.write_bytes(target, body).await
    }

    async fn write_smart_text(
        &self,
        action: &ReconcileAction,
        source: &SourceItem,
        target: &Path,
    ) -> Result<Written, ExecutorError> {
        let incoming = FileContent::from_bytes(self.source_bytes(source).await?);
        let current = self.read_existing(target).await?;
        let Some(current) = current else {
            // no target: nothing of the user's to keep
            return self.write_bytes(target, incoming.as_bytes().to_vec()).await;
        };
        let (Some(current), Some(updated)) = (current.as_text(), incoming.as_text()) else {
            return Err(ExecutorError::Unsupported(format!(
                "binary file {} cannot be smart-merged",
                action.target_path
            )));
        };
        let diff = generate_hunks(current, updated, &action.target_path);
        let accept = select_owned_hunks(current, &diff.hunks, &action.owned_sections);
        debug!(
            path = %action.target_path,
            hunks = diff.hunks.len(),
            accepted = accept.iter().filter(|a| **a).count(),
            "smart merge"
        );
        let merged = apply_hunks(current, &diff.hunks, &accept)?;
        self.write_bytes(target, merged.into_bytes()).await
    }

    async fn write_settings(
        &self,
        source: &SourceItem,
        target: &Path,
        metadata: &KitMetadata,
    ) -> Result<Written, ExecutorError> {
        let fragment = self.source_bytes(source).await?;
        let fragment: Value = serde_json::from_slice(&fragment).map_err(|e| ExecutorError::Json {
            path: PathBuf::from(&source.target_path),
            source: e,
        })?;
        let current = match self.read_existing(target).await? {
            Some(content) => serde_json::from_slice(content.as_bytes()).map_err(|e| ExecutorError::Json {
                path: target.to_path_buf(),
                source: e,
            })?,
            None => Value::Null,
        };

        let merger = SettingsMerger::new(self.config.merge_options(Some(metadata.settings_baseline())))?;
        let outcome = merger.merge(&current, &fragment)?;
        let mut body = serde_json::to_vec_pretty(&outcome.merged).map_err(|e| ExecutorError::Json {
            path: target.to_path_buf(),
            source: e,
        })?;
        body.push(b'\n');

        let written = self.write_bytes(target, body).await?;
        Ok(Written {
            settings: Some(outcome.report),
            ..written
        })
    }

    /// Leave the target alone, or move it to a migrated path, and record it
    async fn apply_keep(
        &self,
        action: &ReconcileAction,
        source: &SourceItem,
        state: &mut RunState,
    ) -> Result<ResultStatus, ExecutorError> {
        let target = self.guard.validate(&action.target_path)?;
        let mut backup = ActionBackup::new(&state.run_dir);
        let mut moved_from = None;

        if let Some(old) = action.previous_path.as_deref().filter(|old| *old != action.target_path) {
            let old_path = self.guard.validate(old)?;
            if path_exists(&old_path).await && !path_exists(&target).await {
                backup.save(&target).await?;
                backup.save(&old_path).await?;
                if let Err(e) = move_path(&old_path, &target).await {
                    backup.restore().await?;
                    return Err(e);
                }
                info!(from = %old, to = %action.target_path, "kept user file at migrated path");
                moved_from = Some(old.to_string());
            }
        }

        let current = match action.current_target_checksum {
            Some(checksum) if moved_from.is_none() => checksum,
            _ => digest_path(&target).await?,
        };

        let previous = state.registry.clone();
        if let Some(old) = &action.previous_item {
            let mut old_key = action.key();
            old_key.item.clone_from(old);
            state.registry.remove(&old_key);
        }
        let mut entry = PortableRegistryEntry::new(
            action.item.clone(),
            action.item_type,
            action.provider.clone(),
            action.target_path.clone(),
            source.checksum,
        )
        .with_global(action.global)
        .with_target_checksum(current);
        entry.installed_at = state
            .registry
            .find(&action.key())
            .and_then(|e| e.installed_at)
            .or_else(|| Some(Utc::now()));
        entry.sections.clone_from(&action.owned_sections);
        state.registry.upsert(entry);
        self.commit_registry(&previous, &backup, state).await?;

        if let Some(old) = moved_from {
            if let Some(mut record) = state.metadata.remove(&old) {
                record.path.clone_from(&action.target_path);
                state.metadata.upsert(record);
            }
            self.invalidate(&target);
        }
        Ok(ResultStatus::Skipped)
    }

    /// Target already holds the new source; move the recorded baseline to it
    async fn apply_refresh(
        &self,
        action: &ReconcileAction,
        source: &SourceItem,
        state: &mut RunState,
    ) -> Result<ResultStatus, ExecutorError> {
        let Some(current) = action.current_target_checksum else {
            return Ok(ResultStatus::Skipped);
        };
        let Some(recorded) = state.registry.find(&action.key()).cloned() else {
            return Ok(ResultStatus::Skipped);
        };
        if recorded.source_checksum == source.checksum && *recorded.recorded_target() == current {
            return Ok(ResultStatus::Skipped);
        }

        let previous = state.registry.clone();
        let mut entry = recorded.with_target_checksum(current);
        entry.source_checksum = source.checksum;
        state.registry.upsert(entry);
        // nothing was written, so there is nothing to restore
        self.commit_registry(&previous, &ActionBackup::new(&state.run_dir), state).await?;

        if let Some(mut record) = state.metadata.find(&action.target_path).cloned() {
            record.checksum = current;
            record.base_checksum = Some(source.checksum);
            state.metadata.upsert(record);
        }
        debug!(item = %action.item, path = %action.target_path, checksum = %current.short(), "baseline refreshed");
        Ok(ResultStatus::Skipped)
    }

    async fn apply_delete(
        &self,
        action: &ReconcileAction,
        state: &mut RunState,
    ) -> Result<ResultStatus, ExecutorError> {
        let target = self.guard.validate(&action.target_path)?;
        let mut backup = ActionBackup::new(&state.run_dir);
        backup.save(&target).await?;
        if let Err(e) = remove_path(&target).await {
            backup.restore().await?;
            return Err(e);
        }

        let previous = state.registry.clone();
        state.registry.remove(&action.key());
        self.commit_registry(&previous, &backup, state).await?;

        state.metadata.remove(&action.target_path);
        self.invalidate(&target);
        Ok(ResultStatus::Applied)
    }

    /// Record the applied version, save metadata and drop backups
    async fn finish(&self, state: &mut RunState) {
        if let Some(version) = &self.config.current_version {
            // a failed action may depend on this release's evolution entries; let it retry
            if !state.report.has_failures() && state.registry.applied_manifest_version.as_ref() != Some(version) {
                state.registry.applied_manifest_version = Some(version.clone());
                if let Err(e) = self.store.save_registry(&state.registry).await {
                    warn!(error = %e, "failed to record applied manifest version");
                    state.report.warnings.push(format!("applied manifest version not recorded: {e}"));
                }
            }
            state.metadata.version.clone_from(version);
        }
        state.metadata.installed_at = Some(Utc::now());
        if let Err(e) = self.store.save_metadata(&state.metadata).await {
            warn!(error = %e, "failed to save tracking metadata");
            state.report.warnings.push(format!("tracking metadata not saved: {e}"));
        }

        if self.config.keep_backups {
            info!(dir = %state.run_dir.display(), "backups kept");
            return;
        }
        if let Err(e) = remove_path(&state.run_dir).await {
            warn!(error = %e, "failed to remove backups");
            state.report.warnings.push(format!("backups not removed: {e}"));
        }
        // only succeeds when no other run left backups behind
        let _ = tokio::fs::remove_dir(self.root().join(&self.config.backup_dir)).await;
    }

    fn version_of(&self, metadata: &KitMetadata) -> String {
        self.config
            .current_version
            .clone()
            .unwrap_or_else(|| metadata.version.clone())
    }

    fn invalidate(&self, path: &Path) {
        if let Some(cache) = &self.cache {
            cache.invalidate_path(path);
        }
    }

    async fn source_bytes(&self, source: &SourceItem) -> Result<Vec<u8>, ExecutorError> {
        if let Some(content) = &source.content {
            return Ok(content.clone().into_bytes());
        }
        let path = source
            .source_path
            .clone()
            .ok_or_else(|| ExecutorError::MissingSource(format!("{} has no content", source.item)))?;
        let max = self.config.max_file_size;
        let content = tokio::task::spawn_blocking(move || load_file_content(&path, max))
            .await
            .map_err(|e| ExecutorError::Join(e.to_string()))??;
        Ok(content.as_bytes().to_vec())
    }

    async fn read_existing(&self, target: &Path) -> Result<Option<FileContent>, ExecutorError> {
        let path = target.to_path_buf();
        let max = self.config.max_file_size;
        match tokio::task::spawn_blocking(move || load_file_content(&path, max))
            .await
            .map_err(|e| ExecutorError::Join(e.to_string()))?
        {
            Ok(content) => Ok(Some(content)),
            Err(ContentError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

async fn path_exists(path: &Path) -> bool {
    tokio::fs::symlink_metadata(path).await.is_ok()
}

async fn move_path(from: &Path, to: &Path) -> Result<(), ExecutorError> {
    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| ExecutorError::io_error(parent, e))?;
    }
    tokio::fs::rename(from, to)
        .await
        .map_err(|e| ExecutorError::io_error(to, e))
}

async fn digest_path(path: &Path) -> Result<ContentHash, ExecutorError> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        if path.is_dir() {
            ContentHash::compute_directory(&path)
        } else {
            ContentHash::compute_file(&path)
        }
    })
    .await
    .map_err(|e| ExecutorError::Join(e.to_string()))?
    .map_err(ExecutorError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::store::{JsonRegistryStore, MockRegistryStore};
    use kitsync_core::{PortableType, ReasonCode};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn action(kind: ActionKind, source: &SourceItem) -> ReconcileAction {
        ReconcileAction {
            action: kind,
            item: source.item.clone(),
            item_type: source.item_type,
            provider: source.provider.clone(),
            global: source.global,
            target_path: source.target_path.clone(),
            merge_kind: source.merge_kind,
            reason: "test".into(),
            reason_code: ReasonCode::NewItem,
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

    fn executor(root: &Path) -> (Executor, Arc<JsonRegistryStore>) {
        let store = Arc::new(JsonRegistryStore::new(root.join(".kitsync")));
        let config = ExecutorConfig::default().with_current_version("2.0.0");
        (Executor::new(root, store.clone(), config), store)
    }

    fn failing_store() -> MockRegistryStore {
        let mut store = MockRegistryStore::new();
        store.expect_load_registry().returning(|| Ok(PortableRegistry::default()));
        store.expect_load_metadata().returning(|| Ok(None));
        store
            .expect_save_registry()
            .returning(|_| Err(StoreError::io_error("portable-registry.json", std::io::Error::other("read-only filesystem"))));
        store.expect_save_metadata().returning(|_| Ok(()));
        store
    }

    #[tokio::test]
    async fn install_writes_and_registers() {
        let dir = TempDir::new().unwrap();
        let (executor, store) = executor(dir.path());
        let source = SourceItem::text("planner", PortableType::Agent, "claude", "agents/planner.md", "# Planner\n");
        let plan = ReconcilePlan::new(vec![action(ActionKind::Install, &source)]);

        let report = executor.execute(&plan, std::slice::from_ref(&source)).await.unwrap();

        assert_eq!(report.counts, ExecutionCounts { installed: 1, skipped: 0, failed: 0 });
        assert_eq!(std::fs::read_to_string(dir.path().join("agents/planner.md")).unwrap(), "# Planner\n");

        let registry = store.load_registry().await.unwrap();
        let entry = registry.find(&source.key()).unwrap();
        assert_eq!(entry.target_checksum, Some(source.checksum));
        assert_eq!(registry.applied_manifest_version.as_deref(), Some("2.0.0"));

        let metadata = store.load_metadata().await.unwrap().unwrap();
        assert_eq!(metadata.find("agents/planner.md").unwrap().checksum, source.checksum);
        assert!(!dir.path().join(".kitsync-backup").exists());
        assert!(!executor.lock_path().exists());
    }

    #[tokio::test]
    async fn unresolved_conflict_touches_nothing() {
        let dir = TempDir::new().unwrap();
        let (executor, _) = executor(dir.path());
        let source = SourceItem::text("a", PortableType::Rules, "claude", "rules/a.md", "a\n");
        let plan = ReconcilePlan::new(vec![action(ActionKind::Conflict, &source)]);

        let err = executor.execute(&plan, &[source]).await.unwrap_err();
        assert!(matches!(err, ExecutorError::UnresolvedConflicts { count: 1 }));
        assert!(!dir.path().join("rules/a.md").exists());
    }

    #[tokio::test]
    async fn registry_failure_rolls_back_update() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("agents")).unwrap();
        std::fs::write(dir.path().join("agents/a.md"), "old\n").unwrap();

        let executor = Executor::new(dir.path(), Arc::new(failing_store()), ExecutorConfig::default());
        let source = SourceItem::text("a", PortableType::Agent, "claude", "agents/a.md", "new\n");
        let fresh = SourceItem::text("b", PortableType::Agent, "claude", "agents/b.md", "b\n");
        let plan = ReconcilePlan::new(vec![
            action(ActionKind::Update, &source),
            action(ActionKind::Install, &fresh),
        ]);

        let report = executor.execute(&plan, &[source, fresh]).await.unwrap();

        assert_eq!(report.counts.failed, 2);
        assert_eq!(report.outcome(), Outcome::ExecutionFailed);
        assert!(report.find("a").unwrap().error.as_deref().unwrap().contains("read-only"));
        assert_eq!(std::fs::read_to_string(dir.path().join("agents/a.md")).unwrap(), "old\n");
        assert!(!dir.path().join("agents/b.md").exists());
    }

    #[tokio::test]
    async fn one_failed_action_does_not_stop_siblings() {
        let dir = TempDir::new().unwrap();
        let (executor, _) = executor(dir.path());
        let missing = SourceItem::new("ghost", PortableType::Agent, "claude", "agents/ghost.md", ContentHash::compute(b"x"));
        let good = SourceItem::text("good", PortableType::Agent, "claude", "agents/good.md", "ok\n");
        let plan = ReconcilePlan::new(vec![
            action(ActionKind::Install, &missing),
            action(ActionKind::Install, &good),
        ]);

        let report = executor.execute(&plan, &[missing, good]).await.unwrap();
        assert_eq!(report.find("ghost").unwrap().status, ResultStatus::Failed);
        assert_eq!(report.find("good").unwrap().status, ResultStatus::Applied);
        assert!(dir.path().join("agents/good.md").exists());
    }

    #[tokio::test]
    async fn settings_entry_merges_and_records_baseline() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".claude")).unwrap();
        std::fs::write(dir.path().join(".claude/settings.json"), r#"{"theme":"dark"}"#).unwrap();
        let (executor, store) = executor(dir.path());

        let fragment = r#"{"hooks":{"SessionStart":[{"hooks":[{"type":"command","command":"node $CLAUDE_PROJECT_DIR/.claude/hooks/a.cjs"}]}]}}"#;
        let source = SourceItem::text(
            "node $CLAUDE_PROJECT_DIR/.claude/hooks/a.cjs",
            PortableType::Hook,
            "claude",
            ".claude/settings.json",
            fragment,
        )
        .with_merge_kind(MergeKind::Settings);
        let plan = ReconcilePlan::new(vec![action(ActionKind::Install, &source)]);

        let report = executor.execute(&plan, std::slice::from_ref(&source)).await.unwrap();
        assert_eq!(report.counts.installed, 1);

        let merged: Value =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join(".claude/settings.json")).unwrap()).unwrap();
        assert_eq!(merged["theme"], "dark");
        assert_eq!(merged["hooks"]["SessionStart"].as_array().unwrap().len(), 1);

        let baseline = store.load_metadata().await.unwrap().unwrap().settings_baseline();
        assert_eq!(baseline.hooks.len(), 1);
        assert!(store.load_registry().await.unwrap().entries.is_empty());
    }

    #[tokio::test]
    async fn smart_merge_keeps_user_sections() {
        let dir = TempDir::new().unwrap();
        let current = "## Rules\nkit line\n## Mine\nuser line\n";
        std::fs::write(dir.path().join("RULES.md"), current).unwrap();
        let (executor, _) = executor(dir.path());

        let source = SourceItem::text("rules", PortableType::Rules, "claude", "RULES.md", "## Rules\nkit line v2\n## Mine\nkit default\n")
            .with_owned_sections(vec!["Rules".into()]);
        let mut conflict = action(ActionKind::Conflict, &source);
        conflict.resolution = Some(ConflictResolution::SmartMerge);

        let report = executor.execute(&ReconcilePlan::new(vec![conflict]), &[source]).await.unwrap();
        assert_eq!(report.counts.installed, 1);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("RULES.md")).unwrap(),
            "## Rules\nkit line v2\n## Mine\nuser line\n"
        );
    }

    #[tokio::test]
    async fn smart_merge_of_binary_fails() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("logo.png"), [0x89, b'P', b'N', b'G', 0, 0, 1]).unwrap();
        let (executor, _) = executor(dir.path());
        let source = SourceItem::text("logo", PortableType::Config, "claude", "logo.png", "text now\n")
            .with_merge_kind(MergeKind::Text);
        let mut conflict = action(ActionKind::Conflict, &source);
        conflict.resolution = Some(ConflictResolution::SmartMerge);

        let report = executor.execute(&ReconcilePlan::new(vec![conflict]), &[source]).await.unwrap();
        assert_eq!(report.counts.failed, 1);
        assert!(report.find("logo").unwrap().error.as_deref().unwrap().contains("binary"));
        assert_eq!(std::fs::read(dir.path().join("logo.png")).unwrap(), [0x89, b'P', b'N', b'G', 0, 0, 1]);
    }

    #[tokio::test]
    async fn smart_merge_of_replace_item_fails() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("hooks")).unwrap();
        std::fs::write(dir.path().join("hooks/run.cjs"), "mine\n").unwrap();
        let (executor, _) = executor(dir.path());
        let source = SourceItem::text("run", PortableType::Command, "claude", "hooks/run.cjs", "kit\n");
        assert_eq!(source.merge_kind, MergeKind::Replace);
        let mut conflict = action(ActionKind::Conflict, &source);
        conflict.resolution = Some(ConflictResolution::SmartMerge);

        let report = executor.execute(&ReconcilePlan::new(vec![conflict]), &[source]).await.unwrap();
        assert_eq!(report.counts.failed, 1);
        assert!(report.find("run").unwrap().error.as_deref().unwrap().contains("cannot be smart-merged"));
        assert_eq!(std::fs::read_to_string(dir.path().join("hooks/run.cjs")).unwrap(), "mine\n");
    }

    #[tokio::test]
    async fn keep_records_current_checksum() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("agents")).unwrap();
        std::fs::write(dir.path().join("agents/a.md"), "mine\n").unwrap();
        let (executor, store) = executor(dir.path());

        let source = SourceItem::text("a", PortableType::Agent, "claude", "agents/a.md", "kit\n");
        let mut conflict = action(ActionKind::Conflict, &source);
        conflict.current_target_checksum = Some(ContentHash::compute(b"mine\n"));
        conflict.resolution = Some(ConflictResolution::Keep);

        let report = executor.execute(&ReconcilePlan::new(vec![conflict]), std::slice::from_ref(&source)).await.unwrap();
        assert_eq!(report.counts.skipped, 1);
        assert_eq!(std::fs::read_to_string(dir.path().join("agents/a.md")).unwrap(), "mine\n");

        let entry = store.load_registry().await.unwrap().find(&source.key()).cloned().unwrap();
        assert_eq!(entry.source_checksum, source.checksum);
        assert_eq!(entry.target_checksum, Some(ContentHash::compute(b"mine\n")));
    }

    #[tokio::test]
    async fn keep_on_migration_moves_user_file() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("commands")).unwrap();
        std::fs::write(dir.path().join("commands/old.md"), "edited\n").unwrap();
        let (executor, _) = executor(dir.path());

        let source = SourceItem::text("review", PortableType::Command, "claude", "commands/new.md", "kit\n");
        let mut conflict = action(ActionKind::Conflict, &source);
        conflict.previous_path = Some("commands/old.md".into());
        conflict.cleanup_paths = vec!["commands/old.md".into()];
        conflict.resolution = Some(ConflictResolution::Keep);

        executor.execute(&ReconcilePlan::new(vec![conflict]), &[source]).await.unwrap();
        assert!(!dir.path().join("commands/old.md").exists());
        assert_eq!(std::fs::read_to_string(dir.path().join("commands/new.md")).unwrap(), "edited\n");
    }

    #[tokio::test]
    async fn relocation_install_removes_old_path() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.md"), "body\n").unwrap();
        let (executor, _) = executor(dir.path());

        let source = SourceItem::text("b", PortableType::Rules, "claude", "b.md", "body\n");
        let mut install = action(ActionKind::Install, &source);
        install.previous_path = Some("a.md".into());
        install.cleanup_paths = vec!["a.md".into()];

        executor.execute(&ReconcilePlan::new(vec![install]), &[source]).await.unwrap();
        assert!(!dir.path().join("a.md").exists());
        assert!(dir.path().join("b.md").exists());
    }

    #[tokio::test]
    async fn delete_removes_target_and_entry() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("agents")).unwrap();
        std::fs::write(dir.path().join("agents/old.md"), "x").unwrap();
        let (executor, store) = executor(dir.path());

        let orphan = SourceItem::text("old", PortableType::Agent, "claude", "agents/old.md", "x");
        let mut registry = PortableRegistry::default();
        registry.upsert(PortableRegistryEntry::new("old", PortableType::Agent, "claude", "agents/old.md", orphan.checksum));
        store.save_registry(&registry).await.unwrap();

        let report = executor
            .execute(&ReconcilePlan::new(vec![action(ActionKind::Delete, &orphan)]), &[])
            .await
            .unwrap();
        assert_eq!(report.counts.installed, 1);
        assert!(!dir.path().join("agents/old.md").exists());
        assert!(store.load_registry().await.unwrap().entries.is_empty());
    }

    #[tokio::test]
    async fn directory_install_copies_tree() {
        let dir = TempDir::new().unwrap();
        let kit = TempDir::new().unwrap();
        std::fs::create_dir_all(kit.path().join("demo/scripts")).unwrap();
        std::fs::write(kit.path().join("demo/SKILL.md"), "skill").unwrap();
        std::fs::write(kit.path().join("demo/scripts/run.sh"), "echo").unwrap();
        let (executor, _) = executor(dir.path());

        let checksum = ContentHash::compute_directory(kit.path().join("demo")).unwrap();
        let source = SourceItem::new("demo", PortableType::Skill, "claude", "skills/demo", checksum)
            .with_merge_kind(MergeKind::Directory)
            .with_source_path(kit.path().join("demo"));

        let report = executor
            .execute(&ReconcilePlan::new(vec![action(ActionKind::Install, &source)]), &[source])
            .await
            .unwrap();
        assert_eq!(report.counts.installed, 1);
        assert_eq!(
            ContentHash::compute_directory(dir.path().join("skills/demo")).unwrap(),
            checksum
        );
    }

    #[tokio::test]
    async fn report_serializes_camel_case() {
        let mut report = ExecutionReport::default();
        let source = SourceItem::text("a", PortableType::Agent, "claude", "agents/a.md", "a");
        report.record(ExecutionResultEntry::new(&action(ActionKind::Install, &source), ResultStatus::Applied));
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["counts"]["installed"], 1);
        assert_eq!(json["results"][0]["targetPath"], "agents/a.md");
        assert_eq!(json["results"][0]["status"], "applied");
    }
}
