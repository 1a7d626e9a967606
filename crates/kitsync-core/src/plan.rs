//! Reconcile plan and actions
//!
//! A [`ReconcilePlan`] is the contract between planning and execution and
//! the boundary consumed by presentation layers. Plans are values: resolving
//! conflicts produces a new plan.

use crate::types::{ItemKey, PortableType};
use kitsync_artifact::ContentHash;
use kitsync_composition::MergeKind;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// What the executor does with an item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Install,
    Update,
    Skip,
    Conflict,
    Delete,
}

impl ActionKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Install => "install",
            Self::Update => "update",
            Self::Skip => "skip",
            Self::Conflict => "conflict",
            Self::Delete => "delete",
        }
    }

    /// Check if executing the action writes to the target
    #[inline]
    #[must_use]
    pub fn mutates(self) -> bool {
        !matches!(self, Self::Skip)
    }
}

impl Display for ActionKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Machine-readable reason for a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReasonCode {
    NewItem,
    Unchanged,
    SourceChanged,
    UserEdited,
    BothChanged,
    AlreadyCurrent,
    TargetMissing,
    TargetDeleted,
    UserDeleted,
    SettingsEntryPresent,
    UnmanagedIdentical,
    UnmanagedPristine,
    UnmanagedExisting,
    Renamed,
    PathChanged,
    Orphaned,
    OrphanEdited,
    OrphanedSkill,
}

/// Caller decision for a conflict
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ConflictResolution {
    /// Take the source
    Overwrite,
    /// Keep the target as it is
    Keep,
    /// Merge owned sections / settings entries only
    SmartMerge,
    /// Write caller-supplied content verbatim
    Resolved { content: String },
}

/// One planned action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileAction {
    pub action: ActionKind,
    pub item: String,
    #[serde(rename = "type")]
    pub item_type: PortableType,
    pub provider: String,
    pub global: bool,
    pub target_path: String,
    pub merge_kind: MergeKind,
    pub reason: String,
    pub reason_code: ReasonCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_checksum: Option<ContentHash>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registered_source_checksum: Option<ContentHash>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_target_checksum: Option<ContentHash>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registered_target_checksum: Option<ContentHash>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_item: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_path: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cleanup_paths: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owned_sections: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub affected_sections: Vec<String>,
    /// Unified diff, target to source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<ConflictResolution>,
}

impl ReconcileAction {
    /// Identity of the item acted on
    #[must_use]
    pub fn key(&self) -> ItemKey {
        ItemKey {
            provider: self.provider.clone(),
            item_type: self.item_type,
            item: self.item.clone(),
            global: self.global,
        }
    }

    /// Check if this is a conflict still waiting for a decision
    #[inline]
    #[must_use]
    pub fn is_unresolved(&self) -> bool {
        self.action == ActionKind::Conflict && self.resolution.is_none()
    }
}

/// Action counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub install: usize,
    pub update: usize,
    pub skip: usize,
    pub conflict: usize,
    pub delete: usize,
}

impl PlanSummary {
    fn count(actions: &[ReconcileAction]) -> Self {
        let mut summary = Self::default();
        for action in actions {
            match action.action {
                ActionKind::Install => summary.install += 1,
                ActionKind::Update => summary.update += 1,
                ActionKind::Skip => summary.skip += 1,
                ActionKind::Conflict => summary.conflict += 1,
                ActionKind::Delete => summary.delete += 1,
            }
        }
        summary
    }
}

/// Ordered actions with counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcilePlan {
    pub actions: Vec<ReconcileAction>,
    pub summary: PlanSummary,
    pub has_conflicts: bool,
}

impl ReconcilePlan {
    /// Build plan from actions in execution order
    #[must_use]
    pub fn new(actions: Vec<ReconcileAction>) -> Self {
        let summary = PlanSummary::count(&actions);
        Self {
            has_conflicts: summary.conflict > 0,
            summary,
            actions,
        }
    }

    /// Check if nothing would change
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.actions.iter().all(|a| !a.action.mutates())
    }

    /// Conflicts without a resolution
    #[must_use]
    pub fn unresolved_conflicts(&self) -> Vec<&ReconcileAction> {
        self.actions.iter().filter(|a| a.is_unresolved()).collect()
    }

    /// New plan with resolutions chosen per conflict
    ///
    /// Conflicts for which `decide` returns `None` stay unresolved; existing
    /// resolutions are replaced only when `decide` returns one.
    #[must_use]
    pub fn resolve_with<F>(&self, mut decide: F) -> Self
    where
        F: FnMut(&ReconcileAction) -> Option<ConflictResolution>,
    {
        let actions = self
            .actions
            .iter()
            .map(|action| {
                let mut action = action.clone();
                if action.action == ActionKind::Conflict {
                    if let Some(resolution) = decide(&action) {
                        action.resolution = Some(resolution);
                    }
                }
                action
            })
            .collect();
        Self::new(actions)
    }

    /// New plan with one resolution for every unresolved conflict
    #[must_use]
    pub fn resolve_all(&self, resolution: &ConflictResolution) -> Self {
        self.resolve_with(|action| action.resolution.is_none().then(|| resolution.clone()))
    }
}
