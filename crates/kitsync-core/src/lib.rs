//! kitsync Core - reconcile planning
//!
//! The pure half of kitsync:
//! - Models source items, the portable registry and target snapshots
//! - Filters manifest evolution entries by release window
//! - Plans install/update/skip/conflict/delete actions per item
//! - Classifies failures for exit signaling
//!
//! # Example
//!
//! ```rust,ignore
//! use kitsync_core::{reconcile, ConflictResolution, ReconcileInput};
//!
//! let input = ReconcileInput::new(&sources, &registry, &snapshot)
//!     .with_manifest(&manifest)
//!     .with_tracked(&metadata);
//! let plan = reconcile(&input)?;
//!
//! let plan = plan.resolve_all(&ConflictResolution::Keep);
//! println!("{} to install", plan.summary.install);
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod engine;
pub mod error;
pub mod manifest;
pub mod outcome;
pub mod plan;
pub mod types;

pub use engine::{reconcile, ReconcileInput};
pub use error::{ErrorKind, ManifestError, ReconcileError, RegistryError};
pub use manifest::{
    applicable_entries, parse_version, Applicable, DroppedEntry, ManifestEvolution, PathMigration,
    PortableManifest, RenameEntry, SectionRename, Versioned, MANIFEST_VERSION,
};
pub use outcome::Outcome;
pub use plan::{
    ActionKind, ConflictResolution, PlanSummary, ReasonCode, ReconcileAction, ReconcilePlan,
};
pub use types::{
    ItemKey, PortableRegistry, PortableRegistryEntry, PortableType, SourceItem, TargetSnapshot,
    TargetState, REGISTRY_VERSION,
};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for planning
    pub use crate::{
        reconcile, ActionKind, ConflictResolution, PortableManifest, PortableRegistry,
        PortableType, ReconcileInput, ReconcilePlan, SourceItem, TargetSnapshot, TargetState,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod integration_tests {
    use super::*;

    #[test]
    fn second_reconcile_after_apply_is_all_skip() {
        let sources = vec![
            SourceItem::text("planner", PortableType::Agent, "claude", "agents/planner.md", "# Planner\n"),
            SourceItem::text("review", PortableType::Command, "claude", "commands/review.md", "review\n"),
        ];
        let first = reconcile(&ReconcileInput::new(
            &sources,
            &PortableRegistry::default(),
            &TargetSnapshot::new(),
        ))
        .unwrap();
        assert_eq!(first.summary.install, 2);

        // what an executor records after writing every source verbatim
        let mut registry = PortableRegistry::default();
        let mut target = TargetSnapshot::new();
        for source in &sources {
            registry.upsert(
                PortableRegistryEntry::new(
                    source.item.clone(),
                    source.item_type,
                    source.provider.clone(),
                    source.target_path.clone(),
                    source.checksum,
                )
                .with_target_checksum(source.checksum),
            );
            target.insert(source.target_path.clone(), TargetState::file(source.checksum));
        }

        let second = reconcile(&ReconcileInput::new(&sources, &registry, &target)).unwrap();
        assert!(second.is_noop());
        assert_eq!(second.summary.skip, 2);
        assert_eq!(Outcome::for_plan(&second), Outcome::Completed);
    }
}
