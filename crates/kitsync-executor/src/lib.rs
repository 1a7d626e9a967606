//! kitsync Executor
//!
//! The only component that touches the target tree.
//!
//! # Core Operations
//!
//! - **Scan**: hash target paths into a [`kitsync_core::TargetSnapshot`]
//! - **Execute**: apply a resolved plan with per-action backup and rollback
//! - **Persist**: load and save the registry and tracking metadata
//!
//! # Architecture
//!
//! ```text
//! TargetScanner → TargetSnapshot → reconcile() → ReconcilePlan → Executor → target tree
//!      ↑___________↓                                                 ↓
//!       ChecksumCache                                   RegistryStore (under RegistryLock)
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use kitsync_executor::{paths_of_interest, CancelFlag, Executor, ExecutorConfig, JsonRegistryStore, TargetScanner};
//!
//! let config = ExecutorConfig::from_toml_str(&config_toml)?;
//! let store = Arc::new(JsonRegistryStore::new(root.join(".kitsync")));
//! let registry = store.load_registry().await?;
//!
//! let scanner = TargetScanner::new(&root, &config)?;
//! let snapshot = scanner.scan(paths_of_interest(&sources, &registry), &CancelFlag::new()).await?;
//! let plan = reconcile(&ReconcileInput::new(&sources, &registry, &snapshot))?;
//!
//! let report = Executor::new(&root, store, config).execute(&plan, &sources).await?;
//! std::process::exit(report.outcome().exit_code());
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

// Core modules
pub mod cache;
pub mod config;
pub mod error;
pub mod executor;
pub mod fsops;
pub mod lock;
pub mod scan;
pub mod store;

// Re-exports for convenience
pub use cache::{CacheKey, ChecksumCache};
pub use config::{ExecutorConfig, LOCK_FILE};
pub use error::{ConfigError, ExecutorError, LockError, ScanError, StoreError};
pub use executor::{ExecutionCounts, ExecutionReport, ExecutionResultEntry, Executor, ResultStatus};
pub use lock::RegistryLock;
pub use scan::{paths_of_interest, CancelFlag, TargetScanner};
pub use store::{JsonRegistryStore, RegistryStore, METADATA_FILE, REGISTRY_FILE};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for applying plans
    pub use crate::{
        paths_of_interest, CancelFlag, ExecutionReport, Executor, ExecutorConfig, JsonRegistryStore,
        RegistryStore, TargetScanner,
    };
}

#[cfg(test)]
mod integration_tests {
    use super::*;
    use kitsync_core::{reconcile, ActionKind, PortableType, ReconcileInput, SourceItem};
    use std::sync::Arc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn scan_reconcile_execute_converges() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        let config = ExecutorConfig::default().with_current_version("1.0.0");
        let store = Arc::new(JsonRegistryStore::new(root.join(".kitsync")));
        let scanner = TargetScanner::new(root, &config).unwrap();
        let executor = Executor::new(root, store.clone(), config).with_cache(scanner.cache().clone());

        let sources = vec![
            SourceItem::text("planner", PortableType::Agent, "claude", "agents/planner.md", "# Planner\n"),
            SourceItem::text("review", PortableType::Command, "claude", "commands/review.md", "Review it\n"),
        ];

        let registry = store.load_registry().await.unwrap();
        let snapshot = scanner
            .scan(paths_of_interest(&sources, &registry), &CancelFlag::new())
            .await
            .unwrap();
        let plan = reconcile(&ReconcileInput::new(&sources, &registry, &snapshot)).unwrap();
        assert_eq!(plan.summary.install, 2);

        let report = executor.execute(&plan, &sources).await.unwrap();
        assert_eq!(report.counts.installed, 2);

        let registry = store.load_registry().await.unwrap();
        let snapshot = scanner
            .scan(paths_of_interest(&sources, &registry), &CancelFlag::new())
            .await
            .unwrap();
        let metadata = store.load_metadata().await.unwrap().unwrap();
        let plan = reconcile(&ReconcileInput::new(&sources, &registry, &snapshot).with_tracked(&metadata)).unwrap();
        assert!(plan.actions.iter().all(|a| a.action == ActionKind::Skip));
    }
}
