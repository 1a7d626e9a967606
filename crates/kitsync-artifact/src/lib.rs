//! kitsync Artifact Layer
//!
//! Leaf utilities shared by every other kitsync crate.
//!
//! # Core Concepts
//!
//! - [`ContentHash`]: 32-byte SHA-256 digest, streamed for files and directories
//! - [`PathGuard`]: validation of every relative path before it touches disk
//! - [`Ownership`] / [`classify`]: kit-pristine, kit-modified or user-owned
//! - [`TrackedFile`] / [`KitMetadata`]: persisted per-kit tracking records
//!
//! # Example
//!
//! ```rust,ignore
//! use kitsync_artifact::{classify, ContentHash, PathGuard};
//!
//! let guard = PathGuard::new("/home/me/.claude");
//! let target = guard.validate("agents/planner.md")?;
//! let live = ContentHash::compute_file(&target)?;
//! let ownership = classify(metadata.find("agents/planner.md"), Some(&live));
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod hash;
mod ownership;
mod path;
mod tracked;

pub use hash::{ContentHash, HashError};
pub use ownership::{classify, Ownership};
pub use path::{check_relative, PathError, PathGuard, MAX_PATH_LEN};
pub use tracked::{InstalledSettings, KitMetadata, MetadataError, TrackedFile};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod integration_tests {
    use super::*;

    #[test]
    fn tracked_file_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let guard = PathGuard::new(dir.path());
        let target = guard.validate("commands/plan.md").unwrap();
        std::fs::create_dir_all(target.parent().unwrap()).unwrap();
        std::fs::write(&target, "# plan").unwrap();

        let written = ContentHash::compute_file(&target).unwrap();
        let mut metadata = KitMetadata::new("1.0.0");
        metadata.upsert(TrackedFile::new("commands/plan.md", written, "1.0.0"));

        let live = ContentHash::compute_file(&target).unwrap();
        assert_eq!(
            classify(metadata.find("commands/plan.md"), Some(&live)),
            Some(Ownership::Kit)
        );

        std::fs::write(&target, "# plan\nmine").unwrap();
        let live = ContentHash::compute_file(&target).unwrap();
        assert_eq!(
            classify(metadata.find("commands/plan.md"), Some(&live)),
            Some(Ownership::KitModified)
        );
    }
}
