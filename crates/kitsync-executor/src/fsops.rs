//! Filesystem primitives for the executor
//!
//! Writes land through a temp file and a rename, so a crash leaves either
//! the old or the new bytes. Every path touched by an action is backed up
//! first; [`ActionBackup::restore`] puts the tree back the way it was.

use crate::error::ExecutorError;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;
use walkdir::WalkDir;

/// Write bytes atomically, creating parent directories
///
/// # Errors
/// Returns [`ExecutorError::Io`] if any step fails; the temp file is removed
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ExecutorError> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)
        .await
        .map_err(|e| ExecutorError::io_error(parent, e))?;

    let name = path.file_name().map_or_else(|| "file".into(), |n| n.to_string_lossy());
    let tmp = parent.join(format!(".{name}.{}.tmp", Uuid::new_v4().simple()));

    let written = async {
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        fs::rename(&tmp, path).await
    }
    .await;

    if let Err(e) = written {
        let _ = fs::remove_file(&tmp).await;
        return Err(ExecutorError::io_error(path, e));
    }
    Ok(())
}

/// Remove a file or directory tree; missing paths are not an error
///
/// # Errors
/// Returns [`ExecutorError::Io`] if removal fails
pub async fn remove_path(path: &Path) -> Result<(), ExecutorError> {
    let metadata = match fs::symlink_metadata(path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(ExecutorError::io_error(path, e)),
    };
    let removed = if metadata.is_dir() {
        fs::remove_dir_all(path).await
    } else {
        fs::remove_file(path).await
    };
    removed.map_err(|e| ExecutorError::io_error(path, e))
}

/// Copy a directory tree, replacing nothing outside `to`
///
/// # Errors
/// Returns [`ExecutorError::Io`] for walk or copy failures
pub async fn copy_tree(from: &Path, to: &Path) -> Result<(), ExecutorError> {
    let from = from.to_path_buf();
    let to = to.to_path_buf();
    tokio::task::spawn_blocking(move || copy_tree_blocking(&from, &to))
        .await
        .map_err(|e| ExecutorError::Join(e.to_string()))?
}

fn copy_tree_blocking(from: &Path, to: &Path) -> Result<(), ExecutorError> {
    for entry in WalkDir::new(from).follow_links(false) {
        let entry = entry.map_err(|e| {
            let path = e.path().map_or_else(|| from.to_path_buf(), Path::to_path_buf);
            ExecutorError::io_error(path, std::io::Error::other(e.to_string()))
        })?;
        let rel = entry.path().strip_prefix(from).unwrap_or(entry.path());
        let dest = to.join(rel);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&dest).map_err(|e| ExecutorError::io_error(&dest, e))?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent).map_err(|e| ExecutorError::io_error(parent, e))?;
            }
            std::fs::copy(entry.path(), &dest).map_err(|e| ExecutorError::io_error(&dest, e))?;
        }
    }
    Ok(())
}

/// Saved state of one path before an action touched it
#[derive(Debug, Clone)]
struct Saved {
    original: PathBuf,
    /// `None` when the path did not exist
    copy: Option<PathBuf>,
}

/// Backups taken for a single action
#[derive(Debug)]
pub struct ActionBackup {
    dir: PathBuf,
    saved: Vec<Saved>,
}

impl ActionBackup {
    /// Start a backup set under `run_dir`
    #[must_use]
    pub fn new(run_dir: &Path) -> Self {
        Self {
            dir: run_dir.join(Uuid::new_v4().simple().to_string()),
            saved: Vec::new(),
        }
    }

    /// Snapshot `path` before it is modified
    ///
    /// Saving the same path twice keeps the first snapshot.
    ///
    /// # Errors
    /// Returns [`ExecutorError::Io`] if the copy fails
    pub async fn save(&mut self, path: &Path) -> Result<(), ExecutorError> {
        if self.saved.iter().any(|s| s.original == path) {
            return Ok(());
        }
        let metadata = match fs::symlink_metadata(path).await {
            Ok(metadata) => Some(metadata),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(ExecutorError::io_error(path, e)),
        };
        let copy = match metadata {
            None => None,
            Some(metadata) => {
                let copy = self.dir.join(self.saved.len().to_string());
                if metadata.is_dir() {
                    copy_tree(path, &copy).await?;
                } else {
                    fs::create_dir_all(&self.dir)
                        .await
                        .map_err(|e| ExecutorError::io_error(&self.dir, e))?;
                    fs::copy(path, &copy)
                        .await
                        .map_err(|e| ExecutorError::io_error(&copy, e))?;
                }
                Some(copy)
            }
        };
        self.saved.push(Saved {
            original: path.to_path_buf(),
            copy,
        });
        Ok(())
    }

    /// Put every saved path back, newest first
    ///
    /// # Errors
    /// Returns [`ExecutorError::RollbackFailed`] naming the first path that
    /// could not be restored
    pub async fn restore(&self) -> Result<(), ExecutorError> {
        for saved in self.saved.iter().rev() {
            Self::restore_one(saved)
                .await
                .map_err(|e| ExecutorError::RollbackFailed {
                    path: saved.original.clone(),
                    message: e.to_string(),
                })?;
            debug!(path = %saved.original.display(), "restored from backup");
        }
        Ok(())
    }

    async fn restore_one(saved: &Saved) -> Result<(), ExecutorError> {
        remove_path(&saved.original).await?;
        let Some(copy) = &saved.copy else {
            return Ok(());
        };
        let is_dir = fs::metadata(copy)
            .await
            .map_err(|e| ExecutorError::io_error(copy, e))?
            .is_dir();
        if is_dir {
            copy_tree(copy, &saved.original).await
        } else {
            let bytes = fs::read(copy).await.map_err(|e| ExecutorError::io_error(copy, e))?;
            write_atomic(&saved.original, &bytes).await
        }
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.saved.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn write_atomic_creates_parents_and_leaves_no_temp() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a/b/c.md");
        write_atomic(&path, b"hello").await.unwrap();
        write_atomic(&path, b"again").await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"again");
        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn restore_undoes_modify_create_and_delete() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        let edited = root.join("edited.md");
        let created = root.join("created.md");
        let deleted = root.join("skills/demo");
        std::fs::write(&edited, "before").unwrap();
        std::fs::create_dir_all(&deleted).unwrap();
        std::fs::write(deleted.join("SKILL.md"), "skill").unwrap();

        let mut backup = ActionBackup::new(&root.join(".backup"));
        backup.save(&edited).await.unwrap();
        backup.save(&created).await.unwrap();
        backup.save(&deleted).await.unwrap();

        write_atomic(&edited, b"after").await.unwrap();
        write_atomic(&created, b"new").await.unwrap();
        remove_path(&deleted).await.unwrap();

        backup.restore().await.unwrap();
        assert_eq!(std::fs::read_to_string(&edited).unwrap(), "before");
        assert!(!created.exists());
        assert_eq!(std::fs::read_to_string(deleted.join("SKILL.md")).unwrap(), "skill");
    }

    #[tokio::test]
    async fn remove_missing_path_is_ok() {
        let dir = TempDir::new().unwrap();
        remove_path(&dir.path().join("nope")).await.unwrap();
    }
}
