//! Relative path validation for target-tree writes
//!
//! Provides [`PathGuard`], which every relative path used by the reconciler
//! and executor must pass before it is joined onto the target root.

use std::io;
use std::path::{Component, Path, PathBuf};

/// Maximum accepted length of a relative path, in characters
pub const MAX_PATH_LEN: usize = 1024;

/// Validator anchored at a base directory
///
/// # Invariants
/// A path returned by [`PathGuard::validate`] is `base` joined with a
/// relative, traversal-free path whose deepest existing ancestor resolves
/// inside `base`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathGuard {
    base: PathBuf,
}

impl PathGuard {
    /// Create guard for a base directory
    #[inline]
    #[must_use]
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// Base directory
    #[inline]
    #[must_use]
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Validate a relative path and return its absolute form
    ///
    /// # Errors
    /// - [`PathError::Empty`] for empty or whitespace-only input
    /// - [`PathError::NullByte`] for embedded NUL
    /// - [`PathError::TooLong`] above [`MAX_PATH_LEN`]
    /// - [`PathError::Absolute`] for rooted or drive-prefixed input
    /// - [`PathError::Traversal`] for any `..` segment
    /// - [`PathError::SymlinkEscape`] when an existing ancestor resolves outside the base
    pub fn validate(&self, relative: &str) -> Result<PathBuf, PathError> {
        check_relative(relative)?;
        let joined = self.base.join(relative);
        self.check_resolution(&joined, relative)?;
        Ok(joined)
    }

    /// Validate then strip back to the normalized relative form (`/` separators)
    ///
    /// # Errors
    /// Same as [`PathGuard::validate`]
    pub fn normalize(&self, relative: &str) -> Result<String, PathError> {
        self.validate(relative)?;
        Ok(normalize_separators(relative))
    }

    fn check_resolution(&self, joined: &Path, relative: &str) -> Result<(), PathError> {
        // Nothing on disk yet means nothing can redirect the write.
        let Ok(real_base) = self.base.canonicalize() else {
            return Ok(());
        };

        let mut probe = joined.to_path_buf();
        loop {
            match probe.symlink_metadata() {
                Ok(_) => break,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    if !probe.pop() {
                        return Ok(());
                    }
                }
                Err(e) => {
                    return Err(PathError::Io {
                        path: relative.to_string(),
                        source: e,
                    })
                }
            }
        }

        let resolved = match probe.canonicalize() {
            Ok(p) => p,
            // Dangling symlink: resolve its target by hand.
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let target = std::fs::read_link(&probe).map_err(|source| PathError::Io {
                    path: relative.to_string(),
                    source,
                })?;
                let anchor = probe.parent().map_or_else(|| real_base.clone(), Path::to_path_buf);
                lexical_normalize(&anchor.join(target))
            }
            Err(source) => {
                return Err(PathError::Io {
                    path: relative.to_string(),
                    source,
                })
            }
        };

        if resolved.starts_with(&real_base) {
            Ok(())
        } else {
            Err(PathError::SymlinkEscape {
                path: relative.to_string(),
                resolved,
            })
        }
    }
}

/// Syntactic checks that need no filesystem access
///
/// # Errors
/// See [`PathGuard::validate`]
pub fn check_relative(relative: &str) -> Result<(), PathError> {
    if relative.trim().is_empty() {
        return Err(PathError::Empty);
    }
    if relative.contains('\0') {
        return Err(PathError::NullByte);
    }
    let len = relative.chars().count();
    if len > MAX_PATH_LEN {
        return Err(PathError::TooLong {
            len,
            max: MAX_PATH_LEN,
        });
    }
    if is_absolute_like(relative) {
        return Err(PathError::Absolute(relative.to_string()));
    }
    // Substring match is only a prefilter; the segment walk decides.
    if relative.contains("..")
        && relative
            .split(['/', '\\'])
            .any(|segment| segment.trim() == "..")
    {
        return Err(PathError::Traversal(relative.to_string()));
    }
    if Path::new(relative)
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)))
    {
        return Err(PathError::Traversal(relative.to_string()));
    }
    Ok(())
}

fn is_absolute_like(path: &str) -> bool {
    if path.starts_with('/') || path.starts_with('\\') || Path::new(path).is_absolute() {
        return true;
    }
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

fn normalize_separators(path: &str) -> String {
    path.replace('\\', "/")
        .split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .collect::<Vec<_>>()
        .join("/")
}

fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other),
        }
    }
    out
}

/// Errors related to path validation
#[derive(Debug, thiserror::Error)]
pub enum PathError {
    /// Empty or whitespace-only path
    #[error("path is empty")]
    Empty,

    /// Embedded NUL byte
    #[error("path contains a null byte")]
    NullByte,

    /// Path above the length ceiling
    #[error("path too long: {len} characters (max: {max})")]
    TooLong { len: usize, max: usize },

    /// Absolute path where a relative one is required
    #[error("absolute path not allowed: {0}")]
    Absolute(String),

    /// `..` segment
    #[error("path traversal not allowed: {0}")]
    Traversal(String),

    /// Existing symlink resolves outside the base
    #[error("symlink escapes base directory: {path} -> {}", resolved.display())]
    SymlinkEscape { path: String, resolved: PathBuf },

    /// Filesystem probe failed
    #[error("io error validating {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}
