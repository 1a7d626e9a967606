//! Bounded file loading with binary detection

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Bytes inspected by [`is_binary_file`]
pub const BINARY_SNIFF_LEN: usize = 8192;

/// Loaded file body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "lowercase")]
pub enum FileContent {
    Text(String),
    Binary(Vec<u8>),
}

impl FileContent {
    /// Classify raw bytes
    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        if is_binary_file(&bytes) {
            return Self::Binary(bytes);
        }
        match String::from_utf8(bytes) {
            Ok(text) => Self::Text(text),
            Err(e) => Self::Binary(e.into_bytes()),
        }
    }

    /// Text body, if any
    #[inline]
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(t) => Some(t),
            Self::Binary(_) => None,
        }
    }

    #[inline]
    #[must_use]
    pub fn is_binary(&self) -> bool {
        matches!(self, Self::Binary(_))
    }

    /// Raw bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(t) => t.as_bytes(),
            Self::Binary(b) => b,
        }
    }
}

/// Heuristic binary check over the first [`BINARY_SNIFF_LEN`] bytes
///
/// Any NUL byte, or more than 10% control bytes other than tab, LF and CR,
/// marks the content as binary.
#[must_use]
pub fn is_binary_file(bytes: &[u8]) -> bool {
    let sample = &bytes[..bytes.len().min(BINARY_SNIFF_LEN)];
    if sample.is_empty() {
        return false;
    }
    if sample.contains(&0) {
        return true;
    }
    let suspicious = sample
        .iter()
        .filter(|&&b| (b < 0x20 && !matches!(b, b'\t' | b'\n' | b'\r')) || b == 0x7f)
        .count();
    suspicious * 10 > sample.len()
}

/// Read a file no larger than `max_size` bytes
///
/// # Errors
/// Returns [`ContentError`] when the path is missing, not a regular file,
/// larger than `max_size` or unreadable
pub fn load_file_content(path: &Path, max_size: u64) -> Result<FileContent, ContentError> {
    let meta = match std::fs::metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ContentError::NotFound(path.to_path_buf()))
        }
        Err(e) => return Err(ContentError::io(path, e)),
    };
    if !meta.is_file() {
        return Err(ContentError::NotAFile(path.to_path_buf()));
    }
    if meta.len() > max_size {
        return Err(ContentError::TooLarge {
            path: path.to_path_buf(),
            size: meta.len(),
            max: max_size,
        });
    }

    let file = File::open(path).map_err(|e| ContentError::io(path, e))?;
    let mut bytes = Vec::new();
    file.take(max_size.saturating_add(1))
        .read_to_end(&mut bytes)
        .map_err(|e| ContentError::io(path, e))?;
    // grew between stat and read
    if bytes.len() as u64 > max_size {
        return Err(ContentError::TooLarge {
            path: path.to_path_buf(),
            size: bytes.len() as u64,
            max: max_size,
        });
    }
    Ok(FileContent::from_bytes(bytes))
}

/// Errors loading file content
#[derive(Debug, thiserror::Error)]
pub enum ContentError {
    #[error("file not found: {0}")]
    NotFound(PathBuf),

    #[error("not a regular file: {0}")]
    NotAFile(PathBuf),

    #[error("file too large: {path} ({size} bytes, max {max})")]
    TooLarge { path: PathBuf, size: u64, max: u64 },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ContentError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}
