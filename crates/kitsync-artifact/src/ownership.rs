//! Ownership classification of tracked files
//!
//! Every later merge decision is gated on [`Ownership`]: `user` files are
//! never silently overwritten, `ck` files may be auto-updated and
//! `ck-modified` files go through conflict detection.

use crate::hash::ContentHash;
use crate::tracked::TrackedFile;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// Who owns the bytes currently on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Ownership {
    /// Installed by the kit and untouched since
    #[serde(rename = "ck")]
    Kit,

    /// Installed by the kit, edited by the user afterwards
    #[serde(rename = "ck-modified")]
    KitModified,

    /// Not installed by the kit (or no record survives)
    #[serde(rename = "user")]
    User,
}

impl Ownership {
    /// Check if the kit may replace the file without asking
    #[inline]
    #[must_use]
    pub fn is_pristine(self) -> bool {
        matches!(self, Self::Kit)
    }

    /// Stable wire name
    #[inline]
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Kit => "ck",
            Self::KitModified => "ck-modified",
            Self::User => "user",
        }
    }
}

impl Display for Ownership {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a file from its tracking record and live digest
///
/// Returns `None` when the file is absent: ownership is irrelevant and the
/// caller treats the item as not installed.
#[must_use]
pub fn classify(record: Option<&TrackedFile>, current: Option<&ContentHash>) -> Option<Ownership> {
    let current = current?;
    let Some(record) = record else {
        return Some(Ownership::User);
    };
    if record.checksum == *current {
        Some(Ownership::Kit)
    } else {
        Some(Ownership::KitModified)
    }
}
