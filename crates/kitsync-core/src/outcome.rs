//! Exit signaling for callers
//!
//! Distinguishes "caller must resolve conflicts" from "execution failed"
//! from "state on disk is corrupt", independent of any transport.

use crate::error::ErrorKind;
use crate::plan::ReconcilePlan;
use serde::{Deserialize, Serialize};

/// Final state of a reconcile or apply call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Outcome {
    /// Everything planned was applied
    Completed,
    /// Non-fatal; the plan needs resolutions before it can run
    UnresolvedConflicts,
    /// Fatal for the run; partial state may have been rolled back
    ExecutionFailed,
    /// Manifest or registry could not be trusted; nothing was touched
    CorruptState,
}

impl Outcome {
    /// Outcome of planning alone
    #[must_use]
    pub fn for_plan(plan: &ReconcilePlan) -> Self {
        if plan.unresolved_conflicts().is_empty() {
            Self::Completed
        } else {
            Self::UnresolvedConflicts
        }
    }

    /// Outcome of a failed call
    #[must_use]
    pub fn for_error(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::Validation => Self::CorruptState,
            ErrorKind::Conflict => Self::UnresolvedConflicts,
            ErrorKind::Io | ErrorKind::RollbackFailure => Self::ExecutionFailed,
        }
    }

    /// Process exit code
    #[must_use]
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Completed => 0,
            Self::ExecutionFailed => 1,
            Self::UnresolvedConflicts => 2,
            Self::CorruptState => 3,
        }
    }
}
