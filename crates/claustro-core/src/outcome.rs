//! Typed results of optimistic mutations.
//!
//! Remote-boundary failures never surface as raw errors; they are folded
//! into these outcomes so every mutation attempt ends in exactly one
//! human-readable status.

use std::fmt;

use crate::error::WriteError;

/// Outcome of a mutation whose local effect is kept even when the remote
/// write fails (user records, batch imports).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOutcome {
  /// Applied locally and confirmed by the remote store.
  Confirmed,
  /// Applied locally; the remote write did not succeed. The reason
  /// distinguishes a permission denial from plain unavailability.
  Degraded(WriteError),
}

impl MutationOutcome {
  pub fn is_confirmed(&self) -> bool {
    matches!(self, Self::Confirmed)
  }
}

impl fmt::Display for MutationOutcome {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Confirmed => write!(f, "saved"),
      Self::Degraded(WriteError::PermissionDenied(_)) => {
        write!(f, "saved locally, but the remote store rejected the write; check your security rules")
      }
      Self::Degraded(WriteError::Unavailable(_)) => {
        write!(f, "saved locally; the remote store is unavailable")
      }
    }
  }
}

/// Outcome of an activity status update, which rolls back instead of
/// degrading (the status is visible to several viewers and must not
/// silently diverge from the source of truth).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusUpdate {
  /// Applied locally and confirmed remotely.
  Applied,
  /// The requested status equals the current one; nothing was written.
  Unchanged,
  /// The remote write failed and the local status was restored.
  RolledBack(WriteError),
}

impl fmt::Display for StatusUpdate {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Applied => write!(f, "status updated"),
      Self::Unchanged => write!(f, "status unchanged"),
      Self::RolledBack(WriteError::PermissionDenied(_)) => {
        write!(f, "the update was rejected by the remote store and has been undone")
      }
      Self::RolledBack(WriteError::Unavailable(_)) => {
        write!(f, "the remote store is unavailable; the update has been undone")
      }
    }
  }
}

/// One candidate skipped during a batch import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSkip {
  /// Whatever identifies the candidate to a human (name or email).
  pub label:  String,
  pub reason: String,
}

/// Aggregate result of a one-shot batch import. Local additions are never
/// rolled back; a failed batch write degrades the whole import instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportOutcome {
  /// Ids of the records added to the roster.
  pub added:   Vec<String>,
  pub skipped: Vec<ImportSkip>,
  pub status:  MutationOutcome,
}
