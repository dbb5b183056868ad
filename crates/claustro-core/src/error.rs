//! Error types for `claustro-core`.
//!
//! Two disjoint families: [`StoreError`] is resolved synchronously, before
//! any optimistic in-memory change is applied. [`WriteError`] only ever
//! arises at the remote boundary and is converted by the stores into a typed
//! outcome (see [`crate::outcome`]); it never propagates as a raw failure.

use thiserror::Error;

/// Failures detected locally, ahead of the remote boundary.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
  #[error("validation failed: {0}")]
  Validation(String),

  #[error("another record already uses the identity key {0:?}")]
  Conflict(String),

  #[error("protected record: {0}")]
  ProtectedRecord(String),

  #[error("record not found: {0}")]
  NotFound(String),
}

/// Failures reported by the remote document store.
///
/// Permission denials carry their own variant so callers can surface an
/// actionable message (security rules) instead of a generic outage notice.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WriteError {
  #[error("permission denied by the remote store: {0}")]
  PermissionDenied(String),

  #[error("remote store unavailable: {0}")]
  Unavailable(String),
}

pub type Result<T, E = StoreError> = std::result::Result<T, E>;
