//! [`SyncAdapter`] — feeds remote snapshots into the stores.
//!
//! One adapter per collection, owning a spawned task that drains the live
//! subscription. Every data snapshot replaces the store's in-memory list
//! wholesale (the remote store is the source of truth once connected); a
//! subscription error is fatal-until-reconfigured, leaving the last
//! known-good state in place.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;

use claustro_core::document::{DocumentStore, OrderBy, SnapshotEvent};

use crate::{
  ACTIVITIES_COLLECTION, ROSTER_COLLECTION,
  activity::ActivityStore,
  roster::RosterStore,
};

/// Health of a live subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
  /// Subscription requested; no snapshot yet.
  Connecting,
  /// Receiving snapshots.
  Live { last_update: DateTime<Utc> },
  /// Subscription failed or never configured. Data may be stale.
  Failed { reason: String },
}

impl SyncStatus {
  pub fn is_live(&self) -> bool {
    matches!(self, Self::Live { .. })
  }
}

/// Handle to one running snapshot loop. Dropping it (or calling
/// [`SyncAdapter::shutdown`]) tears the subscription down; writes already
/// in flight on the store complete independently.
pub struct SyncAdapter {
  task: JoinHandle<()>,
}

impl SyncAdapter {
  /// Subscribe the roster store to the remote user collection, ordered by
  /// name ascending.
  pub fn spawn_roster<D>(
    store: Arc<RosterStore<D>>,
    remote: Arc<D>,
  ) -> Self
  where
    D: DocumentStore + 'static,
  {
    let mut sub =
      remote.subscribe(ROSTER_COLLECTION, OrderBy::ascending("name"));
    let task = tokio::spawn(async move {
      while let Some(event) = sub.next().await {
        match event {
          SnapshotEvent::Data(docs) => store.apply_snapshot(docs),
          SnapshotEvent::Error(reason) => {
            store.mark_sync_failed(&reason);
            return;
          }
        }
      }
    });
    Self { task }
  }

  /// Subscribe the activity store to the remote activity collection,
  /// ordered by due date descending.
  pub fn spawn_activities<D>(
    store: Arc<ActivityStore<D>>,
    remote: Arc<D>,
  ) -> Self
  where
    D: DocumentStore + 'static,
  {
    let mut sub =
      remote.subscribe(ACTIVITIES_COLLECTION, OrderBy::descending("dueDate"));
    let task = tokio::spawn(async move {
      while let Some(event) = sub.next().await {
        match event {
          SnapshotEvent::Data(docs) => store.apply_snapshot(docs),
          SnapshotEvent::Error(reason) => {
            store.mark_sync_failed(&reason);
            return;
          }
        }
      }
    });
    Self { task }
  }

  pub fn shutdown(self) {
    self.task.abort();
  }
}

impl Drop for SyncAdapter {
  fn drop(&mut self) {
    self.task.abort();
  }
}
