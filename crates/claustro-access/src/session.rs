//! [`Session`] — one signed-in lifetime of the directory.
//!
//! Constructed once at startup, owns the stores, the sync adapters, and a
//! controller task that re-resolves access whenever the authenticated
//! identity or the roster changes, publishing the result on a `watch`
//! channel. Torn down on logout.

use std::sync::Arc;

use tokio::{sync::watch, task::JoinHandle};

use claustro_core::{
  auth::AuthProvider, document::DocumentStore, outcome::MutationOutcome,
  settings::DirectorySettings,
};
use claustro_store::{ActivityStore, RosterStore, SyncAdapter};

use crate::{
  gate::IdentityGate,
  resolver::{AccessState, resolve_access},
};

pub struct Session<A: AuthProvider + 'static, D: DocumentStore + 'static> {
  gate:       Arc<IdentityGate<A>>,
  roster:     Arc<RosterStore<D>>,
  activities: Arc<ActivityStore<D>>,
  access:     watch::Receiver<AccessState>,
  adapters:   Vec<SyncAdapter>,
  controller: JoinHandle<()>,
}

impl<A: AuthProvider + 'static, D: DocumentStore + 'static> Session<A, D> {
  /// Wire up stores, sync adapters, and the access controller.
  ///
  /// `remote: None` (no document store configured) still produces a working
  /// session: stores report degraded writes and the roster counts as
  /// loaded, so access resolution terminates instead of staying pending.
  pub fn start(
    provider: Arc<A>,
    remote: Option<Arc<D>>,
    settings: DirectorySettings,
  ) -> Self {
    let gate = Arc::new(IdentityGate::new(
      provider,
      &settings.required_email_domain,
    ));
    let roster =
      Arc::new(RosterStore::new(remote.clone(), settings.clone()));
    let activities = Arc::new(ActivityStore::new(remote.clone()));

    let mut adapters = Vec::new();
    if let Some(remote) = &remote {
      adapters.push(SyncAdapter::spawn_roster(roster.clone(), remote.clone()));
      adapters
        .push(SyncAdapter::spawn_activities(activities.clone(), remote.clone()));
    }

    let (access_tx, access) = watch::channel(AccessState::SignedOut);
    let controller = tokio::spawn(run_controller(
      gate.clone(),
      roster.clone(),
      settings,
      access_tx,
    ));

    Self { gate, roster, activities, access, adapters, controller }
  }

  pub fn gate(&self) -> &IdentityGate<A> {
    &self.gate
  }

  pub fn roster(&self) -> &Arc<RosterStore<D>> {
    &self.roster
  }

  pub fn activities(&self) -> &Arc<ActivityStore<D>> {
    &self.activities
  }

  /// Observable access state. Carries the current value at registration.
  pub fn access(&self) -> watch::Receiver<AccessState> {
    self.access.clone()
  }

  /// Tear the session down: stop the sync loops and the controller, then
  /// terminate the provider-level session.
  pub async fn shutdown(self) {
    for adapter in self.adapters {
      adapter.shutdown();
    }
    self.controller.abort();
    self.gate.sign_out().await;
  }
}

/// Re-resolve on every identity or roster transition; publish only actual
/// state changes. Rejection terminates the provider session so the
/// provider cannot silently re-authenticate a rejected identity; admission
/// schedules the external-ref backfill without blocking.
async fn run_controller<A, D>(
  gate: Arc<IdentityGate<A>>,
  roster: Arc<RosterStore<D>>,
  settings: DirectorySettings,
  access: watch::Sender<AccessState>,
) where
  A: AuthProvider + 'static,
  D: DocumentStore + 'static,
{
  let mut identities = gate.watch();
  let mut loaded = roster.loaded();
  let mut changes = roster.changes();

  loop {
    let identity = identities.borrow_and_update().clone();
    let roster_loaded = *loaded.borrow_and_update();
    // The roster is read directly below; mark its channel seen first so a
    // concurrent snapshot re-runs the loop.
    let _ = changes.borrow_and_update();

    let matched = identity
      .as_ref()
      .and_then(|i| roster.find_for_login(&i.email, &i.subject_id));
    let next = resolve_access(
      &settings,
      identity.as_ref(),
      roster_loaded,
      matched.as_ref(),
    );

    let transitioned = access.send_if_modified(|current| {
      if *current == next {
        false
      } else {
        *current = next.clone();
        true
      }
    });

    if transitioned {
      match &next {
        AccessState::Rejected(reason) => {
          tracing::info!(%reason, "access rejected, terminating provider session");
          gate.sign_out().await;
        }
        AccessState::Admitted(profile) => {
          tracing::info!(
            user = %profile.email,
            role = profile.role.as_str(),
            "access admitted"
          );
          if let Some(record) = &matched
            && record.external_identity_ref.is_none()
          {
            spawn_backfill(
              roster.clone(),
              profile.record_id.clone(),
              profile.subject_id.clone(),
            );
          }
        }
        AccessState::SignedOut | AccessState::Pending => {}
      }
    }

    tokio::select! {
      changed = identities.changed() => if changed.is_err() { return; },
      changed = loaded.changed() => if changed.is_err() { return; },
      changed = changes.changed() => if changed.is_err() { return; },
    }
  }
}

/// Fire-and-forget write of the provider subject id onto the matched
/// record. Failure only costs the next login a key lookup by email.
fn spawn_backfill<D: DocumentStore + 'static>(
  roster: Arc<RosterStore<D>>,
  record_id: String,
  subject_id: String,
) {
  tokio::spawn(async move {
    match roster.backfill_external_ref(&record_id, &subject_id).await {
      Ok(MutationOutcome::Confirmed) => {
        tracing::debug!(id = %record_id, "external identity ref backfilled");
      }
      Ok(MutationOutcome::Degraded(error)) => {
        tracing::warn!(id = %record_id, %error, "external ref backfill not confirmed");
      }
      Err(error) => {
        tracing::warn!(id = %record_id, %error, "external ref backfill failed");
      }
    }
  });
}
