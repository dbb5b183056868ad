//! [`RosterStore`] — the authoritative in-memory roster of user records.
//!
//! Mutations are optimistic: the in-memory list changes immediately and the
//! remote write follows. A failed remote write **keeps** the local change
//! and reports a degraded outcome — a roster edit made by the sole
//! administrator must not be silently lost, and temporary divergence from
//! the remote store is the accepted cost. Contrast with
//! [`crate::activity::ActivityStore::set_status`], which rolls back.

use std::sync::{Arc, RwLock};

use chrono::Utc;
use serde_json::{Value, json};
use tokio::sync::watch;

use claustro_core::{
  document::{BatchWrite, Document, DocumentStore, server_timestamp},
  error::{StoreError, WriteError},
  identity::IdentityKeySet,
  outcome::{ImportOutcome, ImportSkip, MutationOutcome},
  settings::DirectorySettings,
  user::{Career, Role, UserDraft, UserRecord},
};

use crate::sync::SyncStatus;

/// Remote collection holding user documents.
pub const ROSTER_COLLECTION: &str = "users";

// ─── Filter ──────────────────────────────────────────────────────────────────

/// Parameters for [`RosterStore::filter`].
#[derive(Debug, Clone, Default)]
pub struct RosterFilter {
  /// Case-insensitive match against name, every email, and control number.
  pub search:        Option<String>,
  pub role:          Option<Role>,
  pub career:        Option<Career>,
  pub external_auth: Option<bool>,
}

// ─── Store ───────────────────────────────────────────────────────────────────

struct RosterState {
  records: Vec<UserRecord>,
  /// Identity keys of records deleted locally whose remote deletion may not
  /// have propagated yet. Consulted (and cleared) by the next snapshot so a
  /// stale snapshot cannot resurrect a ghost.
  recently_deleted: IdentityKeySet,
}

pub struct RosterStore<D: DocumentStore> {
  remote:   Option<Arc<D>>,
  settings: DirectorySettings,
  state:    RwLock<RosterState>,
  changes:  watch::Sender<Vec<UserRecord>>,
  sync:     watch::Sender<SyncStatus>,
  loaded:   watch::Sender<bool>,
}

impl<D: DocumentStore> RosterStore<D> {
  /// `remote: None` means the document store is not configured; every
  /// mutation then reports degraded success, and the roster counts as
  /// loaded (empty) so access resolution does not hang.
  pub fn new(remote: Option<Arc<D>>, settings: DirectorySettings) -> Self {
    let unconfigured = remote.is_none();
    let store = Self {
      remote,
      settings,
      state: RwLock::new(RosterState {
        records:          Vec::new(),
        recently_deleted: IdentityKeySet::new(),
      }),
      changes: watch::Sender::new(Vec::new()),
      sync:    watch::Sender::new(SyncStatus::Connecting),
      loaded:  watch::Sender::new(false),
    };
    if unconfigured {
      store.mark_sync_failed("document store not configured");
    }
    store
  }

  pub fn settings(&self) -> &DirectorySettings {
    &self.settings
  }

  // ── Reads ─────────────────────────────────────────────────────────────────

  /// Current records, in server order.
  pub fn records(&self) -> Vec<UserRecord> {
    self.state.read().unwrap().records.clone()
  }

  /// Observable roster contents. Carries the current value at registration.
  pub fn changes(&self) -> watch::Receiver<Vec<UserRecord>> {
    self.changes.subscribe()
  }

  pub fn sync_status(&self) -> watch::Receiver<SyncStatus> {
    self.sync.subscribe()
  }

  /// `true` once the first snapshot has arrived, or once the subscription
  /// has failed (loaded-but-possibly-stale).
  pub fn loaded(&self) -> watch::Receiver<bool> {
    self.loaded.subscribe()
  }

  /// First record whose identity-key set contains the normalized query
  /// value. Keys cover id, control number, every email, and the external
  /// identity reference.
  pub fn find_by_identity_key(&self, query: &str) -> Option<UserRecord> {
    let keys = IdentityKeySet::of_query(query);
    if keys.is_empty() {
      return None;
    }
    self
      .state
      .read()
      .unwrap()
      .records
      .iter()
      .find(|r| r.identity_keys().intersects(&keys))
      .cloned()
  }

  /// Lookup for the login path: matches only emails and the provider
  /// subject id, never control numbers.
  pub fn find_for_login(
    &self,
    email: &str,
    subject_id: &str,
  ) -> Option<UserRecord> {
    let mut keys = IdentityKeySet::new();
    keys.insert_raw(email);
    keys.insert_raw(subject_id);
    if keys.is_empty() {
      return None;
    }
    self
      .state
      .read()
      .unwrap()
      .records
      .iter()
      .find(|r| r.login_keys().intersects(&keys))
      .cloned()
  }

  pub fn filter(&self, filter: &RosterFilter) -> Vec<UserRecord> {
    let needle = filter
      .search
      .as_deref()
      .map(|s| s.trim().to_lowercase())
      .filter(|s| !s.is_empty());

    self
      .state
      .read()
      .unwrap()
      .records
      .iter()
      .filter(|r| {
        if let Some(needle) = &needle {
          let mut haystacks = vec![r.name.to_lowercase()];
          for field in [
            r.potro_email.as_deref(),
            r.institutional_email.as_deref(),
            r.alternate_email.as_deref(),
            r.control_number.as_deref(),
          ]
          .into_iter()
          .flatten()
          {
            haystacks.push(field.to_lowercase());
          }
          if !haystacks.iter().any(|h| h.contains(needle)) {
            return false;
          }
        }
        filter.role.is_none_or(|role| r.role == role)
          && filter.career.is_none_or(|career| r.career == career)
          && filter
            .external_auth
            .is_none_or(|allow| r.allow_external_auth == allow)
      })
      .cloned()
      .collect()
  }

  // ── Mutations ─────────────────────────────────────────────────────────────

  /// Create or update a record. Validation, id derivation, and conflict
  /// detection happen before the optimistic apply; the remote write
  /// follows and can only degrade the outcome, never undo the change.
  pub async fn upsert(
    &self,
    draft: UserDraft,
    actor: &str,
  ) -> Result<(UserRecord, MutationOutcome), StoreError> {
    let draft = draft.normalized();
    draft.validate()?;
    let actor = actor.trim().to_lowercase();

    let (record, is_create) = {
      let mut state = self.state.write().unwrap();

      let editing_idx = draft
        .id
        .as_deref()
        .and_then(|id| state.records.iter().position(|r| r.id == id));
      let previous = editing_idx.map(|i| state.records[i].clone());

      let id = match draft.id.clone() {
        Some(id) => id,
        None => {
          let base = draft.base_id().ok_or_else(|| {
            StoreError::Validation(
              "could not derive an id from the draft".to_string(),
            )
          })?;
          unique_id(&state.records, editing_idx, &base)
        }
      };

      let now = Utc::now();
      let record = UserRecord {
        id,
        name: draft.name.clone(),
        control_number: draft.control_number.clone(),
        potro_email: draft.potro_email.clone(),
        institutional_email: draft.institutional_email.clone(),
        alternate_email: draft.alternate_email.clone(),
        phone: draft.phone.clone(),
        role: draft.role,
        career: draft.career,
        allow_external_auth: draft.allow_external_auth,
        external_identity_ref: previous
          .as_ref()
          .and_then(|p| p.external_identity_ref.clone()),
        created_at: previous
          .as_ref()
          .and_then(|p| p.created_at)
          .or(Some(now)),
        updated_at: Some(now),
        created_by: previous
          .as_ref()
          .and_then(|p| p.created_by.clone())
          .or_else(|| Some(actor.clone())),
        updated_by: Some(actor.clone()),
        imported_at: previous.as_ref().and_then(|p| p.imported_at),
      };

      // The primary administrator can never be demoted.
      if let Some(previous) = &previous {
        if previous
          .login_keys()
          .contains(&self.settings.primary_admin_email)
          && record.role != Role::Administrator
        {
          return Err(StoreError::ProtectedRecord(
            "the primary administrator's role cannot be changed".to_string(),
          ));
        }
      }

      let candidate_keys = record.identity_keys();
      for (idx, other) in state.records.iter().enumerate() {
        if Some(idx) == editing_idx {
          continue;
        }
        let other_keys = other.identity_keys();
        if let Some(shared) =
          candidate_keys.iter().find(|k| other_keys.contains(k))
        {
          return Err(StoreError::Conflict(shared.to_string()));
        }
      }

      match editing_idx {
        Some(idx) => state.records[idx] = record.clone(),
        None => state.records.push(record.clone()),
      }
      sort_records(&mut state.records);
      (record, previous.is_none())
    };
    self.publish();

    let payload = merge_payload(&record, is_create);
    let outcome = self.remote_merge(&record.id, payload).await;
    Ok((record, outcome))
  }

  /// Delete a record. The primary administrator and the caller's own
  /// record are protected. The local removal is kept even when the remote
  /// delete fails; the record's keys go into the deleted-key registry so a
  /// stale snapshot cannot bring it back.
  pub async fn remove(
    &self,
    id: &str,
    caller_email: &str,
  ) -> Result<MutationOutcome, StoreError> {
    let record = {
      let mut state = self.state.write().unwrap();
      let idx = state
        .records
        .iter()
        .position(|r| r.id == id)
        .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
      let record = state.records[idx].clone();

      let login_keys = record.login_keys();
      if login_keys.contains(&self.settings.primary_admin_email) {
        return Err(StoreError::ProtectedRecord(
          "the primary administrator cannot be deleted".to_string(),
        ));
      }
      if login_keys.contains(caller_email) {
        return Err(StoreError::ProtectedRecord(
          "you cannot delete your own account".to_string(),
        ));
      }

      state.records.remove(idx);
      let keys = record.identity_keys();
      state.recently_deleted.extend(&keys);
      record
    };
    self.publish();

    let outcome = match &self.remote {
      None => MutationOutcome::Degraded(unconfigured()),
      Some(remote) => {
        match remote.delete(ROSTER_COLLECTION, &record.id).await {
          Ok(()) => MutationOutcome::Confirmed,
          Err(error) => {
            tracing::warn!(id = %record.id, %error, "roster delete not confirmed remotely");
            MutationOutcome::Degraded(error)
          }
        }
      }
    };
    Ok(outcome)
  }

  /// One-shot batch import. Candidates already on the roster (by primary
  /// email) and the primary administrator are skipped; the rest are added
  /// locally and written remotely as a single batch. A failed batch
  /// degrades the whole import; local additions stay.
  pub async fn import(
    &self,
    candidates: Vec<UserDraft>,
    actor: &str,
  ) -> ImportOutcome {
    let actor = actor.trim().to_lowercase();
    let now = Utc::now();
    let mut added: Vec<UserRecord> = Vec::new();
    let mut skipped: Vec<ImportSkip> = Vec::new();

    {
      let mut state = self.state.write().unwrap();
      for draft in candidates {
        let draft = draft.normalized();
        let label = if draft.name.is_empty() {
          draft
            .potro_email
            .clone()
            .unwrap_or_else(|| "(unnamed)".to_string())
        } else {
          draft.name.clone()
        };

        let Some(email) = draft.potro_email.clone() else {
          skipped.push(ImportSkip {
            label,
            reason: "name and potro email are required".to_string(),
          });
          continue;
        };
        if draft.name.is_empty() {
          skipped.push(ImportSkip {
            label,
            reason: "name and potro email are required".to_string(),
          });
          continue;
        }
        if self.settings.is_primary_admin(&email) {
          skipped.push(ImportSkip {
            label,
            reason: "the primary administrator is never imported".to_string(),
          });
          continue;
        }
        if state
          .records
          .iter()
          .any(|r| r.identity_keys().contains(&email))
        {
          skipped.push(ImportSkip {
            label,
            reason: "already on the roster".to_string(),
          });
          continue;
        }

        let base = match draft.base_id() {
          Some(base) => base,
          None => {
            skipped.push(ImportSkip {
              label,
              reason: "could not derive an id".to_string(),
            });
            continue;
          }
        };
        let id = unique_id(&state.records, None, &base);

        let record = UserRecord {
          id,
          name: draft.name.clone(),
          control_number: draft.control_number.clone(),
          potro_email: draft.potro_email.clone(),
          institutional_email: draft.institutional_email.clone(),
          alternate_email: draft.alternate_email.clone(),
          phone: draft.phone.clone(),
          role: draft.role,
          career: draft.career,
          allow_external_auth: draft.allow_external_auth,
          external_identity_ref: None,
          created_at: Some(now),
          updated_at: Some(now),
          created_by: Some(actor.clone()),
          updated_by: Some(actor.clone()),
          imported_at: Some(now),
        };
        state.records.push(record.clone());
        added.push(record);
      }
      sort_records(&mut state.records);
    }
    self.publish();

    if added.is_empty() {
      return ImportOutcome {
        added: Vec::new(),
        skipped,
        status: MutationOutcome::Confirmed,
      };
    }

    let writes: Vec<BatchWrite> = added
      .iter()
      .map(|record| {
        let mut doc = merge_payload(record, true);
        doc.insert("importedAt".to_string(), server_timestamp());
        BatchWrite {
          collection: ROSTER_COLLECTION.to_string(),
          id:         record.id.clone(),
          doc,
        }
      })
      .collect();

    let status = match &self.remote {
      None => MutationOutcome::Degraded(unconfigured()),
      Some(remote) => match remote.batch_write(writes).await {
        Ok(()) => MutationOutcome::Confirmed,
        Err(error) => {
          tracing::warn!(count = added.len(), %error, "import batch not confirmed remotely");
          MutationOutcome::Degraded(error)
        }
      },
    };

    ImportOutcome {
      added: added.into_iter().map(|r| r.id).collect(),
      skipped,
      status,
    }
  }

  /// Lazily store the provider subject id on a record after its first
  /// successful login match. Cheap no-op when already populated.
  pub async fn backfill_external_ref(
    &self,
    id: &str,
    subject_id: &str,
  ) -> Result<MutationOutcome, StoreError> {
    {
      let mut state = self.state.write().unwrap();
      let idx = state
        .records
        .iter()
        .position(|r| r.id == id)
        .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
      if state.records[idx].external_identity_ref.as_deref()
        == Some(subject_id)
      {
        return Ok(MutationOutcome::Confirmed);
      }
      state.records[idx].external_identity_ref =
        Some(subject_id.to_string());
    }
    self.publish();

    let mut doc = Document::new();
    doc.insert("externalIdentityRef".to_string(), json!(subject_id));
    doc.insert("updatedAt".to_string(), server_timestamp());
    Ok(self.remote_merge(id, doc).await)
  }

  // ── Snapshot reconciliation ───────────────────────────────────────────────

  /// Replace the whole roster with a server snapshot. Records matching the
  /// deleted-key registry are dropped for this one cycle, then the
  /// registry is cleared.
  pub fn apply_snapshot(&self, docs: Vec<(String, Document)>) {
    let mut records: Vec<UserRecord> = docs
      .iter()
      .map(|(id, doc)| UserRecord::from_document(id, doc))
      .collect();
    {
      let mut state = self.state.write().unwrap();
      let tombstones = std::mem::take(&mut state.recently_deleted);
      if !tombstones.is_empty() {
        records.retain(|r| !r.identity_keys().intersects(&tombstones));
      }
      state.records = records;
    }
    self.publish();
    self.loaded.send_replace(true);
    self
      .sync
      .send_replace(SyncStatus::Live { last_update: Utc::now() });
  }

  /// The live subscription failed. Keep the last known-good roster, mark
  /// it loaded-but-stale, and leave reconnection to the caller.
  pub fn mark_sync_failed(&self, reason: &str) {
    tracing::error!(%reason, "roster subscription failed");
    self
      .sync
      .send_replace(SyncStatus::Failed { reason: reason.to_string() });
    self.loaded.send_replace(true);
  }

  // ── Internals ─────────────────────────────────────────────────────────────

  fn publish(&self) {
    let records = self.state.read().unwrap().records.clone();
    self.changes.send_replace(records);
  }

  async fn remote_merge(&self, id: &str, doc: Document) -> MutationOutcome {
    match &self.remote {
      None => MutationOutcome::Degraded(unconfigured()),
      Some(remote) => {
        match remote.set_merge(ROSTER_COLLECTION, id, doc).await {
          Ok(()) => MutationOutcome::Confirmed,
          Err(error) => {
            tracing::warn!(%id, %error, "roster write not confirmed remotely");
            MutationOutcome::Degraded(error)
          }
        }
      }
    }
  }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn unconfigured() -> WriteError {
  WriteError::Unavailable("document store not configured".to_string())
}

/// Local lists mirror the subscription's name ordering so optimistic state
/// and confirmed snapshots render identically.
fn sort_records(records: &mut [UserRecord]) {
  records.sort_by(|a, b| {
    a.name.to_lowercase().cmp(&b.name.to_lowercase())
  });
}

/// Resolve id collisions with a numeric suffix: `base`, `base-2`, `base-3`…
fn unique_id(
  records: &[UserRecord],
  editing_idx: Option<usize>,
  base: &str,
) -> String {
  let taken = |candidate: &str| {
    records.iter().enumerate().any(|(idx, r)| {
      Some(idx) != editing_idx && r.identity_keys().contains(candidate)
    })
  };
  if !taken(base) {
    return base.to_string();
  }
  let mut n = 2u32;
  loop {
    let candidate = format!("{base}-{n}");
    if !taken(&candidate) {
      return candidate;
    }
    n += 1;
  }
}

/// The merge payload for a user document, mirroring the historical field
/// names. Optional fields are written as explicit nulls so an edit can
/// clear them.
fn merge_payload(record: &UserRecord, is_create: bool) -> Document {
  let opt = |value: &Option<String>| match value {
    Some(s) => json!(s),
    None => Value::Null,
  };

  let mut doc = Document::new();
  doc.insert("name".to_string(), json!(record.name));
  doc.insert("controlNumber".to_string(), opt(&record.control_number));
  doc.insert("potroEmail".to_string(), opt(&record.potro_email));
  doc.insert(
    "institutionalEmail".to_string(),
    opt(&record.institutional_email),
  );
  doc.insert("email".to_string(), opt(&record.alternate_email));
  doc.insert("phone".to_string(), opt(&record.phone));
  doc.insert("role".to_string(), json!(record.role.as_str()));
  doc.insert("career".to_string(), json!(record.career.as_str()));
  doc.insert(
    "allowExternalAuth".to_string(),
    json!(record.allow_external_auth),
  );
  if let Some(subject) = &record.external_identity_ref {
    doc.insert("externalIdentityRef".to_string(), json!(subject));
  }
  doc.insert("updatedBy".to_string(), opt(&record.updated_by));
  doc.insert("updatedAt".to_string(), server_timestamp());
  if is_create {
    doc.insert("createdBy".to_string(), opt(&record.created_by));
    doc.insert("createdAt".to_string(), server_timestamp());
  }
  doc
}
