//! [`ActivityStore`] — tracked activities with a status state machine.
//!
//! Same optimistic-mutation shape as the roster, with one deliberate
//! asymmetry: a status update that fails at the remote boundary is rolled
//! back. The status is visible to several viewers at once and must not
//! silently diverge from the source of truth, whereas a roster edit made by
//! the sole administrator is safe to keep locally.

use std::sync::{Arc, RwLock};

use chrono::Utc;
use serde_json::{Value, json};
use tokio::sync::watch;
use uuid::Uuid;

use claustro_core::{
  activity::{ActivityDraft, ActivityRecord, ActivityStatus},
  document::{Document, DocumentStore, server_timestamp},
  error::{StoreError, WriteError},
  identity::IdentityKeySet,
  outcome::{MutationOutcome, StatusUpdate},
  user::{Career, Role},
};

use crate::sync::SyncStatus;

/// Remote collection holding activity documents.
pub const ACTIVITIES_COLLECTION: &str = "activities";

struct ActivityState {
  records: Vec<ActivityRecord>,
  recently_deleted: IdentityKeySet,
}

pub struct ActivityStore<D: DocumentStore> {
  remote:  Option<Arc<D>>,
  state:   RwLock<ActivityState>,
  changes: watch::Sender<Vec<ActivityRecord>>,
  sync:    watch::Sender<SyncStatus>,
  loaded:  watch::Sender<bool>,
}

impl<D: DocumentStore> ActivityStore<D> {
  pub fn new(remote: Option<Arc<D>>) -> Self {
    let unconfigured = remote.is_none();
    let store = Self {
      remote,
      state: RwLock::new(ActivityState {
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

  // ── Reads ─────────────────────────────────────────────────────────────────

  pub fn records(&self) -> Vec<ActivityRecord> {
    self.state.read().unwrap().records.clone()
  }

  pub fn changes(&self) -> watch::Receiver<Vec<ActivityRecord>> {
    self.changes.subscribe()
  }

  pub fn sync_status(&self) -> watch::Receiver<SyncStatus> {
    self.sync.subscribe()
  }

  pub fn loaded(&self) -> watch::Receiver<bool> {
    self.loaded.subscribe()
  }

  pub fn get(&self, id: &str) -> Option<ActivityRecord> {
    self
      .state
      .read()
      .unwrap()
      .records
      .iter()
      .find(|a| a.id == id)
      .cloned()
  }

  /// Activities visible to one user, per the read-side visibility rule.
  pub fn visible_to(
    &self,
    role: Role,
    email: &str,
    career: Career,
  ) -> Vec<ActivityRecord> {
    self
      .state
      .read()
      .unwrap()
      .records
      .iter()
      .filter(|a| a.visible_to(role, email, career))
      .cloned()
      .collect()
  }

  // ── Mutations ─────────────────────────────────────────────────────────────

  /// Create or update an activity (administrator surface). New activities
  /// start pending; edits keep the stored status.
  pub async fn upsert(
    &self,
    draft: ActivityDraft,
    actor: &str,
  ) -> Result<(ActivityRecord, MutationOutcome), StoreError> {
    let draft = draft.normalized();
    draft.validate()?;
    let actor = actor.trim().to_lowercase();

    let (record, is_create) = {
      let mut state = self.state.write().unwrap();
      let editing_idx = draft
        .id
        .as_deref()
        .and_then(|id| state.records.iter().position(|a| a.id == id));
      let previous = editing_idx.map(|i| state.records[i].clone());

      let id = match draft.id.clone() {
        Some(id) => id,
        None => Uuid::new_v4().to_string(),
      };
      let now = Utc::now();
      let record = ActivityRecord {
        id,
        title: draft.title.clone(),
        description: draft.description.clone(),
        due_date: draft.due_date,
        career: draft.career,
        responsible_role: draft.responsible_role,
        responsible_email: draft.responsible_email.clone(),
        responsible_name: draft.responsible_name.clone(),
        status: previous.as_ref().map(|p| p.status).unwrap_or_default(),
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
      };

      match editing_idx {
        Some(idx) => state.records[idx] = record.clone(),
        None => state.records.push(record.clone()),
      }
      sort_activities(&mut state.records);
      (record, previous.is_none())
    };
    self.publish();

    let payload = merge_payload(&record, is_create);
    let outcome = self.remote_merge(&record.id, payload).await;
    Ok((record, outcome))
  }

  /// Delete an activity (administrator surface). Local removal is kept on
  /// remote failure, with the id registered against resurrection.
  pub async fn remove(&self, id: &str) -> Result<MutationOutcome, StoreError> {
    {
      let mut state = self.state.write().unwrap();
      let idx = state
        .records
        .iter()
        .position(|a| a.id == id)
        .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
      let record = state.records.remove(idx);
      state.recently_deleted.insert_raw(&record.id);
    }
    self.publish();

    let outcome = match &self.remote {
      None => MutationOutcome::Degraded(unconfigured()),
      Some(remote) => match remote.delete(ACTIVITIES_COLLECTION, id).await {
        Ok(()) => MutationOutcome::Confirmed,
        Err(error) => {
          tracing::warn!(%id, %error, "activity delete not confirmed remotely");
          MutationOutcome::Degraded(error)
        }
      },
    };
    Ok(outcome)
  }

  /// Update an activity's status on behalf of its assignee.
  ///
  /// Requesting the current status is a no-op with no remote write. On
  /// remote failure the previous status is restored and the caller is told
  /// the update did not take effect.
  pub async fn set_status(
    &self,
    id: &str,
    status: ActivityStatus,
    actor: &str,
  ) -> Result<StatusUpdate, StoreError> {
    let previous = {
      let mut state = self.state.write().unwrap();
      let idx = state
        .records
        .iter()
        .position(|a| a.id == id)
        .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
      let previous = state.records[idx].status;
      if previous == status {
        return Ok(StatusUpdate::Unchanged);
      }
      state.records[idx].status = status;
      state.records[idx].updated_at = Some(Utc::now());
      state.records[idx].updated_by = Some(actor.trim().to_lowercase());
      previous
    };
    self.publish();

    let mut doc = Document::new();
    doc.insert("status".to_string(), json!(status.as_str()));
    doc.insert("updatedBy".to_string(), json!(actor.trim().to_lowercase()));
    doc.insert("updatedAt".to_string(), server_timestamp());

    let error = match &self.remote {
      None => unconfigured(),
      Some(remote) => {
        match remote.set_merge(ACTIVITIES_COLLECTION, id, doc).await {
          Ok(()) => return Ok(StatusUpdate::Applied),
          Err(error) => error,
        }
      }
    };

    // Roll back, tolerating a snapshot or teardown that raced us: only
    // restore if the record still carries the status we set.
    {
      let mut state = self.state.write().unwrap();
      if let Some(record) =
        state.records.iter_mut().find(|a| a.id == id)
        && record.status == status
      {
        record.status = previous;
      }
    }
    self.publish();
    tracing::warn!(%id, %error, "status update rolled back");
    Ok(StatusUpdate::RolledBack(error))
  }

  // ── Snapshot reconciliation ───────────────────────────────────────────────

  pub fn apply_snapshot(&self, docs: Vec<(String, Document)>) {
    let mut records: Vec<ActivityRecord> = docs
      .iter()
      .map(|(id, doc)| ActivityRecord::from_document(id, doc))
      .collect();
    {
      let mut state = self.state.write().unwrap();
      let tombstones = std::mem::take(&mut state.recently_deleted);
      if !tombstones.is_empty() {
        records.retain(|a| !tombstones.contains(&a.id));
      }
      state.records = records;
    }
    self.publish();
    self.loaded.send_replace(true);
    self
      .sync
      .send_replace(SyncStatus::Live { last_update: Utc::now() });
  }

  pub fn mark_sync_failed(&self, reason: &str) {
    tracing::error!(%reason, "activity subscription failed");
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
        match remote.set_merge(ACTIVITIES_COLLECTION, id, doc).await {
          Ok(()) => MutationOutcome::Confirmed,
          Err(error) => {
            tracing::warn!(%id, %error, "activity write not confirmed remotely");
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

/// Mirror the subscription's due-date-descending order; activities without
/// a due date sort last.
fn sort_activities(records: &mut [ActivityRecord]) {
  records.sort_by(|a, b| match (b.due_date, a.due_date) {
    (Some(db), Some(da)) => db.cmp(&da),
    (Some(_), None) => std::cmp::Ordering::Greater,
    (None, Some(_)) => std::cmp::Ordering::Less,
    (None, None) => std::cmp::Ordering::Equal,
  });
}

fn merge_payload(record: &ActivityRecord, is_create: bool) -> Document {
  let opt = |value: &Option<String>| match value {
    Some(s) => json!(s),
    None => Value::Null,
  };

  let mut doc = Document::new();
  doc.insert("title".to_string(), json!(record.title));
  doc.insert("description".to_string(), opt(&record.description));
  doc.insert(
    "dueDate".to_string(),
    match record.due_date {
      Some(date) => json!(date.to_string()),
      None => Value::Null,
    },
  );
  doc.insert("career".to_string(), json!(record.career.as_str()));
  doc.insert(
    "responsibleRole".to_string(),
    json!(record.responsible_role.as_str()),
  );
  doc.insert("assigneeEmail".to_string(), opt(&record.responsible_email));
  doc.insert("assigneeName".to_string(), opt(&record.responsible_name));
  doc.insert("updatedBy".to_string(), opt(&record.updated_by));
  doc.insert("updatedAt".to_string(), server_timestamp());
  if is_create {
    doc.insert("status".to_string(), json!(record.status.as_str()));
    doc.insert("createdBy".to_string(), opt(&record.created_by));
    doc.insert("createdAt".to_string(), server_timestamp());
  }
  doc
}
