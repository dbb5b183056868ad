//! [`MemoryStore`] — the in-process implementation of `DocumentStore`.

use std::{
  cmp::Ordering,
  collections::{BTreeMap, HashMap},
  sync::{Arc, Mutex},
};

use chrono::Utc;
use serde_json::Value;
use tokio::sync::mpsc;

use claustro_core::{
  document::{
    BatchWrite, Document, DocumentStore, OrderBy, SnapshotEvent,
    Subscription, is_server_timestamp,
  },
  error::WriteError,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// An in-memory document store with live snapshot subscriptions.
///
/// Cloning is cheap — the inner state is reference-counted. Failure
/// injection ([`MemoryStore::fail_writes`]) makes every subsequent write
/// return the given error without touching stored data, which is how tests
/// exercise the degraded-success and rollback paths.
#[derive(Clone, Default)]
pub struct MemoryStore {
  inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
  collections: Mutex<HashMap<String, BTreeMap<String, Document>>>,
  watchers:    Mutex<Vec<Watcher>>,
  fail_writes: Mutex<Option<WriteError>>,
}

struct Watcher {
  collection: String,
  order:      OrderBy,
  tx:         mpsc::UnboundedSender<SnapshotEvent>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  // ── Failure injection ─────────────────────────────────────────────────────

  /// Make every subsequent write fail with `error` until
  /// [`MemoryStore::restore_writes`] is called.
  pub fn fail_writes(&self, error: WriteError) {
    *self.inner.fail_writes.lock().unwrap() = Some(error);
  }

  pub fn restore_writes(&self) {
    *self.inner.fail_writes.lock().unwrap() = None;
  }

  /// Deliver a subscription error to every watcher of `collection`, as a
  /// remote permission change would.
  pub fn fail_subscriptions(&self, collection: &str, reason: &str) {
    let watchers = self.inner.watchers.lock().unwrap();
    for w in watchers.iter().filter(|w| w.collection == collection) {
      let _ = w.tx.send(SnapshotEvent::Error(reason.to_string()));
    }
  }

  /// Re-deliver the current contents of `collection` to every watcher.
  /// Tests use this to simulate a stale snapshot arriving late.
  pub fn emit_snapshot(&self, collection: &str) {
    self.notify(collection);
  }

  // ── Internals ─────────────────────────────────────────────────────────────

  fn write_failure(&self) -> Option<WriteError> {
    self.inner.fail_writes.lock().unwrap().clone()
  }

  fn snapshot_of(&self, collection: &str, order: &OrderBy) -> Vec<(String, Document)> {
    let collections = self.inner.collections.lock().unwrap();
    let mut docs: Vec<(String, Document)> = collections
      .get(collection)
      .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
      .unwrap_or_default();

    docs.sort_by(|(_, a), (_, b)| compare_by_field(a, b, order));
    docs
  }

  fn notify(&self, collection: &str) {
    let mut watchers = self.inner.watchers.lock().unwrap();
    watchers.retain(|w| {
      if w.collection != collection {
        return !w.tx.is_closed();
      }
      let snapshot = self.snapshot_of(collection, &w.order);
      w.tx.send(SnapshotEvent::Data(snapshot)).is_ok()
    });
  }

  fn merge_into(target: &mut Document, payload: Document) {
    let now = || Value::String(Utc::now().to_rfc3339());
    for (key, value) in payload {
      if is_server_timestamp(&value) {
        target.insert(key, now());
      } else {
        target.insert(key, value);
      }
    }
  }
}

/// Order documents by one field. Documents missing the field sort last,
/// regardless of direction.
fn compare_by_field(a: &Document, b: &Document, order: &OrderBy) -> Ordering {
  let key = |d: &Document| -> Option<String> {
    match d.get(&order.field) {
      Some(Value::String(s)) => Some(s.clone()),
      Some(Value::Number(n)) => Some(format!("{n:020}")),
      _ => None,
    }
  };
  match (key(a), key(b)) {
    (Some(ka), Some(kb)) => {
      if order.descending {
        kb.cmp(&ka)
      } else {
        ka.cmp(&kb)
      }
    }
    (Some(_), None) => Ordering::Less,
    (None, Some(_)) => Ordering::Greater,
    (None, None) => Ordering::Equal,
  }
}

// ─── DocumentStore impl ──────────────────────────────────────────────────────

impl DocumentStore for MemoryStore {
  fn get_one(
    &self,
    collection: &str,
    id: &str,
  ) -> impl Future<Output = Result<Option<Document>, WriteError>> + Send + '_ {
    let collection = collection.to_string();
    let id = id.to_string();
    async move {
      let collections = self.inner.collections.lock().unwrap();
      Ok(collections.get(&collection).and_then(|m| m.get(&id)).cloned())
    }
  }

  fn set_merge(
    &self,
    collection: &str,
    id: &str,
    doc: Document,
  ) -> impl Future<Output = Result<(), WriteError>> + Send + '_ {
    let collection = collection.to_string();
    let id = id.to_string();
    async move {
      if let Some(error) = self.write_failure() {
        return Err(error);
      }
      {
        let mut collections = self.inner.collections.lock().unwrap();
        let target = collections
          .entry(collection.clone())
          .or_default()
          .entry(id)
          .or_default();
        Self::merge_into(target, doc);
      }
      self.notify(&collection);
      Ok(())
    }
  }

  fn delete(
    &self,
    collection: &str,
    id: &str,
  ) -> impl Future<Output = Result<(), WriteError>> + Send + '_ {
    let collection = collection.to_string();
    let id = id.to_string();
    async move {
      if let Some(error) = self.write_failure() {
        return Err(error);
      }
      {
        let mut collections = self.inner.collections.lock().unwrap();
        if let Some(m) = collections.get_mut(&collection) {
          m.remove(&id);
        }
      }
      self.notify(&collection);
      Ok(())
    }
  }

  async fn batch_write(&self, writes: Vec<BatchWrite>) -> Result<(), WriteError> {
    if let Some(error) = self.write_failure() {
      return Err(error);
    }
    let mut touched: Vec<String> = Vec::new();
    {
      let mut collections = self.inner.collections.lock().unwrap();
      for write in writes {
        let target = collections
          .entry(write.collection.clone())
          .or_default()
          .entry(write.id)
          .or_default();
        Self::merge_into(target, write.doc);
        if !touched.contains(&write.collection) {
          touched.push(write.collection);
        }
      }
    }
    for collection in touched {
      self.notify(&collection);
    }
    Ok(())
  }

  fn subscribe(&self, collection: &str, order_by: OrderBy) -> Subscription {
    let (tx, rx) = mpsc::unbounded_channel();

    // First event: the current contents, delivered before registration so
    // a consumer never waits for an initial state.
    let initial = self.snapshot_of(collection, &order_by);
    let _ = tx.send(SnapshotEvent::Data(initial));

    self.inner.watchers.lock().unwrap().push(Watcher {
      collection: collection.to_string(),
      order: order_by,
      tx,
    });

    Subscription::new(rx)
  }
}
