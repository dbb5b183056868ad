//! The document-store capability boundary.
//!
//! The remote collaborator is modelled after a managed document database:
//! schemaless JSON documents keyed by id inside named collections, with
//! merge-semantics writes and live ordered snapshots. Backends implement
//! [`DocumentStore`]; the stores in `claustro-store` are generic over it and
//! never see a concrete client.

use std::future::Future;

use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::WriteError;

/// A schemaless document: a JSON object map.
pub type Document = serde_json::Map<String, Value>;

// ─── Server timestamps ───────────────────────────────────────────────────────

/// Sentinel resolved to the server's clock at write time.
const SERVER_TIMESTAMP_SENTINEL: &str = "\u{0}claustro:server-timestamp";

/// An opaque marker a backend replaces with its own timestamp when the write
/// is applied. Callers must treat the value as meaningless until it comes
/// back in a snapshot.
pub fn server_timestamp() -> Value {
  Value::String(SERVER_TIMESTAMP_SENTINEL.to_string())
}

/// Whether `value` is the marker produced by [`server_timestamp`].
pub fn is_server_timestamp(value: &Value) -> bool {
  matches!(value, Value::String(s) if s == SERVER_TIMESTAMP_SENTINEL)
}

// ─── Subscriptions ───────────────────────────────────────────────────────────

/// One delivery on a live subscription.
#[derive(Debug, Clone)]
pub enum SnapshotEvent {
  /// The authoritative contents of the collection, in the requested order.
  Data(Vec<(String, Document)>),
  /// The subscription itself failed. No further `Data` events will arrive.
  Error(String),
}

/// Sort order requested from [`DocumentStore::subscribe`].
#[derive(Debug, Clone)]
pub struct OrderBy {
  pub field:      String,
  pub descending: bool,
}

impl OrderBy {
  pub fn ascending(field: &str) -> Self {
    Self { field: field.to_string(), descending: false }
  }

  pub fn descending(field: &str) -> Self {
    Self { field: field.to_string(), descending: true }
  }
}

/// A live snapshot feed. Dropping it unsubscribes.
///
/// Backends guarantee the first event carries the collection's current
/// contents, so a consumer never hangs waiting for an initial state.
pub struct Subscription {
  events: mpsc::UnboundedReceiver<SnapshotEvent>,
}

impl Subscription {
  pub fn new(events: mpsc::UnboundedReceiver<SnapshotEvent>) -> Self {
    Self { events }
  }

  /// Next event in server emission order; `None` once the backend is gone.
  pub async fn next(&mut self) -> Option<SnapshotEvent> {
    self.events.recv().await
  }
}

// ─── Batch writes ────────────────────────────────────────────────────────────

/// One entry of a [`DocumentStore::batch_write`]. Merge semantics, like
/// [`DocumentStore::set_merge`].
#[derive(Debug, Clone)]
pub struct BatchWrite {
  pub collection: String,
  pub id:         String,
  pub doc:        Document,
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over the remote document database.
///
/// All methods return `Send` futures so the trait can be used from spawned
/// tasks on a multi-threaded runtime.
pub trait DocumentStore: Send + Sync {
  /// Fetch one document. `Ok(None)` when absent.
  fn get_one(
    &self,
    collection: &str,
    id: &str,
  ) -> impl Future<Output = Result<Option<Document>, WriteError>> + Send + '_;

  /// Write `doc` under `id`, preserving server-side fields not present in
  /// the payload.
  fn set_merge(
    &self,
    collection: &str,
    id: &str,
    doc: Document,
  ) -> impl Future<Output = Result<(), WriteError>> + Send + '_;

  /// Delete one document. Deleting an absent document is not an error.
  fn delete(
    &self,
    collection: &str,
    id: &str,
  ) -> impl Future<Output = Result<(), WriteError>> + Send + '_;

  /// Apply several merge writes as one unit: from the caller's view the
  /// batch either succeeds or fails as a whole.
  fn batch_write(
    &self,
    writes: Vec<BatchWrite>,
  ) -> impl Future<Output = Result<(), WriteError>> + Send + '_;

  /// Open a live subscription over `collection`, ordered by `order_by`.
  /// The current contents are delivered as the first event.
  fn subscribe(&self, collection: &str, order_by: OrderBy) -> Subscription;
}
