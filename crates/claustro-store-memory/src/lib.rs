//! In-process [`DocumentStore`](claustro_core::document::DocumentStore)
//! backend.
//!
//! Serves two purposes: the test double for everything in `claustro-store`
//! and `claustro-access`, and the stand-in used when no remote database is
//! configured. Supports live ordered snapshots and write-failure injection.

mod store;


pub use store::MemoryStore;
