//! In-memory stores with optimistic remote persistence.
//!
//! [`RosterStore`] and [`ActivityStore`] own their collections: the
//! presentation layer reads snapshots and issues intent calls, never
//! mutating the lists directly. Every mutation applies in memory first and
//! then attempts the remote write; what happens on remote failure differs
//! deliberately per entity type (see the module docs of [`roster`] and
//! [`activity`]). [`sync::SyncAdapter`] feeds authoritative server
//! snapshots back into the stores.

pub mod activity;
pub mod roster;
pub mod sync;

#[cfg(test)]
mod tests;

pub use activity::{ACTIVITIES_COLLECTION, ActivityStore};
pub use roster::{ROSTER_COLLECTION, RosterFilter, RosterStore};
pub use sync::{SyncAdapter, SyncStatus};
