//! Who gets in, and as what.
//!
//! [`IdentityGate`] wraps the external authentication provider;
//! [`resolver::resolve_access`] is the pure decision function mapping an
//! authenticated identity plus the current roster to an [`AccessState`];
//! [`Session`] wires gate, stores, and sync adapters together and keeps the
//! published access state current as identities and roster snapshots change.

pub mod gate;
pub mod resolver;
pub mod session;
pub mod settings;


pub use gate::{IdentityGate, SignInError};
pub use resolver::{AccessState, Profile, RejectReason, resolve_access};
pub use session::Session;
