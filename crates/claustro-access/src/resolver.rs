//! The access-resolution decision function.
//!
//! [`resolve_access`] is pure and total: every combination of inputs maps
//! to exactly one [`AccessState`], and no branch can panic. Side effects of
//! a decision (provider sign-out on rejection, external-ref backfill on
//! admission) belong to [`crate::session`], which invokes this function on
//! every identity or roster transition.

use std::fmt;

use claustro_core::{
  auth::AuthIdentity,
  settings::DirectorySettings,
  user::{Career, Role, UserRecord},
};

/// Why an authenticated identity was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
  /// Wrong email domain and no roster record to vouch for the account.
  InstitutionalAccountRequired,
  /// Right domain, but no administrator has added this person yet.
  NotProvisioned,
  /// A record matched, but it does not permit sign-in from outside the
  /// institutional domain.
  ExternalAccessDenied,
}

impl fmt::Display for RejectReason {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Self::InstitutionalAccountRequired => {
        "you must sign in with your institutional account"
      }
      Self::NotProvisioned => {
        "no profile exists for this account; ask an administrator to add you"
      }
      Self::ExternalAccessDenied => {
        "external sign-in is not permitted for this account"
      }
    })
  }
}

/// The merged view of an admitted user: roster record plus provider
/// identity.
#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
  pub record_id:  String,
  /// Record name, falling back to the provider display name, then the
  /// sign-in email.
  pub name:       String,
  /// The email the user signed in with (lower-cased).
  pub email:      String,
  pub role:       Role,
  pub career:     Career,
  pub subject_id: String,
}

/// Where one identity stands with respect to the directory.
#[derive(Debug, Clone, PartialEq)]
pub enum AccessState {
  SignedOut,
  /// Identity known, roster not yet loaded. Resolved again once it is.
  Pending,
  Admitted(Profile),
  /// Terminal for this identity until a new sign-in attempt.
  Rejected(RejectReason),
}

/// Decide access for `identity` against the roster view.
///
/// `matched` is the roster record found for the identity on the login path
/// (emails and provider subject id only); `roster_loaded` is false until
/// the first snapshot or a subscription failure. The primary
/// administrator's resolved role is always [`Role::Administrator`], even if
/// the stored record says otherwise.
pub fn resolve_access(
  settings: &DirectorySettings,
  identity: Option<&AuthIdentity>,
  roster_loaded: bool,
  matched: Option<&UserRecord>,
) -> AccessState {
  let Some(identity) = identity else {
    return AccessState::SignedOut;
  };
  if !roster_loaded {
    return AccessState::Pending;
  }

  let email = identity.email.trim().to_lowercase();
  let domain_ok = settings.matches_domain(&email);

  let Some(record) = matched else {
    return if domain_ok {
      AccessState::Rejected(RejectReason::NotProvisioned)
    } else {
      AccessState::Rejected(RejectReason::InstitutionalAccountRequired)
    };
  };

  if !domain_ok && !record.allow_external_auth {
    return AccessState::Rejected(RejectReason::ExternalAccessDenied);
  }

  let role = if settings.is_primary_admin(&email) {
    Role::Administrator
  } else {
    record.role
  };
  let name = if !record.name.is_empty() {
    record.name.clone()
  } else if let Some(display) = identity
    .display_name
    .as_deref()
    .filter(|s| !s.trim().is_empty())
  {
    display.to_string()
  } else {
    email.clone()
  };

  AccessState::Admitted(Profile {
    record_id: record.id.clone(),
    name,
    email,
    role,
    career: record.career,
    subject_id: identity.subject_id.clone(),
  })
}
