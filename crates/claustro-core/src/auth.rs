//! The authentication-provider capability boundary.

use std::future::Future;

use thiserror::Error;
use tokio::sync::watch;

/// An authenticated identity as reported by the external provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthIdentity {
  /// The sign-in email, as the provider reports it.
  pub email:        String,
  /// Provider display name, when the account has one.
  pub display_name: Option<String>,
  /// The provider's stable subject id for this account.
  pub subject_id:   String,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
  /// The user closed or abandoned the interactive flow. Not a failure.
  #[error("sign-in cancelled by the user")]
  Cancelled,

  #[error("auth provider error: {0}")]
  Provider(String),
}

/// Abstraction over the external interactive authentication provider.
///
/// `sign_in` does not return the identity; success is observed through the
/// [`AuthProvider::identities`] channel, which always carries the current
/// state (possibly `None`) at registration, and delivers transitions one at
/// a time.
pub trait AuthProvider: Send + Sync {
  /// Start an interactive sign-in, hinting the provider to restrict account
  /// choice to `domain_hint`.
  fn sign_in(
    &self,
    domain_hint: &str,
  ) -> impl Future<Output = Result<(), AuthError>> + Send + '_;

  /// Terminate the provider-level session.
  fn sign_out(&self) -> impl Future<Output = Result<(), AuthError>> + Send + '_;

  /// Observable authenticated identity. `None` means signed out.
  fn identities(&self) -> watch::Receiver<Option<AuthIdentity>>;
}
