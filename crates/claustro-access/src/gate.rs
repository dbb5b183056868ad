//! [`IdentityGate`] — thin policy wrapper around the auth provider.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::watch;

use claustro_core::auth::{AuthError, AuthIdentity, AuthProvider};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SignInError {
  #[error("sign-in failed: {0}")]
  Provider(String),
}

/// Drives interactive sign-in and sign-out against the provider.
///
/// Two pieces of policy live here: a cancelled sign-in is not an error (the
/// user simply closed the prompt), and sign-out never fails from the
/// caller's view — a provider that cannot tear its session down is logged
/// and otherwise ignored, since the local session is discarded regardless.
pub struct IdentityGate<A: AuthProvider> {
  provider: Arc<A>,
  domain:   String,
}

impl<A: AuthProvider> IdentityGate<A> {
  /// `domain` is passed to the provider as an account-picker hint; it does
  /// not enforce anything (enforcement is the resolver's job).
  pub fn new(provider: Arc<A>, domain: &str) -> Self {
    Self { provider, domain: domain.to_string() }
  }

  pub async fn sign_in(&self) -> Result<(), SignInError> {
    match self.provider.sign_in(&self.domain).await {
      Ok(()) => Ok(()),
      Err(AuthError::Cancelled) => {
        tracing::debug!("sign-in cancelled by the user");
        Ok(())
      }
      Err(AuthError::Provider(reason)) => {
        tracing::error!(%reason, "provider sign-in failed");
        Err(SignInError::Provider(reason))
      }
    }
  }

  pub async fn sign_out(&self) {
    if let Err(error) = self.provider.sign_out().await {
      tracing::warn!(%error, "provider sign-out failed");
    }
  }

  /// The provider's identity channel: current value at registration,
  /// transitions one at a time.
  pub fn watch(&self) -> watch::Receiver<Option<AuthIdentity>> {
    self.provider.identities()
  }
}
