//! Directory-wide configuration.

use serde::Deserialize;

/// The two values the core depends on: which email domain institutional
/// accounts live under, and which single account is the permanent primary
/// administrator.
///
/// How these are sourced (config file, environment, hosting-injected values)
/// is the bootstrap layer's concern; see `claustro-access::settings`.
#[derive(Debug, Clone, Deserialize)]
pub struct DirectorySettings {
  /// Domain suffix required for institutional sign-in, without the `@`,
  /// e.g. `potros.itson.edu.mx`.
  pub required_email_domain: String,
  /// The fixed primary-administrator email. This account cannot be deleted
  /// or demoted, and its resolved role is always administrator.
  pub primary_admin_email:   String,
}

impl DirectorySettings {
  /// Whether `email` is the configured primary administrator.
  pub fn is_primary_admin(&self, email: &str) -> bool {
    email.trim().eq_ignore_ascii_case(self.primary_admin_email.trim())
  }

  /// Whether `email` belongs to the required institutional domain.
  pub fn matches_domain(&self, email: &str) -> bool {
    let email = email.trim().to_lowercase();
    let suffix = format!("@{}", self.required_email_domain.trim().to_lowercase());
    email.ends_with(&suffix)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn settings() -> DirectorySettings {
    DirectorySettings {
      required_email_domain: "potros.inst.edu".to_string(),
      primary_admin_email:   "head.admin@potros.inst.edu".to_string(),
    }
  }

  #[test]
  fn domain_check_is_suffix_on_full_domain() {
    let s = settings();
    assert!(s.matches_domain("ana@potros.inst.edu"));
    assert!(s.matches_domain("ANA@POTROS.INST.EDU"));
    assert!(!s.matches_domain("ana@gmail.com"));
    // A lookalike domain must not pass.
    assert!(!s.matches_domain("ana@evil-potros.inst.edu.attacker.com"));
  }

  #[test]
  fn primary_admin_match_is_case_insensitive() {
    let s = settings();
    assert!(s.is_primary_admin("Head.Admin@Potros.Inst.Edu"));
    assert!(!s.is_primary_admin("other@potros.inst.edu"));
  }
}
