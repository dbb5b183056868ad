//! Identity-key normalization and matching.
//!
//! A single real person can be recorded under several identifiers across
//! historical imports (control number, two or three email addresses, a
//! provider subject id). Every record therefore exposes a *set* of
//! normalized keys, and lookup means key-set intersection rather than
//! equality on one field.

use std::collections::BTreeSet;

/// Normalize one raw identifier into a key: trimmed and lower-cased.
/// Returns `None` for blank input.
pub fn normalize_key(raw: &str) -> Option<String> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    None
  } else {
    Some(trimmed.to_lowercase())
  }
}

/// Reduce a raw identifier to a token safe for use as a document id.
///
/// Keeps ASCII alphanumerics and `.`/`_`/`-`/`@`; every other character
/// collapses to a single `-`. Lower-cases the result.
pub fn sanitize_token(raw: &str) -> String {
  let mut out = String::with_capacity(raw.len());
  let mut last_dash = false;
  for c in raw.trim().chars() {
    let c = c.to_ascii_lowercase();
    if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '@') {
      out.push(c);
      last_dash = false;
    } else if !last_dash {
      out.push('-');
      last_dash = true;
    }
  }
  out.trim_matches('-').to_string()
}

/// The part of an email address before the `@`, if the input looks like an
/// email at all.
pub fn email_local_part(email: &str) -> Option<&str> {
  let trimmed = email.trim();
  match trimmed.split_once('@') {
    Some((local, _)) if !local.is_empty() => Some(local),
    _ => None,
  }
}

// ─── Key sets ────────────────────────────────────────────────────────────────

/// An ordered set of normalized identity keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityKeySet {
  keys: BTreeSet<String>,
}

impl IdentityKeySet {
  pub fn new() -> Self {
    Self::default()
  }

  /// The key set for a lookup value: the value itself, normalized.
  pub fn of_query(value: &str) -> Self {
    let mut set = Self::new();
    set.insert_raw(value);
    set
  }

  /// Insert a raw identifier, normalizing it first. Blank input is ignored.
  pub fn insert_raw(&mut self, raw: &str) {
    if let Some(key) = normalize_key(raw) {
      self.keys.insert(key);
    }
  }

  pub fn insert_opt(&mut self, raw: Option<&str>) {
    if let Some(raw) = raw {
      self.insert_raw(raw);
    }
  }

  pub fn contains(&self, raw: &str) -> bool {
    match normalize_key(raw) {
      Some(key) => self.keys.contains(&key),
      None => false,
    }
  }

  pub fn intersects(&self, other: &IdentityKeySet) -> bool {
    self.keys.iter().any(|k| other.keys.contains(k))
  }

  pub fn extend(&mut self, other: &IdentityKeySet) {
    self.keys.extend(other.keys.iter().cloned());
  }

  pub fn is_empty(&self) -> bool {
    self.keys.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = &str> {
    self.keys.iter().map(String::as_str)
  }
}
