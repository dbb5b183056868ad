//! User records: the roster's canonical shape and its normalization.
//!
//! Remote documents accumulated years of hand edits and spreadsheet imports,
//! so every field read goes through one tolerant normalization path
//! ([`UserRecord::from_document`]); there is no second, slightly different
//! record shape anywhere else.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
  document::Document,
  error::StoreError,
  identity::{self, IdentityKeySet},
};

// ─── Enums ───────────────────────────────────────────────────────────────────

/// Staff role. Parsing accepts the legacy Spanish discriminants still
/// present in historical documents.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Role {
  Administrator,
  #[default]
  Instructor,
  Assistant,
}

impl Role {
  pub fn parse(raw: &str) -> Option<Self> {
    match raw.trim().to_lowercase().as_str() {
      "administrator" | "administrador" | "admin" => Some(Self::Administrator),
      "instructor" | "docente" => Some(Self::Instructor),
      "assistant" | "auxiliar" => Some(Self::Assistant),
      _ => None,
    }
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Self::Administrator => "administrator",
      Self::Instructor => "instructor",
      Self::Assistant => "assistant",
    }
  }
}

/// Academic program a staff member belongs to. `Global` means "all of them"
/// and is also the default for activities without a career.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Career {
  #[default]
  Software,
  Manufacturing,
  Mechatronics,
  Global,
}

impl Career {
  pub fn parse(raw: &str) -> Option<Self> {
    match raw.trim().to_lowercase().as_str() {
      "software" => Some(Self::Software),
      "manufacturing" | "manufactura" => Some(Self::Manufacturing),
      "mechatronics" | "mecatronica" | "mecatrónica" => Some(Self::Mechatronics),
      "global" | "general" => Some(Self::Global),
      _ => None,
    }
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Self::Software => "software",
      Self::Manufacturing => "manufacturing",
      Self::Mechatronics => "mechatronics",
      Self::Global => "global",
    }
  }
}

// ─── UserRecord ──────────────────────────────────────────────────────────────

/// One roster entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
  /// Stable document id; see [`UserDraft`] for the derivation rule.
  pub id: String,
  pub name: String,
  pub control_number: Option<String>,
  /// The canonical sign-in identity ("correo potro") when present.
  pub potro_email: Option<String>,
  pub institutional_email: Option<String>,
  pub alternate_email: Option<String>,
  pub phone: Option<String>,
  pub role: Role,
  pub career: Career,
  /// Permits sign-in from outside the required email domain.
  pub allow_external_auth: bool,
  /// Weak back-reference to the provider's subject id, backfilled on the
  /// first successful login match. Relation only, never an ownership link.
  pub external_identity_ref: Option<String>,
  pub created_at: Option<DateTime<Utc>>,
  pub updated_at: Option<DateTime<Utc>>,
  pub created_by: Option<String>,
  pub updated_by: Option<String>,
  pub imported_at: Option<DateTime<Utc>>,
}

impl UserRecord {
  /// Every key this record can be found under: id, control number, every
  /// populated email, and the external identity reference.
  pub fn identity_keys(&self) -> IdentityKeySet {
    let mut keys = IdentityKeySet::new();
    keys.insert_raw(&self.id);
    keys.insert_opt(self.control_number.as_deref());
    keys.extend(&self.login_keys());
    keys
  }

  /// The subset of keys valid for matching an authenticated identity:
  /// emails and the provider subject id. Control numbers are deliberately
  /// excluded from the login path.
  pub fn login_keys(&self) -> IdentityKeySet {
    let mut keys = IdentityKeySet::new();
    keys.insert_opt(self.potro_email.as_deref());
    keys.insert_opt(self.institutional_email.as_deref());
    keys.insert_opt(self.alternate_email.as_deref());
    keys.insert_opt(self.external_identity_ref.as_deref());
    keys
  }

  /// Preferred contact email, in the same priority order as id derivation.
  pub fn primary_contact(&self) -> Option<&str> {
    self
      .potro_email
      .as_deref()
      .or(self.institutional_email.as_deref())
      .or(self.alternate_email.as_deref())
  }

  /// Normalize a remote document into the canonical record shape.
  ///
  /// Field names follow the historical collection: `controlNumber`,
  /// `potroEmail`, `institutionalEmail`, `email` (the alternate address),
  /// `allowExternalAuth`, and camel-cased provenance fields. Unknown roles
  /// default to instructor, unknown careers to software.
  pub fn from_document(id: &str, doc: &Document) -> Self {
    Self {
      id: id.to_string(),
      name: str_field(doc, "name").unwrap_or_default(),
      control_number: str_field(doc, "controlNumber"),
      potro_email: email_field(doc, "potroEmail"),
      institutional_email: email_field(doc, "institutionalEmail"),
      alternate_email: email_field(doc, "email"),
      phone: str_field(doc, "phone"),
      role: str_field(doc, "role")
        .and_then(|s| Role::parse(&s))
        .unwrap_or_default(),
      career: str_field(doc, "career")
        .and_then(|s| Career::parse(&s))
        .unwrap_or_default(),
      allow_external_auth: bool_field(doc, "allowExternalAuth"),
      external_identity_ref: str_field(doc, "externalIdentityRef"),
      created_at: time_field(doc, "createdAt"),
      updated_at: time_field(doc, "updatedAt"),
      created_by: email_field(doc, "createdBy"),
      updated_by: email_field(doc, "updatedBy"),
      imported_at: time_field(doc, "importedAt"),
    }
  }
}

// ─── UserDraft ───────────────────────────────────────────────────────────────

/// Caller-supplied input to a roster upsert. The store owns id derivation,
/// normalization, and provenance; callers only describe the person.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserDraft {
  /// Present when editing an existing record; `None` lets the store derive
  /// an id from the control number or the primary email's local part.
  pub id: Option<String>,
  pub name: String,
  pub control_number: Option<String>,
  pub potro_email: Option<String>,
  pub institutional_email: Option<String>,
  pub alternate_email: Option<String>,
  pub phone: Option<String>,
  pub role: Role,
  pub career: Career,
  pub allow_external_auth: bool,
}

impl UserDraft {
  pub fn new(name: &str) -> Self {
    Self { name: name.to_string(), ..Self::default() }
  }

  /// Trim free text, lower-case every email, and drop blank optionals.
  pub fn normalized(mut self) -> Self {
    self.name = self.name.trim().to_string();
    self.id = self.id.and_then(|s| identity::normalize_key(&s));
    self.control_number =
      self.control_number.and_then(|s| non_blank(&s));
    self.potro_email = self.potro_email.and_then(|s| lower_non_blank(&s));
    self.institutional_email =
      self.institutional_email.and_then(|s| lower_non_blank(&s));
    self.alternate_email =
      self.alternate_email.and_then(|s| lower_non_blank(&s));
    self.phone = self.phone.and_then(|s| non_blank(&s));
    self
  }

  /// Enforce the roster invariant: a non-empty name, plus at least one
  /// identity field to derive a key from.
  pub fn validate(&self) -> Result<(), StoreError> {
    if self.name.trim().is_empty() {
      return Err(StoreError::Validation("name is required".to_string()));
    }
    let mut keys = IdentityKeySet::new();
    keys.insert_opt(self.id.as_deref());
    keys.insert_opt(self.control_number.as_deref());
    keys.insert_opt(self.potro_email.as_deref());
    keys.insert_opt(self.institutional_email.as_deref());
    keys.insert_opt(self.alternate_email.as_deref());
    if keys.is_empty() {
      return Err(StoreError::Validation(
        "at least one of id, control number, or an email is required"
          .to_string(),
      ));
    }
    Ok(())
  }

  /// Derive the base document id, in priority order: explicit id, control
  /// number, primary email local part. The draft must have passed
  /// [`UserDraft::validate`] first.
  pub fn base_id(&self) -> Option<String> {
    if let Some(id) = self.id.as_deref() {
      return Some(identity::sanitize_token(id));
    }
    if let Some(cn) = self.control_number.as_deref() {
      let token = identity::sanitize_token(cn);
      if !token.is_empty() {
        return Some(token);
      }
    }
    let email = self
      .potro_email
      .as_deref()
      .or(self.institutional_email.as_deref())
      .or(self.alternate_email.as_deref())?;
    identity::email_local_part(email)
      .map(identity::sanitize_token)
      .filter(|t| !t.is_empty())
  }
}

// ─── Field helpers ───────────────────────────────────────────────────────────

fn non_blank(raw: &str) -> Option<String> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    None
  } else {
    Some(trimmed.to_string())
  }
}

fn lower_non_blank(raw: &str) -> Option<String> {
  non_blank(raw).map(|s| s.to_lowercase())
}

fn str_field(doc: &Document, key: &str) -> Option<String> {
  match doc.get(key) {
    Some(Value::String(s)) => non_blank(s),
    _ => None,
  }
}

fn email_field(doc: &Document, key: &str) -> Option<String> {
  str_field(doc, key).map(|s| s.to_lowercase())
}

fn bool_field(doc: &Document, key: &str) -> bool {
  matches!(doc.get(key), Some(Value::Bool(true)))
}

pub(crate) fn time_field(doc: &Document, key: &str) -> Option<DateTime<Utc>> {
  match doc.get(key) {
    Some(Value::String(s)) => DateTime::parse_from_rfc3339(s)
      .ok()
      .map(|dt| dt.with_timezone(&Utc)),
    _ => None,
  }
}
