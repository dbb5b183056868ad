//! Activity records and their status state machine.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
  document::Document,
  error::StoreError,
  user::{self, Career, Role},
};

/// Activity progress. Any of the three values may be requested by the
/// assigned user; the only transition the machine rejects is a no-op
/// request for the current value.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ActivityStatus {
  #[default]
  Pending,
  InProgress,
  Completed,
}

impl ActivityStatus {
  pub fn parse(raw: &str) -> Option<Self> {
    match raw.trim().to_lowercase().as_str() {
      "pending" | "pendiente" => Some(Self::Pending),
      "in_progress" | "en_progreso" => Some(Self::InProgress),
      "completed" | "completada" => Some(Self::Completed),
      _ => None,
    }
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Self::Pending => "pending",
      Self::InProgress => "in_progress",
      Self::Completed => "completed",
    }
  }
}

// ─── ActivityRecord ──────────────────────────────────────────────────────────

/// One tracked activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRecord {
  pub id: String,
  pub title: String,
  pub description: Option<String>,
  pub due_date: Option<NaiveDate>,
  /// `Global` makes the activity visible regardless of career.
  pub career: Career,
  /// The role class this activity targets.
  pub responsible_role: Role,
  /// Specific assignee; when absent the activity is visible to every
  /// member of `responsible_role`.
  pub responsible_email: Option<String>,
  /// Denormalized display name of the assignee at assignment time.
  pub responsible_name: Option<String>,
  pub status: ActivityStatus,
  pub created_at: Option<DateTime<Utc>>,
  pub updated_at: Option<DateTime<Utc>>,
  pub created_by: Option<String>,
  pub updated_by: Option<String>,
}

impl ActivityRecord {
  /// Read-side visibility rule: role must match, the assignee filter must
  /// pass, and the career must match unless either side is global.
  pub fn visible_to(&self, role: Role, email: &str, career: Career) -> bool {
    if self.responsible_role != role {
      return false;
    }
    if let Some(assignee) = self.responsible_email.as_deref() {
      if !assignee.eq_ignore_ascii_case(email.trim()) {
        return false;
      }
    }
    self.career == Career::Global || self.career == career
  }

  /// Normalize a remote document. Unknown statuses fall back to pending,
  /// unknown careers to global (an activity should never vanish from every
  /// view because of a malformed field).
  pub fn from_document(id: &str, doc: &Document) -> Self {
    Self {
      id: id.to_string(),
      title: str_field(doc, "title")
        // Older documents used `name` for the activity title.
        .or_else(|| str_field(doc, "name"))
        .unwrap_or_default(),
      description: str_field(doc, "description"),
      due_date: date_field(doc, "dueDate"),
      career: str_field(doc, "career")
        .and_then(|s| Career::parse(&s))
        .unwrap_or(Career::Global),
      responsible_role: str_field(doc, "responsibleRole")
        .and_then(|s| Role::parse(&s))
        .unwrap_or_default(),
      responsible_email: str_field(doc, "assigneeEmail")
        .map(|s| s.to_lowercase()),
      responsible_name: str_field(doc, "assigneeName"),
      status: str_field(doc, "status")
        .and_then(|s| ActivityStatus::parse(&s))
        .unwrap_or_default(),
      created_at: user::time_field(doc, "createdAt"),
      updated_at: user::time_field(doc, "updatedAt"),
      created_by: str_field(doc, "createdBy").map(|s| s.to_lowercase()),
      updated_by: str_field(doc, "updatedBy").map(|s| s.to_lowercase()),
    }
  }
}

// ─── ActivityDraft ───────────────────────────────────────────────────────────

/// Caller-supplied input to an activity upsert.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActivityDraft {
  /// Present when editing; `None` creates a new activity with a random id.
  pub id: Option<String>,
  pub title: String,
  pub description: Option<String>,
  pub due_date: Option<NaiveDate>,
  pub career: Career,
  pub responsible_role: Role,
  pub responsible_email: Option<String>,
  pub responsible_name: Option<String>,
}

impl ActivityDraft {
  pub fn new(title: &str) -> Self {
    Self { title: title.to_string(), ..Self::default() }
  }

  pub fn normalized(mut self) -> Self {
    self.title = self.title.trim().to_string();
    self.description = self
      .description
      .and_then(|s| {
        let t = s.trim().to_string();
        if t.is_empty() { None } else { Some(t) }
      });
    self.responsible_email = self
      .responsible_email
      .and_then(|s| {
        let t = s.trim().to_lowercase();
        if t.is_empty() { None } else { Some(t) }
      });
    self
  }

  pub fn validate(&self) -> Result<(), StoreError> {
    if self.title.trim().is_empty() {
      return Err(StoreError::Validation("title is required".to_string()));
    }
    if self.due_date.is_none() {
      return Err(StoreError::Validation("due date is required".to_string()));
    }
    Ok(())
  }
}

fn str_field(doc: &Document, key: &str) -> Option<String> {
  match doc.get(key) {
    Some(Value::String(s)) => {
      let t = s.trim();
      if t.is_empty() { None } else { Some(t.to_string()) }
    }
    _ => None,
  }
}

fn date_field(doc: &Document, key: &str) -> Option<NaiveDate> {
  match doc.get(key) {
    Some(Value::String(s)) => {
      // Accept both plain dates and full timestamps.
      s.parse::<NaiveDate>().ok().or_else(|| {
        DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.date_naive())
      })
    }
    _ => None,
  }
}
