//! Core traits shared by every cached record.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt;

/// Kind of entity. Each kind has its own local store and remote collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
  Expense,
  Budget,
  Category,
  Goal,
  User,
}

impl EntityKind {
  pub const ALL: [EntityKind; 5] = [
    EntityKind::Expense,
    EntityKind::Budget,
    EntityKind::Category,
    EntityKind::Goal,
    EntityKind::User,
  ];

  /// Store and log name (e.g. "expense").
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Expense => "expense",
      Self::Budget => "budget",
      Self::Category => "category",
      Self::Goal => "goal",
      Self::User => "user",
    }
  }

  /// Remote collection holding documents of this kind.
  pub fn collection(self) -> &'static str {
    match self {
      Self::Expense => "expenses",
      Self::Budget => "budgets",
      Self::Category => "categories",
      Self::Goal => "goals",
      Self::User => "users",
    }
  }

  /// Whether mutations of this kind may go through the sync queue.
  /// User profiles are only ever written directly.
  pub fn is_syncable(self) -> bool {
    !matches!(self, Self::User)
  }
}

impl fmt::Display for EntityKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.pad(self.as_str())
  }
}

/// Field-level validation failure, surfaced to the caller unchanged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {field}: {message}")]
pub struct ValidationError {
  pub field: &'static str,
  pub message: String,
}

impl ValidationError {
  pub fn new(field: &'static str, message: impl Into<String>) -> Self {
    Self {
      field,
      message: message.into(),
    }
  }
}

/// Trait for records that can be stored locally and remotely.
///
/// Records serialize to camelCase JSON documents; the same document is used
/// for the local store, the remote store and pending queue payloads.
pub trait Record: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
  /// Stable unique id (UUID), the join key between local and remote copies.
  fn id(&self) -> &str;

  /// Id of the user that owns this record.
  fn owner_id(&self) -> &str;

  /// Entity kind, used to pick the store and collection.
  fn entity_kind() -> EntityKind;

  /// Kind-specific field checks. Common id checks run in [`Record::check`].
  fn validate(&self) -> Result<(), ValidationError> {
    Ok(())
  }

  /// Full validation: non-empty ids, then [`Record::validate`].
  fn check(&self) -> Result<(), ValidationError> {
    if self.id().trim().is_empty() {
      return Err(ValidationError::new("id", "must not be empty"));
    }
    if self.owner_id().trim().is_empty() {
      return Err(ValidationError::new("userId", "must not be empty"));
    }
    self.validate()
  }
}

/// Records that can be filtered by a date field.
pub trait Dated: Record {
  /// Document field compared against date ranges.
  const DATE_FIELD: &'static str;
}

/// Records that belong to a category.
pub trait Categorized: Record {
  /// Document field holding the category id.
  const CATEGORY_FIELD: &'static str = "categoryId";
}

pub(crate) fn positive_amount(field: &'static str, value: f64) -> Result<(), ValidationError> {
  if !value.is_finite() || value <= 0.0 {
    return Err(ValidationError::new(field, "must be a positive amount"));
  }
  Ok(())
}

pub(crate) fn non_empty(field: &'static str, value: &str) -> Result<(), ValidationError> {
  if value.trim().is_empty() {
    return Err(ValidationError::new(field, "must not be empty"));
  }
  Ok(())
}
