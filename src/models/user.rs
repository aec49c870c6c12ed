use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::record::{EntityKind, Record, ValidationError};

/// User profile. A user owns itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
  pub id: String,
  /// Mirrors `id` so profile documents answer owner queries like every other kind
  pub user_id: String,
  pub email: String,
  #[serde(default)]
  pub display_name: String,
  #[serde(default = "default_currency")]
  pub currency: String,
  pub created_at: DateTime<Utc>,
}

fn default_currency() -> String {
  "USD".to_string()
}

impl User {
  pub fn new(id: impl Into<String>, email: impl Into<String>) -> Self {
    let id = id.into();
    Self {
      user_id: id.clone(),
      id,
      email: email.into(),
      display_name: String::new(),
      currency: default_currency(),
      created_at: Utc::now(),
    }
  }
}

impl Record for User {
  fn id(&self) -> &str {
    &self.id
  }

  fn owner_id(&self) -> &str {
    &self.user_id
  }

  fn entity_kind() -> EntityKind {
    EntityKind::User
  }

  fn validate(&self) -> Result<(), ValidationError> {
    if !self.email.contains('@') {
      return Err(ValidationError::new("email", "must be an email address"));
    }
    if self.user_id != self.id {
      return Err(ValidationError::new("userId", "must equal id for a profile"));
    }
    Ok(())
  }
}
