use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::record::{non_empty, EntityKind, Record, ValidationError};

/// Spending category (e.g. "Food").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
  pub id: String,
  pub user_id: String,
  pub name: String,
  #[serde(default)]
  pub icon: String,
  #[serde(default)]
  pub color: String,
  #[serde(default)]
  pub is_default: bool,
  pub created_at: DateTime<Utc>,
}

impl Category {
  pub fn new(
    user_id: impl Into<String>,
    name: impl Into<String>,
    icon: impl Into<String>,
    color: impl Into<String>,
  ) -> Self {
    Self {
      id: super::new_id(),
      user_id: user_id.into(),
      name: name.into(),
      icon: icon.into(),
      color: color.into(),
      is_default: false,
      created_at: Utc::now(),
    }
  }
}

impl Record for Category {
  fn id(&self) -> &str {
    &self.id
  }

  fn owner_id(&self) -> &str {
    &self.user_id
  }

  fn entity_kind() -> EntityKind {
    EntityKind::Category
  }

  fn validate(&self) -> Result<(), ValidationError> {
    non_empty("name", &self.name)
  }
}
