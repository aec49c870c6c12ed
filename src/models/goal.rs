use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::record::{non_empty, positive_amount, Dated, EntityKind, Record, ValidationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GoalStatus {
  Active,
  Completed,
  Paused,
}

/// Savings goal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Goal {
  pub id: String,
  pub user_id: String,
  pub title: String,
  pub target_amount: f64,
  #[serde(default)]
  pub current_amount: f64,
  pub target_date: DateTime<Utc>,
  pub status: GoalStatus,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl Goal {
  pub fn new(
    user_id: impl Into<String>,
    title: impl Into<String>,
    target_amount: f64,
    target_date: DateTime<Utc>,
  ) -> Self {
    let now = Utc::now();
    Self {
      id: super::new_id(),
      user_id: user_id.into(),
      title: title.into(),
      target_amount,
      current_amount: 0.0,
      target_date,
      status: GoalStatus::Active,
      created_at: now,
      updated_at: now,
    }
  }

  /// Saved fraction of the target, clamped to `[0, 1]`.
  pub fn progress(&self) -> f64 {
    if self.target_amount <= 0.0 {
      return 0.0;
    }
    (self.current_amount / self.target_amount).clamp(0.0, 1.0)
  }

  pub fn remaining(&self) -> f64 {
    (self.target_amount - self.current_amount).max(0.0)
  }
}

impl Record for Goal {
  fn id(&self) -> &str {
    &self.id
  }

  fn owner_id(&self) -> &str {
    &self.user_id
  }

  fn entity_kind() -> EntityKind {
    EntityKind::Goal
  }

  fn validate(&self) -> Result<(), ValidationError> {
    non_empty("title", &self.title)?;
    positive_amount("targetAmount", self.target_amount)?;
    if !self.current_amount.is_finite() || self.current_amount < 0.0 {
      return Err(ValidationError::new("currentAmount", "must not be negative"));
    }
    Ok(())
  }
}

impl Dated for Goal {
  const DATE_FIELD: &'static str = "targetDate";
}
