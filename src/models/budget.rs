use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};

use super::record::{non_empty, positive_amount, Categorized, Dated, EntityKind, Record, ValidationError};

/// Budget period length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetPeriod {
  Weekly,
  Monthly,
  Yearly,
}

impl BudgetPeriod {
  /// End of a period starting at `start`.
  pub fn end_from(self, start: DateTime<Utc>) -> DateTime<Utc> {
    match self {
      Self::Weekly => start + Duration::weeks(1),
      Self::Monthly => start
        .checked_add_months(Months::new(1))
        .unwrap_or(start + Duration::days(30)),
      Self::Yearly => start
        .checked_add_months(Months::new(12))
        .unwrap_or(start + Duration::days(365)),
    }
  }
}

/// Spending limit for one category over a period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Budget {
  pub id: String,
  pub user_id: String,
  pub category_id: String,
  pub amount: f64,
  pub period: BudgetPeriod,
  pub start_date: DateTime<Utc>,
  pub end_date: DateTime<Utc>,
  /// Fraction of `amount` at which the budget raises an alert
  #[serde(default = "default_alert_threshold")]
  pub alert_threshold: f64,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

fn default_alert_threshold() -> f64 {
  0.8
}

impl Budget {
  pub fn new(
    user_id: impl Into<String>,
    category_id: impl Into<String>,
    amount: f64,
    period: BudgetPeriod,
    start_date: DateTime<Utc>,
  ) -> Self {
    let now = Utc::now();
    Self {
      id: super::new_id(),
      user_id: user_id.into(),
      category_id: category_id.into(),
      amount,
      period,
      start_date,
      end_date: period.end_from(start_date),
      alert_threshold: default_alert_threshold(),
      created_at: now,
      updated_at: now,
    }
  }

  /// Whether `at` falls inside the budget window (inclusive).
  pub fn covers(&self, at: DateTime<Utc>) -> bool {
    self.start_date <= at && at <= self.end_date
  }
}

impl Record for Budget {
  fn id(&self) -> &str {
    &self.id
  }

  fn owner_id(&self) -> &str {
    &self.user_id
  }

  fn entity_kind() -> EntityKind {
    EntityKind::Budget
  }

  fn validate(&self) -> Result<(), ValidationError> {
    positive_amount("amount", self.amount)?;
    non_empty("categoryId", &self.category_id)?;
    if self.end_date < self.start_date {
      return Err(ValidationError::new("endDate", "must not be before startDate"));
    }
    if !(self.alert_threshold > 0.0 && self.alert_threshold <= 1.0) {
      return Err(ValidationError::new("alertThreshold", "must be in (0, 1]"));
    }
    Ok(())
  }
}

impl Dated for Budget {
  const DATE_FIELD: &'static str = "startDate";
}

impl Categorized for Budget {}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;

  #[test]
  fn test_monthly_period_end() {
    let start = Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 0).unwrap();
    let end = BudgetPeriod::Monthly.end_from(start);
    assert_eq!(end, Utc.with_ymd_and_hms(2024, 2, 29, 0, 0, 0).unwrap());
  }

  #[test]
  fn test_rejects_bad_threshold() {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let mut budget = Budget::new("u1", "food", 300.0, BudgetPeriod::Monthly, start);
    budget.alert_threshold = 1.5;
    assert_eq!(budget.check().unwrap_err().field, "alertThreshold");
  }

  #[test]
  fn test_rejects_inverted_window() {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let mut budget = Budget::new("u1", "food", 300.0, BudgetPeriod::Weekly, start);
    budget.end_date = start - Duration::days(1);
    assert_eq!(budget.check().unwrap_err().field, "endDate");
  }
}
