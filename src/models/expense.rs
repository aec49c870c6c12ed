use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::record::{non_empty, positive_amount, Categorized, Dated, EntityKind, Record, ValidationError};

/// A single spending entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Expense {
  pub id: String,
  pub user_id: String,
  pub amount: f64,
  pub category_id: String,
  #[serde(default)]
  pub description: String,
  pub date: DateTime<Utc>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub payment_method: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub receipt_url: Option<String>,
  #[serde(default)]
  pub tags: Vec<String>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl Expense {
  /// Create a new expense with a fresh id, dated now.
  pub fn new(
    user_id: impl Into<String>,
    amount: f64,
    category_id: impl Into<String>,
    description: impl Into<String>,
  ) -> Self {
    let now = Utc::now();
    Self {
      id: super::new_id(),
      user_id: user_id.into(),
      amount,
      category_id: category_id.into(),
      description: description.into(),
      date: now,
      payment_method: None,
      receipt_url: None,
      tags: Vec::new(),
      created_at: now,
      updated_at: now,
    }
  }

  pub fn with_date(mut self, date: DateTime<Utc>) -> Self {
    self.date = date;
    self
  }
}

impl Record for Expense {
  fn id(&self) -> &str {
    &self.id
  }

  fn owner_id(&self) -> &str {
    &self.user_id
  }

  fn entity_kind() -> EntityKind {
    EntityKind::Expense
  }

  fn validate(&self) -> Result<(), ValidationError> {
    positive_amount("amount", self.amount)?;
    non_empty("categoryId", &self.category_id)
  }
}

impl Dated for Expense {
  const DATE_FIELD: &'static str = "date";
}

impl Categorized for Expense {}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_serializes_camel_case() {
    let expense = Expense::new("u1", 25.5, "food", "lunch");
    let doc = serde_json::to_value(&expense).unwrap();
    assert_eq!(doc["userId"], "u1");
    assert_eq!(doc["categoryId"], "food");
    assert!(doc.get("paymentMethod").is_none());
  }

  #[test]
  fn test_rejects_non_positive_amount() {
    let expense = Expense::new("u1", 0.0, "food", "free lunch");
    let err = expense.check().unwrap_err();
    assert_eq!(err.field, "amount");

    let expense = Expense::new("u1", f64::NAN, "food", "nan");
    assert!(expense.check().is_err());
  }

  #[test]
  fn test_rejects_missing_category() {
    let expense = Expense::new("u1", 3.0, " ", "coffee");
    assert_eq!(expense.check().unwrap_err().field, "categoryId");
  }

  #[test]
  fn test_rejects_missing_owner() {
    let expense = Expense::new("", 3.0, "food", "coffee");
    assert_eq!(expense.check().unwrap_err().field, "userId");
  }
}
