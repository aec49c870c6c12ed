//! Budget helpers.

use chrono::{DateTime, Utc};

use super::entity::{EntityService, Fetched};
use crate::models::{Budget, Expense};

/// How much of a budget has been used.
#[derive(Debug, Clone, PartialEq)]
pub struct BudgetProgress {
  pub spent: f64,
  pub remaining: f64,
  /// `spent / amount`, may exceed 1
  pub ratio: f64,
  /// Ratio reached the budget's alert threshold
  pub alert: bool,
  pub exceeded: bool,
}

/// Progress of `budget` given a set of expenses. Only expenses in the
/// budget's category and window count.
pub fn budget_progress(budget: &Budget, expenses: &[Expense]) -> BudgetProgress {
  let spent: f64 = expenses
    .iter()
    .filter(|e| e.user_id == budget.user_id)
    .filter(|e| e.category_id == budget.category_id)
    .filter(|e| budget.covers(e.date))
    .map(|e| e.amount)
    .sum();

  let ratio = if budget.amount > 0.0 {
    spent / budget.amount
  } else {
    0.0
  };

  BudgetProgress {
    spent,
    remaining: (budget.amount - spent).max(0.0),
    ratio,
    alert: ratio >= budget.alert_threshold,
    exceeded: spent > budget.amount,
  }
}

impl EntityService<Budget> {
  /// Budgets whose window contains `at`.
  pub async fn active_budgets(&self, user_id: &str, at: DateTime<Utc>) -> Fetched<Vec<Budget>> {
    self
      .get_for_user(user_id)
      .await
      .map(|budgets| budgets.into_iter().filter(|b| b.covers(at)).collect())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::models::BudgetPeriod;
  use chrono::TimeZone;

  fn march_budget() -> Budget {
    let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
    Budget::new("u1", "food", 100.0, BudgetPeriod::Monthly, start)
  }

  fn spend(day: u32, month: u32, amount: f64, category: &str) -> Expense {
    Expense::new("u1", amount, category, "")
      .with_date(Utc.with_ymd_and_hms(2024, month, day, 12, 0, 0).unwrap())
  }

  #[test]
  fn test_progress_counts_only_matching_expenses() {
    let budget = march_budget();
    let expenses = vec![
      spend(2, 3, 30.0, "food"),
      spend(20, 3, 55.0, "food"),
      spend(5, 3, 500.0, "fuel"),
      spend(15, 4, 80.0, "food"),
    ];

    let progress = budget_progress(&budget, &expenses);
    assert_eq!(progress.spent, 85.0);
    assert_eq!(progress.remaining, 15.0);
    assert!(progress.alert);
    assert!(!progress.exceeded);
  }

  #[test]
  fn test_progress_exceeded() {
    let budget = march_budget();
    let progress = budget_progress(&budget, &[spend(3, 3, 120.0, "food")]);
    assert!(progress.exceeded);
    assert_eq!(progress.remaining, 0.0);
    assert!(progress.ratio > 1.0);
  }
}
