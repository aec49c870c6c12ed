//! Expense aggregation helpers.
//!
//! Aggregates reduce whatever the underlying read returned, so they inherit
//! its staleness; the `ReadSource` is carried through.

use chrono::{DateTime, Datelike, TimeZone, Utc};
use std::collections::BTreeMap;

use super::entity::{EntityService, Fetched};
use crate::models::Expense;

/// Spending total for one calendar month.
#[derive(Debug, Clone, PartialEq)]
pub struct MonthlyTotal {
  pub month: u32,
  pub total: f64,
  pub count: usize,
}

impl EntityService<Expense> {
  /// Sum of expense amounts dated inside `[from, to]`.
  pub async fn total_spent(
    &self,
    user_id: &str,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
  ) -> Fetched<f64> {
    self
      .get_for_date_range(user_id, from, to)
      .await
      .map(|expenses| expenses.iter().map(|e| e.amount).sum())
  }

  /// Spending per category id inside `[from, to]`.
  pub async fn category_breakdown(
    &self,
    user_id: &str,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
  ) -> Fetched<BTreeMap<String, f64>> {
    self
      .get_for_date_range(user_id, from, to)
      .await
      .map(|expenses| breakdown(&expenses))
  }

  /// Twelve monthly totals for `year` (months without spending included).
  pub async fn monthly_totals(&self, user_id: &str, year: i32) -> Fetched<Vec<MonthlyTotal>> {
    let from = Utc.with_ymd_and_hms(year, 1, 1, 0, 0, 0).single();
    let to = Utc.with_ymd_and_hms(year, 12, 31, 23, 59, 59).single();

    let fetched = match (from, to) {
      (Some(from), Some(to)) => self.get_for_date_range(user_id, from, to).await,
      _ => Fetched::remote(Vec::new()),
    };

    fetched.map(|expenses| {
      let mut months: Vec<MonthlyTotal> = (1..=12)
        .map(|month| MonthlyTotal {
          month,
          total: 0.0,
          count: 0,
        })
        .collect();
      for expense in &expenses {
        let slot = &mut months[expense.date.month0() as usize];
        slot.total += expense.amount;
        slot.count += 1;
      }
      months
    })
  }
}

/// Sum amounts per category id.
pub(crate) fn breakdown(expenses: &[Expense]) -> BTreeMap<String, f64> {
  let mut totals = BTreeMap::new();
  for expense in expenses {
    *totals.entry(expense.category_id.clone()).or_insert(0.0) += expense.amount;
  }
  totals
}
