//! Finance records that are cached locally and mirrored to the remote store.

mod budget;
mod category;
mod expense;
mod goal;
mod record;
mod user;

pub use budget::{Budget, BudgetPeriod};
pub use category::Category;
pub use expense::Expense;
pub use goal::{Goal, GoalStatus};
pub use record::{Categorized, Dated, EntityKind, Record, ValidationError};
pub use user::User;

/// Generate a fresh record id.
pub fn new_id() -> String {
  uuid::Uuid::new_v4().to_string()
}
