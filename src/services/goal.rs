use chrono::Utc;
use color_eyre::{eyre::eyre, Result};

use super::entity::EntityService;
use crate::models::{Goal, GoalStatus, ValidationError};

impl EntityService<Goal> {
  /// Add money to a goal, completing it once the target is reached.
  ///
  /// The goal is looked up remotely (falling back to the cache) and written
  /// back through [`EntityService::update`].
  pub async fn add_contribution(&self, goal_id: &str, amount: f64) -> Result<Goal> {
    if !amount.is_finite() || amount <= 0.0 {
      return Err(ValidationError::new("amount", "must be a positive amount").into());
    }

    let mut goal = self
      .get_by_id(goal_id)
      .await
      .data
      .ok_or_else(|| eyre!("goal {} not found", goal_id))?;

    goal.current_amount += amount;
    if goal.current_amount >= goal.target_amount {
      goal.status = GoalStatus::Completed;
    }
    goal.updated_at = Utc::now();

    self.update(goal).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::LocalCache;
  use crate::errors::ErrorReporter;
  use crate::remote::MemoryRemoteStore;
  use std::sync::Arc;
  use std::time::Duration;

  #[tokio::test]
  async fn test_contribution_completes_goal() {
    let svc = EntityService::<Goal>::new(
      Arc::new(MemoryRemoteStore::new()),
      LocalCache::in_memory(),
      ErrorReporter::default(),
      Duration::from_secs(1),
    );
    let goal = svc.add(Goal::new("u1", "Laptop", 100.0, Utc::now())).await.unwrap();

    let goal = svc.add_contribution(&goal.id, 40.0).await.unwrap();
    assert_eq!(goal.status, GoalStatus::Active);

    let goal = svc.add_contribution(&goal.id, 60.0).await.unwrap();
    assert_eq!(goal.status, GoalStatus::Completed);
    assert_eq!(goal.current_amount, 100.0);

    assert!(svc.add_contribution(&goal.id, 0.0).await.is_err());
    assert!(svc.add_contribution("missing", 5.0).await.is_err());
  }
}
