//! Entity services, one per record kind.
//!
//! Every service shares the same remote store, local cache and error
//! reporter, handed in by the composition root.

mod budget;
mod category;
mod entity;
mod expense;
mod goal;

pub use budget::{budget_progress, BudgetProgress};
pub use category::default_categories;
pub use entity::{EntityService, Fetched, ReadSource};
pub use expense::MonthlyTotal;

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::LocalCache;
use crate::errors::ErrorReporter;
use crate::models::{Budget, Category, EntityKind, Expense, Goal, Record, User};
use crate::remote::RemoteStore;
use crate::sync::{PendingIndex, PendingSyncItem};

/// The set of entity services.
#[derive(Clone)]
pub struct Services {
  pub expenses: EntityService<Expense>,
  pub budgets: EntityService<Budget>,
  pub categories: EntityService<Category>,
  pub goals: EntityService<Goal>,
  pub users: EntityService<User>,
  pending: PendingIndex,
}

impl Services {
  pub fn new(
    remote: Arc<dyn RemoteStore>,
    cache: LocalCache,
    errors: ErrorReporter,
    timeout: Duration,
  ) -> Self {
    let pending = PendingIndex::default();
    Self {
      expenses: EntityService::new(remote.clone(), cache.clone(), errors.clone(), timeout)
        .with_pending(pending.clone()),
      budgets: EntityService::new(remote.clone(), cache.clone(), errors.clone(), timeout)
        .with_pending(pending.clone()),
      categories: EntityService::new(remote.clone(), cache.clone(), errors.clone(), timeout)
        .with_pending(pending.clone()),
      goals: EntityService::new(remote.clone(), cache.clone(), errors.clone(), timeout)
        .with_pending(pending.clone()),
      users: EntityService::new(remote, cache, errors, timeout).with_pending(pending.clone()),
      pending,
    }
  }

  /// Ids with queued mutations, shared by every service. The sync engine
  /// keeps it current.
  pub fn pending_index(&self) -> &PendingIndex {
    &self.pending
  }

  /// Dispatch a queued mutation to the service for its kind.
  pub async fn apply(&self, item: &PendingSyncItem) -> Result<()> {
    match item.entity_kind {
      EntityKind::Expense => self.expenses.apply(item).await,
      EntityKind::Budget => self.budgets.apply(item).await,
      EntityKind::Category => self.categories.apply(item).await,
      EntityKind::Goal => self.goals.apply(item).await,
      EntityKind::User => Err(eyre!("user profiles are not replayed from the sync queue")),
    }
  }

  /// Pull a user's records of `kind` into the local cache, skipping records
  /// with queued mutations.
  pub async fn refresh(&self, kind: EntityKind, user_id: &str) -> Result<usize> {
    match kind {
      EntityKind::Expense => self.expenses.refresh_for_user(user_id).await,
      EntityKind::Budget => self.budgets.refresh_for_user(user_id).await,
      EntityKind::Category => self.categories.refresh_for_user(user_id).await,
      EntityKind::Goal => self.goals.refresh_for_user(user_id).await,
      EntityKind::User => self.users.refresh_for_user(user_id).await,
    }
  }
}

/// Records whose mutations can go through the sync queue, and the service
/// that applies them.
pub trait Routed: Record {
  fn route(services: &Services) -> &EntityService<Self>;
}

impl Routed for Expense {
  fn route(services: &Services) -> &EntityService<Self> {
    &services.expenses
  }
}

impl Routed for Budget {
  fn route(services: &Services) -> &EntityService<Self> {
    &services.budgets
  }
}

impl Routed for Category {
  fn route(services: &Services) -> &EntityService<Self> {
    &services.categories
  }
}

impl Routed for Goal {
  fn route(services: &Services) -> &EntityService<Self> {
    &services.goals
  }
}
