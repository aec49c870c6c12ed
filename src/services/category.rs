use color_eyre::Result;
use std::collections::HashSet;
use tracing::info;

use super::entity::{EntityService, Fetched};
use crate::models::Category;

/// Built-in categories every user starts with: (name, icon, color).
const DEFAULT_CATEGORIES: [(&str, &str, &str); 8] = [
  ("Food", "restaurant", "#FF7043"),
  ("Transport", "directions_car", "#42A5F5"),
  ("Shopping", "shopping_bag", "#AB47BC"),
  ("Bills", "receipt", "#EF5350"),
  ("Entertainment", "movie", "#FFCA28"),
  ("Health", "favorite", "#66BB6A"),
  ("Education", "school", "#26A69A"),
  ("Other", "category", "#78909C"),
];

/// Fresh default categories for `user_id`.
pub fn default_categories(user_id: &str) -> Vec<Category> {
  DEFAULT_CATEGORIES
    .iter()
    .map(|(name, icon, color)| {
      let mut category = Category::new(user_id, *name, *icon, *color);
      category.is_default = true;
      category
    })
    .collect()
}

impl EntityService<Category> {
  /// Add the default categories the user does not have yet (by name,
  /// case-insensitive). Returns the categories that were created.
  ///
  /// The existing set comes from a normal read, so when the remote is
  /// unreachable the cache decides what already exists.
  pub async fn seed_defaults(&self, user_id: &str) -> Result<Vec<Category>> {
    let Fetched { data: existing, .. } = self.get_for_user(user_id).await;
    let names: HashSet<String> = existing.iter().map(|c| c.name.to_lowercase()).collect();

    let mut created = Vec::new();
    for category in default_categories(user_id) {
      if names.contains(&category.name.to_lowercase()) {
        continue;
      }
      created.push(self.add(category).await?);
    }

    info!(user_id, created = created.len(), "seeded default categories");
    Ok(created)
  }
}
