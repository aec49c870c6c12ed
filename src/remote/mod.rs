//! Remote document store boundary.
//!
//! The remote store is the source of truth. It holds one collection of JSON
//! documents per entity kind and answers owner/date/category queries. Errors
//! carry only a message; no status taxonomy is propagated.

mod http;
mod memory;

pub use http::HttpRemoteStore;
pub use memory::MemoryRemoteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use color_eyre::Result;
use serde_json::Value;

/// Document store operations used by the entity services.
#[async_trait]
pub trait RemoteStore: Send + Sync {
  /// Create (or overwrite) a document, returning the stored document.
  /// The stored document must keep the client-generated `id`.
  async fn create(&self, collection: &str, id: &str, doc: Value) -> Result<Value>;

  /// Replace a document, returning the stored document.
  async fn update(&self, collection: &str, id: &str, doc: Value) -> Result<Value>;

  /// Delete a document. Deleting a missing document succeeds.
  async fn delete(&self, collection: &str, id: &str) -> Result<()>;

  /// Fetch a single document.
  async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>>;

  /// Documents matching `query`.
  async fn query(&self, collection: &str, query: &RecordQuery) -> Result<Vec<Value>>;
}

/// Inclusive date window on a document field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateFilter {
  pub field: &'static str,
  pub from: DateTime<Utc>,
  pub to: DateTime<Utc>,
}

/// Category equality on a document field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryFilter {
  pub field: &'static str,
  pub category_id: String,
}

/// Predicate shared by remote queries and the local fallback path, so both
/// answer the same question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordQuery {
  pub owner_id: String,
  pub date: Option<DateFilter>,
  pub category: Option<CategoryFilter>,
}

impl RecordQuery {
  pub fn owned_by(owner_id: impl Into<String>) -> Self {
    Self {
      owner_id: owner_id.into(),
      date: None,
      category: None,
    }
  }

  pub fn between(mut self, field: &'static str, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
    self.date = Some(DateFilter { field, from, to });
    self
  }

  pub fn in_category(mut self, field: &'static str, category_id: impl Into<String>) -> Self {
    self.category = Some(CategoryFilter {
      field,
      category_id: category_id.into(),
    });
    self
  }

  /// Whether a document satisfies the query.
  pub fn matches(&self, doc: &Value) -> bool {
    if doc.get("userId").and_then(Value::as_str) != Some(self.owner_id.as_str()) {
      return false;
    }

    if let Some(date) = &self.date {
      let Some(at) = doc
        .get(date.field)
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
      else {
        return false;
      };
      if at < date.from || at > date.to {
        return false;
      }
    }

    if let Some(category) = &self.category {
      if doc.get(category.field).and_then(Value::as_str) != Some(category.category_id.as_str()) {
        return false;
      }
    }

    true
  }

  /// Query string pairs for the HTTP document API.
  pub fn to_params(&self) -> Vec<(&'static str, String)> {
    let mut params = vec![("userId", self.owner_id.clone())];
    if let Some(date) = &self.date {
      params.push(("dateField", date.field.to_string()));
      params.push(("from", date.from.to_rfc3339()));
      params.push(("to", date.to.to_rfc3339()));
    }
    if let Some(category) = &self.category {
      params.push(("categoryField", category.field.to_string()));
      params.push(("categoryId", category.category_id.clone()));
    }
    params
  }
}
