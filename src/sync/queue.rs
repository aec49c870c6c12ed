//! Pending mutation queue.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::{Arc, RwLock};

use crate::models::{EntityKind, Record};

/// Mutation kind of a pending item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncOperation {
  Create,
  Update,
  Delete,
}

impl fmt::Display for SyncOperation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.pad(match self {
      Self::Create => "create",
      Self::Update => "update",
      Self::Delete => "delete",
    })
  }
}

/// A mutation that reached the local cache but not the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingSyncItem {
  pub id: String,
  pub entity_kind: EntityKind,
  pub operation: SyncOperation,
  /// Id of the record the mutation targets
  pub entity_id: String,
  /// Record snapshot (for deletes, just the id)
  pub payload: Value,
  pub enqueued_at: DateTime<Utc>,
  pub retry_count: u32,
}

impl PendingSyncItem {
  pub fn new(
    entity_kind: EntityKind,
    operation: SyncOperation,
    entity_id: impl Into<String>,
    payload: Value,
  ) -> Self {
    Self {
      id: uuid::Uuid::new_v4().to_string(),
      entity_kind,
      operation,
      entity_id: entity_id.into(),
      payload,
      enqueued_at: Utc::now(),
      retry_count: 0,
    }
  }

  /// Item carrying a snapshot of `record`.
  pub fn for_record<T: Record>(operation: SyncOperation, record: &T) -> Result<Self> {
    let payload = serde_json::to_value(record)
      .map_err(|e| eyre!("Failed to serialize {}: {}", T::entity_kind(), e))?;
    Ok(Self::new(T::entity_kind(), operation, record.id(), payload))
  }

  /// Delete item for a record of type `T`.
  pub fn for_delete<T: Record>(entity_id: &str) -> Self {
    Self::new(
      T::entity_kind(),
      SyncOperation::Delete,
      entity_id,
      serde_json::json!({ "id": entity_id }),
    )
  }

  /// Rebuild the record snapshot.
  pub fn decode<T: Record>(&self) -> Result<T> {
    serde_json::from_value(self.payload.clone()).map_err(|e| {
      eyre!(
        "Failed to decode {} payload of pending item {}: {}",
        self.entity_kind,
        self.id,
        e
      )
    })
  }
}

/// Shared view of the records shadowed by queued mutations.
///
/// The sync engine rewrites it on every queue change; entity services read
/// it so a remote answer never overwrites a local edit that has not been
/// replayed yet.
#[derive(Debug, Clone, Default)]
pub struct PendingIndex {
  ids: Arc<RwLock<HashSet<String>>>,
}

impl PendingIndex {
  pub fn contains(&self, entity_id: &str) -> bool {
    self
      .ids
      .read()
      .map(|ids| ids.contains(entity_id))
      .unwrap_or(false)
  }

  pub fn snapshot(&self) -> HashSet<String> {
    self.ids.read().map(|ids| ids.clone()).unwrap_or_default()
  }

  pub(crate) fn replace(&self, entity_ids: HashSet<String>) {
    let mut ids = self.ids.write().unwrap_or_else(|e| e.into_inner());
    *ids = entity_ids;
  }
}

/// What happened to an item after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
  /// Still queued; carries the new retry count
  Retry(u32),
  /// Removed after reaching the retry ceiling; carries the final count
  Dropped(u32),
  /// The item was no longer queued
  Missing,
}

/// FIFO list of pending items with a retry ceiling.
#[derive(Debug, Clone)]
pub struct SyncQueue {
  items: VecDeque<PendingSyncItem>,
  max_retries: u32,
}

impl SyncQueue {
  pub fn new(max_retries: u32) -> Self {
    Self {
      items: VecDeque::new(),
      max_retries,
    }
  }

  pub fn push(&mut self, item: PendingSyncItem) {
    self.items.push_back(item);
  }

  /// Replace the contents, e.g. from a journal. Order is kept.
  pub fn restore(&mut self, items: Vec<PendingSyncItem>) {
    self.items = items.into();
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  /// Copy of the current items in queue order.
  pub fn snapshot(&self) -> Vec<PendingSyncItem> {
    self.items.iter().cloned().collect()
  }

  /// Ids of the records that have at least one queued mutation.
  pub fn entity_ids(&self) -> HashSet<String> {
    self.items.iter().map(|i| i.entity_id.clone()).collect()
  }

  /// Remove an applied item. Returns whether it was queued.
  pub fn remove(&mut self, item_id: &str) -> bool {
    let before = self.items.len();
    self.items.retain(|i| i.id != item_id);
    self.items.len() != before
  }

  /// Count a failed attempt, dropping the item once it hits the ceiling.
  pub fn record_failure(&mut self, item_id: &str) -> FailureOutcome {
    let Some(pos) = self.items.iter().position(|i| i.id == item_id) else {
      return FailureOutcome::Missing;
    };

    self.items[pos].retry_count += 1;
    let count = self.items[pos].retry_count;
    if count >= self.max_retries {
      self.items.remove(pos);
      FailureOutcome::Dropped(count)
    } else {
      FailureOutcome::Retry(count)
    }
  }
}
