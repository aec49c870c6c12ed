//! Reported sync progress.

use chrono::{DateTime, Utc};

use super::queue::SyncOperation;
use crate::models::EntityKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
  Idle,
  Syncing,
  Success,
  Error,
  Partial,
}

impl SyncState {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Idle => "idle",
      Self::Syncing => "syncing",
      Self::Success => "success",
      Self::Error => "error",
      Self::Partial => "partial",
    }
  }
}

/// One failed replay attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncError {
  pub item_id: String,
  pub entity_kind: EntityKind,
  pub entity_id: String,
  pub operation: SyncOperation,
  pub message: String,
  /// Attempt number that failed (1-based)
  pub attempt: u32,
  /// The item hit the retry ceiling and was removed
  pub dropped: bool,
  pub occurred_at: DateTime<Utc>,
}

/// Progress of the current or last sync pass. Derived, never authoritative.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncStatus {
  pub state: SyncState,
  pub total_items: usize,
  pub synced_items: usize,
  pub failed_items: usize,
  /// Items skipped because an earlier item for the same record failed
  pub deferred_items: usize,
  pub last_sync_at: Option<DateTime<Utc>>,
  pub errors: Vec<SyncError>,
}

impl Default for SyncStatus {
  fn default() -> Self {
    Self::idle(None)
  }
}

impl SyncStatus {
  pub fn idle(last_sync_at: Option<DateTime<Utc>>) -> Self {
    Self {
      state: SyncState::Idle,
      total_items: 0,
      synced_items: 0,
      failed_items: 0,
      deferred_items: 0,
      last_sync_at,
      errors: Vec::new(),
    }
  }

  pub fn started(total_items: usize, last_sync_at: Option<DateTime<Utc>>) -> Self {
    Self {
      state: SyncState::Syncing,
      total_items,
      ..Self::idle(last_sync_at)
    }
  }

  /// Close the pass: `success` with no errors, `partial` when something
  /// still went through, `error` otherwise. `last_sync_at` only moves when
  /// at least one item was applied.
  pub fn finish(mut self, at: DateTime<Utc>) -> Self {
    self.state = if self.errors.is_empty() {
      SyncState::Success
    } else if self.synced_items > 0 {
      SyncState::Partial
    } else {
      SyncState::Error
    };
    if self.synced_items > 0 {
      self.last_sync_at = Some(at);
    }
    self
  }

  pub fn is_syncing(&self) -> bool {
    self.state == SyncState::Syncing
  }
}
