//! Local record cache for offline reads.
//!
//! This module provides the on-device mirror of remote records:
//! - One store per entity kind, keyed by record id
//! - A scalar meta store (last sync time, optional pending queue journal)
//! - Corruption recovery: unreadable stores are recreated empty
//! - Degraded mode: a store that cannot be opened turns into a no-op
//!
//! No operation here returns an error. Failures are logged and surfaced as
//! empty results so the rest of the app falls back to remote-only behavior.

mod store;

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::models::{EntityKind, Record};
use crate::sync::PendingSyncItem;

use store::{Store, StoreSchema};

const LAST_SYNC_KEY: &str = "last_sync_at";
const PENDING_SYNC_KEY: &str = "pending_sync";

/// Process-wide local cache. Cloning yields another handle to the same stores.
#[derive(Clone)]
pub struct LocalCache {
  inner: Arc<CacheInner>,
}

struct CacheInner {
  stores: HashMap<EntityKind, Store>,
  meta: Store,
}

impl LocalCache {
  /// Open (or create) every store under `dir`.
  pub fn open(dir: &Path) -> Self {
    let stores = EntityKind::ALL
      .into_iter()
      .map(|kind| {
        let path = dir.join(format!("{}.db", kind.as_str()));
        (kind, Store::open(&path, kind.as_str(), StoreSchema::Records))
      })
      .collect();
    let meta = Store::open(&dir.join("meta.db"), "meta", StoreSchema::Meta);

    info!(dir = %dir.display(), "local cache ready");

    Self {
      inner: Arc::new(CacheInner { stores, meta }),
    }
  }

  /// Cache backed by private in-memory databases.
  pub fn in_memory() -> Self {
    let stores = EntityKind::ALL
      .into_iter()
      .map(|kind| (kind, Store::in_memory(kind.as_str(), StoreSchema::Records)))
      .collect();

    Self {
      inner: Arc::new(CacheInner {
        stores,
        meta: Store::in_memory("meta", StoreSchema::Meta),
      }),
    }
  }

  /// Cache where every store failed to initialize.
  pub fn disabled() -> Self {
    let stores = EntityKind::ALL
      .into_iter()
      .map(|kind| (kind, Store::disabled(kind.as_str())))
      .collect();

    Self {
      inner: Arc::new(CacheInner {
        stores,
        meta: Store::disabled("meta"),
      }),
    }
  }

  /// Whether the store for `kind` is usable.
  pub fn is_enabled(&self, kind: EntityKind) -> bool {
    self.store(kind).is_some_and(Store::is_enabled)
  }

  fn store(&self, kind: EntityKind) -> Option<&Store> {
    self.inner.stores.get(&kind)
  }

  fn store_for<T: Record>(&self) -> Option<&Store> {
    self.store(T::entity_kind())
  }

  // ==========================================================================
  // Typed record operations
  // ==========================================================================

  pub fn save<T: Record>(&self, record: &T) {
    let Some(store) = self.store_for::<T>() else {
      return;
    };
    match serde_json::to_vec(record) {
      Ok(data) => store.put(record.id(), record.owner_id(), &data),
      Err(e) => warn!(kind = %T::entity_kind(), id = record.id(), error = %e, "failed to serialize record"),
    }
  }

  pub fn save_all<T: Record>(&self, records: &[T]) {
    let Some(store) = self.store_for::<T>() else {
      return;
    };

    let rows: Vec<(String, String, Vec<u8>)> = records
      .iter()
      .filter_map(|record| match serde_json::to_vec(record) {
        Ok(data) => Some((record.id().to_string(), record.owner_id().to_string(), data)),
        Err(e) => {
          warn!(kind = %T::entity_kind(), id = record.id(), error = %e, "failed to serialize record");
          None
        }
      })
      .collect();

    store.put_all(&rows);
  }

  pub fn get_all<T: Record>(&self) -> Vec<T> {
    self
      .store_for::<T>()
      .map(|store| decode_rows(store.all()))
      .unwrap_or_default()
  }

  pub fn get_by_owner<T: Record>(&self, owner_id: &str) -> Vec<T> {
    self
      .store_for::<T>()
      .map(|store| decode_rows(store.by_owner(owner_id)))
      .unwrap_or_default()
  }

  pub fn get_by_id<T: Record>(&self, id: &str) -> Option<T> {
    let data = self.store_for::<T>()?.get(id)?;
    match serde_json::from_slice(&data) {
      Ok(record) => Some(record),
      Err(e) => {
        warn!(kind = %T::entity_kind(), id, error = %e, "dropping undecodable cached record");
        None
      }
    }
  }

  pub fn delete<T: Record>(&self, id: &str) {
    self.delete_kind(T::entity_kind(), id);
  }

  /// Delete by kind when the concrete type is not at hand.
  pub fn delete_kind(&self, kind: EntityKind, id: &str) {
    if let Some(store) = self.store(kind) {
      store.remove(id);
    }
  }

  pub fn clear<T: Record>(&self) {
    if let Some(store) = self.store_for::<T>() {
      store.clear();
    }
  }

  // ==========================================================================
  // Meta values
  // ==========================================================================

  pub fn last_sync_at(&self) -> Option<DateTime<Utc>> {
    let raw = self.inner.meta.meta_get(LAST_SYNC_KEY)?;
    DateTime::parse_from_rfc3339(&raw)
      .map(|dt| dt.with_timezone(&Utc))
      .ok()
  }

  pub fn set_last_sync_at(&self, at: DateTime<Utc>) {
    self.inner.meta.meta_set(LAST_SYNC_KEY, &at.to_rfc3339());
  }

  /// Journal the pending queue so it survives a restart.
  pub fn save_pending(&self, items: &[PendingSyncItem]) {
    match serde_json::to_string(items) {
      Ok(json) => self.inner.meta.meta_set(PENDING_SYNC_KEY, &json),
      Err(e) => warn!(error = %e, "failed to serialize pending queue"),
    }
  }

  pub fn load_pending(&self) -> Vec<PendingSyncItem> {
    let Some(raw) = self.inner.meta.meta_get(PENDING_SYNC_KEY) else {
      return Vec::new();
    };
    serde_json::from_str(&raw).unwrap_or_else(|e| {
      warn!(error = %e, "discarding unreadable pending queue journal");
      Vec::new()
    })
  }
}

fn decode_rows<T: Record>(rows: Vec<Vec<u8>>) -> Vec<T> {
  rows
    .into_iter()
    .filter_map(|data| serde_json::from_slice(&data).ok())
    .collect()
}
