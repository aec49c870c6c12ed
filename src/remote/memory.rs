//! In-process remote store.
//!
//! Behaves like the document API (overwrite on create, idempotent delete) and
//! supports failure injection so callers can exercise offline paths.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use super::{RecordQuery, RemoteStore};

#[derive(Debug, Default)]
struct MemoryState {
  collections: HashMap<String, BTreeMap<String, Value>>,
  unavailable: bool,
  fail_next: usize,
  latency: Duration,
  writes: Vec<(String, String, String)>,
}

/// Remote store held in memory.
#[derive(Debug, Default)]
pub struct MemoryRemoteStore {
  state: Mutex<MemoryState>,
}

impl MemoryRemoteStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Make every call fail until switched back.
  pub fn set_unavailable(&self, unavailable: bool) {
    self.lock().unavailable = unavailable;
  }

  /// Fail the next `n` calls, then recover.
  pub fn fail_next(&self, n: usize) {
    self.lock().fail_next = n;
  }

  /// Delay every call by `latency`.
  pub fn set_latency(&self, latency: Duration) {
    self.lock().latency = latency;
  }

  /// Stored document, bypassing failure injection.
  pub fn document(&self, collection: &str, id: &str) -> Option<Value> {
    self
      .lock()
      .collections
      .get(collection)
      .and_then(|docs| docs.get(id))
      .cloned()
  }

  /// Insert a document directly, bypassing failure injection.
  pub fn insert(&self, collection: &str, id: &str, doc: Value) {
    self
      .lock()
      .collections
      .entry(collection.to_string())
      .or_default()
      .insert(id.to_string(), doc);
  }

  pub fn len(&self, collection: &str) -> usize {
    self
      .lock()
      .collections
      .get(collection)
      .map_or(0, BTreeMap::len)
  }

  /// Successful writes as `(operation, collection, id)`, in order.
  pub fn writes(&self) -> Vec<(String, String, String)> {
    self.lock().writes.clone()
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
    // A poisoned lock only means a test panicked mid-call; keep going.
    self.state.lock().unwrap_or_else(|e| e.into_inner())
  }

  /// Apply latency and failure injection for one call.
  async fn admit(&self, op: &str, collection: &str) -> Result<()> {
    let latency = self.lock().latency;
    if !latency.is_zero() {
      tokio::time::sleep(latency).await;
    }

    let mut state = self.lock();
    if state.unavailable {
      return Err(eyre!("{} {} failed: remote store unavailable", op, collection));
    }
    if state.fail_next > 0 {
      state.fail_next -= 1;
      return Err(eyre!("{} {} failed: injected failure", op, collection));
    }
    Ok(())
  }

  fn record_write(&self, op: &str, collection: &str, id: &str) {
    self
      .lock()
      .writes
      .push((op.to_string(), collection.to_string(), id.to_string()));
  }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
  async fn create(&self, collection: &str, id: &str, doc: Value) -> Result<Value> {
    self.admit("create", collection).await?;
    self.insert(collection, id, doc.clone());
    self.record_write("create", collection, id);
    Ok(doc)
  }

  async fn update(&self, collection: &str, id: &str, doc: Value) -> Result<Value> {
    self.admit("update", collection).await?;
    if self.document(collection, id).is_none() {
      return Err(eyre!("update {}/{} failed: document not found", collection, id));
    }
    self.insert(collection, id, doc.clone());
    self.record_write("update", collection, id);
    Ok(doc)
  }

  async fn delete(&self, collection: &str, id: &str) -> Result<()> {
    self.admit("delete", collection).await?;
    if let Some(docs) = self.lock().collections.get_mut(collection) {
      docs.remove(id);
    }
    self.record_write("delete", collection, id);
    Ok(())
  }

  async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>> {
    self.admit("get", collection).await?;
    Ok(self.document(collection, id))
  }

  async fn query(&self, collection: &str, query: &RecordQuery) -> Result<Vec<Value>> {
    self.admit("query", collection).await?;
    Ok(
      self
        .lock()
        .collections
        .get(collection)
        .map(|docs| docs.values().filter(|doc| query.matches(doc)).cloned().collect())
        .unwrap_or_default(),
    )
  }
}
