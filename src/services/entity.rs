//! Generic entity service: remote first, local mirror.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::cache::LocalCache;
use crate::errors::{ErrorCategory, ErrorReporter};
use crate::models::{Categorized, Dated, Record};
use crate::remote::{RecordQuery, RemoteStore};
use crate::sync::{PendingIndex, PendingSyncItem, SyncOperation};

/// Where read data came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadSource {
  /// Fresh answer from the remote store
  Remote,
  /// Remote read failed; data is the local cache's answer to the same query
  CachedFallback { reason: String },
}

/// Result of a read, tagged with its source.
#[derive(Debug, Clone)]
pub struct Fetched<T> {
  pub data: T,
  pub source: ReadSource,
}

impl<T> Fetched<T> {
  pub fn remote(data: T) -> Self {
    Self {
      data,
      source: ReadSource::Remote,
    }
  }

  pub fn cached(data: T, reason: impl Into<String>) -> Self {
    Self {
      data,
      source: ReadSource::CachedFallback {
        reason: reason.into(),
      },
    }
  }

  pub fn is_fallback(&self) -> bool {
    matches!(self.source, ReadSource::CachedFallback { .. })
  }

  /// Transform the data, keeping the source.
  pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Fetched<U> {
    Fetched {
      data: f(self.data),
      source: self.source,
    }
  }
}

/// CRUD and queries for one entity kind.
///
/// Mutations write the remote store first and mirror the canonical record
/// into the local cache; remote failures are returned to the caller. Reads
/// try the remote store and on any failure answer from the local cache.
/// Records with queued mutations are answered from the local cache even when
/// the remote store responds, and the remote copy is not mirrored over them.
pub struct EntityService<T: Record> {
  remote: Arc<dyn RemoteStore>,
  cache: LocalCache,
  errors: ErrorReporter,
  timeout: Duration,
  pending: PendingIndex,
  _record: PhantomData<fn() -> T>,
}

impl<T: Record> Clone for EntityService<T> {
  fn clone(&self) -> Self {
    Self {
      remote: Arc::clone(&self.remote),
      cache: self.cache.clone(),
      errors: self.errors.clone(),
      timeout: self.timeout,
      pending: self.pending.clone(),
      _record: PhantomData,
    }
  }
}

impl<T: Record> EntityService<T> {
  pub fn new(
    remote: Arc<dyn RemoteStore>,
    cache: LocalCache,
    errors: ErrorReporter,
    timeout: Duration,
  ) -> Self {
    Self {
      remote,
      cache,
      errors,
      timeout,
      pending: PendingIndex::default(),
      _record: PhantomData,
    }
  }

  /// Share the sync engine's view of queued records.
  pub fn with_pending(mut self, pending: PendingIndex) -> Self {
    self.pending = pending;
    self
  }

  fn collection() -> &'static str {
    T::entity_kind().collection()
  }

  /// Run a remote call under the per-call timeout.
  async fn timed<R>(&self, op: &str, call: impl Future<Output = Result<R>>) -> Result<R> {
    match tokio::time::timeout(self.timeout, call).await {
      Ok(result) => result,
      Err(_) => Err(eyre!(
        "{} {} timed out after {:?}",
        op,
        Self::collection(),
        self.timeout
      )),
    }
  }

  // ==========================================================================
  // Mutations
  // ==========================================================================

  /// Create a record remotely, then cache the canonical copy.
  pub async fn add(&self, record: T) -> Result<T> {
    record.check()?;
    let doc = encode(&record)?;
    let stored = self
      .timed("create", self.remote.create(Self::collection(), record.id(), doc))
      .await?;
    let canonical = Self::canonical(&record, stored)?;
    self.cache.save(&canonical);
    debug!(kind = %T::entity_kind(), id = canonical.id(), "record created");
    Ok(canonical)
  }

  /// Replace a record remotely, then cache the canonical copy.
  pub async fn update(&self, record: T) -> Result<T> {
    record.check()?;
    let doc = encode(&record)?;
    let stored = self
      .timed("update", self.remote.update(Self::collection(), record.id(), doc))
      .await?;
    let canonical = Self::canonical(&record, stored)?;
    self.cache.save(&canonical);
    debug!(kind = %T::entity_kind(), id = canonical.id(), "record updated");
    Ok(canonical)
  }

  /// Decode the stored document; it must keep the client-generated id.
  fn canonical(sent: &T, stored: Value) -> Result<T> {
    let canonical = decode::<T>(stored)?;
    if canonical.id() != sent.id() {
      return Err(eyre!(
        "remote returned {} {} for {} {}",
        T::entity_kind(),
        canonical.id(),
        T::entity_kind(),
        sent.id()
      ));
    }
    Ok(canonical)
  }

  /// Delete a record remotely, then locally.
  pub async fn delete(&self, id: &str) -> Result<()> {
    self
      .timed("delete", self.remote.delete(Self::collection(), id))
      .await?;
    self.cache.delete::<T>(id);
    debug!(kind = %T::entity_kind(), id, "record deleted");
    Ok(())
  }

  /// Replay one queued mutation through the normal mutation path.
  pub async fn apply(&self, item: &PendingSyncItem) -> Result<()> {
    if item.entity_kind != T::entity_kind() {
      return Err(eyre!(
        "pending item {} is a {} mutation, not {}",
        item.id,
        item.entity_kind,
        T::entity_kind()
      ));
    }

    match item.operation {
      SyncOperation::Create => self.add(item.decode()?).await.map(|_| ()),
      SyncOperation::Update => self.update(item.decode()?).await.map(|_| ()),
      SyncOperation::Delete => self.delete(&item.entity_id).await,
    }
  }

  // ==========================================================================
  // Reads
  // ==========================================================================

  /// All records owned by `user_id`.
  pub async fn get_for_user(&self, user_id: &str) -> Fetched<Vec<T>> {
    self.fetch(RecordQuery::owned_by(user_id)).await
  }

  /// Records whose date field falls inside `[from, to]`.
  pub async fn get_for_date_range(
    &self,
    user_id: &str,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
  ) -> Fetched<Vec<T>>
  where
    T: Dated,
  {
    self
      .fetch(RecordQuery::owned_by(user_id).between(T::DATE_FIELD, from, to))
      .await
  }

  /// Records in one category.
  pub async fn get_for_category(&self, user_id: &str, category_id: &str) -> Fetched<Vec<T>>
  where
    T: Categorized,
  {
    self
      .fetch(RecordQuery::owned_by(user_id).in_category(T::CATEGORY_FIELD, category_id))
      .await
  }

  /// A single record by id.
  pub async fn get_by_id(&self, id: &str) -> Fetched<Option<T>> {
    if self.pending.contains(id) {
      debug!(kind = %T::entity_kind(), id, "record has queued changes, serving local copy");
      return Fetched::remote(self.cache.get_by_id::<T>(id));
    }

    let remote = self
      .timed("get", self.remote.get(Self::collection(), id))
      .await
      .and_then(|doc| doc.map(decode::<T>).transpose());

    match remote {
      Ok(record) => {
        if let Some(record) = &record {
          self.cache.save(record);
        }
        Fetched::remote(record)
      }
      Err(e) => {
        let reason = self.note_fallback("get", &e);
        Fetched::cached(self.cache.get_by_id::<T>(id), reason)
      }
    }
  }

  /// Run `query` remotely; on any failure answer it from the local cache.
  pub async fn fetch(&self, query: RecordQuery) -> Fetched<Vec<T>> {
    match self.query_remote(&query).await {
      Ok(records) => Fetched::remote(self.mirror(&query, records)),
      Err(e) => {
        let reason = self.note_fallback("query", &e);
        Fetched::cached(self.query_local(&query), reason)
      }
    }
  }

  /// Pull every record owned by `user_id` into the cache, leaving records
  /// with queued mutations untouched. Returns the number of records written.
  /// Errors propagate.
  pub async fn refresh_for_user(&self, user_id: &str) -> Result<usize> {
    let shadowed = self.pending.snapshot();
    let records: Vec<T> = self
      .query_remote(&RecordQuery::owned_by(user_id))
      .await?
      .into_iter()
      .filter(|record| !shadowed.contains(record.id()))
      .collect();
    self.cache.save_all(&records);
    Ok(records.len())
  }

  /// Cache a remote answer and overlay the local copies of queued records.
  ///
  /// A queued record keeps its place in the remote ordering if the local copy
  /// still matches `query`. Queued records the remote does not know yet are
  /// appended. A queued delete removes the record from the answer.
  fn mirror(&self, query: &RecordQuery, remote: Vec<T>) -> Vec<T> {
    let shadowed = self.pending.snapshot();
    if shadowed.is_empty() {
      self.cache.save_all(&remote);
      return remote;
    }

    let fresh: Vec<T> = remote
      .iter()
      .filter(|record| !shadowed.contains(record.id()))
      .cloned()
      .collect();
    self.cache.save_all(&fresh);

    let mut local: Vec<T> = self
      .query_local(query)
      .into_iter()
      .filter(|record| shadowed.contains(record.id()))
      .collect();

    let mut records = Vec::with_capacity(remote.len() + local.len());
    for record in remote {
      if !shadowed.contains(record.id()) {
        records.push(record);
      } else if let Some(pos) = local.iter().position(|l| l.id() == record.id()) {
        records.push(local.remove(pos));
      }
    }
    records.extend(local);
    records
  }

  async fn query_remote(&self, query: &RecordQuery) -> Result<Vec<T>> {
    let docs = self
      .timed("query", self.remote.query(Self::collection(), query))
      .await?;
    docs.into_iter().map(decode::<T>).collect()
  }

  /// Local answer to `query`, using the same predicate as the remote.
  fn query_local(&self, query: &RecordQuery) -> Vec<T> {
    self
      .cache
      .get_by_owner::<T>(&query.owner_id)
      .into_iter()
      .filter(|record| {
        serde_json::to_value(record)
          .map(|doc| query.matches(&doc))
          .unwrap_or(false)
      })
      .collect()
  }

  fn note_fallback(&self, op: &str, error: &color_eyre::Report) -> String {
    let reason = error.to_string();
    warn!(
      kind = %T::entity_kind(),
      op,
      error = %reason,
      "remote read failed, serving local cache"
    );
    self.errors.report(ErrorCategory::Network, reason.clone());
    reason
  }
}

fn encode<T: Record>(record: &T) -> Result<Value> {
  serde_json::to_value(record).map_err(|e| eyre!("Failed to serialize {}: {}", T::entity_kind(), e))
}

fn decode<T: Record>(doc: Value) -> Result<T> {
  serde_json::from_value(doc).map_err(|e| eyre!("Failed to parse {}: {}", T::entity_kind(), e))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::models::{Expense, ValidationError};
  use crate::remote::MemoryRemoteStore;
  use chrono::TimeZone;

  fn service(remote: Arc<MemoryRemoteStore>, cache: LocalCache) -> EntityService<Expense> {
    EntityService::new(remote, cache, ErrorReporter::default(), Duration::from_secs(1))
  }

  fn expense_on(day: u32, amount: f64, category: &str) -> Expense {
    Expense::new("u1", amount, category, "test")
      .with_date(Utc.with_ymd_and_hms(2024, 3, day, 12, 0, 0).unwrap())
  }

  #[tokio::test]
  async fn test_add_mirrors_into_cache() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let cache = LocalCache::in_memory();
    let svc = service(remote.clone(), cache.clone());

    let expense = expense_on(1, 25.5, "food");
    let stored = svc.add(expense.clone()).await.unwrap();

    assert_eq!(stored, expense);
    assert!(remote.document("expenses", &expense.id).is_some());
    assert_eq!(cache.get_by_id::<Expense>(&expense.id), Some(expense));
  }

  #[tokio::test]
  async fn test_failed_add_surfaces_error_and_leaves_cache() {
    let remote = Arc::new(MemoryRemoteStore::new());
    remote.set_unavailable(true);
    let cache = LocalCache::in_memory();
    let svc = service(remote, cache.clone());

    let expense = expense_on(1, 10.0, "food");
    assert!(svc.add(expense.clone()).await.is_err());
    assert!(cache.get_by_id::<Expense>(&expense.id).is_none());
  }

  #[tokio::test]
  async fn test_validation_error_is_downcastable() {
    let svc = service(Arc::new(MemoryRemoteStore::new()), LocalCache::in_memory());
    let err = svc.add(expense_on(1, -3.0, "food")).await.unwrap_err();
    let validation = err.downcast_ref::<ValidationError>().unwrap();
    assert_eq!(validation.field, "amount");
  }

  #[tokio::test]
  async fn test_read_falls_back_to_exact_cache_contents() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let cache = LocalCache::in_memory();
    let svc = service(remote.clone(), cache.clone());

    let cached = vec![expense_on(2, 5.0, "food"), expense_on(3, 7.0, "fuel")];
    cache.save_all(&cached);
    // Another owner's record must not leak into the answer
    cache.save(&Expense::new("u2", 99.0, "food", "other"));
    // Remote holds something the cache lacks
    let remote_only = expense_on(4, 1.0, "food");
    remote.insert("expenses", &remote_only.id, serde_json::to_value(&remote_only).unwrap());

    remote.set_unavailable(true);
    let fetched = svc.get_for_user("u1").await;
    assert!(fetched.is_fallback());
    assert_eq!(fetched.data, cached);

    let food = svc.get_for_category("u1", "food").await;
    assert!(food.is_fallback());
    assert_eq!(food.data, vec![cached[0].clone()]);

    let from = Utc.with_ymd_and_hms(2024, 3, 3, 0, 0, 0).unwrap();
    let to = Utc.with_ymd_and_hms(2024, 3, 31, 0, 0, 0).unwrap();
    let ranged = svc.get_for_date_range("u1", from, to).await;
    assert_eq!(ranged.data, vec![cached[1].clone()]);
  }

  #[tokio::test]
  async fn test_remote_read_refreshes_cache() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let cache = LocalCache::in_memory();
    let svc = service(remote.clone(), cache.clone());

    let expense = expense_on(5, 12.0, "food");
    remote.insert("expenses", &expense.id, serde_json::to_value(&expense).unwrap());

    let fetched = svc.get_for_user("u1").await;
    assert_eq!(fetched.source, ReadSource::Remote);
    assert_eq!(fetched.data, vec![expense.clone()]);
    assert_eq!(cache.get_by_id::<Expense>(&expense.id), Some(expense));
  }

  #[tokio::test]
  async fn test_get_by_id_falls_back() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let cache = LocalCache::in_memory();
    let svc = service(remote.clone(), cache.clone());
    let expense = expense_on(6, 3.0, "food");
    cache.save(&expense);

    remote.fail_next(1);
    let fetched = svc.get_by_id(&expense.id).await;
    assert!(fetched.is_fallback());
    assert_eq!(fetched.data, Some(expense.clone()));

    // Remote answers "missing" authoritatively
    let fetched = svc.get_by_id(&expense.id).await;
    assert_eq!(fetched.source, ReadSource::Remote);
    assert!(fetched.data.is_none());
  }

  #[tokio::test]
  async fn test_slow_remote_times_out() {
    let remote = Arc::new(MemoryRemoteStore::new());
    remote.set_latency(Duration::from_millis(200));
    let svc = EntityService::<Expense>::new(
      remote,
      LocalCache::in_memory(),
      ErrorReporter::default(),
      Duration::from_millis(20),
    );

    let err = svc.add(expense_on(7, 1.0, "food")).await.unwrap_err();
    assert!(err.to_string().contains("timed out"));
  }

  /// Stores documents under a server-assigned id.
  struct RenamingStore;

  #[async_trait::async_trait]
  impl RemoteStore for RenamingStore {
    async fn create(&self, _collection: &str, _id: &str, mut doc: Value) -> Result<Value> {
      doc["id"] = Value::String("server-1".to_string());
      Ok(doc)
    }

    async fn update(&self, collection: &str, id: &str, doc: Value) -> Result<Value> {
      self.create(collection, id, doc).await
    }

    async fn delete(&self, _collection: &str, _id: &str) -> Result<()> {
      Ok(())
    }

    async fn get(&self, _collection: &str, _id: &str) -> Result<Option<Value>> {
      Ok(None)
    }

    async fn query(&self, _collection: &str, _query: &RecordQuery) -> Result<Vec<Value>> {
      Ok(Vec::new())
    }
  }

  #[tokio::test]
  async fn test_rewritten_id_is_rejected_and_not_cached() {
    let cache = LocalCache::in_memory();
    let svc = EntityService::<Expense>::new(
      Arc::new(RenamingStore),
      cache.clone(),
      ErrorReporter::default(),
      Duration::from_secs(1),
    );

    let expense = expense_on(9, 4.0, "food");
    let err = svc.add(expense.clone()).await.unwrap_err();
    assert!(err.to_string().contains("server-1"));
    assert!(svc.update(expense.clone()).await.is_err());

    assert!(cache.get_by_id::<Expense>(&expense.id).is_none());
    assert!(cache.get_by_id::<Expense>("server-1").is_none());
  }

  #[tokio::test]
  async fn test_queued_records_shadow_remote_reads() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let cache = LocalCache::in_memory();
    let pending = PendingIndex::default();
    let svc = service(remote.clone(), cache.clone()).with_pending(pending.clone());

    // Remote still holds the old amount; the edit and a new record are queued
    let stale = expense_on(10, 10.0, "food");
    let edited = Expense {
      amount: 400.0,
      ..stale.clone()
    };
    let created = expense_on(11, 2.0, "food");
    let deleted = expense_on(12, 3.0, "food");
    let untouched = expense_on(13, 5.0, "food");
    for e in [&stale, &deleted, &untouched] {
      remote.insert("expenses", &e.id, serde_json::to_value(e).unwrap());
    }
    cache.save(&edited);
    cache.save(&created);
    pending.replace(
      [&edited.id, &created.id, &deleted.id]
        .into_iter()
        .cloned()
        .collect(),
    );

    let fetched = svc.get_for_user("u1").await;
    assert_eq!(fetched.source, ReadSource::Remote);
    let mut amounts: Vec<f64> = fetched.data.iter().map(|e| e.amount).collect();
    amounts.sort_by(|a, b| a.partial_cmp(b).unwrap());
    assert_eq!(amounts, vec![2.0, 5.0, 400.0]);

    assert_eq!(cache.get_by_id::<Expense>(&edited.id), Some(edited.clone()));
    assert!(cache.get_by_id::<Expense>(&deleted.id).is_none());
    assert_eq!(cache.get_by_id::<Expense>(&untouched.id), Some(untouched));

    let single = svc.get_by_id(&edited.id).await;
    assert_eq!(single.data, Some(edited.clone()));
    assert_eq!(cache.get_by_id::<Expense>(&edited.id), Some(edited.clone()));

    assert_eq!(svc.refresh_for_user("u1").await.unwrap(), 1);
    assert_eq!(cache.get_by_id::<Expense>(&edited.id), Some(edited));
  }

  #[tokio::test]
  async fn test_delete_removes_both_copies() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let cache = LocalCache::in_memory();
    let svc = service(remote.clone(), cache.clone());

    let expense = svc.add(expense_on(8, 2.0, "food")).await.unwrap();
    svc.delete(&expense.id).await.unwrap();
    assert!(remote.document("expenses", &expense.id).is_none());
    assert!(cache.get_by_id::<Expense>(&expense.id).is_none());
  }
}
