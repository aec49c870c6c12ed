//! Replay engine for the pending mutation queue.
//!
//! Mutations that could not reach the remote store are written to the local
//! cache and queued here. A pass replays a snapshot of the queue in FIFO
//! order through the entity services. Passes are triggered by enqueues while
//! online (after a debounce), by a periodic timer, by the connectivity
//! monitor going online, and on demand. All triggers share one single-flight
//! guard: a trigger arriving while a pass runs is ignored.

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::queue::{FailureOutcome, PendingIndex, PendingSyncItem, SyncOperation, SyncQueue};
use super::status::{SyncError, SyncStatus};
use crate::cache::LocalCache;
use crate::config::SyncConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::errors::{ErrorCategory, ErrorReporter};
use crate::models::{EntityKind, Record};
use crate::services::{Routed, Services};

/// Engine tuning.
#[derive(Debug, Clone)]
pub struct SyncSettings {
  pub interval: Duration,
  pub debounce: Duration,
  pub max_retries: u32,
  pub persist_queue: bool,
}

impl Default for SyncSettings {
  fn default() -> Self {
    Self::from(&SyncConfig::default())
  }
}

impl From<&SyncConfig> for SyncSettings {
  fn from(config: &SyncConfig) -> Self {
    Self {
      interval: Duration::from_secs(config.interval_secs),
      debounce: Duration::from_millis(config.debounce_ms),
      max_retries: config.max_retries,
      persist_queue: config.persist_queue,
    }
  }
}

/// Outcome of an offline-aware mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum Submission<T> {
  /// The remote store accepted the write; carries the canonical record
  Applied(T),
  /// Written locally and queued for replay; carries the pending item id
  Queued(String),
}

impl<T> Submission<T> {
  pub fn is_queued(&self) -> bool {
    matches!(self, Self::Queued(_))
  }

  pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Submission<U> {
    match self {
      Self::Applied(value) => Submission::Applied(f(value)),
      Self::Queued(id) => Submission::Queued(id),
    }
  }
}

/// Result of [`SyncEngine::force_sync_all`].
#[derive(Debug, Clone, Default)]
pub struct ForceSyncReport {
  /// Status of the replay pass, if one ran
  pub pass: Option<SyncStatus>,
  /// Records pulled per kind
  pub refreshed: BTreeMap<EntityKind, usize>,
  /// Kinds whose refresh failed, with the error
  pub failed: Vec<(EntityKind, String)>,
}

/// Sync engine handle. Cloning yields another handle to the same queue.
#[derive(Clone)]
pub struct SyncEngine {
  inner: Arc<EngineInner>,
}

struct EngineInner {
  services: Services,
  cache: LocalCache,
  connectivity: ConnectivityMonitor,
  errors: ErrorReporter,
  settings: SyncSettings,
  queue: Mutex<SyncQueue>,
  /// Record ids with queued items, shared with the entity services
  pending: PendingIndex,
  syncing: AtomicBool,
  status_tx: watch::Sender<SyncStatus>,
  debounce: Mutex<Option<JoinHandle<()>>>,
  tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Releases the single-flight flag when a pass ends.
struct PassGuard<'a>(&'a AtomicBool);

impl Drop for PassGuard<'_> {
  fn drop(&mut self) {
    self.0.store(false, Ordering::Release);
  }
}

impl SyncEngine {
  pub fn new(
    services: Services,
    cache: LocalCache,
    connectivity: ConnectivityMonitor,
    errors: ErrorReporter,
    settings: SyncSettings,
  ) -> Self {
    let (status_tx, _) = watch::channel(SyncStatus::idle(cache.last_sync_at()));
    let queue = SyncQueue::new(settings.max_retries);
    let pending = services.pending_index().clone();

    Self {
      inner: Arc::new(EngineInner {
        services,
        cache,
        connectivity,
        errors,
        settings,
        queue: Mutex::new(queue),
        pending,
        syncing: AtomicBool::new(false),
        status_tx,
        debounce: Mutex::new(None),
        tasks: Mutex::new(Vec::new()),
      }),
    }
  }

  /// Restore the journaled queue (if enabled) and start the periodic timer
  /// and the connectivity listener. Must be called inside a Tokio runtime.
  pub fn start(&self) {
    if self.inner.settings.persist_queue {
      let items = self.inner.cache.load_pending();
      if !items.is_empty() {
        info!(items = items.len(), "restored pending sync queue");
        self.mutate_queue(|queue| queue.restore(items));
      }
    }

    let mut tasks = Vec::new();

    let engine = self.clone();
    let interval = self.inner.settings.interval;
    tasks.push(tokio::spawn(async move {
      let mut ticker = tokio::time::interval(interval);
      ticker.tick().await;
      loop {
        ticker.tick().await;
        debug!("periodic sync tick");
        engine.sync_pending_items().await;
      }
    }));

    let engine = self.clone();
    let mut feed = self.inner.connectivity.subscribe();
    let mut was_online = feed.borrow_and_update().is_online;
    tasks.push(tokio::spawn(async move {
      while feed.changed().await.is_ok() {
        let online = feed.borrow_and_update().is_online;
        if online && !was_online {
          info!("connectivity restored, replaying pending items");
          engine.sync_pending_items().await;
        }
        was_online = online;
      }
    }));

    if let Ok(mut guard) = self.inner.tasks.lock() {
      guard.extend(tasks);
    }
  }

  /// Stop the background triggers. A pass already running completes.
  pub fn shutdown(&self) {
    if let Ok(mut tasks) = self.inner.tasks.lock() {
      for task in tasks.drain(..) {
        task.abort();
      }
    }
    if let Ok(mut slot) = self.inner.debounce.lock() {
      if let Some(task) = slot.take() {
        task.abort();
      }
    }
  }

  // ==========================================================================
  // Queue
  // ==========================================================================

  fn lock_queue(&self) -> MutexGuard<'_, SyncQueue> {
    // Queue operations never panic midway, so a poisoned lock still holds a
    // consistent queue.
    self.inner.queue.lock().unwrap_or_else(|e| e.into_inner())
  }

  /// Apply `f` to the queue, refresh the pending index and journal the
  /// result when persistence is on. Both happen under the queue lock so
  /// concurrent mutations are written in the order they were applied.
  fn mutate_queue<R>(&self, f: impl FnOnce(&mut SyncQueue) -> R) -> R {
    let mut queue = self.lock_queue();
    let result = f(&mut queue);
    self.inner.pending.replace(queue.entity_ids());
    if self.inner.settings.persist_queue {
      self.inner.cache.save_pending(&queue.snapshot());
    }
    result
  }

  /// Queue an item. While online a pass is scheduled after the debounce.
  pub fn enqueue(&self, item: PendingSyncItem) -> Result<()> {
    if !item.entity_kind.is_syncable() {
      return Err(eyre!(
        "{} mutations cannot be queued for sync",
        item.entity_kind
      ));
    }

    info!(
      item = %item.id,
      kind = %item.entity_kind,
      op = %item.operation,
      entity = %item.entity_id,
      "queued mutation for sync"
    );
    self.mutate_queue(|queue| queue.push(item));

    if self.inner.connectivity.is_online() {
      self.schedule_debounced();
    }
    Ok(())
  }

  /// Build and queue an item. Returns the pending item id.
  pub fn add_to_sync_queue(
    &self,
    kind: EntityKind,
    operation: SyncOperation,
    entity_id: &str,
    payload: Value,
  ) -> Result<String> {
    let item = PendingSyncItem::new(kind, operation, entity_id, payload);
    let id = item.id.clone();
    self.enqueue(item)?;
    Ok(id)
  }

  /// (Re)start the debounce timer. Later enqueues push the pass back so
  /// near-simultaneous enqueues share it.
  fn schedule_debounced(&self) {
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
      debug!("no runtime available, sync will run on the next trigger");
      return;
    };

    let engine = self.clone();
    let delay = self.inner.settings.debounce;
    let task = runtime.spawn(async move {
      tokio::time::sleep(delay).await;
      // Detach the pass so restarting the debounce never cancels it
      tokio::spawn(async move {
        engine.sync_pending_items().await;
      });
    });

    if let Ok(mut slot) = self.inner.debounce.lock() {
      if let Some(previous) = slot.replace(task) {
        previous.abort();
      }
    }
  }

  pub fn pending_items(&self) -> Vec<PendingSyncItem> {
    self.lock_queue().snapshot()
  }

  pub fn pending_count(&self) -> usize {
    self.lock_queue().len()
  }

  // ==========================================================================
  // Passes
  // ==========================================================================

  fn try_begin(&self) -> Option<PassGuard<'_>> {
    self
      .inner
      .syncing
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .ok()
      .map(|_| PassGuard(&self.inner.syncing))
  }

  pub fn is_syncing(&self) -> bool {
    self.inner.syncing.load(Ordering::Acquire)
  }

  /// Replay a snapshot of the queue. Returns `None` without doing anything
  /// when a pass is already running or the queue is empty.
  pub async fn sync_pending_items(&self) -> Option<SyncStatus> {
    let Some(_guard) = self.try_begin() else {
      debug!("sync pass already running, ignoring trigger");
      return None;
    };

    let snapshot = self.lock_queue().snapshot();
    if snapshot.is_empty() {
      return None;
    }

    info!(items = snapshot.len(), "sync pass started");
    let mut status = SyncStatus::started(snapshot.len(), self.inner.cache.last_sync_at());
    self.publish(status.clone());

    // Records whose earlier mutation failed in this pass
    let mut blocked: HashSet<String> = HashSet::new();

    for item in snapshot {
      if blocked.contains(&item.entity_id) {
        debug!(
          item = %item.id,
          entity = %item.entity_id,
          "deferring item behind failed mutation of the same record"
        );
        status.deferred_items += 1;
        continue;
      }

      match self.inner.services.apply(&item).await {
        Ok(()) => {
          self.mutate_queue(|queue| queue.remove(&item.id));
          status.synced_items += 1;
          debug!(item = %item.id, kind = %item.entity_kind, op = %item.operation, "pending item applied");
        }
        Err(e) => {
          let message = e.to_string();
          let outcome = self.mutate_queue(|queue| queue.record_failure(&item.id));
          let (attempt, dropped) = match outcome {
            FailureOutcome::Retry(count) => (count, false),
            FailureOutcome::Dropped(count) => (count, true),
            FailureOutcome::Missing => (item.retry_count + 1, false),
          };

          if dropped {
            warn!(
              item = %item.id,
              kind = %item.entity_kind,
              op = %item.operation,
              entity = %item.entity_id,
              attempt,
              error = %message,
              "dropping pending item after retry limit"
            );
          } else {
            warn!(
              item = %item.id,
              kind = %item.entity_kind,
              op = %item.operation,
              attempt,
              error = %message,
              "pending item failed, will retry"
            );
          }

          self.inner.errors.report(
            ErrorCategory::Sync,
            format!("{} {} failed: {}", item.operation, item.entity_kind, message),
          );

          status.failed_items += 1;
          status.errors.push(SyncError {
            item_id: item.id.clone(),
            entity_kind: item.entity_kind,
            entity_id: item.entity_id.clone(),
            operation: item.operation,
            message,
            attempt,
            dropped,
            occurred_at: Utc::now(),
          });
          blocked.insert(item.entity_id.clone());
        }
      }

      self.publish(status.clone());
    }

    let now = Utc::now();
    let status = status.finish(now);
    if status.synced_items > 0 {
      self.inner.cache.set_last_sync_at(now);
    }

    info!(
      state = status.state.as_str(),
      synced = status.synced_items,
      failed = status.failed_items,
      deferred = status.deferred_items,
      remaining = self.pending_count(),
      "sync pass finished"
    );
    self.publish(status.clone());
    Some(status)
  }

  /// Replay the queue, then pull every kind for `user_id` from the remote
  /// store. Requires connectivity.
  pub async fn force_sync_all(&self, user_id: &str) -> Result<ForceSyncReport> {
    if !self.inner.connectivity.is_online() {
      return Err(eyre!("Cannot force a full sync while offline"));
    }

    info!(user_id, "full sync requested");
    let mut report = ForceSyncReport {
      pass: self.sync_pending_items().await,
      ..Default::default()
    };

    // Records with unsynced local changes keep their local copy
    for kind in EntityKind::ALL {
      match self.inner.services.refresh(kind, user_id).await {
        Ok(count) => {
          report.refreshed.insert(kind, count);
        }
        Err(e) => {
          warn!(kind = %kind, error = %e, "refresh failed");
          self.inner.errors.report(ErrorCategory::Network, e.to_string());
          report.failed.push((kind, e.to_string()));
        }
      }
    }

    if !report.refreshed.is_empty() {
      let now = Utc::now();
      self.inner.cache.set_last_sync_at(now);
      self.inner.status_tx.send_modify(|status| status.last_sync_at = Some(now));
    }

    Ok(report)
  }

  // ==========================================================================
  // Offline-aware mutations
  // ==========================================================================

  /// Create or update a record. When online the remote write is tried
  /// directly; if it fails, or when offline, the record is written to the
  /// local cache and the mutation queued. Validation errors are returned.
  pub async fn submit<T: Routed>(&self, operation: SyncOperation, record: T) -> Result<Submission<T>> {
    if operation == SyncOperation::Delete {
      let deleted = self.submit_delete::<T>(record.id()).await?;
      return Ok(deleted.map(|()| record));
    }

    record.check()?;
    let service = T::route(&self.inner.services);

    if self.inner.connectivity.is_online() {
      let result = if operation == SyncOperation::Create {
        service.add(record.clone()).await
      } else {
        service.update(record.clone()).await
      };

      match result {
        Ok(stored) => return Ok(Submission::Applied(stored)),
        Err(e) => {
          warn!(
            kind = %T::entity_kind(),
            id = record.id(),
            op = %operation,
            error = %e,
            "remote write failed, queueing for replay"
          );
          self.inner.errors.report(ErrorCategory::Network, e.to_string());
        }
      }
    }

    self.inner.cache.save(&record);
    let item = PendingSyncItem::for_record(operation, &record)?;
    let id = item.id.clone();
    self.enqueue(item)?;
    Ok(Submission::Queued(id))
  }

  /// Delete a record, queueing the delete when the remote is unreachable.
  pub async fn submit_delete<T: Routed>(&self, id: &str) -> Result<Submission<()>> {
    let service = T::route(&self.inner.services);

    if self.inner.connectivity.is_online() {
      match service.delete(id).await {
        Ok(()) => return Ok(Submission::Applied(())),
        Err(e) => {
          warn!(kind = %T::entity_kind(), id, error = %e, "remote delete failed, queueing for replay");
          self.inner.errors.report(ErrorCategory::Network, e.to_string());
        }
      }
    }

    self.inner.cache.delete::<T>(id);
    let item = PendingSyncItem::for_delete::<T>(id);
    let item_id = item.id.clone();
    self.enqueue(item)?;
    Ok(Submission::Queued(item_id))
  }

  // ==========================================================================
  // Status
  // ==========================================================================

  fn publish(&self, status: SyncStatus) {
    self.inner.status_tx.send_replace(status);
  }

  pub fn status(&self) -> SyncStatus {
    self.inner.status_tx.borrow().clone()
  }

  /// Read-only status feed for display.
  pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
    self.inner.status_tx.subscribe()
  }

  pub fn last_sync_at(&self) -> Option<chrono::DateTime<Utc>> {
    self.inner.cache.last_sync_at()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::connectivity::{StaticProbe, Transport};
  use crate::models::{Budget, BudgetPeriod, Expense, Goal, User};
  use crate::remote::MemoryRemoteStore;
  use crate::sync::SyncState;

  struct Harness {
    remote: Arc<MemoryRemoteStore>,
    cache: LocalCache,
    connectivity: ConnectivityMonitor,
    services: Services,
    engine: SyncEngine,
  }

  fn test_settings() -> SyncSettings {
    SyncSettings {
      interval: Duration::from_secs(300),
      // Long enough that enqueue-scheduled passes never interfere
      debounce: Duration::from_secs(60),
      max_retries: 3,
      persist_queue: false,
    }
  }

  fn harness_with(online: bool, cache: LocalCache, settings: SyncSettings) -> Harness {
    let remote = Arc::new(MemoryRemoteStore::new());
    let errors = ErrorReporter::default();
    let services = Services::new(
      remote.clone(),
      cache.clone(),
      errors.clone(),
      Duration::from_secs(1),
    );
    let connectivity = ConnectivityMonitor::new(Arc::new(StaticProbe::default()), Duration::from_secs(60));
    connectivity.handle_change(vec![if online { Transport::Wifi } else { Transport::None }]);

    let engine = SyncEngine::new(
      services.clone(),
      cache.clone(),
      connectivity.clone(),
      errors,
      settings,
    );
    Harness {
      remote,
      cache,
      connectivity,
      services,
      engine,
    }
  }

  fn harness(online: bool) -> Harness {
    harness_with(online, LocalCache::in_memory(), test_settings())
  }

  fn e1() -> Expense {
    let mut expense = Expense::new("u1", 25.50, "food", "lunch");
    expense.id = "e1".to_string();
    expense
  }

  fn creates_of(remote: &MemoryRemoteStore, id: &str) -> usize {
    remote
      .writes()
      .iter()
      .filter(|(op, _, doc)| op == "create" && doc == id)
      .count()
  }

  async fn wait_for_state(engine: &SyncEngine, want: SyncState) -> SyncStatus {
    let mut feed = engine.subscribe_status();
    tokio::time::timeout(Duration::from_secs(2), async {
      loop {
        if feed.borrow_and_update().state == want {
          return feed.borrow().clone();
        }
        feed.changed().await.unwrap();
      }
    })
    .await
    .unwrap()
  }

  #[tokio::test]
  async fn test_offline_create_fails_then_replays() {
    let h = harness(false);
    let expense = e1();

    let submission = h.engine.submit(SyncOperation::Create, expense.clone()).await.unwrap();
    assert!(submission.is_queued());
    assert_eq!(h.engine.pending_count(), 1);
    assert_eq!(h.engine.pending_items()[0].entity_id, "e1");
    // Local state already reflects the mutation
    assert_eq!(h.cache.get_by_id::<Expense>("e1"), Some(expense.clone()));

    h.connectivity.handle_change(vec![Transport::Wifi]);
    h.remote.fail_next(1);

    let first = h.engine.sync_pending_items().await.unwrap();
    assert_eq!(first.state, SyncState::Error);
    assert_eq!(first.errors.len(), 1);
    assert_eq!(first.errors[0].attempt, 1);
    assert_eq!(h.engine.pending_count(), 1);
    assert_eq!(h.engine.pending_items()[0].retry_count, 1);

    let second = h.engine.sync_pending_items().await.unwrap();
    assert_eq!(second.state, SyncState::Success);
    assert_eq!(h.engine.pending_count(), 0);

    let stored: Expense = serde_json::from_value(h.remote.document("expenses", "e1").unwrap()).unwrap();
    assert_eq!(stored, expense);
    assert_eq!(stored.amount, 25.50);
    assert!(h.engine.last_sync_at().is_some());
  }

  #[tokio::test]
  async fn test_item_removed_on_first_success() {
    let h = harness(true);
    let item = PendingSyncItem::for_record(SyncOperation::Create, &e1()).unwrap();
    h.engine.enqueue(item).unwrap();

    let status = h.engine.sync_pending_items().await.unwrap();
    assert_eq!(status.synced_items, 1);
    assert_eq!(h.engine.pending_count(), 0);

    // Nothing left to replay
    assert!(h.engine.sync_pending_items().await.is_none());
    assert_eq!(creates_of(&h.remote, "e1"), 1);
  }

  #[tokio::test]
  async fn test_item_dropped_after_third_failure() {
    let h = harness(true);
    h.remote.set_unavailable(true);
    h.engine
      .enqueue(PendingSyncItem::for_record(SyncOperation::Create, &e1()).unwrap())
      .unwrap();

    for attempt in 1..=2 {
      let status = h.engine.sync_pending_items().await.unwrap();
      assert_eq!(status.errors[0].attempt, attempt);
      assert!(!status.errors[0].dropped);
      assert_eq!(h.engine.pending_count(), 1);
    }

    let third = h.engine.sync_pending_items().await.unwrap();
    assert_eq!(third.errors[0].attempt, 3);
    assert!(third.errors[0].dropped);
    assert_eq!(h.engine.pending_count(), 0);

    h.remote.set_unavailable(false);
    assert!(h.engine.sync_pending_items().await.is_none());
    assert_eq!(creates_of(&h.remote, "e1"), 0);
  }

  #[tokio::test]
  async fn test_concurrent_triggers_collapse_into_one_pass() {
    let h = harness(true);
    h.remote.set_latency(Duration::from_millis(100));
    h.engine
      .enqueue(PendingSyncItem::for_record(SyncOperation::Create, &e1()).unwrap())
      .unwrap();

    let (a, b) = tokio::join!(h.engine.sync_pending_items(), h.engine.sync_pending_items());
    assert!(a.is_some() != b.is_some());
    assert_eq!(creates_of(&h.remote, "e1"), 1);
    assert!(!h.engine.is_syncing());
  }

  #[tokio::test]
  async fn test_failure_defers_later_items_for_same_record() {
    let h = harness(true);
    let mut goal = Goal::new("u1", "Vacation", 1000.0, Utc::now());
    let create = PendingSyncItem::for_record(SyncOperation::Create, &goal).unwrap();
    goal.current_amount = 250.0;
    let update = PendingSyncItem::for_record(SyncOperation::Update, &goal).unwrap();
    let expense = PendingSyncItem::for_record(SyncOperation::Create, &e1()).unwrap();

    h.engine.enqueue(create).unwrap();
    h.engine.enqueue(update.clone()).unwrap();
    h.engine.enqueue(expense).unwrap();

    // Only the goal create fails
    h.remote.fail_next(1);
    let status = h.engine.sync_pending_items().await.unwrap();
    assert_eq!(status.state, SyncState::Partial);
    assert_eq!(status.synced_items, 1);
    assert_eq!(status.failed_items, 1);
    assert_eq!(status.deferred_items, 1);

    let pending = h.engine.pending_items();
    assert_eq!(pending.len(), 2);
    assert_eq!(pending[1].id, update.id);
    assert_eq!(pending[1].retry_count, 0);

    let status = h.engine.sync_pending_items().await.unwrap();
    assert_eq!(status.state, SyncState::Success);
    let stored: Goal = serde_json::from_value(h.remote.document("goals", &goal.id).unwrap()).unwrap();
    assert_eq!(stored.current_amount, 250.0);
  }

  #[tokio::test]
  async fn test_going_online_triggers_pass() {
    let h = harness(false);
    h.engine.start();

    h.engine.submit(SyncOperation::Create, e1()).await.unwrap();
    assert_eq!(h.engine.pending_count(), 1);

    h.connectivity.handle_change(vec![Transport::None]);
    assert!(!h.connectivity.is_online());
    h.connectivity.handle_change(vec![Transport::Wifi]);
    assert!(h.connectivity.is_online());

    let status = wait_for_state(&h.engine, SyncState::Success).await;
    assert_eq!(status.synced_items, 1);
    assert_eq!(h.engine.pending_count(), 0);
    assert!(h.remote.document("expenses", "e1").is_some());

    h.engine.shutdown();
  }

  #[tokio::test]
  async fn test_debounce_batches_enqueues() {
    let settings = SyncSettings {
      debounce: Duration::from_millis(50),
      ..test_settings()
    };
    let h = harness_with(true, LocalCache::in_memory(), settings);

    for _ in 0..2 {
      let expense = Expense::new("u1", 4.0, "food", "snack");
      h.engine
        .add_to_sync_queue(
          EntityKind::Expense,
          SyncOperation::Create,
          &expense.id,
          serde_json::to_value(&expense).unwrap(),
        )
        .unwrap();
    }

    let status = wait_for_state(&h.engine, SyncState::Success).await;
    assert_eq!(status.total_items, 2);
    assert_eq!(status.synced_items, 2);
    assert_eq!(h.remote.len("expenses"), 2);
  }

  #[tokio::test]
  async fn test_online_submit_applies_directly() {
    let h = harness(true);
    let submission = h.engine.submit(SyncOperation::Create, e1()).await.unwrap();
    assert_eq!(submission, Submission::Applied(e1_stored(&h)));
    assert_eq!(h.engine.pending_count(), 0);

    let deleted = h.engine.submit_delete::<Expense>("e1").await.unwrap();
    assert_eq!(deleted, Submission::Applied(()));
    assert!(h.cache.get_by_id::<Expense>("e1").is_none());
  }

  fn e1_stored(h: &Harness) -> Expense {
    serde_json::from_value(h.remote.document("expenses", "e1").unwrap()).unwrap()
  }

  #[tokio::test]
  async fn test_failed_online_write_is_cached_and_queued() {
    let h = harness(true);
    h.remote.set_unavailable(true);
    let start = Utc::now();
    let budget = Budget::new("u1", "food", 200.0, BudgetPeriod::Monthly, start);

    let submission = h.engine.submit(SyncOperation::Create, budget.clone()).await.unwrap();
    assert!(submission.is_queued());
    assert_eq!(h.cache.get_by_id::<Budget>(&budget.id), Some(budget.clone()));
    assert_eq!(h.engine.pending_items()[0].entity_kind, EntityKind::Budget);
  }

  #[tokio::test]
  async fn test_offline_delete_is_queued() {
    let h = harness(false);
    let expense = e1();
    h.cache.save(&expense);

    let submission = h.engine.submit_delete::<Expense>("e1").await.unwrap();
    assert!(submission.is_queued());
    assert!(h.cache.get_by_id::<Expense>("e1").is_none());

    h.remote.insert("expenses", "e1", serde_json::to_value(&expense).unwrap());
    h.connectivity.handle_change(vec![Transport::Ethernet]);
    let status = h.engine.sync_pending_items().await.unwrap();
    assert_eq!(status.state, SyncState::Success);
    assert!(h.remote.document("expenses", "e1").is_none());
  }

  #[tokio::test]
  async fn test_validation_errors_are_not_queued() {
    let h = harness(false);
    let mut expense = e1();
    expense.amount = -1.0;
    assert!(h.engine.submit(SyncOperation::Create, expense).await.is_err());
    assert_eq!(h.engine.pending_count(), 0);
  }

  #[tokio::test]
  async fn test_user_mutations_are_rejected() {
    let h = harness(true);
    let user = User::new("u1", "u1@example.com");
    let result = h.engine.add_to_sync_queue(
      EntityKind::User,
      SyncOperation::Update,
      &user.id,
      serde_json::to_value(&user).unwrap(),
    );
    assert!(result.is_err());
    assert_eq!(h.engine.pending_count(), 0);
  }

  #[tokio::test]
  async fn test_journaled_queue_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let settings = SyncSettings {
      persist_queue: true,
      ..test_settings()
    };

    {
      let h = harness_with(false, LocalCache::open(dir.path()), settings.clone());
      h.engine.submit(SyncOperation::Create, e1()).await.unwrap();
      assert_eq!(h.engine.pending_count(), 1);
    }

    let h = harness_with(false, LocalCache::open(dir.path()), settings);
    assert_eq!(h.engine.pending_count(), 0);
    h.engine.start();
    assert_eq!(h.engine.pending_count(), 1);
    assert_eq!(h.engine.pending_items()[0].entity_id, "e1");
    h.engine.shutdown();
  }

  #[tokio::test]
  async fn test_failed_pass_keeps_last_sync_time() {
    let h = harness(true);
    h.remote.set_unavailable(true);
    h.engine
      .enqueue(PendingSyncItem::for_record(SyncOperation::Create, &e1()).unwrap())
      .unwrap();

    let status = h.engine.sync_pending_items().await.unwrap();
    assert_eq!(status.state, SyncState::Error);
    assert_eq!(status.synced_items, 0);
    assert!(status.last_sync_at.is_none());
    assert!(h.engine.last_sync_at().is_none());
    assert_eq!(h.engine.status().last_sync_at, h.engine.last_sync_at());

    h.remote.set_unavailable(false);
    let status = h.engine.sync_pending_items().await.unwrap();
    assert!(status.last_sync_at.is_some());
    assert_eq!(status.last_sync_at, h.engine.last_sync_at());
  }

  #[tokio::test]
  async fn test_queued_update_survives_remote_reads() {
    let h = harness(true);
    let mut goal = Goal::new("u1", "Bike", 1000.0, Utc::now());
    h.remote.insert("goals", &goal.id, serde_json::to_value(&goal).unwrap());

    h.remote.set_unavailable(true);
    goal.current_amount = 400.0;
    let submission = h.engine.submit(SyncOperation::Update, goal.clone()).await.unwrap();
    assert!(submission.is_queued());
    h.remote.set_unavailable(false);

    let read = h.services.goals.get_for_user("u1").await;
    assert_eq!(read.source, crate::services::ReadSource::Remote);
    assert_eq!(read.data.len(), 1);
    assert_eq!(read.data[0].current_amount, 400.0);
    assert_eq!(h.cache.get_by_id::<Goal>(&goal.id).unwrap().current_amount, 400.0);
    let single = h.services.goals.get_by_id(&goal.id).await;
    assert_eq!(single.data.unwrap().current_amount, 400.0);
    assert_eq!(h.engine.pending_count(), 1);

    // Once replayed, remote reads mirror into the cache again
    h.engine.sync_pending_items().await.unwrap();
    assert_eq!(h.engine.pending_count(), 0);
    let read = h.services.goals.get_for_user("u1").await;
    assert_eq!(read.data[0].current_amount, 400.0);
    let stored: Goal = serde_json::from_value(h.remote.document("goals", &goal.id).unwrap()).unwrap();
    assert_eq!(stored.current_amount, 400.0);
  }

  fn journaled_ids(h: &Harness) -> Vec<String> {
    h.cache.load_pending().into_iter().map(|item| item.id).collect()
  }

  fn queued_ids(h: &Harness) -> Vec<String> {
    h.engine.pending_items().into_iter().map(|item| item.id).collect()
  }

  #[tokio::test]
  async fn test_journal_follows_every_queue_change() {
    let settings = SyncSettings {
      persist_queue: true,
      ..test_settings()
    };
    let h = harness_with(false, LocalCache::in_memory(), settings);

    h.engine.submit(SyncOperation::Create, e1()).await.unwrap();
    assert_eq!(journaled_ids(&h), queued_ids(&h));

    h.remote.fail_next(1);
    h.engine.sync_pending_items().await.unwrap();
    assert_eq!(h.cache.load_pending()[0].retry_count, 1);
    assert_eq!(journaled_ids(&h), queued_ids(&h));

    h.engine.sync_pending_items().await.unwrap();
    assert!(journaled_ids(&h).is_empty());
    assert!(queued_ids(&h).is_empty());
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn test_journal_matches_queue_under_concurrent_changes() {
    let settings = SyncSettings {
      persist_queue: true,
      ..test_settings()
    };
    let h = harness_with(false, LocalCache::in_memory(), settings);

    let mut tasks = Vec::new();
    for worker in 0..4 {
      let engine = h.engine.clone();
      tasks.push(tokio::spawn(async move {
        for n in 0..25 {
          let expense = Expense::new("u1", 1.0 + n as f64, "food", format!("w{}", worker));
          engine
            .enqueue(PendingSyncItem::for_record(SyncOperation::Create, &expense).unwrap())
            .unwrap();
          if n % 5 == 0 {
            engine.sync_pending_items().await;
          }
        }
      }));
    }
    for task in tasks {
      task.await.unwrap();
    }

    assert_eq!(journaled_ids(&h), queued_ids(&h));
    h.engine.sync_pending_items().await;
    assert_eq!(journaled_ids(&h), queued_ids(&h));
    assert!(queued_ids(&h).is_empty());
  }

  #[tokio::test]
  async fn test_force_sync_pulls_remote_records() {
    let h = harness(false);
    assert!(h.engine.force_sync_all("u1").await.is_err());

    let goal = Goal::new("u1", "Car", 5000.0, Utc::now());
    h.remote.insert("goals", &goal.id, serde_json::to_value(&goal).unwrap());
    let expense = Expense::new("u1", 9.0, "food", "pizza");
    h.remote.insert("expenses", &expense.id, serde_json::to_value(&expense).unwrap());

    h.connectivity.handle_change(vec![Transport::Wifi]);
    let report = h.engine.force_sync_all("u1").await.unwrap();
    assert!(report.pass.is_none());
    assert!(report.failed.is_empty());
    assert_eq!(report.refreshed.get(&EntityKind::Goal), Some(&1));
    assert_eq!(report.refreshed.get(&EntityKind::Expense), Some(&1));
    assert_eq!(h.cache.get_by_id::<Goal>(&goal.id), Some(goal));
    assert!(h.engine.status().last_sync_at.is_some());
  }
}
