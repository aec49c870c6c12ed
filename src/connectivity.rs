//! Online/offline detection.
//!
//! Online means at least one transport other than `none` is present. There is
//! no reachability probe: an interface that is up counts as online. State is
//! recomputed on every reported network change and on a polling timer, and
//! published through a `watch` feed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use futures::stream::{BoxStream, StreamExt};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Kind of network transport reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Transport {
  Wifi,
  Mobile,
  Ethernet,
  Vpn,
  Bluetooth,
  Other,
  None,
}

impl Transport {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Wifi => "wifi",
      Self::Mobile => "mobile",
      Self::Ethernet => "ethernet",
      Self::Vpn => "vpn",
      Self::Bluetooth => "bluetooth",
      Self::Other => "other",
      Self::None => "none",
    }
  }

  /// Classify a network interface by its name.
  pub fn from_interface(name: &str) -> Self {
    if name.starts_with("wl") {
      Self::Wifi
    } else if name.starts_with("en") || name.starts_with("eth") {
      Self::Ethernet
    } else if name.starts_with("ww") || name.starts_with("rmnet") {
      Self::Mobile
    } else if name.starts_with("tun") || name.starts_with("tap") || name.starts_with("wg") {
      Self::Vpn
    } else if name.starts_with("bnep") {
      Self::Bluetooth
    } else {
      Self::Other
    }
  }
}

/// Last known connectivity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectivityState {
  pub is_online: bool,
  pub transports: BTreeSet<Transport>,
  pub last_changed_at: DateTime<Utc>,
}

impl ConnectivityState {
  fn offline() -> Self {
    Self {
      is_online: false,
      transports: BTreeSet::from([Transport::None]),
      last_changed_at: Utc::now(),
    }
  }
}

/// Source of the current transport list (the platform network API).
#[async_trait]
pub trait NetworkProbe: Send + Sync {
  async fn transports(&self) -> Result<Vec<Transport>>;
}

/// Probe reading interface state from sysfs.
pub struct SysfsProbe {
  root: PathBuf,
}

impl SysfsProbe {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }
}

#[async_trait]
impl NetworkProbe for SysfsProbe {
  async fn transports(&self) -> Result<Vec<Transport>> {
    let mut entries = tokio::fs::read_dir(&self.root)
      .await
      .map_err(|e| eyre!("Failed to list {}: {}", self.root.display(), e))?;

    let mut transports = Vec::new();
    while let Some(entry) = entries
      .next_entry()
      .await
      .map_err(|e| eyre!("Failed to read interface entry: {}", e))?
    {
      let name = entry.file_name().to_string_lossy().into_owned();
      if name == "lo" {
        continue;
      }

      let operstate = tokio::fs::read_to_string(entry.path().join("operstate"))
        .await
        .unwrap_or_default();
      if operstate.trim() == "up" {
        transports.push(Transport::from_interface(&name));
      }
    }

    if transports.is_empty() {
      transports.push(Transport::None);
    }
    Ok(transports)
  }
}

/// Connectivity monitor. Cloning yields another handle to the same state.
#[derive(Clone)]
pub struct ConnectivityMonitor {
  inner: Arc<MonitorInner>,
}

struct MonitorInner {
  probe: Arc<dyn NetworkProbe>,
  state_tx: watch::Sender<ConnectivityState>,
  poll_interval: Duration,
  tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ConnectivityMonitor {
  pub fn new(probe: Arc<dyn NetworkProbe>, poll_interval: Duration) -> Self {
    let (state_tx, _) = watch::channel(ConnectivityState::offline());
    Self {
      inner: Arc::new(MonitorInner {
        probe,
        state_tx,
        poll_interval,
        tasks: Mutex::new(Vec::new()),
      }),
    }
  }

  /// Run an initial check, follow `events` (platform change notifications)
  /// and start the polling timer.
  pub async fn initialize(&self, events: Option<BoxStream<'static, Vec<Transport>>>) {
    self.check_now().await;

    let mut tasks = Vec::new();

    if let Some(mut events) = events {
      let monitor = self.clone();
      tasks.push(tokio::spawn(async move {
        while let Some(transports) = events.next().await {
          monitor.handle_change(transports);
        }
        debug!("network change feed closed");
      }));
    }

    let monitor = self.clone();
    let poll_interval = self.inner.poll_interval;
    tasks.push(tokio::spawn(async move {
      let mut ticker = tokio::time::interval(poll_interval);
      // The first tick completes immediately and the initial check already ran
      ticker.tick().await;
      loop {
        ticker.tick().await;
        monitor.check_now().await;
      }
    }));

    if let Ok(mut guard) = self.inner.tasks.lock() {
      guard.extend(tasks);
    }
  }

  /// Ask the probe for the current transports. Probe errors count as offline.
  pub async fn check_now(&self) -> ConnectivityState {
    let transports = match self.inner.probe.transports().await {
      Ok(transports) => transports,
      Err(e) => {
        warn!(error = %e, "connectivity check failed, assuming offline");
        vec![Transport::None]
      }
    };
    self.handle_change(transports)
  }

  /// Apply a reported transport list and publish the result if it changed.
  pub fn handle_change(&self, transports: Vec<Transport>) -> ConnectivityState {
    let mut transports: BTreeSet<Transport> = transports.into_iter().collect();
    if transports.is_empty() {
      transports.insert(Transport::None);
    }
    let is_online = transports.iter().any(|t| *t != Transport::None);

    self.inner.state_tx.send_if_modified(|state| {
      if state.is_online == is_online && state.transports == transports {
        return false;
      }

      if state.is_online != is_online {
        let names: Vec<&str> = transports.iter().map(|t| t.as_str()).collect();
        if is_online {
          info!(transports = ?names, "network online");
        } else {
          warn!("network offline");
        }
      }

      state.is_online = is_online;
      state.transports = transports;
      state.last_changed_at = Utc::now();
      true
    });

    self.state()
  }

  pub fn is_online(&self) -> bool {
    self.inner.state_tx.borrow().is_online
  }

  pub fn state(&self) -> ConnectivityState {
    self.inner.state_tx.borrow().clone()
  }

  /// Change feed. Consumers watch for the offline to online transition.
  pub fn subscribe(&self) -> watch::Receiver<ConnectivityState> {
    self.inner.state_tx.subscribe()
  }

  /// Stop polling and following change notifications.
  pub fn shutdown(&self) {
    if let Ok(mut tasks) = self.inner.tasks.lock() {
      for task in tasks.drain(..) {
        task.abort();
      }
    }
  }
}

/// Probe with a settable answer, for tests and embedding.
#[derive(Default)]
pub struct StaticProbe {
  answer: Mutex<Option<Vec<Transport>>>,
}

impl StaticProbe {
  pub fn new(transports: Vec<Transport>) -> Self {
    Self {
      answer: Mutex::new(Some(transports)),
    }
  }

  /// Set the next answer. `None` makes the probe fail.
  pub fn set(&self, transports: Option<Vec<Transport>>) {
    if let Ok(mut answer) = self.answer.lock() {
      *answer = transports;
    }
  }
}

#[async_trait]
impl NetworkProbe for StaticProbe {
  async fn transports(&self) -> Result<Vec<Transport>> {
    self
      .answer
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?
      .clone()
      .ok_or_else(|| eyre!("network API unavailable"))
  }
}
