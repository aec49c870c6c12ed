//! Composition root: builds every component once and hands out handles.

use color_eyre::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::cache::LocalCache;
use crate::config::Config;
use crate::connectivity::{ConnectivityMonitor, NetworkProbe, SysfsProbe};
use crate::errors::ErrorReporter;
use crate::remote::{HttpRemoteStore, RemoteStore};
use crate::services::Services;
use crate::sync::{SyncEngine, SyncSettings};

/// The wired application core.
#[derive(Clone)]
pub struct Runtime {
  pub config: Config,
  pub cache: LocalCache,
  pub errors: ErrorReporter,
  pub services: Services,
  pub connectivity: ConnectivityMonitor,
  pub sync: SyncEngine,
}

impl Runtime {
  /// Build the production stack: on-disk cache under the data directory,
  /// HTTP remote store and sysfs connectivity probe.
  pub fn new(config: Config) -> Result<Self> {
    let cache = LocalCache::open(&config.data_dir()?);
    let remote: Arc<dyn RemoteStore> = Arc::new(HttpRemoteStore::new(&config)?);
    let probe: Arc<dyn NetworkProbe> = Arc::new(SysfsProbe::new(&config.connectivity.sysfs_root));
    Ok(Self::with_parts(config, cache, remote, probe))
  }

  /// Build from explicit parts.
  pub fn with_parts(
    config: Config,
    cache: LocalCache,
    remote: Arc<dyn RemoteStore>,
    probe: Arc<dyn NetworkProbe>,
  ) -> Self {
    let errors = ErrorReporter::new(
      config.errors.burst_threshold,
      Duration::from_secs(config.errors.burst_window_secs),
    );
    let services = Services::new(remote, cache.clone(), errors.clone(), config.remote.timeout());
    let connectivity = ConnectivityMonitor::new(
      probe,
      Duration::from_secs(config.connectivity.poll_interval_secs),
    );
    let sync = SyncEngine::new(
      services.clone(),
      cache.clone(),
      connectivity.clone(),
      errors.clone(),
      SyncSettings::from(&config.sync),
    );

    Self {
      config,
      cache,
      errors,
      services,
      connectivity,
      sync,
    }
  }

  /// Detect connectivity, then start the sync triggers.
  pub async fn start(&self) {
    self.connectivity.initialize(None).await;
    self.sync.start();
    let state = self.connectivity.state();
    info!(
      user_id = %self.config.user_id,
      online = state.is_online,
      pending = self.sync.pending_count(),
      "runtime started"
    );
  }

  pub fn shutdown(&self) {
    self.sync.shutdown();
    self.connectivity.shutdown();
    info!("runtime stopped");
  }

  pub fn user_id(&self) -> &str {
    &self.config.user_id
  }
}
