use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// User whose records this device syncs
  pub user_id: String,
  #[serde(default)]
  pub remote: RemoteConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub sync: SyncConfig,
  #[serde(default)]
  pub connectivity: ConnectivityConfig,
  #[serde(default)]
  pub errors: ErrorsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
  /// Base url of the document API (e.g. "https://api.finlytic.app/v1")
  pub url: Option<String>,
  /// Per-call timeout for remote operations
  #[serde(default = "default_remote_timeout")]
  pub timeout_secs: u64,
}

impl Default for RemoteConfig {
  fn default() -> Self {
    Self {
      url: None,
      timeout_secs: default_remote_timeout(),
    }
  }
}

impl RemoteConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }
}

fn default_remote_timeout() -> u64 {
  10
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CacheConfig {
  /// Directory for the local stores (defaults to $XDG_DATA_HOME/finlytic)
  pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// Periodic replay interval
  pub interval_secs: u64,
  /// Delay between an enqueue and the replay it schedules
  pub debounce_ms: u64,
  /// Failed attempts after which an item is dropped
  pub max_retries: u32,
  /// Journal the pending queue to the meta store so it survives restarts
  pub persist_queue: bool,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      interval_secs: 300,
      debounce_ms: 2000,
      max_retries: 3,
      persist_queue: false,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfig {
  pub poll_interval_secs: u64,
  /// Where network interfaces are listed
  pub sysfs_root: PathBuf,
}

impl Default for ConnectivityConfig {
  fn default() -> Self {
    Self {
      poll_interval_secs: 60,
      sysfs_root: PathBuf::from("/sys/class/net"),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ErrorsConfig {
  /// Occurrences tolerated inside the window before collapsing into a burst
  pub burst_threshold: usize,
  pub burst_window_secs: u64,
}

impl Default for ErrorsConfig {
  fn default() -> Self {
    Self {
      burst_threshold: 5,
      burst_window_secs: 10,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./finlytic.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/finlytic/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/finlytic/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("finlytic.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("finlytic").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;
    if config.user_id.trim().is_empty() {
      return Err(eyre!("user_id must not be empty"));
    }
    if config.sync.max_retries == 0 {
      return Err(eyre!("sync.max_retries must be at least 1"));
    }
    Ok(config)
  }

  /// Directory for local stores and log files.
  pub fn data_dir(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.cache.dir {
      return Ok(dir.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("finlytic"))
  }

  /// Remote API token from the environment, if set.
  ///
  /// Checks FINLYTIC_API_TOKEN.
  pub fn get_api_token() -> Option<String> {
    std::env::var("FINLYTIC_API_TOKEN")
      .ok()
      .filter(|t| !t.is_empty())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_minimal_config_uses_defaults() {
    let config = Config::parse("user_id: u1\n").unwrap();
    assert_eq!(config.user_id, "u1");
    assert!(config.remote.url.is_none());
    assert_eq!(config.remote.timeout(), Duration::from_secs(10));
    assert_eq!(config.sync.interval_secs, 300);
    assert_eq!(config.sync.debounce_ms, 2000);
    assert_eq!(config.sync.max_retries, 3);
    assert!(!config.sync.persist_queue);
    assert_eq!(config.connectivity.poll_interval_secs, 60);
    assert_eq!(config.errors.burst_threshold, 5);
  }

  #[test]
  fn test_partial_sections_merge_with_defaults() {
    let yaml = r#"
user_id: u1
remote:
  url: https://api.example.com/v1
sync:
  persist_queue: true
cache:
  dir: /tmp/finlytic-test
"#;
    let config = Config::parse(yaml).unwrap();
    assert_eq!(config.remote.url.as_deref(), Some("https://api.example.com/v1"));
    assert!(config.sync.persist_queue);
    assert_eq!(config.sync.max_retries, 3);
    assert_eq!(config.data_dir().unwrap(), PathBuf::from("/tmp/finlytic-test"));
  }

  #[test]
  fn test_rejects_zero_retries() {
    assert!(Config::parse("user_id: u1\nsync:\n  max_retries: 0\n").is_err());
    assert!(Config::parse("user_id: ''\n").is_err());
  }
}
