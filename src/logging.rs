//! Tracing subscriber setup.
//!
//! `RUST_LOG` wins over the defaults. CLI commands log to stderr; the
//! dashboard owns the terminal, so it logs to a daily file instead.

use color_eyre::{eyre::eyre, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

fn env_filter(debug: bool) -> EnvFilter {
  let default_filter = if debug { "debug" } else { "info" };
  EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter))
}

/// Log to stderr.
pub fn init_stderr(debug: bool) {
  let _ = tracing_subscriber::fmt()
    .with_env_filter(env_filter(debug))
    .with_target(false)
    .with_writer(std::io::stderr)
    .try_init();
}

/// Log to `<dir>/finlytic.log.<date>`. Keep the guard alive until exit so
/// buffered lines are flushed.
pub fn init_file(dir: &Path, debug: bool) -> Result<WorkerGuard> {
  std::fs::create_dir_all(dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;

  let appender = tracing_appender::rolling::daily(dir, "finlytic.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::fmt()
    .with_env_filter(env_filter(debug))
    .with_ansi(false)
    .with_writer(writer)
    .try_init()
    .map_err(|e| eyre!("Failed to install log subscriber: {}", e))?;

  Ok(guard)
}
