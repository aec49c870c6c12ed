//! Error reporting with burst collapsing.
//!
//! Every failure the sync core absorbs (remote read fallbacks, replay
//! failures, store recreation) is reported here. The same error signature
//! recurring more than `threshold` times within `window` is collapsed into a
//! single synthetic burst event and later repeats are suppressed until the
//! window drains.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{error, warn};

/// How many recent events are kept for display.
const RECENT_CAPACITY: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
  Network,
  Storage,
  Validation,
  Sync,
  Unknown,
}

impl ErrorCategory {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Network => "network",
      Self::Storage => "storage",
      Self::Validation => "validation",
      Self::Sync => "sync",
      Self::Unknown => "unknown",
    }
  }
}

/// A reported error, or a synthetic burst standing in for many.
#[derive(Debug, Clone)]
pub struct ErrorEvent {
  pub category: ErrorCategory,
  pub message: String,
  pub signature: String,
  pub occurred_at: DateTime<Utc>,
  /// Occurrences represented by this event (1 unless a burst)
  pub count: usize,
  pub is_burst: bool,
}

#[derive(Debug, Default)]
struct SignatureWindow {
  seen: VecDeque<Instant>,
  burst_reported: bool,
}

#[derive(Debug, Default)]
struct ReporterState {
  windows: HashMap<String, SignatureWindow>,
  recent: VecDeque<ErrorEvent>,
}

/// Shared error reporter. Cloning yields another handle to the same state.
#[derive(Debug, Clone)]
pub struct ErrorReporter {
  state: Arc<Mutex<ReporterState>>,
  threshold: usize,
  window: Duration,
}

impl Default for ErrorReporter {
  fn default() -> Self {
    Self::new(5, Duration::from_secs(10))
  }
}

impl ErrorReporter {
  pub fn new(threshold: usize, window: Duration) -> Self {
    Self {
      state: Arc::new(Mutex::new(ReporterState::default())),
      threshold,
      window,
    }
  }

  /// Report an error. Returns the event that was emitted, or `None` when the
  /// occurrence was folded into an already reported burst.
  pub fn report(&self, category: ErrorCategory, message: impl Into<String>) -> Option<ErrorEvent> {
    self.report_at(category, message.into(), Instant::now())
  }

  fn report_at(&self, category: ErrorCategory, message: String, now: Instant) -> Option<ErrorEvent> {
    let signature = signature(category, &message);
    let Ok(mut state) = self.state.lock() else {
      error!(category = category.as_str(), %message, "error reporter lock poisoned");
      return None;
    };

    // Forget signatures whose window has fully drained
    let horizon = self.window;
    state
      .windows
      .retain(|_, w| w.seen.back().is_some_and(|last| now.duration_since(*last) <= horizon));

    let window = state.windows.entry(signature.clone()).or_default();
    while let Some(first) = window.seen.front() {
      if now.duration_since(*first) > self.window {
        window.seen.pop_front();
      } else {
        break;
      }
    }
    if window.seen.is_empty() {
      window.burst_reported = false;
    }
    window.seen.push_back(now);

    let count = window.seen.len();
    let event = if count <= self.threshold {
      error!(category = category.as_str(), %message, "error reported");
      ErrorEvent {
        category,
        message,
        signature,
        occurred_at: Utc::now(),
        count: 1,
        is_burst: false,
      }
    } else if !window.burst_reported {
      window.burst_reported = true;
      warn!(
        category = category.as_str(),
        %message,
        occurrences = count,
        "error burst detected, suppressing repeats"
      );
      ErrorEvent {
        category,
        message,
        signature,
        occurred_at: Utc::now(),
        count,
        is_burst: true,
      }
    } else {
      return None;
    };

    if state.recent.len() == RECENT_CAPACITY {
      state.recent.pop_front();
    }
    state.recent.push_back(event.clone());
    Some(event)
  }

  /// Most recent events, oldest first.
  pub fn recent(&self) -> Vec<ErrorEvent> {
    self
      .state
      .lock()
      .map(|state| state.recent.iter().cloned().collect())
      .unwrap_or_default()
  }
}

/// Stable signature for an error: SHA-256 of category and message.
fn signature(category: ErrorCategory, message: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(category.as_str().as_bytes());
  hasher.update([0u8]);
  hasher.update(message.as_bytes());
  hex::encode(hasher.finalize())
}
