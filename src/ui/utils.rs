use chrono::{DateTime, Utc};
use ratatui::prelude::Color;

use crate::sync::SyncState;

/// Truncate a string to a maximum number of characters, adding "..." if
/// truncated
pub fn truncate(s: &str, max_len: usize) -> String {
  if s.chars().count() <= max_len {
    s.to_string()
  } else {
    let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
    format!("{}...", kept)
  }
}

/// Display color for a sync state
pub fn state_color(state: SyncState) -> Color {
  match state {
    SyncState::Success => Color::Green,
    SyncState::Syncing => Color::Cyan,
    SyncState::Partial => Color::Yellow,
    SyncState::Error => Color::Red,
    SyncState::Idle => Color::White,
  }
}

/// "never", "just now", "5m ago", "3h ago" or a date
pub fn ago(at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
  let Some(at) = at else {
    return "never".to_string();
  };

  let secs = (now - at).num_seconds().max(0);
  match secs {
    0..=59 => "just now".to_string(),
    60..=3599 => format!("{}m ago", secs / 60),
    3600..=86399 => format!("{}h ago", secs / 3600),
    _ => at.format("%Y-%m-%d").to_string(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::Duration;

  #[test]
  fn test_truncate_short_string() {
    assert_eq!(truncate("hello", 10), "hello");
  }

  #[test]
  fn test_truncate_long_string() {
    assert_eq!(truncate("hello world", 8), "hello...");
  }

  #[test]
  fn test_truncate_multibyte() {
    assert_eq!(truncate("café crème brûlée", 7), "café...");
  }

  #[test]
  fn test_state_color() {
    assert_eq!(state_color(SyncState::Success), Color::Green);
    assert_eq!(state_color(SyncState::Error), Color::Red);
  }

  #[test]
  fn test_ago() {
    let now = Utc::now();
    assert_eq!(ago(None, now), "never");
    assert_eq!(ago(Some(now - Duration::seconds(10)), now), "just now");
    assert_eq!(ago(Some(now - Duration::minutes(5)), now), "5m ago");
    assert_eq!(ago(Some(now - Duration::hours(3)), now), "3h ago");
  }
}
