use crate::connectivity::ConnectivityState;
use crate::errors::ErrorEvent;
use crate::event::{Event, EventHandler};
use crate::runtime::Runtime;
use crate::sync::{PendingSyncItem, SyncStatus};
use crate::ui;
use color_eyre::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use crossterm::terminal::{
  disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::prelude::*;
use std::io::stdout;
use std::time::Duration;
use tokio::sync::mpsc;

/// Dashboard state
pub struct App {
  runtime: Runtime,

  /// Latest values of the core's feeds
  status: SyncStatus,
  connectivity: ConnectivityState,

  /// Queue and error snapshots, refreshed on every tick
  pending: Vec<PendingSyncItem>,
  recent_errors: Vec<ErrorEvent>,

  /// Result of the last user action
  notice: Option<String>,

  event_tx: mpsc::UnboundedSender<Event>,

  /// Whether to quit
  should_quit: bool,
}

impl App {
  pub fn new(runtime: Runtime) -> Self {
    let (tx, _rx) = mpsc::unbounded_channel();

    Self {
      status: runtime.sync.status(),
      connectivity: runtime.connectivity.state(),
      pending: runtime.sync.pending_items(),
      recent_errors: runtime.errors.recent(),
      notice: None,
      event_tx: tx,
      should_quit: false,
      runtime,
    }
  }

  pub async fn run(&mut self) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;

    // Create event handler
    let mut events = EventHandler::new(Duration::from_millis(250));
    events.follow(self.runtime.sync.subscribe_status(), Event::Sync);
    events.follow(self.runtime.connectivity.subscribe(), Event::Connectivity);
    self.event_tx = events.sender();

    // Main loop
    while !self.should_quit {
      // Draw UI
      terminal.draw(|frame| ui::draw(frame, self))?;

      // Handle events
      if let Some(event) = events.next().await {
        self.handle_event(event);
      }
    }

    // Cleanup terminal
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;

    Ok(())
  }

  fn handle_event(&mut self, event: Event) {
    match event {
      Event::Key(key) => self.handle_key(key),
      Event::Tick => self.refresh_snapshots(),
      Event::Sync(status) => {
        self.status = status;
        self.refresh_snapshots();
      }
      Event::Connectivity(state) => self.connectivity = state,
      Event::Notice(message) => self.notice = Some(message),
    }
  }

  fn refresh_snapshots(&mut self) {
    self.pending = self.runtime.sync.pending_items();
    self.recent_errors = self.runtime.errors.recent();
  }

  fn handle_key(&mut self, key: KeyEvent) {
    match key.code {
      // Quit
      KeyCode::Char('q') | KeyCode::Esc => self.should_quit = true,
      KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
        self.should_quit = true;
      }

      // Sync actions
      KeyCode::Char('s') => self.trigger_sync(),
      KeyCode::Char('f') => self.trigger_force_sync(),

      _ => {}
    }
  }

  fn trigger_sync(&mut self) {
    let engine = self.runtime.sync.clone();
    let tx = self.event_tx.clone();
    self.notice = Some("Sync requested".to_string());

    tokio::spawn(async move {
      let message = match engine.sync_pending_items().await {
        Some(status) => format!(
          "Sync {}: {} synced, {} failed, {} deferred",
          status.state.as_str(),
          status.synced_items,
          status.failed_items,
          status.deferred_items
        ),
        None if engine.is_syncing() => "Sync already running".to_string(),
        None => "Nothing to sync".to_string(),
      };
      let _ = tx.send(Event::Notice(message));
    });
  }

  fn trigger_force_sync(&mut self) {
    let engine = self.runtime.sync.clone();
    let user_id = self.runtime.user_id().to_string();
    let tx = self.event_tx.clone();
    self.notice = Some("Full sync requested".to_string());

    tokio::spawn(async move {
      let message = match engine.force_sync_all(&user_id).await {
        Ok(report) => {
          let pulled: usize = report.refreshed.values().sum();
          if report.failed.is_empty() {
            format!("Full sync done: {} records pulled", pulled)
          } else {
            format!(
              "Full sync: {} records pulled, {} kinds failed",
              pulled,
              report.failed.len()
            )
          }
        }
        Err(e) => format!("Full sync failed: {}", e),
      };
      let _ = tx.send(Event::Notice(message));
    });
  }

  // Accessors for UI rendering

  pub fn status(&self) -> &SyncStatus {
    &self.status
  }

  pub fn connectivity(&self) -> &ConnectivityState {
    &self.connectivity
  }

  pub fn pending(&self) -> &[PendingSyncItem] {
    &self.pending
  }

  pub fn recent_errors(&self) -> &[ErrorEvent] {
    &self.recent_errors
  }

  pub fn notice(&self) -> Option<&str> {
    self.notice.as_deref()
  }

  pub fn user_id(&self) -> &str {
    self.runtime.user_id()
  }

  pub fn remote_url(&self) -> &str {
    self.runtime.config.remote.url.as_deref().unwrap_or("no remote")
  }
}
