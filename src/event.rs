use crossterm::event::{self, Event as CrosstermEvent, KeyEvent};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

use crate::connectivity::ConnectivityState;
use crate::sync::SyncStatus;

/// Dashboard events
#[derive(Debug)]
pub enum Event {
  /// Terminal key press
  Key(KeyEvent),
  /// Periodic tick for UI refresh
  Tick,
  /// New value on the sync status feed
  Sync(SyncStatus),
  /// New value on the connectivity feed
  Connectivity(ConnectivityState),
  /// One-line message for the footer
  Notice(String),
}

/// Event handler that merges terminal input, a tick timer and the core's
/// watch feeds into one channel
pub struct EventHandler {
  tx: mpsc::UnboundedSender<Event>,
  rx: mpsc::UnboundedReceiver<Event>,
}

impl EventHandler {
  /// Create a new event handler with the given tick rate
  pub fn new(tick_rate: Duration) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();

    // Terminal reads block, so they get their own thread
    let input_tx = tx.clone();
    tokio::task::spawn_blocking(move || loop {
      if event::poll(tick_rate).unwrap_or(false) {
        if let Ok(CrosstermEvent::Key(key)) = event::read() {
          if input_tx.send(Event::Key(key)).is_err() {
            break;
          }
        }
      } else if input_tx.send(Event::Tick).is_err() {
        break;
      }
    });

    Self { tx, rx }
  }

  /// Sender for background tasks
  pub fn sender(&self) -> mpsc::UnboundedSender<Event> {
    self.tx.clone()
  }

  /// Forward every value of a watch feed as an event
  pub fn follow<T>(&self, mut feed: watch::Receiver<T>, wrap: fn(T) -> Event)
  where
    T: Clone + Send + Sync + 'static,
  {
    let tx = self.tx.clone();
    tokio::spawn(async move {
      loop {
        let value = feed.borrow_and_update().clone();
        if tx.send(wrap(value)).is_err() {
          break;
        }
        if feed.changed().await.is_err() {
          break;
        }
      }
    });
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<Event> {
    self.rx.recv().await
  }
}
