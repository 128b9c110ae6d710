use std::time::Duration;
use tokio::sync::mpsc;

use crate::sync::{ConnectivitySignal, SyncTag};

/// Sync service events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
  /// Connectivity transition; `true` means back online
  Connectivity(bool),
  /// The scheduler woke a registered background task
  Wake(SyncTag),
  /// Explicit request to sync now
  Retrigger,
  /// Periodic tick for pending-count reporting
  Tick,
  Shutdown,
}

/// Funnels connectivity transitions, scheduler wake-ups and a tick timer
/// into one ordered stream of events.
pub struct EventHandler {
  tx: mpsc::UnboundedSender<Event>,
  rx: mpsc::UnboundedReceiver<Event>,
}

impl EventHandler {
  /// Create a new event handler with the given tick rate
  pub fn new(
    tick_rate: Duration,
    connectivity: &ConnectivitySignal,
    mut wakeups: mpsc::UnboundedReceiver<SyncTag>,
  ) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();

    // Tick
    let tick_tx = tx.clone();
    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(tick_rate);
      // The first tick completes immediately
      ticker.tick().await;
      loop {
        ticker.tick().await;
        if tick_tx.send(Event::Tick).is_err() {
          break;
        }
      }
    });

    // Connectivity transitions
    let mut online = connectivity.subscribe();
    let connectivity_tx = tx.clone();
    tokio::spawn(async move {
      while online.changed().await.is_ok() {
        let state = *online.borrow_and_update();
        if connectivity_tx.send(Event::Connectivity(state)).is_err() {
          break;
        }
      }
    });

    // Scheduler wake-ups
    let wake_tx = tx.clone();
    tokio::spawn(async move {
      while let Some(tag) = wakeups.recv().await {
        if wake_tx.send(Event::Wake(tag)).is_err() {
          break;
        }
      }
    });

    Self { tx, rx }
  }

  /// Sender for injecting events from outside (retrigger, shutdown)
  pub fn sender(&self) -> mpsc::UnboundedSender<Event> {
    self.tx.clone()
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<Event> {
    self.rx.recv().await
  }
}
