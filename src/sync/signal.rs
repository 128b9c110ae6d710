//! Connectivity signal and background-task scheduler.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use url::Url;

use crate::cache::{Fetcher, Request};
use crate::outbox::RecordKind;

/// Online/offline state shared across the process.
///
/// Subscribers are woken on transitions only; setting the current value
/// again is silent.
#[derive(Clone)]
pub struct ConnectivitySignal {
  tx: Arc<watch::Sender<bool>>,
}

impl ConnectivitySignal {
  pub fn new(online: bool) -> Self {
    let (tx, _rx) = watch::channel(online);
    Self { tx: Arc::new(tx) }
  }

  pub fn is_online(&self) -> bool {
    *self.tx.borrow()
  }

  /// Record the current state. Returns true if it changed.
  pub fn set_online(&self, online: bool) -> bool {
    let changed = self.tx.send_if_modified(|current| {
      if *current == online {
        false
      } else {
        *current = online;
        true
      }
    });
    if changed {
      info!(online, "Connectivity changed");
    }
    changed
  }

  pub fn subscribe(&self) -> watch::Receiver<bool> {
    self.tx.subscribe()
  }
}

/// Periodically probes a URL and feeds the result into a
/// [`ConnectivitySignal`]. Any HTTP answer counts as online.
pub struct ConnectivityProbe<F: Fetcher> {
  fetcher: F,
  url: Url,
  interval: Duration,
  signal: ConnectivitySignal,
}

impl<F: Fetcher + 'static> ConnectivityProbe<F> {
  pub fn new(fetcher: F, url: Url, interval: Duration, signal: ConnectivitySignal) -> Self {
    Self {
      fetcher,
      url,
      interval,
      signal,
    }
  }

  pub async fn probe_once(&self) -> bool {
    let request = Request::new(reqwest::Method::HEAD, self.url.clone());
    let online = match tokio::time::timeout(self.interval, self.fetcher.fetch(&request)).await {
      Ok(Ok(_)) => true,
      Ok(Err(e)) => {
        debug!(url = %self.url, error = %e, "Connectivity probe failed");
        false
      }
      Err(_) => {
        debug!(url = %self.url, "Connectivity probe timed out");
        false
      }
    };
    self.signal.set_online(online);
    online
  }

  /// Probe forever on a background task.
  pub fn spawn(self) -> JoinHandle<()> {
    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(self.interval);
      loop {
        ticker.tick().await;
        self.probe_once().await;
      }
    })
  }
}

/// Background task tag: one per record kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncTag {
  Transactions,
  Redemptions,
}

impl SyncTag {
  pub const ALL: [SyncTag; 2] = [SyncTag::Transactions, SyncTag::Redemptions];

  pub fn for_kind(kind: RecordKind) -> Self {
    match kind {
      RecordKind::Transaction => Self::Transactions,
      RecordKind::Redemption => Self::Redemptions,
    }
  }

  pub fn kind(&self) -> RecordKind {
    match self {
      Self::Transactions => RecordKind::Transaction,
      Self::Redemptions => RecordKind::Redemption,
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Transactions => "sync-transactions",
      Self::Redemptions => "sync-redemptions",
    }
  }
}

impl fmt::Display for SyncTag {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Delivers background-task registrations to the sync service as wake-ups.
///
/// A tag stays outstanding until the wake-up is acknowledged; registering it
/// again in the meantime is a no-op.
#[derive(Clone)]
pub struct BackgroundScheduler {
  tx: mpsc::UnboundedSender<SyncTag>,
  outstanding: Arc<Mutex<HashSet<SyncTag>>>,
}

impl BackgroundScheduler {
  pub fn new() -> (Self, mpsc::UnboundedReceiver<SyncTag>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let scheduler = Self {
      tx,
      outstanding: Arc::new(Mutex::new(HashSet::new())),
    };
    (scheduler, rx)
  }

  /// Ask to be woken for `tag`. Returns false if a wake-up is already
  /// outstanding or nobody is listening.
  pub fn register_background_task(&self, tag: SyncTag) -> bool {
    let mut outstanding = self
      .outstanding
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner());
    if !outstanding.insert(tag) {
      debug!(tag = %tag, "Background task already registered");
      return false;
    }
    if self.tx.send(tag).is_err() {
      outstanding.remove(&tag);
      return false;
    }
    debug!(tag = %tag, "Registered background task");
    true
  }

  /// Mark the wake-up for `tag` as handled.
  pub fn acknowledge(&self, tag: SyncTag) {
    self
      .outstanding
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
      .remove(&tag);
  }

  pub fn is_outstanding(&self, tag: SyncTag) -> bool {
    self
      .outstanding
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
      .contains(&tag)
  }
}
