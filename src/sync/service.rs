use color_eyre::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::reconciler::{ReconcileOutcome, Reconciler};
use super::signal::{BackgroundScheduler, ConnectivitySignal, SyncTag};
use crate::event::{Event, EventHandler};
use crate::outbox::{Outbox, RecordKind};

/// Lets other parts of the process poke a running [`SyncService`].
#[derive(Clone)]
pub struct SyncHandle {
  tx: mpsc::UnboundedSender<Event>,
}

impl SyncHandle {
  /// Ask for a sync of every kind. Returns false if the service is gone.
  pub fn retrigger(&self) -> bool {
    self.tx.send(Event::Retrigger).is_ok()
  }

  pub fn shutdown(&self) -> bool {
    self.tx.send(Event::Shutdown).is_ok()
  }
}

/// Long-running loop that turns connectivity transitions, scheduler
/// wake-ups and retrigger requests into reconciler runs.
pub struct SyncService {
  reconciler: Reconciler,
  outbox: Arc<Outbox>,
  connectivity: ConnectivitySignal,
  scheduler: BackgroundScheduler,
  events: EventHandler,
  runs: JoinSet<()>,
}

impl SyncService {
  pub fn new(
    reconciler: Reconciler,
    outbox: Arc<Outbox>,
    connectivity: ConnectivitySignal,
    scheduler: BackgroundScheduler,
    wakeups: mpsc::UnboundedReceiver<SyncTag>,
    tick_rate: Duration,
  ) -> Self {
    let events = EventHandler::new(tick_rate, &connectivity, wakeups);
    Self {
      reconciler,
      outbox,
      connectivity,
      scheduler,
      events,
      runs: JoinSet::new(),
    }
  }

  pub fn handle(&self) -> SyncHandle {
    SyncHandle {
      tx: self.events.sender(),
    }
  }

  /// Run until [`SyncHandle::shutdown`], then wait for in-flight runs.
  pub async fn run(mut self) -> Result<()> {
    info!(online = self.connectivity.is_online(), "Sync service started");
    self.register_leftovers();

    while let Some(event) = self.events.next().await {
      match event {
        Event::Connectivity(true) => {
          for tag in SyncTag::ALL {
            self.scheduler.acknowledge(tag);
          }
          self.start_run(RecordKind::ALL.to_vec(), "back online");
        }
        Event::Connectivity(false) => {
          info!("Offline, new writes will be queued");
        }
        Event::Wake(tag) => {
          if self.connectivity.is_online() {
            self.scheduler.acknowledge(tag);
            self.start_run(vec![tag.kind()], tag.as_str());
          } else {
            debug!(tag = %tag, "Background task deferred until online");
          }
        }
        Event::Retrigger => {
          if self.connectivity.is_online() {
            self.start_run(RecordKind::ALL.to_vec(), "retrigger");
          } else {
            info!("Offline, sync request deferred");
          }
        }
        Event::Tick => {
          self.reap_finished();
          // Catches records queued by other processes sharing the outbox
          let pending = self.report_pending();
          if pending > 0 && self.connectivity.is_online() && self.runs.is_empty() {
            self.start_run(RecordKind::ALL.to_vec(), "pending on tick");
          }
        }
        Event::Shutdown => break,
      }
    }

    while self.runs.join_next().await.is_some() {}
    info!("Sync service stopped");
    Ok(())
  }

  /// Records queued by an earlier process still need a wake-up.
  fn register_leftovers(&self) {
    for kind in RecordKind::ALL {
      match self.outbox.pending_count(Some(kind)) {
        Ok(0) => {}
        Ok(pending) => {
          debug!(kind = %kind, pending, "Found pending records at startup");
          self
            .scheduler
            .register_background_task(SyncTag::for_kind(kind));
        }
        Err(e) => warn!(kind = %kind, error = %e, "Failed to count pending records"),
      }
    }
  }

  fn start_run(&mut self, kinds: Vec<RecordKind>, trigger: &'static str) {
    let reconciler = self.reconciler.clone();
    self.runs.spawn(async move {
      match reconciler.run(&kinds).await {
        Ok(ReconcileOutcome::Completed(report)) => {
          info!(
            trigger,
            synced = report.synced(),
            failed = report.failed(),
            still_pending = report.still_pending(),
            "Sync run complete"
          );
        }
        Ok(ReconcileOutcome::Coalesced) => {
          debug!(trigger, "Sync trigger merged into the running pass");
        }
        Ok(ReconcileOutcome::Busy) => {
          debug!(trigger, "Another process is draining the outbox");
        }
        Err(e) => {
          error!(trigger, error = %e, "Sync run aborted, outbox unreadable");
        }
      }
    });
  }

  fn reap_finished(&mut self) {
    while let Some(result) = self.runs.try_join_next() {
      if let Err(e) = result {
        error!(error = %e, "Sync run panicked");
      }
    }
  }

  fn report_pending(&self) -> usize {
    match self.outbox.pending_count(None) {
      Ok(0) => 0,
      Ok(pending) => {
        info!(pending, "Pending items awaiting sync");
        pending
      }
      Err(e) => {
        warn!(error = %e, "Failed to count pending records");
        0
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::backup::BackupAdapter;
  use crate::outbox::RecordPayload;
  use crate::sync::RemoteWriter;
  use crate::testing::{MemoryBackupStore, MemoryRemoteStore};
  use chrono::NaiveDate;

  struct Running {
    outbox: Arc<Outbox>,
    remote: Arc<MemoryRemoteStore>,
    connectivity: ConnectivitySignal,
    handle: SyncHandle,
    task: tokio::task::JoinHandle<Result<()>>,
  }

  fn start(online: bool, queued_points: &[i64]) -> Running {
    start_with(
      Arc::new(Outbox::open_in_memory().unwrap()),
      online,
      queued_points,
      Duration::from_secs(30),
    )
  }

  fn start_with(
    outbox: Arc<Outbox>,
    online: bool,
    queued_points: &[i64],
    tick_rate: Duration,
  ) -> Running {
    let remote = Arc::new(MemoryRemoteStore::new());
    remote.add_member("M1", 0);
    for points in queued_points {
      let payload = RecordPayload {
        amount: Some(*points as f64),
        points_delta: *points,
        notes: "Purchase".to_string(),
        occurred_on: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
      };
      outbox
        .enqueue(RecordKind::Transaction, "M1", &payload)
        .unwrap();
    }

    let writer = RemoteWriter::new(
      remote.clone(),
      BackupAdapter::new(Arc::new(MemoryBackupStore::new())),
    );
    let connectivity = ConnectivitySignal::new(online);
    let (scheduler, wakeups) = BackgroundScheduler::new();
    let service = SyncService::new(
      Reconciler::new(outbox.clone(), writer),
      outbox.clone(),
      connectivity.clone(),
      scheduler,
      wakeups,
      tick_rate,
    );
    let handle = service.handle();

    Running {
      outbox,
      remote,
      connectivity,
      handle,
      task: tokio::spawn(service.run()),
    }
  }

  async fn wait_until_drained(outbox: &Outbox) {
    for _ in 0..200 {
      if outbox.pending_count(None).unwrap() == 0 {
        return;
      }
      tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("outbox never drained");
  }

  #[tokio::test]
  async fn test_going_online_drains_outbox() {
    let running = start(false, &[50]);

    // The startup wake-up is deferred while offline
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(running.outbox.pending_count(None).unwrap(), 1);
    assert_eq!(running.remote.create_calls(), 0);

    running.connectivity.set_online(true);
    wait_until_drained(&running.outbox).await;
    assert_eq!(running.remote.balance("M1"), 50);

    running.handle.shutdown();
    running.task.await.unwrap().unwrap();
  }

  #[tokio::test]
  async fn test_leftover_records_sync_at_startup_when_online() {
    let running = start(true, &[5, 6]);

    wait_until_drained(&running.outbox).await;
    assert_eq!(running.remote.balance("M1"), 11);

    running.handle.shutdown();
    running.task.await.unwrap().unwrap();
  }

  #[tokio::test]
  async fn test_retrigger_syncs_new_records() {
    let running = start(true, &[]);
    let payload = RecordPayload {
      amount: Some(3.0),
      points_delta: 3,
      notes: "Purchase".to_string(),
      occurred_on: NaiveDate::from_ymd_opt(2024, 3, 2).unwrap(),
    };
    running
      .outbox
      .enqueue(RecordKind::Transaction, "M1", &payload)
      .unwrap();

    assert!(running.handle.retrigger());
    wait_until_drained(&running.outbox).await;
    assert_eq!(running.remote.balance("M1"), 3);

    running.handle.shutdown();
    running.task.await.unwrap().unwrap();
  }

  #[tokio::test]
  async fn test_tick_picks_up_records_queued_by_another_process() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("outbox.db");
    let running = start_with(
      Arc::new(Outbox::open(&path).unwrap()),
      true,
      &[],
      Duration::from_millis(20),
    );

    // A separate CLI process queues a write; its wake-up never reaches us
    let cli = Outbox::open(&path).unwrap();
    let payload = RecordPayload {
      amount: Some(9.0),
      points_delta: 9,
      notes: "Purchase".to_string(),
      occurred_on: NaiveDate::from_ymd_opt(2024, 3, 3).unwrap(),
    };
    cli.enqueue(RecordKind::Transaction, "M1", &payload).unwrap();

    wait_until_drained(&running.outbox).await;
    assert_eq!(running.remote.balance("M1"), 9);

    running.handle.shutdown();
    running.task.await.unwrap().unwrap();
  }
}
