use color_eyre::Result;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::apply::{RemoteWriter, WriteIntent};
use crate::outbox::{Outbox, OutboxError, PendingRecord, RecordKind};

/// Result of draining one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSummary {
  pub kind: RecordKind,
  pub synced: usize,
  pub failed: usize,
  /// Pending records of this kind left after the drain
  pub still_pending: usize,
}

impl fmt::Display for SyncSummary {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{}: {} synced, {} failed, {} pending",
      self.kind, self.synced, self.failed, self.still_pending
    )
  }
}

/// Summaries of every drain in one run, including coalesced re-runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
  pub summaries: Vec<SyncSummary>,
}

impl SyncReport {
  pub fn synced(&self) -> usize {
    self.summaries.iter().map(|s| s.synced).sum()
  }

  pub fn failed(&self) -> usize {
    self.summaries.iter().map(|s| s.failed).sum()
  }

  /// Latest pending count per kind.
  pub fn still_pending(&self) -> usize {
    RecordKind::ALL
      .iter()
      .filter_map(|kind| self.summaries.iter().rev().find(|s| s.kind == *kind))
      .map(|s| s.still_pending)
      .sum()
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
  Completed(SyncReport),
  /// Another pass was already running; it will drain once more for this
  /// trigger before finishing.
  Coalesced,
  /// Another process holds the drain lease; nothing was drained.
  Busy,
}

/// How long a drain lease lasts without renewal. Renewed before every record.
const LEASE_TTL_SECS: i64 = 300;

fn lease_ttl() -> chrono::Duration {
  chrono::Duration::seconds(LEASE_TTL_SECS)
}

#[derive(Default)]
struct Gate {
  in_flight: bool,
  queued: Vec<RecordKind>,
}

/// Releases the lease and clears the in-flight flag if a pass ends early.
struct InFlight<'a> {
  gate: &'a Mutex<Gate>,
  outbox: &'a Outbox,
  owner: &'a str,
  leased: bool,
  armed: bool,
}

impl InFlight<'_> {
  /// Close the pass. The lease goes before the flag, so a pass started right
  /// after cannot lose its freshly taken lease.
  fn close(&mut self, gate: &mut Gate) {
    if self.leased {
      if let Err(e) = self.outbox.release_lease(self.owner) {
        warn!(error = %e, "Failed to release drain lease, it will expire");
      }
      self.leased = false;
    }
    gate.in_flight = false;
    gate.queued.clear();
    self.armed = false;
  }
}

impl Drop for InFlight<'_> {
  fn drop(&mut self) {
    if self.armed {
      let gate = self.gate;
      let mut gate = gate.lock().unwrap_or_else(|p| p.into_inner());
      self.close(&mut gate);
    }
  }
}

/// Drains the outbox against the remote store.
///
/// At most one pass runs at a time: within the process through the gate,
/// across processes sharing the outbox file through the outbox's drain lease.
/// Records are applied sequentially, oldest first; a failing record is logged
/// and left pending without blocking the ones after it. Every trigger retries
/// everything still pending.
#[derive(Clone)]
pub struct Reconciler {
  outbox: Arc<Outbox>,
  writer: RemoteWriter,
  gate: Arc<Mutex<Gate>>,
  owner: Arc<str>,
}

impl Reconciler {
  pub fn new(outbox: Arc<Outbox>, writer: RemoteWriter) -> Self {
    Self {
      outbox,
      writer,
      gate: Arc::new(Mutex::new(Gate::default())),
      owner: Arc::from(format!("{}:{}", std::process::id(), Uuid::new_v4())),
    }
  }

  fn gate(&self) -> MutexGuard<'_, Gate> {
    self.gate.lock().unwrap_or_else(|p| p.into_inner())
  }

  /// Drain the pending records of `kinds`.
  ///
  /// Only outbox read failures are returned as errors; per-record failures
  /// are counted in the summary.
  pub async fn run(&self, kinds: &[RecordKind]) -> Result<ReconcileOutcome, OutboxError> {
    {
      let mut gate = self.gate();
      if gate.in_flight {
        for kind in kinds {
          if !gate.queued.contains(kind) {
            gate.queued.push(*kind);
          }
        }
        debug!(?kinds, "Reconciliation in flight, coalescing trigger");
        return Ok(ReconcileOutcome::Coalesced);
      }
      gate.in_flight = true;
    }
    let mut in_flight = InFlight {
      gate: &self.gate,
      outbox: &self.outbox,
      owner: &self.owner,
      leased: false,
      armed: true,
    };
    if !self.outbox.try_acquire_lease(&self.owner, lease_ttl())? {
      debug!(?kinds, "Another process is draining the outbox");
      return Ok(ReconcileOutcome::Busy);
    }
    in_flight.leased = true;

    let mut report = SyncReport::default();
    let mut pass: Vec<RecordKind> = kinds.to_vec();
    loop {
      for kind in &pass {
        report.summaries.push(self.drain(*kind).await?);
      }

      let mut gate = self.gate();
      if gate.queued.is_empty() {
        in_flight.close(&mut gate);
        break;
      }
      pass = std::mem::take(&mut gate.queued);
      debug!(kinds = ?pass, "Running coalesced reconciliation");
    }

    for summary in &report.summaries {
      info!(
        kind = %summary.kind,
        synced = summary.synced,
        failed = summary.failed,
        still_pending = summary.still_pending,
        "Reconciliation finished"
      );
    }
    Ok(ReconcileOutcome::Completed(report))
  }

  async fn drain(&self, kind: RecordKind) -> Result<SyncSummary, OutboxError> {
    let pending = self.outbox.list_pending(kind)?;
    let mut synced = 0;
    let mut failed = 0;

    for record in &pending {
      if !self.outbox.try_acquire_lease(&self.owner, lease_ttl())? {
        warn!(kind = %kind, "Drain lease lost, stopping this pass");
        break;
      }
      match self.reconcile(record).await {
        Ok(remote_id) => {
          synced += 1;
          debug!(local_id = record.local_id, remote_id = %remote_id, "Record synced");
        }
        Err(e) => {
          failed += 1;
          warn!(
            local_id = record.local_id,
            kind = %kind,
            member_id = %record.member_id,
            error = %e,
            "Failed to sync record, leaving it pending"
          );
        }
      }
    }

    Ok(SyncSummary {
      kind,
      synced,
      failed,
      still_pending: self.outbox.pending_count(Some(kind))?,
    })
  }

  async fn reconcile(&self, record: &PendingRecord) -> Result<String> {
    let intent = WriteIntent::from(record);
    let remote_id = self.writer.apply(&intent).await?;
    self.writer.back_up(&intent, &remote_id).await?;
    self.outbox.mark_synced(record.local_id, &remote_id)?;
    Ok(remote_id)
  }
}
