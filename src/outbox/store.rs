//! SQLite-backed outbox store.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::path::Path;
use std::sync::MutexGuard;
use tracing::debug;
use uuid::Uuid;

use super::error::OutboxError;
use super::record::{PendingRecord, RecordKind, RecordPayload, RecordStatus};
use crate::db::schema::OUTBOX_SCHEMA;
use crate::db::Database;

const RECORD_COLUMNS: &str = "local_id, kind, member_id, payload, idempotency_key, created_at_ms, \
                              status, remote_id, synced_at_ms";

/// Local durable queue of writes awaiting confirmation.
///
/// Owned by a single process; share it behind an `Arc`. Every method takes the
/// connection lock for its whole duration, so each call is atomic.
pub struct Outbox {
  db: Database,
}

impl Outbox {
  /// Open (or create) the outbox database at `path`.
  pub fn open(path: &Path) -> Result<Self, OutboxError> {
    let db = Database::open(path, OUTBOX_SCHEMA).map_err(OutboxError::unavailable)?;
    Ok(Self { db })
  }

  /// Outbox that lives only as long as the process.
  pub fn open_in_memory() -> Result<Self, OutboxError> {
    let db = Database::open_in_memory(OUTBOX_SCHEMA).map_err(OutboxError::unavailable)?;
    Ok(Self { db })
  }

  fn conn(&self) -> Result<MutexGuard<'_, Connection>, OutboxError> {
    self.db.lock().map_err(OutboxError::unavailable)
  }

  /// Refuse all further writes, as a full or read-only disk would.
  #[cfg(test)]
  pub(crate) fn make_read_only(&self) {
    self
      .conn()
      .unwrap()
      .execute_batch("PRAGMA query_only = ON")
      .unwrap();
  }

  /// Append a new pending record with a fresh idempotency key.
  pub fn enqueue(
    &self,
    kind: RecordKind,
    member_id: &str,
    payload: &RecordPayload,
  ) -> Result<i64, OutboxError> {
    let key = Uuid::new_v4().to_string();
    self.enqueue_with_key(kind, member_id, payload, &key)
  }

  /// Append a new pending record that reuses an existing idempotency key.
  ///
  /// Enqueuing the same key twice returns the existing record's ID, so one
  /// write attempt never yields two records.
  pub fn enqueue_with_key(
    &self,
    kind: RecordKind,
    member_id: &str,
    payload: &RecordPayload,
    idempotency_key: &str,
  ) -> Result<i64, OutboxError> {
    let data = serde_json::to_vec(payload).map_err(OutboxError::storage)?;
    let conn = self.conn()?;
    let now = Utc::now().timestamp_millis();

    let inserted = conn
      .execute(
        "INSERT INTO outbox (kind, member_id, payload, idempotency_key, created_at_ms, status)
         VALUES (?, ?, ?, ?, ?, 'pending')
         ON CONFLICT(idempotency_key) DO NOTHING",
        params![kind.as_str(), member_id, data, idempotency_key, now],
      )
      .map_err(OutboxError::unavailable)?;

    let local_id = if inserted == 1 {
      conn.last_insert_rowid()
    } else {
      conn
        .query_row(
          "SELECT local_id FROM outbox WHERE idempotency_key = ?",
          params![idempotency_key],
          |row| row.get(0),
        )
        .map_err(OutboxError::unavailable)?
    };

    debug!(local_id, kind = %kind, member_id, "Queued write in outbox");
    Ok(local_id)
  }

  /// All pending records of `kind`, oldest first.
  pub fn list_pending(&self, kind: RecordKind) -> Result<Vec<PendingRecord>, OutboxError> {
    let conn = self.conn()?;

    let mut stmt = conn
      .prepare(&format!(
        "SELECT {} FROM outbox
         WHERE kind = ? AND status = 'pending'
         ORDER BY created_at_ms ASC, local_id ASC",
        RECORD_COLUMNS
      ))
      .map_err(OutboxError::storage)?;

    let rows = stmt
      .query_map(params![kind.as_str()], RawRecord::from_row)
      .map_err(OutboxError::storage)?;

    rows
      .map(|row| row.map_err(OutboxError::storage).and_then(RawRecord::into_record))
      .collect()
  }

  /// Point read of a single record, whatever its status.
  pub fn get(&self, local_id: i64) -> Result<Option<PendingRecord>, OutboxError> {
    let conn = self.conn()?;

    let raw = conn
      .query_row(
        &format!("SELECT {} FROM outbox WHERE local_id = ?", RECORD_COLUMNS),
        params![local_id],
        RawRecord::from_row,
      )
      .optional()
      .map_err(OutboxError::storage)?;

    raw.map(RawRecord::into_record).transpose()
  }

  /// Flip a record to `synced` and remember its remote ID.
  ///
  /// Repeating the call with the same arguments is a no-op.
  pub fn mark_synced(&self, local_id: i64, remote_id: &str) -> Result<(), OutboxError> {
    let conn = self.conn()?;

    let updated = conn
      .execute(
        "UPDATE outbox SET status = 'synced', remote_id = ?, synced_at_ms = ?
         WHERE local_id = ? AND status = 'pending'",
        params![remote_id, Utc::now().timestamp_millis(), local_id],
      )
      .map_err(OutboxError::unavailable)?;

    if updated == 1 {
      debug!(local_id, remote_id, "Marked outbox record synced");
      return Ok(());
    }

    let existing: Option<Option<String>> = conn
      .query_row(
        "SELECT remote_id FROM outbox WHERE local_id = ?",
        params![local_id],
        |row| row.get(0),
      )
      .optional()
      .map_err(OutboxError::storage)?;

    match existing {
      None => Err(OutboxError::NotFound(local_id)),
      Some(Some(existing)) if existing == remote_id => Ok(()),
      Some(Some(existing)) => Err(OutboxError::AlreadySynced { local_id, existing }),
      Some(None) => Err(OutboxError::Storage(format!(
        "record {} is still pending after update",
        local_id
      ))),
    }
  }

  /// Number of pending records, for one kind or all of them.
  pub fn pending_count(&self, kind: Option<RecordKind>) -> Result<usize, OutboxError> {
    let conn = self.conn()?;

    let count: i64 = match kind {
      Some(kind) => conn.query_row(
        "SELECT COUNT(*) FROM outbox WHERE status = 'pending' AND kind = ?",
        params![kind.as_str()],
        |row| row.get(0),
      ),
      None => conn.query_row(
        "SELECT COUNT(*) FROM outbox WHERE status = 'pending'",
        [],
        |row| row.get(0),
      ),
    }
    .map_err(OutboxError::storage)?;

    Ok(count as usize)
  }

  /// Delete synced records confirmed before `older_than`. Returns how many
  /// were removed. Pending records are never pruned.
  pub fn prune_synced(&self, older_than: DateTime<Utc>) -> Result<usize, OutboxError> {
    let conn = self.conn()?;

    let removed = conn
      .execute(
        "DELETE FROM outbox WHERE status = 'synced' AND synced_at_ms < ?",
        params![older_than.timestamp_millis()],
      )
      .map_err(OutboxError::unavailable)?;

    debug!(removed, "Pruned synced outbox records");
    Ok(removed)
  }

  /// Claim or extend the drain lease for `owner` until `ttl` from now.
  ///
  /// Returns false while a different owner holds an unexpired lease. The
  /// claim runs under `BEGIN IMMEDIATE`, so two processes sharing the file
  /// cannot both win.
  pub fn try_acquire_lease(&self, owner: &str, ttl: Duration) -> Result<bool, OutboxError> {
    let mut conn = self.conn()?;
    let tx = conn
      .transaction_with_behavior(TransactionBehavior::Immediate)
      .map_err(OutboxError::storage)?;
    let now = Utc::now().timestamp_millis();

    let holder: Option<(String, i64)> = tx
      .query_row(
        "SELECT owner, expires_at_ms FROM sync_lease WHERE id = 1",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .optional()
      .map_err(OutboxError::storage)?;

    if let Some((holder, expires_at_ms)) = holder {
      if holder != owner && expires_at_ms > now {
        debug!(holder = %holder, "Drain lease held elsewhere");
        return Ok(false);
      }
    }

    tx.execute(
      "INSERT INTO sync_lease (id, owner, expires_at_ms) VALUES (1, ?1, ?2)
       ON CONFLICT(id) DO UPDATE SET owner = ?1, expires_at_ms = ?2",
      params![owner, now + ttl.num_milliseconds()],
    )
    .map_err(OutboxError::storage)?;
    tx.commit().map_err(OutboxError::storage)?;
    Ok(true)
  }

  /// Drop the lease if `owner` still holds it.
  pub fn release_lease(&self, owner: &str) -> Result<(), OutboxError> {
    self
      .conn()?
      .execute(
        "DELETE FROM sync_lease WHERE id = 1 AND owner = ?",
        params![owner],
      )
      .map_err(OutboxError::storage)?;
    Ok(())
  }
}

/// Row as stored, before parsing the text columns.
struct RawRecord {
  local_id: i64,
  kind: String,
  member_id: String,
  payload: Vec<u8>,
  idempotency_key: String,
  created_at_ms: i64,
  status: String,
  remote_id: Option<String>,
  synced_at_ms: Option<i64>,
}

impl RawRecord {
  fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      local_id: row.get(0)?,
      kind: row.get(1)?,
      member_id: row.get(2)?,
      payload: row.get(3)?,
      idempotency_key: row.get(4)?,
      created_at_ms: row.get(5)?,
      status: row.get(6)?,
      remote_id: row.get(7)?,
      synced_at_ms: row.get(8)?,
    })
  }

  fn into_record(self) -> Result<PendingRecord, OutboxError> {
    let local_id = self.local_id;
    let corrupt = |reason: String| OutboxError::Corrupt { local_id, reason };

    let kind = self.kind.parse::<RecordKind>().map_err(corrupt)?;
    let status = self.status.parse::<RecordStatus>().map_err(corrupt)?;
    let payload: RecordPayload =
      serde_json::from_slice(&self.payload).map_err(|e| corrupt(e.to_string()))?;
    let created_at_local = millis_to_datetime(self.created_at_ms)
      .ok_or_else(|| corrupt(format!("bad timestamp {}", self.created_at_ms)))?;
    let synced_at = self.synced_at_ms.and_then(millis_to_datetime);

    Ok(PendingRecord {
      local_id,
      kind,
      member_id: self.member_id,
      payload,
      idempotency_key: self.idempotency_key,
      created_at_local,
      status,
      remote_id: self.remote_id,
      synced_at,
    })
  }
}

fn millis_to_datetime(ms: i64) -> Option<DateTime<Utc>> {
  DateTime::from_timestamp_millis(ms)
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::{Duration, NaiveDate};

  fn payload(points: i64) -> RecordPayload {
    RecordPayload {
      amount: Some(points as f64),
      points_delta: points,
      notes: "Purchase".to_string(),
      occurred_on: NaiveDate::from_ymd_opt(2024, 5, 4).unwrap(),
    }
  }

  #[test]
  fn test_enqueue_assigns_increasing_ids() {
    let outbox = Outbox::open_in_memory().unwrap();
    let first = outbox.enqueue(RecordKind::Transaction, "M1", &payload(10)).unwrap();
    let second = outbox.enqueue(RecordKind::Transaction, "M1", &payload(20)).unwrap();
    assert!(second > first);
  }

  #[test]
  fn test_list_pending_is_oldest_first() {
    let outbox = Outbox::open_in_memory().unwrap();
    for points in [5, 1, 9, 3, 7] {
      outbox.enqueue(RecordKind::Transaction, "M1", &payload(points)).unwrap();
    }
    outbox.enqueue(RecordKind::Redemption, "M1", &payload(-2)).unwrap();

    let pending = outbox.list_pending(RecordKind::Transaction).unwrap();
    assert_eq!(pending.len(), 5);
    assert!(pending
      .windows(2)
      .all(|w| w[0].created_at_local <= w[1].created_at_local));
    let deltas: Vec<i64> = pending.iter().map(|r| r.payload.points_delta).collect();
    assert_eq!(deltas, vec![5, 1, 9, 3, 7]);
  }

  #[test]
  fn test_list_pending_filters_by_kind() {
    let outbox = Outbox::open_in_memory().unwrap();
    outbox.enqueue(RecordKind::Transaction, "M1", &payload(10)).unwrap();
    outbox.enqueue(RecordKind::Redemption, "M2", &payload(-5)).unwrap();

    let redemptions = outbox.list_pending(RecordKind::Redemption).unwrap();
    assert_eq!(redemptions.len(), 1);
    assert_eq!(redemptions[0].member_id, "M2");
    assert_eq!(redemptions[0].kind, RecordKind::Redemption);
  }

  #[test]
  fn test_mark_synced_is_idempotent() {
    let outbox = Outbox::open_in_memory().unwrap();
    let id = outbox.enqueue(RecordKind::Transaction, "M1", &payload(10)).unwrap();

    outbox.mark_synced(id, "remote-1").unwrap();
    let after_first = outbox.get(id).unwrap().unwrap();

    outbox.mark_synced(id, "remote-1").unwrap();
    let after_second = outbox.get(id).unwrap().unwrap();

    assert_eq!(after_first, after_second);
    assert_eq!(after_second.status, RecordStatus::Synced);
    assert_eq!(after_second.remote_id.as_deref(), Some("remote-1"));
    assert!(outbox.list_pending(RecordKind::Transaction).unwrap().is_empty());
  }

  #[test]
  fn test_mark_synced_rejects_different_remote_id() {
    let outbox = Outbox::open_in_memory().unwrap();
    let id = outbox.enqueue(RecordKind::Transaction, "M1", &payload(10)).unwrap();
    outbox.mark_synced(id, "remote-1").unwrap();

    let err = outbox.mark_synced(id, "remote-2").unwrap_err();
    assert!(matches!(err, OutboxError::AlreadySynced { .. }));
  }

  #[test]
  fn test_mark_synced_unknown_record() {
    let outbox = Outbox::open_in_memory().unwrap();
    let err = outbox.mark_synced(42, "remote-1").unwrap_err();
    assert!(matches!(err, OutboxError::NotFound(42)));
  }

  #[test]
  fn test_pending_records_have_no_remote_id() {
    let outbox = Outbox::open_in_memory().unwrap();
    outbox.enqueue(RecordKind::Transaction, "M1", &payload(10)).unwrap();

    let pending = outbox.list_pending(RecordKind::Transaction).unwrap();
    assert!(pending[0].is_pending());
    assert!(pending[0].remote_id.is_none());
    assert!(pending[0].synced_at.is_none());
  }

  #[test]
  fn test_same_idempotency_key_yields_one_record() {
    let outbox = Outbox::open_in_memory().unwrap();
    let a = outbox
      .enqueue_with_key(RecordKind::Transaction, "M1", &payload(10), "key-1")
      .unwrap();
    let b = outbox
      .enqueue_with_key(RecordKind::Transaction, "M1", &payload(10), "key-1")
      .unwrap();

    assert_eq!(a, b);
    assert_eq!(outbox.pending_count(None).unwrap(), 1);
  }

  #[test]
  fn test_enqueue_on_read_only_storage_is_unavailable() {
    let outbox = Outbox::open_in_memory().unwrap();
    outbox.make_read_only();

    let err = outbox
      .enqueue(RecordKind::Transaction, "M1", &payload(10))
      .unwrap_err();
    assert!(matches!(err, OutboxError::StorageUnavailable(_)));
  }

  #[test]
  fn test_pending_count_by_kind() {
    let outbox = Outbox::open_in_memory().unwrap();
    outbox.enqueue(RecordKind::Transaction, "M1", &payload(10)).unwrap();
    outbox.enqueue(RecordKind::Transaction, "M2", &payload(10)).unwrap();
    let id = outbox.enqueue(RecordKind::Redemption, "M1", &payload(-3)).unwrap();
    outbox.mark_synced(id, "r-1").unwrap();

    assert_eq!(outbox.pending_count(Some(RecordKind::Transaction)).unwrap(), 2);
    assert_eq!(outbox.pending_count(Some(RecordKind::Redemption)).unwrap(), 0);
    assert_eq!(outbox.pending_count(None).unwrap(), 2);
  }

  #[test]
  fn test_prune_only_removes_synced() {
    let outbox = Outbox::open_in_memory().unwrap();
    let synced = outbox.enqueue(RecordKind::Transaction, "M1", &payload(10)).unwrap();
    let pending = outbox.enqueue(RecordKind::Transaction, "M1", &payload(20)).unwrap();
    outbox.mark_synced(synced, "remote-1").unwrap();

    let removed = outbox.prune_synced(Utc::now() + Duration::minutes(1)).unwrap();

    assert_eq!(removed, 1);
    assert!(outbox.get(synced).unwrap().is_none());
    assert!(outbox.get(pending).unwrap().is_some());
  }

  #[test]
  fn test_lease_is_exclusive_across_handles_on_one_file() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("outbox.db");
    let first = Outbox::open(&path).unwrap();
    let second = Outbox::open(&path).unwrap();
    let ttl = Duration::minutes(5);

    assert!(first.try_acquire_lease("serve", ttl).unwrap());
    assert!(!second.try_acquire_lease("cli", ttl).unwrap());
    // The holder can extend its own lease
    assert!(first.try_acquire_lease("serve", ttl).unwrap());

    // Releasing under another owner's name changes nothing
    second.release_lease("cli").unwrap();
    assert!(!second.try_acquire_lease("cli", ttl).unwrap());

    first.release_lease("serve").unwrap();
    assert!(second.try_acquire_lease("cli", ttl).unwrap());
  }

  #[test]
  fn test_expired_lease_can_be_taken_over() {
    let outbox = Outbox::open_in_memory().unwrap();

    assert!(outbox.try_acquire_lease("crashed", Duration::seconds(-1)).unwrap());
    assert!(outbox.try_acquire_lease("serve", Duration::minutes(5)).unwrap());
    assert!(!outbox.try_acquire_lease("crashed", Duration::minutes(5)).unwrap());
  }

  #[test]
  fn test_records_survive_reopen() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("outbox.db");

    let id = {
      let outbox = Outbox::open(&path).unwrap();
      outbox.enqueue(RecordKind::Redemption, "M7", &payload(-15)).unwrap()
    };

    let reopened = Outbox::open(&path).unwrap();
    let pending = reopened.list_pending(RecordKind::Redemption).unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].local_id, id);
    assert_eq!(pending[0].payload.points_delta, -15);
  }
}
