//! The remote half of a write, shared by direct online writes and the
//! reconciler.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::backup::{backup_row, sheet_for, BackupAdapter, UpsertOutcome, ID_COLUMN};
use crate::outbox::{PendingRecord, RecordKind, RecordPayload};
use crate::remote::{collections, record_fields, RemoteStore, POINTS_FIELD};

/// One write on its way to the remote store.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteIntent {
  pub kind: RecordKind,
  pub member_id: String,
  pub payload: RecordPayload,
  pub idempotency_key: String,
  pub created_at: DateTime<Utc>,
}

impl WriteIntent {
  /// A fresh write with a new idempotency key.
  pub fn new(kind: RecordKind, member_id: &str, payload: RecordPayload) -> Self {
    Self {
      kind,
      member_id: member_id.to_string(),
      payload,
      idempotency_key: Uuid::new_v4().to_string(),
      created_at: Utc::now(),
    }
  }
}

impl From<&PendingRecord> for WriteIntent {
  fn from(record: &PendingRecord) -> Self {
    Self {
      kind: record.kind,
      member_id: record.member_id.clone(),
      payload: record.payload.clone(),
      idempotency_key: record.idempotency_key.clone(),
      created_at: record.created_at_local,
    }
  }
}

/// Applies writes to the remote store and mirrors them into the backup.
#[derive(Clone)]
pub struct RemoteWriter {
  remote: Arc<dyn RemoteStore>,
  backup: BackupAdapter,
}

impl RemoteWriter {
  pub fn new(remote: Arc<dyn RemoteStore>, backup: BackupAdapter) -> Self {
    Self { remote, backup }
  }

  pub fn remote(&self) -> &Arc<dyn RemoteStore> {
    &self.remote
  }

  /// Create the record document and move the member balance.
  ///
  /// Both steps are keyed by the intent's idempotency key, so repeating a
  /// partially applied write neither duplicates the document nor the
  /// balance change. Returns the remote ID.
  pub async fn apply(&self, intent: &WriteIntent) -> Result<String> {
    let fields = record_fields(
      intent.kind,
      &intent.member_id,
      &intent.payload,
      &intent.idempotency_key,
      intent.created_at,
    );

    let created = self
      .remote
      .create_document(intent.kind.collection(), &intent.idempotency_key, &fields)
      .await
      .map_err(|e| eyre!("Failed to create {} document: {}", intent.kind, e))?;
    if !created.created {
      debug!(remote_id = %created.id, "Record already existed remotely");
    }

    self
      .remote
      .increment(
        collections::MEMBERS,
        &intent.member_id,
        POINTS_FIELD,
        intent.payload.points_delta,
        &intent.idempotency_key,
      )
      .await
      .map_err(|e| eyre!("Failed to update balance of {}: {}", intent.member_id, e))?;

    Ok(created.id)
  }

  /// Upsert the backup row for an applied write.
  pub async fn back_up(&self, intent: &WriteIntent, remote_id: &str) -> Result<UpsertOutcome> {
    let row = backup_row(
      intent.kind,
      remote_id,
      &intent.member_id,
      &intent.payload,
      intent.created_at,
    );

    self
      .backup
      .upsert(sheet_for(intent.kind), ID_COLUMN, remote_id, &row)
      .await
      .map_err(|e| eyre!("Failed to back up {} {}: {}", intent.kind, remote_id, e))
  }
}
