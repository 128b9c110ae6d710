//! Entry point for point-earning purchases and redemptions.
//!
//! Online, a write goes straight to the remote store. Offline, or when the
//! direct write fails before the balance moved, it is queued in the outbox
//! and a background sync is requested. Either way the caller learns which
//! happened.

use chrono::{NaiveDate, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::PointsConfig;
use crate::outbox::{Outbox, OutboxError, RecordKind, RecordPayload};
use crate::remote::{collections, Member, MemberType, PointsRules, POINTS_CONFIG_ID};
use crate::sync::{BackgroundScheduler, ConnectivitySignal, RemoteWriter, SyncTag, WriteIntent};

#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
  /// Applied to the remote store
  Confirmed { remote_id: String, points_delta: i64 },
  /// Stored locally; will sync later
  Queued { local_id: i64, points_delta: i64 },
}

impl WriteOutcome {
  pub fn points_delta(&self) -> i64 {
    match self {
      Self::Confirmed { points_delta, .. } | Self::Queued { points_delta, .. } => *points_delta,
    }
  }
}

#[derive(Debug, Error)]
pub enum WriteError {
  #[error("invalid write: {0}")]
  Invalid(String),

  #[error("member {member_id} has {balance} points, cannot redeem {requested}")]
  InsufficientPoints {
    member_id: String,
    balance: i64,
    requested: i64,
  },

  /// The write could not be queued and was not applied.
  #[error("write rejected, local storage unavailable: {0}")]
  StorageUnavailable(String),

  #[error(transparent)]
  Outbox(OutboxError),
}

impl From<OutboxError> for WriteError {
  fn from(e: OutboxError) -> Self {
    match e {
      OutboxError::StorageUnavailable(reason) => Self::StorageUnavailable(reason),
      other => Self::Outbox(other),
    }
  }
}

pub struct WriteGateway {
  outbox: Arc<Outbox>,
  writer: RemoteWriter,
  connectivity: ConnectivitySignal,
  scheduler: BackgroundScheduler,
  points: PointsConfig,
}

impl WriteGateway {
  pub fn new(
    outbox: Arc<Outbox>,
    writer: RemoteWriter,
    connectivity: ConnectivitySignal,
    scheduler: BackgroundScheduler,
    points: PointsConfig,
  ) -> Self {
    Self {
      outbox,
      writer,
      connectivity,
      scheduler,
      points,
    }
  }

  /// Record a purchase of `amount` and award points for it.
  ///
  /// Without an explicit `member_type` the member document decides when it
  /// can be read; otherwise the member is treated as non-trade.
  pub async fn record_transaction(
    &self,
    member_id: &str,
    member_type: Option<MemberType>,
    amount: f64,
    notes: Option<&str>,
    occurred_on: Option<NaiveDate>,
  ) -> Result<WriteOutcome, WriteError> {
    validate_member(member_id)?;
    if !amount.is_finite() || amount <= 0.0 {
      return Err(WriteError::Invalid(format!(
        "amount must be a positive number, got {}",
        amount
      )));
    }

    let member_type = match member_type {
      Some(member_type) => member_type,
      None => self
        .member(member_id)
        .await
        .map(|m| m.member_type)
        .unwrap_or_default(),
    };
    let rules = self.points_rules().await;
    let points = rules.points_for(amount, member_type);
    debug!(member_id, %member_type, amount, points, "Computed points for purchase");

    let payload = RecordPayload {
      amount: Some(amount),
      points_delta: points,
      notes: notes.unwrap_or("Purchase").to_string(),
      occurred_on: occurred_on.unwrap_or_else(|| Utc::now().date_naive()),
    };
    self.write(RecordKind::Transaction, member_id, payload).await
  }

  /// Spend `points` of the member's balance on `item`.
  ///
  /// The balance check needs the remote store; offline redemptions are
  /// queued unchecked.
  pub async fn redeem(
    &self,
    member_id: &str,
    points: i64,
    item: &str,
    occurred_on: Option<NaiveDate>,
  ) -> Result<WriteOutcome, WriteError> {
    validate_member(member_id)?;
    if points <= 0 {
      return Err(WriteError::Invalid(format!(
        "points to redeem must be positive, got {}",
        points
      )));
    }
    if item.trim().is_empty() {
      return Err(WriteError::Invalid("redeemed item is required".to_string()));
    }

    if let Some(member) = self.member(member_id).await {
      if member.points < points {
        return Err(WriteError::InsufficientPoints {
          member_id: member_id.to_string(),
          balance: member.points,
          requested: points,
        });
      }
    }

    let payload = RecordPayload {
      amount: None,
      points_delta: -points,
      notes: item.to_string(),
      occurred_on: occurred_on.unwrap_or_else(|| Utc::now().date_naive()),
    };
    self.write(RecordKind::Redemption, member_id, payload).await
  }

  async fn write(
    &self,
    kind: RecordKind,
    member_id: &str,
    payload: RecordPayload,
  ) -> Result<WriteOutcome, WriteError> {
    let intent = WriteIntent::new(kind, member_id, payload);
    let points_delta = intent.payload.points_delta;

    if self.connectivity.is_online() {
      match self.writer.apply(&intent).await {
        Ok(remote_id) => {
          if let Err(e) = self.writer.back_up(&intent, &remote_id).await {
            warn!(remote_id = %remote_id, error = %e, "Backup of confirmed write failed");
          }
          info!(kind = %kind, member_id, remote_id = %remote_id, points_delta, "Write confirmed");
          return Ok(WriteOutcome::Confirmed {
            remote_id,
            points_delta,
          });
        }
        Err(e) => {
          warn!(kind = %kind, member_id, error = %e, "Direct write failed, queueing it");
        }
      }
    }

    let local_id = self.outbox.enqueue_with_key(
      kind,
      member_id,
      &intent.payload,
      &intent.idempotency_key,
    )?;
    self
      .scheduler
      .register_background_task(SyncTag::for_kind(kind));
    info!(kind = %kind, member_id, local_id, points_delta, "Write queued, will sync later");

    Ok(WriteOutcome::Queued {
      local_id,
      points_delta,
    })
  }

  /// The member document, when online and readable.
  async fn member(&self, member_id: &str) -> Option<Member> {
    if !self.connectivity.is_online() {
      return None;
    }
    match self
      .writer
      .remote()
      .get_document(collections::MEMBERS, member_id)
      .await
    {
      Ok(document) => document.map(|d| Member::from_document(&d)),
      Err(e) => {
        debug!(member_id, error = %e, "Member lookup failed");
        None
      }
    }
  }

  /// Earning rates from `config/points`, or the local defaults.
  async fn points_rules(&self) -> PointsRules {
    if !self.connectivity.is_online() {
      return self.points.into();
    }
    match self
      .writer
      .remote()
      .get_document(collections::CONFIG, POINTS_CONFIG_ID)
      .await
    {
      Ok(Some(document)) => PointsRules::from_document(&document, self.points),
      Ok(None) => self.points.into(),
      Err(e) => {
        debug!(error = %e, "Points configuration unavailable, using local rates");
        self.points.into()
      }
    }
  }
}

fn validate_member(member_id: &str) -> Result<(), WriteError> {
  if member_id.trim().is_empty() {
    return Err(WriteError::Invalid("member ID is required".to_string()));
  }
  Ok(())
}
