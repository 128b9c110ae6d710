use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// What kind of write a record represents. Set when the record is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
  /// A purchase that earns points
  Transaction,
  /// Points spent on an item
  Redemption,
}

impl RecordKind {
  /// Every kind, in the order the reconciler drains them.
  pub const ALL: [RecordKind; 2] = [RecordKind::Transaction, RecordKind::Redemption];

  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Transaction => "transaction",
      Self::Redemption => "redemption",
    }
  }

  /// Remote collection that confirmed records of this kind are written to.
  pub fn collection(&self) -> &'static str {
    match self {
      Self::Transaction => "transactions",
      Self::Redemption => "redemptions",
    }
  }
}

impl fmt::Display for RecordKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for RecordKind {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "transaction" => Ok(Self::Transaction),
      "redemption" => Ok(Self::Redemption),
      other => Err(format!("unknown record kind '{}'", other)),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordStatus {
  Pending,
  Synced,
}

impl RecordStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Pending => "pending",
      Self::Synced => "synced",
    }
  }
}

impl FromStr for RecordStatus {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "pending" => Ok(Self::Pending),
      "synced" => Ok(Self::Synced),
      other => Err(format!("unknown record status '{}'", other)),
    }
  }
}

/// Business content of a write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordPayload {
  /// Purchase amount. Redemptions have none.
  pub amount: Option<f64>,
  /// Signed change to the member balance (negative for redemptions)
  pub points_delta: i64,
  /// Free-text notes, or the redeemed item
  pub notes: String,
  /// Day the purchase or redemption happened
  pub occurred_on: NaiveDate,
}

/// A write captured by the outbox.
///
/// `remote_id` is `Some` exactly when `status` is [`RecordStatus::Synced`].
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRecord {
  pub local_id: i64,
  pub kind: RecordKind,
  pub member_id: String,
  pub payload: RecordPayload,
  /// Stable across retries; used as the remote document ID and carried
  /// through the balance increment.
  pub idempotency_key: String,
  pub created_at_local: DateTime<Utc>,
  pub status: RecordStatus,
  pub remote_id: Option<String>,
  pub synced_at: Option<DateTime<Utc>>,
}

impl PendingRecord {
  pub fn is_pending(&self) -> bool {
    self.status == RecordStatus::Pending
  }
}
