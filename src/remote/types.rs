//! Documents read from and written to the remote store.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::config::PointsConfig;
use crate::outbox::{RecordKind, RecordPayload};

/// Field map of a remote document.
pub type Fields = Map<String, Value>;

pub mod collections {
  pub const MEMBERS: &str = "members";
  pub const TRANSACTIONS: &str = "transactions";
  pub const REDEMPTIONS: &str = "redemptions";
  pub const REFERRALS: &str = "referrals";
  pub const CONFIG: &str = "config";
}

/// Name of the member balance field.
pub const POINTS_FIELD: &str = "points";

/// Document ID of the earning rates inside the `config` collection.
pub const POINTS_CONFIG_ID: &str = "points";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
  pub id: String,
  #[serde(default)]
  pub fields: Fields,
  #[serde(rename = "createTime", default)]
  pub create_time: Option<DateTime<Utc>>,
  #[serde(rename = "updateTime", default)]
  pub update_time: Option<DateTime<Utc>>,
}

impl Document {
  pub fn str_field(&self, name: &str) -> Option<&str> {
    self.fields.get(name).and_then(Value::as_str)
  }

  pub fn f64_field(&self, name: &str) -> Option<f64> {
    self.fields.get(name).and_then(Value::as_f64)
  }

  /// Integer field; whole floats are accepted since JSON does not tell them apart.
  pub fn i64_field(&self, name: &str) -> Option<i64> {
    let value = self.fields.get(name)?;
    value.as_i64().or_else(|| {
      value
        .as_f64()
        .filter(|f| f.fract() == 0.0)
        .map(|f| f as i64)
    })
  }
}

/// Result of creating a document.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentRef {
  pub id: String,
  pub create_time: Option<DateTime<Utc>>,
  /// False when a document with the requested ID already existed
  pub created: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MemberType {
  Trade,
  #[default]
  NonTrade,
}

impl MemberType {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Trade => "trade",
      Self::NonTrade => "non-trade",
    }
  }
}

impl fmt::Display for MemberType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for MemberType {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "trade" => Ok(Self::Trade),
      "non-trade" | "nontrade" => Ok(Self::NonTrade),
      other => Err(format!("unknown member type '{}'", other)),
    }
  }
}

/// The parts of a member document the write path needs.
#[derive(Debug, Clone, PartialEq)]
pub struct Member {
  pub id: String,
  pub points: i64,
  pub member_type: MemberType,
}

impl Member {
  pub fn from_document(document: &Document) -> Self {
    let member_type = document
      .str_field("memberType")
      .and_then(|s| s.parse().ok())
      .unwrap_or_default();

    Self {
      id: document.id.clone(),
      points: document.i64_field(POINTS_FIELD).unwrap_or(0),
      member_type,
    }
  }
}

/// Points earned per currency unit, by member type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointsRules {
  pub trade_rate: f64,
  pub non_trade_rate: f64,
}

impl PointsRules {
  /// Rates from the `config/points` document; missing fields keep the local
  /// defaults.
  pub fn from_document(document: &Document, defaults: PointsConfig) -> Self {
    Self {
      trade_rate: document
        .f64_field("tradePointsRate")
        .unwrap_or(defaults.trade_rate),
      non_trade_rate: document
        .f64_field("nonTradePointsRate")
        .unwrap_or(defaults.non_trade_rate),
    }
  }

  pub fn rate_for(&self, member_type: MemberType) -> f64 {
    match member_type {
      MemberType::Trade => self.trade_rate,
      MemberType::NonTrade => self.non_trade_rate,
    }
  }

  /// Whole points earned for a purchase of `amount`, rounded down.
  pub fn points_for(&self, amount: f64, member_type: MemberType) -> i64 {
    (amount * self.rate_for(member_type)).floor() as i64
  }
}

impl From<PointsConfig> for PointsRules {
  fn from(config: PointsConfig) -> Self {
    Self {
      trade_rate: config.trade_rate,
      non_trade_rate: config.non_trade_rate,
    }
  }
}

/// Fields of the remote document created for one write.
pub fn record_fields(
  kind: RecordKind,
  member_id: &str,
  payload: &RecordPayload,
  idempotency_key: &str,
  created_at: DateTime<Utc>,
) -> Fields {
  let date = format_date(payload.occurred_on);
  let value = match kind {
    RecordKind::Transaction => json!({
      "memberId": member_id,
      "amount": payload.amount.unwrap_or_default(),
      "pointsEarned": payload.points_delta,
      "notes": payload.notes,
      "date": date,
      "createdAt": created_at.to_rfc3339(),
      "idempotencyKey": idempotency_key,
    }),
    RecordKind::Redemption => json!({
      "memberId": member_id,
      "points": -payload.points_delta,
      "item": payload.notes,
      "date": date,
      "createdAt": created_at.to_rfc3339(),
      "idempotencyKey": idempotency_key,
    }),
  };

  match value {
    Value::Object(fields) => fields,
    _ => Fields::new(),
  }
}

pub fn format_date(date: NaiveDate) -> String {
  date.format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
  use super::*;

  fn document(fields: Value) -> Document {
    Document {
      id: "M1".to_string(),
      fields: fields.as_object().cloned().unwrap(),
      create_time: None,
      update_time: None,
    }
  }

  #[test]
  fn test_points_round_down() {
    let rules = PointsRules::from(PointsConfig::default());
    assert_eq!(rules.points_for(25.9, MemberType::NonTrade), 25);
    assert_eq!(rules.points_for(25.9, MemberType::Trade), 51);
    assert_eq!(rules.points_for(0.5, MemberType::NonTrade), 0);
  }

  #[test]
  fn test_points_rules_from_document_keep_missing_defaults() {
    let rules = PointsRules::from_document(
      &document(json!({ "tradePointsRate": 3 })),
      PointsConfig::default(),
    );
    assert_eq!(rules.trade_rate, 3.0);
    assert_eq!(rules.non_trade_rate, 1.0);
  }

  #[test]
  fn test_member_from_document() {
    let member = Member::from_document(&document(json!({
      "points": 120.0,
      "memberType": "trade",
    })));
    assert_eq!(member.points, 120);
    assert_eq!(member.member_type, MemberType::Trade);

    let bare = Member::from_document(&document(json!({})));
    assert_eq!(bare.points, 0);
    assert_eq!(bare.member_type, MemberType::NonTrade);
  }

  #[test]
  fn test_redemption_fields_store_positive_points() {
    let payload = RecordPayload {
      amount: None,
      points_delta: -40,
      notes: "Coffee voucher".to_string(),
      occurred_on: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
    };
    let fields = record_fields(RecordKind::Redemption, "M1", &payload, "key-1", Utc::now());

    assert_eq!(fields["points"], 40);
    assert_eq!(fields["item"], "Coffee voucher");
    assert_eq!(fields["date"], "2024-03-01");
    assert_eq!(fields["idempotencyKey"], "key-1");
  }
}
