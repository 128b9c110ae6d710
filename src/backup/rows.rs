//! Sheet layout of backed-up records.

use chrono::{DateTime, Utc};

use super::store::RowFields;
use crate::outbox::{RecordKind, RecordPayload};
use crate::remote::format_date;

/// Column holding the remote record ID in every sheet.
pub const ID_COLUMN: &str = "ID";

pub fn sheet_for(kind: RecordKind) -> &'static str {
  match kind {
    RecordKind::Transaction => "Transactions",
    RecordKind::Redemption => "Redemptions",
  }
}

/// Backup row for a confirmed record, keyed by its remote ID.
pub fn backup_row(
  kind: RecordKind,
  remote_id: &str,
  member_id: &str,
  payload: &RecordPayload,
  created_at: DateTime<Utc>,
) -> RowFields {
  let date = format_date(payload.occurred_on);
  let created = created_at.format("%Y-%m-%d %H:%M:%S").to_string();

  let columns: Vec<(&str, String)> = match kind {
    RecordKind::Transaction => vec![
      (ID_COLUMN, remote_id.to_string()),
      ("Member ID", member_id.to_string()),
      ("Amount", payload.amount.unwrap_or_default().to_string()),
      ("Points Earned", payload.points_delta.to_string()),
      ("Date", date),
      ("Notes", payload.notes.clone()),
      ("Created At", created),
    ],
    RecordKind::Redemption => vec![
      (ID_COLUMN, remote_id.to_string()),
      ("Member ID", member_id.to_string()),
      ("Points Redeemed", (-payload.points_delta).to_string()),
      ("Item", payload.notes.clone()),
      ("Date", date),
      ("Created At", created),
    ],
  };

  columns
    .into_iter()
    .map(|(name, value)| (name.to_string(), value))
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::{NaiveDate, TimeZone};

  fn column<'a>(row: &'a RowFields, name: &str) -> &'a str {
    row
      .iter()
      .find(|(k, _)| k == name)
      .map(|(_, v)| v.as_str())
      .unwrap()
  }

  #[test]
  fn test_transaction_columns() {
    let payload = RecordPayload {
      amount: Some(50.75),
      points_delta: 50,
      notes: "Groceries".to_string(),
      occurred_on: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
    };
    let created = Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap();
    let row = backup_row(RecordKind::Transaction, "tx-1", "M1", &payload, created);

    let names: Vec<&str> = row.iter().map(|(k, _)| k.as_str()).collect();
    assert_eq!(
      names,
      vec!["ID", "Member ID", "Amount", "Points Earned", "Date", "Notes", "Created At"]
    );
    assert_eq!(column(&row, "Amount"), "50.75");
    assert_eq!(column(&row, "Points Earned"), "50");
    assert_eq!(column(&row, "Created At"), "2024-03-01 09:30:00");
  }

  #[test]
  fn test_redemption_columns() {
    let payload = RecordPayload {
      amount: None,
      points_delta: -30,
      notes: "Tote bag".to_string(),
      occurred_on: NaiveDate::from_ymd_opt(2024, 3, 2).unwrap(),
    };
    let row = backup_row(RecordKind::Redemption, "rd-1", "M2", &payload, Utc::now());

    assert_eq!(sheet_for(RecordKind::Redemption), "Redemptions");
    assert_eq!(column(&row, "Points Redeemed"), "30");
    assert_eq!(column(&row, "Item"), "Tote bag");
    assert_eq!(row.len(), 6);
  }
}
