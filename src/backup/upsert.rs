use color_eyre::Result;
use std::sync::Arc;
use tracing::debug;

use super::store::{BackupStore, RowFields};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
  Appended,
  Updated { row_number: u32 },
}

/// Keeps at most one backup row per ID.
///
/// Scan-then-write: two writers upserting the same new ID at the same time
/// can both append. Callers serialize through the reconciler.
#[derive(Clone)]
pub struct BackupAdapter {
  store: Arc<dyn BackupStore>,
}

impl BackupAdapter {
  pub fn new(store: Arc<dyn BackupStore>) -> Self {
    Self { store }
  }

  /// Update the row whose `id_field` equals `id_value`, or append one.
  ///
  /// The sheet is created on first use with headers taken from `fields`
  /// (the ID column first if `fields` lacks it).
  pub async fn upsert(
    &self,
    sheet: &str,
    id_field: &str,
    id_value: &str,
    fields: &RowFields,
  ) -> Result<UpsertOutcome> {
    let mut row = fields.clone();
    let id_column = row.iter().position(|(name, _)| name == id_field);
    match id_column {
      Some(index) => row[index].1 = id_value.to_string(),
      None => row.insert(0, (id_field.to_string(), id_value.to_string())),
    }

    let headers: Vec<String> = row.iter().map(|(name, _)| name.clone()).collect();
    self.store.ensure_sheet(sheet, &headers).await?;

    let existing = self
      .store
      .list_rows(sheet)
      .await?
      .into_iter()
      .find(|r| r.values.get(id_field).map(String::as_str) == Some(id_value));

    match existing {
      Some(found) => {
        self
          .store
          .update_row(sheet, found.row_number, &row)
          .await?;
        debug!(sheet, id = id_value, row = found.row_number, "Updated backup row");
        Ok(UpsertOutcome::Updated {
          row_number: found.row_number,
        })
      }
      None => {
        self.store.append_row(sheet, &row).await?;
        debug!(sheet, id = id_value, "Appended backup row");
        Ok(UpsertOutcome::Appended)
      }
    }
  }
}
