use async_trait::async_trait;
use color_eyre::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Ordered column/value pairs of one row.
pub type RowFields = Vec<(String, String)>;

/// A data row as stored in a sheet. Row 1 holds the headers, so data rows
/// start at 2.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SheetRow {
  #[serde(rename = "rowNumber")]
  pub row_number: u32,
  #[serde(default)]
  pub values: HashMap<String, String>,
}

/// A spreadsheet-like secondary store of keyed rows.
#[async_trait]
pub trait BackupStore: Send + Sync {
  /// Create `sheet` with `headers` as its first row if it does not exist.
  async fn ensure_sheet(&self, sheet: &str, headers: &[String]) -> Result<()>;

  async fn list_rows(&self, sheet: &str) -> Result<Vec<SheetRow>>;

  async fn append_row(&self, sheet: &str, values: &RowFields) -> Result<()>;

  /// Overwrite the given columns of an existing row.
  async fn update_row(&self, sheet: &str, row_number: u32, values: &RowFields) -> Result<()>;
}

#[async_trait]
impl<T: BackupStore + ?Sized> BackupStore for Arc<T> {
  async fn ensure_sheet(&self, sheet: &str, headers: &[String]) -> Result<()> {
    (**self).ensure_sheet(sheet, headers).await
  }

  async fn list_rows(&self, sheet: &str) -> Result<Vec<SheetRow>> {
    (**self).list_rows(sheet).await
  }

  async fn append_row(&self, sheet: &str, values: &RowFields) -> Result<()> {
    (**self).append_row(sheet, values).await
  }

  async fn update_row(&self, sheet: &str, row_number: u32, values: &RowFields) -> Result<()> {
    (**self).update_row(sheet, row_number, values).await
  }
}

/// Used when backup is disabled: accepts and forgets every write.
pub struct NoopBackupStore;

#[async_trait]
impl BackupStore for NoopBackupStore {
  async fn ensure_sheet(&self, _sheet: &str, _headers: &[String]) -> Result<()> {
    Ok(())
  }

  async fn list_rows(&self, _sheet: &str) -> Result<Vec<SheetRow>> {
    Ok(Vec::new())
  }

  async fn append_row(&self, _sheet: &str, _values: &RowFields) -> Result<()> {
    Ok(())
  }

  async fn update_row(&self, _sheet: &str, _row_number: u32, _values: &RowFields) -> Result<()> {
    Ok(())
  }
}
