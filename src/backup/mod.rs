//! Secondary backup of confirmed records into a spreadsheet-like store.
//!
//! Rows are keyed by the remote record ID; [`BackupAdapter::upsert`] keeps
//! at most one row per ID, so replaying a backup after a partial failure
//! overwrites instead of duplicating.

mod rows;
mod sheets;
mod store;
mod upsert;

pub use rows::{backup_row, sheet_for, ID_COLUMN};
pub use sheets::HttpSheetsStore;
pub use store::{BackupStore, NoopBackupStore, RowFields, SheetRow};
pub use upsert::{BackupAdapter, UpsertOutcome};
