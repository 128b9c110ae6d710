pub mod schema;

use color_eyre::{eyre::eyre, Result};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// SQLite connection wrapper shared by the outbox and the cache storage.
pub struct Database {
  conn: Mutex<Connection>,
}

impl Database {
  /// Open or create the database at `path` and apply `schema`.
  pub fn open(path: &Path, schema: &str) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create database directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open database at {}: {}", path.display(), e))?;
    // Other processes may hold a short write lock on the same file
    conn
      .busy_timeout(Duration::from_secs(5))
      .map_err(|e| eyre!("Failed to set busy timeout: {}", e))?;

    let db = Self {
      conn: Mutex::new(conn),
    };
    db.run_migrations(schema)?;

    Ok(db)
  }

  /// Open a private in-memory database. Nothing survives the process.
  pub fn open_in_memory(schema: &str) -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory database: {}", e))?;

    let db = Self {
      conn: Mutex::new(conn),
    };
    db.run_migrations(schema)?;

    Ok(db)
  }

  /// Resolve a file name inside the data directory.
  ///
  /// Uses `data_dir` when configured, otherwise `$XDG_DATA_HOME/loyalty-sync`.
  pub fn default_path(data_dir: Option<&Path>, file_name: &str) -> Result<PathBuf> {
    Ok(Self::data_dir(data_dir)?.join(file_name))
  }

  /// The directory holding all local state (outbox, cache, logs).
  pub fn data_dir(data_dir: Option<&Path>) -> Result<PathBuf> {
    if let Some(dir) = data_dir {
      return Ok(dir.to_path_buf());
    }

    let base = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(base.join("loyalty-sync"))
  }

  /// Run database migrations
  fn run_migrations(&self, schema: &str) -> Result<()> {
    self
      .lock()?
      .execute_batch(schema)
      .map_err(|e| eyre!("Failed to run migrations: {}", e))?;
    Ok(())
  }

  /// Lock the connection for exclusive use.
  pub fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}
