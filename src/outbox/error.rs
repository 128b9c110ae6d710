use thiserror::Error;

/// Errors raised by the outbox store.
#[derive(Debug, Error)]
pub enum OutboxError {
  /// The local store cannot accept writes (quota, read-only, cannot open).
  /// Callers must reject the write instead of dropping it.
  #[error("local storage unavailable: {0}")]
  StorageUnavailable(String),

  /// The store could not be read.
  #[error("outbox storage error: {0}")]
  Storage(String),

  #[error("outbox record {0} not found")]
  NotFound(i64),

  /// `mark_synced` was called with a remote ID that differs from the one
  /// already recorded.
  #[error("outbox record {local_id} already synced as {existing}")]
  AlreadySynced { local_id: i64, existing: String },

  #[error("corrupt outbox record {local_id}: {reason}")]
  Corrupt { local_id: i64, reason: String },
}

impl OutboxError {
  pub(crate) fn storage(e: impl std::fmt::Display) -> Self {
    Self::Storage(e.to_string())
  }

  pub(crate) fn unavailable(e: impl std::fmt::Display) -> Self {
    Self::StorageUnavailable(e.to_string())
  }
}
