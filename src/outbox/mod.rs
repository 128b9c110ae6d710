//! Durable local outbox for writes the remote store has not confirmed yet.
//!
//! Every point-earning transaction or redemption made while offline lands
//! here as a [`PendingRecord`]. Records are drained oldest-first by the
//! reconciler and flipped to `synced` exactly once.

mod error;
mod record;
mod store;

pub use error::OutboxError;
pub use record::{PendingRecord, RecordKind, RecordPayload, RecordStatus};
pub use store::Outbox;
