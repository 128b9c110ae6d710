//! Background reconciliation of the outbox.
//!
//! The [`Reconciler`] drains pending records against the remote store behind
//! a single-flight gate. The [`SyncService`] decides when: on every
//! offline-to-online transition, on scheduler wake-ups and on explicit
//! retrigger requests.

mod apply;
mod reconciler;
mod service;
mod signal;

pub use apply::{RemoteWriter, WriteIntent};
pub use reconciler::{ReconcileOutcome, Reconciler, SyncReport, SyncSummary};
pub use service::{SyncHandle, SyncService};
pub use signal::{BackgroundScheduler, ConnectivityProbe, ConnectivitySignal, SyncTag};
