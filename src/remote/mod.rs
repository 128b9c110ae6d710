//! The authoritative remote document store.
//!
//! [`RemoteStore`] is the seam the write gateway and the reconciler talk to.
//! [`HttpRemoteStore`] implements it over any [`crate::cache::Fetcher`],
//! normally the cache engine.

mod api_types;
mod client;
mod store;
mod types;

pub use client::HttpRemoteStore;
pub use store::{Direction, Query, RemoteStore};
pub use types::{
  collections, format_date, record_fields, Document, DocumentRef, Fields, Member, MemberType,
  PointsRules, POINTS_CONFIG_ID, POINTS_FIELD,
};
