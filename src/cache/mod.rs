//! Resource-class-aware network cache.
//!
//! Every outgoing request is matched against a declarative [`RouteTable`];
//! the matching route decides the strategy (cache-first, network-first or
//! stale-while-revalidate), the namespace the response lands in, how long it
//! lives and what to answer when both network and cache come up empty.
//!
//! Namespaces are versioned (`static-v1`, `remote-data-v1`, ...). Installing
//! a new version pre-caches the manifest; activating it deletes every
//! namespace from older versions.

mod engine;
mod http;
mod request;
mod routes;
mod storage;
mod traits;

pub use engine::CacheEngine;
pub use http::HttpFetcher;
pub use request::{Destination, Request, RequestMode, Response};
pub use routes::{Expiration, Fallback, ResourceClass, Route, RouteTable, Strategy};
pub use storage::{CacheStorage, NamespaceInfo, NoopStorage, SqliteStorage, StoredResponse};
pub use traits::{EngineResponse, Fetcher, ResponseSource};
