//! Core traits and types for the caching system.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use color_eyre::Result;
use std::sync::Arc;

use super::request::{Request, Response};
use super::routes::ResourceClass;

/// Anything that can turn a request into a response: the real network, the
/// cache engine layered over it, or a fake in tests.
#[async_trait]
pub trait Fetcher: Send + Sync {
  async fn fetch(&self, request: &Request) -> Result<Response>;
}

#[async_trait]
impl<T: Fetcher + ?Sized> Fetcher for Arc<T> {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    (**self).fetch(request).await
  }
}

/// Response produced by the engine, including metadata about the source.
#[derive(Debug, Clone)]
pub struct EngineResponse {
  /// The actual response
  pub response: Response,
  /// Where the response came from
  pub source: ResponseSource,
  /// Resource class of the route that handled the request, `None` for
  /// requests that bypass routing
  pub class: Option<ResourceClass>,
  /// When the response was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl EngineResponse {
  /// Create a response from fresh network data.
  pub fn from_network(response: Response, class: Option<ResourceClass>) -> Self {
    Self {
      response,
      source: ResponseSource::Network,
      class,
      cached_at: None,
    }
  }

  /// Create a response from cached data.
  pub fn from_cache(response: Response, class: ResourceClass, cached_at: DateTime<Utc>) -> Self {
    Self {
      response,
      source: ResponseSource::Cache,
      class: Some(class),
      cached_at: Some(cached_at),
    }
  }

  /// Create a synthesized offline response.
  pub fn fallback(response: Response, class: ResourceClass) -> Self {
    Self {
      response,
      source: ResponseSource::Fallback,
      class: Some(class),
      cached_at: None,
    }
  }
}

/// Indicates where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Fresh data from network
  Network,
  /// Stored copy from a cache namespace
  Cache,
  /// Network unavailable and nothing cached: the route's offline response
  Fallback,
}
