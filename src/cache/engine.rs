//! Cache engine that applies the route table to every outgoing request.

use async_trait::async_trait;
use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use super::request::{Request, Response};
use super::routes::{Fallback, ResourceClass, Route, RouteTable, Strategy};
use super::storage::CacheStorage;
use super::traits::{EngineResponse, Fetcher};
use crate::config::CacheConfig;

/// Cache engine that sits between the application and the network.
///
/// GET requests are dispatched through the [`RouteTable`]; everything else
/// goes straight to the network. Routed requests never fail: network errors
/// resolve to a cached copy or the route's fallback response.
pub struct CacheEngine<S: CacheStorage, F: Fetcher> {
  storage: Arc<S>,
  network: Arc<F>,
  routes: Arc<RouteTable>,
  version: String,
  manifest: Arc<Vec<Url>>,
  offline_page: Url,
  ready: Arc<AtomicBool>,
}

impl<S, F> CacheEngine<S, F>
where
  S: CacheStorage + 'static,
  F: Fetcher + 'static,
{
  /// Create an engine from configuration. Call [`install`](Self::install)
  /// before relying on the offline page.
  pub fn new(config: &CacheConfig, storage: S, network: F) -> Result<Self> {
    let manifest = config
      .manifest
      .iter()
      .map(|path| config.resolve(path))
      .collect::<Result<Vec<_>>>()?;

    Ok(Self {
      storage: Arc::new(storage),
      network: Arc::new(network),
      routes: Arc::new(RouteTable::standard(config)?),
      version: config.version.clone(),
      manifest: Arc::new(manifest),
      offline_page: config.resolve(&config.offline_page)?,
      ready: Arc::new(AtomicBool::new(false)),
    })
  }

  /// True once the manifest has been pre-cached.
  pub fn is_ready(&self) -> bool {
    self.ready.load(Ordering::Acquire)
  }

  pub fn version(&self) -> &str {
    &self.version
  }

  pub fn storage(&self) -> &S {
    &self.storage
  }

  /// Namespace names that belong to the running version.
  pub fn current_namespaces(&self) -> HashSet<String> {
    ResourceClass::ALL
      .iter()
      .map(|class| class.namespace(&self.version))
      .collect()
  }

  /// Fetch every manifest asset and store it in the `static` namespace.
  ///
  /// All or nothing: if any asset cannot be fetched nothing is stored and the
  /// engine stays not ready.
  pub async fn install(&self) -> Result<usize> {
    let fetches = self.manifest.iter().map(|url| {
      let request = Request::get(url.clone());
      let network = Arc::clone(&self.network);
      async move {
        let result = network.fetch(&request).await;
        (request, result)
      }
    });

    let mut entries = Vec::with_capacity(self.manifest.len());
    for (request, result) in futures::future::join_all(fetches).await {
      let response = result.map_err(|e| eyre!("Failed to precache {}: {}", request.url, e))?;
      if !response.is_cacheable() {
        return Err(eyre!(
          "Failed to precache {}: status {}",
          request.url,
          response.status
        ));
      }
      entries.push((request, response));
    }

    let namespace = ResourceClass::Static.namespace(&self.version);
    self
      .storage
      .ensure_namespace(&namespace, ResourceClass::Static, &self.version)?;
    self.storage.put_all(&namespace, &entries)?;

    self.ready.store(true, Ordering::Release);
    info!(namespace, assets = entries.len(), "Cache installed");
    Ok(entries.len())
  }

  /// Delete every namespace that does not belong to the running version.
  ///
  /// Returns the names of the deleted namespaces.
  pub fn activate(&self) -> Result<Vec<String>> {
    let current = self.current_namespaces();
    let mut removed = Vec::new();

    for namespace in self.storage.namespaces()? {
      if !current.contains(&namespace.name) {
        self.storage.delete_namespace(&namespace.name)?;
        removed.push(namespace.name);
      }
    }

    info!(version = %self.version, removed = removed.len(), "Cache activated");
    Ok(removed)
  }

  /// Answer `request` according to its route.
  ///
  /// Only non-GET requests can return an error, because they bypass routing.
  pub async fn handle(&self, request: &Request) -> Result<EngineResponse> {
    if request.method != Method::GET {
      let response = self.network.fetch(request).await?;
      return Ok(EngineResponse::from_network(response, None));
    }

    let route = self.routes.route_for(request);
    let result = match route.strategy {
      Strategy::CacheFirst => self.cache_first(route, request).await,
      Strategy::NetworkFirst { timeout } => self.network_first(route, request, timeout).await,
      Strategy::StaleWhileRevalidate => self.stale_while_revalidate(route, request).await,
    };

    debug!(
      url = %request.url,
      class = %route.class,
      source = ?result.source,
      status = result.response.status,
      "Handled request"
    );
    Ok(result)
  }

  async fn cache_first(&self, route: &Route, request: &Request) -> EngineResponse {
    if let Some(cached) = self.lookup(route, request) {
      return cached;
    }

    match self.network.fetch(request).await {
      Ok(response) => {
        self.store(route, request, &response);
        EngineResponse::from_network(response, Some(route.class))
      }
      Err(e) => {
        debug!(url = %request.url, error = %e, "Cache-first fetch failed");
        self.fallback(route)
      }
    }
  }

  async fn network_first(
    &self,
    route: &Route,
    request: &Request,
    timeout: Duration,
  ) -> EngineResponse {
    let outcome = tokio::time::timeout(timeout, self.network.fetch(request)).await;

    match outcome {
      Ok(Ok(response)) => {
        self.store(route, request, &response);
        EngineResponse::from_network(response, Some(route.class))
      }
      Ok(Err(e)) => {
        debug!(url = %request.url, error = %e, "Network-first fetch failed");
        self
          .lookup(route, request)
          .unwrap_or_else(|| self.fallback(route))
      }
      Err(_) => {
        debug!(url = %request.url, ?timeout, "Network-first fetch timed out");
        self
          .lookup(route, request)
          .unwrap_or_else(|| self.fallback(route))
      }
    }
  }

  async fn stale_while_revalidate(&self, route: &Route, request: &Request) -> EngineResponse {
    if let Some(cached) = self.lookup(route, request) {
      // Serve now, refresh in the background
      let engine = self.clone();
      let route = route.clone();
      let request = request.clone();
      tokio::spawn(async move {
        match engine.network.fetch(&request).await {
          Ok(response) => engine.store(&route, &request, &response),
          Err(e) => debug!(url = %request.url, error = %e, "Background revalidation failed"),
        }
      });
      return cached;
    }

    match self.network.fetch(request).await {
      Ok(response) => {
        self.store(route, request, &response);
        EngineResponse::from_network(response, Some(route.class))
      }
      Err(e) => {
        debug!(url = %request.url, error = %e, "Stale-while-revalidate fetch failed");
        self.fallback(route)
      }
    }
  }

  /// Fresh cached copy for `request` in the route's namespace. Entries past
  /// max age count as misses and are removed.
  fn lookup(&self, route: &Route, request: &Request) -> Option<EngineResponse> {
    let namespace = route.class.namespace(&self.version);
    let key = request.cache_key();

    let stored = match self.storage.get(&namespace, &key) {
      Ok(stored) => stored?,
      Err(e) => {
        warn!(namespace, error = %e, "Cache read failed, treating as miss");
        return None;
      }
    };

    if Utc::now() - stored.stored_at > route.expiration.max_age {
      if let Err(e) = self.storage.delete(&namespace, &key) {
        warn!(namespace, error = %e, "Failed to drop expired cache entry");
      }
      return None;
    }

    Some(EngineResponse::from_cache(
      stored.response,
      route.class,
      stored.stored_at,
    ))
  }

  /// Store a successful response and enforce the namespace's limits.
  fn store(&self, route: &Route, request: &Request, response: &Response) {
    if !response.is_cacheable() {
      return;
    }

    let namespace = route.class.namespace(&self.version);
    let result = self
      .storage
      .ensure_namespace(&namespace, route.class, &self.version)
      .and_then(|_| self.storage.put(&namespace, request, response))
      .and_then(|_| self.storage.evict(&namespace, &route.expiration));

    if let Err(e) = result {
      warn!(namespace, url = %request.url, error = %e, "Failed to store response");
    }
  }

  fn fallback(&self, route: &Route) -> EngineResponse {
    let response = match route.fallback {
      Fallback::OfflineJson(error) => Response::offline_json(error),
      Fallback::OfflinePage => self
        .offline_page()
        .unwrap_or_else(Response::service_unavailable),
      Fallback::Unavailable => Response::service_unavailable(),
    };
    EngineResponse::fallback(response, route.class)
  }

  /// The pre-cached offline landing page, if installed.
  fn offline_page(&self) -> Option<Response> {
    let namespace = ResourceClass::Static.namespace(&self.version);
    let key = Request::get(self.offline_page.clone()).cache_key();

    match self.storage.get(&namespace, &key) {
      Ok(stored) => stored.map(|s| s.response),
      Err(e) => {
        warn!(error = %e, "Failed to read offline page");
        None
      }
    }
  }
}

impl<S: CacheStorage, F: Fetcher> Clone for CacheEngine<S, F> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      network: Arc::clone(&self.network),
      routes: Arc::clone(&self.routes),
      version: self.version.clone(),
      manifest: Arc::clone(&self.manifest),
      offline_page: self.offline_page.clone(),
      ready: Arc::clone(&self.ready),
    }
  }
}

#[async_trait]
impl<S, F> Fetcher for CacheEngine<S, F>
where
  S: CacheStorage + 'static,
  F: Fetcher + 'static,
{
  async fn fetch(&self, request: &Request) -> Result<Response> {
    Ok(self.handle(request).await?.response)
  }
}
