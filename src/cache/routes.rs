//! Declarative route table: which caching policy applies to which request.
//!
//! Routes are evaluated in order and the first match wins, so the most
//! specific matchers come first. The last route matches everything.

use chrono::Duration as AgeLimit;
use color_eyre::{eyre::eyre, Result};
use std::fmt;
use std::time::Duration;
use url::Url;

use super::request::{Destination, Request, RequestMode};
use crate::config::CacheConfig;

/// Category of network request. Each class owns one cache namespace per
/// version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceClass {
  Static,
  Dynamic,
  Api,
  RemoteAuth,
  RemoteData,
  Font,
  Image,
}

impl ResourceClass {
  pub const ALL: [ResourceClass; 7] = [
    ResourceClass::Static,
    ResourceClass::Dynamic,
    ResourceClass::Api,
    ResourceClass::RemoteAuth,
    ResourceClass::RemoteData,
    ResourceClass::Font,
    ResourceClass::Image,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Static => "static",
      Self::Dynamic => "dynamic",
      Self::Api => "api",
      Self::RemoteAuth => "remote-auth",
      Self::RemoteData => "remote-data",
      Self::Font => "font",
      Self::Image => "image",
    }
  }

  /// Namespace name for this class at `version`, e.g. `static-v1`.
  pub fn namespace(&self, version: &str) -> String {
    format!("{}-{}", self.as_str(), version)
  }
}

impl fmt::Display for ResourceClass {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  /// Serve from cache if present, otherwise fetch and store.
  CacheFirst,
  /// Try the network within `timeout`, fall back to cache, then to the
  /// route's fallback.
  NetworkFirst { timeout: Duration },
  /// Serve from cache immediately and refresh in the background.
  StaleWhileRevalidate,
}

/// Per-namespace expiration policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expiration {
  pub max_entries: usize,
  pub max_age: AgeLimit,
}

impl Expiration {
  pub fn new(max_entries: usize, max_age: AgeLimit) -> Self {
    Self {
      max_entries,
      max_age,
    }
  }
}

/// What to answer when neither network nor cache can.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fallback {
  /// Structured `{"isOffline": true, "error": ...}` payload
  OfflineJson(&'static str),
  /// The pre-cached offline landing page
  OfflinePage,
  /// Plain 503
  Unavailable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Matcher {
  /// Request host is one of these
  Hosts(Vec<String>),
  /// Same origin as this URL, with its path as a prefix
  UrlPrefix(Url),
  /// Any of the inner matchers
  AnyOf(Vec<Matcher>),
  /// Request path starts with this prefix
  PathPrefix(String),
  /// Font host, or anything requested as a font
  Font(Vec<String>),
  /// Image from an origin other than the application's
  ForeignImage,
  /// Scripts, styles and bundled images
  StaticAsset,
  Navigation,
  Any,
}

impl Matcher {
  fn matches(&self, request: &Request, origin: &Url) -> bool {
    let host = request.url.host_str().unwrap_or_default();

    match self {
      Self::Hosts(hosts) => hosts.iter().any(|h| h.eq_ignore_ascii_case(host)),
      Self::UrlPrefix(base) => {
        request.url.origin() == base.origin() && request.url.path().starts_with(base.path())
      }
      Self::AnyOf(matchers) => matchers.iter().any(|m| m.matches(request, origin)),
      Self::PathPrefix(prefix) => request.url.path().starts_with(prefix.as_str()),
      Self::Font(hosts) => {
        request.destination == Destination::Font
          || hosts.iter().any(|h| h.eq_ignore_ascii_case(host))
      }
      Self::ForeignImage => {
        request.destination == Destination::Image && request.url.origin() != origin.origin()
      }
      Self::StaticAsset => matches!(
        request.destination,
        Destination::Script | Destination::Style | Destination::Image
      ),
      Self::Navigation => request.mode == RequestMode::Navigate,
      Self::Any => true,
    }
  }
}

#[derive(Debug, Clone)]
pub struct Route {
  pub class: ResourceClass,
  pub matcher: Matcher,
  pub strategy: Strategy,
  pub expiration: Expiration,
  pub fallback: Fallback,
}

/// Ordered list of routes; the first matching route handles the request.
#[derive(Debug, Clone)]
pub struct RouteTable {
  origin: Url,
  routes: Vec<Route>,
  default: Route,
}

impl RouteTable {
  /// The application's standard policy table.
  pub fn standard(config: &CacheConfig) -> Result<Self> {
    let timeout = config.network_timeout();
    let network_first = Strategy::NetworkFirst { timeout };

    let mut document_store = vec![Matcher::Hosts(config.document_store_hosts.clone())];
    for base in &config.document_store_urls {
      let url = Url::parse(base)
        .map_err(|e| eyre!("Invalid document store URL '{}': {}", base, e))?;
      document_store.push(Matcher::UrlPrefix(url));
    }

    let routes = vec![
      Route {
        class: ResourceClass::RemoteAuth,
        matcher: Matcher::Hosts(config.auth_hosts.clone()),
        strategy: network_first,
        expiration: Expiration::new(10, AgeLimit::hours(1)),
        fallback: Fallback::OfflineJson("No internet connection"),
      },
      Route {
        class: ResourceClass::RemoteData,
        matcher: Matcher::AnyOf(document_store),
        strategy: network_first,
        expiration: Expiration::new(100, AgeLimit::hours(24)),
        fallback: Fallback::OfflineJson("No cached data available"),
      },
      Route {
        class: ResourceClass::Api,
        matcher: Matcher::PathPrefix(config.api_prefix.clone()),
        strategy: network_first,
        expiration: Expiration::new(50, AgeLimit::hours(1)),
        fallback: Fallback::OfflineJson("Offline"),
      },
      Route {
        class: ResourceClass::Font,
        matcher: Matcher::Font(config.font_hosts.clone()),
        strategy: Strategy::StaleWhileRevalidate,
        expiration: Expiration::new(30, AgeLimit::days(365)),
        fallback: Fallback::Unavailable,
      },
      Route {
        class: ResourceClass::Image,
        matcher: Matcher::ForeignImage,
        strategy: Strategy::CacheFirst,
        expiration: Expiration::new(60, AgeLimit::days(30)),
        fallback: Fallback::Unavailable,
      },
      Route {
        class: ResourceClass::Static,
        matcher: Matcher::StaticAsset,
        strategy: Strategy::CacheFirst,
        expiration: Expiration::new(60, AgeLimit::days(30)),
        fallback: Fallback::Unavailable,
      },
      Route {
        class: ResourceClass::Dynamic,
        matcher: Matcher::Navigation,
        strategy: network_first,
        expiration: Expiration::new(50, AgeLimit::hours(24)),
        fallback: Fallback::OfflinePage,
      },
    ];

    Ok(Self {
      origin: config.origin_url()?,
      routes,
      default: Self::default_route(),
    })
  }

  /// Route used when nothing more specific matches.
  pub fn default_route() -> Route {
    Route {
      class: ResourceClass::Dynamic,
      matcher: Matcher::Any,
      strategy: Strategy::StaleWhileRevalidate,
      expiration: Expiration::new(50, AgeLimit::hours(24)),
      fallback: Fallback::Unavailable,
    }
  }

  /// Find the route for `request`, or `None` when only the default applies.
  pub fn resolve(&self, request: &Request) -> Option<&Route> {
    self
      .routes
      .iter()
      .find(|route| route.matcher.matches(request, &self.origin))
  }

  /// The route that handles `request`, falling back to the default route.
  pub fn route_for(&self, request: &Request) -> &Route {
    self.resolve(request).unwrap_or(&self.default)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn table() -> RouteTable {
    let config = CacheConfig {
      origin: "https://club.example/".to_string(),
      ..CacheConfig::default()
    };
    RouteTable::standard(&config).unwrap()
  }

  fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
  }

  fn class_of(table: &RouteTable, request: &Request) -> ResourceClass {
    table.route_for(request).class
  }

  #[test]
  fn test_auth_beats_everything() {
    let t = table();
    let request = Request::get(url("https://securetoken.googleapis.com/v1/token"));
    let route = t.resolve(&request).unwrap();
    assert_eq!(route.class, ResourceClass::RemoteAuth);
    assert_eq!(route.fallback, Fallback::OfflineJson("No internet connection"));
  }

  #[test]
  fn test_document_store_is_remote_data() {
    let t = table();
    let request = Request::get(url(
      "https://firestore.googleapis.com/v1/projects/p/databases/(default)/documents/members/M1",
    ));
    let route = t.resolve(&request).unwrap();
    assert_eq!(route.class, ResourceClass::RemoteData);
    assert_eq!(route.expiration.max_entries, 100);
    assert_eq!(route.expiration.max_age, AgeLimit::hours(24));
    assert_eq!(
      route.strategy,
      Strategy::NetworkFirst {
        timeout: Duration::from_secs(3)
      }
    );
  }

  #[test]
  fn test_configured_document_store_url_is_remote_data() {
    let config = CacheConfig {
      origin: "http://localhost:3000/".to_string(),
      document_store_urls: vec!["http://localhost:8080/".to_string()],
      ..CacheConfig::default()
    };
    let t = RouteTable::standard(&config).unwrap();

    let read = Request::get(url("http://localhost:8080/v1/collections/members/documents/M1"));
    let page = Request::navigate(url("http://localhost:3000/members"));

    assert_eq!(class_of(&t, &read), ResourceClass::RemoteData);
    assert_eq!(class_of(&t, &page), ResourceClass::Dynamic);
    assert!(matches!(
      t.route_for(&read).strategy,
      Strategy::NetworkFirst { .. }
    ));
  }

  #[test]
  fn test_api_prefix() {
    let t = table();
    let route = t
      .resolve(&Request::get(url("https://club.example/api/members")))
      .unwrap();
    assert_eq!(route.class, ResourceClass::Api);
    assert_eq!(route.expiration, Expiration::new(50, AgeLimit::hours(1)));
  }

  #[test]
  fn test_static_assets_and_images() {
    let t = table();
    let script =
      Request::get(url("https://club.example/static/js/main.js")).with_destination(Destination::Script);
    let own_image =
      Request::get(url("https://club.example/logo192.png")).with_destination(Destination::Image);
    let foreign_image =
      Request::get(url("https://cdn.example/banner.png")).with_destination(Destination::Image);

    assert_eq!(class_of(&t, &script), ResourceClass::Static);
    assert_eq!(class_of(&t, &own_image), ResourceClass::Static);
    assert_eq!(class_of(&t, &foreign_image), ResourceClass::Image);

    let route = t.resolve(&script).unwrap();
    assert_eq!(route.strategy, Strategy::CacheFirst);
    assert_eq!(route.expiration, Expiration::new(60, AgeLimit::days(30)));
  }

  #[test]
  fn test_fonts_use_stale_while_revalidate() {
    let t = table();
    let route = t
      .resolve(&Request::get(url("https://fonts.googleapis.com/css2?family=Inter")))
      .unwrap();
    assert_eq!(route.class, ResourceClass::Font);
    assert_eq!(route.strategy, Strategy::StaleWhileRevalidate);
    assert_eq!(route.expiration.max_age, AgeLimit::days(365));
  }

  #[test]
  fn test_navigation_falls_back_to_offline_page() {
    let t = table();
    let route = t
      .resolve(&Request::navigate(url("https://club.example/members/M1")))
      .unwrap();
    assert_eq!(route.class, ResourceClass::Dynamic);
    assert_eq!(route.fallback, Fallback::OfflinePage);
  }

  #[test]
  fn test_unmatched_request_uses_default() {
    let t = table();
    let request = Request::get(url("https://club.example/manifest.json"));
    assert!(t.resolve(&request).is_none());

    let default = RouteTable::default_route();
    assert_eq!(default.strategy, Strategy::StaleWhileRevalidate);
    assert_eq!(default.expiration, Expiration::new(50, AgeLimit::hours(24)));
  }

  #[test]
  fn test_namespace_names() {
    assert_eq!(ResourceClass::Static.namespace("v1"), "static-v1");
    assert_eq!(ResourceClass::RemoteData.namespace("v2"), "remote-data-v2");
  }
}
