//! Request and response values passed through the cache engine.

use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

/// What the requester intends to do with the response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Destination {
  #[default]
  Empty,
  Document,
  Script,
  Style,
  Image,
  Font,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RequestMode {
  /// Full page load
  Navigate,
  #[default]
  Cors,
  SameOrigin,
  NoCors,
}

/// An outgoing network request.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub destination: Destination,
  pub mode: RequestMode,
  pub headers: Vec<(String, String)>,
  pub body: Option<Vec<u8>>,
}

impl Request {
  pub fn new(method: Method, url: Url) -> Self {
    Self {
      method,
      url,
      destination: Destination::Empty,
      mode: RequestMode::Cors,
      headers: Vec::new(),
      body: None,
    }
  }

  pub fn get(url: Url) -> Self {
    Self::new(Method::GET, url)
  }

  /// A full page load of `url`.
  pub fn navigate(url: Url) -> Self {
    Self {
      destination: Destination::Document,
      mode: RequestMode::Navigate,
      ..Self::get(url)
    }
  }

  pub fn with_destination(mut self, destination: Destination) -> Self {
    self.destination = destination;
    self
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_string(), value.to_string()));
    self
  }

  /// Attach a JSON body and the matching content type.
  pub fn with_json<T: Serialize>(mut self, body: &T) -> Result<Self> {
    let data = serde_json::to_vec(body).map_err(|e| eyre!("Failed to encode request body: {}", e))?;
    self.body = Some(data);
    Ok(self.with_header("content-type", "application/json"))
  }

  /// Stable identity of this request inside a cache namespace (URL + method).
  pub fn cache_key(&self) -> String {
    let input = format!("{} {}", self.method, self.url);

    // SHA256 hash for stable, fixed-length keys
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
  }
}

/// A network or cached response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: Vec::new(),
      body: body.into(),
    }
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_string(), value.to_string()));
    self
  }

  /// JSON body with the matching content type.
  pub fn json_body<T: Serialize>(status: u16, body: &T) -> Self {
    // Serializing a plain value into memory cannot fail for the types we use
    let data = serde_json::to_vec(body).unwrap_or_default();
    Self::new(status, data).with_header("content-type", "application/json")
  }

  /// Structured "you are offline" payload returned by network-first routes.
  pub fn offline_json(error: &str) -> Self {
    Self::json_body(
      503,
      &serde_json::json!({
        "isOffline": true,
        "error": error,
      }),
    )
  }

  /// Hard failure for requests nothing else could answer.
  pub fn service_unavailable() -> Self {
    Self::new(503, "Offline").with_header("content-type", "text/plain")
  }

  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Only complete 200 responses are worth keeping.
  pub fn is_cacheable(&self) -> bool {
    self.status == 200
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
    serde_json::from_slice(&self.body).map_err(|e| eyre!("Failed to decode response body: {}", e))
  }

  pub fn text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }

  /// True for the structured offline payload produced by [`Response::offline_json`].
  pub fn is_offline_payload(&self) -> bool {
    self.status == 503
      && self
        .json::<serde_json::Value>()
        .map(|v| v["isOffline"] == serde_json::Value::Bool(true))
        .unwrap_or(false)
  }
}
