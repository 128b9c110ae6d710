use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use tracing::debug;
use url::Url;

use super::api_types::{ApiDocumentList, ApiIncrementBody, ApiWriteBody};
use super::store::{Query, RemoteStore};
use super::types::{Document, DocumentRef, Fields};
use crate::cache::{Fetcher, Request, Response};
use crate::config::{Config, RemoteConfig};

/// Document store client speaking JSON over any [`Fetcher`].
///
/// Layered over the cache engine, reads get the remote-data caching policy
/// and writes pass straight through.
pub struct HttpRemoteStore<F: Fetcher> {
  fetcher: F,
  base_url: Url,
  token: Option<String>,
}

impl<F: Fetcher> HttpRemoteStore<F> {
  pub fn new(config: &RemoteConfig, fetcher: F) -> Result<Self> {
    let base_url = Url::parse(&config.base_url)
      .map_err(|e| eyre!("Invalid remote base URL '{}': {}", config.base_url, e))?;

    Ok(Self {
      fetcher,
      base_url,
      token: Config::remote_token(),
    })
  }

  pub fn with_token(mut self, token: Option<String>) -> Self {
    self.token = token;
    self
  }

  /// `<base>/v1/collections/<segments...>`
  fn url(&self, segments: &[&str]) -> Result<Url> {
    let mut url = self.base_url.clone();
    {
      let mut path = url
        .path_segments_mut()
        .map_err(|_| eyre!("Remote base URL cannot have a path: {}", self.base_url))?;
      path
        .pop_if_empty()
        .push("v1")
        .push("collections")
        .extend(segments);
    }
    Ok(url)
  }

  fn request(&self, method: Method, url: Url) -> Request {
    let request = Request::new(method, url).with_header("accept", "application/json");
    match &self.token {
      Some(token) => request.with_header("authorization", &format!("Bearer {}", token)),
      None => request,
    }
  }

  async fn send(&self, request: Request, action: &str) -> Result<Response> {
    debug!(method = %request.method, url = %request.url, "Remote store request");
    self
      .fetcher
      .fetch(&request)
      .await
      .map_err(|e| eyre!("Failed to {}: {}", action, e))
  }
}

/// Turn anything but a 2xx into an error, naming the offline case.
fn expect_success(response: Response, action: &str) -> Result<Response> {
  if response.is_success() {
    Ok(response)
  } else if response.is_offline_payload() {
    Err(eyre!("Failed to {}: remote store unreachable", action))
  } else {
    Err(eyre!(
      "Failed to {}: HTTP {} {}",
      action,
      response.status,
      response.text()
    ))
  }
}

#[async_trait]
impl<F: Fetcher> RemoteStore for HttpRemoteStore<F> {
  async fn create_document(
    &self,
    collection: &str,
    document_id: &str,
    fields: &Fields,
  ) -> Result<DocumentRef> {
    let action = format!("create {}/{}", collection, document_id);
    let mut url = self.url(&[collection, "documents"])?;
    url.query_pairs_mut().append_pair("documentId", document_id);

    let request = self
      .request(Method::POST, url)
      .with_header("idempotency-key", document_id)
      .with_json(&ApiWriteBody { fields })?;
    let response = self.send(request, &action).await?;

    if response.status == 409 {
      // Already created by an earlier attempt
      let existing = self
        .get_document(collection, document_id)
        .await?
        .ok_or_else(|| eyre!("Failed to {}: conflict but document is missing", action))?;
      return Ok(DocumentRef {
        id: existing.id,
        create_time: existing.create_time,
        created: false,
      });
    }

    let created = response.status == 201;
    let document: Document = expect_success(response, &action)?.json()?;
    Ok(DocumentRef {
      id: document.id,
      create_time: document.create_time,
      created,
    })
  }

  async fn get_document(&self, collection: &str, document_id: &str) -> Result<Option<Document>> {
    let action = format!("read {}/{}", collection, document_id);
    let url = self.url(&[collection, "documents", document_id])?;
    let response = self.send(self.request(Method::GET, url), &action).await?;

    if response.status == 404 {
      return Ok(None);
    }
    Ok(Some(expect_success(response, &action)?.json()?))
  }

  async fn update_fields(&self, collection: &str, document_id: &str, fields: &Fields) -> Result<()> {
    let action = format!("update {}/{}", collection, document_id);
    let url = self.url(&[collection, "documents", document_id])?;
    let request = self
      .request(Method::PATCH, url)
      .with_json(&ApiWriteBody { fields })?;

    expect_success(self.send(request, &action).await?, &action)?;
    Ok(())
  }

  async fn increment(
    &self,
    collection: &str,
    document_id: &str,
    field: &str,
    delta: i64,
    idempotency_key: &str,
  ) -> Result<()> {
    let action = format!("increment {}/{}.{}", collection, document_id, field);
    let target = format!("{}:increment", document_id);
    let url = self.url(&[collection, "documents", &target])?;
    let request = self
      .request(Method::POST, url)
      .with_header("idempotency-key", idempotency_key)
      .with_json(&ApiIncrementBody { field, delta })?;

    expect_success(self.send(request, &action).await?, &action)?;
    Ok(())
  }

  async fn query(&self, collection: &str, query: &Query) -> Result<Vec<Document>> {
    let action = format!("query {}", collection);
    let mut url = self.url(&[collection, "documents"])?;
    {
      let mut pairs = url.query_pairs_mut();
      pairs
        .append_pair("where.field", &query.field)
        .append_pair("where.value", &query.value.to_string());
      if let Some((field, direction)) = &query.order_by {
        pairs
          .append_pair("orderBy", field)
          .append_pair("direction", direction.as_str());
      }
      if let Some(limit) = query.limit {
        pairs.append_pair("limit", &limit.to_string());
      }
    }

    let response = self.send(self.request(Method::GET, url), &action).await?;
    let list: ApiDocumentList = expect_success(response, &action)?.json()?;
    Ok(list.documents)
  }
}
