use async_trait::async_trait;
use color_eyre::Result;
use serde_json::Value;
use std::sync::Arc;

use super::types::{Document, DocumentRef, Fields};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
  Ascending,
  Descending,
}

impl Direction {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Ascending => "asc",
      Self::Descending => "desc",
    }
  }
}

/// Equality filter over one collection, optionally ordered and limited.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
  pub field: String,
  pub value: Value,
  pub order_by: Option<(String, Direction)>,
  pub limit: Option<usize>,
}

impl Query {
  pub fn field_equals(field: &str, value: impl Into<Value>) -> Self {
    Self {
      field: field.to_string(),
      value: value.into(),
      order_by: None,
      limit: None,
    }
  }

  pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
    self.order_by = Some((field.to_string(), direction));
    self
  }

  pub fn limit(mut self, limit: usize) -> Self {
    self.limit = Some(limit);
    self
  }
}

/// The authoritative document store.
#[async_trait]
pub trait RemoteStore: Send + Sync {
  /// Create `document_id` in `collection`. If the document already exists it
  /// is left untouched and returned with `created == false`.
  async fn create_document(
    &self,
    collection: &str,
    document_id: &str,
    fields: &Fields,
  ) -> Result<DocumentRef>;

  async fn get_document(&self, collection: &str, document_id: &str) -> Result<Option<Document>>;

  /// Merge `fields` into an existing document.
  async fn update_fields(&self, collection: &str, document_id: &str, fields: &Fields) -> Result<()>;

  /// Atomically add `delta` to a numeric field. The store applies each
  /// `idempotency_key` at most once.
  async fn increment(
    &self,
    collection: &str,
    document_id: &str,
    field: &str,
    delta: i64,
    idempotency_key: &str,
  ) -> Result<()>;

  async fn query(&self, collection: &str, query: &Query) -> Result<Vec<Document>>;
}

#[async_trait]
impl<T: RemoteStore + ?Sized> RemoteStore for Arc<T> {
  async fn create_document(
    &self,
    collection: &str,
    document_id: &str,
    fields: &Fields,
  ) -> Result<DocumentRef> {
    (**self).create_document(collection, document_id, fields).await
  }

  async fn get_document(&self, collection: &str, document_id: &str) -> Result<Option<Document>> {
    (**self).get_document(collection, document_id).await
  }

  async fn update_fields(&self, collection: &str, document_id: &str, fields: &Fields) -> Result<()> {
    (**self).update_fields(collection, document_id, fields).await
  }

  async fn increment(
    &self,
    collection: &str,
    document_id: &str,
    field: &str,
    delta: i64,
    idempotency_key: &str,
  ) -> Result<()> {
    (**self)
      .increment(collection, document_id, field, delta, idempotency_key)
      .await
  }

  async fn query(&self, collection: &str, query: &Query) -> Result<Vec<Document>> {
    (**self).query(collection, query).await
  }
}
