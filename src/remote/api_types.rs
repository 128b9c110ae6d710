//! Request and response bodies of the document store REST API.

use serde::{Deserialize, Serialize};

use super::types::{Document, Fields};

#[derive(Debug, Serialize)]
pub struct ApiWriteBody<'a> {
  pub fields: &'a Fields,
}

#[derive(Debug, Serialize)]
pub struct ApiIncrementBody<'a> {
  pub field: &'a str,
  pub delta: i64,
}

#[derive(Debug, Deserialize)]
pub struct ApiDocumentList {
  #[serde(default)]
  pub documents: Vec<Document>,
}
