//! In-memory stand-ins for the network, the remote store and the backup
//! store.

use async_trait::async_trait;
use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::backup::{BackupStore, RowFields, SheetRow};
use crate::cache::{Fetcher, Request, Response};
use crate::remote::{Document, DocumentRef, Fields, Query, RemoteStore};

fn route_key(method: &Method, url: &str) -> String {
  format!("{} {}", method, url)
}

/// Scripted network. Unknown URLs answer 404.
#[derive(Default)]
pub struct FakeNetwork {
  responses: Mutex<HashMap<String, Response>>,
  hits: Mutex<HashMap<String, usize>>,
  hanging: Mutex<HashSet<String>>,
  requests: Mutex<Vec<Request>>,
  offline: AtomicBool,
}

impl FakeNetwork {
  pub fn new() -> Self {
    Self::default()
  }

  /// Answer GET `url` with `response`.
  pub fn respond(&self, url: &str, response: Response) {
    self.respond_to(Method::GET, url, response);
  }

  pub fn respond_to(&self, method: Method, url: &str, response: Response) {
    self
      .responses
      .lock()
      .unwrap()
      .insert(route_key(&method, url), response);
  }

  /// Requests to `url` never complete.
  pub fn hang(&self, url: &str) {
    self.hanging.lock().unwrap().insert(url.to_string());
  }

  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  /// How many requests of any method reached `url`.
  pub fn hits(&self, url: &str) -> usize {
    self.hits.lock().unwrap().get(url).copied().unwrap_or(0)
  }

  pub fn requests(&self) -> Vec<Request> {
    self.requests.lock().unwrap().clone()
  }
}

#[async_trait]
impl Fetcher for FakeNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let url = request.url.as_str().to_string();
    *self.hits.lock().unwrap().entry(url.clone()).or_insert(0) += 1;
    self.requests.lock().unwrap().push(request.clone());

    let hangs = self.hanging.lock().unwrap().contains(&url);
    if hangs {
      std::future::pending::<()>().await;
    }
    if self.offline.load(Ordering::SeqCst) {
      return Err(eyre!("network unreachable"));
    }

    let response = self
      .responses
      .lock()
      .unwrap()
      .get(&route_key(&request.method, &url))
      .cloned();
    Ok(response.unwrap_or_else(|| Response::new(404, "Not Found")))
  }
}

/// Document store keeping everything in memory.
///
/// Creates are keyed by document ID and increments by idempotency key, the
/// same guarantees the real store gives.
#[derive(Default)]
pub struct MemoryRemoteStore {
  documents: Mutex<HashMap<(String, String), Document>>,
  applied_keys: Mutex<HashSet<String>>,
  create_calls: AtomicUsize,
  increment_calls: AtomicUsize,
  fail_creates: AtomicBool,
  fail_increments: AtomicBool,
  create_delay: Mutex<Option<Duration>>,
}

impl MemoryRemoteStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn insert(&self, collection: &str, id: &str, fields: Value) {
    let document = Document {
      id: id.to_string(),
      fields: fields.as_object().cloned().unwrap_or_default(),
      create_time: Some(Utc::now()),
      update_time: None,
    };
    self
      .documents
      .lock()
      .unwrap()
      .insert((collection.to_string(), id.to_string()), document);
  }

  pub fn add_member(&self, id: &str, points: i64) {
    self.insert("members", id, serde_json::json!({ "points": points }));
  }

  pub fn document(&self, collection: &str, id: &str) -> Option<Document> {
    self
      .documents
      .lock()
      .unwrap()
      .get(&(collection.to_string(), id.to_string()))
      .cloned()
  }

  pub fn documents_in(&self, collection: &str) -> Vec<Document> {
    self
      .documents
      .lock()
      .unwrap()
      .iter()
      .filter(|((c, _), _)| c == collection)
      .map(|(_, d)| d.clone())
      .collect()
  }

  pub fn balance(&self, member_id: &str) -> i64 {
    self
      .document("members", member_id)
      .and_then(|d| d.i64_field("points"))
      .unwrap_or(0)
  }

  pub fn create_calls(&self) -> usize {
    self.create_calls.load(Ordering::SeqCst)
  }

  pub fn increment_calls(&self) -> usize {
    self.increment_calls.load(Ordering::SeqCst)
  }

  pub fn fail_creates(&self, fail: bool) {
    self.fail_creates.store(fail, Ordering::SeqCst);
  }

  pub fn fail_increments(&self, fail: bool) {
    self.fail_increments.store(fail, Ordering::SeqCst);
  }

  /// Make every create wait before answering.
  pub fn slow_creates(&self, delay: Duration) {
    *self.create_delay.lock().unwrap() = Some(delay);
  }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
  async fn create_document(
    &self,
    collection: &str,
    document_id: &str,
    fields: &Fields,
  ) -> Result<DocumentRef> {
    self.create_calls.fetch_add(1, Ordering::SeqCst);
    let delay = *self.create_delay.lock().unwrap();
    if let Some(delay) = delay {
      tokio::time::sleep(delay).await;
    }
    if self.fail_creates.load(Ordering::SeqCst) {
      return Err(eyre!("create rejected"));
    }

    let mut documents = self.documents.lock().unwrap();
    let key = (collection.to_string(), document_id.to_string());
    if let Some(existing) = documents.get(&key) {
      return Ok(DocumentRef {
        id: existing.id.clone(),
        create_time: existing.create_time,
        created: false,
      });
    }

    let document = Document {
      id: document_id.to_string(),
      fields: fields.clone(),
      create_time: Some(Utc::now()),
      update_time: None,
    };
    let created = DocumentRef {
      id: document.id.clone(),
      create_time: document.create_time,
      created: true,
    };
    documents.insert(key, document);
    Ok(created)
  }

  async fn get_document(&self, collection: &str, document_id: &str) -> Result<Option<Document>> {
    Ok(self.document(collection, document_id))
  }

  async fn update_fields(&self, collection: &str, document_id: &str, fields: &Fields) -> Result<()> {
    let mut documents = self.documents.lock().unwrap();
    let document = documents
      .get_mut(&(collection.to_string(), document_id.to_string()))
      .ok_or_else(|| eyre!("{}/{} not found", collection, document_id))?;
    for (name, value) in fields {
      document.fields.insert(name.clone(), value.clone());
    }
    document.update_time = Some(Utc::now());
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
    self.increment_calls.fetch_add(1, Ordering::SeqCst);
    if self.fail_increments.load(Ordering::SeqCst) {
      return Err(eyre!("increment rejected"));
    }
    let mut documents = self.documents.lock().unwrap();
    let document = documents
      .get_mut(&(collection.to_string(), document_id.to_string()))
      .ok_or_else(|| eyre!("{}/{} not found", collection, document_id))?;
    if !self
      .applied_keys
      .lock()
      .unwrap()
      .insert(idempotency_key.to_string())
    {
      return Ok(());
    }

    let current = document.i64_field(field).unwrap_or(0);
    document
      .fields
      .insert(field.to_string(), Value::from(current + delta));
    Ok(())
  }

  async fn query(&self, collection: &str, query: &Query) -> Result<Vec<Document>> {
    let mut found: Vec<Document> = self
      .documents_in(collection)
      .into_iter()
      .filter(|d| d.fields.get(&query.field) == Some(&query.value))
      .collect();
    found.sort_by(|a, b| a.id.cmp(&b.id));
    if let Some(limit) = query.limit {
      found.truncate(limit);
    }
    Ok(found)
  }
}

/// Spreadsheet kept in memory: one header row plus data rows per sheet.
#[derive(Default)]
pub struct MemoryBackupStore {
  sheets: Mutex<HashMap<String, (Vec<String>, Vec<SheetRow>)>>,
  failing: AtomicBool,
}

impl MemoryBackupStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn set_failing(&self, failing: bool) {
    self.failing.store(failing, Ordering::SeqCst);
  }

  pub fn rows(&self, sheet: &str) -> Vec<SheetRow> {
    self
      .sheets
      .lock()
      .unwrap()
      .get(sheet)
      .map(|(_, rows)| rows.clone())
      .unwrap_or_default()
  }

  pub fn headers(&self, sheet: &str) -> Vec<String> {
    self
      .sheets
      .lock()
      .unwrap()
      .get(sheet)
      .map(|(headers, _)| headers.clone())
      .unwrap_or_default()
  }

  fn check(&self) -> Result<()> {
    if self.failing.load(Ordering::SeqCst) {
      Err(eyre!("backup store unavailable"))
    } else {
      Ok(())
    }
  }
}

#[async_trait]
impl BackupStore for MemoryBackupStore {
  async fn ensure_sheet(&self, sheet: &str, headers: &[String]) -> Result<()> {
    self.check()?;
    self
      .sheets
      .lock()
      .unwrap()
      .entry(sheet.to_string())
      .or_insert_with(|| (headers.to_vec(), Vec::new()));
    Ok(())
  }

  async fn list_rows(&self, sheet: &str) -> Result<Vec<SheetRow>> {
    self.check()?;
    Ok(self.rows(sheet))
  }

  async fn append_row(&self, sheet: &str, values: &RowFields) -> Result<()> {
    self.check()?;
    let mut sheets = self.sheets.lock().unwrap();
    let (_, rows) = sheets
      .get_mut(sheet)
      .ok_or_else(|| eyre!("sheet {} missing", sheet))?;
    let row_number = rows.len() as u32 + 2;
    rows.push(SheetRow {
      row_number,
      values: values.iter().cloned().collect(),
    });
    Ok(())
  }

  async fn update_row(&self, sheet: &str, row_number: u32, values: &RowFields) -> Result<()> {
    self.check()?;
    let mut sheets = self.sheets.lock().unwrap();
    let row = sheets
      .get_mut(sheet)
      .and_then(|(_, rows)| rows.iter_mut().find(|r| r.row_number == row_number))
      .ok_or_else(|| eyre!("row {} of {} missing", row_number, sheet))?;
    for (name, value) in values {
      row.values.insert(name.clone(), value.clone());
    }
    Ok(())
  }
}
