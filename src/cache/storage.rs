//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension};
use std::path::Path;

use super::request::{Request, Response};
use super::routes::{Expiration, ResourceClass};
use crate::db::schema::CACHE_SCHEMA;
use crate::db::Database;

/// A single cached response.
#[derive(Debug, Clone)]
pub struct StoredResponse {
  /// The cached response
  pub response: Response,
  /// When the response was stored
  pub stored_at: DateTime<Utc>,
}

/// A cache namespace as recorded in storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceInfo {
  pub name: String,
  pub resource_class: String,
  pub version: String,
}

/// Trait for cache storage backends.
pub trait CacheStorage: Send + Sync {
  /// Register a namespace if it does not exist yet.
  fn ensure_namespace(&self, namespace: &str, class: ResourceClass, version: &str) -> Result<()>;

  /// Get a stored response by request key.
  fn get(&self, namespace: &str, request_key: &str) -> Result<Option<StoredResponse>>;

  /// Store (or replace) the response for a request.
  fn put(&self, namespace: &str, request: &Request, response: &Response) -> Result<()>;

  /// Store several responses atomically: either all are written or none.
  fn put_all(&self, namespace: &str, entries: &[(Request, Response)]) -> Result<()>;

  /// Remove a single entry.
  fn delete(&self, namespace: &str, request_key: &str) -> Result<()>;

  /// Drop entries past `max_age`, then the oldest entries beyond
  /// `max_entries`. Returns how many were removed.
  fn evict(&self, namespace: &str, expiration: &Expiration) -> Result<usize>;

  /// All namespaces currently stored.
  fn namespaces(&self) -> Result<Vec<NamespaceInfo>>;

  /// Delete a namespace and every entry in it.
  fn delete_namespace(&self, namespace: &str) -> Result<()>;

  /// URLs stored in a namespace, oldest first.
  fn entry_urls(&self, namespace: &str) -> Result<Vec<String>>;
}

/// Storage implementation that doesn't cache anything.
/// Used when caching is disabled - all operations are no-ops.
pub struct NoopStorage;

impl CacheStorage for NoopStorage {
  fn ensure_namespace(&self, _namespace: &str, _class: ResourceClass, _version: &str) -> Result<()> {
    Ok(())
  }

  fn get(&self, _namespace: &str, _request_key: &str) -> Result<Option<StoredResponse>> {
    Ok(None) // Always miss
  }

  fn put(&self, _namespace: &str, _request: &Request, _response: &Response) -> Result<()> {
    Ok(()) // Discard
  }

  fn put_all(&self, _namespace: &str, _entries: &[(Request, Response)]) -> Result<()> {
    Ok(()) // Discard
  }

  fn delete(&self, _namespace: &str, _request_key: &str) -> Result<()> {
    Ok(())
  }

  fn evict(&self, _namespace: &str, _expiration: &Expiration) -> Result<usize> {
    Ok(0)
  }

  fn namespaces(&self) -> Result<Vec<NamespaceInfo>> {
    Ok(Vec::new())
  }

  fn delete_namespace(&self, _namespace: &str) -> Result<()> {
    Ok(())
  }

  fn entry_urls(&self, _namespace: &str) -> Result<Vec<String>> {
    Ok(Vec::new())
  }
}

/// Lets the application pick the backend at runtime.
impl CacheStorage for Box<dyn CacheStorage> {
  fn ensure_namespace(&self, namespace: &str, class: ResourceClass, version: &str) -> Result<()> {
    (**self).ensure_namespace(namespace, class, version)
  }

  fn get(&self, namespace: &str, request_key: &str) -> Result<Option<StoredResponse>> {
    (**self).get(namespace, request_key)
  }

  fn put(&self, namespace: &str, request: &Request, response: &Response) -> Result<()> {
    (**self).put(namespace, request, response)
  }

  fn put_all(&self, namespace: &str, entries: &[(Request, Response)]) -> Result<()> {
    (**self).put_all(namespace, entries)
  }

  fn delete(&self, namespace: &str, request_key: &str) -> Result<()> {
    (**self).delete(namespace, request_key)
  }

  fn evict(&self, namespace: &str, expiration: &Expiration) -> Result<usize> {
    (**self).evict(namespace, expiration)
  }

  fn namespaces(&self) -> Result<Vec<NamespaceInfo>> {
    (**self).namespaces()
  }

  fn delete_namespace(&self, namespace: &str) -> Result<()> {
    (**self).delete_namespace(namespace)
  }

  fn entry_urls(&self, namespace: &str) -> Result<Vec<String>> {
    (**self).entry_urls(namespace)
  }
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  db: Database,
}

impl SqliteStorage {
  /// Create a new SQLite storage at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    let db = Database::open(path, CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;
    Ok(Self { db })
  }

  pub fn open_in_memory() -> Result<Self> {
    Ok(Self {
      db: Database::open_in_memory(CACHE_SCHEMA)?,
    })
  }

  /// Rewrite when an entry was stored.
  #[cfg(test)]
  pub(crate) fn set_stored_at(&self, namespace: &str, request_key: &str, stored_at: DateTime<Utc>) {
    self
      .db
      .lock()
      .unwrap()
      .execute(
        "UPDATE cache_entries SET stored_at_ms = ? WHERE namespace = ? AND request_key = ?",
        params![stored_at.timestamp_millis(), namespace, request_key],
      )
      .unwrap();
  }
}

/// Insert or replace one entry using an already-locked connection.
fn insert_entry(
  conn: &rusqlite::Connection,
  namespace: &str,
  request: &Request,
  response: &Response,
) -> Result<()> {
  let headers = serde_json::to_string(&response.headers)
    .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

  conn
    .execute(
      "INSERT OR REPLACE INTO cache_entries
         (namespace, request_key, method, url, status, headers, body, stored_at_ms)
       VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
      params![
        namespace,
        request.cache_key(),
        request.method.as_str(),
        request.url.as_str(),
        response.status,
        headers,
        response.body,
        Utc::now().timestamp_millis()
      ],
    )
    .map_err(|e| eyre!("Failed to store cache entry: {}", e))?;

  Ok(())
}

impl CacheStorage for SqliteStorage {
  fn ensure_namespace(&self, namespace: &str, class: ResourceClass, version: &str) -> Result<()> {
    let conn = self.db.lock()?;

    conn
      .execute(
        "INSERT OR IGNORE INTO cache_namespaces (name, resource_class, version, created_at_ms)
         VALUES (?, ?, ?, ?)",
        params![namespace, class.as_str(), version, Utc::now().timestamp_millis()],
      )
      .map_err(|e| eyre!("Failed to register cache namespace: {}", e))?;

    Ok(())
  }

  fn get(&self, namespace: &str, request_key: &str) -> Result<Option<StoredResponse>> {
    let conn = self.db.lock()?;

    let result: Option<(u16, String, Vec<u8>, i64)> = conn
      .query_row(
        "SELECT status, headers, body, stored_at_ms FROM cache_entries
         WHERE namespace = ? AND request_key = ?",
        params![namespace, request_key],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read cache entry: {}", e))?;

    match result {
      Some((status, headers, body, stored_at_ms)) => {
        let headers: Vec<(String, String)> = serde_json::from_str(&headers)
          .map_err(|e| eyre!("Failed to deserialize headers: {}", e))?;
        let stored_at = DateTime::from_timestamp_millis(stored_at_ms)
          .ok_or_else(|| eyre!("Invalid cache timestamp {}", stored_at_ms))?;
        Ok(Some(StoredResponse {
          response: Response {
            status,
            headers,
            body,
          },
          stored_at,
        }))
      }
      None => Ok(None),
    }
  }

  fn put(&self, namespace: &str, request: &Request, response: &Response) -> Result<()> {
    let conn = self.db.lock()?;
    insert_entry(&conn, namespace, request, response)
  }

  fn put_all(&self, namespace: &str, entries: &[(Request, Response)]) -> Result<()> {
    let conn = self.db.lock()?;

    // Start transaction
    conn
      .execute("BEGIN TRANSACTION", [])
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    for (request, response) in entries {
      if let Err(e) = insert_entry(&conn, namespace, request, response) {
        let _ = conn.execute("ROLLBACK", []);
        return Err(e);
      }
    }

    conn
      .execute("COMMIT", [])
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn delete(&self, namespace: &str, request_key: &str) -> Result<()> {
    let conn = self.db.lock()?;

    conn
      .execute(
        "DELETE FROM cache_entries WHERE namespace = ? AND request_key = ?",
        params![namespace, request_key],
      )
      .map_err(|e| eyre!("Failed to delete cache entry: {}", e))?;

    Ok(())
  }

  fn evict(&self, namespace: &str, expiration: &Expiration) -> Result<usize> {
    let conn = self.db.lock()?;
    let cutoff = (Utc::now() - expiration.max_age).timestamp_millis();

    let expired = conn
      .execute(
        "DELETE FROM cache_entries WHERE namespace = ? AND stored_at_ms < ?",
        params![namespace, cutoff],
      )
      .map_err(|e| eyre!("Failed to expire cache entries: {}", e))?;

    // Keep the newest `max_entries`; rowid breaks ties within one millisecond
    let overflow = conn
      .execute(
        "DELETE FROM cache_entries WHERE namespace = ?1 AND rowid IN (
           SELECT rowid FROM cache_entries WHERE namespace = ?1
           ORDER BY stored_at_ms DESC, rowid DESC
           LIMIT -1 OFFSET ?2
         )",
        params![namespace, expiration.max_entries],
      )
      .map_err(|e| eyre!("Failed to evict cache entries: {}", e))?;

    Ok(expired + overflow)
  }

  fn namespaces(&self) -> Result<Vec<NamespaceInfo>> {
    let conn = self.db.lock()?;

    let mut stmt = conn
      .prepare("SELECT name, resource_class, version FROM cache_namespaces ORDER BY name")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let namespaces = stmt
      .query_map([], |row| {
        Ok(NamespaceInfo {
          name: row.get(0)?,
          resource_class: row.get(1)?,
          version: row.get(2)?,
        })
      })
      .map_err(|e| eyre!("Failed to query namespaces: {}", e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read namespace: {}", e))?;

    Ok(namespaces)
  }

  fn delete_namespace(&self, namespace: &str) -> Result<()> {
    let conn = self.db.lock()?;

    // Entries go with the namespace through ON DELETE CASCADE
    conn
      .execute(
        "DELETE FROM cache_namespaces WHERE name = ?",
        params![namespace],
      )
      .map_err(|e| eyre!("Failed to delete namespace {}: {}", namespace, e))?;

    Ok(())
  }

  fn entry_urls(&self, namespace: &str) -> Result<Vec<String>> {
    let conn = self.db.lock()?;

    let mut stmt = conn
      .prepare(
        "SELECT url FROM cache_entries WHERE namespace = ?
         ORDER BY stored_at_ms, rowid",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let urls = stmt
      .query_map(params![namespace], |row| row.get(0))
      .map_err(|e| eyre!("Failed to query entries: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read entry: {}", e))?;

    Ok(urls)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::Duration;
  use url::Url;

  fn request(path: &str) -> Request {
    Request::get(Url::parse(&format!("https://club.example{}", path)).unwrap())
  }

  fn storage_with_namespace(name: &str) -> SqliteStorage {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage
      .ensure_namespace(name, ResourceClass::Static, "v1")
      .unwrap();
    storage
  }

  #[test]
  fn test_put_then_get() {
    let storage = storage_with_namespace("static-v1");
    let req = request("/app.js");
    let response = Response::new(200, "console.log(1)").with_header("content-type", "text/javascript");

    storage.put("static-v1", &req, &response).unwrap();
    let stored = storage.get("static-v1", &req.cache_key()).unwrap().unwrap();

    assert_eq!(stored.response, response);
    assert!(Utc::now() - stored.stored_at < Duration::minutes(1));
    assert!(storage.get("static-v1", &request("/other.js").cache_key()).unwrap().is_none());
  }

  #[test]
  fn test_evict_keeps_newest_entries() {
    let storage = storage_with_namespace("static-v1");
    for i in 0..5 {
      storage
        .put("static-v1", &request(&format!("/{}.js", i)), &Response::new(200, "x"))
        .unwrap();
    }

    let removed = storage
      .evict("static-v1", &Expiration::new(3, Duration::days(1)))
      .unwrap();

    assert_eq!(removed, 2);
    let urls = storage.entry_urls("static-v1").unwrap();
    assert_eq!(
      urls,
      vec![
        "https://club.example/2.js",
        "https://club.example/3.js",
        "https://club.example/4.js"
      ]
    );
  }

  #[test]
  fn test_evict_drops_expired_entries() {
    let storage = storage_with_namespace("static-v1");
    storage
      .put("static-v1", &request("/a.js"), &Response::new(200, "x"))
      .unwrap();

    // Negative max age: everything is already past it
    let removed = storage
      .evict("static-v1", &Expiration::new(10, Duration::seconds(-1)))
      .unwrap();

    assert_eq!(removed, 1);
    assert!(storage.entry_urls("static-v1").unwrap().is_empty());
  }

  #[test]
  fn test_delete_namespace_removes_entries() {
    let storage = storage_with_namespace("static-v1");
    storage
      .ensure_namespace("static-v2", ResourceClass::Static, "v2")
      .unwrap();
    storage
      .put("static-v1", &request("/a.js"), &Response::new(200, "x"))
      .unwrap();

    storage.delete_namespace("static-v1").unwrap();

    let names: Vec<String> = storage.namespaces().unwrap().into_iter().map(|n| n.name).collect();
    assert_eq!(names, vec!["static-v2"]);
    assert!(storage.entry_urls("static-v1").unwrap().is_empty());
  }

  #[test]
  fn test_put_all_writes_every_entry() {
    let storage = storage_with_namespace("static-v1");
    let entries = vec![
      (request("/"), Response::new(200, "<html>")),
      (request("/offline.html"), Response::new(200, "offline")),
    ];

    storage.put_all("static-v1", &entries).unwrap();

    assert_eq!(storage.entry_urls("static-v1").unwrap().len(), 2);
  }

  #[test]
  fn test_put_into_unknown_namespace_fails() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let result = storage.put("ghost-v1", &request("/a.js"), &Response::new(200, "x"));
    assert!(result.is_err());
  }
}
