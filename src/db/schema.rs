/// Schema for the local write outbox.
pub const OUTBOX_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS outbox (
    local_id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL,
    member_id TEXT NOT NULL,
    payload BLOB NOT NULL,
    idempotency_key TEXT NOT NULL UNIQUE,
    created_at_ms INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    remote_id TEXT,
    synced_at_ms INTEGER,
    CHECK ((status = 'synced') = (remote_id IS NOT NULL))
);

CREATE INDEX IF NOT EXISTS idx_outbox_pending
    ON outbox(kind, status, created_at_ms, local_id);

CREATE INDEX IF NOT EXISTS idx_outbox_member ON outbox(member_id);

-- Drain lease shared by every process using this file; at most one row
CREATE TABLE IF NOT EXISTS sync_lease (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    owner TEXT NOT NULL,
    expires_at_ms INTEGER NOT NULL
);
"#;

/// Schema for the versioned response cache.
pub const CACHE_SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- One row per cache namespace, e.g. "static-v1"
CREATE TABLE IF NOT EXISTS cache_namespaces (
    name TEXT PRIMARY KEY,
    resource_class TEXT NOT NULL,
    version TEXT NOT NULL,
    created_at_ms INTEGER NOT NULL
);

-- Stored responses, keyed by request identity within a namespace
CREATE TABLE IF NOT EXISTS cache_entries (
    namespace TEXT NOT NULL,
    request_key TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    stored_at_ms INTEGER NOT NULL,
    PRIMARY KEY (namespace, request_key),
    FOREIGN KEY (namespace) REFERENCES cache_namespaces(name) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_age
    ON cache_entries(namespace, stored_at_ms);
"#;
