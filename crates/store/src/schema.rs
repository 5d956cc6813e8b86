//! Table definitions and schema versioning
//!
//! Primary keys are RFC-4122 v4 identifiers stored as text. Structured
//! attributes (headers, auth, variables, file shas, settings documents)
//! are JSON-valued text columns; the repositories decode them into typed
//! shapes at the boundary.

pub const SCHEMA_VERSION: u32 = 1;

pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version          INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS workspaces (
    id               TEXT PRIMARY KEY,
    name             TEXT    NOT NULL,
    sort_order       INTEGER NOT NULL DEFAULT 0,
    settings         TEXT    NOT NULL DEFAULT '{}',   -- JSON document
    created_at       TEXT    NOT NULL,
    updated_at       TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS collections (
    id                     TEXT PRIMARY KEY,
    workspace_id           TEXT REFERENCES workspaces(id) ON DELETE CASCADE,
    name                   TEXT    NOT NULL,
    description            TEXT,
    sort_order             INTEGER NOT NULL DEFAULT 0,
    sync_enabled           INTEGER NOT NULL DEFAULT 0,
    is_dirty               INTEGER NOT NULL DEFAULT 0,
    remote_sha             TEXT,
    remote_synced_at       TEXT,
    variables              TEXT    NOT NULL DEFAULT '{}',  -- JSON name -> value
    environment_ids        TEXT    NOT NULL DEFAULT '[]',  -- JSON array of ids
    default_environment_id TEXT,
    file_shas              TEXT    NOT NULL DEFAULT '{}',  -- JSON path -> sync state
    created_at             TEXT    NOT NULL,
    updated_at             TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS folders (
    id                     TEXT PRIMARY KEY,
    collection_id          TEXT    NOT NULL REFERENCES collections(id) ON DELETE CASCADE,
    parent_id              TEXT    REFERENCES folders(id) ON DELETE CASCADE,
    name                   TEXT    NOT NULL,
    sort_order             INTEGER NOT NULL DEFAULT 0,
    environment_ids        TEXT    NOT NULL DEFAULT '[]',
    default_environment_id TEXT,
    created_at             TEXT    NOT NULL,
    updated_at             TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS requests (
    id               TEXT PRIMARY KEY,
    collection_id    TEXT    NOT NULL REFERENCES collections(id) ON DELETE CASCADE,
    folder_id        TEXT    REFERENCES folders(id) ON DELETE SET NULL,
    name             TEXT    NOT NULL,
    method           TEXT    NOT NULL DEFAULT 'GET',
    url              TEXT    NOT NULL DEFAULT '',
    headers          TEXT    NOT NULL DEFAULT '[]',   -- JSON key/value rows
    query_params     TEXT    NOT NULL DEFAULT '[]',
    body             TEXT,
    body_type        TEXT    NOT NULL DEFAULT 'none',
    auth             TEXT    NOT NULL DEFAULT '{"type":"none"}',
    scripts          TEXT    NOT NULL DEFAULT '{}',
    sort_order       INTEGER NOT NULL DEFAULT 0,
    created_at       TEXT    NOT NULL,
    updated_at       TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS environments (
    id               TEXT PRIMARY KEY,
    workspace_id     TEXT    NOT NULL REFERENCES workspaces(id) ON DELETE CASCADE,
    name             TEXT    NOT NULL,
    is_active        INTEGER NOT NULL DEFAULT 0,
    sort_order       INTEGER NOT NULL DEFAULT 0,
    variables        TEXT    NOT NULL DEFAULT '[]',   -- JSON variable rows
    vault_synced     INTEGER NOT NULL DEFAULT 0,
    vault_path       TEXT,
    created_at       TEXT    NOT NULL,
    updated_at       TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS request_histories (
    id               TEXT PRIMARY KEY,
    request_id       TEXT    NOT NULL REFERENCES requests(id) ON DELETE CASCADE,
    method           TEXT    NOT NULL,
    url              TEXT    NOT NULL,
    status           INTEGER NOT NULL,
    request_headers  TEXT    NOT NULL DEFAULT '[]',
    response_headers TEXT    NOT NULL DEFAULT '[]',
    request_body     TEXT,
    response_body    TEXT,
    duration_ms      INTEGER NOT NULL DEFAULT 0,
    executed_at      TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS settings (
    key              TEXT PRIMARY KEY,
    value            TEXT    NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_collections_workspace ON collections(workspace_id);
CREATE INDEX IF NOT EXISTS idx_folders_collection    ON folders(collection_id);
CREATE INDEX IF NOT EXISTS idx_folders_parent        ON folders(parent_id);
CREATE INDEX IF NOT EXISTS idx_requests_collection   ON requests(collection_id);
CREATE INDEX IF NOT EXISTS idx_requests_folder       ON requests(folder_id);
CREATE INDEX IF NOT EXISTS idx_environments_workspace ON environments(workspace_id);
CREATE INDEX IF NOT EXISTS idx_histories_request     ON request_histories(request_id);
CREATE INDEX IF NOT EXISTS idx_histories_executed_at ON request_histories(executed_at);
"#;
