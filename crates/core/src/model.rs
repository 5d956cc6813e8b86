//! Domain entities
//!
//! Ownership: a workspace owns collections and environments; a collection
//! owns folders and requests; a request owns its history rows. Timestamps
//! are set by the store, never by callers.

use crate::scripts::ScriptsConfig;
use crate::types::{AuthConfig, BodyType, FileSha, HttpMethod, KeyValueEntry, Variable};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Top-level scope; contains collections and environments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workspace {
    pub id: Uuid,
    pub name: String,
    pub sort_order: i64,
    /// Nested settings document; sensitive leaves are encrypted at rest.
    pub settings: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Group of requests; also the unit of remote sync
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    pub id: Uuid,
    pub workspace_id: Option<Uuid>,
    pub name: String,
    pub description: Option<String>,
    pub sort_order: i64,
    pub sync_enabled: bool,
    /// Set on any request/folder mutation while sync is enabled.
    pub is_dirty: bool,
    /// Opaque remote blob id of the collection root as of the last sync.
    pub remote_sha: Option<String>,
    pub remote_synced_at: Option<DateTime<Utc>>,
    /// Collection-level variable overlay; overrides environment variables.
    pub variables: BTreeMap<String, String>,
    pub environment_ids: Vec<Uuid>,
    pub default_environment_id: Option<Uuid>,
    /// Relative file path -> sync state from the last successful sync.
    pub file_shas: BTreeMap<String, FileSha>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Hierarchical grouping inside a collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Folder {
    pub id: Uuid,
    pub collection_id: Uuid,
    /// Self-referential parent; `None` means the collection root.
    pub parent_id: Option<Uuid>,
    pub name: String,
    pub sort_order: i64,
    pub environment_ids: Vec<Uuid>,
    pub default_environment_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// HTTP send specification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: Uuid,
    pub collection_id: Uuid,
    pub folder_id: Option<Uuid>,
    pub name: String,
    pub method: HttpMethod,
    /// URL template; may contain `{{name}}` placeholders.
    pub url: String,
    pub headers: Vec<KeyValueEntry>,
    pub query_params: Vec<KeyValueEntry>,
    pub body: Option<String>,
    pub body_type: BodyType,
    pub auth: AuthConfig,
    pub scripts: ScriptsConfig,
    pub sort_order: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Named variable set; at most one active per workspace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Environment {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub name: String,
    pub is_active: bool,
    pub sort_order: i64,
    /// Always empty on disk when `vault_synced` is set; values then live
    /// only in the runtime secret cache.
    pub variables: Vec<Variable>,
    pub vault_synced: bool,
    pub vault_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Environment {
    /// Cross-machine identity hint used by the serializer: the vault path
    /// when set, otherwise a slug of the name.
    pub fn sync_hint(&self) -> String {
        match &self.vault_path {
            Some(p) if !p.is_empty() => p.clone(),
            _ => slugify(&self.name),
        }
    }
}

/// One executed request, as sent and as answered
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestHistory {
    pub id: Uuid,
    pub request_id: Uuid,
    pub method: HttpMethod,
    /// URL as sent, after variable substitution.
    pub url: String,
    pub status: u16,
    pub request_headers: Vec<KeyValueEntry>,
    pub response_headers: Vec<KeyValueEntry>,
    pub request_body: Option<String>,
    pub response_body: Option<String>,
    pub duration_ms: u64,
    pub executed_at: DateTime<Utc>,
}

/// Lowercase ASCII slug of a display name, used for environment hints.
pub fn slugify(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_dash = true;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}
