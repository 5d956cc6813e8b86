//! Id-preserving collection import
//!
//! The sync engine reconstructs a collection from pulled documents by
//! handing the whole tree here; everything lands in one transaction,
//! matching rows by id — existing entities update in place, absent ones
//! are created with the imported id, and local entities missing from the
//! import are removed.

use std::collections::{BTreeMap, HashMap, HashSet};

use restbench_core::scripts::ScriptsConfig;
use restbench_core::types::{AuthConfig, BodyType, HttpMethod, KeyValueEntry};
use rusqlite::params;
use uuid::Uuid;

use crate::db::Store;
use crate::error::{Result, StoreError};
use crate::jsonx;
use crate::requests::encrypt_auth;

/// Full imported state of one collection
#[derive(Debug, Clone)]
pub struct ImportBatch {
    pub name: String,
    pub description: Option<String>,
    pub variables: BTreeMap<String, String>,
    pub environment_ids: Vec<Uuid>,
    pub default_environment_id: Option<Uuid>,
    pub folders: Vec<ImportFolder>,
    pub requests: Vec<ImportRequest>,
}

#[derive(Debug, Clone)]
pub struct ImportFolder {
    pub id: Uuid,
    pub parent_id: Option<Uuid>,
    pub name: String,
    pub sort_order: i64,
    pub environment_ids: Vec<Uuid>,
    pub default_environment_id: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub id: Uuid,
    pub folder_id: Option<Uuid>,
    pub sort_order: i64,
    pub name: String,
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<KeyValueEntry>,
    pub query_params: Vec<KeyValueEntry>,
    pub body: Option<String>,
    pub body_type: BodyType,
    pub auth: AuthConfig,
    pub scripts: ScriptsConfig,
}

impl Store {
    /// Replaces a collection's content with the imported tree, in one
    /// transaction.
    pub fn import_collection(&self, collection_id: Uuid, batch: &ImportBatch) -> Result<()> {
        // Ciphering outside the transaction keeps the lock short.
        let mut encrypted_auth = HashMap::new();
        for request in &batch.requests {
            encrypted_auth.insert(request.id, encrypt_auth(self.cipher(), &request.auth)?);
        }
        let ordered_folders = order_folders(&batch.folders)?;

        let now = jsonx::encode_ts(&Self::now());
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let affected = tx.execute(
            "UPDATE collections SET name = ?2, description = ?3, variables = ?4,
                 environment_ids = ?5, default_environment_id = ?6, updated_at = ?7
             WHERE id = ?1",
            params![
                collection_id.to_string(),
                batch.name,
                batch.description,
                jsonx::encode(&batch.variables),
                jsonx::encode(
                    &batch
                        .environment_ids
                        .iter()
                        .map(|e| e.to_string())
                        .collect::<Vec<_>>()
                ),
                batch.default_environment_id.map(|d| d.to_string()),
                now
            ],
        )?;
        if affected == 0 {
            return Err(StoreError::not_found("collection", collection_id));
        }

        // Parents precede children, so folder FKs always resolve.
        for folder in &ordered_folders {
            tx.execute(
                "INSERT INTO folders (id, collection_id, parent_id, name, sort_order,
                     environment_ids, default_environment_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
                 ON CONFLICT(id) DO UPDATE SET
                     parent_id = excluded.parent_id,
                     name = excluded.name,
                     sort_order = excluded.sort_order,
                     environment_ids = excluded.environment_ids,
                     default_environment_id = excluded.default_environment_id,
                     updated_at = excluded.updated_at",
                params![
                    folder.id.to_string(),
                    collection_id.to_string(),
                    folder.parent_id.map(|p| p.to_string()),
                    folder.name,
                    folder.sort_order,
                    jsonx::encode(
                        &folder
                            .environment_ids
                            .iter()
                            .map(|e| e.to_string())
                            .collect::<Vec<_>>()
                    ),
                    folder.default_environment_id.map(|d| d.to_string()),
                    now
                ],
            )?;
        }

        for request in &batch.requests {
            let auth = encrypted_auth
                .get(&request.id)
                .expect("auth encrypted for every imported request");
            tx.execute(
                "INSERT INTO requests (id, collection_id, folder_id, name, method, url,
                     headers, query_params, body, body_type, auth, scripts, sort_order,
                     created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?14)
                 ON CONFLICT(id) DO UPDATE SET
                     folder_id = excluded.folder_id,
                     name = excluded.name,
                     method = excluded.method,
                     url = excluded.url,
                     headers = excluded.headers,
                     query_params = excluded.query_params,
                     body = excluded.body,
                     body_type = excluded.body_type,
                     auth = excluded.auth,
                     scripts = excluded.scripts,
                     sort_order = excluded.sort_order,
                     updated_at = excluded.updated_at",
                params![
                    request.id.to_string(),
                    collection_id.to_string(),
                    request.folder_id.map(|f| f.to_string()),
                    request.name,
                    request.method.as_str(),
                    request.url,
                    jsonx::encode(&request.headers),
                    jsonx::encode(&request.query_params),
                    request.body,
                    request.body_type.as_str(),
                    jsonx::encode(auth),
                    jsonx::encode(&request.scripts),
                    request.sort_order,
                    now
                ],
            )?;
        }

        // Remove everything the import no longer contains: requests first,
        // then folders (leaves before parents via the reversed order).
        let imported_requests: HashSet<String> =
            batch.requests.iter().map(|r| r.id.to_string()).collect();
        let existing_requests: Vec<String> = {
            let mut stmt = tx.prepare("SELECT id FROM requests WHERE collection_id = ?1")?;
            let rows = stmt.query_map([collection_id.to_string()], |r| r.get(0))?;
            rows.collect::<rusqlite::Result<_>>()?
        };
        for id in existing_requests {
            if !imported_requests.contains(&id) {
                tx.execute("DELETE FROM requests WHERE id = ?1", [id])?;
            }
        }

        let imported_folders: HashSet<String> =
            batch.folders.iter().map(|f| f.id.to_string()).collect();
        let existing_folders: Vec<String> = {
            let mut stmt = tx.prepare("SELECT id FROM folders WHERE collection_id = ?1")?;
            let rows = stmt.query_map([collection_id.to_string()], |r| r.get(0))?;
            rows.collect::<rusqlite::Result<_>>()?
        };
        for id in existing_folders {
            if !imported_folders.contains(&id) {
                tx.execute("DELETE FROM folders WHERE id = ?1", [id])?;
            }
        }

        tx.commit()?;
        Ok(())
    }
}

/// Orders folders so every parent precedes its children; a parent chain
/// that loops inside the batch is rejected.
fn order_folders(folders: &[ImportFolder]) -> Result<Vec<&ImportFolder>> {
    let by_id: HashMap<Uuid, &ImportFolder> = folders.iter().map(|f| (f.id, f)).collect();
    let mut depths: Vec<(usize, &ImportFolder)> = Vec::with_capacity(folders.len());
    for folder in folders {
        let mut depth = 0usize;
        let mut cursor = folder.parent_id;
        while let Some(parent) = cursor {
            depth += 1;
            if depth > folders.len() {
                return Err(StoreError::Validation(format!(
                    "Imported folder tree contains a cycle at {}",
                    folder.id
                )));
            }
            cursor = by_id.get(&parent).and_then(|f| f.parent_id);
        }
        depths.push((depth, folder));
    }
    depths.sort_by_key(|(depth, _)| *depth);
    Ok(depths.into_iter().map(|(_, f)| f).collect())
}
