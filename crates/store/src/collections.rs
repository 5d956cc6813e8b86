//! Collection repository
//!
//! Collections also carry the per-file sync state (`file_shas`) and the
//! dirty bit driven by request/folder mutations; the sync engine reads and
//! writes that state through the dedicated methods at the bottom.

use std::collections::BTreeMap;

use restbench_core::model::Collection;
use restbench_core::types::FileSha;
use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

use crate::db::Store;
use crate::error::{Result, StoreError};
use crate::jsonx;
use crate::workspaces::{parse_id, parse_ts};

#[derive(Debug, Default, Clone)]
pub struct CollectionPatch {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub sort_order: Option<i64>,
    pub sync_enabled: Option<bool>,
    pub variables: Option<BTreeMap<String, String>>,
}

impl Store {
    pub fn create_collection(&self, workspace_id: Option<Uuid>, name: &str) -> Result<Collection> {
        let now = Self::now();
        let id = Uuid::new_v4();
        let conn = self.lock();
        let sort_order: i64 = conn.query_row(
            "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM collections
             WHERE workspace_id IS ?1",
            params![workspace_id.map(|w| w.to_string())],
            |r| r.get(0),
        )?;
        conn.execute(
            "INSERT INTO collections (id, workspace_id, name, sort_order, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![
                id.to_string(),
                workspace_id.map(|w| w.to_string()),
                name,
                sort_order,
                jsonx::encode_ts(&now)
            ],
        )?;
        drop(conn);
        self.find_collection(id)
    }

    pub fn find_collection(&self, id: Uuid) -> Result<Collection> {
        let conn = self.lock();
        let row = conn
            .query_row(
                &format!("{SELECT_COLLECTION} WHERE id = ?1"),
                [id.to_string()],
                collection_from_row,
            )
            .optional()?;
        row.ok_or_else(|| StoreError::not_found("collection", id))?
    }

    /// Collections of one workspace, ordered by the ordering key.
    pub fn list_collections(&self, workspace_id: Option<Uuid>) -> Result<Vec<Collection>> {
        let conn = self.lock();
        let mut stmt =
            conn.prepare(&format!("{SELECT_COLLECTION} WHERE workspace_id IS ?1 ORDER BY sort_order"))?;
        let rows = stmt.query_map(params![workspace_id.map(|w| w.to_string())], collection_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row??);
        }
        Ok(out)
    }

    pub fn update_collection(&self, id: Uuid, patch: CollectionPatch) -> Result<Collection> {
        let current = self.find_collection(id)?;
        let name = patch.name.unwrap_or(current.name);
        let description = patch.description.unwrap_or(current.description);
        let sort_order = patch.sort_order.unwrap_or(current.sort_order);
        let sync_enabled = patch.sync_enabled.unwrap_or(current.sync_enabled);
        let variables = patch.variables.unwrap_or(current.variables);
        let now = Self::now();
        let conn = self.lock();
        conn.execute(
            "UPDATE collections SET name = ?2, description = ?3, sort_order = ?4,
                 sync_enabled = ?5, variables = ?6, updated_at = ?7
             WHERE id = ?1",
            params![
                id.to_string(),
                name,
                description,
                sort_order,
                sync_enabled,
                jsonx::encode(&variables),
                jsonx::encode_ts(&now)
            ],
        )?;
        drop(conn);
        self.find_collection(id)
    }

    /// Cascades to folders, requests, and histories through the schema.
    pub fn remove_collection(&self, id: Uuid) -> Result<()> {
        let conn = self.lock();
        let affected = conn.execute("DELETE FROM collections WHERE id = ?1", [id.to_string()])?;
        if affected == 0 {
            return Err(StoreError::not_found("collection", id));
        }
        Ok(())
    }

    pub fn reorder_collections(&self, ids: &[Uuid]) -> Result<()> {
        let now = Self::now();
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        for (index, id) in ids.iter().enumerate() {
            tx.execute(
                "UPDATE collections SET sort_order = ?2, updated_at = ?3 WHERE id = ?1",
                params![id.to_string(), index as i64, jsonx::encode_ts(&now)],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Replaces the associated environment list and default.
    pub fn set_collection_environments(
        &self,
        id: Uuid,
        environment_ids: &[Uuid],
        default_environment_id: Option<Uuid>,
    ) -> Result<()> {
        if let Some(default) = default_environment_id {
            if !environment_ids.contains(&default) {
                return Err(StoreError::Validation(
                    "Default environment must be in the associated set".to_string(),
                ));
            }
        }
        let ids: Vec<String> = environment_ids.iter().map(|e| e.to_string()).collect();
        let now = Self::now();
        let conn = self.lock();
        let affected = conn.execute(
            "UPDATE collections SET environment_ids = ?2, default_environment_id = ?3,
                 updated_at = ?4
             WHERE id = ?1",
            params![
                id.to_string(),
                jsonx::encode(&ids),
                default_environment_id.map(|d| d.to_string()),
                jsonx::encode_ts(&now)
            ],
        )?;
        if affected == 0 {
            return Err(StoreError::not_found("collection", id));
        }
        Ok(())
    }

    // ── Sync state ──

    /// Any request/folder mutation routes through this for sync-enabled
    /// collections.
    pub fn mark_collection_dirty(&self, id: Uuid) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "UPDATE collections SET is_dirty = 1 WHERE id = ?1 AND sync_enabled = 1",
            [id.to_string()],
        )?;
        Ok(())
    }

    /// Collections eligible for `push_all`: sync-enabled and dirty or never
    /// synced.
    pub fn list_pushable_collections(&self, workspace_id: Option<Uuid>) -> Result<Vec<Collection>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "{SELECT_COLLECTION}
             WHERE workspace_id IS ?1 AND sync_enabled = 1
               AND (is_dirty = 1 OR remote_synced_at IS NULL)
             ORDER BY sort_order"
        ))?;
        let rows = stmt.query_map(params![workspace_id.map(|w| w.to_string())], collection_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row??);
        }
        Ok(out)
    }

    /// Atomically replaces the per-file sync state and the collection-level
    /// remote markers after a successful sync pass.
    ///
    /// `clear_dirty` is false for pull-only passes that skipped local
    /// changes; those must stay eligible for the next push.
    pub fn record_sync_state(
        &self,
        id: Uuid,
        file_shas: &BTreeMap<String, FileSha>,
        remote_sha: Option<&str>,
        clear_dirty: bool,
    ) -> Result<()> {
        let now = Self::now();
        let conn = self.lock();
        let affected = conn.execute(
            "UPDATE collections SET file_shas = ?2, remote_sha = ?3, remote_synced_at = ?4,
                 is_dirty = CASE WHEN ?5 THEN 0 ELSE is_dirty END, updated_at = ?4
             WHERE id = ?1",
            params![
                id.to_string(),
                jsonx::encode(file_shas),
                remote_sha,
                jsonx::encode_ts(&now),
                clear_dirty
            ],
        )?;
        if affected == 0 {
            return Err(StoreError::not_found("collection", id));
        }
        Ok(())
    }

    /// Updates one path's sync state without touching the dirty bit, for
    /// granular single-file pushes.
    pub fn upsert_file_sha(&self, id: Uuid, path: &str, sha: FileSha) -> Result<()> {
        let current = self.find_collection(id)?;
        let mut file_shas = current.file_shas;
        file_shas.insert(path.to_string(), sha);
        let conn = self.lock();
        conn.execute(
            "UPDATE collections SET file_shas = ?2 WHERE id = ?1",
            params![id.to_string(), jsonx::encode(&file_shas)],
        )?;
        Ok(())
    }

    /// Clears all remote markers, e.g. after the remote copy is deleted.
    pub fn clear_sync_state(&self, id: Uuid) -> Result<()> {
        let conn = self.lock();
        let affected = conn.execute(
            "UPDATE collections SET file_shas = '{}', remote_sha = NULL,
                 remote_synced_at = NULL, is_dirty = 0
             WHERE id = ?1",
            [id.to_string()],
        )?;
        if affected == 0 {
            return Err(StoreError::not_found("collection", id));
        }
        Ok(())
    }
}

const SELECT_COLLECTION: &str = "SELECT id, workspace_id, name, description, sort_order,
    sync_enabled, is_dirty, remote_sha, remote_synced_at, variables, environment_ids,
    default_environment_id, file_shas, created_at, updated_at FROM collections";

fn collection_from_row(r: &Row<'_>) -> rusqlite::Result<Result<Collection>> {
    let id: String = r.get(0)?;
    let workspace_id: Option<String> = r.get(1)?;
    let name: String = r.get(2)?;
    let description: Option<String> = r.get(3)?;
    let sort_order: i64 = r.get(4)?;
    let sync_enabled: bool = r.get(5)?;
    let is_dirty: bool = r.get(6)?;
    let remote_sha: Option<String> = r.get(7)?;
    let remote_synced_at: Option<String> = r.get(8)?;
    let variables: String = r.get(9)?;
    let environment_ids: String = r.get(10)?;
    let default_environment_id: Option<String> = r.get(11)?;
    let file_shas: String = r.get(12)?;
    let created_at: String = r.get(13)?;
    let updated_at: String = r.get(14)?;

    Ok((|| {
        let env_ids: Vec<String> = jsonx::decode("collections.environment_ids", &environment_ids)?;
        Ok(Collection {
            id: parse_id("collection", &id)?,
            workspace_id: workspace_id
                .as_deref()
                .map(|w| parse_id("workspace", w))
                .transpose()?,
            name,
            description,
            sort_order,
            sync_enabled,
            is_dirty,
            remote_sha,
            remote_synced_at: jsonx::decode_ts_opt("collections.remote_synced_at", remote_synced_at)?,
            variables: jsonx::decode("collections.variables", &variables)?,
            environment_ids: env_ids
                .iter()
                .map(|e| parse_id("environment", e))
                .collect::<Result<_>>()?,
            default_environment_id: default_environment_id
                .as_deref()
                .map(|d| parse_id("environment", d))
                .transpose()?,
            file_shas: jsonx::decode("collections.file_shas", &file_shas)?,
            created_at: parse_ts("collections.created_at", &created_at)?,
            updated_at: parse_ts("collections.updated_at", &updated_at)?,
        })
    })())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::test_store;

    #[test]
    fn test_create_list_scoped_to_workspace() {
        let store = test_store();
        let ws = store.create_workspace("WS").unwrap();
        store.create_collection(Some(ws.id), "One").unwrap();
        store.create_collection(Some(ws.id), "Two").unwrap();
        store.create_collection(None, "Detached").unwrap();

        assert_eq!(store.list_collections(Some(ws.id)).unwrap().len(), 2);
        assert_eq!(store.list_collections(None).unwrap().len(), 1);
    }

    #[test]
    fn test_variables_round_trip() {
        let store = test_store();
        let c = store.create_collection(None, "C").unwrap();
        let mut vars = BTreeMap::new();
        vars.insert("base_url".to_string(), "http://local".to_string());
        store
            .update_collection(
                c.id,
                CollectionPatch {
                    variables: Some(vars.clone()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(store.find_collection(c.id).unwrap().variables, vars);
    }

    #[test]
    fn test_dirty_bit_requires_sync_enabled() {
        let store = test_store();
        let c = store.create_collection(None, "C").unwrap();
        store.mark_collection_dirty(c.id).unwrap();
        assert!(!store.find_collection(c.id).unwrap().is_dirty);

        store
            .update_collection(
                c.id,
                CollectionPatch {
                    sync_enabled: Some(true),
                    ..Default::default()
                },
            )
            .unwrap();
        store.mark_collection_dirty(c.id).unwrap();
        assert!(store.find_collection(c.id).unwrap().is_dirty);
    }

    #[test]
    fn test_record_sync_state_clears_dirty() {
        let store = test_store();
        let c = store.create_collection(None, "C").unwrap();
        store
            .update_collection(
                c.id,
                CollectionPatch {
                    sync_enabled: Some(true),
                    ..Default::default()
                },
            )
            .unwrap();
        store.mark_collection_dirty(c.id).unwrap();

        let mut shas = BTreeMap::new();
        shas.insert(
            format!("{}/_collection.yaml", c.id),
            FileSha {
                content_hash: "abc".into(),
                remote_sha: "abc".into(),
                commit_sha: Some("deadbeef".into()),
            },
        );
        store
            .record_sync_state(c.id, &shas, Some("root-sha"), true)
            .unwrap();

        let back = store.find_collection(c.id).unwrap();
        assert!(!back.is_dirty);
        assert_eq!(back.remote_sha.as_deref(), Some("root-sha"));
        assert!(back.remote_synced_at.is_some());
        assert_eq!(back.file_shas, shas);
    }

    #[test]
    fn test_delete_cascades_to_folders_requests_histories() {
        let store = test_store();
        let c = store.create_collection(None, "C").unwrap();
        let folder = store.create_folder(c.id, None, "f").unwrap();
        let request = store
            .create_request(c.id, Some(folder.id), "r", restbench_core::types::HttpMethod::Get)
            .unwrap();
        store
            .insert_history(crate::history::NewHistory {
                request_id: request.id,
                method: restbench_core::types::HttpMethod::Get,
                url: "https://api.example.com".into(),
                status: 200,
                request_headers: Vec::new(),
                response_headers: Vec::new(),
                request_body: None,
                response_body: None,
                duration_ms: 1,
            })
            .unwrap();

        store.remove_collection(c.id).unwrap();
        assert!(store.find_folder(folder.id).is_err());
        assert!(store.find_request(request.id).is_err());
        let count: i64 = store
            .lock()
            .query_row("SELECT COUNT(*) FROM request_histories", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_default_environment_must_be_associated() {
        let store = test_store();
        let c = store.create_collection(None, "C").unwrap();
        let env = Uuid::new_v4();
        assert!(matches!(
            store.set_collection_environments(c.id, &[], Some(env)),
            Err(StoreError::Validation(_))
        ));
    }
}
