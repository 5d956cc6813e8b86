//! Folder repository
//!
//! Folders form a tree via `parent_id`; depth is capped at three levels.
//! Deleting a folder cascades to descendant folders while contained
//! requests fall back to the collection root through the schema's
//! `ON DELETE SET NULL`.

use restbench_core::constants::MAX_FOLDER_DEPTH;
use restbench_core::model::Folder;
use rusqlite::{params, OptionalExtension, Row};
use std::collections::HashSet;
use uuid::Uuid;

use crate::db::Store;
use crate::error::{Result, StoreError};
use crate::jsonx;
use crate::workspaces::{parse_id, parse_ts};

#[derive(Debug, Default, Clone)]
pub struct FolderPatch {
    pub name: Option<String>,
    pub sort_order: Option<i64>,
    /// `Some(None)` moves the folder to the collection root.
    pub parent_id: Option<Option<Uuid>>,
}

impl Store {
    pub fn create_folder(
        &self,
        collection_id: Uuid,
        parent_id: Option<Uuid>,
        name: &str,
    ) -> Result<Folder> {
        if let Some(parent) = parent_id {
            let depth = self.folder_depth(parent)?;
            if depth + 1 >= MAX_FOLDER_DEPTH {
                return Err(StoreError::Validation(format!(
                    "Folder nesting deeper than {MAX_FOLDER_DEPTH} levels"
                )));
            }
        }
        let now = Self::now();
        let id = Uuid::new_v4();
        let conn = self.lock();
        let sort_order: i64 = conn.query_row(
            "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM folders
             WHERE collection_id = ?1 AND parent_id IS ?2",
            params![collection_id.to_string(), parent_id.map(|p| p.to_string())],
            |r| r.get(0),
        )?;
        conn.execute(
            "INSERT INTO folders (id, collection_id, parent_id, name, sort_order,
                 created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![
                id.to_string(),
                collection_id.to_string(),
                parent_id.map(|p| p.to_string()),
                name,
                sort_order,
                jsonx::encode_ts(&now)
            ],
        )?;
        drop(conn);
        self.mark_collection_dirty(collection_id)?;
        self.find_folder(id)
    }

    pub fn find_folder(&self, id: Uuid) -> Result<Folder> {
        let conn = self.lock();
        let row = conn
            .query_row(
                &format!("{SELECT_FOLDER} WHERE id = ?1"),
                [id.to_string()],
                folder_from_row,
            )
            .optional()?;
        row.ok_or_else(|| StoreError::not_found("folder", id))?
    }

    /// Child folders of `(collection, parent)`, ordered.
    pub fn list_folders(&self, collection_id: Uuid, parent_id: Option<Uuid>) -> Result<Vec<Folder>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "{SELECT_FOLDER} WHERE collection_id = ?1 AND parent_id IS ?2 ORDER BY sort_order"
        ))?;
        let rows = stmt.query_map(
            params![collection_id.to_string(), parent_id.map(|p| p.to_string())],
            folder_from_row,
        )?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row??);
        }
        Ok(out)
    }

    /// Every folder of a collection, for tree assembly.
    pub fn list_all_folders(&self, collection_id: Uuid) -> Result<Vec<Folder>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "{SELECT_FOLDER} WHERE collection_id = ?1 ORDER BY sort_order"
        ))?;
        let rows = stmt.query_map([collection_id.to_string()], folder_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row??);
        }
        Ok(out)
    }

    pub fn update_folder(&self, id: Uuid, patch: FolderPatch) -> Result<Folder> {
        let current = self.find_folder(id)?;
        if let Some(new_parent) = patch.parent_id {
            self.validate_reparent(&current, new_parent)?;
        }
        let name = patch.name.unwrap_or(current.name);
        let sort_order = patch.sort_order.unwrap_or(current.sort_order);
        let parent_id = patch.parent_id.unwrap_or(current.parent_id);
        let now = Self::now();
        let conn = self.lock();
        conn.execute(
            "UPDATE folders SET name = ?2, sort_order = ?3, parent_id = ?4, updated_at = ?5
             WHERE id = ?1",
            params![
                id.to_string(),
                name,
                sort_order,
                parent_id.map(|p| p.to_string()),
                jsonx::encode_ts(&now)
            ],
        )?;
        drop(conn);
        self.mark_collection_dirty(current.collection_id)?;
        self.find_folder(id)
    }

    pub fn remove_folder(&self, id: Uuid) -> Result<()> {
        let folder = self.find_folder(id)?;
        let conn = self.lock();
        conn.execute("DELETE FROM folders WHERE id = ?1", [id.to_string()])?;
        drop(conn);
        self.mark_collection_dirty(folder.collection_id)
    }

    /// Reorders sibling folders under `(collection, parent)`.
    pub fn reorder_folders(&self, ids: &[Uuid]) -> Result<()> {
        let now = Self::now();
        let mut collection_id = None;
        {
            let mut conn = self.lock();
            let tx = conn.transaction()?;
            for (index, id) in ids.iter().enumerate() {
                tx.execute(
                    "UPDATE folders SET sort_order = ?2, updated_at = ?3 WHERE id = ?1",
                    params![id.to_string(), index as i64, jsonx::encode_ts(&now)],
                )?;
            }
            if let Some(first) = ids.first() {
                collection_id = tx
                    .query_row(
                        "SELECT collection_id FROM folders WHERE id = ?1",
                        [first.to_string()],
                        |r| r.get::<_, String>(0),
                    )
                    .optional()?;
            }
            tx.commit()?;
        }
        if let Some(cid) = collection_id {
            self.mark_collection_dirty(parse_id("collection", &cid)?)?;
        }
        Ok(())
    }

    /// Replaces the associated environments of a folder.
    pub fn set_folder_environments(
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
            "UPDATE folders SET environment_ids = ?2, default_environment_id = ?3, updated_at = ?4
             WHERE id = ?1",
            params![
                id.to_string(),
                jsonx::encode(&ids),
                default_environment_id.map(|d| d.to_string()),
                jsonx::encode_ts(&now)
            ],
        )?;
        if affected == 0 {
            return Err(StoreError::not_found("folder", id));
        }
        Ok(())
    }

    /// Depth of a folder below the collection root (root children are 0).
    ///
    /// Walks the parent chain with a visited set so a corrupted
    /// self-referential chain fails instead of spinning.
    pub fn folder_depth(&self, id: Uuid) -> Result<usize> {
        let mut visited = HashSet::new();
        let mut depth = 0usize;
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            if !visited.insert(current) {
                return Err(StoreError::Validation(format!(
                    "Folder parent chain contains a cycle at {current}"
                )));
            }
            let folder = self.find_folder(current)?;
            cursor = folder.parent_id;
            if cursor.is_some() {
                depth += 1;
            }
        }
        Ok(depth)
    }

    fn validate_reparent(&self, folder: &Folder, new_parent: Option<Uuid>) -> Result<()> {
        let Some(parent) = new_parent else {
            return Ok(());
        };
        if parent == folder.id {
            return Err(StoreError::Validation(
                "Folder cannot be its own parent".to_string(),
            ));
        }
        // The new parent must not live in this folder's subtree.
        let mut cursor = Some(parent);
        let mut visited = HashSet::new();
        while let Some(current) = cursor {
            if current == folder.id {
                return Err(StoreError::Validation(
                    "Cannot move a folder into its own subtree".to_string(),
                ));
            }
            if !visited.insert(current) {
                return Err(StoreError::Validation(format!(
                    "Folder parent chain contains a cycle at {current}"
                )));
            }
            cursor = self.find_folder(current)?.parent_id;
        }
        if self.folder_depth(parent)? + 1 >= MAX_FOLDER_DEPTH {
            return Err(StoreError::Validation(format!(
                "Folder nesting deeper than {MAX_FOLDER_DEPTH} levels"
            )));
        }
        Ok(())
    }
}

const SELECT_FOLDER: &str = "SELECT id, collection_id, parent_id, name, sort_order,
    environment_ids, default_environment_id, created_at, updated_at FROM folders";

fn folder_from_row(r: &Row<'_>) -> rusqlite::Result<Result<Folder>> {
    let id: String = r.get(0)?;
    let collection_id: String = r.get(1)?;
    let parent_id: Option<String> = r.get(2)?;
    let name: String = r.get(3)?;
    let sort_order: i64 = r.get(4)?;
    let environment_ids: String = r.get(5)?;
    let default_environment_id: Option<String> = r.get(6)?;
    let created_at: String = r.get(7)?;
    let updated_at: String = r.get(8)?;

    Ok((|| {
        let env_ids: Vec<String> = jsonx::decode("folders.environment_ids", &environment_ids)?;
        Ok(Folder {
            id: parse_id("folder", &id)?,
            collection_id: parse_id("collection", &collection_id)?,
            parent_id: parent_id
                .as_deref()
                .map(|p| parse_id("folder", p))
                .transpose()?,
            name,
            sort_order,
            environment_ids: env_ids
                .iter()
                .map(|e| parse_id("environment", e))
                .collect::<Result<_>>()?,
            default_environment_id: default_environment_id
                .as_deref()
                .map(|d| parse_id("environment", d))
                .transpose()?,
            created_at: parse_ts("folders.created_at", &created_at)?,
            updated_at: parse_ts("folders.updated_at", &updated_at)?,
        })
    })())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::test_store;

    fn collection(store: &Store) -> Uuid {
        store.create_collection(None, "C").unwrap().id
    }

    #[test]
    fn test_depth_cap() {
        let store = test_store();
        let cid = collection(&store);
        let a = store.create_folder(cid, None, "a").unwrap();
        let b = store.create_folder(cid, Some(a.id), "b").unwrap();
        let c = store.create_folder(cid, Some(b.id), "c").unwrap();
        assert!(matches!(
            store.create_folder(cid, Some(c.id), "d"),
            Err(StoreError::Validation(_))
        ));
    }

    #[test]
    fn test_delete_cascades_folders_reparents_requests() {
        let store = test_store();
        let cid = collection(&store);
        let parent = store.create_folder(cid, None, "parent").unwrap();
        let child = store.create_folder(cid, Some(parent.id), "child").unwrap();
        let req = store
            .create_request(cid, Some(parent.id), "r", restbench_core::types::HttpMethod::Get)
            .unwrap();

        store.remove_folder(parent.id).unwrap();
        assert!(store.find_folder(child.id).is_err());
        let back = store.find_request(req.id).unwrap();
        assert_eq!(back.folder_id, None);
    }

    #[test]
    fn test_cannot_move_into_own_subtree() {
        let store = test_store();
        let cid = collection(&store);
        let a = store.create_folder(cid, None, "a").unwrap();
        let b = store.create_folder(cid, Some(a.id), "b").unwrap();
        assert!(matches!(
            store.update_folder(
                a.id,
                FolderPatch {
                    parent_id: Some(Some(b.id)),
                    ..Default::default()
                }
            ),
            Err(StoreError::Validation(_))
        ));
    }

    #[test]
    fn test_sibling_ordering_scoped_to_parent() {
        let store = test_store();
        let cid = collection(&store);
        let root_a = store.create_folder(cid, None, "ra").unwrap();
        let root_b = store.create_folder(cid, None, "rb").unwrap();
        let nested = store.create_folder(cid, Some(root_a.id), "n").unwrap();
        assert_eq!(root_a.sort_order, 0);
        assert_eq!(root_b.sort_order, 1);
        assert_eq!(nested.sort_order, 0);
    }
}
