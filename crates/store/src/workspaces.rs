//! Workspace repository
//!
//! Workspaces carry a nested settings document; leaves whose dot-notation
//! path is in the sensitive set are encrypted before the document is
//! written and decrypted on read.

use chrono::{DateTime, Utc};
use restbench_core::constants::is_sensitive_setting;
use restbench_core::model::Workspace;
use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

use crate::db::Store;
use crate::error::{Result, StoreError};
use crate::jsonx;

/// Fields that may change on update; `None` leaves the column untouched.
#[derive(Debug, Default, Clone)]
pub struct WorkspacePatch {
    pub name: Option<String>,
    pub sort_order: Option<i64>,
    pub settings: Option<serde_json::Value>,
}

impl Store {
    pub fn create_workspace(&self, name: &str) -> Result<Workspace> {
        let now = Self::now();
        let id = Uuid::new_v4();
        let conn = self.lock();
        let sort_order: i64 = conn.query_row(
            "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM workspaces",
            [],
            |r| r.get(0),
        )?;
        conn.execute(
            "INSERT INTO workspaces (id, name, sort_order, settings, created_at, updated_at)
             VALUES (?1, ?2, ?3, '{}', ?4, ?4)",
            params![id.to_string(), name, sort_order, jsonx::encode_ts(&now)],
        )?;
        drop(conn);
        self.find_workspace(id)
    }

    /// Auto-provisions a workspace at startup when none exists.
    pub fn ensure_default_workspace(&self) -> Result<Workspace> {
        let existing = {
            let conn = self.lock();
            conn.query_row(
                "SELECT id FROM workspaces ORDER BY sort_order LIMIT 1",
                [],
                |r| r.get::<_, String>(0),
            )
            .optional()?
        };
        match existing {
            Some(id) => self.find_workspace(parse_id("workspace", &id)?),
            None => self.create_workspace("My Workspace"),
        }
    }

    pub fn find_workspace(&self, id: Uuid) -> Result<Workspace> {
        let conn = self.lock();
        let row = conn
            .query_row(
                "SELECT id, name, sort_order, settings, created_at, updated_at
                 FROM workspaces WHERE id = ?1",
                [id.to_string()],
                |r| self.workspace_from_row(r),
            )
            .optional()?;
        row.ok_or_else(|| StoreError::not_found("workspace", id))?
    }

    pub fn list_workspaces(&self) -> Result<Vec<Workspace>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, name, sort_order, settings, created_at, updated_at
             FROM workspaces ORDER BY sort_order",
        )?;
        let rows = stmt.query_map([], |r| self.workspace_from_row(r))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row??);
        }
        Ok(out)
    }

    pub fn update_workspace(&self, id: Uuid, patch: WorkspacePatch) -> Result<Workspace> {
        let current = self.find_workspace(id)?;
        let name = patch.name.unwrap_or(current.name);
        let sort_order = patch.sort_order.unwrap_or(current.sort_order);
        let settings = match patch.settings {
            Some(doc) => self.encrypt_settings_doc(doc)?,
            None => self.encrypt_settings_doc(current.settings)?,
        };
        let now = Self::now();
        let conn = self.lock();
        conn.execute(
            "UPDATE workspaces SET name = ?2, sort_order = ?3, settings = ?4, updated_at = ?5
             WHERE id = ?1",
            params![
                id.to_string(),
                name,
                sort_order,
                jsonx::encode(&settings),
                jsonx::encode_ts(&now)
            ],
        )?;
        drop(conn);
        self.find_workspace(id)
    }

    /// Deletion keeps the invariant of at least one remaining workspace.
    pub fn remove_workspace(&self, id: Uuid) -> Result<()> {
        let conn = self.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM workspaces", [], |r| r.get(0))?;
        if count <= 1 {
            return Err(StoreError::Validation(
                "Cannot delete the last workspace".to_string(),
            ));
        }
        let affected = conn.execute("DELETE FROM workspaces WHERE id = ?1", [id.to_string()])?;
        if affected == 0 {
            return Err(StoreError::not_found("workspace", id));
        }
        Ok(())
    }

    pub fn reorder_workspaces(&self, ids: &[Uuid]) -> Result<()> {
        let now = Self::now();
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        for (index, id) in ids.iter().enumerate() {
            tx.execute(
                "UPDATE workspaces SET sort_order = ?2, updated_at = ?3 WHERE id = ?1",
                params![id.to_string(), index as i64, jsonx::encode_ts(&now)],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn workspace_from_row(&self, r: &Row<'_>) -> rusqlite::Result<Result<Workspace>> {
        let id: String = r.get(0)?;
        let name: String = r.get(1)?;
        let sort_order: i64 = r.get(2)?;
        let settings: String = r.get(3)?;
        let created_at: String = r.get(4)?;
        let updated_at: String = r.get(5)?;
        Ok(self.assemble_workspace(id, name, sort_order, settings, created_at, updated_at))
    }

    fn assemble_workspace(
        &self,
        id: String,
        name: String,
        sort_order: i64,
        settings: String,
        created_at: String,
        updated_at: String,
    ) -> Result<Workspace> {
        let doc: serde_json::Value = jsonx::decode("workspaces.settings", &settings)?;
        Ok(Workspace {
            id: parse_id("workspace", &id)?,
            name,
            sort_order,
            settings: self.decrypt_settings_doc(doc)?,
            created_at: parse_ts("workspaces.created_at", &created_at)?,
            updated_at: parse_ts("workspaces.updated_at", &updated_at)?,
        })
    }

    /// Encrypts sensitive leaves of a nested settings document, matching
    /// keys by dot-notation path against the sensitive set.
    pub(crate) fn encrypt_settings_doc(
        &self,
        mut doc: serde_json::Value,
    ) -> Result<serde_json::Value> {
        self.walk_settings_doc(&mut doc, "", true)?;
        Ok(doc)
    }

    pub(crate) fn decrypt_settings_doc(
        &self,
        mut doc: serde_json::Value,
    ) -> Result<serde_json::Value> {
        self.walk_settings_doc(&mut doc, "", false)?;
        Ok(doc)
    }

    fn walk_settings_doc(
        &self,
        node: &mut serde_json::Value,
        path: &str,
        encrypt: bool,
    ) -> Result<()> {
        if let serde_json::Value::Object(map) = node {
            for (key, child) in map.iter_mut() {
                let child_path = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{path}.{key}")
                };
                match child {
                    serde_json::Value::String(s) if is_sensitive_setting(&child_path) => {
                        *s = if encrypt {
                            self.cipher().encrypt_field(s)?
                        } else {
                            self.cipher().decrypt_field(s)?
                        };
                    }
                    serde_json::Value::Object(_) => {
                        self.walk_settings_doc(child, &child_path, encrypt)?;
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }
}

pub(crate) fn parse_id(entity: &'static str, raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|_| StoreError::Validation(format!("bad {entity} id: {raw}")))
}

pub(crate) fn parse_ts(column: &'static str, raw: &str) -> Result<DateTime<Utc>> {
    jsonx::decode_ts(column, raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::test_store;

    #[test]
    fn test_create_and_find() {
        let store = test_store();
        let ws = store.create_workspace("Alpha").unwrap();
        let found = store.find_workspace(ws.id).unwrap();
        assert_eq!(found.name, "Alpha");
        assert_eq!(found.settings, serde_json::json!({}));
    }

    #[test]
    fn test_ensure_default_provisions_once() {
        let store = test_store();
        let first = store.ensure_default_workspace().unwrap();
        let second = store.ensure_default_workspace().unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(store.list_workspaces().unwrap().len(), 1);
    }

    #[test]
    fn test_last_workspace_cannot_be_deleted() {
        let store = test_store();
        let ws = store.create_workspace("Only").unwrap();
        assert!(matches!(
            store.remove_workspace(ws.id),
            Err(StoreError::Validation(_))
        ));
        let other = store.create_workspace("Second").unwrap();
        store.remove_workspace(other.id).unwrap();
    }

    #[test]
    fn test_sensitive_settings_leaf_encrypted_at_rest() {
        let store = test_store();
        let ws = store.create_workspace("Alpha").unwrap();
        let doc = serde_json::json!({
            "vault": { "token": "s.top-secret", "mount": "kv" },
            "app": { "theme": "dark" }
        });
        store
            .update_workspace(
                ws.id,
                WorkspacePatch {
                    settings: Some(doc),
                    ..Default::default()
                },
            )
            .unwrap();

        // Raw column carries the sentinel for the sensitive leaf only.
        let raw: String = store
            .lock()
            .query_row(
                "SELECT settings FROM workspaces WHERE id = ?1",
                [ws.id.to_string()],
                |r| r.get(0),
            )
            .unwrap();
        let raw_doc: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let stored_token = raw_doc["vault"]["token"].as_str().unwrap();
        assert!(stored_token.starts_with("enc:"));
        assert_eq!(raw_doc["vault"]["mount"], "kv");
        assert_eq!(raw_doc["app"]["theme"], "dark");

        // Read path hands back plaintext.
        let back = store.find_workspace(ws.id).unwrap();
        assert_eq!(back.settings["vault"]["token"], "s.top-secret");
    }

    #[test]
    fn test_reorder_assigns_consecutive_orders() {
        let store = test_store();
        let a = store.create_workspace("A").unwrap();
        let b = store.create_workspace("B").unwrap();
        let c = store.create_workspace("C").unwrap();
        store.reorder_workspaces(&[c.id, a.id, b.id]).unwrap();
        let listed = store.list_workspaces().unwrap();
        let names: Vec<_> = listed.iter().map(|w| w.name.as_str()).collect();
        assert_eq!(names, ["C", "A", "B"]);
    }
}
