//! Environment repository
//!
//! Variable values are encrypted at rest. A vault-synced environment never
//! persists variables at all — its values live only in the runtime secret
//! cache, and every write path here pins the stored list to `[]`.

use restbench_core::model::Environment;
use restbench_core::types::Variable;
use restbench_crypto::FieldCipher;
use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

use crate::db::Store;
use crate::error::{Result, StoreError};
use crate::jsonx;
use crate::workspaces::{parse_id, parse_ts};

#[derive(Debug, Default, Clone)]
pub struct EnvironmentPatch {
    pub name: Option<String>,
    pub sort_order: Option<i64>,
    pub variables: Option<Vec<Variable>>,
    pub vault_synced: Option<bool>,
    pub vault_path: Option<Option<String>>,
}

impl Store {
    pub fn create_environment(&self, workspace_id: Uuid, name: &str) -> Result<Environment> {
        let now = Self::now();
        let id = Uuid::new_v4();
        let conn = self.lock();
        let sort_order: i64 = conn.query_row(
            "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM environments WHERE workspace_id = ?1",
            [workspace_id.to_string()],
            |r| r.get(0),
        )?;
        conn.execute(
            "INSERT INTO environments (id, workspace_id, name, sort_order, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![
                id.to_string(),
                workspace_id.to_string(),
                name,
                sort_order,
                jsonx::encode_ts(&now)
            ],
        )?;
        drop(conn);
        self.find_environment(id)
    }

    pub fn find_environment(&self, id: Uuid) -> Result<Environment> {
        let conn = self.lock();
        let row = conn
            .query_row(
                &format!("{SELECT_ENVIRONMENT} WHERE id = ?1"),
                [id.to_string()],
                environment_from_row,
            )
            .optional()?;
        drop(conn);
        let env = row.ok_or_else(|| StoreError::not_found("environment", id))??;
        self.decrypt_environment(env)
    }

    pub fn list_environments(&self, workspace_id: Uuid) -> Result<Vec<Environment>> {
        let raw = {
            let conn = self.lock();
            let mut stmt = conn.prepare(&format!(
                "{SELECT_ENVIRONMENT} WHERE workspace_id = ?1 ORDER BY sort_order"
            ))?;
            let rows = stmt.query_map([workspace_id.to_string()], environment_from_row)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row??);
            }
            out
        };
        raw.into_iter().map(|e| self.decrypt_environment(e)).collect()
    }

    /// The active environment of a workspace, if any.
    pub fn find_active_environment(&self, workspace_id: Uuid) -> Result<Option<Environment>> {
        let row = {
            let conn = self.lock();
            conn.query_row(
                &format!("{SELECT_ENVIRONMENT} WHERE workspace_id = ?1 AND is_active = 1"),
                [workspace_id.to_string()],
                environment_from_row,
            )
            .optional()?
        };
        row.map(|r| r.and_then(|e| self.decrypt_environment(e)))
            .transpose()
    }

    pub fn update_environment(&self, id: Uuid, patch: EnvironmentPatch) -> Result<Environment> {
        let current = self.find_environment(id)?;
        let name = patch.name.unwrap_or(current.name);
        let sort_order = patch.sort_order.unwrap_or(current.sort_order);
        let vault_synced = patch.vault_synced.unwrap_or(current.vault_synced);
        let vault_path = patch.vault_path.unwrap_or(current.vault_path);
        let variables = patch.variables.unwrap_or(current.variables);

        // Vault-synced environments persist an empty list unconditionally.
        let stored_variables = if vault_synced {
            Vec::new()
        } else {
            encrypt_variables(self.cipher(), &variables)?
        };

        let now = Self::now();
        let conn = self.lock();
        conn.execute(
            "UPDATE environments SET name = ?2, sort_order = ?3, variables = ?4,
                 vault_synced = ?5, vault_path = ?6, updated_at = ?7
             WHERE id = ?1",
            params![
                id.to_string(),
                name,
                sort_order,
                jsonx::encode(&stored_variables),
                vault_synced,
                vault_path,
                jsonx::encode_ts(&now)
            ],
        )?;
        drop(conn);
        self.find_environment(id)
    }

    pub fn remove_environment(&self, id: Uuid) -> Result<()> {
        let conn = self.lock();
        let affected = conn.execute("DELETE FROM environments WHERE id = ?1", [id.to_string()])?;
        if affected == 0 {
            return Err(StoreError::not_found("environment", id));
        }
        Ok(())
    }

    /// Copies an environment; the copy is never active.
    pub fn duplicate_environment(&self, id: Uuid) -> Result<Environment> {
        let source = self.find_environment(id)?;
        let copy = self.create_environment(source.workspace_id, &format!("{} (copy)", source.name))?;
        self.update_environment(
            copy.id,
            EnvironmentPatch {
                variables: Some(source.variables),
                vault_synced: Some(source.vault_synced),
                vault_path: Some(source.vault_path),
                ..Default::default()
            },
        )
    }

    /// Activates one environment, transactionally clearing every other
    /// environment of the same workspace first.
    pub fn activate_environment(&self, id: Uuid) -> Result<()> {
        let env = self.find_environment(id)?;
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE environments SET is_active = 0 WHERE workspace_id = ?1",
            [env.workspace_id.to_string()],
        )?;
        tx.execute(
            "UPDATE environments SET is_active = 1 WHERE id = ?1",
            [id.to_string()],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Clears the active flag on one environment.
    pub fn deactivate_environment(&self, id: Uuid) -> Result<()> {
        let conn = self.lock();
        let affected = conn.execute(
            "UPDATE environments SET is_active = 0 WHERE id = ?1",
            [id.to_string()],
        )?;
        if affected == 0 {
            return Err(StoreError::not_found("environment", id));
        }
        Ok(())
    }

    pub fn reorder_environments(&self, ids: &[Uuid]) -> Result<()> {
        let now = Self::now();
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        for (index, id) in ids.iter().enumerate() {
            tx.execute(
                "UPDATE environments SET sort_order = ?2, updated_at = ?3 WHERE id = ?1",
                params![id.to_string(), index as i64, jsonx::encode_ts(&now)],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn decrypt_environment(&self, mut env: Environment) -> Result<Environment> {
        for var in &mut env.variables {
            var.value = self.cipher().decrypt_field(&var.value)?;
        }
        Ok(env)
    }
}

pub(crate) fn encrypt_variables(cipher: &FieldCipher, vars: &[Variable]) -> Result<Vec<Variable>> {
    vars.iter()
        .map(|v| {
            Ok(Variable {
                key: v.key.clone(),
                value: cipher.encrypt_field(&v.value)?,
                enabled: v.enabled,
            })
        })
        .collect()
}

const SELECT_ENVIRONMENT: &str = "SELECT id, workspace_id, name, is_active, sort_order,
    variables, vault_synced, vault_path, created_at, updated_at FROM environments";

fn environment_from_row(r: &Row<'_>) -> rusqlite::Result<Result<Environment>> {
    let id: String = r.get(0)?;
    let workspace_id: String = r.get(1)?;
    let name: String = r.get(2)?;
    let is_active: bool = r.get(3)?;
    let sort_order: i64 = r.get(4)?;
    let variables: String = r.get(5)?;
    let vault_synced: bool = r.get(6)?;
    let vault_path: Option<String> = r.get(7)?;
    let created_at: String = r.get(8)?;
    let updated_at: String = r.get(9)?;

    Ok((|| {
        Ok(Environment {
            id: parse_id("environment", &id)?,
            workspace_id: parse_id("workspace", &workspace_id)?,
            name,
            is_active,
            sort_order,
            variables: jsonx::decode("environments.variables", &variables)?,
            vault_synced,
            vault_path,
            created_at: parse_ts("environments.created_at", &created_at)?,
            updated_at: parse_ts("environments.updated_at", &updated_at)?,
        })
    })())
}
