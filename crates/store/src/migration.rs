//! One-time encryption sweep
//!
//! Databases written before field encryption existed carry plaintext
//! sensitive fields. On first startup after the upgrade, every sensitive
//! field is walked and encrypted unless it already carries the sentinel;
//! a marker flag makes the sweep run exactly once.

use restbench_core::constants::SENSITIVE_SETTING_KEYS;
use rusqlite::params;
use tracing::info;

use crate::db::Store;
use crate::error::Result;
use crate::jsonx;
use crate::requests::encrypt_auth;
use crate::workspaces::parse_id;

const MIGRATED_FLAG: &str = "encryption.migrated";

impl Store {
    /// Runs the sweep if the marker flag is absent.
    ///
    /// Safe to call on every startup; the sentinel guard makes re-encryption
    /// a no-op even if the marker is lost.
    pub fn run_encryption_migration(&self) -> Result<bool> {
        if self.get_internal_flag(MIGRATED_FLAG)?.is_some() {
            return Ok(false);
        }
        let mut touched = 0usize;
        touched += self.migrate_request_auth()?;
        touched += self.migrate_environment_variables()?;
        touched += self.migrate_sensitive_settings()?;
        touched += self.migrate_workspace_documents()?;
        self.set_internal_flag(MIGRATED_FLAG, "1")?;
        info!(touched, "Encryption migration complete");
        Ok(true)
    }

    fn migrate_request_auth(&self) -> Result<usize> {
        let rows: Vec<(String, String)> = {
            let conn = self.lock();
            let mut stmt = conn.prepare("SELECT id, auth FROM requests")?;
            let mapped = stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?;
            mapped.collect::<rusqlite::Result<_>>()?
        };
        let mut touched = 0;
        for (id, raw) in rows {
            let auth: restbench_core::types::AuthConfig = jsonx::decode("requests.auth", &raw)?;
            if !auth.has_credentials() {
                continue;
            }
            let encrypted = encrypt_auth(self.cipher(), &auth)?;
            let encoded = jsonx::encode(&encrypted);
            if encoded != raw {
                let conn = self.lock();
                conn.execute(
                    "UPDATE requests SET auth = ?2 WHERE id = ?1",
                    params![id, encoded],
                )?;
                touched += 1;
            }
        }
        Ok(touched)
    }

    fn migrate_environment_variables(&self) -> Result<usize> {
        let rows: Vec<(String, String)> = {
            let conn = self.lock();
            let mut stmt = conn.prepare("SELECT id, variables FROM environments")?;
            let mapped = stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?;
            mapped.collect::<rusqlite::Result<_>>()?
        };
        let mut touched = 0;
        for (id, raw) in rows {
            let vars: Vec<restbench_core::types::Variable> =
                jsonx::decode("environments.variables", &raw)?;
            if vars.is_empty() {
                continue;
            }
            let encrypted = crate::environments::encrypt_variables(self.cipher(), &vars)?;
            let encoded = jsonx::encode(&encrypted);
            if encoded != raw {
                let conn = self.lock();
                conn.execute(
                    "UPDATE environments SET variables = ?2 WHERE id = ?1",
                    params![id, encoded],
                )?;
                touched += 1;
            }
        }
        Ok(touched)
    }

    fn migrate_sensitive_settings(&self) -> Result<usize> {
        let mut touched = 0;
        for key in SENSITIVE_SETTING_KEYS {
            let raw = self.get_internal_flag(key)?;
            if let Some(value) = raw {
                if !restbench_crypto::FieldCipher::is_encrypted_field(&value) {
                    let encrypted = self.cipher().encrypt_field(&value)?;
                    self.set_internal_flag(key, &encrypted)?;
                    touched += 1;
                }
            }
        }
        Ok(touched)
    }

    fn migrate_workspace_documents(&self) -> Result<usize> {
        let rows: Vec<(String, String)> = {
            let conn = self.lock();
            let mut stmt = conn.prepare("SELECT id, settings FROM workspaces")?;
            let mapped = stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?;
            mapped.collect::<rusqlite::Result<_>>()?
        };
        let mut touched = 0;
        for (id, raw) in rows {
            let doc: serde_json::Value = jsonx::decode("workspaces.settings", &raw)?;
            let encrypted = self.encrypt_settings_doc(doc)?;
            let encoded = jsonx::encode(&encrypted);
            if encoded != raw {
                parse_id("workspace", &id)?;
                let conn = self.lock();
                conn.execute(
                    "UPDATE workspaces SET settings = ?2 WHERE id = ?1",
                    params![id, encoded],
                )?;
                touched += 1;
            }
        }
        Ok(touched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::test_store;

    #[test]
    fn test_sweep_encrypts_plaintext_rows_once() {
        let store = test_store();
        let ws = store.create_workspace("WS").unwrap();
        let cid = store.create_collection(Some(ws.id), "C").unwrap().id;
        let req = store
            .create_request(cid, None, "r", restbench_core::types::HttpMethod::Get)
            .unwrap();

        // Plant pre-migration plaintext rows directly.
        {
            let conn = store.lock();
            conn.execute(
                "UPDATE requests SET auth = ?2 WHERE id = ?1",
                params![
                    req.id.to_string(),
                    r#"{"type":"bearer","token":"plain-token"}"#
                ],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO settings (key, value) VALUES ('vault.token', 's.plain')",
                [],
            )
            .unwrap();
        }

        assert!(store.run_encryption_migration().unwrap());

        let raw_auth: String = store
            .lock()
            .query_row(
                "SELECT auth FROM requests WHERE id = ?1",
                [req.id.to_string()],
                |r| r.get(0),
            )
            .unwrap();
        assert!(raw_auth.contains("enc:"));
        assert!(!raw_auth.contains("plain-token"));

        let raw_setting = store.get_internal_flag("vault.token").unwrap().unwrap();
        assert!(raw_setting.starts_with("enc:"));

        // Values still read back as plaintext.
        assert_eq!(
            store.find_request(req.id).unwrap().auth,
            restbench_core::types::AuthConfig::Bearer {
                token: "plain-token".into()
            }
        );
        assert_eq!(
            store.get_global_setting("vault.token").unwrap().as_deref(),
            Some("s.plain")
        );

        // Second run is a marker-guarded no-op.
        assert!(!store.run_encryption_migration().unwrap());
    }
}
