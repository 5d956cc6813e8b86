//! Settings service with scoped fallback
//!
//! Two tiers: a flat global key/value table, and per-workspace values
//! stored as a nested document on the workspace row (dot-notation keys map
//! to nesting). Reads resolve `workspace[key] || global[key]`; writes pick
//! a tier explicitly.
//!
//! Sensitive keys are encrypted at rest and filtered from bulk reads;
//! read-only keys reject writes; mutating a provider-parameterizing key
//! resets the cached secret providers through the registered invalidation
//! hook.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use restbench_core::constants::{
    is_provider_invalidating, is_readonly_setting, is_sensitive_setting,
};
use restbench_core::traits::ProviderInvalidation;
use rusqlite::{params, OptionalExtension};
use tracing::debug;
use uuid::Uuid;

use crate::db::Store;
use crate::error::{Result, StoreError};
use crate::workspaces::WorkspacePatch;

/// Process-wide registration point for the provider invalidation hook.
///
/// The store is constructed before the vault registry exists, so the hook
/// arrives later via [`Store::set_provider_invalidation`].
#[derive(Clone, Default)]
pub(crate) struct InvalidationHook {
    inner: Arc<RwLock<Option<Arc<dyn ProviderInvalidation>>>>,
}

impl InvalidationHook {
    fn fire(&self, workspace_id: Option<Uuid>) {
        let guard = self.inner.read().expect("invalidation hook lock poisoned");
        if let Some(hook) = guard.as_ref() {
            hook.reset_provider(workspace_id);
        }
    }
}

impl Store {
    /// Registers the vault provider registry for settings-driven resets.
    pub fn set_provider_invalidation(&self, hook: Arc<dyn ProviderInvalidation>) {
        *self
            .invalidation
            .inner
            .write()
            .expect("invalidation hook lock poisoned") = Some(hook);
    }

    /// Reads a key with scoped fallback: workspace value first, then global.
    pub fn get_setting(&self, key: &str, workspace_id: Option<Uuid>) -> Result<Option<String>> {
        if let Some(ws) = workspace_id {
            if let Some(value) = self.get_workspace_setting(ws, key)? {
                return Ok(Some(value));
            }
        }
        self.get_global_setting(key)
    }

    pub fn get_global_setting(&self, key: &str) -> Result<Option<String>> {
        let raw = {
            let conn = self.lock();
            conn.query_row(
                "SELECT value FROM settings WHERE key = ?1",
                [key],
                |r| r.get::<_, String>(0),
            )
            .optional()?
        };
        match raw {
            // Sensitive rows written before the encryption migration are
            // plaintext; the tolerant decrypt covers both.
            Some(value) if is_sensitive_setting(key) => {
                Ok(Some(self.cipher().decrypt_field(&value)?))
            }
            other => Ok(other),
        }
    }

    pub fn set_global_setting(&self, key: &str, value: &str) -> Result<()> {
        reject_readonly(key)?;
        let stored = if is_sensitive_setting(key) {
            self.cipher().encrypt_field(value)?
        } else {
            value.to_string()
        };
        {
            let conn = self.lock();
            conn.execute(
                "INSERT INTO settings (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, stored],
            )?;
        }
        self.after_setting_changed(key, None);
        Ok(())
    }

    pub fn remove_global_setting(&self, key: &str) -> Result<()> {
        reject_readonly(key)?;
        {
            let conn = self.lock();
            conn.execute("DELETE FROM settings WHERE key = ?1", [key])?;
        }
        self.after_setting_changed(key, None);
        Ok(())
    }

    pub fn get_workspace_setting(&self, workspace_id: Uuid, key: &str) -> Result<Option<String>> {
        let workspace = self.find_workspace(workspace_id)?;
        Ok(lookup_path(&workspace.settings, key).and_then(|v| match v {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Bool(b) => Some(b.to_string()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }))
    }

    pub fn set_workspace_setting(&self, workspace_id: Uuid, key: &str, value: &str) -> Result<()> {
        reject_readonly(key)?;
        let workspace = self.find_workspace(workspace_id)?;
        let mut doc = workspace.settings;
        insert_path(&mut doc, key, serde_json::Value::String(value.to_string()))?;
        self.update_workspace(
            workspace_id,
            WorkspacePatch {
                settings: Some(doc),
                ..Default::default()
            },
        )?;
        self.after_setting_changed(key, Some(workspace_id));
        Ok(())
    }

    pub fn remove_workspace_setting(&self, workspace_id: Uuid, key: &str) -> Result<()> {
        reject_readonly(key)?;
        let workspace = self.find_workspace(workspace_id)?;
        let mut doc = workspace.settings;
        remove_path(&mut doc, key);
        self.update_workspace(
            workspace_id,
            WorkspacePatch {
                settings: Some(doc),
                ..Default::default()
            },
        )?;
        self.after_setting_changed(key, Some(workspace_id));
        Ok(())
    }

    /// Merged view for the shell: global keys overlaid by workspace keys,
    /// sensitive keys filtered out entirely.
    pub fn get_all_settings(&self, workspace_id: Option<Uuid>) -> Result<BTreeMap<String, String>> {
        let mut out = BTreeMap::new();
        {
            let conn = self.lock();
            let mut stmt = conn.prepare("SELECT key, value FROM settings")?;
            let rows = stmt.query_map([], |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
            })?;
            for row in rows {
                let (key, value) = row?;
                if !is_sensitive_setting(&key) {
                    out.insert(key, value);
                }
            }
        }
        if let Some(ws) = workspace_id {
            let workspace = self.find_workspace(ws)?;
            let mut flat = BTreeMap::new();
            flatten_doc(&workspace.settings, "", &mut flat);
            for (key, value) in flat {
                if !is_sensitive_setting(&key) {
                    out.insert(key, value);
                }
            }
        }
        Ok(out)
    }

    /// Internal marker flags (`encryption.migrated` etc.) bypass the
    /// read-only policy; they are not reachable from the settings surface.
    pub(crate) fn get_internal_flag(&self, key: &str) -> Result<Option<String>> {
        let conn = self.lock();
        Ok(conn
            .query_row("SELECT value FROM settings WHERE key = ?1", [key], |r| {
                r.get(0)
            })
            .optional()?)
    }

    pub(crate) fn set_internal_flag(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    fn after_setting_changed(&self, key: &str, workspace_id: Option<Uuid>) {
        if is_provider_invalidating(key) {
            debug!(key, ?workspace_id, "Provider-invalidating setting changed");
            self.invalidation.fire(workspace_id);
        }
    }
}

fn reject_readonly(key: &str) -> Result<()> {
    if is_readonly_setting(key) {
        return Err(StoreError::Validation(format!(
            "Setting '{key}' is read-only"
        )));
    }
    Ok(())
}

fn lookup_path<'a>(doc: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
    let mut node = doc;
    for segment in path.split('.') {
        node = node.as_object()?.get(segment)?;
    }
    Some(node)
}

fn insert_path(doc: &mut serde_json::Value, path: &str, value: serde_json::Value) -> Result<()> {
    if !doc.is_object() {
        *doc = serde_json::json!({});
    }
    let mut node = doc;
    let segments: Vec<&str> = path.split('.').collect();
    for (i, segment) in segments.iter().enumerate() {
        let map = node
            .as_object_mut()
            .ok_or_else(|| StoreError::Validation(format!("Setting path '{path}' collides with a non-object value")))?;
        if i == segments.len() - 1 {
            map.insert(segment.to_string(), value);
            return Ok(());
        }
        node = map
            .entry(segment.to_string())
            .or_insert_with(|| serde_json::json!({}));
    }
    Ok(())
}

fn remove_path(doc: &mut serde_json::Value, path: &str) {
    let segments: Vec<&str> = path.split('.').collect();
    let mut node = doc;
    for (i, segment) in segments.iter().enumerate() {
        let Some(map) = node.as_object_mut() else {
            return;
        };
        if i == segments.len() - 1 {
            map.remove(*segment);
            return;
        }
        match map.get_mut(*segment) {
            Some(child) => node = child,
            None => return,
        }
    }
}

fn flatten_doc(doc: &serde_json::Value, prefix: &str, out: &mut BTreeMap<String, String>) {
    if let serde_json::Value::Object(map) = doc {
        for (key, child) in map {
            let path = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{prefix}.{key}")
            };
            match child {
                serde_json::Value::Object(_) => flatten_doc(child, &path, out),
                serde_json::Value::String(s) => {
                    out.insert(path, s.clone());
                }
                serde_json::Value::Bool(b) => {
                    out.insert(path, b.to_string());
                }
                serde_json::Value::Number(n) => {
                    out.insert(path, n.to_string());
                }
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::test_store;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_scoped_fallback() {
        let store = test_store();
        let ws = store.create_workspace("WS").unwrap();
        store.set_global_setting("sync.branch", "main").unwrap();
        assert_eq!(
            store.get_setting("sync.branch", Some(ws.id)).unwrap().as_deref(),
            Some("main")
        );
        store
            .set_workspace_setting(ws.id, "sync.branch", "develop")
            .unwrap();
        assert_eq!(
            store.get_setting("sync.branch", Some(ws.id)).unwrap().as_deref(),
            Some("develop")
        );
        assert_eq!(
            store.get_setting("sync.branch", None).unwrap().as_deref(),
            Some("main")
        );
    }

    #[test]
    fn test_sensitive_global_setting_encrypted_and_filtered() {
        let store = test_store();
        store.set_global_setting("vault.token", "s.abcdef").unwrap();

        let raw: String = store
            .lock()
            .query_row(
                "SELECT value FROM settings WHERE key = 'vault.token'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert!(raw.starts_with("enc:"));

        assert_eq!(
            store.get_global_setting("vault.token").unwrap().as_deref(),
            Some("s.abcdef")
        );
        assert!(!store.get_all_settings(None).unwrap().contains_key("vault.token"));
    }

    #[test]
    fn test_pre_migration_plaintext_sensitive_row_reads() {
        let store = test_store();
        store
            .lock()
            .execute(
                "INSERT INTO settings (key, value) VALUES ('vault.token', 'plain-token')",
                [],
            )
            .unwrap();
        assert_eq!(
            store.get_global_setting("vault.token").unwrap().as_deref(),
            Some("plain-token")
        );
    }

    #[test]
    fn test_readonly_keys_rejected() {
        let store = test_store();
        assert!(matches!(
            store.set_global_setting("encryption.migrated", "1"),
            Err(StoreError::Validation(_))
        ));
        assert!(matches!(
            store.set_global_setting("app.version", "9.9.9"),
            Err(StoreError::Validation(_))
        ));
    }

    #[test]
    fn test_invalidation_hook_fires_for_vault_keys_only() {
        struct Counter(AtomicUsize);
        impl ProviderInvalidation for Counter {
            fn reset_provider(&self, _workspace_id: Option<Uuid>) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let store = test_store();
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        store.set_provider_invalidation(counter.clone());

        store.set_global_setting("app.theme", "dark").unwrap();
        assert_eq!(counter.0.load(Ordering::SeqCst), 0);

        store.set_global_setting("vault.mount", "kv").unwrap();
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);

        store.set_global_setting("vault.token", "s.x").unwrap();
        assert_eq!(counter.0.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_workspace_setting_nested_document() {
        let store = test_store();
        let ws = store.create_workspace("WS").unwrap();
        store
            .set_workspace_setting(ws.id, "sync.provider", "provider-b")
            .unwrap();
        let back = store.find_workspace(ws.id).unwrap();
        assert_eq!(back.settings["sync"]["provider"], "provider-b");

        store.remove_workspace_setting(ws.id, "sync.provider").unwrap();
        assert_eq!(
            store.get_workspace_setting(ws.id, "sync.provider").unwrap(),
            None
        );
    }
}
