//! Provider settings resolved through the scoped settings tiers

use restbench_store::Store;
use uuid::Uuid;

use crate::error::{ProviderError, Result};

/// Authentication mode for the KV driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VaultAuth {
    /// Static service token.
    Token(String),
    /// Role-id/secret-id pair exchanged for a short-lived token.
    AppRole { role_id: String, secret_id: String },
}

/// Resolved driver configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultSettings {
    pub url: String,
    pub mount: String,
    /// Sent only with the login call; data operations never carry it.
    pub namespace: Option<String>,
    pub verify_ssl: bool,
    pub auth: VaultAuth,
}

impl VaultSettings {
    /// Loads the configuration for a workspace scope, with each key
    /// falling back from workspace to global.
    ///
    /// Returns `Ok(None)` when no URL is configured at all — callers treat
    /// that as "vault not in use", not an error.
    pub fn load(store: &Store, workspace_id: Option<Uuid>) -> Result<Option<Self>> {
        let get = |key: &str| -> Result<Option<String>> {
            store
                .get_setting(key, workspace_id)
                .map_err(|e| ProviderError::Config(e.to_string()))
        };

        let Some(url) = get("vault.url")?.filter(|u| !u.is_empty()) else {
            return Ok(None);
        };

        let auth = match get("vault.auth_method")?.as_deref() {
            Some("role") => {
                let role_id = get("vault.role_id")?.unwrap_or_default();
                let secret_id = get("vault.secret_id")?.unwrap_or_default();
                if role_id.is_empty() || secret_id.is_empty() {
                    return Err(ProviderError::Config(
                        "Role auth selected but role_id/secret_id are not set".to_string(),
                    ));
                }
                VaultAuth::AppRole { role_id, secret_id }
            }
            _ => {
                let token = get("vault.token")?.unwrap_or_default();
                if token.is_empty() {
                    return Err(ProviderError::Config(
                        "Token auth selected but no token is set".to_string(),
                    ));
                }
                VaultAuth::Token(token)
            }
        };

        Ok(Some(Self {
            url: url.trim_end_matches('/').to_string(),
            mount: get("vault.mount")?.unwrap_or_else(|| "secret".to_string()),
            namespace: get("vault.namespace")?.filter(|n| !n.is_empty()),
            verify_ssl: get("vault.verify_ssl")?.as_deref() != Some("false"),
            auth,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use restbench_crypto::cipher::MasterKey;
    use restbench_crypto::FieldCipher;

    fn store() -> Store {
        let cipher = FieldCipher::new(MasterKey::from_bytes(&[3u8; 32]).unwrap());
        Store::open_in_memory(cipher).unwrap()
    }

    #[test]
    fn test_absent_url_is_none() {
        let store = store();
        assert_eq!(VaultSettings::load(&store, None).unwrap(), None);
    }

    #[test]
    fn test_token_mode_with_global_settings() {
        let store = store();
        store
            .set_global_setting("vault.url", "https://vault.example.com/")
            .unwrap();
        store.set_global_setting("vault.token", "s.abc").unwrap();
        store.set_global_setting("vault.mount", "kv").unwrap();

        let cfg = VaultSettings::load(&store, None).unwrap().unwrap();
        assert_eq!(cfg.url, "https://vault.example.com");
        assert_eq!(cfg.mount, "kv");
        assert!(cfg.verify_ssl);
        assert_eq!(cfg.auth, VaultAuth::Token("s.abc".into()));
    }

    #[test]
    fn test_workspace_scope_overrides_global() {
        let store = store();
        let ws = store.create_workspace("WS").unwrap();
        store
            .set_global_setting("vault.url", "https://global.example.com")
            .unwrap();
        store.set_global_setting("vault.token", "s.global").unwrap();
        store
            .set_workspace_setting(ws.id, "vault.url", "https://scoped.example.com")
            .unwrap();

        let cfg = VaultSettings::load(&store, Some(ws.id)).unwrap().unwrap();
        assert_eq!(cfg.url, "https://scoped.example.com");
        assert_eq!(cfg.auth, VaultAuth::Token("s.global".into()));
    }

    #[test]
    fn test_role_mode_requires_both_ids() {
        let store = store();
        store
            .set_global_setting("vault.url", "https://vault.example.com")
            .unwrap();
        store.set_global_setting("vault.auth_method", "role").unwrap();
        store.set_global_setting("vault.role_id", "r-1").unwrap();
        assert!(matches!(
            VaultSettings::load(&store, None),
            Err(ProviderError::Config(_))
        ));

        store.set_global_setting("vault.secret_id", "s-1").unwrap();
        let cfg = VaultSettings::load(&store, None).unwrap().unwrap();
        assert_eq!(
            cfg.auth,
            VaultAuth::AppRole {
                role_id: "r-1".into(),
                secret_id: "s-1".into()
            }
        );
    }

    #[test]
    fn test_verify_ssl_false() {
        let store = store();
        store
            .set_global_setting("vault.url", "https://vault.example.com")
            .unwrap();
        store.set_global_setting("vault.token", "s.abc").unwrap();
        store.set_global_setting("vault.verify_ssl", "false").unwrap();
        let cfg = VaultSettings::load(&store, None).unwrap().unwrap();
        assert!(!cfg.verify_ssl);
    }
}
