//! Session-lifetime secret cache and provider registry
//!
//! The cache is the only place vault-backed environment values exist
//! locally. It is process memory behind a mutex, never serialized, and
//! cleared whenever a provider-parameterizing setting changes.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use restbench_core::traits::ProviderInvalidation;
use restbench_core::types::Variable;
use restbench_store::Store;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::VaultSettings;
use crate::error::{ProviderError, Result};
use crate::kv::KvDriver;
use crate::provider::SecretProvider;

/// Provider registry key: the workspace scope, `None` being global.
type ProviderKey = Option<Uuid>;

/// In-memory secret cache
///
/// Shared handle; clone freely. All mutation goes through these methods,
/// each serialized under a short-lived mutex with no I/O held.
#[derive(Clone)]
pub struct SecretCache {
    store: Store,
    inner: Arc<Inner>,
}

struct Inner {
    providers: Mutex<HashMap<ProviderKey, Arc<dyn SecretProvider>>>,
    secrets: Mutex<HashMap<Uuid, Vec<Variable>>>,
}

impl SecretCache {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            inner: Arc::new(Inner {
                providers: Mutex::new(HashMap::new()),
                secrets: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Resolves (and caches) the provider for a workspace scope.
    ///
    /// `Err(Config)` when vault is not configured for the scope.
    pub fn provider(&self, workspace_id: Option<Uuid>) -> Result<Arc<dyn SecretProvider>> {
        {
            let providers = self.lock_providers();
            if let Some(existing) = providers.get(&workspace_id) {
                return Ok(existing.clone());
            }
        }
        let settings = VaultSettings::load(&self.store, workspace_id)?.ok_or_else(|| {
            ProviderError::Config("Vault is not configured for this workspace".to_string())
        })?;
        let driver: Arc<dyn SecretProvider> = Arc::new(KvDriver::new(settings)?);
        self.lock_providers().insert(workspace_id, driver.clone());
        Ok(driver)
    }

    /// Injects a provider instance for a scope; used by tests and by
    /// shells that construct drivers themselves.
    pub fn set_provider(&self, workspace_id: Option<Uuid>, provider: Arc<dyn SecretProvider>) {
        self.lock_providers().insert(workspace_id, provider);
    }

    /// Fetches variables for an environment from the provider and caches
    /// them. The environment's vault path (or name slug) selects the
    /// remote path.
    pub async fn fetch_variables(
        &self,
        environment_id: Uuid,
        workspace_id: Option<Uuid>,
    ) -> Result<Vec<Variable>> {
        let env = self
            .store
            .find_environment(environment_id)
            .map_err(|e| ProviderError::Config(e.to_string()))?;
        let provider = self.provider(workspace_id.or(Some(env.workspace_id)))?;
        let secrets = provider.get_secrets(&env.sync_hint()).await?;
        let variables: Vec<Variable> = secrets
            .into_iter()
            .map(|(key, value)| Variable::new(key, value))
            .collect();
        self.lock_secrets()
            .insert(environment_id, variables.clone());
        debug!(%environment_id, count = variables.len(), "Cached vault variables");
        Ok(variables)
    }

    /// Pushes the enabled entries to the provider and updates the cache
    /// with the full list.
    pub async fn push_variables(
        &self,
        environment_id: Uuid,
        variables: &[Variable],
        workspace_id: Option<Uuid>,
    ) -> Result<()> {
        let env = self
            .store
            .find_environment(environment_id)
            .map_err(|e| ProviderError::Config(e.to_string()))?;
        let provider = self.provider(workspace_id.or(Some(env.workspace_id)))?;
        let payload: BTreeMap<String, String> = variables
            .iter()
            .filter(|v| v.enabled)
            .map(|v| (v.key.clone(), v.value.clone()))
            .collect();
        provider.put_secrets(&env.sync_hint(), &payload).await?;
        self.lock_secrets()
            .insert(environment_id, variables.to_vec());
        Ok(())
    }

    /// Removes the remote secrets and drops the cache entry.
    pub async fn delete_secrets(
        &self,
        environment_id: Uuid,
        workspace_id: Option<Uuid>,
    ) -> Result<()> {
        let env = self
            .store
            .find_environment(environment_id)
            .map_err(|e| ProviderError::Config(e.to_string()))?;
        let provider = self.provider(workspace_id.or(Some(env.workspace_id)))?;
        provider.delete_secrets(&env.sync_hint()).await?;
        self.lock_secrets().remove(&environment_id);
        Ok(())
    }

    /// Fetches only when the environment is not cached yet; idempotent.
    pub async fn ensure_loaded(
        &self,
        environment_id: Uuid,
        workspace_id: Option<Uuid>,
    ) -> Result<()> {
        if self.lock_secrets().contains_key(&environment_id) {
            return Ok(());
        }
        self.fetch_variables(environment_id, workspace_id).await?;
        Ok(())
    }

    /// Synchronous cache read; absent when not loaded this session.
    pub fn get_cached(&self, environment_id: Uuid) -> Option<Vec<Variable>> {
        self.lock_secrets().get(&environment_id).cloned()
    }

    /// In-place cache update, used by the script executor's write path.
    pub fn set_cached(&self, environment_id: Uuid, variables: Vec<Variable>) {
        self.lock_secrets().insert(environment_id, variables);
    }

    /// Startup warm-up: preloads the cache for every workspace whose
    /// active environment is vault-synced and has `vault.auto_sync` on.
    ///
    /// An unconfigured vault is silently skipped; real failures are
    /// logged and never abort startup.
    pub async fn auto_sync_at_startup(&self) {
        let workspaces = match self.store.list_workspaces() {
            Ok(all) => all,
            Err(e) => {
                warn!(error = %e, "Vault auto-sync could not list workspaces");
                return;
            }
        };
        for workspace in workspaces {
            let enabled = matches!(
                self.store.get_setting("vault.auto_sync", Some(workspace.id)),
                Ok(Some(ref v)) if v == "true"
            );
            if !enabled {
                continue;
            }
            let env = match self.store.find_active_environment(workspace.id) {
                Ok(Some(env)) if env.vault_synced => env,
                Ok(_) => continue,
                Err(e) => {
                    warn!(error = %e, "Vault auto-sync could not read environments");
                    continue;
                }
            };
            match self.ensure_loaded(env.id, Some(workspace.id)).await {
                Ok(()) => debug!(environment = %env.name, "Vault auto-sync loaded"),
                Err(ProviderError::Config(_)) => {}
                Err(e) => warn!(environment = %env.name, error = %e, "Vault auto-sync failed"),
            }
        }
    }

    /// Drops the provider for a scope and clears every cached secret.
    pub fn reset_provider(&self, workspace_id: Option<Uuid>) {
        self.lock_providers().remove(&workspace_id);
        self.lock_secrets().clear();
        info!(?workspace_id, "Reset secret provider and cleared cache");
    }

    fn lock_providers(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<ProviderKey, Arc<dyn SecretProvider>>> {
        self.inner
            .providers
            .lock()
            .expect("provider registry lock poisoned")
    }

    fn lock_secrets(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, Vec<Variable>>> {
        self.inner.secrets.lock().expect("secret cache lock poisoned")
    }
}

impl ProviderInvalidation for SecretCache {
    fn reset_provider(&self, workspace_id: Option<Uuid>) {
        SecretCache::reset_provider(self, workspace_id);
    }
}

impl std::fmt::Debug for SecretCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print cached values.
        f.debug_struct("SecretCache")
            .field("environments", &self.lock_secrets().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use restbench_crypto::cipher::MasterKey;
    use restbench_crypto::FieldCipher;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn store() -> Store {
        let cipher = FieldCipher::new(MasterKey::from_bytes(&[3u8; 32]).unwrap());
        Store::open_in_memory(cipher).unwrap()
    }

    /// Provider over a shared in-memory map, counting reads.
    #[derive(Default)]
    struct MapProvider {
        map: Mutex<HashMap<String, BTreeMap<String, String>>>,
        reads: AtomicUsize,
    }

    #[async_trait]
    impl SecretProvider for MapProvider {
        async fn test_connection(&self) -> (bool, String) {
            (true, "ok".into())
        }
        async fn list_secrets(&self, prefix: &str) -> Result<Vec<String>> {
            Ok(self
                .map
                .lock()
                .unwrap()
                .keys()
                .filter(|k| k.starts_with(prefix))
                .cloned()
                .collect())
        }
        async fn get_secrets(&self, path: &str) -> Result<BTreeMap<String, String>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.map
                .lock()
                .unwrap()
                .get(path)
                .cloned()
                .ok_or_else(|| ProviderError::NotFound(path.to_string()))
        }
        async fn put_secrets(&self, path: &str, secrets: &BTreeMap<String, String>) -> Result<()> {
            self.map
                .lock()
                .unwrap()
                .insert(path.to_string(), secrets.clone());
            Ok(())
        }
        async fn delete_secrets(&self, path: &str) -> Result<()> {
            self.map.lock().unwrap().remove(path);
            Ok(())
        }
    }

    fn vault_env(store: &Store) -> (Uuid, Uuid) {
        let ws = store.create_workspace("WS").unwrap();
        let env = store.create_environment(ws.id, "prod").unwrap();
        store
            .update_environment(
                env.id,
                restbench_store::environments::EnvironmentPatch {
                    vault_synced: Some(true),
                    vault_path: Some(Some("kv/prod".into())),
                    ..Default::default()
                },
            )
            .unwrap();
        (ws.id, env.id)
    }

    #[tokio::test]
    async fn test_push_fetch_round_trip_never_touches_db() {
        let store = store();
        let (ws, env) = vault_env(&store);
        let cache = SecretCache::new(store.clone());
        let provider = Arc::new(MapProvider::default());
        cache.set_provider(Some(ws), provider);

        cache
            .push_variables(env, &[Variable::new("token", "T1")], Some(ws))
            .await
            .unwrap();

        // DB row stays empty.
        assert!(store.find_environment(env).unwrap().variables.is_empty());

        // Simulate restart: fresh cache, same provider state.
        let restarted = SecretCache::new(store.clone());
        restarted.set_provider(
            Some(ws),
            cache.provider(Some(ws)).unwrap(),
        );
        restarted.ensure_loaded(env, Some(ws)).await.unwrap();
        let vars = restarted.get_cached(env).unwrap();
        assert_eq!(vars.len(), 1);
        assert_eq!(vars[0].key, "token");
        assert_eq!(vars[0].value, "T1");
    }

    #[tokio::test]
    async fn test_ensure_loaded_is_idempotent() {
        let store = store();
        let (ws, env) = vault_env(&store);
        let cache = SecretCache::new(store);
        let provider = Arc::new(MapProvider::default());
        provider
            .put_secrets("kv/prod", &BTreeMap::from([("k".into(), "v".into())]))
            .await
            .unwrap();
        cache.set_provider(Some(ws), provider.clone());

        cache.ensure_loaded(env, Some(ws)).await.unwrap();
        cache.ensure_loaded(env, Some(ws)).await.unwrap();
        assert_eq!(provider.reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_push_skips_disabled_entries() {
        let store = store();
        let (ws, env) = vault_env(&store);
        let cache = SecretCache::new(store);
        let provider = Arc::new(MapProvider::default());
        cache.set_provider(Some(ws), provider.clone());

        let mut disabled = Variable::new("off", "x");
        disabled.enabled = false;
        cache
            .push_variables(env, &[Variable::new("on", "1"), disabled.clone()], Some(ws))
            .await
            .unwrap();

        let remote = provider.map.lock().unwrap().get("kv/prod").cloned().unwrap();
        assert!(remote.contains_key("on"));
        assert!(!remote.contains_key("off"));

        // The cache keeps the full list, disabled entries included.
        let cached = cache.get_cached(env).unwrap();
        assert_eq!(cached.len(), 2);
    }

    #[tokio::test]
    async fn test_delete_clears_remote_and_cache() {
        let store = store();
        let (ws, env) = vault_env(&store);
        let cache = SecretCache::new(store);
        let provider = Arc::new(MapProvider::default());
        cache.set_provider(Some(ws), provider.clone());

        cache
            .push_variables(env, &[Variable::new("token", "T1")], Some(ws))
            .await
            .unwrap();
        cache.delete_secrets(env, Some(ws)).await.unwrap();

        assert!(cache.get_cached(env).is_none());
        assert!(provider.map.lock().unwrap().get("kv/prod").is_none());
    }

    #[tokio::test]
    async fn test_auto_sync_loads_active_vault_environment() {
        let store = store();
        let (ws, env) = vault_env(&store);
        store.activate_environment(env).unwrap();
        store
            .set_workspace_setting(ws, "vault.auto_sync", "true")
            .unwrap();

        let cache = SecretCache::new(store.clone());
        let provider = Arc::new(MapProvider::default());
        provider
            .put_secrets("kv/prod", &BTreeMap::from([("token".into(), "T1".into())]))
            .await
            .unwrap();
        cache.set_provider(Some(ws), provider);

        cache.auto_sync_at_startup().await;
        assert_eq!(cache.get_cached(env).unwrap()[0].value, "T1");
    }

    #[tokio::test]
    async fn test_auto_sync_silent_when_unconfigured() {
        let store = store();
        let (ws, env) = vault_env(&store);
        store.activate_environment(env).unwrap();
        store
            .set_workspace_setting(ws, "vault.auto_sync", "true")
            .unwrap();

        // No provider registered and no vault settings: startup swallows
        // the missing configuration.
        let cache = SecretCache::new(store);
        cache.auto_sync_at_startup().await;
        assert!(cache.get_cached(env).is_none());
    }

    #[tokio::test]
    async fn test_reset_provider_flushes_everything() {
        let store = store();
        let (ws, env) = vault_env(&store);
        let cache = SecretCache::new(store);
        let provider = Arc::new(MapProvider::default());
        cache.set_provider(Some(ws), provider);
        cache.set_cached(env, vec![Variable::new("k", "v")]);

        cache.reset_provider(Some(ws));
        assert!(cache.get_cached(env).is_none());
        // Provider must be rebuilt on next use; with no settings that is a
        // configuration error.
        assert!(matches!(
            cache.provider(Some(ws)),
            Err(ProviderError::Config(_))
        ));
    }
}
