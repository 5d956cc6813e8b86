//! Layered variable resolution with source attribution

use std::collections::BTreeMap;

use restbench_core::types::{ResolvedVariable, VariableSource};
use restbench_core::Result;
use restbench_store::Store;
use restbench_vault::SecretCache;
use tracing::debug;
use uuid::Uuid;

/// Resolves the effective variable map for a send context
#[derive(Clone)]
pub struct Resolver {
    store: Store,
    cache: SecretCache,
}

impl Resolver {
    pub fn new(store: Store, cache: SecretCache) -> Self {
        Self { store, cache }
    }

    /// Resolves variables with source attribution.
    ///
    /// Base map: enabled variables of the workspace's active environment
    /// (read through the secret cache when the environment is
    /// vault-synced). Overlay: collection variables, which win on clashes.
    pub async fn resolve(
        &self,
        workspace_id: Option<Uuid>,
        collection_id: Option<Uuid>,
    ) -> Result<BTreeMap<String, ResolvedVariable>> {
        let mut out: BTreeMap<String, ResolvedVariable> = BTreeMap::new();

        if let Some(ws) = workspace_id {
            if let Some(env) = self.store.find_active_environment(ws)? {
                let (variables, source) = if env.vault_synced {
                    self.cache.ensure_loaded(env.id, Some(ws)).await?;
                    (
                        self.cache.get_cached(env.id).unwrap_or_default(),
                        VariableSource::Vault,
                    )
                } else {
                    (env.variables, VariableSource::Environment)
                };
                for var in variables.into_iter().filter(|v| v.enabled) {
                    out.insert(
                        var.key,
                        ResolvedVariable {
                            value: var.value,
                            source,
                        },
                    );
                }
            }
        }

        if let Some(cid) = collection_id {
            let collection = self.store.find_collection(cid)?;
            for (name, value) in collection.variables {
                out.insert(
                    name,
                    ResolvedVariable {
                        value,
                        source: VariableSource::Collection,
                    },
                );
            }
        }

        debug!(count = out.len(), "Resolved variables");
        Ok(out)
    }

    /// Flat `name -> value` view of [`resolve`].
    ///
    /// [`resolve`]: Resolver::resolve
    pub async fn resolve_values(
        &self,
        workspace_id: Option<Uuid>,
        collection_id: Option<Uuid>,
    ) -> Result<BTreeMap<String, String>> {
        Ok(self
            .resolve(workspace_id, collection_id)
            .await?
            .into_iter()
            .map(|(name, resolved)| (name, resolved.value))
            .collect())
    }
}
