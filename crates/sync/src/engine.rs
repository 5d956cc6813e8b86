//! Sync operations
//!
//! One pass over one collection: serialize, list the remote, classify
//! every path three-way, then apply — pushes and deletes in one atomic
//! commit, pulls in one store transaction, conflicts reported and left
//! untouched. Bulk operations collect per-collection errors and keep
//! going.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use restbench_core::model::Collection;
use restbench_core::types::FileSha;
use restbench_serializer::{
    deserialize_collection, serialize_collection, serialize_request_document, CollectionBundle,
    ImportedCollection,
};
use restbench_sessionlog::{LogCategory, SessionLog};
use restbench_store::import::{ImportBatch, ImportFolder, ImportRequest};
use restbench_store::Store;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::adapter::{AdapterConfig, GitAdapter, RemoteEntryKind};
use crate::error::{Result, SyncError};
use crate::github::GithubAdapter;
use crate::gitlab::GitlabAdapter;
use crate::hash::git_blob_sha1;
use crate::merge::{classify, FileAction, SyncDirection};

/// One collection's divergence report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncConflict {
    pub collection_id: Uuid,
    pub collection_name: String,
}

/// Per-collection result of one sync pass
#[derive(Debug, Clone, Default)]
pub struct SyncOutcome {
    pub pulled: usize,
    pub pushed: usize,
    pub conflict: Option<SyncConflict>,
}

/// Aggregate result of a bulk operation
#[derive(Debug, Clone, Default)]
pub struct SyncResult {
    pub success: bool,
    pub pulled: usize,
    pub pushed: usize,
    pub conflicts: Vec<SyncConflict>,
    pub errors: Vec<String>,
}

impl SyncResult {
    fn absorb(&mut self, outcome: SyncOutcome) {
        self.pulled += outcome.pulled;
        self.pushed += outcome.pushed;
        self.conflicts.extend(outcome.conflict);
    }

    fn finish(mut self) -> Self {
        self.success = self.errors.is_empty();
        self
    }
}

/// Three-way merge sync engine
pub struct SyncEngine {
    store: Store,
    log: SessionLog,
    adapters: Mutex<HashMap<Option<Uuid>, Arc<dyn GitAdapter>>>,
}

impl SyncEngine {
    pub fn new(store: Store, log: SessionLog) -> Self {
        Self {
            store,
            log,
            adapters: Mutex::new(HashMap::new()),
        }
    }

    /// Injects an adapter for a workspace scope; tests and shells that
    /// build adapters themselves use this instead of settings resolution.
    pub fn set_adapter(&self, workspace_id: Option<Uuid>, adapter: Arc<dyn GitAdapter>) {
        self.lock_adapters().insert(workspace_id, adapter);
    }

    /// Resolves the adapter for a scope from settings
    /// (`sync.provider`/`sync.repository`/`sync.token`/`sync.branch`,
    /// workspace tier first).
    fn adapter_for(&self, workspace_id: Option<Uuid>) -> Result<Arc<dyn GitAdapter>> {
        if let Some(existing) = self.lock_adapters().get(&workspace_id) {
            return Ok(existing.clone());
        }
        let get = |key: &str| self.store.get_setting(key, workspace_id);
        let repository = get("sync.repository")?
            .filter(|r| !r.is_empty())
            .ok_or_else(|| SyncError::Config("sync.repository is not set".to_string()))?;
        let token = get("sync.token")?
            .filter(|t| !t.is_empty())
            .ok_or_else(|| SyncError::Config("sync.token is not set".to_string()))?;
        let config = AdapterConfig {
            repository,
            token,
            branch: get("sync.branch")?.unwrap_or_else(|| "main".to_string()),
            api_base: None,
        };
        let adapter: Arc<dyn GitAdapter> = match get("sync.provider")?.as_deref() {
            Some("gitlab") => Arc::new(GitlabAdapter::new(config)?),
            _ => Arc::new(GithubAdapter::new(config)?),
        };
        self.lock_adapters().insert(workspace_id, adapter.clone());
        Ok(adapter)
    }

    /// True when the configured remote is reachable.
    pub async fn test_connection(&self, workspace_id: Option<Uuid>) -> Result<bool> {
        Ok(self.adapter_for(workspace_id)?.test_connection().await)
    }

    // ── Bulk operations ──

    /// Pull-only pass over every sync-enabled collection in scope.
    pub async fn pull(&self, workspace_id: Option<Uuid>) -> SyncResult {
        self.bulk(workspace_id, SyncDirection::PullOnly, false).await
    }

    /// Bidirectional pass over every dirty or never-synced collection in
    /// scope.
    pub async fn push_all(&self, workspace_id: Option<Uuid>) -> SyncResult {
        let mut result = SyncResult::default();
        for ws in self.scopes(workspace_id, &mut result) {
            let collections = match self.store.list_pushable_collections(ws) {
                Ok(c) => c,
                Err(e) => {
                    result.errors.push(e.to_string());
                    continue;
                }
            };
            for collection in collections {
                self.run_one(collection, ws, SyncDirection::Bidirectional, false, &mut result)
                    .await;
            }
        }
        result.finish()
    }

    async fn bulk(
        &self,
        workspace_id: Option<Uuid>,
        direction: SyncDirection,
        sanitize: bool,
    ) -> SyncResult {
        let mut result = SyncResult::default();
        for ws in self.scopes(workspace_id, &mut result) {
            let collections = match self.store.list_collections(ws) {
                Ok(c) => c,
                Err(e) => {
                    result.errors.push(e.to_string());
                    continue;
                }
            };
            for collection in collections.into_iter().filter(|c| c.sync_enabled) {
                self.run_one(collection, ws, direction, sanitize, &mut result)
                    .await;
            }
        }
        result.finish()
    }

    /// Workspace scopes to walk: the requested one, or every workspace
    /// plus the detached (`None`) scope.
    fn scopes(&self, workspace_id: Option<Uuid>, result: &mut SyncResult) -> Vec<Option<Uuid>> {
        match workspace_id {
            Some(ws) => vec![Some(ws)],
            None => match self.store.list_workspaces() {
                Ok(all) => {
                    let mut scopes: Vec<Option<Uuid>> =
                        all.into_iter().map(|w| Some(w.id)).collect();
                    scopes.push(None);
                    scopes
                }
                Err(e) => {
                    result.errors.push(e.to_string());
                    Vec::new()
                }
            },
        }
    }

    async fn run_one(
        &self,
        collection: Collection,
        workspace_id: Option<Uuid>,
        direction: SyncDirection,
        sanitize: bool,
        result: &mut SyncResult,
    ) {
        let name = collection.name.clone();
        match self
            .sync_collection(collection.id, workspace_id, direction, sanitize)
            .await
        {
            Ok(outcome) => result.absorb(outcome),
            Err(e) => {
                warn!(collection = %name, error = %e, "Sync failed");
                self.log
                    .push(LogCategory::Sync, "sync", name.clone(), e.to_string(), false);
                result.errors.push(format!("{name}: {e}"));
            }
        }
    }

    // ── Single-collection operations ──

    /// Pulls one collection (pull-only pass).
    pub async fn pull_single_collection(
        &self,
        collection_id: Uuid,
        workspace_id: Option<Uuid>,
    ) -> Result<SyncOutcome> {
        self.sync_collection(collection_id, workspace_id, SyncDirection::PullOnly, false)
            .await
    }

    /// Pushes one collection (bidirectional pass).
    pub async fn push_collection(
        &self,
        collection_id: Uuid,
        sanitize: bool,
        workspace_id: Option<Uuid>,
    ) -> Result<SyncOutcome> {
        self.sync_collection(
            collection_id,
            workspace_id,
            SyncDirection::Bidirectional,
            sanitize,
        )
        .await
    }

    /// One full three-way pass over one collection.
    pub async fn sync_collection(
        &self,
        collection_id: Uuid,
        workspace_id: Option<Uuid>,
        direction: SyncDirection,
        sanitize: bool,
    ) -> Result<SyncOutcome> {
        let (collection, bundle) = self.assemble(collection_id)?;
        let scope = workspace_id.or(collection.workspace_id);
        let adapter = self.adapter_for(scope)?;

        let local_files = serialize_collection(&bundle, sanitize)?;
        let local_hashes: BTreeMap<String, String> = local_files
            .iter()
            .map(|(path, content)| (path.clone(), git_blob_sha1(content)))
            .collect();

        let remote: BTreeMap<String, String> = adapter
            .list_directory_recursive(&collection.id.to_string())
            .await?
            .into_iter()
            .filter(|e| e.kind == RemoteEntryKind::File)
            .map(|e| (e.path, e.id))
            .collect();

        let synced_before = collection.remote_synced_at.is_some();
        let mut paths: Vec<String> = local_files.keys().cloned().collect();
        for path in remote.keys() {
            if !local_files.contains_key(path) {
                paths.push(path.clone());
            }
        }
        for path in collection.file_shas.keys() {
            if !local_files.contains_key(path) && !remote.contains_key(path) {
                paths.push(path.clone());
            }
        }

        let mut actions: Vec<(String, FileAction)> = Vec::with_capacity(paths.len());
        for path in paths {
            let action = classify(
                collection.file_shas.get(&path),
                local_hashes.get(&path).map(String::as_str),
                remote.get(&path).map(String::as_str),
                direction,
                synced_before,
            );
            actions.push((path, action));
        }

        if actions.iter().any(|(_, a)| *a == FileAction::Conflict) {
            let conflict = SyncConflict {
                collection_id: collection.id,
                collection_name: collection.name.clone(),
            };
            self.log.push(
                LogCategory::Sync,
                "conflict",
                collection.name.clone(),
                "Local and remote changes diverge",
                false,
            );
            return Ok(SyncOutcome {
                pulled: 0,
                pushed: 0,
                conflict: Some(conflict),
            });
        }

        let push_allowed = direction == SyncDirection::Bidirectional;
        let mut skipped_pushes = false;
        let mut writes: BTreeMap<String, String> = BTreeMap::new();
        let mut remote_deletes: Vec<String> = Vec::new();
        let mut pulls: Vec<String> = Vec::new();
        let mut local_deletes: Vec<String> = Vec::new();
        let mut new_shas: BTreeMap<String, FileSha> = BTreeMap::new();

        for (path, action) in &actions {
            match action {
                FileAction::Noop => {
                    if let Some(existing) = collection.file_shas.get(path) {
                        new_shas.insert(path.clone(), existing.clone());
                    }
                }
                FileAction::RecordBase => {
                    let hash = &local_hashes[path];
                    new_shas.insert(
                        path.clone(),
                        FileSha {
                            content_hash: hash.clone(),
                            remote_sha: hash.clone(),
                            commit_sha: None,
                        },
                    );
                }
                FileAction::Push => {
                    if push_allowed {
                        writes.insert(path.clone(), local_files[path].clone());
                    } else {
                        skipped_pushes = true;
                        if let Some(existing) = collection.file_shas.get(path) {
                            new_shas.insert(path.clone(), existing.clone());
                        }
                    }
                }
                FileAction::PushDelete => {
                    if push_allowed {
                        remote_deletes.push(path.clone());
                    } else {
                        skipped_pushes = true;
                        if let Some(existing) = collection.file_shas.get(path) {
                            new_shas.insert(path.clone(), existing.clone());
                        }
                    }
                }
                FileAction::Pull => pulls.push(path.clone()),
                FileAction::PullDelete => local_deletes.push(path.clone()),
                FileAction::ClearBase => {}
                FileAction::Conflict => unreachable!("conflicts returned above"),
            }
        }

        // Remote side first: one atomic commit for every push and delete.
        let mut commit_id: Option<String> = None;
        if !writes.is_empty() || !remote_deletes.is_empty() {
            let message = format!("Sync collection '{}'", collection.name);
            let id = adapter
                .commit_multiple_files(&writes, &remote_deletes, &message)
                .await?;
            for path in writes.keys() {
                let hash = &local_hashes[path];
                new_shas.insert(
                    path.clone(),
                    FileSha {
                        content_hash: hash.clone(),
                        remote_sha: hash.clone(),
                        commit_sha: Some(id.clone()),
                    },
                );
            }
            commit_id = Some(id);
        }

        // Local side: overlay pulled files onto the local tree, drop
        // remote-deleted ones, reimport in one transaction.
        let pulled_count = pulls.len() + local_deletes.len();
        if pulled_count > 0 {
            let mut merged = local_files.clone();
            for path in &local_deletes {
                merged.remove(path);
            }
            for path in &pulls {
                let file = adapter.get_file(path).await?;
                new_shas.insert(
                    path.clone(),
                    FileSha {
                        content_hash: file.blob_id.clone(),
                        remote_sha: file.blob_id.clone(),
                        commit_sha: file.last_commit_id.clone(),
                    },
                );
                merged.insert(path.clone(), file.content);
            }
            let imported = deserialize_collection(&merged)?;
            let batch = self.import_batch(collection.workspace_id, imported)?;
            self.store.import_collection(collection.id, &batch)?;
            info!(collection = %collection.name, pulled = pulled_count, "Pulled");
        }

        let remote_sha = commit_id.clone().or_else(|| collection.remote_sha.clone());
        self.store
            .record_sync_state(collection.id, &new_shas, remote_sha.as_deref(), !skipped_pushes)?;

        let pushed_count = writes.len() + remote_deletes.len();
        if pushed_count > 0 {
            self.log.push(
                LogCategory::Sync,
                "push",
                collection.name.clone(),
                format!("Pushed {pushed_count} file(s)"),
                true,
            );
        }
        if pulled_count > 0 {
            self.log.push(
                LogCategory::Sync,
                "pull",
                collection.name.clone(),
                format!("Pulled {pulled_count} file(s)"),
                true,
            );
        }
        debug!(pushed = pushed_count, pulled = pulled_count, "Sync pass complete");

        Ok(SyncOutcome {
            pulled: pulled_count,
            pushed: pushed_count,
            conflict: None,
        })
    }

    /// Pushes local content over the remote for every path, conflicts
    /// included.
    pub async fn force_keep_local(
        &self,
        collection_id: Uuid,
        workspace_id: Option<Uuid>,
    ) -> Result<SyncOutcome> {
        let (collection, bundle) = self.assemble(collection_id)?;
        let adapter = self.adapter_for(workspace_id.or(collection.workspace_id))?;

        let local_files = serialize_collection(&bundle, false)?;
        let remote_paths: Vec<String> = adapter
            .list_directory_recursive(&collection.id.to_string())
            .await?
            .into_iter()
            .filter(|e| e.kind == RemoteEntryKind::File)
            .map(|e| e.path)
            .collect();
        let deletes: Vec<String> = remote_paths
            .into_iter()
            .filter(|p| !local_files.contains_key(p))
            .collect();

        let message = format!("Sync collection '{}' (keep local)", collection.name);
        let commit_id = adapter
            .commit_multiple_files(&local_files, &deletes, &message)
            .await?;

        let new_shas: BTreeMap<String, FileSha> = local_files
            .iter()
            .map(|(path, content)| {
                let hash = git_blob_sha1(content);
                (
                    path.clone(),
                    FileSha {
                        content_hash: hash.clone(),
                        remote_sha: hash,
                        commit_sha: Some(commit_id.clone()),
                    },
                )
            })
            .collect();
        self.store
            .record_sync_state(collection.id, &new_shas, Some(&commit_id), true)?;
        self.log.push(
            LogCategory::Sync,
            "force_keep_local",
            collection.name.clone(),
            format!("Pushed {} file(s)", local_files.len()),
            true,
        );
        Ok(SyncOutcome {
            pulled: 0,
            pushed: local_files.len() + deletes.len(),
            conflict: None,
        })
    }

    /// Replaces local content with the remote copy for every path,
    /// conflicts included.
    pub async fn force_keep_remote(
        &self,
        collection_id: Uuid,
        workspace_id: Option<Uuid>,
    ) -> Result<SyncOutcome> {
        let collection = self.store.find_collection(collection_id)?;
        let adapter = self.adapter_for(workspace_id.or(collection.workspace_id))?;

        let entries = adapter
            .list_directory_recursive(&collection.id.to_string())
            .await?;
        let mut files = BTreeMap::new();
        let mut new_shas = BTreeMap::new();
        for entry in entries
            .into_iter()
            .filter(|e| e.kind == RemoteEntryKind::File)
        {
            let file = adapter.get_file(&entry.path).await?;
            new_shas.insert(
                entry.path.clone(),
                FileSha {
                    content_hash: file.blob_id.clone(),
                    remote_sha: file.blob_id.clone(),
                    commit_sha: file.last_commit_id.clone(),
                },
            );
            files.insert(entry.path, file.content);
        }

        let pulled = files.len();
        let imported = deserialize_collection(&files)?;
        let batch = self.import_batch(collection.workspace_id, imported)?;
        self.store.import_collection(collection.id, &batch)?;
        self.store.record_sync_state(
            collection.id,
            &new_shas,
            collection.remote_sha.as_deref(),
            true,
        )?;
        self.log.push(
            LogCategory::Sync,
            "force_keep_remote",
            collection.name.clone(),
            format!("Pulled {pulled} file(s)"),
            true,
        );
        Ok(SyncOutcome {
            pulled,
            pushed: 0,
            conflict: None,
        })
    }

    /// Serializes and commits just one request's file.
    pub async fn push_single_request(
        &self,
        collection_id: Uuid,
        request_id: Uuid,
        sanitize: bool,
        workspace_id: Option<Uuid>,
    ) -> Result<()> {
        let collection = self.store.find_collection(collection_id)?;
        let adapter = self.adapter_for(workspace_id.or(collection.workspace_id))?;
        let request = self.store.find_request(request_id)?;
        let folders = self.store.list_all_folders(collection_id)?;
        let folders_by_id: HashMap<Uuid, &restbench_core::model::Folder> =
            folders.iter().map(|f| (f.id, f)).collect();

        let path = restbench_serializer::serialize::request_file_path(
            collection_id,
            &request,
            &folders_by_id,
        )?;
        let content = serialize_request_document(&request, sanitize)?;
        let hash = git_blob_sha1(&content);

        let mut writes = BTreeMap::new();
        writes.insert(path.clone(), content);
        let message = format!("Update request '{}'", request.name);
        let commit_id = adapter.commit_multiple_files(&writes, &[], &message).await?;

        self.store.upsert_file_sha(
            collection_id,
            &path,
            FileSha {
                content_hash: hash.clone(),
                remote_sha: hash,
                commit_sha: Some(commit_id),
            },
        )?;
        self.log.push(
            LogCategory::Sync,
            "push_request",
            request.name.clone(),
            "Pushed 1 file",
            true,
        );
        Ok(())
    }

    /// Removes every remote file under the collection directory and
    /// forgets the local sync state.
    pub async fn delete_remote_collection(
        &self,
        collection_id: Uuid,
        workspace_id: Option<Uuid>,
    ) -> Result<()> {
        let collection = self.store.find_collection(collection_id)?;
        let adapter = self.adapter_for(workspace_id.or(collection.workspace_id))?;
        let message = format!("Remove collection '{}'", collection.name);
        adapter
            .delete_directory(&collection.id.to_string(), &message)
            .await?;
        self.store.clear_sync_state(collection_id)?;
        self.log.push(
            LogCategory::Sync,
            "delete_remote",
            collection.name.clone(),
            "Removed remote copy",
            true,
        );
        Ok(())
    }

    // ── Internals ──

    fn assemble(&self, collection_id: Uuid) -> Result<(Collection, CollectionBundle)> {
        let collection = self.store.find_collection(collection_id)?;
        let folders = self.store.list_all_folders(collection_id)?;
        let requests = self.store.list_all_requests(collection_id)?;

        let mut environment_hints = BTreeMap::new();
        let mut wanted: Vec<Uuid> = collection.environment_ids.clone();
        for folder in &folders {
            wanted.extend(folder.environment_ids.iter().copied());
        }
        for env_id in wanted {
            if environment_hints.contains_key(&env_id) {
                continue;
            }
            match self.store.find_environment(env_id) {
                Ok(env) => {
                    environment_hints.insert(env_id, env.sync_hint());
                }
                // A stale association is dropped from the serialization
                // rather than failing the sync.
                Err(e) => debug!(%env_id, error = %e, "Skipping stale environment association"),
            }
        }

        let bundle = CollectionBundle {
            collection: collection.clone(),
            folders,
            requests,
            environment_hints,
        };
        Ok((collection, bundle))
    }

    /// Maps an imported tree onto a store batch, re-resolving environment
    /// hints against the local workspace.
    fn import_batch(
        &self,
        workspace_id: Option<Uuid>,
        imported: ImportedCollection,
    ) -> Result<ImportBatch> {
        let environments = match workspace_id {
            Some(ws) => self.store.list_environments(ws)?,
            None => Vec::new(),
        };
        let resolve = |hints: &[String]| -> Vec<Uuid> {
            hints
                .iter()
                .filter_map(|hint| {
                    environments
                        .iter()
                        .find(|env| &env.sync_hint() == hint)
                        .map(|env| env.id)
                })
                .collect()
        };
        let resolve_one = |hint: &Option<String>| -> Option<Uuid> {
            hint.as_ref().and_then(|h| {
                environments
                    .iter()
                    .find(|env| &env.sync_hint() == h)
                    .map(|env| env.id)
            })
        };

        Ok(ImportBatch {
            name: imported.name.clone(),
            description: imported.description.clone(),
            variables: imported.variables.clone(),
            environment_ids: resolve(&imported.environment_hints),
            default_environment_id: resolve_one(&imported.default_environment_hint),
            folders: imported
                .folders
                .iter()
                .map(|f| ImportFolder {
                    id: f.id,
                    parent_id: f.parent_id,
                    name: f.name.clone(),
                    sort_order: f.sort_order,
                    environment_ids: resolve(&f.environment_hints),
                    default_environment_id: resolve_one(&f.default_environment_hint),
                })
                .collect(),
            requests: imported
                .requests
                .iter()
                .map(|r| ImportRequest {
                    id: r.document.id,
                    folder_id: r.folder_id,
                    sort_order: r.sort_order,
                    name: r.document.name.clone(),
                    method: r.document.method,
                    url: r.document.url.clone(),
                    headers: r.document.headers.clone(),
                    query_params: r.document.query_params.clone(),
                    body: r.document.body.clone(),
                    body_type: r.document.body_type,
                    auth: r.document.auth.clone(),
                    scripts: r.document.scripts.clone(),
                })
                .collect(),
        })
    }

    fn lock_adapters(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<Option<Uuid>, Arc<dyn GitAdapter>>> {
        self.adapters.lock().expect("adapter registry lock poisoned")
    }
}
