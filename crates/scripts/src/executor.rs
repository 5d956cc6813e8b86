//! Script executor
//!
//! Wraps the injected request sender: resolves variables, walks the
//! pre-request chain, dispatches, records history, then applies
//! post-response actions. The executor is the single integration point
//! between a send and the variable layers it reads and writes.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use restbench_core::constants::{
    clamp_request_timeout_secs, MAX_SCRIPT_CHAIN_DEPTH, REQUEST_TIMEOUT_SECS_DEFAULT,
};
use restbench_core::model::Request;
use restbench_core::scripts::{PostResponseAction, PreRequestAction};
use restbench_core::sender::{validate_prepared, PreparedRequest, RequestSender, SenderResponse};
use restbench_core::types::{AuthConfig, KeyValueEntry};
use restbench_sessionlog::{LogCategory, SessionLog};
use restbench_store::environments::EnvironmentPatch;
use restbench_store::history::NewHistory;
use restbench_store::Store;
use restbench_vars::{substitute, substitute_entries, Resolver};
use restbench_vault::SecretCache;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{Result, ScriptError};
use crate::extract::{extract_value, strip_templates};

/// Executes sends with their pre/post-request scripts
#[derive(Clone)]
pub struct ScriptExecutor {
    store: Store,
    resolver: Resolver,
    cache: SecretCache,
    sender: Arc<dyn RequestSender>,
    log: SessionLog,
}

impl ScriptExecutor {
    pub fn new(
        store: Store,
        resolver: Resolver,
        cache: SecretCache,
        sender: Arc<dyn RequestSender>,
        log: SessionLog,
    ) -> Self {
        Self {
            store,
            resolver,
            cache,
            sender,
            log,
        }
    }

    /// Sends a request, running its dependency chain first and its
    /// post-response actions after.
    ///
    /// Every top-level send starts with a fresh visited set, so parallel
    /// sends cannot poison each other's cycle detection.
    pub async fn send(&self, request_id: Uuid, cancel: CancellationToken) -> Result<SenderResponse> {
        let mut visited = HashSet::new();
        self.send_chain(request_id, 0, &mut visited, &cancel).await
    }

    fn send_chain<'a>(
        &'a self,
        request_id: Uuid,
        depth: usize,
        visited: &'a mut HashSet<Uuid>,
        cancel: &'a CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<SenderResponse>> + Send + 'a>> {
        Box::pin(async move {
            if depth > MAX_SCRIPT_CHAIN_DEPTH {
                return Err(ScriptError::MaxDepth(MAX_SCRIPT_CHAIN_DEPTH));
            }
            if !visited.insert(request_id) {
                self.log.push(
                    LogCategory::Script,
                    "cycle",
                    request_id.to_string(),
                    "pre-request chain re-entered a request",
                    false,
                );
                return Err(ScriptError::Cycle(request_id));
            }

            let request = self.store.find_request(request_id)?;

            if let Some(PreRequestAction::SendRequest { request_id: dep }) =
                &request.scripts.pre_request
            {
                debug!(%request_id, dependency = %dep, depth, "Running pre-request dependency");
                self.send_chain(*dep, depth + 1, visited, cancel).await?;
            }

            let response = self.dispatch(&request, cancel).await?;
            self.run_post_response(&request, &response).await;
            Ok(response)
        })
    }

    /// Resolves, substitutes, validates, and sends one request.
    async fn dispatch(&self, request: &Request, cancel: &CancellationToken) -> Result<SenderResponse> {
        let collection = self.store.find_collection(request.collection_id)?;
        let workspace_id = collection.workspace_id;
        let vars = self
            .resolver
            .resolve_values(workspace_id, Some(collection.id))
            .await
            .map_err(ScriptError::Core)?;

        let mut headers = substitute_entries(&request.headers, &vars);
        apply_auth(&request.auth, &vars, &mut headers);

        let timeout_secs = match self.store.get_setting("app.timeout_seconds", workspace_id)? {
            Some(raw) => raw
                .parse::<u64>()
                .map(clamp_request_timeout_secs)
                .unwrap_or(REQUEST_TIMEOUT_SECS_DEFAULT),
            None => REQUEST_TIMEOUT_SECS_DEFAULT,
        };

        let prepared = PreparedRequest {
            method: request.method,
            url: substitute(&request.url, &vars),
            headers,
            query_params: substitute_entries(&request.query_params, &vars),
            body: request.body.as_deref().map(|b| substitute(b, &vars)),
            timeout_secs,
        };
        validate_prepared(&prepared).map_err(ScriptError::Core)?;

        let response = self
            .sender
            .send(prepared.clone(), cancel.clone())
            .await
            .map_err(ScriptError::Core)?;

        self.log.push(
            LogCategory::Http,
            "send",
            // Template form only; the resolved URL may embed secrets.
            request.url.clone(),
            format!("{} {}", response.status, response.status_text),
            response.status > 0 && response.status < 400,
        );

        // History is best-effort: a full history table must never fail a
        // send.
        if let Err(e) = self.store.insert_history(NewHistory {
            request_id: request.id,
            method: request.method,
            url: prepared.url.clone(),
            status: response.status,
            request_headers: prepared.headers.clone(),
            response_headers: response.headers.clone(),
            request_body: prepared.body.clone(),
            response_body: Some(response.body.clone()),
            duration_ms: response.duration_ms,
        }) {
            warn!(error = %e, "Failed to record request history");
        }

        Ok(response)
    }

    /// Applies each post-response action; a failing action is logged and
    /// the remaining actions still run.
    async fn run_post_response(&self, request: &Request, response: &SenderResponse) {
        for action in &request.scripts.post_response {
            let PostResponseAction::SetVariable { source, target } = action;
            let Some(raw) = extract_value(source, response) else {
                debug!(source, "Post-response source missed; skipping action");
                continue;
            };
            let value = strip_templates(&raw);
            if let Err(e) = self.assign_variable(request, target, &value).await {
                warn!(target, error = %e, "Post-response assignment failed");
                self.log.push(
                    LogCategory::Script,
                    "set_variable",
                    target.clone(),
                    e.to_string(),
                    false,
                );
            }
        }
    }

    /// Routes a variable write to where the name currently lives: the
    /// active environment (cache + remote for vault-synced, the database
    /// otherwise), or else the collection overlay.
    async fn assign_variable(&self, request: &Request, target: &str, value: &str) -> Result<()> {
        let collection = self.store.find_collection(request.collection_id)?;

        if let Some(workspace_id) = collection.workspace_id {
            if let Some(env) = self.store.find_active_environment(workspace_id)? {
                if env.vault_synced {
                    self.cache.ensure_loaded(env.id, Some(workspace_id)).await?;
                    let mut cached = self.cache.get_cached(env.id).unwrap_or_default();
                    if let Some(var) = cached.iter_mut().find(|v| v.key == target) {
                        var.value = value.to_string();
                        self.cache.set_cached(env.id, cached.clone());

                        // Fire-and-forget remote push; the local cache is
                        // already the source of truth for this session.
                        let cache = self.cache.clone();
                        let env_id = env.id;
                        let vars = cached;
                        tokio::spawn(async move {
                            if let Err(e) = cache
                                .push_variables(env_id, &vars, Some(workspace_id))
                                .await
                            {
                                warn!(error = %e, "Background vault push failed");
                            }
                        });
                        return Ok(());
                    }
                } else if env.variables.iter().any(|v| v.key == target) {
                    let mut variables = env.variables.clone();
                    if let Some(var) = variables.iter_mut().find(|v| v.key == target) {
                        var.value = value.to_string();
                    }
                    self.store.update_environment(
                        env.id,
                        EnvironmentPatch {
                            variables: Some(variables),
                            ..Default::default()
                        },
                    )?;
                    return Ok(());
                }
            }
        }

        // Not present in the environment layer: set on the collection
        // overlay.
        let mut variables = collection.variables.clone();
        variables.insert(target.to_string(), value.to_string());
        self.store.update_collection(
            collection.id,
            restbench_store::collections::CollectionPatch {
                variables: Some(variables),
                ..Default::default()
            },
        )?;
        Ok(())
    }
}

/// Folds the auth config into the outgoing header set.
fn apply_auth(
    auth: &AuthConfig,
    vars: &std::collections::BTreeMap<String, String>,
    headers: &mut Vec<KeyValueEntry>,
) {
    match auth {
        AuthConfig::None => {}
        AuthConfig::Bearer { token } => {
            let token = substitute(token, vars);
            headers.push(KeyValueEntry::new("Authorization", format!("Bearer {token}")));
        }
        AuthConfig::Basic { username, password } => {
            let credentials = format!(
                "{}:{}",
                substitute(username, vars),
                substitute(password, vars)
            );
            headers.push(KeyValueEntry::new(
                "Authorization",
                format!("Basic {}", BASE64.encode(credentials)),
            ));
        }
        AuthConfig::ApiKey {
            key,
            value,
            in_header,
        } => {
            if *in_header {
                headers.push(KeyValueEntry::new(key.clone(), substitute(value, vars)));
            }
        }
    }
}
