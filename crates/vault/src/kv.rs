//! KV secrets-engine driver
//!
//! Speaks both KV v1 and v2 against the same mount without knowing which
//! one is configured:
//!
//! - reads/writes/deletes try the v2 shape (`{mount}/data/{path}`) and
//!   fall back to the v1 shape (`{mount}/{path}`) on 404
//! - listing walks four strategies in order (v2 LIST, v2 GET+`list=true`,
//!   v1 LIST, v1 GET+`list=true`) and takes the first non-empty answer
//!
//! In role mode a 403 from any data operation triggers exactly one
//! re-login and retry; a second 403 surfaces as an auth error. The
//! namespace header goes on the login call only — data paths must encode
//! any namespace into the mount.

use std::collections::BTreeMap;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde_json::json;
use tracing::{debug, warn};

use crate::config::{VaultAuth, VaultSettings};
use crate::error::{ProviderError, Result};
use crate::provider::SecretProvider;

const NAMESPACE_HEADER: &str = "X-Vault-Namespace";
const TOKEN_HEADER: &str = "X-Vault-Token";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Driver for a remote KV secrets engine
pub struct KvDriver {
    settings: VaultSettings,
    client: reqwest::Client,
    /// Current token; refreshed in place on 403 in role mode.
    token: RwLock<Option<String>>,
}

impl KvDriver {
    pub fn new(settings: VaultSettings) -> Result<Self> {
        let mut builder = reqwest::Client::builder().timeout(REQUEST_TIMEOUT);
        if !settings.verify_ssl {
            builder = builder.danger_accept_invalid_certs(true);
        }
        let client = builder
            .build()
            .map_err(|e| ProviderError::Config(e.to_string()))?;
        let token = match &settings.auth {
            VaultAuth::Token(t) => Some(t.clone()),
            VaultAuth::AppRole { .. } => None,
        };
        Ok(Self {
            settings,
            client,
            token: RwLock::new(token),
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.settings.url, path.trim_start_matches('/'))
    }

    fn current_token(&self) -> Option<String> {
        self.token.read().expect("token lock poisoned").clone()
    }

    /// Exchanges the role credentials for a short-lived token.
    ///
    /// The only call that carries the namespace header.
    async fn login(&self) -> Result<String> {
        let VaultAuth::AppRole { role_id, secret_id } = &self.settings.auth else {
            return Err(ProviderError::Auth(
                "Static token rejected by the engine".to_string(),
            ));
        };
        let mut req = self
            .client
            .post(self.api_url("auth/approle/login"))
            .json(&json!({ "role_id": role_id, "secret_id": secret_id }));
        if let Some(ns) = &self.settings.namespace {
            req = req.header(NAMESPACE_HEADER, ns);
        }
        let resp = req.send().await.map_err(ProviderError::from_transport)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ProviderError::Auth(format!(
                "login rejected with status {status}"
            )));
        }
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ProviderError::Envelope(e.to_string()))?;
        let token = body["auth"]["client_token"]
            .as_str()
            .ok_or_else(|| ProviderError::Envelope("login response missing client_token".into()))?
            .to_string();
        *self.token.write().expect("token lock poisoned") = Some(token.clone());
        Ok(token)
    }

    /// One data operation with the single-retry policy on 403.
    async fn data_request(
        &self,
        method: Method,
        path: &str,
        query: Option<&str>,
        body: Option<&serde_json::Value>,
    ) -> Result<reqwest::Response> {
        let role_mode = matches!(self.settings.auth, VaultAuth::AppRole { .. });
        for attempt in 0..2 {
            let token = match self.current_token() {
                Some(t) => t,
                None if role_mode => self.login().await?,
                None => {
                    return Err(ProviderError::Config("No token configured".to_string()));
                }
            };
            let mut url = self.api_url(path);
            if let Some(q) = query {
                url.push('?');
                url.push_str(q);
            }
            let mut req = self
                .client
                .request(method.clone(), url)
                .header(TOKEN_HEADER, token);
            if let Some(b) = body {
                req = req.json(b);
            }
            let resp = req.send().await.map_err(ProviderError::from_transport)?;

            if resp.status() == StatusCode::FORBIDDEN && role_mode && attempt == 0 {
                debug!(path, "403 from data operation, re-logging in once");
                self.login().await?;
                continue;
            }
            return Ok(resp);
        }
        unreachable!("data_request loops at most twice")
    }

    async fn read_envelope(resp: reqwest::Response) -> Result<serde_json::Value> {
        let status = resp.status();
        if status == StatusCode::FORBIDDEN || status == StatusCode::UNAUTHORIZED {
            return Err(ProviderError::Auth(format!(
                "data operation rejected with status {status}"
            )));
        }
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message,
            });
        }
        resp.json()
            .await
            .map_err(|e| ProviderError::Envelope(e.to_string()))
    }

    /// One listing strategy; `Ok(None)` means "skip to the next" (404 or
    /// empty answer).
    async fn try_list(
        &self,
        method: Method,
        path: &str,
        list_query: bool,
    ) -> Result<Option<Vec<String>>> {
        let query = list_query.then_some("list=true");
        let resp = self.data_request(method, path, query, None).await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = Self::read_envelope(resp).await?;
        let keys: Vec<String> = body["data"]["keys"]
            .as_array()
            .map(|a| {
                a.iter()
                    .filter_map(|k| k.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();
        if keys.is_empty() {
            return Ok(None);
        }
        Ok(Some(keys))
    }

    fn decode_secret_map(value: &serde_json::Value) -> BTreeMap<String, String> {
        value
            .as_object()
            .map(|m| {
                m.iter()
                    .map(|(k, v)| {
                        let rendered = match v {
                            serde_json::Value::String(s) => s.clone(),
                            other => other.to_string(),
                        };
                        (k.clone(), rendered)
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl SecretProvider for KvDriver {
    async fn test_connection(&self) -> (bool, String) {
        // Authentication check first: lookup-self for a static token, a
        // login round-trip for role mode.
        let auth_ok = match &self.settings.auth {
            VaultAuth::Token(_) => {
                match self
                    .data_request(Method::GET, "auth/token/lookup-self", None, None)
                    .await
                {
                    Ok(resp) if resp.status().is_success() => Ok(()),
                    Ok(resp) => Err(format!("token lookup failed with status {}", resp.status())),
                    Err(e) => Err(e.to_string()),
                }
            }
            VaultAuth::AppRole { .. } => self.login().await.map(|_| ()).map_err(|e| e.to_string()),
        };
        if let Err(message) = auth_ok {
            return (false, message);
        }

        // Then confirm the configured mount exists.
        match self.data_request(Method::GET, "sys/mounts", None, None).await {
            Ok(resp) if resp.status().is_success() => {
                let body: serde_json::Value = match resp.json().await {
                    Ok(b) => b,
                    Err(e) => return (true, format!("authenticated (mount check failed: {e})")),
                };
                let mount_key = format!("{}/", self.settings.mount);
                let found = body.get(&mount_key).is_some()
                    || body["data"].get(&mount_key).is_some();
                if found {
                    (true, format!("Connected; mount '{}' found", self.settings.mount))
                } else {
                    (false, format!("Mount '{}' not found", self.settings.mount))
                }
            }
            Ok(resp) => (
                // Listing mounts needs privileges many tokens lack; being
                // authenticated is still a pass.
                true,
                format!("Authenticated (mount check skipped: status {})", resp.status()),
            ),
            Err(e) => (false, e.to_string()),
        }
    }

    async fn list_secrets(&self, path_prefix: &str) -> Result<Vec<String>> {
        let mount = &self.settings.mount;
        let prefix = path_prefix.trim_matches('/');
        let v2 = format!("{mount}/metadata/{prefix}");
        let v1 = format!("{mount}/{prefix}");
        let strategies = [
            (Method::from_bytes(b"LIST").expect("LIST is a valid method"), v2.clone(), false),
            (Method::GET, v2, true),
            (Method::from_bytes(b"LIST").expect("LIST is a valid method"), v1.clone(), false),
            (Method::GET, v1, true),
        ];
        for (method, path, list_query) in strategies {
            match self.try_list(method, &path, list_query).await {
                Ok(Some(keys)) => return Ok(keys),
                Ok(None) => continue,
                Err(ProviderError::Api { status: 404, .. }) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(Vec::new())
    }

    async fn get_secrets(&self, path: &str) -> Result<BTreeMap<String, String>> {
        let mount = &self.settings.mount;
        let path = path.trim_matches('/');

        let resp = self
            .data_request(Method::GET, &format!("{mount}/data/{path}"), None, None)
            .await?;
        if resp.status() != StatusCode::NOT_FOUND {
            let body = Self::read_envelope(resp).await?;
            return Ok(Self::decode_secret_map(&body["data"]["data"]));
        }

        debug!(path, "v2 read missed, falling back to v1");
        let resp = self
            .data_request(Method::GET, &format!("{mount}/{path}"), None, None)
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(ProviderError::NotFound(path.to_string()));
        }
        let body = Self::read_envelope(resp).await?;
        Ok(Self::decode_secret_map(&body["data"]))
    }

    async fn put_secrets(&self, path: &str, secrets: &BTreeMap<String, String>) -> Result<()> {
        let mount = &self.settings.mount;
        let path = path.trim_matches('/');

        let v2_body = json!({ "data": secrets });
        let resp = self
            .data_request(
                Method::POST,
                &format!("{mount}/data/{path}"),
                None,
                Some(&v2_body),
            )
            .await?;
        if resp.status() != StatusCode::NOT_FOUND {
            Self::read_envelope_or_empty(resp).await?;
            return Ok(());
        }

        debug!(path, "v2 write missed, falling back to v1");
        let v1_body = json!(secrets);
        let resp = self
            .data_request(Method::POST, &format!("{mount}/{path}"), None, Some(&v1_body))
            .await?;
        Self::read_envelope_or_empty(resp).await?;
        Ok(())
    }

    async fn delete_secrets(&self, path: &str) -> Result<()> {
        let mount = &self.settings.mount;
        let path = path.trim_matches('/');

        let resp = self
            .data_request(Method::DELETE, &format!("{mount}/data/{path}"), None, None)
            .await?;
        if resp.status() != StatusCode::NOT_FOUND {
            Self::read_envelope_or_empty(resp).await?;
            return Ok(());
        }

        let resp = self
            .data_request(Method::DELETE, &format!("{mount}/{path}"), None, None)
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            // Deleting an absent path is a no-op, matching local deletes.
            warn!(path, "delete target absent in both KV shapes");
            return Ok(());
        }
        Self::read_envelope_or_empty(resp).await?;
        Ok(())
    }
}

impl KvDriver {
    /// Writes and deletes may answer 204 with an empty body.
    async fn read_envelope_or_empty(resp: reqwest::Response) -> Result<()> {
        let status = resp.status();
        if status == StatusCode::FORBIDDEN || status == StatusCode::UNAUTHORIZED {
            return Err(ProviderError::Auth(format!(
                "data operation rejected with status {status}"
            )));
        }
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(url: &str, auth: VaultAuth) -> VaultSettings {
        VaultSettings {
            url: url.trim_end_matches('/').to_string(),
            mount: "kv".to_string(),
            namespace: None,
            verify_ssl: true,
            auth,
        }
    }

    fn token_driver(url: &str) -> KvDriver {
        KvDriver::new(settings(url, VaultAuth::Token("s.test".into()))).unwrap()
    }

    #[tokio::test]
    async fn test_get_prefers_v2_envelope() {
        let mut server = mockito::Server::new_async().await;
        let m = server
            .mock("GET", "/v1/kv/data/team/dev")
            .match_header(TOKEN_HEADER, "s.test")
            .with_body(r#"{"data":{"data":{"token":"T1","host":"h"}}}"#)
            .create_async()
            .await;

        let driver = token_driver(&server.url());
        let secrets = driver.get_secrets("team/dev").await.unwrap();
        assert_eq!(secrets["token"], "T1");
        assert_eq!(secrets["host"], "h");
        m.assert_async().await;
    }

    #[tokio::test]
    async fn test_get_falls_back_to_v1_on_404() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v1/kv/data/team/dev")
            .with_status(404)
            .create_async()
            .await;
        let v1 = server
            .mock("GET", "/v1/kv/team/dev")
            .with_body(r#"{"data":{"token":"T1"}}"#)
            .create_async()
            .await;

        let driver = token_driver(&server.url());
        let secrets = driver.get_secrets("team/dev").await.unwrap();
        assert_eq!(secrets["token"], "T1");
        v1.assert_async().await;
    }

    #[tokio::test]
    async fn test_get_missing_in_both_shapes() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v1/kv/data/gone")
            .with_status(404)
            .create_async()
            .await;
        server
            .mock("GET", "/v1/kv/gone")
            .with_status(404)
            .create_async()
            .await;

        let driver = token_driver(&server.url());
        assert!(matches!(
            driver.get_secrets("gone").await,
            Err(ProviderError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_walks_strategies_in_order() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("LIST", "/v1/kv/metadata/team")
            .with_status(404)
            .create_async()
            .await;
        server
            .mock("GET", "/v1/kv/metadata/team")
            .match_query(mockito::Matcher::UrlEncoded("list".into(), "true".into()))
            .with_status(404)
            .create_async()
            .await;
        let v1_list = server
            .mock("LIST", "/v1/kv/team")
            .with_body(r#"{"data":{"keys":["dev","prod"]}}"#)
            .create_async()
            .await;

        let driver = token_driver(&server.url());
        let keys = driver.list_secrets("team").await.unwrap();
        assert_eq!(keys, vec!["dev".to_string(), "prod".to_string()]);
        v1_list.assert_async().await;
    }

    #[tokio::test]
    async fn test_list_exhausted_strategies_yield_empty() {
        let mut server = mockito::Server::new_async().await;
        for (method, path) in [
            ("LIST", "/v1/kv/metadata/none"),
            ("GET", "/v1/kv/metadata/none"),
            ("LIST", "/v1/kv/none"),
            ("GET", "/v1/kv/none"),
        ] {
            server
                .mock(method, path)
                .match_query(mockito::Matcher::Any)
                .with_status(404)
                .create_async()
                .await;
        }
        let driver = token_driver(&server.url());
        assert!(driver.list_secrets("none").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_put_uses_v2_envelope() {
        let mut server = mockito::Server::new_async().await;
        let m = server
            .mock("POST", "/v1/kv/data/team/dev")
            .match_body(mockito::Matcher::JsonString(
                r#"{"data":{"token":"T1"}}"#.into(),
            ))
            .with_status(204)
            .create_async()
            .await;

        let driver = token_driver(&server.url());
        let mut secrets = BTreeMap::new();
        secrets.insert("token".to_string(), "T1".to_string());
        driver.put_secrets("team/dev", &secrets).await.unwrap();
        m.assert_async().await;
    }

    #[tokio::test]
    async fn test_role_mode_refreshes_token_once_on_403() {
        let mut server = mockito::Server::new_async().await;
        let login = server
            .mock("POST", "/v1/auth/approle/login")
            .with_body(r#"{"auth":{"client_token":"s.fresh"}}"#)
            .expect(2)
            .create_async()
            .await;
        // First data call (stale token) → 403; retried with the fresh one.
        server
            .mock("GET", "/v1/kv/data/team/dev")
            .match_header(TOKEN_HEADER, "s.fresh")
            .with_status(403)
            .with_body("{}")
            .expect(2)
            .create_async()
            .await;
        server
            .mock("GET", "/v1/kv/team/dev")
            .with_status(403)
            .create_async()
            .await;

        let driver = KvDriver::new(settings(
            &server.url(),
            VaultAuth::AppRole {
                role_id: "r".into(),
                secret_id: "s".into(),
            },
        ))
        .unwrap();

        // Both attempts 403 → terminal auth error after one refresh.
        let err = driver.get_secrets("team/dev").await.unwrap_err();
        assert!(matches!(err, ProviderError::Auth(_)));
        login.assert_async().await;
    }

    #[tokio::test]
    async fn test_namespace_header_only_on_login() {
        let mut server = mockito::Server::new_async().await;
        let login = server
            .mock("POST", "/v1/auth/approle/login")
            .match_header(NAMESPACE_HEADER, "team-ns")
            .with_body(r#"{"auth":{"client_token":"s.fresh"}}"#)
            .create_async()
            .await;
        let data = server
            .mock("GET", "/v1/kv/data/p")
            .match_header(NAMESPACE_HEADER, mockito::Matcher::Missing)
            .with_body(r#"{"data":{"data":{}}}"#)
            .create_async()
            .await;

        let mut cfg = settings(
            &server.url(),
            VaultAuth::AppRole {
                role_id: "r".into(),
                secret_id: "s".into(),
            },
        );
        cfg.namespace = Some("team-ns".into());
        let driver = KvDriver::new(cfg).unwrap();
        driver.get_secrets("p").await.unwrap();
        login.assert_async().await;
        data.assert_async().await;
    }

    #[tokio::test]
    async fn test_connection_test_checks_mount() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v1/auth/token/lookup-self")
            .with_body(r#"{"data":{"id":"s.test"}}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/v1/sys/mounts")
            .with_body(r#"{"kv/":{"type":"kv"},"sys/":{"type":"system"}}"#)
            .create_async()
            .await;

        let driver = token_driver(&server.url());
        let (ok, message) = driver.test_connection().await;
        assert!(ok, "{message}");
        assert!(message.contains("kv"));
    }
}
