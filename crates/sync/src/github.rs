//! Tree-API adapter (GitHub git data API)
//!
//! Listing walks the recursive tree of the branch head; atomic multi-file
//! commits go through blob → tree → commit → ref update. Paths are passed
//! raw — the git data API takes them inside JSON bodies, not URLs.
//! Conflict safety comes from the engine pre-reading per-file blob ids and
//! comparing before it commits.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use reqwest::header::{ACCEPT, AUTHORIZATION, USER_AGENT};
use serde_json::json;
use tracing::debug;

use crate::adapter::{AdapterConfig, GitAdapter, RemoteEntry, RemoteEntryKind, RemoteFile};
use crate::error::{Result, SyncError};

const DEFAULT_API_BASE: &str = "https://api.github.com";

/// GitHub adapter over the git data (tree) API
pub struct GithubAdapter {
    config: AdapterConfig,
    client: reqwest::Client,
}

impl GithubAdapter {
    pub fn new(config: AdapterConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(
                restbench_core::constants::GIT_REQUEST_TIMEOUT_SECS,
            ))
            .build()
            .map_err(|e| SyncError::Config(e.to_string()))?;
        Ok(Self { config, client })
    }

    fn repo_url(&self, tail: &str) -> String {
        let base = self
            .config
            .api_base
            .as_deref()
            .unwrap_or(DEFAULT_API_BASE)
            .trim_end_matches('/');
        format!("{base}/repos/{}/{tail}", self.config.repository)
    }

    fn request(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .header(AUTHORIZATION, format!("Bearer {}", self.config.token))
            .header(ACCEPT, "application/vnd.github+json")
            .header(USER_AGENT, "restbench")
    }

    async fn json(resp: reqwest::Response) -> Result<serde_json::Value> {
        let status = resp.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(SyncError::Auth(format!("remote returned {status}")));
        }
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(SyncError::Api {
                status: status.as_u16(),
                message,
            });
        }
        resp.json()
            .await
            .map_err(|e| SyncError::Envelope(e.to_string()))
    }

    async fn get_json(&self, url: String) -> Result<serde_json::Value> {
        let resp = self
            .request(reqwest::Method::GET, url)
            .send()
            .await
            .map_err(SyncError::from_transport)?;
        Self::json(resp).await
    }

    async fn post_json(&self, url: String, body: serde_json::Value) -> Result<serde_json::Value> {
        let resp = self
            .request(reqwest::Method::POST, url)
            .json(&body)
            .send()
            .await
            .map_err(SyncError::from_transport)?;
        Self::json(resp).await
    }

    /// Head commit sha and its tree sha for the configured branch.
    async fn branch_head(&self) -> Result<(String, String)> {
        let reference = self
            .get_json(self.repo_url(&format!("git/ref/heads/{}", self.config.branch)))
            .await?;
        let commit_sha = reference["object"]["sha"]
            .as_str()
            .ok_or_else(|| SyncError::Envelope("ref response missing object.sha".into()))?
            .to_string();
        let commit = self
            .get_json(self.repo_url(&format!("git/commits/{commit_sha}")))
            .await?;
        let tree_sha = commit["tree"]["sha"]
            .as_str()
            .ok_or_else(|| SyncError::Envelope("commit response missing tree.sha".into()))?
            .to_string();
        Ok((commit_sha, tree_sha))
    }
}

#[async_trait]
impl GitAdapter for GithubAdapter {
    async fn list_directory_recursive(&self, path: &str) -> Result<Vec<RemoteEntry>> {
        let (_, tree_sha) = self.branch_head().await?;
        let tree = self
            .get_json(self.repo_url(&format!("git/trees/{tree_sha}?recursive=1")))
            .await?;
        let prefix = format!("{}/", path.trim_matches('/'));
        let entries = tree["tree"]
            .as_array()
            .ok_or_else(|| SyncError::Envelope("tree response missing tree array".into()))?
            .iter()
            .filter_map(|node| {
                let node_path = node["path"].as_str()?;
                if !node_path.starts_with(&prefix) && node_path != path.trim_matches('/') {
                    return None;
                }
                let id = node["sha"].as_str()?.to_string();
                let kind = match node["type"].as_str()? {
                    "blob" => RemoteEntryKind::File,
                    "tree" => RemoteEntryKind::Directory,
                    _ => return None,
                };
                Some(RemoteEntry {
                    kind,
                    path: node_path.to_string(),
                    id,
                })
            })
            .collect();
        Ok(entries)
    }

    async fn get_file(&self, path: &str) -> Result<RemoteFile> {
        let body = self
            .get_json(self.repo_url(&format!(
                "contents/{}?ref={}",
                path.trim_matches('/'),
                self.config.branch
            )))
            .await?;
        let blob_id = body["sha"]
            .as_str()
            .ok_or_else(|| SyncError::Envelope("contents response missing sha".into()))?
            .to_string();
        let encoded = body["content"]
            .as_str()
            .ok_or_else(|| SyncError::Envelope("contents response missing content".into()))?
            .replace(['\n', '\r'], "");
        let raw = BASE64
            .decode(encoded)
            .map_err(|e| SyncError::Envelope(format!("content is not base64: {e}")))?;
        let content = String::from_utf8(raw)
            .map_err(|_| SyncError::Envelope("content is not UTF-8".into()))?;
        Ok(RemoteFile {
            content,
            blob_id,
            last_commit_id: None,
        })
    }

    async fn commit_multiple_files(
        &self,
        writes: &BTreeMap<String, String>,
        deletes: &[String],
        message: &str,
    ) -> Result<String> {
        let (head_commit, base_tree) = self.branch_head().await?;

        let mut tree_nodes = Vec::new();
        for (path, content) in writes {
            let blob = self
                .post_json(
                    self.repo_url("git/blobs"),
                    json!({ "content": content, "encoding": "utf-8" }),
                )
                .await?;
            let sha = blob["sha"]
                .as_str()
                .ok_or_else(|| SyncError::Envelope("blob response missing sha".into()))?;
            tree_nodes.push(json!({
                "path": path,
                "mode": "100644",
                "type": "blob",
                "sha": sha,
            }));
        }
        for path in deletes {
            // A null sha removes the path from the tree.
            tree_nodes.push(json!({
                "path": path,
                "mode": "100644",
                "type": "blob",
                "sha": serde_json::Value::Null,
            }));
        }

        let tree = self
            .post_json(
                self.repo_url("git/trees"),
                json!({ "base_tree": base_tree, "tree": tree_nodes }),
            )
            .await?;
        let tree_sha = tree["sha"]
            .as_str()
            .ok_or_else(|| SyncError::Envelope("tree response missing sha".into()))?;

        let commit = self
            .post_json(
                self.repo_url("git/commits"),
                json!({
                    "message": message,
                    "tree": tree_sha,
                    "parents": [head_commit],
                }),
            )
            .await?;
        let commit_sha = commit["sha"]
            .as_str()
            .ok_or_else(|| SyncError::Envelope("commit response missing sha".into()))?
            .to_string();

        let resp = self
            .request(
                reqwest::Method::PATCH,
                self.repo_url(&format!("git/refs/heads/{}", self.config.branch)),
            )
            .json(&json!({ "sha": commit_sha }))
            .send()
            .await
            .map_err(SyncError::from_transport)?;
        Self::json(resp).await?;

        debug!(files = writes.len(), deletes = deletes.len(), %commit_sha, "Committed");
        Ok(commit_sha)
    }

    async fn test_connection(&self) -> bool {
        matches!(
            self.request(reqwest::Method::GET, self.repo_url(""))
                .send()
                .await,
            Ok(resp) if resp.status().is_success()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter(base: &str) -> GithubAdapter {
        GithubAdapter::new(AdapterConfig {
            repository: "acme/apis".into(),
            token: "ghp_test".into(),
            branch: "main".into(),
            api_base: Some(base.to_string()),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_list_filters_to_prefix() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/repos/acme/apis/git/ref/heads/main")
            .with_body(r#"{"object":{"sha":"c1"}}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/repos/acme/apis/git/commits/c1")
            .with_body(r#"{"tree":{"sha":"t1"}}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/repos/acme/apis/git/trees/t1")
            .match_query(mockito::Matcher::UrlEncoded("recursive".into(), "1".into()))
            .with_body(
                r#"{"tree":[
                    {"path":"col-1/_collection.yaml","type":"blob","sha":"b1"},
                    {"path":"col-1/f1","type":"tree","sha":"t2"},
                    {"path":"other/_collection.yaml","type":"blob","sha":"b9"}
                ]}"#,
            )
            .create_async()
            .await;

        let entries = adapter(&server.url())
            .list_directory_recursive("col-1")
            .await
            .unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].path, "col-1/_collection.yaml");
        assert_eq!(entries[0].kind, RemoteEntryKind::File);
        assert_eq!(entries[1].kind, RemoteEntryKind::Directory);
    }

    #[tokio::test]
    async fn test_get_file_decodes_base64() {
        let mut server = mockito::Server::new_async().await;
        let encoded = BASE64.encode("name: test\n");
        server
            .mock("GET", "/repos/acme/apis/contents/col-1/_collection.yaml")
            .match_query(mockito::Matcher::UrlEncoded("ref".into(), "main".into()))
            .with_body(format!(r#"{{"sha":"b1","content":"{encoded}"}}"#))
            .create_async()
            .await;

        let file = adapter(&server.url())
            .get_file("col-1/_collection.yaml")
            .await
            .unwrap();
        assert_eq!(file.content, "name: test\n");
        assert_eq!(file.blob_id, "b1");
        assert_eq!(file.last_commit_id, None);
    }

    #[tokio::test]
    async fn test_commit_walks_blob_tree_commit_ref() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/repos/acme/apis/git/ref/heads/main")
            .with_body(r#"{"object":{"sha":"c1"}}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/repos/acme/apis/git/commits/c1")
            .with_body(r#"{"tree":{"sha":"t1"}}"#)
            .create_async()
            .await;
        server
            .mock("POST", "/repos/acme/apis/git/blobs")
            .with_body(r#"{"sha":"blob1"}"#)
            .create_async()
            .await;
        let tree = server
            .mock("POST", "/repos/acme/apis/git/trees")
            .match_body(mockito::Matcher::PartialJsonString(
                r#"{"base_tree":"t1"}"#.into(),
            ))
            .with_body(r#"{"sha":"t2"}"#)
            .create_async()
            .await;
        server
            .mock("POST", "/repos/acme/apis/git/commits")
            .match_body(mockito::Matcher::PartialJsonString(
                r#"{"parents":["c1"],"tree":"t2"}"#.into(),
            ))
            .with_body(r#"{"sha":"c2"}"#)
            .create_async()
            .await;
        let patch = server
            .mock("PATCH", "/repos/acme/apis/git/refs/heads/main")
            .with_body(r#"{"ref":"refs/heads/main"}"#)
            .create_async()
            .await;

        let mut writes = BTreeMap::new();
        writes.insert("col-1/_collection.yaml".to_string(), "name: x".to_string());
        let commit = adapter(&server.url())
            .commit_multiple_files(&writes, &["col-1/old.yaml".to_string()], "sync")
            .await
            .unwrap();
        assert_eq!(commit, "c2");
        tree.assert_async().await;
        patch.assert_async().await;
    }

    #[tokio::test]
    async fn test_auth_error_distinct() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/repos/acme/apis/git/ref/heads/main")
            .with_status(401)
            .create_async()
            .await;
        let err = adapter(&server.url())
            .list_directory_recursive("col-1")
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Auth(_)));
    }
}
