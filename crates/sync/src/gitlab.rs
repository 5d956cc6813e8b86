//! Commits-API adapter (GitLab repository API)
//!
//! One commit call carries every action; the server applies them
//! atomically. File paths travel inside URLs, so they are percent-encoded.
//! Updates pass the file's `last_commit_id` and the server rejects the
//! commit when the file moved on the remote — that rejection is this
//! variant's conflict signal.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use serde_json::json;
use tracing::debug;

use crate::adapter::{AdapterConfig, GitAdapter, RemoteEntry, RemoteEntryKind, RemoteFile};
use crate::error::{Result, SyncError};

const DEFAULT_API_BASE: &str = "https://gitlab.com/api/v4";

/// Everything the path segment encoding must escape, `/` included —
/// project and file paths are single URL segments on this API.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}')
    .add(b'/')
    .add(b'%')
    .add(b'&')
    .add(b'+')
    .add(b'=');

fn encode_segment(raw: &str) -> String {
    utf8_percent_encode(raw, PATH_SEGMENT).to_string()
}

/// GitLab adapter over the commits API
pub struct GitlabAdapter {
    config: AdapterConfig,
    client: reqwest::Client,
}

impl GitlabAdapter {
    pub fn new(config: AdapterConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(
                restbench_core::constants::GIT_REQUEST_TIMEOUT_SECS,
            ))
            .build()
            .map_err(|e| SyncError::Config(e.to_string()))?;
        Ok(Self { config, client })
    }

    fn project_url(&self, tail: &str) -> String {
        let base = self
            .config
            .api_base
            .as_deref()
            .unwrap_or(DEFAULT_API_BASE)
            .trim_end_matches('/');
        format!(
            "{base}/projects/{}/{tail}",
            encode_segment(&self.config.repository)
        )
    }

    fn request(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .header("PRIVATE-TOKEN", self.config.token.clone())
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
}

#[async_trait]
impl GitAdapter for GitlabAdapter {
    async fn list_directory_recursive(&self, path: &str) -> Result<Vec<RemoteEntry>> {
        let mut entries = Vec::new();
        let mut page = 1u32;
        loop {
            let url = self.project_url(&format!(
                "repository/tree?path={}&ref={}&recursive=true&per_page=100&page={page}",
                encode_segment(path.trim_matches('/')),
                encode_segment(&self.config.branch),
            ));
            let resp = self
                .request(reqwest::Method::GET, url)
                .send()
                .await
                .map_err(SyncError::from_transport)?;
            let body = Self::json(resp).await?;
            let nodes = body
                .as_array()
                .ok_or_else(|| SyncError::Envelope("tree response is not an array".into()))?;
            if nodes.is_empty() {
                break;
            }
            for node in nodes {
                let kind = match node["type"].as_str() {
                    Some("blob") => RemoteEntryKind::File,
                    Some("tree") => RemoteEntryKind::Directory,
                    _ => continue,
                };
                let (Some(node_path), Some(id)) = (node["path"].as_str(), node["id"].as_str())
                else {
                    continue;
                };
                entries.push(RemoteEntry {
                    kind,
                    path: node_path.to_string(),
                    id: id.to_string(),
                });
            }
            if nodes.len() < 100 {
                break;
            }
            page += 1;
        }
        Ok(entries)
    }

    async fn get_file(&self, path: &str) -> Result<RemoteFile> {
        let url = self.project_url(&format!(
            "repository/files/{}?ref={}",
            encode_segment(path.trim_matches('/')),
            encode_segment(&self.config.branch),
        ));
        let resp = self
            .request(reqwest::Method::GET, url)
            .send()
            .await
            .map_err(SyncError::from_transport)?;
        let body = Self::json(resp).await?;

        let blob_id = body["blob_id"]
            .as_str()
            .ok_or_else(|| SyncError::Envelope("file response missing blob_id".into()))?
            .to_string();
        let encoded = body["content"]
            .as_str()
            .ok_or_else(|| SyncError::Envelope("file response missing content".into()))?;
        let raw = BASE64
            .decode(encoded)
            .map_err(|e| SyncError::Envelope(format!("content is not base64: {e}")))?;
        let content = String::from_utf8(raw)
            .map_err(|_| SyncError::Envelope("content is not UTF-8".into()))?;
        Ok(RemoteFile {
            content,
            blob_id,
            last_commit_id: body["last_commit_id"].as_str().map(String::from),
        })
    }

    async fn commit_multiple_files(
        &self,
        writes: &BTreeMap<String, String>,
        deletes: &[String],
        message: &str,
    ) -> Result<String> {
        let mut actions = Vec::new();
        for (path, content) in writes {
            // Pre-read decides create vs update and pins the conflict
            // token for updates.
            match self.get_file(path).await {
                Ok(existing) => actions.push(json!({
                    "action": "update",
                    "file_path": path,
                    "content": content,
                    "last_commit_id": existing.last_commit_id,
                })),
                Err(SyncError::Api { status: 404, .. }) => actions.push(json!({
                    "action": "create",
                    "file_path": path,
                    "content": content,
                })),
                Err(e) => return Err(e),
            }
        }
        for path in deletes {
            actions.push(json!({ "action": "delete", "file_path": path }));
        }

        let resp = self
            .request(reqwest::Method::POST, self.project_url("repository/commits"))
            .json(&json!({
                "branch": self.config.branch,
                "commit_message": message,
                "actions": actions,
            }))
            .send()
            .await
            .map_err(SyncError::from_transport)?;
        let body = Self::json(resp).await?;
        let commit_id = body["id"]
            .as_str()
            .ok_or_else(|| SyncError::Envelope("commit response missing id".into()))?
            .to_string();
        debug!(files = writes.len(), deletes = deletes.len(), %commit_id, "Committed");
        Ok(commit_id)
    }

    async fn test_connection(&self) -> bool {
        matches!(
            self.request(reqwest::Method::GET, self.project_url(""))
                .send()
                .await,
            Ok(resp) if resp.status().is_success()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter(base: &str) -> GitlabAdapter {
        GitlabAdapter::new(AdapterConfig {
            repository: "acme/apis".into(),
            token: "glpat-test".into(),
            branch: "main".into(),
            api_base: Some(base.to_string()),
        })
        .unwrap()
    }

    #[test]
    fn test_path_encoding_escapes_slashes() {
        assert_eq!(encode_segment("acme/apis"), "acme%2Fapis");
        assert_eq!(
            encode_segment("col-1/_collection.yaml"),
            "col-1%2F_collection.yaml"
        );
    }

    #[tokio::test]
    async fn test_get_file_carries_last_commit_id() {
        let mut server = mockito::Server::new_async().await;
        let encoded = BASE64.encode("name: test\n");
        server
            .mock(
                "GET",
                "/projects/acme%2Fapis/repository/files/col-1%2F_collection.yaml",
            )
            .match_query(mockito::Matcher::UrlEncoded("ref".into(), "main".into()))
            .with_body(format!(
                r#"{{"blob_id":"b1","last_commit_id":"c9","content":"{encoded}"}}"#
            ))
            .create_async()
            .await;

        let file = adapter(&server.url())
            .get_file("col-1/_collection.yaml")
            .await
            .unwrap();
        assert_eq!(file.blob_id, "b1");
        assert_eq!(file.last_commit_id.as_deref(), Some("c9"));
        assert_eq!(file.content, "name: test\n");
    }

    #[tokio::test]
    async fn test_commit_updates_existing_and_creates_missing() {
        let mut server = mockito::Server::new_async().await;
        let encoded = BASE64.encode("old");
        server
            .mock("GET", "/projects/acme%2Fapis/repository/files/col-1%2Fa.yaml")
            .match_query(mockito::Matcher::Any)
            .with_body(format!(
                r#"{{"blob_id":"b1","last_commit_id":"c9","content":"{encoded}"}}"#
            ))
            .create_async()
            .await;
        server
            .mock("GET", "/projects/acme%2Fapis/repository/files/col-1%2Fb.yaml")
            .match_query(mockito::Matcher::Any)
            .with_status(404)
            .with_body("{}")
            .create_async()
            .await;
        let commit = server
            .mock("POST", "/projects/acme%2Fapis/repository/commits")
            .match_body(mockito::Matcher::AllOf(vec![
                mockito::Matcher::PartialJsonString(
                    r#"{"actions":[{"action":"update","file_path":"col-1/a.yaml","last_commit_id":"c9"}]}"#.into(),
                ),
            ]))
            .with_body(r#"{"id":"c10"}"#)
            .create_async()
            .await;

        let mut writes = BTreeMap::new();
        writes.insert("col-1/a.yaml".to_string(), "new-a".to_string());
        writes.insert("col-1/b.yaml".to_string(), "new-b".to_string());
        let id = adapter(&server.url())
            .commit_multiple_files(&writes, &[], "sync")
            .await
            .unwrap();
        assert_eq!(id, "c10");
        commit.assert_async().await;
    }

    #[tokio::test]
    async fn test_delete_directory_commits_all_files() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/projects/acme%2Fapis/repository/tree")
            .match_query(mockito::Matcher::Any)
            .with_body(
                r#"[
                    {"type":"blob","path":"col-1/_collection.yaml","id":"b1"},
                    {"type":"tree","path":"col-1/f1","id":"t1"},
                    {"type":"blob","path":"col-1/f1/r.yaml","id":"b2"}
                ]"#,
            )
            .create_async()
            .await;
        let commit = server
            .mock("POST", "/projects/acme%2Fapis/repository/commits")
            .match_body(mockito::Matcher::PartialJsonString(
                r#"{"actions":[{"action":"delete","file_path":"col-1/_collection.yaml"},{"action":"delete","file_path":"col-1/f1/r.yaml"}]}"#.into(),
            ))
            .with_body(r#"{"id":"c11"}"#)
            .create_async()
            .await;

        adapter(&server.url())
            .delete_directory("col-1", "remove collection")
            .await
            .unwrap();
        commit.assert_async().await;
    }
}
