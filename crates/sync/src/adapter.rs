//! Provider-agnostic remote contract
//!
//! Two variants ship: a tree-API adapter and a commits-API adapter. The
//! capability set is the whole contract; the engine never branches on the
//! concrete variant.

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::error::Result;

/// One entry from a recursive remote listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub kind: RemoteEntryKind,
    /// Repository-relative path.
    pub path: String,
    /// Blob id for files, tree id for directories.
    pub id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteEntryKind {
    File,
    Directory,
}

/// One fetched remote file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub content: String,
    pub blob_id: String,
    /// Last commit touching the file, when the provider reports it.
    pub last_commit_id: Option<String>,
}

/// Remote repository operations the sync engine needs
#[async_trait]
pub trait GitAdapter: Send + Sync {
    /// Recursively lists everything under `path`.
    async fn list_directory_recursive(&self, path: &str) -> Result<Vec<RemoteEntry>>;

    /// Fetches one file.
    async fn get_file(&self, path: &str) -> Result<RemoteFile>;

    /// Commits writes and deletes atomically; returns the commit id.
    async fn commit_multiple_files(
        &self,
        writes: &BTreeMap<String, String>,
        deletes: &[String],
        message: &str,
    ) -> Result<String>;

    /// Deletes a directory by committing the removal of every file under
    /// it.
    async fn delete_directory(&self, path: &str, message: &str) -> Result<String> {
        let entries = self.list_directory_recursive(path).await?;
        let deletes: Vec<String> = entries
            .into_iter()
            .filter(|e| e.kind == RemoteEntryKind::File)
            .map(|e| e.path)
            .collect();
        self.commit_multiple_files(&BTreeMap::new(), &deletes, message)
            .await
    }

    /// True when the repository is reachable with the configured
    /// credentials.
    async fn test_connection(&self) -> bool;
}

/// Adapter connection parameters resolved from settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterConfig {
    /// `owner/name` for the tree API, project path or id for the commits
    /// API.
    pub repository: String,
    pub token: String,
    pub branch: String,
    /// API root override; tests point this at a local server.
    pub api_base: Option<String>,
}
