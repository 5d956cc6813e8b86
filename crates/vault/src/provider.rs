//! Secret-provider capability set

use crate::error::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Polymorphic secret-provider contract
///
/// One variant ships today (the KV driver); the capability set is the
/// whole contract — no richer interface hides behind a downcast.
#[async_trait]
pub trait SecretProvider: Send + Sync {
    /// Verifies connectivity and that the configured engine mount exists.
    /// Returns `(success, human-readable message)`.
    async fn test_connection(&self) -> (bool, String);

    /// Lists secret paths under a prefix.
    async fn list_secrets(&self, path_prefix: &str) -> Result<Vec<String>>;

    /// Reads the key/value map at a path.
    async fn get_secrets(&self, path: &str) -> Result<BTreeMap<String, String>>;

    /// Writes the key/value map at a path, replacing the remote content.
    async fn put_secrets(&self, path: &str, secrets: &BTreeMap<String, String>) -> Result<()>;

    /// Deletes the secrets at a path.
    async fn delete_secrets(&self, path: &str) -> Result<()>;
}
