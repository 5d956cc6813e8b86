//! Value types shared across the core
//!
//! These are the strongly-typed shapes decoded from JSON-valued columns at
//! the repository boundary; callers never see the serialized form.

use serde::{Deserialize, Serialize};
use std::fmt;

/// HTTP method of a stored request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Some(HttpMethod::Get),
            "POST" => Some(HttpMethod::Post),
            "PUT" => Some(HttpMethod::Put),
            "PATCH" => Some(HttpMethod::Patch),
            "DELETE" => Some(HttpMethod::Delete),
            "HEAD" => Some(HttpMethod::Head),
            "OPTIONS" => Some(HttpMethod::Options),
            _ => None,
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body payload kind of a stored request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BodyType {
    #[default]
    None,
    Json,
    Xml,
    FormData,
    Urlencoded,
    Raw,
    Graphql,
}

impl BodyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BodyType::None => "none",
            BodyType::Json => "json",
            BodyType::Xml => "xml",
            BodyType::FormData => "form-data",
            BodyType::Urlencoded => "urlencoded",
            BodyType::Raw => "raw",
            BodyType::Graphql => "graphql",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "none" => Some(BodyType::None),
            "json" => Some(BodyType::Json),
            "xml" => Some(BodyType::Xml),
            "form-data" => Some(BodyType::FormData),
            "urlencoded" => Some(BodyType::Urlencoded),
            "raw" => Some(BodyType::Raw),
            "graphql" => Some(BodyType::Graphql),
            _ => None,
        }
    }
}

impl fmt::Display for BodyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Auth configuration, tagged by scheme
///
/// Credential-bearing fields are encrypted at rest by the store; in memory
/// they are always plaintext.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum AuthConfig {
    #[default]
    None,
    Bearer {
        token: String,
    },
    Basic {
        username: String,
        password: String,
    },
    ApiKey {
        key: String,
        value: String,
        #[serde(default)]
        in_header: bool,
    },
}

impl AuthConfig {
    /// True when this config carries any credential material.
    pub fn has_credentials(&self) -> bool {
        !matches!(self, AuthConfig::None)
    }
}

/// A single header or query-parameter row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValueEntry {
    pub key: String,
    pub value: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl KeyValueEntry {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            enabled: true,
        }
    }
}

/// An environment variable row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variable {
    pub key: String,
    pub value: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl Variable {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            enabled: true,
        }
    }
}

fn default_enabled() -> bool {
    true
}

/// Where a resolved variable value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableSource {
    Environment,
    Collection,
    Vault,
}

/// A resolved variable with source attribution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedVariable {
    pub value: String,
    pub source: VariableSource,
}

/// Per-file sync state recorded after a successful sync
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSha {
    /// Git-blob content hash of the local serialization.
    pub content_hash: String,
    /// Remote blob id as of the last successful sync.
    pub remote_sha: String,
    /// Last commit id that touched the file, when the adapter reports one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_sha: Option<String>,
}
