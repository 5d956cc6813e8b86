//! Document schemas
//!
//! Keys are stable; optional sections are omitted rather than written
//! empty so documents stay diff-friendly on the remote.

use restbench_core::scripts::ScriptsConfig;
use restbench_core::types::{AuthConfig, BodyType, HttpMethod, KeyValueEntry};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// `_collection.yaml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionDocument {
    pub id: Uuid,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variables: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub environment_hints: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_environment_hint: Option<String>,
}

/// `_folder.yaml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FolderDocument {
    pub id: Uuid,
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub environment_hints: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_environment_hint: Option<String>,
}

/// `_manifest.yaml` — ordered children of one level
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManifestDocument {
    #[serde(default)]
    pub entries: Vec<ManifestEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    #[serde(rename = "type")]
    pub kind: ManifestEntryKind,
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManifestEntryKind {
    Folder,
    Request,
}

/// `{request_uuid}.yaml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestDocument {
    pub id: Uuid,
    pub name: String,
    pub method: HttpMethod,
    pub url: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<KeyValueEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub query_params: Vec<KeyValueEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    pub body_type: BodyType,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default, skip_serializing_if = "ScriptsConfig::is_empty")]
    pub scripts: ScriptsConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_round_trip_preserves_order() {
        let manifest = ManifestDocument {
            entries: vec![
                ManifestEntry {
                    kind: ManifestEntryKind::Request,
                    id: Uuid::new_v4(),
                    name: "zeta".into(),
                },
                ManifestEntry {
                    kind: ManifestEntryKind::Folder,
                    id: Uuid::new_v4(),
                    name: "alpha".into(),
                },
            ],
        };
        let yaml = serde_yaml::to_string(&manifest).unwrap();
        let back: ManifestDocument = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(manifest, back);
    }

    #[test]
    fn test_request_document_omits_empty_sections() {
        let doc = RequestDocument {
            id: Uuid::new_v4(),
            name: "r".into(),
            method: HttpMethod::Get,
            url: "https://api.example.com".into(),
            headers: Vec::new(),
            query_params: Vec::new(),
            body: None,
            body_type: BodyType::None,
            auth: AuthConfig::None,
            scripts: ScriptsConfig::default(),
        };
        let yaml = serde_yaml::to_string(&doc).unwrap();
        assert!(!yaml.contains("headers"));
        assert!(!yaml.contains("scripts"));
        assert!(yaml.contains("auth"));
    }
}
