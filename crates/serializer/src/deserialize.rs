//! Document tree → collection

use std::collections::BTreeMap;

use uuid::Uuid;

use crate::documents::{
    CollectionDocument, FolderDocument, ManifestDocument, ManifestEntryKind, RequestDocument,
};
use crate::error::{Result, SerializerError};

/// Collection reconstructed from a document tree
///
/// Environment associations come back as hints; the importer re-resolves
/// them against the local environments. Timestamps and ordering keys are
/// assigned by the store on write.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportedCollection {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub variables: BTreeMap<String, String>,
    pub environment_hints: Vec<String>,
    pub default_environment_hint: Option<String>,
    pub folders: Vec<ImportedFolder>,
    pub requests: Vec<ImportedRequest>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportedFolder {
    pub id: Uuid,
    pub parent_id: Option<Uuid>,
    pub name: String,
    /// Position within the parent's manifest.
    pub sort_order: i64,
    pub environment_hints: Vec<String>,
    pub default_environment_hint: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportedRequest {
    pub folder_id: Option<Uuid>,
    /// Position within the parent's manifest.
    pub sort_order: i64,
    pub document: RequestDocument,
}

/// Restores a collection from `relative path → document` pairs, the same
/// shape [`serialize_collection`] produces.
///
/// [`serialize_collection`]: crate::serialize::serialize_collection
pub fn deserialize_collection(files: &BTreeMap<String, String>) -> Result<ImportedCollection> {
    let root = files
        .keys()
        .find_map(|path| path.strip_suffix("/_collection.yaml"))
        .filter(|prefix| !prefix.contains('/'))
        .ok_or_else(|| SerializerError::MissingDocument("_collection.yaml".to_string()))?
        .to_string();

    let collection_doc: CollectionDocument =
        parse(files, &format!("{root}/_collection.yaml"))?;
    if collection_doc.id.to_string() != root {
        return Err(SerializerError::InvalidId {
            path: format!("{root}/_collection.yaml"),
            id: collection_doc.id.to_string(),
        });
    }

    let mut imported = ImportedCollection {
        id: collection_doc.id,
        name: collection_doc.name,
        description: collection_doc.description,
        variables: collection_doc.variables,
        environment_hints: collection_doc.environment_hints,
        default_environment_hint: collection_doc.default_environment_hint,
        folders: Vec::new(),
        requests: Vec::new(),
    };

    walk_level(files, &root, None, &mut imported)?;
    Ok(imported)
}

fn walk_level(
    files: &BTreeMap<String, String>,
    prefix: &str,
    parent: Option<Uuid>,
    imported: &mut ImportedCollection,
) -> Result<()> {
    let manifest: ManifestDocument = parse(files, &format!("{prefix}/_manifest.yaml"))?;

    for (index, entry) in manifest.entries.iter().enumerate() {
        let sort_order = index as i64;
        match entry.kind {
            ManifestEntryKind::Request => {
                let path = format!("{prefix}/{}.yaml", entry.id);
                let document: RequestDocument = parse(files, &path)?;
                if document.id != entry.id {
                    return Err(SerializerError::InvalidId {
                        path,
                        id: document.id.to_string(),
                    });
                }
                imported.requests.push(ImportedRequest {
                    folder_id: parent,
                    sort_order,
                    document,
                });
            }
            ManifestEntryKind::Folder => {
                let folder_prefix = format!("{prefix}/{}", entry.id);
                let path = format!("{folder_prefix}/_folder.yaml");
                let document: FolderDocument = parse(files, &path)?;
                if document.id != entry.id {
                    return Err(SerializerError::InvalidId {
                        path,
                        id: document.id.to_string(),
                    });
                }
                imported.folders.push(ImportedFolder {
                    id: document.id,
                    parent_id: parent,
                    name: document.name,
                    sort_order,
                    environment_hints: document.environment_hints,
                    default_environment_hint: document.default_environment_hint,
                });
                walk_level(files, &folder_prefix, Some(entry.id), imported)?;
            }
        }
    }
    Ok(())
}

fn parse<T: serde::de::DeserializeOwned>(files: &BTreeMap<String, String>, path: &str) -> Result<T> {
    let content = files
        .get(path)
        .ok_or_else(|| SerializerError::MissingDocument(path.to_string()))?;
    if content.trim().is_empty() {
        return Err(SerializerError::MissingDocument(path.to_string()));
    }
    serde_yaml::from_str(content).map_err(|e| SerializerError::Parse {
        path: path.to_string(),
        message: e.to_string(),
    })
}
