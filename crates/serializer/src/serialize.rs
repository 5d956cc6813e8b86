//! Collection → document tree

use std::collections::{BTreeMap, HashMap, HashSet};

use restbench_core::model::{Collection, Folder, Request};
use restbench_core::types::AuthConfig;
use restbench_scanner::{sanitize_collection_data, sanitize_request_data};
use uuid::Uuid;

use crate::documents::{
    CollectionDocument, FolderDocument, ManifestDocument, ManifestEntry, ManifestEntryKind,
    RequestDocument,
};
use crate::error::{Result, SerializerError};

/// Everything the serializer needs for one collection
///
/// The store assembles this; auth fields arrive decrypted.
#[derive(Debug, Clone)]
pub struct CollectionBundle {
    pub collection: Collection,
    pub folders: Vec<Folder>,
    pub requests: Vec<Request>,
    /// Environment id → cross-machine hint (vault path or name slug).
    pub environment_hints: BTreeMap<Uuid, String>,
}

/// Serializes a collection into `relative path → document` pairs.
///
/// With `sanitize` set, credential values are blanked through the scanner
/// before emission; the bundle itself is never mutated.
pub fn serialize_collection(
    bundle: &CollectionBundle,
    sanitize: bool,
) -> Result<BTreeMap<String, String>> {
    let root = bundle.collection.id.to_string();
    let mut files = BTreeMap::new();

    let variables = if sanitize {
        sanitize_collection_data(&bundle.collection.variables)
    } else {
        bundle.collection.variables.clone()
    };

    let collection_doc = CollectionDocument {
        id: bundle.collection.id,
        name: bundle.collection.name.clone(),
        description: bundle.collection.description.clone(),
        variables,
        environment_hints: hints_for(&bundle.environment_hints, &bundle.collection.environment_ids),
        default_environment_hint: bundle
            .collection
            .default_environment_id
            .and_then(|id| bundle.environment_hints.get(&id).cloned()),
    };
    files.insert(
        format!("{root}/_collection.yaml"),
        emit(&format!("{root}/_collection.yaml"), &collection_doc)?,
    );

    let folders_by_parent = group_folders(&bundle.folders);
    let requests_by_folder = group_requests(&bundle.requests);
    let folders_by_id: HashMap<Uuid, &Folder> =
        bundle.folders.iter().map(|f| (f.id, f)).collect();

    // Walk the tree from the root; each level gets a manifest.
    let mut stack: Vec<(Option<Uuid>, String)> = vec![(None, root.clone())];
    while let Some((parent, prefix)) = stack.pop() {
        let child_folders = folders_by_parent.get(&parent).cloned().unwrap_or_default();
        let child_requests = requests_by_folder.get(&parent).cloned().unwrap_or_default();

        let mut entries: Vec<(i64, ManifestEntry)> = Vec::new();
        for folder in &child_folders {
            entries.push((
                folder.sort_order,
                ManifestEntry {
                    kind: ManifestEntryKind::Folder,
                    id: folder.id,
                    name: folder.name.clone(),
                },
            ));
        }
        for request in &child_requests {
            entries.push((
                request.sort_order,
                ManifestEntry {
                    kind: ManifestEntryKind::Request,
                    id: request.id,
                    name: request.name.clone(),
                },
            ));
        }
        entries.sort_by_key(|(order, _)| *order);

        let manifest = ManifestDocument {
            entries: entries.into_iter().map(|(_, e)| e).collect(),
        };
        let manifest_path = format!("{prefix}/_manifest.yaml");
        files.insert(manifest_path.clone(), emit(&manifest_path, &manifest)?);

        for request in &child_requests {
            let path = format!("{prefix}/{}.yaml", request.id);
            files.insert(path.clone(), serialize_request_document(request, sanitize)?);
        }

        for folder in &child_folders {
            // Path construction guards against malformed parent chains.
            folder_path(folder.id, &folders_by_id)?;
            let folder_prefix = format!("{prefix}/{}", folder.id);
            let folder_doc = FolderDocument {
                id: folder.id,
                name: folder.name.clone(),
                environment_hints: hints_for(&bundle.environment_hints, &folder.environment_ids),
                default_environment_hint: folder
                    .default_environment_id
                    .and_then(|id| bundle.environment_hints.get(&id).cloned()),
            };
            let folder_doc_path = format!("{folder_prefix}/_folder.yaml");
            files.insert(folder_doc_path.clone(), emit(&folder_doc_path, &folder_doc)?);
            stack.push((Some(folder.id), folder_prefix));
        }
    }

    Ok(files)
}

/// Serializes one request document (used by single-request pushes).
pub fn serialize_request_document(request: &Request, sanitize: bool) -> Result<String> {
    reject_ciphertext(&request.auth, request.id)?;
    let request = if sanitize {
        sanitize_request_data(request)
    } else {
        request.clone()
    };
    let doc = RequestDocument {
        id: request.id,
        name: request.name,
        method: request.method,
        url: request.url,
        headers: request.headers,
        query_params: request.query_params,
        body: request.body,
        body_type: request.body_type,
        auth: request.auth,
        scripts: request.scripts,
    };
    emit(&format!("{}.yaml", doc.id), &doc)
}

/// Relative path of a request file inside the collection directory.
pub fn request_file_path(
    collection_id: Uuid,
    request: &Request,
    folders_by_id: &HashMap<Uuid, &Folder>,
) -> Result<String> {
    match request.folder_id {
        Some(folder_id) => Ok(format!(
            "{collection_id}/{}/{}.yaml",
            folder_path(folder_id, folders_by_id)?,
            request.id
        )),
        None => Ok(format!("{collection_id}/{}.yaml", request.id)),
    }
}

/// Slash-joined folder path relative to the collection root, walking the
/// parent chain with a visited set.
fn folder_path(id: Uuid, folders_by_id: &HashMap<Uuid, &Folder>) -> Result<String> {
    let mut segments = Vec::new();
    let mut visited = HashSet::new();
    let mut cursor = Some(id);
    while let Some(current) = cursor {
        if !visited.insert(current) {
            return Err(SerializerError::FolderCycle(current));
        }
        let folder = folders_by_id
            .get(&current)
            .ok_or(SerializerError::FolderCycle(current))?;
        segments.push(current.to_string());
        cursor = folder.parent_id;
    }
    segments.reverse();
    Ok(segments.join("/"))
}

fn hints_for(hints: &BTreeMap<Uuid, String>, ids: &[Uuid]) -> Vec<String> {
    ids.iter().filter_map(|id| hints.get(id).cloned()).collect()
}

fn group_folders(folders: &[Folder]) -> HashMap<Option<Uuid>, Vec<&Folder>> {
    let mut map: HashMap<Option<Uuid>, Vec<&Folder>> = HashMap::new();
    for folder in folders {
        map.entry(folder.parent_id).or_default().push(folder);
    }
    for group in map.values_mut() {
        group.sort_by_key(|f| f.sort_order);
    }
    map
}

fn group_requests(requests: &[Request]) -> HashMap<Option<Uuid>, Vec<&Request>> {
    let mut map: HashMap<Option<Uuid>, Vec<&Request>> = HashMap::new();
    for request in requests {
        map.entry(request.folder_id).or_default().push(request);
    }
    for group in map.values_mut() {
        group.sort_by_key(|r| r.sort_order);
    }
    map
}

fn reject_ciphertext(auth: &AuthConfig, request_id: Uuid) -> Result<()> {
    let encrypted = match auth {
        AuthConfig::None => false,
        AuthConfig::Bearer { token } => token.starts_with("enc:"),
        AuthConfig::Basic { username, password } => {
            username.starts_with("enc:") || password.starts_with("enc:")
        }
        AuthConfig::ApiKey { value, .. } => value.starts_with("enc:"),
    };
    if encrypted {
        return Err(SerializerError::EncryptedInput(format!(
            "request {request_id} auth"
        )));
    }
    Ok(())
}

fn emit<T: serde::Serialize>(path: &str, doc: &T) -> Result<String> {
    serde_yaml::to_string(doc).map_err(|e| SerializerError::Emit {
        path: path.to_string(),
        message: e.to_string(),
    })
}
