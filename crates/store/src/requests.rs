//! Request repository
//!
//! Auth credentials are encrypted before the JSON column is written and
//! decrypted on read; no caller ever sees `enc:` ciphertext in an
//! `AuthConfig`.

use restbench_core::model::Request;
use restbench_core::scripts::ScriptsConfig;
use restbench_core::types::{AuthConfig, BodyType, HttpMethod, KeyValueEntry};
use restbench_crypto::FieldCipher;
use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

use crate::db::Store;
use crate::error::{Result, StoreError};
use crate::jsonx;
use crate::workspaces::{parse_id, parse_ts};

#[derive(Debug, Default, Clone)]
pub struct RequestPatch {
    pub name: Option<String>,
    pub method: Option<HttpMethod>,
    pub url: Option<String>,
    pub headers: Option<Vec<KeyValueEntry>>,
    pub query_params: Option<Vec<KeyValueEntry>>,
    pub body: Option<Option<String>>,
    pub body_type: Option<BodyType>,
    pub auth: Option<AuthConfig>,
    pub scripts: Option<ScriptsConfig>,
    pub sort_order: Option<i64>,
}

impl Store {
    pub fn create_request(
        &self,
        collection_id: Uuid,
        folder_id: Option<Uuid>,
        name: &str,
        method: HttpMethod,
    ) -> Result<Request> {
        let now = Self::now();
        let id = Uuid::new_v4();
        let conn = self.lock();
        let sort_order: i64 = conn.query_row(
            "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM requests
             WHERE collection_id = ?1 AND folder_id IS ?2",
            params![collection_id.to_string(), folder_id.map(|f| f.to_string())],
            |r| r.get(0),
        )?;
        conn.execute(
            "INSERT INTO requests (id, collection_id, folder_id, name, method, sort_order,
                 created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            params![
                id.to_string(),
                collection_id.to_string(),
                folder_id.map(|f| f.to_string()),
                name,
                method.as_str(),
                sort_order,
                jsonx::encode_ts(&now)
            ],
        )?;
        drop(conn);
        self.mark_collection_dirty(collection_id)?;
        self.find_request(id)
    }

    pub fn find_request(&self, id: Uuid) -> Result<Request> {
        let conn = self.lock();
        let row = conn
            .query_row(
                &format!("{SELECT_REQUEST} WHERE id = ?1"),
                [id.to_string()],
                request_from_row,
            )
            .optional()?;
        drop(conn);
        let request = row.ok_or_else(|| StoreError::not_found("request", id))??;
        self.decrypt_request(request)
    }

    /// Requests under `(collection, folder)`, ordered. `None` lists the
    /// collection root.
    pub fn list_requests(&self, collection_id: Uuid, folder_id: Option<Uuid>) -> Result<Vec<Request>> {
        let raw = {
            let conn = self.lock();
            let mut stmt = conn.prepare(&format!(
                "{SELECT_REQUEST} WHERE collection_id = ?1 AND folder_id IS ?2 ORDER BY sort_order"
            ))?;
            let rows = stmt.query_map(
                params![collection_id.to_string(), folder_id.map(|f| f.to_string())],
                request_from_row,
            )?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row??);
            }
            out
        };
        raw.into_iter().map(|r| self.decrypt_request(r)).collect()
    }

    /// Every request of a collection, for serialization.
    pub fn list_all_requests(&self, collection_id: Uuid) -> Result<Vec<Request>> {
        let raw = {
            let conn = self.lock();
            let mut stmt = conn.prepare(&format!(
                "{SELECT_REQUEST} WHERE collection_id = ?1 ORDER BY sort_order"
            ))?;
            let rows = stmt.query_map([collection_id.to_string()], request_from_row)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row??);
            }
            out
        };
        raw.into_iter().map(|r| self.decrypt_request(r)).collect()
    }

    pub fn update_request(&self, id: Uuid, patch: RequestPatch) -> Result<Request> {
        let current = self.find_request(id)?;
        let name = patch.name.unwrap_or(current.name);
        let method = patch.method.unwrap_or(current.method);
        let url = patch.url.unwrap_or(current.url);
        let headers = patch.headers.unwrap_or(current.headers);
        let query_params = patch.query_params.unwrap_or(current.query_params);
        let body = patch.body.unwrap_or(current.body);
        let body_type = patch.body_type.unwrap_or(current.body_type);
        let auth = patch.auth.unwrap_or(current.auth);
        let scripts = patch.scripts.unwrap_or(current.scripts);
        let sort_order = patch.sort_order.unwrap_or(current.sort_order);

        let auth_encrypted = encrypt_auth(self.cipher(), &auth)?;
        let now = Self::now();
        let conn = self.lock();
        conn.execute(
            "UPDATE requests SET name = ?2, method = ?3, url = ?4, headers = ?5,
                 query_params = ?6, body = ?7, body_type = ?8, auth = ?9, scripts = ?10,
                 sort_order = ?11, updated_at = ?12
             WHERE id = ?1",
            params![
                id.to_string(),
                name,
                method.as_str(),
                url,
                jsonx::encode(&headers),
                jsonx::encode(&query_params),
                body,
                body_type.as_str(),
                jsonx::encode(&auth_encrypted),
                jsonx::encode(&scripts),
                sort_order,
                jsonx::encode_ts(&now)
            ],
        )?;
        drop(conn);
        self.mark_collection_dirty(current.collection_id)?;
        self.find_request(id)
    }

    pub fn remove_request(&self, id: Uuid) -> Result<()> {
        let request = self.find_request(id)?;
        let conn = self.lock();
        conn.execute("DELETE FROM requests WHERE id = ?1", [id.to_string()])?;
        drop(conn);
        self.mark_collection_dirty(request.collection_id)
    }

    /// Copies a request in place, appended to its sibling list.
    pub fn duplicate_request(&self, id: Uuid) -> Result<Request> {
        let source = self.find_request(id)?;
        let copy = self.create_request(
            source.collection_id,
            source.folder_id,
            &format!("{} (copy)", source.name),
            source.method,
        )?;
        self.update_request(
            copy.id,
            RequestPatch {
                url: Some(source.url),
                headers: Some(source.headers),
                query_params: Some(source.query_params),
                body: Some(source.body),
                body_type: Some(source.body_type),
                auth: Some(source.auth),
                scripts: Some(source.scripts),
                ..Default::default()
            },
        )
    }

    /// Reparents a request within its collection.
    pub fn move_request_to_folder(&self, id: Uuid, folder_id: Option<Uuid>) -> Result<Request> {
        let current = self.find_request(id)?;
        if let Some(folder) = folder_id {
            let target = self.find_folder(folder)?;
            if target.collection_id != current.collection_id {
                return Err(StoreError::Validation(
                    "Cannot move a request across collections".to_string(),
                ));
            }
        }
        let now = Self::now();
        let conn = self.lock();
        let sort_order: i64 = conn.query_row(
            "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM requests
             WHERE collection_id = ?1 AND folder_id IS ?2",
            params![
                current.collection_id.to_string(),
                folder_id.map(|f| f.to_string())
            ],
            |r| r.get(0),
        )?;
        conn.execute(
            "UPDATE requests SET folder_id = ?2, sort_order = ?3, updated_at = ?4 WHERE id = ?1",
            params![
                id.to_string(),
                folder_id.map(|f| f.to_string()),
                sort_order,
                jsonx::encode_ts(&now)
            ],
        )?;
        drop(conn);
        self.mark_collection_dirty(current.collection_id)?;
        self.find_request(id)
    }

    pub fn reorder_requests(&self, ids: &[Uuid]) -> Result<()> {
        let now = Self::now();
        let mut collection_id = None;
        {
            let mut conn = self.lock();
            let tx = conn.transaction()?;
            for (index, id) in ids.iter().enumerate() {
                tx.execute(
                    "UPDATE requests SET sort_order = ?2, updated_at = ?3 WHERE id = ?1",
                    params![id.to_string(), index as i64, jsonx::encode_ts(&now)],
                )?;
            }
            if let Some(first) = ids.first() {
                collection_id = tx
                    .query_row(
                        "SELECT collection_id FROM requests WHERE id = ?1",
                        [first.to_string()],
                        |r| r.get::<_, String>(0),
                    )
                    .optional()?;
            }
            tx.commit()?;
        }
        if let Some(cid) = collection_id {
            self.mark_collection_dirty(parse_id("collection", &cid)?)?;
        }
        Ok(())
    }

    fn decrypt_request(&self, mut request: Request) -> Result<Request> {
        request.auth = decrypt_auth(self.cipher(), request.auth)?;
        Ok(request)
    }
}

/// Encrypts the credential-bearing fields of an auth config.
pub(crate) fn encrypt_auth(cipher: &FieldCipher, auth: &AuthConfig) -> Result<AuthConfig> {
    Ok(match auth {
        AuthConfig::None => AuthConfig::None,
        AuthConfig::Bearer { token } => AuthConfig::Bearer {
            token: cipher.encrypt_field(token)?,
        },
        AuthConfig::Basic { username, password } => AuthConfig::Basic {
            username: cipher.encrypt_field(username)?,
            password: cipher.encrypt_field(password)?,
        },
        AuthConfig::ApiKey {
            key,
            value,
            in_header,
        } => AuthConfig::ApiKey {
            key: key.clone(),
            value: cipher.encrypt_field(value)?,
            in_header: *in_header,
        },
    })
}

pub(crate) fn decrypt_auth(cipher: &FieldCipher, auth: AuthConfig) -> Result<AuthConfig> {
    Ok(match auth {
        AuthConfig::None => AuthConfig::None,
        AuthConfig::Bearer { token } => AuthConfig::Bearer {
            token: cipher.decrypt_field(&token)?,
        },
        AuthConfig::Basic { username, password } => AuthConfig::Basic {
            username: cipher.decrypt_field(&username)?,
            password: cipher.decrypt_field(&password)?,
        },
        AuthConfig::ApiKey {
            key,
            value,
            in_header,
        } => AuthConfig::ApiKey {
            key,
            value: cipher.decrypt_field(&value)?,
            in_header,
        },
    })
}

const SELECT_REQUEST: &str = "SELECT id, collection_id, folder_id, name, method, url, headers,
    query_params, body, body_type, auth, scripts, sort_order, created_at, updated_at FROM requests";

fn request_from_row(r: &Row<'_>) -> rusqlite::Result<Result<Request>> {
    let id: String = r.get(0)?;
    let collection_id: String = r.get(1)?;
    let folder_id: Option<String> = r.get(2)?;
    let name: String = r.get(3)?;
    let method: String = r.get(4)?;
    let url: String = r.get(5)?;
    let headers: String = r.get(6)?;
    let query_params: String = r.get(7)?;
    let body: Option<String> = r.get(8)?;
    let body_type: String = r.get(9)?;
    let auth: String = r.get(10)?;
    let scripts: String = r.get(11)?;
    let sort_order: i64 = r.get(12)?;
    let created_at: String = r.get(13)?;
    let updated_at: String = r.get(14)?;

    Ok((|| {
        Ok(Request {
            id: parse_id("request", &id)?,
            collection_id: parse_id("collection", &collection_id)?,
            folder_id: folder_id
                .as_deref()
                .map(|f| parse_id("folder", f))
                .transpose()?,
            name,
            method: HttpMethod::parse(&method)
                .ok_or_else(|| StoreError::Validation(format!("bad method: {method}")))?,
            url,
            headers: jsonx::decode("requests.headers", &headers)?,
            query_params: jsonx::decode("requests.query_params", &query_params)?,
            body,
            body_type: BodyType::parse(&body_type)
                .ok_or_else(|| StoreError::Validation(format!("bad body type: {body_type}")))?,
            auth: jsonx::decode("requests.auth", &auth)?,
            scripts: jsonx::decode("requests.scripts", &scripts)?,
            sort_order,
            created_at: parse_ts("requests.created_at", &created_at)?,
            updated_at: parse_ts("requests.updated_at", &updated_at)?,
        })
    })())
}
