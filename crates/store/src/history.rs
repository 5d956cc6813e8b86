//! Request history repository
//!
//! History rows are inserted by the request-sending collaborator and
//! pruned at startup by retention age. Bodies are stored as captured; the
//! scrub path lives with the sensitive-data scanner.

use chrono::{Duration, Utc};
use restbench_core::constants::clamp_history_retention_days;
use restbench_core::model::RequestHistory;
use restbench_core::types::HttpMethod;
use rusqlite::{params, OptionalExtension, Row};
use tracing::debug;
use uuid::Uuid;

use crate::db::Store;
use crate::error::{Result, StoreError};
use crate::jsonx;
use crate::workspaces::{parse_id, parse_ts};

/// Insert parameters; id and executed-at are assigned by the store.
#[derive(Debug, Clone)]
pub struct NewHistory {
    pub request_id: Uuid,
    pub method: HttpMethod,
    pub url: String,
    pub status: u16,
    pub request_headers: Vec<restbench_core::types::KeyValueEntry>,
    pub response_headers: Vec<restbench_core::types::KeyValueEntry>,
    pub request_body: Option<String>,
    pub response_body: Option<String>,
    pub duration_ms: u64,
}

impl Store {
    pub fn insert_history(&self, entry: NewHistory) -> Result<RequestHistory> {
        let now = Self::now();
        let id = Uuid::new_v4();
        let conn = self.lock();
        conn.execute(
            "INSERT INTO request_histories (id, request_id, method, url, status,
                 request_headers, response_headers, request_body, response_body,
                 duration_ms, executed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                id.to_string(),
                entry.request_id.to_string(),
                entry.method.as_str(),
                entry.url,
                entry.status,
                jsonx::encode(&entry.request_headers),
                jsonx::encode(&entry.response_headers),
                entry.request_body,
                entry.response_body,
                entry.duration_ms as i64,
                jsonx::encode_ts(&now)
            ],
        )?;
        drop(conn);
        self.find_history(id)
    }

    pub fn find_history(&self, id: Uuid) -> Result<RequestHistory> {
        let conn = self.lock();
        let row = conn
            .query_row(
                &format!("{SELECT_HISTORY} WHERE id = ?1"),
                [id.to_string()],
                history_from_row,
            )
            .optional()?;
        row.ok_or_else(|| StoreError::not_found("history", id))?
    }

    /// Histories of one request, newest first.
    pub fn list_history(&self, request_id: Uuid, limit: Option<u32>) -> Result<Vec<RequestHistory>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "{SELECT_HISTORY} WHERE request_id = ?1 ORDER BY executed_at DESC LIMIT ?2"
        ))?;
        let rows = stmt.query_map(
            params![request_id.to_string(), limit.map(i64::from).unwrap_or(-1)],
            history_from_row,
        )?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row??);
        }
        Ok(out)
    }

    pub fn remove_history(&self, id: Uuid) -> Result<()> {
        let conn = self.lock();
        let affected =
            conn.execute("DELETE FROM request_histories WHERE id = ?1", [id.to_string()])?;
        if affected == 0 {
            return Err(StoreError::not_found("history", id));
        }
        Ok(())
    }

    pub fn clear_history(&self, request_id: Uuid) -> Result<usize> {
        let conn = self.lock();
        Ok(conn.execute(
            "DELETE FROM request_histories WHERE request_id = ?1",
            [request_id.to_string()],
        )?)
    }

    /// Startup prune: reads the configured retention and deletes stale
    /// rows.
    pub fn prune_history_at_startup(&self) -> Result<usize> {
        let days = self
            .get_setting("history_retention_days", None)?
            .and_then(|v| v.parse().ok())
            .unwrap_or(restbench_core::constants::HISTORY_RETENTION_DAYS_DEFAULT);
        self.prune_history(days)
    }

    /// Deletes rows older than the retention window.
    ///
    /// `retention_days` is clamped into the supported range before use.
    pub fn prune_history(&self, retention_days: u32) -> Result<usize> {
        let days = clamp_history_retention_days(retention_days);
        let cutoff = Utc::now() - Duration::days(days as i64);
        let conn = self.lock();
        let removed = conn.execute(
            "DELETE FROM request_histories WHERE executed_at < ?1",
            [jsonx::encode_ts(&cutoff)],
        )?;
        debug!(removed, days, "Pruned request history");
        Ok(removed)
    }
}

const SELECT_HISTORY: &str = "SELECT id, request_id, method, url, status, request_headers,
    response_headers, request_body, response_body, duration_ms, executed_at
    FROM request_histories";

fn history_from_row(r: &Row<'_>) -> rusqlite::Result<Result<RequestHistory>> {
    let id: String = r.get(0)?;
    let request_id: String = r.get(1)?;
    let method: String = r.get(2)?;
    let url: String = r.get(3)?;
    let status: u16 = r.get(4)?;
    let request_headers: String = r.get(5)?;
    let response_headers: String = r.get(6)?;
    let request_body: Option<String> = r.get(7)?;
    let response_body: Option<String> = r.get(8)?;
    let duration_ms: i64 = r.get(9)?;
    let executed_at: String = r.get(10)?;

    Ok((|| {
        Ok(RequestHistory {
            id: parse_id("history", &id)?,
            request_id: parse_id("request", &request_id)?,
            method: HttpMethod::parse(&method)
                .ok_or_else(|| StoreError::Validation(format!("bad method: {method}")))?,
            url,
            status,
            request_headers: jsonx::decode("request_histories.request_headers", &request_headers)?,
            response_headers: jsonx::decode(
                "request_histories.response_headers",
                &response_headers,
            )?,
            request_body,
            response_body,
            duration_ms: duration_ms as u64,
            executed_at: parse_ts("request_histories.executed_at", &executed_at)?,
        })
    })())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::test_store;
    use restbench_core::types::KeyValueEntry;

    fn request(store: &Store) -> Uuid {
        let cid = store.create_collection(None, "C").unwrap().id;
        store
            .create_request(cid, None, "r", HttpMethod::Get)
            .unwrap()
            .id
    }

    fn entry(request_id: Uuid) -> NewHistory {
        NewHistory {
            request_id,
            method: HttpMethod::Get,
            url: "https://api.example.com/v1".into(),
            status: 200,
            request_headers: vec![KeyValueEntry::new("Accept", "application/json")],
            response_headers: Vec::new(),
            request_body: None,
            response_body: Some(r#"{"ok":true}"#.into()),
            duration_ms: 42,
        }
    }

    #[test]
    fn test_insert_and_list_newest_first() {
        let store = test_store();
        let rid = request(&store);
        let first = store.insert_history(entry(rid)).unwrap();
        let second = store.insert_history(entry(rid)).unwrap();
        let listed = store.list_history(rid, None).unwrap();
        assert_eq!(listed.len(), 2);
        // Insertion order ties on the timestamp are acceptable; both rows
        // must be present and the limit honored.
        assert!(listed.iter().any(|h| h.id == first.id));
        assert!(listed.iter().any(|h| h.id == second.id));
        assert_eq!(store.list_history(rid, Some(1)).unwrap().len(), 1);
    }

    #[test]
    fn test_prune_removes_only_stale_rows() {
        let store = test_store();
        let rid = request(&store);
        let kept = store.insert_history(entry(rid)).unwrap();

        // Backdate one row beyond the retention window.
        let stale = store.insert_history(entry(rid)).unwrap();
        let old = Utc::now() - Duration::days(90);
        store
            .lock()
            .execute(
                "UPDATE request_histories SET executed_at = ?2 WHERE id = ?1",
                params![stale.id.to_string(), jsonx::encode_ts(&old)],
            )
            .unwrap();

        let removed = store.prune_history(30).unwrap();
        assert_eq!(removed, 1);
        let listed = store.list_history(rid, None).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, kept.id);
    }

    #[test]
    fn test_prune_clamps_retention() {
        let store = test_store();
        let rid = request(&store);
        store.insert_history(entry(rid)).unwrap();
        // 0 clamps to 1 day; a fresh row survives.
        assert_eq!(store.prune_history(0).unwrap(), 0);
    }

    #[test]
    fn test_delete_request_cascades_history() {
        let store = test_store();
        let rid = request(&store);
        store.insert_history(entry(rid)).unwrap();
        store.remove_request(rid).unwrap();
        assert!(store.list_history(rid, None).unwrap().is_empty());
    }
}
