//! Encode/decode helpers for JSON-valued columns and timestamps

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Result, StoreError};

pub(crate) fn decode<T: DeserializeOwned>(column: &'static str, raw: &str) -> Result<T> {
    serde_json::from_str(raw).map_err(|source| StoreError::CorruptColumn { column, source })
}

pub(crate) fn encode<T: Serialize>(value: &T) -> String {
    // Our column shapes contain no non-string map keys or non-finite
    // floats, the only ways serde_json can fail.
    serde_json::to_string(value).expect("column shape is always serializable")
}

pub(crate) fn encode_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

pub(crate) fn decode_ts(column: &'static str, raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Validation(format!("bad timestamp in {column}: {e}")))
}

pub(crate) fn decode_ts_opt(
    column: &'static str,
    raw: Option<String>,
) -> Result<Option<DateTime<Utc>>> {
    raw.map(|s| decode_ts(column, &s)).transpose()
}
