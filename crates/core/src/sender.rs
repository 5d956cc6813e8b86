//! Contract for the HTTP request-sending collaborator
//!
//! The sender itself lives outside this core; the script executor and the
//! application shell talk to it through [`RequestSender`]. Responses always
//! arrive in one uniform shape — transport failures become a synthetic
//! `status: 0` response so downstream consumers never branch on error kind.

use crate::constants::{ALLOWED_URL_SCHEMES, RESPONSE_BODY_MAX_BYTES};
use crate::error::{Error, Result};
use crate::types::{HttpMethod, KeyValueEntry};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use url::Url;

/// A fully resolved request, ready to go on the wire
///
/// All `{{name}}` placeholders have been substituted by the time this shape
/// is constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreparedRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<KeyValueEntry>,
    pub query_params: Vec<KeyValueEntry>,
    pub body: Option<String>,
    /// Timeout in seconds, already clamped to the supported range.
    pub timeout_secs: u64,
}

/// Uniform response shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SenderResponse {
    /// HTTP status, or 0 for a synthetic transport-failure response.
    pub status: u16,
    pub status_text: String,
    pub headers: Vec<KeyValueEntry>,
    pub body: String,
    pub duration_ms: u64,
}

impl SenderResponse {
    /// Builds the synthetic shape used for transport failures and
    /// cancellation, keeping one uniform response shape downstream.
    pub fn synthetic_error(message: impl Into<String>) -> Self {
        Self {
            status: 0,
            status_text: message.into(),
            headers: Vec::new(),
            body: String::new(),
            duration_ms: 0,
        }
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.key.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }
}

/// The injected request-sending collaborator
///
/// Implementations must honor cancellation within a bounded time; a
/// cancelled send resolves to the synthetic error shape rather than an Err.
#[async_trait]
pub trait RequestSender: Send + Sync {
    async fn send(
        &self,
        request: PreparedRequest,
        cancel: CancellationToken,
    ) -> Result<SenderResponse>;
}

/// Pre-send validation shared by every dispatch path.
///
/// Rejects before any side effect: non-whitelisted URL schemes and bodies
/// above the content-length cap.
pub fn validate_prepared(request: &PreparedRequest) -> Result<()> {
    let url = Url::parse(&request.url)
        .map_err(|e| Error::Validation(format!("Invalid URL '{}': {}", request.url, e)))?;
    if !ALLOWED_URL_SCHEMES.contains(&url.scheme()) {
        return Err(Error::Validation(format!(
            "URL scheme '{}' is not allowed",
            url.scheme()
        )));
    }
    if let Some(body) = &request.body {
        if body.len() as u64 > RESPONSE_BODY_MAX_BYTES {
            return Err(Error::Validation(format!(
                "Request body of {} bytes exceeds the {} byte cap",
                body.len(),
                RESPONSE_BODY_MAX_BYTES
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prepared(url: &str) -> PreparedRequest {
        PreparedRequest {
            method: HttpMethod::Get,
            url: url.into(),
            headers: Vec::new(),
            query_params: Vec::new(),
            body: None,
            timeout_secs: 30,
        }
    }

    #[test]
    fn test_scheme_whitelist() {
        assert!(validate_prepared(&prepared("https://api.example.com")).is_ok());
        assert!(validate_prepared(&prepared("http://localhost:8080")).is_ok());
        assert!(matches!(
            validate_prepared(&prepared("ftp://example.com")),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            validate_prepared(&prepared("file:///etc/passwd")),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_invalid_url_rejected() {
        assert!(matches!(
            validate_prepared(&prepared("not a url")),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_synthetic_error_shape() {
        let resp = SenderResponse::synthetic_error("connection refused");
        assert_eq!(resp.status, 0);
        assert_eq!(resp.status_text, "connection refused");
        assert!(resp.body.is_empty());
    }

    #[test]
    fn test_header_lookup_case_insensitive() {
        let mut resp = SenderResponse::synthetic_error("");
        resp.headers.push(KeyValueEntry::new("X-Trace-Id", "abc"));
        assert_eq!(resp.header("x-trace-id"), Some("abc"));
        assert_eq!(resp.header("missing"), None);
    }
}
