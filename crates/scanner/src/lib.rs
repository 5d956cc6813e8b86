//! # Restbench Scanner
//!
//! Pre-push classification and redaction of sensitive data.
//!
//! Two classifiers run over a request:
//!
//! - **key-based**: a closed lowercase set of substrings covering tokens,
//!   API keys, passwords, cloud-provider credentials, and PII markers; any
//!   header, query-parameter, or JSON body key containing one flags its
//!   value — unless the value is exactly a `{{...}}` placeholder, which is
//!   a reference, not a secret
//! - **shape-based**: auth credentials always flag, whatever their key
//!
//! Sanitization produces *copies* with flagged values blanked; the
//! in-store originals are never mutated.

use restbench_core::model::Request;
use restbench_core::types::{AuthConfig, BodyType, KeyValueEntry};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Closed set of lowercase substrings that mark a key as sensitive.
pub const SENSITIVE_KEY_SUBSTRINGS: &[&str] = &[
    "token",
    "secret",
    "password",
    "passwd",
    "pwd",
    "apikey",
    "api_key",
    "api-key",
    "authorization",
    "credential",
    "private_key",
    "private-key",
    "access_key",
    "access-key",
    "client_secret",
    "session_id",
    "cookie",
    "aws_access_key_id",
    "aws_secret_access_key",
    "gcp_service_account",
    "azure_client_secret",
    "ssn",
    "credit_card",
    "card_number",
    "cvv",
];

/// Where a flagged value was found
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingSource {
    Header,
    QueryParam,
    Body,
    Auth,
    Variable,
    FormData,
}

/// One flagged value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensitiveFinding {
    pub source: FindingSource,
    pub request_name: Option<String>,
    pub request_id: Option<Uuid>,
    /// Field description within the source, e.g. a JSON pointer for bodies.
    pub field: String,
    pub key: String,
    pub masked_value: String,
}

/// True when the key contains any sensitive substring (case-insensitive).
pub fn is_sensitive_key(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    SENSITIVE_KEY_SUBSTRINGS.iter().any(|s| lower.contains(s))
}

/// True when the value is exactly one `{{...}}` placeholder.
pub fn is_template_placeholder(value: &str) -> bool {
    let trimmed = value.trim();
    trimmed.starts_with("{{")
        && trimmed.ends_with("}}")
        && !trimmed[2..trimmed.len() - 2].contains("{{")
}

fn mask(value: &str) -> String {
    let visible: String = value.chars().take(2).collect();
    format!("{visible}****")
}

fn flags(key: &str, value: &str) -> bool {
    is_sensitive_key(key) && !value.is_empty() && !is_template_placeholder(value)
}

/// Classifies one request; returns every flagged value.
pub fn scan_request(request: &Request) -> Vec<SensitiveFinding> {
    let mut findings = Vec::new();
    let tag = |source, field: String, key: String, value: &str| SensitiveFinding {
        source,
        request_name: Some(request.name.clone()),
        request_id: Some(request.id),
        field,
        key,
        masked_value: mask(value),
    };

    for entry in &request.headers {
        if flags(&entry.key, &entry.value) {
            findings.push(tag(
                FindingSource::Header,
                "headers".into(),
                entry.key.clone(),
                &entry.value,
            ));
        }
    }
    for entry in &request.query_params {
        if flags(&entry.key, &entry.value) {
            findings.push(tag(
                FindingSource::QueryParam,
                "query_params".into(),
                entry.key.clone(),
                &entry.value,
            ));
        }
    }

    // Shape-based: credentials always flag, placeholders excepted.
    match &request.auth {
        AuthConfig::None => {}
        AuthConfig::Bearer { token } => {
            if !token.is_empty() && !is_template_placeholder(token) {
                findings.push(tag(FindingSource::Auth, "auth".into(), "token".into(), token));
            }
        }
        AuthConfig::Basic { username, password } => {
            for (key, value) in [("username", username), ("password", password)] {
                if !value.is_empty() && !is_template_placeholder(value) {
                    findings.push(tag(FindingSource::Auth, "auth".into(), key.into(), value));
                }
            }
        }
        AuthConfig::ApiKey { key, value, .. } => {
            if !value.is_empty() && !is_template_placeholder(value) {
                findings.push(tag(FindingSource::Auth, "auth".into(), key.clone(), value));
            }
        }
    }

    if matches!(request.body_type, BodyType::Json) {
        if let Some(body) = &request.body {
            if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(body) {
                scan_body(&parsed, "", &mut |pointer, key, value| {
                    findings.push(SensitiveFinding {
                        source: FindingSource::Body,
                        request_name: Some(request.name.clone()),
                        request_id: Some(request.id),
                        field: pointer.to_string(),
                        key: key.to_string(),
                        masked_value: mask(value),
                    });
                });
            }
        }
    }

    findings
}

fn scan_body(node: &serde_json::Value, pointer: &str, hit: &mut impl FnMut(&str, &str, &str)) {
    match node {
        serde_json::Value::Object(map) => {
            for (key, child) in map {
                let child_pointer = format!("{pointer}/{key}");
                if let serde_json::Value::String(s) = child {
                    if flags(key, s) {
                        hit(&child_pointer, key, s);
                    }
                } else {
                    scan_body(child, &child_pointer, hit);
                }
            }
        }
        serde_json::Value::Array(items) => {
            for (index, child) in items.iter().enumerate() {
                scan_body(child, &format!("{pointer}/{index}"), hit);
            }
        }
        _ => {}
    }
}

/// Classifies collection-level variables by key.
pub fn scan_collection_variables(variables: &BTreeMap<String, String>) -> Vec<SensitiveFinding> {
    variables
        .iter()
        .filter(|(key, value)| flags(key, value))
        .map(|(key, value)| SensitiveFinding {
            source: FindingSource::Variable,
            request_name: None,
            request_id: None,
            field: "variables".into(),
            key: key.clone(),
            masked_value: mask(value),
        })
        .collect()
}

/// Copy of a request with every flagged value blanked.
///
/// `{{...}}` references survive; form-data local file paths are stripped.
pub fn sanitize_request_data(request: &Request) -> Request {
    let mut out = request.clone();

    let blank_entries = |entries: &mut Vec<KeyValueEntry>| {
        for entry in entries {
            if flags(&entry.key, &entry.value) {
                entry.value = String::new();
            }
        }
    };
    blank_entries(&mut out.headers);
    blank_entries(&mut out.query_params);

    out.auth = match out.auth {
        AuthConfig::None => AuthConfig::None,
        AuthConfig::Bearer { token } => AuthConfig::Bearer {
            token: keep_placeholder(token),
        },
        AuthConfig::Basic { username, password } => AuthConfig::Basic {
            username: keep_placeholder(username),
            password: keep_placeholder(password),
        },
        AuthConfig::ApiKey {
            key,
            value,
            in_header,
        } => AuthConfig::ApiKey {
            key,
            value: keep_placeholder(value),
            in_header,
        },
    };

    match out.body_type {
        BodyType::Json => {
            if let Some(body) = &out.body {
                if let Ok(mut parsed) = serde_json::from_str::<serde_json::Value>(body) {
                    sanitize_body(&mut parsed);
                    out.body = Some(parsed.to_string());
                }
            }
        }
        BodyType::FormData => {
            if let Some(body) = &out.body {
                if let Ok(mut parsed) = serde_json::from_str::<serde_json::Value>(body) {
                    strip_form_data_paths(&mut parsed);
                    sanitize_body(&mut parsed);
                    out.body = Some(parsed.to_string());
                }
            }
        }
        _ => {}
    }

    out
}

/// Copy of a collection variable map with flagged values blanked.
pub fn sanitize_collection_data(variables: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    variables
        .iter()
        .map(|(key, value)| {
            if flags(key, value) {
                (key.clone(), String::new())
            } else {
                (key.clone(), value.clone())
            }
        })
        .collect()
}

fn keep_placeholder(value: String) -> String {
    if is_template_placeholder(&value) {
        value
    } else {
        String::new()
    }
}

fn sanitize_body(node: &mut serde_json::Value) {
    match node {
        serde_json::Value::Object(map) => {
            for (key, child) in map.iter_mut() {
                if let serde_json::Value::String(s) = child {
                    if flags(key, s) {
                        *s = String::new();
                        continue;
                    }
                }
                sanitize_body(child);
            }
        }
        serde_json::Value::Array(items) => {
            for child in items {
                sanitize_body(child);
            }
        }
        _ => {}
    }
}

/// Form-data rows carry dialog-approved local paths under a `file` key;
/// those never leave the machine.
fn strip_form_data_paths(node: &mut serde_json::Value) {
    if let serde_json::Value::Array(rows) = node {
        for row in rows {
            if let serde_json::Value::Object(map) = row {
                if let Some(serde_json::Value::String(path)) = map.get_mut("file") {
                    *path = String::new();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use restbench_core::scripts::ScriptsConfig;
    use restbench_core::types::HttpMethod;

    fn request() -> Request {
        let now = Utc::now();
        Request {
            id: Uuid::new_v4(),
            collection_id: Uuid::new_v4(),
            folder_id: None,
            name: "login".into(),
            method: HttpMethod::Post,
            url: "https://api.example.com/login".into(),
            headers: Vec::new(),
            query_params: Vec::new(),
            body: None,
            body_type: BodyType::None,
            auth: AuthConfig::None,
            scripts: ScriptsConfig::default(),
            sort_order: 0,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_sensitive_header_key_flags_value() {
        let mut req = request();
        req.headers.push(KeyValueEntry::new("X-Api-Key", "abc123"));
        req.headers.push(KeyValueEntry::new("Accept", "application/json"));
        let findings = scan_request(&req);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].source, FindingSource::Header);
        assert_eq!(findings[0].key, "X-Api-Key");
        assert_eq!(findings[0].masked_value, "ab****");
    }

    #[test]
    fn test_placeholder_values_exempt() {
        let mut req = request();
        req.headers
            .push(KeyValueEntry::new("Authorization", "{{auth_header}}"));
        assert!(scan_request(&req).is_empty());
    }

    #[test]
    fn test_auth_always_flags_regardless_of_key() {
        let mut req = request();
        req.auth = AuthConfig::ApiKey {
            key: "harmless-name".into(),
            value: "real-secret".into(),
            in_header: true,
        };
        let findings = scan_request(&req);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].source, FindingSource::Auth);
    }

    #[test]
    fn test_json_body_keys_scanned_recursively() {
        let mut req = request();
        req.body_type = BodyType::Json;
        req.body = Some(r#"{"user":{"password":"hunter2","name":"al"},"items":[{"token":"t"}]}"#.into());
        let findings = scan_request(&req);
        let fields: Vec<_> = findings.iter().map(|f| f.field.as_str()).collect();
        assert!(fields.contains(&"/user/password"));
        assert!(fields.contains(&"/items/0/token"));
    }

    #[test]
    fn test_non_json_body_ignored() {
        let mut req = request();
        req.body_type = BodyType::Raw;
        req.body = Some("password=hunter2".into());
        assert!(scan_request(&req).is_empty());
    }

    #[test]
    fn test_sanitize_blanks_but_keeps_placeholders() {
        let mut req = request();
        req.headers.push(KeyValueEntry::new("X-Api-Key", "abc123"));
        req.auth = AuthConfig::Bearer {
            token: "{{token}}".into(),
        };
        let clean = sanitize_request_data(&req);
        assert_eq!(clean.headers[0].value, "");
        assert_eq!(clean.auth, AuthConfig::Bearer { token: "{{token}}".into() });
        // The original is untouched.
        assert_eq!(req.headers[0].value, "abc123");
    }

    #[test]
    fn test_sanitize_form_data_strips_file_paths() {
        let mut req = request();
        req.body_type = BodyType::FormData;
        req.body = Some(r#"[{"key":"upload","file":"/home/al/report.pdf"}]"#.into());
        let clean = sanitize_request_data(&req);
        let parsed: serde_json::Value = serde_json::from_str(clean.body.as_deref().unwrap()).unwrap();
        assert_eq!(parsed[0]["file"], "");
    }

    #[test]
    fn test_collection_variables_classified_and_sanitized() {
        let mut vars = BTreeMap::new();
        vars.insert("api_token".to_string(), "abc".to_string());
        vars.insert("base_url".to_string(), "http://x".to_string());
        let findings = scan_collection_variables(&vars);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].key, "api_token");

        let clean = sanitize_collection_data(&vars);
        assert_eq!(clean["api_token"], "");
        assert_eq!(clean["base_url"], "http://x");
    }
}
