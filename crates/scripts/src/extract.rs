//! Response-value extraction grammar
//!
//! Sources:
//!
//! - `status` — the status code as a decimal string
//! - `header.<Name>` — header value, name matched case-insensitively
//! - `body.<path>` — dotted path into the parsed JSON body with optional
//!   `[n]` array indices (`body.data.items[0].id`)
//!
//! A non-JSON body or a missed path yields `None`; the caller treats that
//! as a no-op, never an error.

use restbench_core::sender::SenderResponse;
use std::sync::OnceLock;

/// Evaluates an extraction source against a response.
pub fn extract_value(source: &str, response: &SenderResponse) -> Option<String> {
    if source == "status" {
        return Some(response.status.to_string());
    }
    if let Some(name) = source.strip_prefix("header.") {
        return response.header(name).map(String::from);
    }
    if let Some(path) = source.strip_prefix("body.") {
        let body: serde_json::Value = serde_json::from_str(&response.body).ok()?;
        return walk_body(&body, path);
    }
    None
}

fn walk_body(body: &serde_json::Value, path: &str) -> Option<String> {
    let mut node = body;
    for segment in path.split('.') {
        let (name, indices) = split_indices(segment)?;
        if !name.is_empty() {
            node = node.as_object()?.get(name)?;
        }
        for index in indices {
            node = node.as_array()?.get(index)?;
        }
    }
    Some(render(node))
}

/// Splits `items[0][1]` into `("items", [0, 1])`.
fn split_indices(segment: &str) -> Option<(&str, Vec<usize>)> {
    match segment.find('[') {
        None => Some((segment, Vec::new())),
        Some(pos) => {
            let (name, rest) = segment.split_at(pos);
            let mut indices = Vec::new();
            for part in rest.split('[').skip(1) {
                let index = part.strip_suffix(']')?;
                indices.push(index.parse().ok()?);
            }
            Some((name, indices))
        }
    }
}

fn render(node: &serde_json::Value) -> String {
    match node {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Removes every `{{...}}` pattern from an extracted value so a response
/// cannot inject templates that would resolve secrets on the next send.
pub fn strip_templates(value: &str) -> String {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = RE.get_or_init(|| regex::Regex::new(r"\{\{[^}]*\}\}").expect("valid regex"));
    re.replace_all(value, "").into_owned()
}
