//! `{{name}}` template substitution
//!
//! Unknown names stay in place literally. Substitution re-runs until the
//! text stops changing or the nesting bound is hit; hitting the bound
//! returns the last-iteration result rather than an error — the bound is
//! the cycle guard.

use restbench_core::constants::MAX_VARIABLE_NESTING;
use restbench_core::types::KeyValueEntry;
use std::collections::BTreeMap;
use std::sync::OnceLock;

fn placeholder_re() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"\{\{\s*([^{}\s]+)\s*\}\}").expect("valid regex"))
}

/// Single substitution pass.
fn substitute_once(text: &str, vars: &BTreeMap<String, String>) -> String {
    placeholder_re()
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let name = &caps[1];
            match vars.get(name) {
                Some(value) => value.clone(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Replaces every `{{name}}` occurrence, re-running while the output still
/// changes, up to `MAX_VARIABLE_NESTING` passes.
pub fn substitute(text: &str, vars: &BTreeMap<String, String>) -> String {
    let mut current = text.to_string();
    for _ in 0..MAX_VARIABLE_NESTING {
        let next = substitute_once(&current, vars);
        if next == current {
            return next;
        }
        current = next;
    }
    current
}

/// Substitutes within both keys and values of a record.
pub fn substitute_record(
    record: &BTreeMap<String, String>,
    vars: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    record
        .iter()
        .map(|(k, v)| (substitute(k, vars), substitute(v, vars)))
        .collect()
}

/// Substitutes within the keys and values of header/query rows; the
/// enabled flag passes through.
pub fn substitute_entries(
    entries: &[KeyValueEntry],
    vars: &BTreeMap<String, String>,
) -> Vec<KeyValueEntry> {
    entries
        .iter()
        .map(|e| KeyValueEntry {
            key: substitute(&e.key, vars),
            value: substitute(&e.value, vars),
            enabled: e.enabled,
        })
        .collect()
}
