//! Frozen limits and key sets
//!
//! These values are part of the persisted/observable behavior of the core
//! and must not drift between releases.

/// Upper bound on `{{name}}` re-substitution passes.
///
/// Bounds worst-case expansion of self-referencing variable values; when the
/// bound is hit the last-iteration result is returned as-is.
pub const MAX_VARIABLE_NESTING: usize = 10;

/// Upper bound on pre-request dependency chain length.
pub const MAX_SCRIPT_CHAIN_DEPTH: usize = 3;

/// Capacity of the in-memory session log ring buffer.
pub const SESSION_LOG_MAX_ENTRIES: usize = 100;

/// Default request-history retention in days.
pub const HISTORY_RETENTION_DAYS_DEFAULT: u32 = 30;

/// Inclusive clamp bounds for the history retention setting.
pub const HISTORY_RETENTION_DAYS_MIN: u32 = 1;
pub const HISTORY_RETENTION_DAYS_MAX: u32 = 365;

/// Response bodies above this content-length are rejected by the sender.
pub const RESPONSE_BODY_MAX_BYTES: u64 = 50 * 1024 * 1024;

/// Default network timeout for user requests, seconds.
pub const REQUEST_TIMEOUT_SECS_DEFAULT: u64 = 30;

/// Inclusive clamp bounds for the configurable request timeout, seconds.
pub const REQUEST_TIMEOUT_SECS_MIN: u64 = 1;
pub const REQUEST_TIMEOUT_SECS_MAX: u64 = 300;

/// Fixed timeout for git adapter requests, seconds.
pub const GIT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Only these URL schemes may be sent.
pub const ALLOWED_URL_SCHEMES: &[&str] = &["http", "https"];

/// Effective maximum folder nesting depth inside a collection.
pub const MAX_FOLDER_DEPTH: usize = 3;

/// Setting keys whose values are encrypted at rest and filtered from bulk reads.
pub const SENSITIVE_SETTING_KEYS: &[&str] = &[
    "sync.token",
    "vault.token",
    "vault.role_id",
    "vault.secret_id",
];

/// Setting keys that invalidate cached secret providers when mutated.
pub const PROVIDER_INVALIDATING_KEYS: &[&str] = &[
    "vault.url",
    "vault.auth_method",
    "vault.token",
    "vault.role_id",
    "vault.secret_id",
    "vault.namespace",
    "vault.mount",
    "vault.verify_ssl",
];

/// Setting keys that reject writes through the settings service.
pub const READONLY_SETTING_PREFIXES: &[&str] = &["encryption.", "app.version"];

/// Returns true when `key` is in the sensitive setting set.
pub fn is_sensitive_setting(key: &str) -> bool {
    SENSITIVE_SETTING_KEYS.contains(&key)
}

/// Returns true when `key` may not be written through the settings service.
pub fn is_readonly_setting(key: &str) -> bool {
    READONLY_SETTING_PREFIXES
        .iter()
        .any(|p| key == p.trim_end_matches('.') || key.starts_with(p))
}

/// Returns true when mutating `key` must reset cached secret providers.
pub fn is_provider_invalidating(key: &str) -> bool {
    PROVIDER_INVALIDATING_KEYS.contains(&key)
}

/// Clamps a history retention value into the supported range.
pub fn clamp_history_retention_days(days: u32) -> u32 {
    days.clamp(HISTORY_RETENTION_DAYS_MIN, HISTORY_RETENTION_DAYS_MAX)
}

/// Clamps a request timeout into the supported range.
pub fn clamp_request_timeout_secs(secs: u64) -> u64 {
    secs.clamp(REQUEST_TIMEOUT_SECS_MIN, REQUEST_TIMEOUT_SECS_MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retention_clamp_bounds() {
        assert_eq!(clamp_history_retention_days(0), 1);
        assert_eq!(clamp_history_retention_days(30), 30);
        assert_eq!(clamp_history_retention_days(9999), 365);
    }

    #[test]
    fn test_timeout_clamp_bounds() {
        assert_eq!(clamp_request_timeout_secs(0), 1);
        assert_eq!(clamp_request_timeout_secs(30), 30);
        assert_eq!(clamp_request_timeout_secs(100_000), 300);
    }

    #[test]
    fn test_readonly_keys() {
        assert!(is_readonly_setting("encryption.migrated"));
        assert!(is_readonly_setting("app.version"));
        assert!(!is_readonly_setting("app.theme"));
        assert!(!is_readonly_setting("vault.url"));
    }

    #[test]
    fn test_sensitive_keys_are_provider_invalidating_where_vault_scoped() {
        assert!(is_sensitive_setting("vault.token"));
        assert!(is_provider_invalidating("vault.token"));
        assert!(is_sensitive_setting("sync.token"));
        assert!(!is_provider_invalidating("sync.token"));
    }
}
