//! Pre-request / post-response script configuration
//!
//! Stored as a JSON column on requests; decoded into these shapes at the
//! repository boundary.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Scripts attached to a request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptsConfig {
    /// Dependent request executed before this one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_request: Option<PreRequestAction>,
    /// Extract-and-set actions applied to this request's response.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub post_response: Vec<PostResponseAction>,
}

impl ScriptsConfig {
    pub fn is_empty(&self) -> bool {
        self.pre_request.is_none() && self.post_response.is_empty()
    }
}

/// Pre-request action variants
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PreRequestAction {
    /// Send another request first and run its post-response actions.
    SendRequest { request_id: Uuid },
}

/// Post-response action variants
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PostResponseAction {
    /// Extract `source` from the response and assign it to variable `target`.
    SetVariable { source: String, target: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripts_config_round_trip() {
        let cfg = ScriptsConfig {
            pre_request: Some(PreRequestAction::SendRequest {
                request_id: Uuid::new_v4(),
            }),
            post_response: vec![PostResponseAction::SetVariable {
                source: "body.data.token".into(),
                target: "auth_token".into(),
            }],
        };
        let json = serde_json::to_string(&cfg).unwrap();
        assert!(json.contains(r#""action":"send_request""#));
        assert!(json.contains(r#""action":"set_variable""#));
        let back: ScriptsConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg, back);
    }

    #[test]
    fn test_empty_config_serializes_compact() {
        let cfg = ScriptsConfig::default();
        assert!(cfg.is_empty());
        assert_eq!(serde_json::to_string(&cfg).unwrap(), "{}");
    }
}
