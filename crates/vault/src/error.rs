//! Provider error types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProviderError>;

/// Errors from secret-provider operations
#[derive(Debug, Error)]
pub enum ProviderError {
    /// 401/403 that survived the single re-login retry.
    #[error("Provider authentication failed: {0}")]
    Auth(String),

    /// TLS, DNS, refused connection, timeout — with a human-readable
    /// summary unwrapped from the underlying cause.
    #[error("Provider unreachable: {0}")]
    Network(String),

    /// Path exists in neither the v2 nor the v1 shape.
    #[error("Secret path not found: {0}")]
    NotFound(String),

    /// Provider is not configured (or misconfigured) for this scope.
    #[error("Provider configuration error: {0}")]
    Config(String),

    /// Any other non-success response from the engine.
    #[error("Provider request failed with status {status}: {message}")]
    Api { status: u16, message: String },

    /// Response body did not parse into the expected envelope.
    #[error("Unexpected provider response: {0}")]
    Envelope(String),
}

impl ProviderError {
    /// Condenses a transport error into a one-line summary.
    pub(crate) fn from_transport(e: reqwest::Error) -> Self {
        let summary = if e.is_timeout() {
            "request timed out".to_string()
        } else if e.is_connect() {
            match std::error::Error::source(&e) {
                Some(cause) => format!("connection failed: {cause}"),
                None => "connection failed".to_string(),
            }
        } else {
            e.to_string()
        };
        ProviderError::Network(summary)
    }
}

impl From<ProviderError> for restbench_core::Error {
    fn from(e: ProviderError) -> Self {
        use restbench_core::Error;
        match e {
            ProviderError::Auth(m) => Error::ProviderAuth(m),
            ProviderError::Network(m) => Error::ProviderNetwork(m),
            ProviderError::NotFound(m) => Error::NotFound(m),
            ProviderError::Config(m) => Error::Validation(m),
            ProviderError::Api { .. } | ProviderError::Envelope(_) => {
                Error::ProviderNetwork(e.to_string())
            }
        }
    }
}
