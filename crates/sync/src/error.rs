//! Sync error types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors from sync operations
#[derive(Debug, Error)]
pub enum SyncError {
    /// Three-way merge found divergent changes.
    #[error("Conflict in collection {collection_name}")]
    Conflict {
        collection_id: uuid::Uuid,
        collection_name: String,
    },

    /// Remote rejected the credentials.
    #[error("Remote authentication failed: {0}")]
    Auth(String),

    /// Transport-level failure, with a one-line summary.
    #[error("Remote unreachable: {0}")]
    Network(String),

    /// Remote answered with an unexpected status.
    #[error("Remote request failed with status {status}: {message}")]
    Api { status: u16, message: String },

    /// Remote payload did not decode into the expected shape.
    #[error("Unexpected remote response: {0}")]
    Envelope(String),

    /// Sync is not configured for this scope.
    #[error("Sync configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Store(#[from] restbench_store::StoreError),

    #[error(transparent)]
    Serializer(#[from] restbench_serializer::SerializerError),
}

impl SyncError {
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
        SyncError::Network(summary)
    }
}

impl From<SyncError> for restbench_core::Error {
    fn from(e: SyncError) -> Self {
        use restbench_core::Error;
        match e {
            SyncError::Conflict { .. } => Error::Conflict(e.to_string()),
            SyncError::Auth(m) => Error::ProviderAuth(m),
            SyncError::Network(m) => Error::ProviderNetwork(m),
            SyncError::Api { .. } | SyncError::Envelope(_) => Error::ProviderNetwork(e.to_string()),
            SyncError::Config(m) => Error::Validation(m),
            SyncError::Store(inner) => inner.into(),
            SyncError::Serializer(inner) => Error::Serialization(inner.to_string()),
        }
    }
}
