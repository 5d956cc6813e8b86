//! Store error types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors from repository operations
#[derive(Debug, Error)]
pub enum StoreError {
    /// Lookup miss; carries the entity kind and id.
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    /// Foreign key or uniqueness violation.
    #[error("Constraint violation: {0}")]
    Constraint(String),

    /// Field encryption or decryption failed.
    #[error("Encryption error: {0}")]
    Encryption(#[from] restbench_crypto::CryptoError),

    /// A JSON-valued column failed to decode into its typed shape.
    #[error("Corrupt column {column}: {source}")]
    CorruptColumn {
        column: &'static str,
        source: serde_json::Error,
    },

    /// Input rejected before touching the database.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Backing-store failure.
    #[error("Database error: {0}")]
    Sqlite(rusqlite::Error),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        StoreError::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(code, ref msg) = e {
            if code.code == rusqlite::ErrorCode::ConstraintViolation {
                return StoreError::Constraint(
                    msg.clone().unwrap_or_else(|| "constraint failed".to_string()),
                );
            }
        }
        StoreError::Sqlite(e)
    }
}

impl From<StoreError> for restbench_core::Error {
    fn from(e: StoreError) -> Self {
        use restbench_core::Error;
        match e {
            StoreError::NotFound { .. } => Error::NotFound(e.to_string()),
            StoreError::Constraint(m) => Error::Constraint(m),
            StoreError::Encryption(inner) => Error::Encryption(inner.to_string()),
            StoreError::CorruptColumn { .. } => Error::Serialization(e.to_string()),
            StoreError::Validation(m) => Error::Validation(m),
            StoreError::Sqlite(inner) => Error::Internal(inner.to_string()),
        }
    }
}
