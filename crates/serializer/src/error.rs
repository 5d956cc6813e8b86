//! Serializer error types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SerializerError>;

/// Errors from collection serialization and import
#[derive(Debug, Error)]
pub enum SerializerError {
    /// Document failed to parse; carries the path for context.
    #[error("Failed to parse {path}: {message}")]
    Parse { path: String, message: String },

    /// A required document is missing or empty.
    #[error("Missing or empty document: {0}")]
    MissingDocument(String),

    /// An id in a manifest or document is not a valid UUID.
    #[error("Invalid identifier '{id}' in {path}")]
    InvalidId { path: String, id: String },

    /// Folder parent chain re-entered itself while building a path.
    #[error("Folder tree contains a cycle at {0}")]
    FolderCycle(uuid::Uuid),

    /// Sensitive input still carries the at-rest sentinel; the caller must
    /// hand decrypted data to the serializer.
    #[error("Refusing to serialize ciphertext field: {0}")]
    EncryptedInput(String),

    /// Document serialization failed.
    #[error("Failed to serialize {path}: {message}")]
    Emit { path: String, message: String },
}
