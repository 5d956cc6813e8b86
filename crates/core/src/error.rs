//! Core error types for restbench

use thiserror::Error;

/// Result type alias using restbench's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type shared across restbench crates
///
/// Crate-local error enums convert into this taxonomy at the boundary where
/// results cross crates, so callers match on one shape.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Sync conflict: {0}")]
    Conflict(String),

    #[error("Provider authentication error: {0}")]
    ProviderAuth(String),

    #[error("Provider network error: {0}")]
    ProviderNetwork(String),

    #[error("Script limit exceeded: {0}")]
    ScriptLimit(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}
