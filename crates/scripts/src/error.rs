//! Script executor error types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ScriptError>;

/// Errors from script execution
#[derive(Debug, Error)]
pub enum ScriptError {
    /// Pre-request chain exceeded the depth bound.
    #[error("Pre-request chain exceeds max depth of {0}")]
    MaxDepth(usize),

    /// Pre-request chain re-entered a request already in flight.
    #[error("Pre-request cycle detected at request {0}")]
    Cycle(uuid::Uuid),

    /// Request rejected before dispatch.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Store(#[from] restbench_store::StoreError),

    #[error(transparent)]
    Provider(#[from] restbench_vault::ProviderError),

    /// Anything surfaced by the core contracts (sender, resolver).
    #[error(transparent)]
    Core(#[from] restbench_core::Error),
}

impl From<ScriptError> for restbench_core::Error {
    fn from(e: ScriptError) -> Self {
        use restbench_core::Error;
        match e {
            ScriptError::MaxDepth(_) | ScriptError::Cycle(_) => Error::ScriptLimit(e.to_string()),
            ScriptError::Validation(m) => Error::Validation(m),
            ScriptError::Store(inner) => inner.into(),
            ScriptError::Provider(inner) => inner.into(),
            ScriptError::Core(inner) => inner,
        }
    }
}
