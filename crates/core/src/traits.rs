//! Seam traits wired up by the application shell

use uuid::Uuid;

/// Invalidation hook for cached secret providers
///
/// Implemented by the vault provider registry; the settings service calls
/// it whenever a provider-parameterizing key is mutated. Keeping the trait
/// here keeps the settings crate from depending on the vault crate.
pub trait ProviderInvalidation: Send + Sync {
    /// Drop the cached provider (and any cached secrets) for the given
    /// workspace scope; `None` is the global scope.
    fn reset_provider(&self, workspace_id: Option<Uuid>);
}
