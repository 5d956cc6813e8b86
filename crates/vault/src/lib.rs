//! # Restbench Vault
//!
//! Interface to an external KV secrets engine plus the runtime-only secret
//! cache that keeps vault-backed environment values off disk.
//!
//! ## Module Structure
//!
//! - `provider`: the polymorphic secret-provider capability set
//! - `kv`: driver for a remote KV engine speaking both v1 and v2 semantics
//! - `config`: provider settings resolved through the scoped settings tiers
//! - `cache`: session-lifetime secret cache and provider registry
//! - `error`: crate error type
//!
//! ## The secret-never-on-disk guarantee
//!
//! Values of a vault-synced environment exist in exactly two places: the
//! remote engine and [`cache::SecretCache`]. The cache is process memory
//! only — nothing here implements `Serialize`, writes files, or hands the
//! map to the store.

pub mod cache;
pub mod config;
pub mod error;
pub mod kv;
pub mod provider;

pub use cache::SecretCache;
pub use config::{VaultAuth, VaultSettings};
pub use error::{ProviderError, Result};
pub use kv::KvDriver;
pub use provider::SecretProvider;
