//! # Restbench Vars
//!
//! Layered `{{name}}` variable resolution: the active environment forms
//! the base map (read through the secret cache for vault-synced
//! environments), the collection overlay wins on key clashes, and
//! substitution re-runs to a bounded fixpoint so values may reference
//! other variables.

pub mod resolver;
pub mod substitute;

pub use resolver::Resolver;
pub use substitute::{substitute, substitute_entries, substitute_record};
