//! # Restbench Core
//!
//! Common types, traits, and error definitions shared across all restbench
//! crates.
//!
//! ## Module Structure
//!
//! - `model`: Domain entities (workspaces, collections, requests, environments)
//! - `types`: Value types (methods, body kinds, auth config, variables)
//! - `scripts`: Pre-request / post-response script configuration
//! - `sender`: Contract for the HTTP request-sending collaborator
//! - `constants`: Frozen limits and key sets
//! - `traits`: Seam traits wired up by the application shell
//! - `error`: Unified error taxonomy

pub mod constants;
pub mod error;
pub mod model;
pub mod scripts;
pub mod sender;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
