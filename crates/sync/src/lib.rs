//! # Restbench Sync
//!
//! Directory-serialized collection sync against a git remote.
//!
//! Collections serialize to a file tree (see the serializer crate); this
//! crate reconciles that tree against the remote copy with a per-file
//! three-way merge over content hashes, groups pushes into one atomic
//! commit, pulls in one store transaction, and surfaces divergence as
//! conflicts instead of guessing.
//!
//! ## Module Structure
//!
//! - `adapter`: provider-agnostic remote contract
//! - `github`: tree-API adapter (git data API, raw paths)
//! - `gitlab`: commits-API adapter (percent-encoded paths,
//!   `last_commit_id` conflict signal)
//! - `merge`: the three-way classification table
//! - `engine`: sync operations over store + serializer + adapter
//! - `hash`: git-blob content hashing
//! - `error`: crate error type

pub mod adapter;
pub mod engine;
pub mod error;
pub mod github;
pub mod gitlab;
pub mod hash;
pub mod merge;

pub use adapter::{GitAdapter, RemoteEntry, RemoteEntryKind, RemoteFile};
pub use engine::{SyncConflict, SyncEngine, SyncOutcome, SyncResult};
pub use error::{Result, SyncError};
pub use github::GithubAdapter;
pub use gitlab::GitlabAdapter;
