//! Per-file three-way classification
//!
//! For each path present locally or remotely, three observations decide
//! the action: the base recorded at the last successful sync, the local
//! content hash, and the remote blob id. Hashes use the git blob
//! convention so local and remote values compare directly.

use restbench_core::types::FileSha;

/// What the engine must do with one path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileAction {
    /// Nothing changed anywhere.
    Noop,
    /// Remote changed (or is new); write it locally and advance the base.
    Pull,
    /// Local changed (or is new); write it remotely and advance the base.
    Push,
    /// Local and remote independently hold identical content; just record
    /// the base.
    RecordBase,
    /// Deleted locally, unchanged remotely; delete remotely.
    PushDelete,
    /// Unchanged locally, deleted remotely; delete locally.
    PullDelete,
    /// Gone on both sides; forget the base.
    ClearBase,
    /// Divergent changes; surface to the user, touch nothing.
    Conflict,
}

/// Direction of the sync pass.
///
/// A pull-only pass never mutates the remote: push-shaped rows are left
/// for a later push, except the ambiguous "local file added after a
/// previous sync, absent remotely" row, which is conservatively a
/// conflict — a pull must never silently discard local-only work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDirection {
    Bidirectional,
    PullOnly,
}

/// Classifies one path.
///
/// `synced_before` is whether the collection has ever completed a sync;
/// it only affects the base-absent/local-present/remote-absent row in
/// pull-only mode.
pub fn classify(
    base: Option<&FileSha>,
    local_hash: Option<&str>,
    remote_id: Option<&str>,
    direction: SyncDirection,
    synced_before: bool,
) -> FileAction {
    match (base, local_hash, remote_id) {
        (None, None, None) => FileAction::Noop,
        (None, None, Some(_)) => FileAction::Pull,
        (None, Some(_), None) => match direction {
            SyncDirection::Bidirectional => FileAction::Push,
            SyncDirection::PullOnly if synced_before => FileAction::Conflict,
            SyncDirection::PullOnly => FileAction::Push,
        },
        (None, Some(local), Some(remote)) => {
            if local == remote {
                FileAction::RecordBase
            } else {
                FileAction::Conflict
            }
        }
        (Some(base), Some(local), Some(remote)) => {
            let local_changed = local != base.content_hash;
            let remote_changed = remote != base.remote_sha;
            match (local_changed, remote_changed) {
                (false, false) => FileAction::Noop,
                (false, true) => FileAction::Pull,
                (true, false) => FileAction::Push,
                (true, true) => {
                    if local == remote {
                        // Both sides landed on identical content.
                        FileAction::RecordBase
                    } else {
                        FileAction::Conflict
                    }
                }
            }
        }
        (Some(base), None, Some(remote)) => {
            if remote == base.remote_sha {
                FileAction::PushDelete
            } else {
                FileAction::Conflict
            }
        }
        (Some(base), Some(local), None) => {
            if *local == base.content_hash {
                FileAction::PullDelete
            } else {
                FileAction::Conflict
            }
        }
        (Some(_), None, None) => FileAction::ClearBase,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base(hash: &str) -> FileSha {
        FileSha {
            content_hash: hash.to_string(),
            remote_sha: hash.to_string(),
            commit_sha: None,
        }
    }

    fn run(base_hash: Option<&str>, local: Option<&str>, remote: Option<&str>) -> FileAction {
        let b = base_hash.map(base);
        classify(
            b.as_ref(),
            local,
            remote,
            SyncDirection::Bidirectional,
            true,
        )
    }

    #[test]
    fn test_full_classification_table() {
        assert_eq!(run(None, None, Some("x")), FileAction::Pull);
        assert_eq!(run(None, Some("x"), None), FileAction::Push);
        assert_eq!(run(None, Some("x"), Some("x")), FileAction::RecordBase);
        assert_eq!(run(None, Some("x"), Some("y")), FileAction::Conflict);
        assert_eq!(run(Some("b"), Some("b"), Some("b")), FileAction::Noop);
        assert_eq!(run(Some("b"), Some("b"), Some("y")), FileAction::Pull);
        assert_eq!(run(Some("b"), Some("x"), Some("b")), FileAction::Push);
        assert_eq!(run(Some("b"), Some("x"), Some("y")), FileAction::Conflict);
        assert_eq!(run(Some("b"), None, Some("b")), FileAction::PushDelete);
        assert_eq!(run(Some("b"), Some("b"), None), FileAction::PullDelete);
        assert_eq!(run(Some("b"), None, None), FileAction::ClearBase);
        assert_eq!(run(Some("b"), Some("x"), None), FileAction::Conflict);
        assert_eq!(run(Some("b"), None, Some("y")), FileAction::Conflict);
    }

    #[test]
    fn test_convergent_edit_records_base() {
        assert_eq!(run(Some("b"), Some("x"), Some("x")), FileAction::RecordBase);
    }

    #[test]
    fn test_pull_only_local_addition_after_sync_conflicts() {
        assert_eq!(
            classify(None, Some("x"), None, SyncDirection::PullOnly, true),
            FileAction::Conflict
        );
        // Never-synced collections just have unpushed local files.
        assert_eq!(
            classify(None, Some("x"), None, SyncDirection::PullOnly, false),
            FileAction::Push
        );
    }
}
