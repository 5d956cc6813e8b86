//! Git-blob content hashing
//!
//! Local content hashes use the git blob convention,
//! `SHA-1("blob " ‖ len ‖ 0x00 ‖ bytes)`, so they compare directly against
//! the blob ids the remote reports — after a push the engine knows the
//! remote hash without re-fetching.

use sha1::{Digest, Sha1};

/// Hex git-blob hash of the given content.
pub fn git_blob_sha1(content: &str) -> String {
    let bytes = content.as_bytes();
    let mut hasher = Sha1::new();
    hasher.update(format!("blob {}\0", bytes.len()).as_bytes());
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
