//! Crypto error types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CryptoError>;

/// Errors from encryption, decryption, and master-key handling
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Authentication tag verification failed: the blob was tampered with
    /// or was written under a different master key.
    #[error("Authentication tag mismatch (tampered data or wrong key)")]
    TagMismatch,

    /// The blob does not parse as any known ciphertext layout.
    #[error("Malformed ciphertext: {0}")]
    MalformedCiphertext(String),

    /// Key material has the wrong length.
    #[error("Invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    /// Decrypted bytes were expected to be UTF-8 but are not.
    #[error("Decrypted value is not valid UTF-8")]
    NotUtf8,

    /// The OS keychain could not service the master-key wrap.
    #[error("Keychain error: {0}")]
    Keychain(#[from] restbench_keychain::KeychainError),

    /// Master-key file could not be read or written.
    #[error("Master key file error: {0}")]
    Io(#[from] std::io::Error),
}
