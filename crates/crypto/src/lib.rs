//! # Restbench Crypto
//!
//! Field-level encryption for the restbench store and the master-key
//! lifecycle behind it.
//!
//! ## Module Structure
//!
//! - `cipher`: AES-256-GCM encrypt/decrypt with on-disk sentinels and the
//!   decrypt-only AES-256-CBC legacy path
//! - `keystore`: master-key file wrapped by an OS-keychain-held key
//! - `error`: crate error type
//!
//! ## Sentinels
//!
//! Two prefixes are load-bearing across the store:
//!
//! - `gcm:` marks a raw AES-256-GCM blob (base64 of IV ‖ tag ‖ ciphertext)
//! - `enc:` marks an encrypted *field* value (`enc:` followed by a `gcm:`
//!   blob); writers check for it so re-encryption is a no-op
//!
//! A ciphertext without either prefix is decrypted through the legacy
//! AES-256-CBC path, which exists only so databases written before the GCM
//! migration keep reading.

pub mod cipher;
pub mod error;
pub mod keystore;

pub use cipher::{FieldCipher, ENC_PREFIX, GCM_PREFIX};
pub use error::{CryptoError, Result};
pub use keystore::MasterKeyStore;
