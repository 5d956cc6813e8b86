//! # Restbench Keychain Binding
//!
//! Thin binding to the OS credential store, used for exactly one thing:
//! holding the key-wrapping key that protects the master-key file on disk.
//!
//! Backing stores per platform:
//!
//! - **Windows**: Credential Manager
//! - **macOS**: Keychain Services
//! - **Linux**: Secret Service API (GNOME Keyring, KWallet)
//!
//! The binding is deliberately minimal — one service name, one entry per
//! key, values handled through a zeroizing wrapper. If the OS store is
//! unavailable, callers must treat that as fatal at startup: the encrypted
//! database cannot be opened without it.

use std::fmt;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Errors from keychain operations
#[derive(Debug, Error)]
pub enum KeychainError {
    /// Entry does not exist in the OS store.
    #[error("Keychain entry '{0}' not found")]
    EntryNotFound(String),

    /// The OS store refused or could not service the call.
    #[error("Keychain unavailable: {0}")]
    Unavailable(String),

    /// Invalid entry name or value.
    #[error("Invalid keychain entry: {0}")]
    InvalidEntry(String),
}

pub type Result<T> = std::result::Result<T, KeychainError>;

/// Secret bytes retrieved from the keychain, zeroized on drop
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeychainSecret {
    data: Vec<u8>,
}

impl KeychainSecret {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl fmt::Debug for KeychainSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeychainSecret")
            .field("len", &self.len())
            .field("data", &"<redacted>")
            .finish()
    }
}

/// Platform-agnostic keychain access
///
/// Implementations must be `Send + Sync`; operations are synchronous
/// (OS keychain calls are fast and only happen at startup).
pub trait KeychainProvider: Send + Sync {
    /// Store or overwrite an entry.
    fn set_entry(&self, name: &str, value: &[u8]) -> Result<()>;

    /// Retrieve an entry.
    fn get_entry(&self, name: &str) -> Result<KeychainSecret>;

    /// Delete an entry. Deleting a missing entry is not an error.
    fn delete_entry(&self, name: &str) -> Result<()>;
}

/// OS-backed keychain via the `keyring` crate
pub struct SystemKeychain {
    service: String,
}

impl SystemKeychain {
    /// `service` namespaces every entry this binding creates.
    pub fn new(service: impl Into<String>) -> Result<Self> {
        let service = service.into();
        if service.is_empty() {
            return Err(KeychainError::InvalidEntry(
                "Service name must be non-empty".to_string(),
            ));
        }
        Ok(Self { service })
    }

    fn entry(&self, name: &str) -> Result<keyring::Entry> {
        keyring::Entry::new(&self.service, name)
            .map_err(|e| KeychainError::Unavailable(e.to_string()))
    }
}

impl KeychainProvider for SystemKeychain {
    fn set_entry(&self, name: &str, value: &[u8]) -> Result<()> {
        // The keyring crate stores UTF-8 strings; binary values must be
        // encoded by the caller before they get here.
        let value = std::str::from_utf8(value).map_err(|_| {
            KeychainError::InvalidEntry("Keychain values must be valid UTF-8".to_string())
        })?;
        self.entry(name)?
            .set_password(value)
            .map_err(|e| KeychainError::Unavailable(e.to_string()))
    }

    fn get_entry(&self, name: &str) -> Result<KeychainSecret> {
        let password = self.entry(name)?.get_password().map_err(|e| match e {
            keyring::Error::NoEntry => KeychainError::EntryNotFound(name.to_string()),
            other => KeychainError::Unavailable(other.to_string()),
        })?;
        Ok(KeychainSecret::new(password.into_bytes()))
    }

    fn delete_entry(&self, name: &str) -> Result<()> {
        match self.entry(name)?.delete_password() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(KeychainError::Unavailable(e.to_string())),
        }
    }
}

impl fmt::Debug for SystemKeychain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemKeychain")
            .field("service", &self.service)
            .finish()
    }
}

/// In-memory keychain for tests
///
/// Behaves like the OS store without touching it; never use outside tests.
#[derive(Default)]
pub struct MockKeychain {
    entries: std::sync::Mutex<std::collections::HashMap<String, Vec<u8>>>,
}

impl MockKeychain {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeychainProvider for MockKeychain {
    fn set_entry(&self, name: &str, value: &[u8]) -> Result<()> {
        self.entries
            .lock()
            .expect("mock keychain lock poisoned")
            .insert(name.to_string(), value.to_vec());
        Ok(())
    }

    fn get_entry(&self, name: &str) -> Result<KeychainSecret> {
        self.entries
            .lock()
            .expect("mock keychain lock poisoned")
            .get(name)
            .cloned()
            .map(KeychainSecret::new)
            .ok_or_else(|| KeychainError::EntryNotFound(name.to_string()))
    }

    fn delete_entry(&self, name: &str) -> Result<()> {
        self.entries
            .lock()
            .expect("mock keychain lock poisoned")
            .remove(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_debug_redacted() {
        let secret = KeychainSecret::new(b"wrap-key-material".to_vec());
        let debug = format!("{:?}", secret);
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains("wrap-key-material"));
    }

    #[test]
    fn test_system_keychain_empty_service_rejected() {
        assert!(matches!(
            SystemKeychain::new(""),
            Err(KeychainError::InvalidEntry(_))
        ));
    }

    #[test]
    fn test_mock_round_trip() {
        let kc = MockKeychain::new();
        kc.set_entry("wrap-key", b"0123456789abcdef").unwrap();
        let got = kc.get_entry("wrap-key").unwrap();
        assert_eq!(got.as_bytes(), b"0123456789abcdef");
    }

    #[test]
    fn test_mock_missing_entry() {
        let kc = MockKeychain::new();
        assert!(matches!(
            kc.get_entry("absent"),
            Err(KeychainError::EntryNotFound(_))
        ));
    }

    #[test]
    fn test_mock_delete_idempotent() {
        let kc = MockKeychain::new();
        kc.set_entry("k", b"v").unwrap();
        kc.delete_entry("k").unwrap();
        kc.delete_entry("k").unwrap();
        assert!(kc.get_entry("k").is_err());
    }
}
